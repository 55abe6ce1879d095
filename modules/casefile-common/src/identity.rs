//! Content-derived record identity.

use sha2::{Digest, Sha256};

use crate::types::IncidentRecord;
use crate::vocab::type_code;

/// Hex characters of the content hash kept in the identity.
const HASH_LEN: usize = 12;

/// Derive a record identity from (date, state, city, subject name,
/// incident type), prefixed with the tier code and the 2-character type
/// code. Missing fields hash as empty strings.
pub fn generate_identity(record: &IncidentRecord) -> String {
    let parts = [
        record.date.trim(),
        record.state.trim(),
        record.city.as_deref().unwrap_or("").trim(),
        record.subject_name.as_deref().unwrap_or("").trim(),
        record.incident_type.trim(),
    ];

    let mut hasher = Sha256::new();
    hasher.update(parts.join("|").as_bytes());
    let digest = hex::encode(hasher.finalize());

    let tier = match record.tier_level() {
        Some(tier) => tier.code().to_string(),
        None => format!("T{}", record.tier),
    };

    format!(
        "{tier}-{}-{}",
        type_code(&record.incident_type),
        &digest[..HASH_LEN]
    )
}
