pub mod config;
pub mod error;
pub mod identity;
pub mod similarity;
pub mod types;
pub mod vocab;

pub use config::CasefileConfig;
pub use error::{CasefileError, Result};
pub use identity::generate_identity;
pub use similarity::{matches, similarity, MatchScore, NameMatching, SimilarityRules};
pub use types::*;
pub use vocab::Vocabulary;
