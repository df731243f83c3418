pub mod matcher;
pub mod types;

pub use matcher::{confidence, match_batch};
pub use types::{Assignment, BatchMatchingResult};
