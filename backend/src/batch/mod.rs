pub mod collector;

pub use collector::{Batch, BatchCollector, BatchExpiryHandler, BatchRequest};
