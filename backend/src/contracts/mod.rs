//! Collaborator contracts.
//!
//! Everything outside the dispatch core (pricing, wallet ledger, geo
//! tracking, driver profiles, ratings, promotions, push notifications,
//! saved locations) is consumed through one of these narrow traits.
//!
//! The traits intentionally hide:
//! - transport (HTTP, websocket, in-process)
//! - persistence of the collaborator's own state
//! - error formats, which implementations normalize into `anyhow` chains
//!
//! Implementations are constructed in `main` and injected as `Arc<dyn _>`;
//! there is no process-wide registry.

pub mod drivers;
pub mod notifier;
pub mod pricing;
pub mod promotions;
pub mod ratings;
pub mod saved_locations;
pub mod tracking;
pub mod wallet;

use std::sync::Arc;

pub use drivers::{DriverProfile, DriverStatus, Drivers};
pub use notifier::Notifier;
pub use pricing::Pricing;
pub use promotions::Promotions;
pub use ratings::Ratings;
pub use saved_locations::SavedLocations;
pub use tracking::Tracking;
pub use wallet::Wallet;

/// The full set of collaborators the orchestrator is wired with.
#[derive(Clone)]
pub struct Collaborators {
    pub pricing: Arc<dyn Pricing>,
    pub wallet: Arc<dyn Wallet>,
    pub tracking: Arc<dyn Tracking>,
    pub drivers: Arc<dyn Drivers>,
    pub ratings: Arc<dyn Ratings>,
    pub promotions: Arc<dyn Promotions>,
    pub notifier: Arc<dyn Notifier>,
    pub saved_locations: Arc<dyn SavedLocations>,
}
