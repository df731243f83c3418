pub mod dispatcher;

pub use dispatcher::{OfferDispatcher, radius_ladder_km};
