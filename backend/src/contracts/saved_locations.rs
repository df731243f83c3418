use async_trait::async_trait;
use uuid::Uuid;

#[derive(Clone, Debug)]
pub struct SavedLocation {
    pub location_id: Uuid,
    pub label: String,
    pub lat: f64,
    pub lon: f64,
    pub address: String,
}

/// Read-only lookup for a rider's saved places ("home", "work").
/// The CRUD for these lives outside the core.
#[async_trait]
pub trait SavedLocations: Send + Sync + 'static {
    async fn resolve(
        &self,
        user_id: Uuid,
        location_id: Uuid,
    ) -> anyhow::Result<Option<SavedLocation>>;
}
