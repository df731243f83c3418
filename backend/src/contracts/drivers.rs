use async_trait::async_trait;
use uuid::Uuid;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DriverStatus {
    Online,
    Busy,
    Offline,
}

impl DriverStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Online => "online",
            Self::Busy => "busy",
            Self::Offline => "offline",
        }
    }
}

/// Driver profile as exposed to dispatch. `user_id` is the authoritative
/// cross-domain identity; rides reference drivers by it, and profile-id
/// paths adapt through `find_by_id`.
#[derive(Clone, Debug)]
pub struct DriverProfile {
    pub driver_id: Uuid,
    pub user_id: Uuid,
    pub full_name: String,
    pub vehicle_class: String,
    pub vehicle_plate: String,
    pub status: DriverStatus,
}

#[async_trait]
pub trait Drivers: Send + Sync + 'static {
    async fn find_by_id(&self, driver_id: Uuid) -> anyhow::Result<Option<DriverProfile>>;

    async fn find_by_user_id(&self, user_id: Uuid) -> anyhow::Result<Option<DriverProfile>>;

    async fn update_status(&self, user_id: Uuid, status: DriverStatus) -> anyhow::Result<()>;

    async fn increment_trips(&self, user_id: Uuid) -> anyhow::Result<()>;

    async fn update_earnings(&self, user_id: Uuid, amount: f64) -> anyhow::Result<()>;
}
