use async_trait::async_trait;
use uuid::Uuid;

#[derive(Clone, Debug)]
pub struct PromoCode {
    pub code: String,
    pub percent_off: f64,
    pub max_discount: f64,
}

/// Discount actually granted against a fare.
#[derive(Clone, Debug)]
pub struct AppliedPromo {
    pub code: String,
    pub discount: f64,
}

#[async_trait]
pub trait Promotions: Send + Sync + 'static {
    /// Shape/eligibility check without consuming the code.
    async fn validate_code(&self, rider_id: Uuid, code: &str) -> anyhow::Result<bool>;

    /// Consume the code against `fare`; the returned discount is already
    /// capped by the code's own rules.
    async fn apply_code(&self, rider_id: Uuid, code: &str, fare: f64)
    -> anyhow::Result<AppliedPromo>;

    async fn promo_code(&self, code: &str) -> anyhow::Result<Option<PromoCode>>;
}
