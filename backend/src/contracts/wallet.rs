use async_trait::async_trait;
use uuid::Uuid;

/// Money-movement contract.
///
/// The ledger itself lives elsewhere; the core only references holds by id
/// and must guarantee each attached hold ends in exactly one capture or
/// release.
#[async_trait]
pub trait Wallet: Send + Sync + 'static {
    /// Reserve `amount` on the user's wallet. `reference` ties the hold to
    /// a ride id; `ttl_secs` bounds how long the hold may dangle if the
    /// process dies.
    async fn hold_funds(
        &self,
        user_id: Uuid,
        amount: f64,
        reference: &str,
        ttl_secs: u64,
    ) -> anyhow::Result<Uuid>;

    /// Capture `amount` from the hold; the remainder is released.
    async fn capture_hold(&self, hold_id: Uuid, amount: f64) -> anyhow::Result<()>;

    /// Release the hold in full.
    async fn release_hold(&self, hold_id: Uuid) -> anyhow::Result<()>;

    async fn credit_wallet(
        &self,
        user_id: Uuid,
        amount: f64,
        reason: &str,
        reference: &str,
    ) -> anyhow::Result<()>;

    async fn deduct_penalty(
        &self,
        user_id: Uuid,
        amount: f64,
        reason: &str,
        reference: &str,
    ) -> anyhow::Result<()>;
}
