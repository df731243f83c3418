use thiserror::Error;

/// Typed error surface of the dispatch core.
///
/// Components raise these upward; the orchestrator is the only place that
/// turns them into user-visible responses and compensating actions.
#[derive(Error, Debug)]
pub enum DispatchError {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("{0} not found")]
    NotFound(String),

    #[error("forbidden: {0}")]
    Forbidden(String),

    /// A race was lost, or a transition was attempted from the wrong state.
    /// Reported verbatim to the loser; never retried implicitly.
    #[error("conflict: {0}")]
    Conflict(String),

    /// No drivers found at any radius, or the dispatch deadline elapsed
    /// without an acceptance.
    #[error("no capacity: {0}")]
    NoCapacity(String),

    /// A collaborator contract failed. Kept distinct from `Conflict` so a
    /// lost race is never mistaken for an infrastructure problem.
    #[error("dependency failure: {0}")]
    Dependency(#[from] anyhow::Error),
}

impl DispatchError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }

    pub fn forbidden(msg: impl Into<String>) -> Self {
        Self::Forbidden(msg.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    pub fn no_capacity(msg: impl Into<String>) -> Self {
        Self::NoCapacity(msg.into())
    }
}

pub type DispatchResult<T> = Result<T, DispatchError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conflict_and_dependency_render_distinctly() {
        let race = DispatchError::conflict("ride already accepted");
        let infra = DispatchError::from(anyhow::anyhow!("connection reset"));

        assert_eq!(race.to_string(), "conflict: ride already accepted");
        assert_eq!(infra.to_string(), "dependency failure: connection reset");
    }

    #[test]
    fn not_found_names_the_resource() {
        let e = DispatchError::not_found("ride");
        assert_eq!(e.to_string(), "ride not found");
    }
}
