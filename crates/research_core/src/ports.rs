//! crates/research_core/src/ports.rs
//!
//! Defines the storage contract for research sessions.
//! The trait forms the boundary of the hexagonal architecture, allowing the core
//! to stay independent of the concrete datastore.

use async_trait::async_trait;
use uuid::Uuid;

use crate::domain::{
    NewResearchSession, ResearchSession, ResearchSessionUpdate, ResearchStatus, SessionFilter,
    ValidationError,
};

//=========================================================================================
// Generic Port Error and Result Types
//=========================================================================================

/// A generic error type for all port operations.
/// This abstracts away the specific errors from external services (e.g., database).
#[derive(Debug, thiserror::Error)]
pub enum PortError {
    #[error("Item not found: {0}")]
    NotFound(String),
    #[error("Validation failed: {0}")]
    Validation(String),
    #[error("Conflict: {0}")]
    Conflict(String),
    #[error("Invalid status transition from {from} to {to}")]
    InvalidTransition {
        from: ResearchStatus,
        to: ResearchStatus,
    },
    #[error("An unexpected error occurred: {0}")]
    Unexpected(String),
}

impl From<ValidationError> for PortError {
    fn from(e: ValidationError) -> Self {
        PortError::Validation(e.to_string())
    }
}

impl PortError {
    pub fn session_not_found(id: Uuid) -> Self {
        PortError::NotFound(format!("ResearchSession {} not found", id))
    }
}

/// A convenience type alias for `Result<T, PortError>`.
pub type PortResult<T> = Result<T, PortError>;

//=========================================================================================
// Service Ports (Traits)
//=========================================================================================

#[async_trait]
pub trait ResearchSessionRepository: Send + Sync {
    /// Persists a new session with a fresh id and `PENDING` status.
    async fn create(&self, new: NewResearchSession) -> PortResult<ResearchSession>;

    async fn get(&self, id: Uuid) -> PortResult<ResearchSession>;

    /// Lists sessions matching `filter`, most recently created first.
    async fn list(&self, filter: &SessionFilter) -> PortResult<Vec<ResearchSession>>;

    /// Applies `changes` without checking transition legality and refreshes
    /// `updated_at`.
    async fn update(
        &self,
        id: Uuid,
        changes: ResearchSessionUpdate,
    ) -> PortResult<ResearchSession>;

    /// Like `update`, but only if the stored status still equals `expected`.
    /// Returns `PortError::Conflict` otherwise.
    async fn update_if_status(
        &self,
        id: Uuid,
        expected: ResearchStatus,
        changes: ResearchSessionUpdate,
    ) -> PortResult<ResearchSession>;

    /// Removes a session. Children keep existing with their parent reference cleared.
    async fn delete(&self, id: Uuid) -> PortResult<()>;
}
