//! services/api/src/web/state.rs
//!
//! Defines the application's shared state.

use crate::config::Config;
use research_core::lifecycle::ResearchLifecycle;
use research_core::ports::ResearchSessionRepository;
use std::sync::Arc;

/// The shared application state, created once at startup and passed to all handlers.
#[derive(Clone)]
pub struct AppState {
    pub db: Arc<dyn ResearchSessionRepository>,
    pub lifecycle: ResearchLifecycle,
    pub config: Arc<Config>,
}

impl AppState {
    pub fn new(db: Arc<dyn ResearchSessionRepository>, config: Arc<Config>) -> Self {
        Self {
            lifecycle: ResearchLifecycle::new(db.clone()),
            db,
            config,
        }
    }
}
