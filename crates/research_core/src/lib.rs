pub mod domain;
pub mod lifecycle;
pub mod ports;
pub mod store;

pub use domain::{
    NewResearchSession, ResearchSession, ResearchSessionUpdate, ResearchStatus, SessionFilter,
    ValidationError, TRACE_ID_MAX_LEN,
};
pub use lifecycle::ResearchLifecycle;
pub use ports::{PortError, PortResult, ResearchSessionRepository};
pub use store::InMemoryResearchStore;
