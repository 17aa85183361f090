//! crates/research_core/src/domain.rs
//!
//! Defines the pure, core data structures for research sessions.
//! These structs are independent of any database or serialization format.

use chrono::{DateTime, Utc};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Upper bound on the length of a `trace_id`, matching the storage column.
pub const TRACE_ID_MAX_LEN: usize = 255;

//=========================================================================================
// Validation
//=========================================================================================

/// A field-level validation failure on a research session.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("{0} is required")]
    MissingField(&'static str),
    #[error("{0} must not be blank")]
    BlankField(&'static str),
    #[error("{field} must be at most {max} characters")]
    TooLong { field: &'static str, max: usize },
    #[error("'{0}' is not a valid research status")]
    InvalidStatus(String),
    #[error("a research session cannot be its own parent")]
    SelfParent,
    #[error("parent research {0} does not exist")]
    UnknownParent(Uuid),
    #[error("parent research {0} already descends from this session")]
    ParentCycle(Uuid),
}

fn require_text(field: &'static str, value: &str) -> Result<(), ValidationError> {
    if value.trim().is_empty() {
        return Err(ValidationError::BlankField(field));
    }
    Ok(())
}

fn check_trace_id(trace_id: Option<&str>) -> Result<(), ValidationError> {
    match trace_id {
        Some(t) if t.chars().count() > TRACE_ID_MAX_LEN => Err(ValidationError::TooLong {
            field: "trace_id",
            max: TRACE_ID_MAX_LEN,
        }),
        _ => Ok(()),
    }
}

//=========================================================================================
// ResearchStatus
//=========================================================================================

/// The lifecycle state of a research session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ResearchStatus {
    #[default]
    Pending,
    Running,
    Completed,
    Failed,
}

impl ResearchStatus {
    pub const ALL: [ResearchStatus; 4] = [
        ResearchStatus::Pending,
        ResearchStatus::Running,
        ResearchStatus::Completed,
        ResearchStatus::Failed,
    ];

    /// The stored value, e.g. `"PENDING"`.
    pub fn as_str(&self) -> &'static str {
        match self {
            ResearchStatus::Pending => "PENDING",
            ResearchStatus::Running => "RUNNING",
            ResearchStatus::Completed => "COMPLETED",
            ResearchStatus::Failed => "FAILED",
        }
    }

    /// Human readable label, e.g. `"Pending"`.
    pub fn label(&self) -> &'static str {
        match self {
            ResearchStatus::Pending => "Pending",
            ResearchStatus::Running => "Running",
            ResearchStatus::Completed => "Completed",
            ResearchStatus::Failed => "Failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, ResearchStatus::Completed | ResearchStatus::Failed)
    }

    /// Whether the lifecycle allows moving from `self` to `next`.
    ///
    /// PENDING -> RUNNING -> {COMPLETED, FAILED}. A session may also fail
    /// before it ever started running. Terminal states never move.
    pub fn can_transition_to(&self, next: ResearchStatus) -> bool {
        use ResearchStatus::*;
        matches!(
            (self, next),
            (Pending, Running) | (Pending, Failed) | (Running, Completed) | (Running, Failed)
        )
    }
}

impl fmt::Display for ResearchStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ResearchStatus {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(ResearchStatus::Pending),
            "RUNNING" => Ok(ResearchStatus::Running),
            "COMPLETED" => Ok(ResearchStatus::Completed),
            "FAILED" => Ok(ResearchStatus::Failed),
            other => Err(ValidationError::InvalidStatus(other.to_string())),
        }
    }
}

//=========================================================================================
// ResearchSession
//=========================================================================================

/// One tracked research query and its lifecycle state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResearchSession {
    pub id: Uuid,
    pub user_id: i64,
    pub original_query: String,
    pub status: ResearchStatus,
    /// Populated once the research has completed.
    pub final_report: Option<String>,
    /// A prior session this one continues. Cleared if that session is deleted.
    pub parent_research: Option<Uuid>,
    pub trace_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ResearchSession {
    /// Builds a freshly submitted session from validated input.
    pub fn from_new(new: NewResearchSession, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id: new.user_id,
            original_query: new.original_query,
            status: ResearchStatus::Pending,
            final_report: None,
            parent_research: new.parent_research,
            trace_id: new.trace_id,
            created_at: now,
            updated_at: now,
        }
    }

    /// Applies `changes` in place. Transition legality is not checked here.
    pub fn apply(&mut self, changes: ResearchSessionUpdate) {
        if let Some(status) = changes.status {
            self.status = status;
        }
        if let Some(final_report) = changes.final_report {
            self.final_report = final_report;
        }
        if let Some(trace_id) = changes.trace_id {
            self.trace_id = trace_id;
        }
        if let Some(parent_research) = changes.parent_research {
            self.parent_research = parent_research;
        }
    }
}

impl fmt::Display for ResearchSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ResearchSession {} - {}", self.id, self.status)
    }
}

//=========================================================================================
// Inputs
//=========================================================================================

/// Input for submitting a new research session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewResearchSession {
    pub user_id: i64,
    pub original_query: String,
    pub parent_research: Option<Uuid>,
    pub trace_id: Option<String>,
}

impl NewResearchSession {
    pub fn new(user_id: i64, original_query: impl Into<String>) -> Self {
        Self {
            user_id,
            original_query: original_query.into(),
            parent_research: None,
            trace_id: None,
        }
    }

    /// Builds the input from possibly-absent fields, as they arrive from callers.
    pub fn from_fields(
        user_id: Option<i64>,
        original_query: Option<String>,
    ) -> Result<Self, ValidationError> {
        let user_id = user_id.ok_or(ValidationError::MissingField("user_id"))?;
        let original_query =
            original_query.ok_or(ValidationError::MissingField("original_query"))?;
        Ok(Self::new(user_id, original_query))
    }

    pub fn with_parent(mut self, parent_research: Uuid) -> Self {
        self.parent_research = Some(parent_research);
        self
    }

    pub fn with_trace_id(mut self, trace_id: impl Into<String>) -> Self {
        self.trace_id = Some(trace_id.into());
        self
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        require_text("original_query", &self.original_query)?;
        check_trace_id(self.trace_id.as_deref())
    }
}

/// A partial modification of a session.
///
/// `None` leaves a field untouched; `Some(None)` clears an optional field.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResearchSessionUpdate {
    pub status: Option<ResearchStatus>,
    pub final_report: Option<Option<String>>,
    pub trace_id: Option<Option<String>>,
    pub parent_research: Option<Option<Uuid>>,
}

impl ResearchSessionUpdate {
    pub fn status(status: ResearchStatus) -> Self {
        Self {
            status: Some(status),
            ..Self::default()
        }
    }

    pub fn with_final_report(mut self, report: impl Into<String>) -> Self {
        self.final_report = Some(Some(report.into()));
        self
    }

    pub fn with_trace_id(mut self, trace_id: impl Into<String>) -> Self {
        self.trace_id = Some(Some(trace_id.into()));
        self
    }

    pub fn with_parent(mut self, parent_research: Option<Uuid>) -> Self {
        self.parent_research = Some(parent_research);
        self
    }

    /// Checks the update against the session it will be applied to.
    pub fn validate_for(&self, id: Uuid) -> Result<(), ValidationError> {
        if let Some(Some(trace_id)) = &self.trace_id {
            check_trace_id(Some(trace_id))?;
        }
        if self.parent_research == Some(Some(id)) {
            return Err(ValidationError::SelfParent);
        }
        Ok(())
    }
}

/// Exact-match filters and paging for listing sessions.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionFilter {
    pub user_id: Option<i64>,
    pub status: Option<ResearchStatus>,
    pub parent_research: Option<Uuid>,
    pub limit: Option<u32>,
    pub offset: Option<u32>,
}

impl SessionFilter {
    pub fn by_user(user_id: i64) -> Self {
        Self {
            user_id: Some(user_id),
            ..Self::default()
        }
    }

    pub fn children_of(parent_research: Uuid) -> Self {
        Self {
            parent_research: Some(parent_research),
            ..Self::default()
        }
    }

    pub fn matches(&self, session: &ResearchSession) -> bool {
        self.user_id.map_or(true, |u| session.user_id == u)
            && self.status.map_or(true, |s| session.status == s)
            && self
                .parent_research
                .map_or(true, |p| session.parent_research == Some(p))
    }
}
