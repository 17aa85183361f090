//! crates/research_core/src/lifecycle.rs
//!
//! Drives research sessions through PENDING -> RUNNING -> {COMPLETED, FAILED}.
//!
//! The record itself accepts any status; this service is the one place that
//! enforces the state machine. Transitions are compare-and-set against the status
//! that was read, so two workers racing on the same session cannot both win.

use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

use crate::domain::{NewResearchSession, ResearchSession, ResearchSessionUpdate, ResearchStatus};
use crate::ports::{PortError, PortResult, ResearchSessionRepository};

#[derive(Clone)]
pub struct ResearchLifecycle {
    repo: Arc<dyn ResearchSessionRepository>,
}

impl ResearchLifecycle {
    pub fn new(repo: Arc<dyn ResearchSessionRepository>) -> Self {
        Self { repo }
    }

    pub fn repository(&self) -> &Arc<dyn ResearchSessionRepository> {
        &self.repo
    }

    /// Records a newly submitted research request.
    pub async fn submit(&self, new: NewResearchSession) -> PortResult<ResearchSession> {
        let session = self.repo.create(new).await?;
        info!(session_id = %session.id, user_id = session.user_id, "research session submitted");
        Ok(session)
    }

    /// PENDING -> RUNNING, optionally attaching the trace the run is recorded under.
    pub async fn start(&self, id: Uuid, trace_id: Option<String>) -> PortResult<ResearchSession> {
        let mut changes = ResearchSessionUpdate::status(ResearchStatus::Running);
        if let Some(trace_id) = trace_id {
            changes = changes.with_trace_id(trace_id);
        }
        self.transition(id, ResearchStatus::Running, changes).await
    }

    /// RUNNING -> COMPLETED with the final report.
    pub async fn complete(&self, id: Uuid, report: String) -> PortResult<ResearchSession> {
        if report.trim().is_empty() {
            return Err(PortError::Validation("final_report must not be blank".to_string()));
        }
        let changes =
            ResearchSessionUpdate::status(ResearchStatus::Completed).with_final_report(report);
        self.transition(id, ResearchStatus::Completed, changes).await
    }

    /// PENDING or RUNNING -> FAILED.
    pub async fn fail(&self, id: Uuid) -> PortResult<ResearchSession> {
        let changes = ResearchSessionUpdate::status(ResearchStatus::Failed);
        self.transition(id, ResearchStatus::Failed, changes).await
    }

    /// Starts a new session that continues `parent_id`. The owner defaults to the
    /// parent's owner.
    pub async fn follow_up(
        &self,
        parent_id: Uuid,
        user_id: Option<i64>,
        original_query: String,
    ) -> PortResult<ResearchSession> {
        let parent = self.repo.get(parent_id).await?;
        let user_id = user_id.unwrap_or(parent.user_id);
        let session = self
            .repo
            .create(NewResearchSession::new(user_id, original_query).with_parent(parent.id))
            .await?;
        info!(
            session_id = %session.id,
            parent_id = %parent.id,
            "follow-up research session submitted"
        );
        Ok(session)
    }

    async fn transition(
        &self,
        id: Uuid,
        to: ResearchStatus,
        changes: ResearchSessionUpdate,
    ) -> PortResult<ResearchSession> {
        let current = self.repo.get(id).await?;
        let from = current.status;
        if !from.can_transition_to(to) {
            return Err(PortError::InvalidTransition { from, to });
        }

        let session = self.repo.update_if_status(id, from, changes).await?;
        info!(session_id = %id, %from, %to, "research session transitioned");
        Ok(session)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryResearchStore;

    fn lifecycle() -> ResearchLifecycle {
        ResearchLifecycle::new(Arc::new(InMemoryResearchStore::new()))
    }

    #[tokio::test]
    async fn happy_path_runs_to_completion() {
        let lc = lifecycle();
        let s = lc.submit(NewResearchSession::new(5, "quantum error correction")).await.unwrap();

        let running = lc.start(s.id, Some("trace-42".to_string())).await.unwrap();
        assert_eq!(running.status, ResearchStatus::Running);
        assert_eq!(running.trace_id.as_deref(), Some("trace-42"));

        let done = lc.complete(s.id, "surface codes dominate".to_string()).await.unwrap();
        assert_eq!(done.status, ResearchStatus::Completed);
        assert_eq!(done.final_report.as_deref(), Some("surface codes dominate"));
        assert_eq!(done.trace_id.as_deref(), Some("trace-42"));
    }

    #[tokio::test]
    async fn start_without_trace_keeps_existing_trace() {
        let lc = lifecycle();
        let s = lc
            .submit(NewResearchSession::new(1, "q").with_trace_id("from-submit"))
            .await
            .unwrap();
        let running = lc.start(s.id, None).await.unwrap();
        assert_eq!(running.trace_id.as_deref(), Some("from-submit"));
    }

    #[tokio::test]
    async fn terminal_states_do_not_move() {
        let lc = lifecycle();
        let s = lc.submit(NewResearchSession::new(1, "q")).await.unwrap();
        lc.start(s.id, None).await.unwrap();
        lc.complete(s.id, "report".to_string()).await.unwrap();

        let err = lc.start(s.id, None).await.unwrap_err();
        assert!(matches!(
            err,
            PortError::InvalidTransition {
                from: ResearchStatus::Completed,
                to: ResearchStatus::Running
            }
        ));
        assert!(matches!(
            lc.fail(s.id).await,
            Err(PortError::InvalidTransition { .. })
        ));
    }

    #[tokio::test]
    async fn cannot_complete_before_running() {
        let lc = lifecycle();
        let s = lc.submit(NewResearchSession::new(1, "q")).await.unwrap();
        let err = lc.complete(s.id, "report".to_string()).await.unwrap_err();
        assert!(matches!(err, PortError::InvalidTransition { .. }));
    }

    #[tokio::test]
    async fn pending_session_can_fail() {
        let lc = lifecycle();
        let s = lc.submit(NewResearchSession::new(1, "q")).await.unwrap();
        let failed = lc.fail(s.id).await.unwrap();
        assert_eq!(failed.status, ResearchStatus::Failed);
    }

    #[tokio::test]
    async fn blank_report_is_rejected() {
        let lc = lifecycle();
        let s = lc.submit(NewResearchSession::new(1, "q")).await.unwrap();
        lc.start(s.id, None).await.unwrap();
        let err = lc.complete(s.id, "  ".to_string()).await.unwrap_err();
        assert!(matches!(err, PortError::Validation(_)));
        let still = lc.repository().get(s.id).await.unwrap();
        assert_eq!(still.status, ResearchStatus::Running);
    }

    #[tokio::test]
    async fn follow_up_links_to_parent() {
        let lc = lifecycle();
        let parent = lc.submit(NewResearchSession::new(1, "q")).await.unwrap();
        lc.fail(parent.id).await.unwrap();

        let retry = lc.follow_up(parent.id, None, "q, again".to_string()).await.unwrap();
        assert_eq!(retry.parent_research, Some(parent.id));
        assert_eq!(retry.status, ResearchStatus::Pending);
        assert_eq!(retry.user_id, 1);

        let shared = lc
            .follow_up(parent.id, Some(9), "for a colleague".to_string())
            .await
            .unwrap();
        assert_eq!(shared.user_id, 9);

        let err = lc
            .follow_up(Uuid::new_v4(), Some(1), "orphan".to_string())
            .await
            .unwrap_err();
        assert!(matches!(err, PortError::NotFound(_)));
    }

    #[tokio::test]
    async fn unknown_session_is_not_found() {
        let lc = lifecycle();
        assert!(matches!(
            lc.start(Uuid::new_v4(), None).await,
            Err(PortError::NotFound(_))
        ));
    }
}
