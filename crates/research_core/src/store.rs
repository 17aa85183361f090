//! crates/research_core/src/store.rs
//!
//! An in-process implementation of `ResearchSessionRepository`, used by tests and
//! by the API when no database is configured.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::debug;
use uuid::Uuid;

use crate::domain::{
    NewResearchSession, ResearchSession, ResearchSessionUpdate, ResearchStatus, SessionFilter,
    ValidationError,
};
use crate::ports::{PortError, PortResult, ResearchSessionRepository};

#[derive(Default)]
struct StoreState {
    sessions: HashMap<Uuid, ResearchSession>,
    last_created_at: Option<DateTime<Utc>>,
}

/// Holds every session in a single map behind a `RwLock`.
#[derive(Default)]
pub struct InMemoryResearchStore {
    state: RwLock<StoreState>,
}

/// Current time, nudged forward so it is strictly after `previous`.
fn strictly_after(previous: Option<DateTime<Utc>>) -> DateTime<Utc> {
    let now = Utc::now();
    match previous {
        Some(prev) if now <= prev => prev + Duration::microseconds(1),
        _ => now,
    }
}

impl InMemoryResearchStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> PortResult<RwLockReadGuard<'_, StoreState>> {
        self.state
            .read()
            .map_err(|_| PortError::Unexpected("research store lock poisoned".to_string()))
    }

    fn write(&self) -> PortResult<RwLockWriteGuard<'_, StoreState>> {
        self.state
            .write()
            .map_err(|_| PortError::Unexpected("research store lock poisoned".to_string()))
    }

    /// Rejects `parent` if it is missing or if `id` is already among its ancestors.
    fn check_parent_chain(state: &StoreState, id: Uuid, parent: Uuid) -> PortResult<()> {
        if !state.sessions.contains_key(&parent) {
            return Err(ValidationError::UnknownParent(parent).into());
        }
        let mut seen = HashSet::new();
        let mut cursor = Some(parent);
        while let Some(current) = cursor {
            if current == id {
                return Err(ValidationError::ParentCycle(parent).into());
            }
            if !seen.insert(current) {
                break;
            }
            cursor = state.sessions.get(&current).and_then(|s| s.parent_research);
        }
        Ok(())
    }

    fn apply_locked(
        state: &mut StoreState,
        id: Uuid,
        expected: Option<ResearchStatus>,
        changes: ResearchSessionUpdate,
    ) -> PortResult<ResearchSession> {
        changes.validate_for(id)?;
        if !state.sessions.contains_key(&id) {
            return Err(PortError::session_not_found(id));
        }
        if let Some(Some(parent)) = changes.parent_research {
            Self::check_parent_chain(state, id, parent)?;
        }

        let session = state
            .sessions
            .get_mut(&id)
            .ok_or_else(|| PortError::session_not_found(id))?;
        if let Some(expected) = expected {
            if session.status != expected {
                return Err(PortError::Conflict(format!(
                    "ResearchSession {} is {}, expected {}",
                    id, session.status, expected
                )));
            }
        }

        session.apply(changes);
        session.updated_at = strictly_after(Some(session.updated_at));
        debug!(session_id = %id, status = %session.status, "research session updated");
        Ok(session.clone())
    }
}

#[async_trait]
impl ResearchSessionRepository for InMemoryResearchStore {
    async fn create(&self, new: NewResearchSession) -> PortResult<ResearchSession> {
        new.validate()?;
        let mut state = self.write()?;
        if let Some(parent) = new.parent_research {
            if !state.sessions.contains_key(&parent) {
                return Err(ValidationError::UnknownParent(parent).into());
            }
        }

        let now = strictly_after(state.last_created_at);
        state.last_created_at = Some(now);
        let session = ResearchSession::from_new(new, now);
        debug!(session_id = %session.id, user_id = session.user_id, "research session created");
        state.sessions.insert(session.id, session.clone());
        Ok(session)
    }

    async fn get(&self, id: Uuid) -> PortResult<ResearchSession> {
        self.read()?
            .sessions
            .get(&id)
            .cloned()
            .ok_or_else(|| PortError::session_not_found(id))
    }

    async fn list(&self, filter: &SessionFilter) -> PortResult<Vec<ResearchSession>> {
        let state = self.read()?;
        let mut sessions: Vec<ResearchSession> = state
            .sessions
            .values()
            .filter(|s| filter.matches(s))
            .cloned()
            .collect();
        sessions.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));

        let offset = filter.offset.unwrap_or(0) as usize;
        let limit = filter.limit.map_or(usize::MAX, |l| l as usize);
        Ok(sessions.into_iter().skip(offset).take(limit).collect())
    }

    async fn update(
        &self,
        id: Uuid,
        changes: ResearchSessionUpdate,
    ) -> PortResult<ResearchSession> {
        let mut state = self.write()?;
        Self::apply_locked(&mut state, id, None, changes)
    }

    async fn update_if_status(
        &self,
        id: Uuid,
        expected: ResearchStatus,
        changes: ResearchSessionUpdate,
    ) -> PortResult<ResearchSession> {
        let mut state = self.write()?;
        Self::apply_locked(&mut state, id, Some(expected), changes)
    }

    async fn delete(&self, id: Uuid) -> PortResult<()> {
        let mut state = self.write()?;
        if state.sessions.remove(&id).is_none() {
            return Err(PortError::session_not_found(id));
        }

        // Children outlive their parent; only the back-reference goes.
        let mut orphaned = 0usize;
        for child in state
            .sessions
            .values_mut()
            .filter(|s| s.parent_research == Some(id))
        {
            child.parent_research = None;
            child.updated_at = strictly_after(Some(child.updated_at));
            orphaned += 1;
        }
        debug!(session_id = %id, orphaned, "research session deleted");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn create_defaults_to_pending_with_fresh_id() {
        let store = InMemoryResearchStore::new();
        let a = store.create(NewResearchSession::new(1, "what is rust?")).await.unwrap();
        let b = store.create(NewResearchSession::new(1, "what is rust?")).await.unwrap();

        assert_eq!(a.status, ResearchStatus::Pending);
        assert_eq!(a.final_report, None);
        assert_eq!(a.parent_research, None);
        assert_ne!(a.id, b.id);
        assert_eq!(store.get(a.id).await.unwrap(), a);
    }

    #[tokio::test]
    async fn create_rejects_blank_query_and_unknown_parent() {
        let store = InMemoryResearchStore::new();
        let err = store.create(NewResearchSession::new(1, "")).await.unwrap_err();
        assert!(matches!(err, PortError::Validation(_)));

        let err = store
            .create(NewResearchSession::new(1, "q").with_parent(Uuid::new_v4()))
            .await
            .unwrap_err();
        assert!(matches!(err, PortError::Validation(_)));
    }

    #[tokio::test]
    async fn get_unknown_id_is_not_found() {
        let store = InMemoryResearchStore::new();
        let err = store.get(Uuid::new_v4()).await.unwrap_err();
        assert!(matches!(err, PortError::NotFound(_)));
    }

    #[tokio::test]
    async fn list_is_newest_first() {
        let store = InMemoryResearchStore::new();
        let first = store.create(NewResearchSession::new(1, "one")).await.unwrap();
        let second = store.create(NewResearchSession::new(1, "two")).await.unwrap();
        let third = store.create(NewResearchSession::new(1, "three")).await.unwrap();

        let listed = store.list(&SessionFilter::default()).await.unwrap();
        let ids: Vec<Uuid> = listed.iter().map(|s| s.id).collect();
        assert_eq!(ids, vec![third.id, second.id, first.id]);
        assert!(listed.windows(2).all(|w| w[0].created_at > w[1].created_at));
    }

    #[tokio::test]
    async fn list_filters_and_pages() {
        let store = InMemoryResearchStore::new();
        let parent = store.create(NewResearchSession::new(1, "root")).await.unwrap();
        let child = store
            .create(NewResearchSession::new(2, "child").with_parent(parent.id))
            .await
            .unwrap();
        store
            .update(child.id, ResearchSessionUpdate::status(ResearchStatus::Running))
            .await
            .unwrap();
        store.create(NewResearchSession::new(2, "other")).await.unwrap();

        assert_eq!(store.list(&SessionFilter::by_user(2)).await.unwrap().len(), 2);
        let children = store.list(&SessionFilter::children_of(parent.id)).await.unwrap();
        assert_eq!(children.len(), 1);
        assert_eq!(children[0].id, child.id);

        let running = SessionFilter {
            status: Some(ResearchStatus::Running),
            ..Default::default()
        };
        assert_eq!(store.list(&running).await.unwrap()[0].id, child.id);

        let page = SessionFilter {
            limit: Some(1),
            offset: Some(1),
            ..Default::default()
        };
        let paged = store.list(&page).await.unwrap();
        assert_eq!(paged.len(), 1);
        assert_eq!(paged[0].id, child.id);
    }

    #[tokio::test]
    async fn update_round_trips_and_advances_updated_at() {
        let store = InMemoryResearchStore::new();
        let created = store.create(NewResearchSession::new(1, "q")).await.unwrap();
        let before = store.get(created.id).await.unwrap();

        store
            .update(
                created.id,
                ResearchSessionUpdate::status(ResearchStatus::Completed)
                    .with_final_report("findings"),
            )
            .await
            .unwrap();
        let after = store.get(created.id).await.unwrap();

        assert_eq!(after.status, ResearchStatus::Completed);
        assert_eq!(after.final_report.as_deref(), Some("findings"));
        assert!(after.updated_at > before.updated_at);
        assert_eq!(after.created_at, before.created_at);
    }

    #[tokio::test]
    async fn update_is_permissive_about_transitions() {
        let store = InMemoryResearchStore::new();
        let s = store.create(NewResearchSession::new(1, "q")).await.unwrap();
        store
            .update(s.id, ResearchSessionUpdate::status(ResearchStatus::Completed))
            .await
            .unwrap();
        let back = store
            .update(s.id, ResearchSessionUpdate::status(ResearchStatus::Pending))
            .await
            .unwrap();
        assert_eq!(back.status, ResearchStatus::Pending);
    }

    #[tokio::test]
    async fn update_rejects_self_parent() {
        let store = InMemoryResearchStore::new();
        let s = store.create(NewResearchSession::new(1, "q")).await.unwrap();
        let err = store
            .update(s.id, ResearchSessionUpdate::default().with_parent(Some(s.id)))
            .await
            .unwrap_err();
        assert!(matches!(err, PortError::Validation(_)));
    }

    #[tokio::test]
    async fn update_rejects_parent_cycles() {
        let store = InMemoryResearchStore::new();
        let a = store.create(NewResearchSession::new(1, "a")).await.unwrap();
        let b = store
            .create(NewResearchSession::new(1, "b").with_parent(a.id))
            .await
            .unwrap();
        let c = store
            .create(NewResearchSession::new(1, "c").with_parent(b.id))
            .await
            .unwrap();

        for parent in [b.id, c.id] {
            let err = store
                .update(a.id, ResearchSessionUpdate::default().with_parent(Some(parent)))
                .await
                .unwrap_err();
            assert!(matches!(err, PortError::Validation(_)));
        }
        assert_eq!(store.get(a.id).await.unwrap().parent_research, None);

        // Re-parenting within the same tree without closing a loop is fine.
        let moved = store
            .update(c.id, ResearchSessionUpdate::default().with_parent(Some(a.id)))
            .await
            .unwrap();
        assert_eq!(moved.parent_research, Some(a.id));
    }

    #[tokio::test]
    async fn update_of_missing_session_is_not_found_before_parent_checks() {
        let store = InMemoryResearchStore::new();
        let err = store
            .update(
                Uuid::new_v4(),
                ResearchSessionUpdate::default().with_parent(Some(Uuid::new_v4())),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, PortError::NotFound(_)));
    }

    #[tokio::test]
    async fn update_if_status_detects_stale_expectation() {
        let store = InMemoryResearchStore::new();
        let s = store.create(NewResearchSession::new(1, "q")).await.unwrap();
        let err = store
            .update_if_status(
                s.id,
                ResearchStatus::Running,
                ResearchSessionUpdate::status(ResearchStatus::Completed),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, PortError::Conflict(_)));
        assert_eq!(store.get(s.id).await.unwrap().status, ResearchStatus::Pending);
    }

    #[tokio::test]
    async fn deleting_parent_clears_children_but_keeps_them() {
        let store = InMemoryResearchStore::new();
        let parent = store.create(NewResearchSession::new(1, "root")).await.unwrap();
        let a = store
            .create(NewResearchSession::new(1, "a").with_parent(parent.id))
            .await
            .unwrap();
        let b = store
            .create(NewResearchSession::new(1, "b").with_parent(parent.id))
            .await
            .unwrap();

        store.delete(parent.id).await.unwrap();

        assert!(matches!(store.get(parent.id).await, Err(PortError::NotFound(_))));
        for id in [a.id, b.id] {
            let child = store.get(id).await.unwrap();
            assert_eq!(child.parent_research, None);
        }
        assert!(matches!(store.delete(parent.id).await, Err(PortError::NotFound(_))));
    }
}
