//! Approval persistence
//!
//! The backing store provides the transaction boundary: every status
//! change goes through a compare-and-update keyed on the expected current
//! status, so concurrent deciders cannot double-fire a transition. The
//! in-process layer holds no cached approval state.

use async_trait::async_trait;
use dashmap::DashMap;

use ocmt_core::{ApprovalId, Error, OwnerId, Result};

use crate::model::{ApprovalRequest, ApprovalStatus};

/// Storage interface for approval requests
#[async_trait]
pub trait ApprovalStore: Send + Sync {
    /// Insert a new request
    async fn insert(&self, request: ApprovalRequest) -> Result<()>;

    /// Fetch by id
    async fn get(&self, id: ApprovalId) -> Result<Option<ApprovalRequest>>;

    /// Fetch by approval token
    async fn get_by_token(&self, token: &str) -> Result<Option<ApprovalRequest>>;

    /// Find a pending request with the same dedup key
    async fn find_pending(
        &self,
        owner: OwnerId,
        subject_public_key: &str,
        resource: &str,
    ) -> Result<Option<ApprovalRequest>>;

    /// Replace the row iff its status still equals `expected`. Returns
    /// whether the swap happened.
    async fn compare_and_update(
        &self,
        id: ApprovalId,
        expected: ApprovalStatus,
        updated: ApprovalRequest,
    ) -> Result<bool>;

    /// Ids of pending requests whose decision window lapsed before `now`
    async fn expired_pending(&self, now: i64) -> Result<Vec<ApprovalId>>;
}

/// In-memory store used by tests and the default runtime
#[derive(Default)]
pub struct InMemoryApprovalStore {
    rows: DashMap<ApprovalId, ApprovalRequest>,
    by_token: DashMap<String, ApprovalId>,
}

impl InMemoryApprovalStore {
    /// Empty store
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ApprovalStore for InMemoryApprovalStore {
    async fn insert(&self, request: ApprovalRequest) -> Result<()> {
        if self.rows.contains_key(&request.id) {
            return Err(Error::from_storage("duplicate approval id"));
        }
        self.by_token.insert(request.token.clone(), request.id);
        self.rows.insert(request.id, request);
        Ok(())
    }

    async fn get(&self, id: ApprovalId) -> Result<Option<ApprovalRequest>> {
        Ok(self.rows.get(&id).map(|row| row.clone()))
    }

    async fn get_by_token(&self, token: &str) -> Result<Option<ApprovalRequest>> {
        let Some(id) = self.by_token.get(token).map(|entry| *entry) else {
            return Ok(None);
        };
        self.get(id).await
    }

    async fn find_pending(
        &self,
        owner: OwnerId,
        subject_public_key: &str,
        resource: &str,
    ) -> Result<Option<ApprovalRequest>> {
        Ok(self
            .rows
            .iter()
            .find(|row| {
                row.status == ApprovalStatus::Pending
                    && row.owner == owner
                    && row.subject_public_key == subject_public_key
                    && row.resource == resource
            })
            .map(|row| row.clone()))
    }

    async fn compare_and_update(
        &self,
        id: ApprovalId,
        expected: ApprovalStatus,
        updated: ApprovalRequest,
    ) -> Result<bool> {
        // The entry guard holds the per-key lock for the whole swap.
        let Some(mut row) = self.rows.get_mut(&id) else {
            return Ok(false);
        };
        if row.status != expected {
            return Ok(false);
        }
        *row = updated;
        Ok(true)
    }

    async fn expired_pending(&self, now: i64) -> Result<Vec<ApprovalId>> {
        Ok(self
            .rows
            .iter()
            .filter(|row| row.status == ApprovalStatus::Pending && row.expires_at < now)
            .map(|row| row.id)
            .collect())
    }
}
