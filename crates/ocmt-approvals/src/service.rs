//! The approval state machine
//!
//! All transitions run through [`ApprovalStore::compare_and_update`], so a
//! decision that races another decider loses cleanly with a conflict.
//! Terminal states never move again.

use std::sync::Arc;

use ocmt_core::{ApprovalId, Clock, Error, PermissionSet, Result};

use crate::model::{
    AppliedConstraints, ApprovalRequest, ApprovalStatus, Constraints, NewApproval,
};
use crate::store::ApprovalStore;

/// Coordinates capability approval requests and decisions
pub struct ApprovalService {
    store: Arc<dyn ApprovalStore>,
    clock: Clock,
    ceiling: PermissionSet,
}

impl ApprovalService {
    /// Service with the default agent ceiling (read-only)
    pub fn new(store: Arc<dyn ApprovalStore>, clock: Clock) -> Self {
        Self::with_ceiling(store, clock, PermissionSet::default_ceiling())
    }

    /// Service with an explicit agent ceiling
    pub fn with_ceiling(store: Arc<dyn ApprovalStore>, clock: Clock, ceiling: PermissionSet) -> Self {
        Self {
            store,
            clock,
            ceiling,
        }
    }

    /// Create a request, or return the existing pending one for the same
    /// `(owner, subject, resource)` dedup key.
    pub async fn request(&self, input: NewApproval) -> Result<ApprovalRequest> {
        if input.scope.is_empty() {
            return Err(Error::validation("requested scope is empty"));
        }
        if input.expires_in_seconds <= 0 {
            return Err(Error::validation("requested lifetime must be positive"));
        }

        if let Some(existing) = self
            .store
            .find_pending(input.owner, &input.subject_public_key, &input.resource)
            .await?
        {
            tracing::debug!(approval = %existing.id, "deduplicated pending approval request");
            return Ok(existing);
        }

        let request = ApprovalRequest::from_new(input, &self.ceiling, self.clock.now_secs());
        if !request.exceeds_ceiling.is_empty() {
            tracing::info!(
                approval = %request.id,
                exceeding = %request.exceeds_ceiling,
                "capability request exceeds the agent ceiling"
            );
        }
        self.store.insert(request.clone()).await?;
        Ok(request)
    }

    /// Fetch a request by its approval token. A miss is indistinguishable
    /// from any other authentication failure.
    pub async fn get_by_token(&self, token: &str) -> Result<ApprovalRequest> {
        self.store
            .get_by_token(token)
            .await?
            .ok_or_else(Error::auth_invalid)
    }

    /// Approve as requested. Refused when the request reaches beyond the
    /// agent ceiling; such requests need an explicit tightening decision.
    pub async fn approve(&self, id: ApprovalId) -> Result<ApprovalRequest> {
        self.decide(id, Constraints::default()).await
    }

    /// Approve with tightening constraints applied.
    pub async fn approve_with_constraints(
        &self,
        id: ApprovalId,
        constraints: Constraints,
    ) -> Result<ApprovalRequest> {
        self.decide(id, constraints).await
    }

    /// Deny a pending request.
    pub async fn deny(&self, id: ApprovalId) -> Result<ApprovalRequest> {
        let request = self.get_pending(id).await?;
        let mut updated = request;
        updated.status = ApprovalStatus::Denied;
        updated.decided_at = Some(self.clock.now_secs());
        self.commit(id, ApprovalStatus::Pending, updated).await
    }

    /// Record that the capability token was emitted downstream. Only legal
    /// from `approved`.
    pub async fn mark_issued(&self, id: ApprovalId) -> Result<ApprovalRequest> {
        let request = self
            .store
            .get(id)
            .await?
            .ok_or_else(|| Error::not_found("approval not found"))?;
        if request.status != ApprovalStatus::Approved {
            return Err(Error::conflict(format!(
                "cannot issue from status {:?}",
                request.status
            )));
        }
        let mut updated = request;
        updated.status = ApprovalStatus::Issued;
        self.commit(id, ApprovalStatus::Approved, updated).await
    }

    /// Move lapsed pending requests to `expired`; returns how many moved.
    pub async fn expire_pending(&self) -> Result<usize> {
        let now = self.clock.now_secs();
        let mut expired = 0;
        for id in self.store.expired_pending(now).await? {
            let Some(request) = self.store.get(id).await? else {
                continue;
            };
            if request.status != ApprovalStatus::Pending {
                continue;
            }
            let mut updated = request;
            updated.status = ApprovalStatus::Expired;
            if self
                .store
                .compare_and_update(id, ApprovalStatus::Pending, updated)
                .await?
            {
                expired += 1;
            }
        }
        if expired > 0 {
            tracing::info!(count = expired, "expired undecided approval requests");
        }
        Ok(expired)
    }

    async fn decide(&self, id: ApprovalId, constraints: Constraints) -> Result<ApprovalRequest> {
        let request = self.get_pending(id).await?;
        let applied = request.apply_constraints(&constraints);
        self.enforce_ceiling(&applied)?;

        let mut updated = request;
        updated.status = ApprovalStatus::Approved;
        updated.decided_at = Some(self.clock.now_secs());
        updated.applied = Some(applied);
        self.commit(id, ApprovalStatus::Pending, updated).await
    }

    /// There is no ceiling-override policy in this platform; a decision
    /// that would grant an out-of-ceiling permission is always refused.
    fn enforce_ceiling(&self, applied: &AppliedConstraints) -> Result<()> {
        let exceeding = applied.scope.exceeding(&self.ceiling);
        if exceeding.is_empty() {
            return Ok(());
        }
        Err(Error::forbidden(format!(
            "scope {exceeding} exceeds the agent ceiling"
        )))
    }

    async fn get_pending(&self, id: ApprovalId) -> Result<ApprovalRequest> {
        let request = self
            .store
            .get(id)
            .await?
            .ok_or_else(|| Error::not_found("approval not found"))?;
        match request.status {
            ApprovalStatus::Pending => Ok(request),
            status => Err(Error::conflict(format!(
                "approval already decided: {status:?}"
            ))),
        }
    }

    async fn commit(
        &self,
        id: ApprovalId,
        expected: ApprovalStatus,
        updated: ApprovalRequest,
    ) -> Result<ApprovalRequest> {
        if self
            .store
            .compare_and_update(id, expected, updated.clone())
            .await?
        {
            Ok(updated)
        } else {
            Err(Error::conflict("approval changed concurrently"))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::REQUEST_TTL_SECS;
    use crate::store::InMemoryApprovalStore;
    use assert_matches::assert_matches;
    use ocmt_core::{ErrorKind, OwnerId, Permission};

    const NOW_MS: i64 = 1_700_000_000_000;

    fn harness() -> (ApprovalService, ocmt_core::clock::ManualClock) {
        let (clock, handle) = Clock::manual(NOW_MS);
        let service = ApprovalService::new(Arc::new(InMemoryApprovalStore::new()), clock);
        (service, handle)
    }

    fn read_request(owner: OwnerId) -> NewApproval {
        NewApproval {
            owner,
            subject_public_key: "agent-pk-1".into(),
            subject_email: Some("agent@example.com".into()),
            resource: "github".into(),
            scope: PermissionSet::from_iter([Permission::Read, Permission::List]),
            expires_in_seconds: 86_400,
            max_calls: None,
            reason: Some("sync issues".into()),
        }
    }

    #[tokio::test]
    async fn duplicate_pending_requests_are_deduplicated() {
        let (service, _) = harness();
        let owner = OwnerId::new();
        let first = service.request(read_request(owner)).await.unwrap();
        let second = service.request(read_request(owner)).await.unwrap();
        assert_eq!(first.id, second.id);

        // A different resource is a different dedup key.
        let mut other = read_request(owner);
        other.resource = "gitlab".into();
        let third = service.request(other).await.unwrap();
        assert_ne!(first.id, third.id);
    }

    #[tokio::test]
    async fn approve_then_issue() {
        let (service, _) = harness();
        let request = service.request(read_request(OwnerId::new())).await.unwrap();
        let approved = service.approve(request.id).await.unwrap();
        assert_eq!(approved.status, ApprovalStatus::Approved);
        assert!(approved.decided_at.is_some());
        let applied = approved.applied.unwrap();
        assert_eq!(applied.expires_in_seconds, 86_400);
        assert_eq!(applied.scope, request.scope);

        let issued = service.mark_issued(request.id).await.unwrap();
        assert_eq!(issued.status, ApprovalStatus::Issued);
    }

    #[tokio::test]
    async fn terminal_states_are_sticky() {
        let (service, _) = harness();
        let request = service.request(read_request(OwnerId::new())).await.unwrap();
        service.deny(request.id).await.unwrap();

        assert_matches!(
            service.approve(request.id).await.unwrap_err().kind,
            ErrorKind::Conflict
        );
        assert_matches!(
            service.deny(request.id).await.unwrap_err().kind,
            ErrorKind::Conflict
        );
        assert_matches!(
            service.mark_issued(request.id).await.unwrap_err().kind,
            ErrorKind::Conflict
        );
    }

    #[tokio::test]
    async fn issue_requires_prior_approval() {
        let (service, _) = harness();
        let request = service.request(read_request(OwnerId::new())).await.unwrap();
        assert_matches!(
            service.mark_issued(request.id).await.unwrap_err().kind,
            ErrorKind::Conflict
        );
    }

    #[tokio::test]
    async fn constraints_can_only_shrink() {
        let (service, _) = harness();
        let mut input = read_request(OwnerId::new());
        input.scope =
            PermissionSet::from_iter([Permission::Read, Permission::List, Permission::Write]);
        let request = service.request(input).await.unwrap();

        // Requests that reach beyond the ceiling exist, but write is out of
        // the read-only default ceiling: plain approve refuses.
        assert_matches!(
            service.approve(request.id).await.unwrap_err().kind,
            ErrorKind::Forbidden
        );

        let approved = service
            .approve_with_constraints(
                request.id,
                Constraints {
                    expires_in_seconds: Some(172_800),
                    scope: Some(PermissionSet::from_iter([Permission::Read])),
                    max_calls: Some(10),
                },
            )
            .await
            .unwrap();
        let applied = approved.applied.unwrap();
        assert_eq!(applied.expires_in_seconds, 86_400);
        assert_eq!(applied.scope, PermissionSet::from_iter([Permission::Read]));
        assert_eq!(applied.max_calls, Some(10));
    }

    #[tokio::test]
    async fn out_of_ceiling_scope_cannot_be_approved_even_with_constraints() {
        let (service, _) = harness();
        let mut input = read_request(OwnerId::new());
        input.scope = PermissionSet::from_iter([Permission::Read, Permission::Admin]);
        let request = service.request(input).await.unwrap();
        assert_eq!(
            request.exceeds_ceiling,
            PermissionSet::from_iter([Permission::Admin])
        );

        let err = service
            .approve_with_constraints(
                request.id,
                Constraints {
                    scope: Some(PermissionSet::from_iter([Permission::Admin])),
                    ..Constraints::default()
                },
            )
            .await
            .unwrap_err();
        assert_matches!(err.kind, ErrorKind::Forbidden);

        // Narrowing into the ceiling is fine.
        let approved = service
            .approve_with_constraints(
                request.id,
                Constraints {
                    scope: Some(PermissionSet::from_iter([Permission::Read])),
                    ..Constraints::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(approved.status, ApprovalStatus::Approved);
    }

    #[tokio::test]
    async fn pending_requests_expire_after_their_window() {
        let (service, time) = harness();
        let request = service.request(read_request(OwnerId::new())).await.unwrap();

        assert_eq!(service.expire_pending().await.unwrap(), 0);
        time.advance_secs(REQUEST_TTL_SECS + 1);
        assert_eq!(service.expire_pending().await.unwrap(), 1);

        assert_matches!(
            service.approve(request.id).await.unwrap_err().kind,
            ErrorKind::Conflict
        );

        // Once expired, a fresh request is a new row.
        let again = service.request(read_request(request.owner)).await.unwrap();
        assert_ne!(again.id, request.id);
    }

    #[tokio::test]
    async fn token_lookup_miss_is_an_opaque_auth_failure() {
        let (service, _) = harness();
        let request = service.request(read_request(OwnerId::new())).await.unwrap();
        assert_eq!(
            service.get_by_token(&request.token).await.unwrap().id,
            request.id
        );
        let err = service.get_by_token("no-such-token").await.unwrap_err();
        assert_matches!(err.kind, ErrorKind::AuthInvalid);
        assert_eq!(err.message, "authentication failed");
    }
}
