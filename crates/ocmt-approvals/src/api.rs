//! Wire DTOs for the approval-decision endpoints
//!
//! `POST /approvals/{id}/approve` and `/approve-with-constraints` consume
//! [`DecisionBody`]; the response always carries the final applied values
//! so clients never have to re-derive the reductions.

use serde::{Deserialize, Serialize};

use ocmt_core::{ApprovalId, PermissionSet};

use crate::model::{AppliedConstraints, ApprovalRequest, ApprovalStatus, Constraints};

/// Body of an approve-with-constraints call; all fields optional
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DecisionBody {
    /// Tightened lifetime in seconds
    pub expires_in_seconds: Option<i64>,
    /// Tightened scope
    pub scope: Option<PermissionSet>,
    /// Tightened call budget
    pub max_calls: Option<u32>,
}

impl From<DecisionBody> for Constraints {
    fn from(body: DecisionBody) -> Self {
        Constraints {
            expires_in_seconds: body.expires_in_seconds,
            scope: body.scope,
            max_calls: body.max_calls,
        }
    }
}

/// Response to any decision endpoint
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DecisionResponse {
    /// Approval id
    pub id: ApprovalId,
    /// Post-decision status
    pub status: ApprovalStatus,
    /// Final applied capability parameters, when approved
    #[serde(skip_serializing_if = "Option::is_none")]
    pub applied: Option<AppliedConstraints>,
}

impl From<&ApprovalRequest> for DecisionResponse {
    fn from(request: &ApprovalRequest) -> Self {
        Self {
            id: request.id,
            status: request.status,
            applied: request.applied.clone(),
        }
    }
}
