//! Approval records, constraints, and lifetime presets

use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};

use ocmt_core::{ApprovalId, OwnerId, PermissionSet};

/// How long a request waits for a decision before auto-expiring
pub const REQUEST_TTL_SECS: i64 = 24 * 60 * 60;

/// Lifecycle state of an approval request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApprovalStatus {
    /// Awaiting a decision
    Pending,
    /// Approved; capability not yet issued
    Approved,
    /// Denied by the owner
    Denied,
    /// The decision window lapsed
    Expired,
    /// The capability token has been emitted downstream
    Issued,
}

impl ApprovalStatus {
    /// Whether no further transition is permitted from this state
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ApprovalStatus::Denied | ApprovalStatus::Expired | ApprovalStatus::Issued
        )
    }
}

/// Constraints an approver may attach to tighten a request
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Constraints {
    /// Replacement lifetime; only honored when shorter than requested
    pub expires_in_seconds: Option<i64>,
    /// Replacement scope; intersected with the requested scope
    pub scope: Option<PermissionSet>,
    /// Replacement call budget; only honored when smaller
    pub max_calls: Option<u32>,
}

/// The final capability parameters after constraint reduction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppliedConstraints {
    /// Capability lifetime in seconds
    pub expires_in_seconds: i64,
    /// Granted permission set
    pub scope: PermissionSet,
    /// Call budget; `None` means unlimited
    pub max_calls: Option<u32>,
}

/// Input for a new capability request
#[derive(Debug, Clone)]
pub struct NewApproval {
    /// Owner who must decide
    pub owner: OwnerId,
    /// Public key identifying the requesting agent
    pub subject_public_key: String,
    /// Contact address of the requesting agent, if known
    pub subject_email: Option<String>,
    /// Label of the resource the capability targets
    pub resource: String,
    /// Requested permissions
    pub scope: PermissionSet,
    /// Requested capability lifetime in seconds
    pub expires_in_seconds: i64,
    /// Requested call budget; `None` means unlimited
    pub max_calls: Option<u32>,
    /// Free-form justification shown to the approver
    pub reason: Option<String>,
}

/// A capability approval request as stored
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApprovalRequest {
    /// Request identifier
    pub id: ApprovalId,
    /// Random 32-byte token the agent polls with
    pub token: String,
    /// Owner who must decide
    pub owner: OwnerId,
    /// Public key identifying the requesting agent
    pub subject_public_key: String,
    /// Contact address of the requesting agent, if known
    pub subject_email: Option<String>,
    /// Label of the resource the capability targets
    pub resource: String,
    /// Requested permissions
    pub scope: PermissionSet,
    /// Requested capability lifetime in seconds
    pub expires_in_seconds: i64,
    /// Requested call budget; `None` means unlimited
    pub max_calls: Option<u32>,
    /// Free-form justification shown to the approver
    pub reason: Option<String>,
    /// Permissions in the request that exceed the agent ceiling
    pub exceeds_ceiling: PermissionSet,
    /// Current lifecycle state
    pub status: ApprovalStatus,
    /// Unix seconds when the request was created
    pub created_at: i64,
    /// Unix seconds when an undecided request expires
    pub expires_at: i64,
    /// Unix seconds of the decision, if any
    pub decided_at: Option<i64>,
    /// Final capability parameters, set on approval
    pub applied: Option<AppliedConstraints>,
}

impl ApprovalRequest {
    /// Build a pending request from its input, stamping `created_at`.
    pub fn from_new(input: NewApproval, ceiling: &PermissionSet, now: i64) -> Self {
        let mut token = [0u8; 32];
        OsRng.fill_bytes(&mut token);
        let exceeds_ceiling = input.scope.exceeding(ceiling);
        Self {
            id: ApprovalId::new(),
            token: hex::encode(token),
            owner: input.owner,
            subject_public_key: input.subject_public_key,
            subject_email: input.subject_email,
            resource: input.resource,
            scope: input.scope,
            expires_in_seconds: input.expires_in_seconds,
            max_calls: input.max_calls,
            reason: input.reason,
            exceeds_ceiling,
            status: ApprovalStatus::Pending,
            created_at: now,
            expires_at: now + REQUEST_TTL_SECS,
            decided_at: None,
            applied: None,
        }
    }

    /// Reduce approver constraints against this request. The result never
    /// exceeds the request in any dimension.
    pub fn apply_constraints(&self, constraints: &Constraints) -> AppliedConstraints {
        let expires_in_seconds = constraints
            .expires_in_seconds
            .map_or(self.expires_in_seconds, |requested| {
                requested.min(self.expires_in_seconds)
            });
        let scope = constraints
            .scope
            .as_ref()
            .map_or_else(|| self.scope.clone(), |s| s.intersect(&self.scope));
        let max_calls = match (self.max_calls, constraints.max_calls) {
            (Some(original), Some(requested)) => Some(original.min(requested)),
            (Some(original), None) => Some(original),
            (None, requested) => requested,
        };
        AppliedConstraints {
            expires_in_seconds,
            scope,
            max_calls,
        }
    }
}

/// UI-level lifetime presets for requested capabilities
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifetimePreset {
    /// One hour
    OneHour,
    /// Four hours
    FourHours,
    /// One day
    OneDay,
    /// One week
    OneWeek,
    /// A custom number of hours
    Custom(u32),
}

impl LifetimePreset {
    /// Parse a preset label; anything unknown falls back to one hour.
    pub fn parse(label: &str, custom_hours: Option<u32>) -> Self {
        match label {
            "1h" => LifetimePreset::OneHour,
            "4h" => LifetimePreset::FourHours,
            "1d" => LifetimePreset::OneDay,
            "1w" => LifetimePreset::OneWeek,
            "custom" => LifetimePreset::Custom(custom_hours.unwrap_or(1)),
            _ => LifetimePreset::OneHour,
        }
    }

    /// Serialize to the seconds the state machine works in.
    pub fn to_seconds(self) -> i64 {
        match self {
            LifetimePreset::OneHour => 3600,
            LifetimePreset::FourHours => 4 * 3600,
            LifetimePreset::OneDay => 24 * 3600,
            LifetimePreset::OneWeek => 7 * 24 * 3600,
            LifetimePreset::Custom(hours) => i64::from(hours) * 3600,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ocmt_core::Permission;

    fn request(scope: PermissionSet, expires: i64, max_calls: Option<u32>) -> ApprovalRequest {
        ApprovalRequest::from_new(
            NewApproval {
                owner: OwnerId::new(),
                subject_public_key: "pk".into(),
                subject_email: None,
                resource: "github".into(),
                scope,
                expires_in_seconds: expires,
                max_calls,
                reason: None,
            },
            &PermissionSet::default_ceiling(),
            1_000,
        )
    }

    #[test]
    fn constraints_reduce_every_dimension() {
        let req = request(
            PermissionSet::from_iter([Permission::Read, Permission::List, Permission::Write]),
            86_400,
            None,
        );
        let applied = req.apply_constraints(&Constraints {
            expires_in_seconds: Some(172_800),
            scope: Some(PermissionSet::from_iter([
                Permission::Read,
                Permission::Write,
                Permission::Delete,
            ])),
            max_calls: Some(10),
        });
        assert_eq!(applied.expires_in_seconds, 86_400);
        assert_eq!(
            applied.scope,
            PermissionSet::from_iter([Permission::Read, Permission::Write])
        );
        assert_eq!(applied.max_calls, Some(10));
    }

    #[test]
    fn absent_constraints_keep_the_request() {
        let req = request(PermissionSet::default_ceiling(), 3_600, Some(5));
        let applied = req.apply_constraints(&Constraints::default());
        assert_eq!(applied.expires_in_seconds, 3_600);
        assert_eq!(applied.scope, req.scope);
        assert_eq!(applied.max_calls, Some(5));
    }

    #[test]
    fn null_max_calls_means_unlimited_until_constrained() {
        let req = request(PermissionSet::default_ceiling(), 3_600, None);
        assert_eq!(
            req.apply_constraints(&Constraints::default()).max_calls,
            None
        );
        assert_eq!(
            req.apply_constraints(&Constraints {
                max_calls: Some(3),
                ..Constraints::default()
            })
            .max_calls,
            Some(3)
        );
    }

    #[test]
    fn ceiling_excess_is_recorded_on_the_request() {
        let req = request(
            PermissionSet::from_iter([Permission::Read, Permission::Admin]),
            3_600,
            None,
        );
        assert_eq!(
            req.exceeds_ceiling,
            PermissionSet::from_iter([Permission::Admin])
        );
    }

    #[test]
    fn unknown_presets_default_to_one_hour() {
        assert_eq!(LifetimePreset::parse("1w", None).to_seconds(), 604_800);
        assert_eq!(LifetimePreset::parse("forever", None).to_seconds(), 3_600);
        assert_eq!(
            LifetimePreset::parse("custom", Some(6)).to_seconds(),
            6 * 3_600
        );
    }

    #[test]
    fn terminal_states_are_exactly_three() {
        assert!(!ApprovalStatus::Pending.is_terminal());
        assert!(!ApprovalStatus::Approved.is_terminal());
        assert!(ApprovalStatus::Denied.is_terminal());
        assert!(ApprovalStatus::Expired.is_terminal());
        assert!(ApprovalStatus::Issued.is_terminal());
    }
}
