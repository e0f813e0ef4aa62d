//! # OCMT Approvals
//!
//! Agent-requested, user-approved capability issuance. An agent asks for a
//! scoped capability against a resource; the owner approves, denies, or
//! approves with tightening constraints; the platform then issues the
//! capability and records it here as `issued`. Decisions can only ever
//! shrink a request (scope intersects, lifetimes and call budgets take
//! the minimum) and the default agent ceiling refuses anything beyond
//! read-only access outright.
//!
//! ```text
//! pending ──► approved ──► issued
//!    │  └────► denied
//!    └────────► expired
//! ```
//!
//! Terminal states are sticky; the store enforces transitions with a
//! conditional update so they are linearizable per approval id.

#![forbid(unsafe_code)]

pub mod api;
pub mod model;
pub mod service;
pub mod store;

pub use api::{DecisionBody, DecisionResponse};
pub use model::{
    AppliedConstraints, ApprovalRequest, ApprovalStatus, Constraints, LifetimePreset, NewApproval,
    REQUEST_TTL_SECS,
};
pub use service::ApprovalService;
pub use store::{ApprovalStore, InMemoryApprovalStore};
