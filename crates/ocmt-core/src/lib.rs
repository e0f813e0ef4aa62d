//! # OCMT Core - Foundation
//!
//! Single source of truth for the domain vocabulary shared by every
//! control-plane subsystem: identifiers, the flat error taxonomy, the
//! permission lattice, alert severities, tenant plans, and the injectable
//! clock used to keep time-dependent services testable.
//!
//! This crate has zero dependencies on other OCMT crates.

#![forbid(unsafe_code)]

pub mod clock;
pub mod errors;
pub mod identifiers;
pub mod permissions;
pub mod plan;
pub mod severity;

pub use clock::{Clock, ManualClock};
pub use errors::{Error, ErrorKind, Result};
pub use identifiers::{ApprovalId, GroupId, OwnerId, ResourceId, RuleId, SandboxId, TenantId};
pub use permissions::{Permission, PermissionSet};
pub use plan::Plan;
pub use severity::Severity;
