//! Resources and grants

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use ocmt_core::{OwnerId, PermissionSet, ResourceId};

/// Lifecycle state of a resource definition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceStatus {
    /// Invocable
    Active,
    /// Present but not invocable
    Disabled,
}

/// An external endpoint agents can be granted access to
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Resource {
    /// Resource identifier
    pub id: ResourceId,
    /// Owner the resource belongs to
    pub owner: OwnerId,
    /// Human label (`github`, `internal-crm`, …)
    pub label: String,
    /// Base URL every call path is joined onto
    pub base_endpoint: String,
    /// Lifecycle state
    pub status: ResourceStatus,
    /// Versioned ciphertext of the JSON [`crate::AuthConfig`], if any
    pub auth_ciphertext: Option<String>,
}

/// Whether a grant is merely recorded or opted into invocation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GrantStatus {
    /// Permissions recorded; invocation not yet opted into
    Granted,
    /// The owner has connected the resource for invocation
    Connected,
}

/// An owner's permissions on one resource
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceGrant {
    /// Grant holder
    pub owner: OwnerId,
    /// Target resource
    pub resource: ResourceId,
    /// Permissions held
    pub permissions: PermissionSet,
    /// Grant state
    pub status: GrantStatus,
}

/// Resource lookup
#[async_trait]
pub trait ResourceStore: Send + Sync {
    /// Fetch a resource definition
    async fn get(&self, id: ResourceId) -> Option<Resource>;
}

/// Grant lookup
#[async_trait]
pub trait GrantStore: Send + Sync {
    /// Fetch the owner's grant on a resource
    async fn grant_for(&self, owner: OwnerId, resource: ResourceId) -> Option<ResourceGrant>;
}
