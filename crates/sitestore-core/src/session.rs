//! Caller context that flows through every operation.
//!
//! A session is built once from the authenticated caller and fixes both the
//! tenant every key is scoped to and the user recorded in provenance stamps.
//! Operations never accept a tenant id as free-form input.

use crate::error::{Result, ValidationError};
use crate::keyspace::{KeySpace, TenantId};

/// Authenticated caller: tenant plus acting user.
#[derive(Debug, Clone)]
pub struct Session {
    tenant: TenantId,
    user: String,
    keys: KeySpace,
}

impl Session {
    /// Create a session for `user` acting within `tenant`.
    pub fn new(tenant: impl Into<String>, user: impl Into<String>) -> Result<Self> {
        let tenant = TenantId::new(tenant)?;
        let user = user.into();
        if user.trim().is_empty() {
            return Err(ValidationError::InvalidName {
                name: user,
                reason: "user id cannot be empty",
            }
            .into());
        }

        let keys = KeySpace::new(&tenant);
        Ok(Self { tenant, user, keys })
    }

    /// Tenant the session is scoped to.
    pub fn tenant(&self) -> &TenantId {
        &self.tenant
    }

    /// Acting user id, stamped into `createdBy` / `updatedBy`.
    pub fn user(&self) -> &str {
        &self.user
    }

    /// Key builder for the session's tenant.
    pub fn keys(&self) -> &KeySpace {
        &self.keys
    }
}
