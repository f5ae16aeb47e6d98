//! Application Identity Module
//!
//! Provides the immutable addressing 5-tuple used to name every workspace
//! in the repository:
//! - Tenant and application naming
//! - Dotted-numeric version with SNAPSHOT/RELEASE status
//! - Branch labels with the reserved `HEAD` mainline
//! - Derivation helpers for navigating between related workspaces
//! - Cache key generation (full and branch-agnostic)

use serde::{Deserialize, Serialize};
use std::fmt;
use std::hash::{Hash, Hasher};
use thiserror::Error;

/// Reserved branch name for the shared mainline.
pub const HEAD: &str = "HEAD";

/// Reserved version for system-configuration cubes.
pub const SYS_VERSION: &str = "0.0.0";

// ============================================================================
// Error Types
// ============================================================================

/// Errors raised while constructing or deriving an [`ApplicationId`].
#[derive(Error, Debug)]
pub enum AppIdError {
    #[error("Tenant cannot be empty")]
    EmptyTenant,

    #[error("Application name cannot be empty")]
    EmptyApp,

    #[error("Branch cannot be empty")]
    EmptyBranch,

    #[error("Invalid version '{0}': expected dotted-numeric form like 1.0.0")]
    InvalidVersion(String),

    #[error("Invalid release status: {0}")]
    InvalidStatus(String),
}

// ============================================================================
// Core Types
// ============================================================================

/// Mutability status of a version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReleaseStatus {
    /// Mutable working version
    Snapshot,

    /// Frozen, released version
    Release,
}

impl ReleaseStatus {
    /// Parse from the persisted string form.
    pub fn parse(s: &str) -> Result<Self, AppIdError> {
        match s.to_ascii_uppercase().as_str() {
            "SNAPSHOT" => Ok(ReleaseStatus::Snapshot),
            "RELEASE" => Ok(ReleaseStatus::Release),
            other => Err(AppIdError::InvalidStatus(other.to_string())),
        }
    }

    /// Persisted string form.
    pub fn as_str(&self) -> &'static str {
        match self {
            ReleaseStatus::Snapshot => "SNAPSHOT",
            ReleaseStatus::Release => "RELEASE",
        }
    }
}

impl fmt::Display for ReleaseStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The immutable `(tenant, app, version, status, branch)` tuple naming a
/// workspace.
///
/// Two ids are equal when all five fields match, case-insensitively on the
/// string parts. The hash follows the same rule, so ids are safe to use as
/// map keys regardless of the casing callers supply.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApplicationId {
    tenant: String,
    app: String,
    version: String,
    status: ReleaseStatus,
    branch: String,
}

impl ApplicationId {
    /// Create a new id, validating every part.
    pub fn new(
        tenant: impl Into<String>,
        app: impl Into<String>,
        version: impl Into<String>,
        status: ReleaseStatus,
        branch: impl Into<String>,
    ) -> Result<Self, AppIdError> {
        let tenant = tenant.into();
        let app = app.into();
        let version = version.into();
        let branch = branch.into();

        if tenant.trim().is_empty() {
            return Err(AppIdError::EmptyTenant);
        }
        if app.trim().is_empty() {
            return Err(AppIdError::EmptyApp);
        }
        if branch.trim().is_empty() {
            return Err(AppIdError::EmptyBranch);
        }
        validate_version(&version)?;

        Ok(Self {
            tenant,
            app,
            version,
            status,
            branch,
        })
    }

    /// Tenant name.
    pub fn tenant(&self) -> &str {
        &self.tenant
    }

    /// Application name.
    pub fn app(&self) -> &str {
        &self.app
    }

    /// Dotted-numeric version string.
    pub fn version(&self) -> &str {
        &self.version
    }

    /// SNAPSHOT or RELEASE.
    pub fn status(&self) -> ReleaseStatus {
        self.status
    }

    /// Branch label.
    pub fn branch(&self) -> &str {
        &self.branch
    }

    /// True when this id addresses the shared mainline branch.
    pub fn is_head(&self) -> bool {
        self.branch.eq_ignore_ascii_case(HEAD)
    }

    /// True for frozen versions.
    pub fn is_release(&self) -> bool {
        self.status == ReleaseStatus::Release
    }

    /// True for mutable versions.
    pub fn is_snapshot(&self) -> bool {
        self.status == ReleaseStatus::Snapshot
    }

    /// True when the version is the reserved system-configuration version.
    pub fn is_sys_version(&self) -> bool {
        self.version == SYS_VERSION
    }

    /// Same id on the `HEAD` branch.
    pub fn as_head(&self) -> ApplicationId {
        self.as_branch(HEAD)
    }

    /// Same id with RELEASE status.
    pub fn as_release(&self) -> ApplicationId {
        let mut id = self.clone();
        id.status = ReleaseStatus::Release;
        id
    }

    /// Same id with SNAPSHOT status.
    pub fn as_snapshot(&self) -> ApplicationId {
        let mut id = self.clone();
        id.status = ReleaseStatus::Snapshot;
        id
    }

    /// Same id at a different version. The version is not re-validated here;
    /// callers deriving from user input should go through [`Self::new`].
    pub fn as_version(&self, version: impl Into<String>) -> ApplicationId {
        let mut id = self.clone();
        id.version = version.into();
        id
    }

    /// Same id on a different branch.
    pub fn as_branch(&self, branch: impl Into<String>) -> ApplicationId {
        let mut id = self.clone();
        id.branch = branch.into();
        id
    }

    /// The boot id `(tenant, app, 0.0.0, SNAPSHOT, HEAD)` where the
    /// administrative cubes for this tenant/app pair live.
    pub fn boot(&self) -> ApplicationId {
        ApplicationId {
            tenant: self.tenant.clone(),
            app: self.app.clone(),
            version: SYS_VERSION.to_string(),
            status: ReleaseStatus::Snapshot,
            branch: HEAD.to_string(),
        }
    }

    /// Boot id for the branch-permission cube of a given branch.
    pub fn boot_branch(&self, branch: &str) -> ApplicationId {
        let mut id = self.boot();
        id.branch = branch.to_string();
        id
    }

    /// Full cache key: all five parts, lowercased.
    pub fn cache_key(&self) -> String {
        format!(
            "{}/{}/{}/{}/{}",
            self.tenant.to_lowercase(),
            self.app.to_lowercase(),
            self.version,
            self.status.as_str().to_lowercase(),
            self.branch.to_lowercase()
        )
    }

    /// Cache key without the branch part. Every branch of one version shares
    /// this prefix, which is what release-time mass eviction matches on.
    pub fn branch_agnostic_cache_key(&self) -> String {
        format!(
            "{}/{}/{}/{}",
            self.tenant.to_lowercase(),
            self.app.to_lowercase(),
            self.version,
            self.status.as_str().to_lowercase()
        )
    }
}

impl PartialEq for ApplicationId {
    fn eq(&self, other: &Self) -> bool {
        self.tenant.eq_ignore_ascii_case(&other.tenant)
            && self.app.eq_ignore_ascii_case(&other.app)
            && self.version == other.version
            && self.status == other.status
            && self.branch.eq_ignore_ascii_case(&other.branch)
    }
}

impl Eq for ApplicationId {}

impl Hash for ApplicationId {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.tenant.to_lowercase().hash(state);
        self.app.to_lowercase().hash(state);
        self.version.hash(state);
        self.status.hash(state);
        self.branch.to_lowercase().hash(state);
    }
}

impl fmt::Display for ApplicationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}/{}/{}/{}",
            self.tenant, self.app, self.version, self.status, self.branch
        )
    }
}

fn validate_version(version: &str) -> Result<(), AppIdError> {
    let valid = !version.is_empty()
        && version
            .split('.')
            .all(|part| !part.is_empty() && part.bytes().all(|b| b.is_ascii_digit()));
    if valid {
        Ok(())
    } else {
        Err(AppIdError::InvalidVersion(version.to_string()))
    }
}
