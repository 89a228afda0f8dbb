//! Identity slot names and repository kinds.
//!
//! Each slot constant is the exact name used in registries, and — with an
//! `_id` suffix — the key used for the slot in a flat [`StateRecord`].
//!
//! [`StateRecord`]: crate::record::StateRecord

use std::borrow::Cow;
use std::fmt;

use serde::{Deserialize, Serialize};

/// All well-known identity slot names.
pub struct Slots;

impl Slots {
    // ── Current ─────────────────────────────────────────────────────────
    pub const CURRENT_SITE: &str = "current_site";
    pub const CURRENT_TENANT: &str = "current_tenant";
    pub const CURRENT_WORKSPACE: &str = "current_workspace";
    pub const CURRENT_USER: &str = "current_user";
    pub const CURRENT_ADMIN: &str = "current_admin";
    pub const CURRENT_ROOT: &str = "current_root";
    pub const CURRENT_VISITOR: &str = "current_visitor";

    // ── Target ──────────────────────────────────────────────────────────
    pub const TARGET_SITE: &str = "target_site";
    pub const TARGET_TENANT: &str = "target_tenant";
    pub const TARGET_WORKSPACE: &str = "target_workspace";
}

/// Returns true if the given string is one of the well-known slot names.
///
/// Registries may define additional slots; this only covers the catalog.
pub fn is_known_slot(slot: &str) -> bool {
    matches!(
        slot,
        Slots::CURRENT_SITE
            | Slots::CURRENT_TENANT
            | Slots::CURRENT_WORKSPACE
            | Slots::CURRENT_USER
            | Slots::CURRENT_ADMIN
            | Slots::CURRENT_ROOT
            | Slots::CURRENT_VISITOR
            | Slots::TARGET_SITE
            | Slots::TARGET_TENANT
            | Slots::TARGET_WORKSPACE
    )
}

/// Record key for a slot's id (`current_site` → `current_site_id`).
pub fn record_key(slot: &str) -> String {
    format!("{slot}_id")
}

/// Inverse of [`record_key`]: `current_site_id` → `current_site`.
pub fn slot_from_record_key(key: &str) -> Option<&str> {
    key.strip_suffix("_id").filter(|s| !s.is_empty())
}

/// Name of the repository an identity slot resolves through.
///
/// Several slots may share a kind (`current_site` and `target_site` both
/// resolve through `site`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RepositoryKind(Cow<'static, str>);

impl RepositoryKind {
    pub const SITE: Self = Self::from_static("site");
    pub const TENANT: Self = Self::from_static("tenant");
    pub const WORKSPACE: Self = Self::from_static("workspace");
    pub const USER: Self = Self::from_static("user");
    pub const ADMIN: Self = Self::from_static("admin");
    pub const ROOT: Self = Self::from_static("root");
    pub const VISITOR: Self = Self::from_static("visitor");

    pub const fn from_static(name: &'static str) -> Self {
        Self(Cow::Borrowed(name))
    }

    pub fn new(name: impl Into<String>) -> Self {
        Self(Cow::Owned(name.into()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RepositoryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RepositoryKind {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}
