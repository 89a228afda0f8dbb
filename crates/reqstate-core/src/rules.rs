//! Resolution rules — facts derived from the identity slots.
//!
//! - *either*: a target identity overrides the current one.
//! - *login*: the logged-in principal, least privileged match first.
//! - *highest privilege*: the most privileged principal present.
//!
//! Login and highest privilege walk user/admin/root in opposite orders. They
//! agree whenever at most one principal is set, which is the normal case for
//! a single request. Visitors are never a login.

use std::fmt;

use reqstate_protocol::{IdentityId, IdentityRef, Slots, StateError, StateResult};

use crate::container::RequestState;
use crate::store::ScopedStore;

/// Identity kinds that can have a target override.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EitherKind {
    Site,
    Tenant,
    Workspace,
}

impl EitherKind {
    pub fn current_slot(self) -> &'static str {
        match self {
            Self::Site => Slots::CURRENT_SITE,
            Self::Tenant => Slots::CURRENT_TENANT,
            Self::Workspace => Slots::CURRENT_WORKSPACE,
        }
    }

    pub fn target_slot(self) -> &'static str {
        match self {
            Self::Site => Slots::TARGET_SITE,
            Self::Tenant => Slots::TARGET_TENANT,
            Self::Workspace => Slots::TARGET_WORKSPACE,
        }
    }
}

impl fmt::Display for EitherKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Site => "site",
            Self::Tenant => "tenant",
            Self::Workspace => "workspace",
        })
    }
}

/// Privilege of the principals present, lowest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum PrivilegeLevel {
    Anonymous,
    Visitor,
    User,
    Admin,
    Root,
}

impl<S: ScopedStore> RequestState<S> {
    /// Whether the registry defines the target slot for `kind`.
    pub fn has_either(&self, kind: EitherKind) -> bool {
        self.registry().contains(kind.target_slot())
    }

    /// Target identity if set, else the current one.
    pub fn either(&self, kind: EitherKind) -> StateResult<Option<IdentityRef>> {
        self.require_target(kind)?;
        Ok(self
            .get(kind.target_slot())
            .or_else(|| self.get(kind.current_slot())))
    }

    pub fn either_id(&self, kind: EitherKind) -> StateResult<Option<IdentityId>> {
        self.require_target(kind)?;
        Ok(self
            .get_id(kind.target_slot())
            .or_else(|| self.get_id(kind.current_slot())))
    }

    fn require_target(&self, kind: EitherKind) -> StateResult<()> {
        if self.has_either(kind) {
            Ok(())
        } else {
            Err(StateError::NoTargetSlot(kind.to_string()))
        }
    }

    pub fn either_site(&self) -> StateResult<Option<IdentityRef>> {
        self.either(EitherKind::Site)
    }

    pub fn either_site_id(&self) -> StateResult<Option<IdentityId>> {
        self.either_id(EitherKind::Site)
    }

    pub fn either_tenant(&self) -> StateResult<Option<IdentityRef>> {
        self.either(EitherKind::Tenant)
    }

    pub fn either_tenant_id(&self) -> StateResult<Option<IdentityId>> {
        self.either_id(EitherKind::Tenant)
    }

    pub fn either_workspace(&self) -> StateResult<Option<IdentityRef>> {
        self.either(EitherKind::Workspace)
    }

    pub fn either_workspace_id(&self) -> StateResult<Option<IdentityId>> {
        self.either_id(EitherKind::Workspace)
    }

    /// Root if set, else admin.
    pub fn either_admin(&self) -> Option<IdentityRef> {
        self.current_root().or_else(|| self.current_admin())
    }

    /// The logged-in principal: user, then admin, then root.
    pub fn current_login(&self) -> Option<IdentityRef> {
        self.current_user()
            .or_else(|| self.current_admin())
            .or_else(|| self.current_root())
    }

    /// The most privileged principal: root, then admin, then user.
    pub fn highest_privilege(&self) -> Option<IdentityRef> {
        self.current_root()
            .or_else(|| self.current_admin())
            .or_else(|| self.current_user())
    }

    /// Level of [`highest_privilege`](Self::highest_privilege); a visitor
    /// only counts when nobody is logged in.
    pub fn privilege_level(&self) -> PrivilegeLevel {
        if self.current_root().is_some() {
            PrivilegeLevel::Root
        } else if self.current_admin().is_some() {
            PrivilegeLevel::Admin
        } else if self.current_user().is_some() {
            PrivilegeLevel::User
        } else if self.current_visitor().is_some() {
            PrivilegeLevel::Visitor
        } else {
            PrivilegeLevel::Anonymous
        }
    }
}
