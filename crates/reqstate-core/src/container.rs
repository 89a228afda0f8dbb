//! RequestState — the request-scoped identity container.
//!
//! A `RequestState` ties a [`ScopedStore`] (where the unit's record lives) to
//! an [`AttributeRegistry`] (which identity slots exist) and a
//! [`RepositorySet`] (how slot ids resolve). Every registry slot gets the
//! same four accessors: value get/set and id get/set. Well-known slots also
//! get typed wrappers generated by `slot_accessors!`.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use reqstate_protocol::{IdentityId, IdentityRef, Locale, Slots, StateResult};
use tracing::debug;

use crate::clock::{Clock, SystemClock};
use crate::registry::{AttributeRegistry, AttributeSpec};
use crate::repository::RepositorySet;
use crate::store::{ContextRecord, ScopedStore, TaskStore, ViewContext};

const MICROS_PER_SECOND: f64 = 1_000_000.0;

#[derive(Clone)]
pub struct RequestState<S: ScopedStore = TaskStore> {
    registry: Arc<AttributeRegistry>,
    repositories: Arc<RepositorySet>,
    store: S,
    clock: Arc<dyn Clock>,
}

impl<S: ScopedStore> std::fmt::Debug for RequestState<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestState")
            .field("registry", &self.registry)
            .field("repositories", &self.repositories)
            .field("clock", &self.clock)
            .finish()
    }
}

impl<S: ScopedStore> RequestState<S> {
    pub fn new(registry: Arc<AttributeRegistry>, repositories: Arc<RepositorySet>, store: S) -> Self {
        Self {
            registry,
            repositories,
            store,
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn registry(&self) -> &AttributeRegistry {
        &self.registry
    }

    pub fn repositories(&self) -> &RepositorySet {
        &self.repositories
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Run `f` against the unit's record, creating `{started: now}` if needed.
    pub(crate) fn record<T>(&self, f: impl FnOnce(&mut ContextRecord) -> T) -> T {
        let clock = &self.clock;
        self.store.with_record(|| ContextRecord::new(clock.now()), f)
    }

    /// Snapshot of the unit's record.
    pub fn snapshot(&self) -> ContextRecord {
        self.record(|r| r.clone())
    }

    // ── Lifecycle ───────────────────────────────────────────────────────

    /// Drop the unit's record; the next access starts a fresh one.
    pub fn clear(&self) {
        debug!("request state cleared");
        self.store.clear();
    }

    pub fn is_present(&self) -> bool {
        self.store.is_present()
    }

    /// Clear the record when the returned guard goes out of scope.
    pub fn scoped(&self) -> ScopeGuard<'_, S> {
        ScopeGuard { state: self }
    }

    /// Reset the record and seat the current site, tenant and workspace,
    /// then run `op`.
    ///
    /// Tenant and workspace default to the site's own defaults. The record
    /// is *not* cleared when `op` returns; pair with [`scoped`](Self::scoped)
    /// for that.
    pub fn with_current<T>(
        &self,
        site: IdentityRef,
        tenant: Option<IdentityRef>,
        workspace: Option<IdentityRef>,
        op: impl FnOnce(&Self) -> T,
    ) -> StateResult<T> {
        for slot in [Slots::CURRENT_SITE, Slots::CURRENT_TENANT, Slots::CURRENT_WORKSPACE] {
            self.registry.require(slot)?;
        }

        self.clear();
        let tenant = tenant.or_else(|| site.default_tenant());
        let workspace = workspace.or_else(|| site.default_workspace());
        debug!(site = %site.id(), "seating current site");

        self.record(|r| {
            r.set_slot(Slots::CURRENT_SITE, Some(site));
            r.set_slot(Slots::CURRENT_TENANT, tenant);
            r.set_slot(Slots::CURRENT_WORKSPACE, workspace);
        });

        Ok(op(self))
    }

    // ── Slot accessors ──────────────────────────────────────────────────

    /// The identity in `slot`, or `None` when empty or not in the registry.
    pub fn get(&self, slot: &str) -> Option<IdentityRef> {
        if !self.registry.contains(slot) {
            return None;
        }
        self.record(|r| r.slot(slot).cloned())
    }

    /// Overwrite `slot`. The identity is not checked against the slot's
    /// repository kind.
    pub fn set(&self, slot: &str, identity: Option<IdentityRef>) -> StateResult<()> {
        self.registry.require(slot)?;
        self.record(|r| r.set_slot(slot, identity));
        Ok(())
    }

    /// Id of the identity in `slot`.
    pub fn get_id(&self, slot: &str) -> Option<IdentityId> {
        self.get(slot).map(|identity| identity.id())
    }

    /// Resolve `id` through the slot's repository and store the result.
    ///
    /// A miss empties the slot. Returns whatever was stored.
    pub fn set_id(&self, slot: &str, id: Option<IdentityId>) -> StateResult<Option<IdentityRef>> {
        let spec = self.registry.require(slot)?;
        let identity = self.resolve(spec, id.as_ref())?;
        let stored = identity.clone();
        self.record(|r| r.set_slot(slot, stored));
        Ok(identity)
    }

    /// Repository lookup for one slot. Never touches the record.
    pub(crate) fn resolve(
        &self,
        spec: &AttributeSpec,
        id: Option<&IdentityId>,
    ) -> StateResult<Option<IdentityRef>> {
        let Some(id) = id else {
            return Ok(None);
        };
        let identity = self.repositories.find(&spec.repository, id)?;
        if identity.is_none() {
            debug!(slot = %spec.name, kind = %spec.repository, %id, "repository miss, slot emptied");
        }
        Ok(identity)
    }

    // ── Metadata ────────────────────────────────────────────────────────

    pub fn request_id(&self) -> Option<String> {
        self.record(|r| r.request_id.clone())
    }

    pub fn set_request_id(&self, request_id: Option<String>) {
        self.record(|r| r.request_id = request_id);
    }

    /// The request id, generating a UUID v4 one when none is set.
    pub fn ensure_request_id(&self) -> String {
        self.record(|r| {
            r.request_id
                .get_or_insert_with(|| uuid::Uuid::new_v4().to_string())
                .clone()
        })
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// When the request started. Stamped when the record was created.
    pub fn started(&self) -> DateTime<Utc> {
        self.record(|r| r.started)
    }

    /// Overwrite the start time; `None` restamps it with now.
    pub fn set_started(&self, started: Option<DateTime<Utc>>) {
        let started = started.unwrap_or_else(|| self.now());
        self.record(|r| r.started = started);
    }

    /// Seconds elapsed since [`started`](Self::started).
    pub fn duration(&self) -> f64 {
        let elapsed = self.now() - self.started();
        match elapsed.num_microseconds() {
            Some(micros) => micros as f64 / MICROS_PER_SECOND,
            None => elapsed.num_milliseconds() as f64 / 1_000.0,
        }
    }

    pub fn locale(&self) -> Option<Locale> {
        self.record(|r| r.locale.clone())
    }

    pub fn set_locale(&self, locale: Option<Locale>) {
        self.record(|r| r.locale = locale);
    }

    /// Caller-defined value kept next to the identities. Never serialized.
    pub fn view_context(&self) -> Option<ViewContext> {
        self.record(|r| r.view_context.clone())
    }

    pub fn set_view_context(&self, view_context: Option<ViewContext>) {
        self.record(|r| r.view_context = view_context);
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Typed slot accessors
// ─────────────────────────────────────────────────────────────────────────────

macro_rules! slot_accessors {
    ($(
        slot = $slot:expr,
        get = $get:ident,
        set = $set:ident,
        get_id = $get_id:ident,
        set_id = $set_id:ident;
    )*) => {
        impl<S: ScopedStore> RequestState<S> {
            $(
                pub fn $get(&self) -> Option<IdentityRef> {
                    self.get($slot)
                }

                pub fn $set(&self, identity: Option<IdentityRef>) -> StateResult<()> {
                    self.set($slot, identity)
                }

                pub fn $get_id(&self) -> Option<IdentityId> {
                    self.get_id($slot)
                }

                pub fn $set_id(&self, id: Option<IdentityId>) -> StateResult<Option<IdentityRef>> {
                    self.set_id($slot, id)
                }
            )*
        }
    };
}

slot_accessors! {
    slot = Slots::CURRENT_SITE, get = current_site, set = set_current_site,
        get_id = current_site_id, set_id = set_current_site_id;
    slot = Slots::CURRENT_TENANT, get = current_tenant, set = set_current_tenant,
        get_id = current_tenant_id, set_id = set_current_tenant_id;
    slot = Slots::CURRENT_WORKSPACE, get = current_workspace, set = set_current_workspace,
        get_id = current_workspace_id, set_id = set_current_workspace_id;
    slot = Slots::CURRENT_USER, get = current_user, set = set_current_user,
        get_id = current_user_id, set_id = set_current_user_id;
    slot = Slots::CURRENT_ADMIN, get = current_admin, set = set_current_admin,
        get_id = current_admin_id, set_id = set_current_admin_id;
    slot = Slots::CURRENT_ROOT, get = current_root, set = set_current_root,
        get_id = current_root_id, set_id = set_current_root_id;
    slot = Slots::CURRENT_VISITOR, get = current_visitor, set = set_current_visitor,
        get_id = current_visitor_id, set_id = set_current_visitor_id;
    slot = Slots::TARGET_SITE, get = target_site, set = set_target_site,
        get_id = target_site_id, set_id = set_target_site_id;
    slot = Slots::TARGET_TENANT, get = target_tenant, set = set_target_tenant,
        get_id = target_tenant_id, set_id = set_target_tenant_id;
    slot = Slots::TARGET_WORKSPACE, get = target_workspace, set = set_target_workspace,
        get_id = target_workspace_id, set_id = set_target_workspace_id;
}

// ─────────────────────────────────────────────────────────────────────────────
// ScopeGuard
// ─────────────────────────────────────────────────────────────────────────────

/// Clears the unit's record on drop, on every exit path.
pub struct ScopeGuard<'a, S: ScopedStore> {
    state: &'a RequestState<S>,
}

impl<S: ScopedStore> std::ops::Deref for ScopeGuard<'_, S> {
    type Target = RequestState<S>;

    fn deref(&self) -> &Self::Target {
        self.state
    }
}

impl<S: ScopedStore> Drop for ScopeGuard<'_, S> {
    fn drop(&mut self) {
        self.state.clear();
    }
}
