//! Repositories — resolve an identity kind's id to an entity.
//!
//! One repository per [`RepositoryKind`]. Id setters and record hydration are
//! the only callers; a miss is a valid answer, never an error.

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;
use reqstate_protocol::{Identity, IdentityId, IdentityRef, RepositoryKind, StateError, StateResult};

/// Trait implemented by every entity repository.
pub trait Repository: Send + Sync {
    /// The kind this repository serves (e.g. "site", "user").
    fn kind(&self) -> &RepositoryKind;

    /// Look up an entity by id. `None` when there is no match.
    fn find_by_id(&self, id: &IdentityId) -> Option<IdentityRef>;
}

/// Repositories keyed by kind.
#[derive(Clone, Default)]
pub struct RepositorySet {
    repositories: HashMap<RepositoryKind, Arc<dyn Repository>>,
}

impl RepositorySet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a repository under its own kind, replacing any previous one.
    pub fn register<R: Repository + 'static>(&mut self, repository: R) {
        self.register_shared(Arc::new(repository));
    }

    pub fn register_shared(&mut self, repository: Arc<dyn Repository>) {
        self.repositories.insert(repository.kind().clone(), repository);
    }

    /// Builder form of [`register`](Self::register).
    pub fn with<R: Repository + 'static>(mut self, repository: R) -> Self {
        self.register(repository);
        self
    }

    /// Serve `kind` with a repository registered for another kind, e.g. an
    /// "owner" kind backed by the user repository.
    pub fn alias(&mut self, kind: RepositoryKind, target: &RepositoryKind) -> StateResult<()> {
        let repository = self
            .get(target)
            .ok_or_else(|| StateError::NoRepository(target.to_string()))?;
        self.repositories.insert(kind, repository);
        Ok(())
    }

    pub fn get(&self, kind: &RepositoryKind) -> Option<Arc<dyn Repository>> {
        self.repositories.get(kind).cloned()
    }

    pub fn contains(&self, kind: &RepositoryKind) -> bool {
        self.repositories.contains_key(kind)
    }

    pub fn kinds(&self) -> Vec<&RepositoryKind> {
        let mut kinds: Vec<_> = self.repositories.keys().collect();
        kinds.sort();
        kinds
    }

    /// Resolve `id` through the repository for `kind`.
    ///
    /// Fails only when no repository serves `kind`.
    pub fn find(&self, kind: &RepositoryKind, id: &IdentityId) -> StateResult<Option<IdentityRef>> {
        let repository = self
            .repositories
            .get(kind)
            .ok_or_else(|| StateError::NoRepository(kind.to_string()))?;
        Ok(repository.find_by_id(id))
    }
}

impl fmt::Debug for RepositorySet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RepositorySet")
            .field("kinds", &self.kinds())
            .finish()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// In-memory repository
// ─────────────────────────────────────────────────────────────────────────────

/// A generic entity: an id, an optional label, and for sites the tenant and
/// workspace to fall back to.
#[derive(Debug, Clone)]
pub struct Entity {
    pub id: IdentityId,
    pub label: Option<String>,
    pub default_tenant: Option<IdentityRef>,
    pub default_workspace: Option<IdentityRef>,
}

impl Entity {
    pub fn new(id: impl Into<IdentityId>) -> Self {
        Self {
            id: id.into(),
            label: None,
            default_tenant: None,
            default_workspace: None,
        }
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    pub fn with_default_tenant(mut self, tenant: IdentityRef) -> Self {
        self.default_tenant = Some(tenant);
        self
    }

    pub fn with_default_workspace(mut self, workspace: IdentityRef) -> Self {
        self.default_workspace = Some(workspace);
        self
    }

    pub fn into_ref(self) -> IdentityRef {
        Arc::new(self)
    }
}

impl Identity for Entity {
    fn id(&self) -> IdentityId {
        self.id.clone()
    }

    fn default_tenant(&self) -> Option<IdentityRef> {
        self.default_tenant.clone()
    }

    fn default_workspace(&self) -> Option<IdentityRef> {
        self.default_workspace.clone()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Repository backed by an in-memory map.
pub struct MemoryRepository {
    kind: RepositoryKind,
    entities: RwLock<HashMap<IdentityId, IdentityRef>>,
}

impl MemoryRepository {
    pub fn new(kind: RepositoryKind) -> Self {
        Self {
            kind,
            entities: RwLock::new(HashMap::new()),
        }
    }

    pub fn with_entities<I>(kind: RepositoryKind, entities: I) -> Self
    where
        I: IntoIterator<Item = IdentityRef>,
    {
        let repository = Self::new(kind);
        for entity in entities {
            repository.insert_ref(entity);
        }
        repository
    }

    /// Store an identity, replacing any entity with the same id.
    pub fn insert<T: Identity>(&self, identity: T) -> IdentityRef {
        let identity: IdentityRef = Arc::new(identity);
        self.insert_ref(identity.clone());
        identity
    }

    pub fn insert_ref(&self, identity: IdentityRef) {
        self.entities.write().insert(identity.id(), identity);
    }

    pub fn remove(&self, id: &IdentityId) -> Option<IdentityRef> {
        self.entities.write().remove(id)
    }

    pub fn len(&self) -> usize {
        self.entities.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.read().is_empty()
    }
}

impl Repository for MemoryRepository {
    fn kind(&self) -> &RepositoryKind {
        &self.kind
    }

    fn find_by_id(&self, id: &IdentityId) -> Option<IdentityRef> {
        self.entities.read().get(id).cloned()
    }
}

impl<R: Repository + ?Sized> Repository for Arc<R> {
    fn kind(&self) -> &RepositoryKind {
        (**self).kind()
    }

    fn find_by_id(&self, id: &IdentityId) -> Option<IdentityRef> {
        (**self).find_by_id(id)
    }
}
