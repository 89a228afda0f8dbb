//! Registry and fixture configuration.
//!
//! A registry can be described as JSON — either a named preset, an explicit
//! slot list, or a preset extended with extra slots:
//!
//! ```json
//! { "preset": "standard",
//!   "slots": [ { "name": "target_site", "repository": "site" } ] }
//! ```
//!
//! Fixtures describe in-memory entities per repository kind and are used to
//! back a [`RepositorySet`] for tooling and tests.

use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::str::FromStr;

use reqstate_protocol::{IdentityId, IdentityRef, RepositoryKind, StateError, StateResult};
use serde::{Deserialize, Serialize};

use crate::registry::{AttributeRegistry, AttributeSpec};
use crate::repository::{Entity, MemoryRepository, RepositorySet};

/// Built-in registry shapes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RegistryPreset {
    #[default]
    Standard,
    Extended,
    Restricted,
}

impl RegistryPreset {
    pub fn registry(self) -> AttributeRegistry {
        match self {
            Self::Standard => AttributeRegistry::standard(),
            Self::Extended => AttributeRegistry::extended(),
            Self::Restricted => AttributeRegistry::restricted(),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Standard => "standard",
            Self::Extended => "extended",
            Self::Restricted => "restricted",
        }
    }
}

impl fmt::Display for RegistryPreset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RegistryPreset {
    type Err = StateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "standard" => Ok(Self::Standard),
            "extended" => Ok(Self::Extended),
            "restricted" => Ok(Self::Restricted),
            other => Err(StateError::InvalidConfig(format!("unknown registry preset: {other}"))),
        }
    }
}

fn default_true() -> bool {
    true
}

/// One slot entry in a registry configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotConfig {
    pub name: String,
    pub repository: RepositoryKind,
    #[serde(default = "default_true")]
    pub included_in_record: bool,
}

impl From<SlotConfig> for AttributeSpec {
    fn from(slot: SlotConfig) -> Self {
        AttributeSpec {
            name: slot.name,
            repository: slot.repository,
            included_in_record: slot.included_in_record,
        }
    }
}

/// Registry configuration.
///
/// With no preset the slot list is the full registry; with a preset the
/// slots are appended to it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryConfig {
    #[serde(default)]
    pub preset: Option<RegistryPreset>,
    #[serde(default)]
    pub slots: Vec<SlotConfig>,
}

impl RegistryConfig {
    pub fn from_preset(preset: RegistryPreset) -> Self {
        Self {
            preset: Some(preset),
            slots: Vec::new(),
        }
    }

    pub fn from_json(json: &str) -> StateResult<Self> {
        serde_json::from_str(json).map_err(|e| StateError::InvalidConfig(e.to_string()))
    }

    pub fn load(path: &Path) -> StateResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            StateError::InvalidConfig(format!("failed to read {}: {e}", path.display()))
        })?;
        Self::from_json(&content)
    }

    pub fn build(&self) -> StateResult<AttributeRegistry> {
        let mut builder = match self.preset {
            Some(preset) => preset.registry().to_builder(),
            None => AttributeRegistry::builder(),
        };
        for slot in &self.slots {
            builder = builder.spec(slot.clone().into());
        }
        let registry = builder.build()?;
        if registry.is_empty() {
            return Err(StateError::InvalidConfig("registry defines no slots".into()));
        }
        Ok(registry)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Fixtures
// ─────────────────────────────────────────────────────────────────────────────

/// One in-memory entity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityFixture {
    pub id: IdentityId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    /// Id of a `tenant` entity (sites only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_tenant: Option<IdentityId>,
    /// Id of a `workspace` entity (sites only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_workspace: Option<IdentityId>,
}

/// Entities grouped by repository kind.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FixtureSet {
    pub kinds: BTreeMap<RepositoryKind, Vec<EntityFixture>>,
}

impl FixtureSet {
    pub fn from_json(json: &str) -> StateResult<Self> {
        serde_json::from_str(json).map_err(|e| StateError::InvalidConfig(e.to_string()))
    }

    pub fn load(path: &Path) -> StateResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            StateError::InvalidConfig(format!("failed to read {}: {e}", path.display()))
        })?;
        Self::from_json(&content)
    }

    /// Build one [`MemoryRepository`] per kind.
    ///
    /// Default tenant/workspace references are resolved against the
    /// `tenant` and `workspace` fixtures; a dangling reference is an error.
    pub fn into_repositories(&self) -> StateResult<RepositorySet> {
        let plain = |fixture: &EntityFixture| {
            let mut entity = Entity::new(fixture.id.clone());
            entity.label = fixture.label.clone();
            entity
        };

        let lookup = |kind: &RepositoryKind, id: &IdentityId| -> StateResult<IdentityRef> {
            self.kinds
                .get(kind)
                .and_then(|fixtures| fixtures.iter().find(|f| &f.id == id))
                .map(|fixture| plain(fixture).into_ref())
                .ok_or_else(|| {
                    StateError::InvalidConfig(format!("fixture references missing {kind} {id}"))
                })
        };

        let mut set = RepositorySet::new();
        for (kind, fixtures) in &self.kinds {
            let repository = MemoryRepository::new(kind.clone());
            for fixture in fixtures {
                let mut entity = plain(fixture);
                if let Some(id) = &fixture.default_tenant {
                    entity.default_tenant = Some(lookup(&RepositoryKind::TENANT, id)?);
                }
                if let Some(id) = &fixture.default_workspace {
                    entity.default_workspace = Some(lookup(&RepositoryKind::WORKSPACE, id)?);
                }
                repository.insert(entity);
            }
            set.register(repository);
        }
        Ok(set)
    }
}
