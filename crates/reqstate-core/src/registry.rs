//! AttributeRegistry — which identity slots a container has.
//!
//! A registry is plain data: an ordered list of [`AttributeSpec`]s naming
//! each slot, the repository kind its ids resolve through, and whether it is
//! carried in a [`StateRecord`](reqstate_protocol::StateRecord). Every
//! container shape (the standard seven-slot container, the extended one with
//! target slots, a restricted site-only one) is a different registry fed to
//! the same accessors.

use std::collections::HashMap;

use reqstate_protocol::{RepositoryKind, Slots, StateError, StateResult};

/// Configuration of one identity slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttributeSpec {
    pub name: String,
    pub repository: RepositoryKind,
    pub included_in_record: bool,
}

impl AttributeSpec {
    /// A slot that is carried in records.
    pub fn new(name: impl Into<String>, repository: RepositoryKind) -> Self {
        Self {
            name: name.into(),
            repository,
            included_in_record: true,
        }
    }

    /// A slot that stays process-local.
    pub fn local(name: impl Into<String>, repository: RepositoryKind) -> Self {
        Self {
            included_in_record: false,
            ..Self::new(name, repository)
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AttributeRegistry {
    specs: Vec<AttributeSpec>,
    index: HashMap<String, usize>,
}

impl AttributeRegistry {
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::default()
    }

    /// The seven current-identity slots. Site, tenant, workspace and user
    /// travel in records; admin, root and visitor stay local.
    pub fn standard() -> Self {
        Self::from_specs(standard_specs())
    }

    /// [`standard`](Self::standard) plus target site, tenant and workspace,
    /// each resolving through the same kind as its current counterpart.
    pub fn extended() -> Self {
        let mut specs = standard_specs();
        specs.extend([
            AttributeSpec::new(Slots::TARGET_SITE, RepositoryKind::SITE),
            AttributeSpec::new(Slots::TARGET_TENANT, RepositoryKind::TENANT),
            AttributeSpec::new(Slots::TARGET_WORKSPACE, RepositoryKind::WORKSPACE),
        ]);
        Self::from_specs(specs)
    }

    /// Current and target site only.
    pub fn restricted() -> Self {
        Self::from_specs(vec![
            AttributeSpec::new(Slots::CURRENT_SITE, RepositoryKind::SITE),
            AttributeSpec::new(Slots::TARGET_SITE, RepositoryKind::SITE),
        ])
    }

    // Callers guarantee unique names.
    fn from_specs(specs: Vec<AttributeSpec>) -> Self {
        let index = specs
            .iter()
            .enumerate()
            .map(|(i, spec)| (spec.name.clone(), i))
            .collect();
        Self { specs, index }
    }

    pub fn spec(&self, slot: &str) -> Option<&AttributeSpec> {
        self.index.get(slot).map(|&i| &self.specs[i])
    }

    pub fn contains(&self, slot: &str) -> bool {
        self.index.contains_key(slot)
    }

    /// Look up a slot for writing.
    pub fn require(&self, slot: &str) -> StateResult<&AttributeSpec> {
        self.spec(slot)
            .ok_or_else(|| StateError::UnknownSlot(slot.to_string()))
    }

    /// All slots in registration order.
    pub fn specs(&self) -> &[AttributeSpec] {
        &self.specs
    }

    /// Slots carried in records, in registration order.
    pub fn record_specs(&self) -> impl Iterator<Item = &AttributeSpec> {
        self.specs.iter().filter(|s| s.included_in_record)
    }

    pub fn len(&self) -> usize {
        self.specs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.specs.is_empty()
    }

    /// Start a derived registry from this one.
    pub fn to_builder(&self) -> RegistryBuilder {
        RegistryBuilder {
            specs: self.specs.clone(),
        }
    }
}

fn standard_specs() -> Vec<AttributeSpec> {
    vec![
        AttributeSpec::new(Slots::CURRENT_SITE, RepositoryKind::SITE),
        AttributeSpec::new(Slots::CURRENT_TENANT, RepositoryKind::TENANT),
        AttributeSpec::new(Slots::CURRENT_WORKSPACE, RepositoryKind::WORKSPACE),
        AttributeSpec::new(Slots::CURRENT_USER, RepositoryKind::USER),
        AttributeSpec::local(Slots::CURRENT_ADMIN, RepositoryKind::ADMIN),
        AttributeSpec::local(Slots::CURRENT_ROOT, RepositoryKind::ROOT),
        AttributeSpec::local(Slots::CURRENT_VISITOR, RepositoryKind::VISITOR),
    ]
}

/// Builds a registry slot by slot, rejecting duplicate names.
#[derive(Debug, Clone, Default)]
pub struct RegistryBuilder {
    specs: Vec<AttributeSpec>,
}

impl RegistryBuilder {
    /// Add a slot carried in records.
    pub fn slot(self, name: impl Into<String>, repository: RepositoryKind) -> Self {
        self.spec(AttributeSpec::new(name, repository))
    }

    /// Add a process-local slot.
    pub fn local_slot(self, name: impl Into<String>, repository: RepositoryKind) -> Self {
        self.spec(AttributeSpec::local(name, repository))
    }

    pub fn spec(mut self, spec: AttributeSpec) -> Self {
        self.specs.push(spec);
        self
    }

    /// Drop a slot (no-op if absent).
    pub fn without(mut self, name: &str) -> Self {
        self.specs.retain(|s| s.name != name);
        self
    }

    pub fn build(self) -> StateResult<AttributeRegistry> {
        let mut index = HashMap::with_capacity(self.specs.len());
        for (i, spec) in self.specs.iter().enumerate() {
            if spec.name.is_empty() {
                return Err(StateError::InvalidConfig("empty slot name".into()));
            }
            if index.insert(spec.name.clone(), i).is_some() {
                return Err(StateError::DuplicateSlot(spec.name.clone()));
            }
        }
        Ok(AttributeRegistry {
            specs: self.specs,
            index,
        })
    }
}
