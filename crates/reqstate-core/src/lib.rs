//! Request state — a request-scoped identity container.
//!
//! Holds the resolved site, tenant, workspace and principals of one request
//! (or one unit of concurrent work) together with request metadata, and
//! derives override and privilege facts from them.
//!
//! ```ignore
//! let state = RequestState::new(
//!     Arc::new(AttributeRegistry::extended()),
//!     Arc::new(repositories),
//!     TaskStore,
//! );
//! TaskStore::scope(async {
//!     state.set_current_site_id(Some(123.into()))?;
//!     let record = state.to_record(); // hand to a background job
//!     Ok::<_, StateError>(record)
//! })
//! .await?;
//! ```

pub mod clock;
pub mod config;
pub mod container;
pub mod handoff;
pub mod registry;
pub mod repository;
pub mod rules;
pub mod serializer;
pub mod store;

pub use clock::{Clock, FixedClock, SystemClock};
pub use config::{EntityFixture, FixtureSet, RegistryConfig, RegistryPreset, SlotConfig};
pub use container::{RequestState, ScopeGuard};
pub use registry::{AttributeRegistry, AttributeSpec, RegistryBuilder};
pub use repository::{Entity, MemoryRepository, Repository, RepositorySet};
pub use rules::{EitherKind, PrivilegeLevel};
pub use store::{ContextRecord, LocalStore, ScopedStore, TaskStore, ThreadStore, ViewContext};

pub use reqstate_protocol::{
    Identity, IdentityId, IdentityRef, Locale, RepositoryKind, Slots, StateError, StateRecord,
    StateResult,
};
