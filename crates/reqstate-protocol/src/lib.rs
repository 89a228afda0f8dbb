//! Request state — shared types
//!
//! Identity references, the flat state record exchanged between execution
//! units, slot names, locale tags and error codes. This crate is the single
//! source of truth for the record wire format.

pub mod error;
pub mod identity;
pub mod locale;
pub mod record;
pub mod slots;

pub use error::{StateError, StateErrorCode, StateResult};
pub use identity::{downcast_identity, Identity, IdentityId, IdentityRef};
pub use locale::Locale;
pub use record::StateRecord;
pub use slots::{is_known_slot, record_key, RepositoryKind, Slots};
