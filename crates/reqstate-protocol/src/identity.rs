//! Identity references — the opaque entities held in identity slots.

use std::any::Any;
use std::convert::Infallible;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize};

/// Identifier of an externally owned entity — either an integer or a string.
///
/// Integer ids are signed 64-bit. On decode, integral floats (`123.0`) are
/// accepted as numbers; fractional floats and integers beyond the `i64`
/// range are rejected.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(untagged)]
pub enum IdentityId {
    Number(i64),
    String(String),
}

impl fmt::Display for IdentityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Number(n) => write!(f, "{n}"),
            Self::String(s) => f.write_str(s),
        }
    }
}

/// Canonical integer text (`123`, `-4`) becomes [`IdentityId::Number`];
/// anything else, including `007` or `+5`, stays a string id as written.
impl FromStr for IdentityId {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.parse::<i64>() {
            Ok(n) if n.to_string() == s => Self::Number(n),
            _ => Self::String(s.to_string()),
        })
    }
}

struct IdentityIdVisitor;

impl Visitor<'_> for IdentityIdVisitor {
    type Value = IdentityId;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("an integer or string id")
    }

    fn visit_i64<E: de::Error>(self, v: i64) -> Result<Self::Value, E> {
        Ok(IdentityId::Number(v))
    }

    fn visit_u64<E: de::Error>(self, v: u64) -> Result<Self::Value, E> {
        i64::try_from(v)
            .map(IdentityId::Number)
            .map_err(|_| E::custom(format!("integer id {v} out of range")))
    }

    fn visit_f64<E: de::Error>(self, v: f64) -> Result<Self::Value, E> {
        // i64::MAX as f64 rounds up to 2^63, hence the exclusive bound
        if v.is_finite() && v.fract() == 0.0 && v >= i64::MIN as f64 && v < i64::MAX as f64 {
            Ok(IdentityId::Number(v as i64))
        } else {
            Err(E::custom(format!("id {v} is not an integer")))
        }
    }

    fn visit_str<E: de::Error>(self, v: &str) -> Result<Self::Value, E> {
        Ok(IdentityId::String(v.to_string()))
    }

    fn visit_string<E: de::Error>(self, v: String) -> Result<Self::Value, E> {
        Ok(IdentityId::String(v))
    }
}

impl<'de> Deserialize<'de> for IdentityId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_any(IdentityIdVisitor)
    }
}

impl From<i64> for IdentityId {
    fn from(n: i64) -> Self {
        Self::Number(n)
    }
}

impl From<i32> for IdentityId {
    fn from(n: i32) -> Self {
        Self::Number(n.into())
    }
}

impl From<&str> for IdentityId {
    fn from(s: &str) -> Self {
        Self::String(s.to_string())
    }
}

impl From<String> for IdentityId {
    fn from(s: String) -> Self {
        Self::String(s)
    }
}

/// An entity resolved by a repository and held by reference in a slot.
///
/// The container never owns the entity's lifecycle; the only contract is an
/// id, and two identities are equal when their ids are equal.
pub trait Identity: fmt::Debug + Send + Sync + Any {
    fn id(&self) -> IdentityId;

    /// Tenant a site falls back to when none is given explicitly.
    fn default_tenant(&self) -> Option<IdentityRef> {
        None
    }

    /// Workspace a site falls back to when none is given explicitly.
    fn default_workspace(&self) -> Option<IdentityRef> {
        None
    }

    fn as_any(&self) -> &dyn Any;
}

/// Shared handle to an identity.
pub type IdentityRef = Arc<dyn Identity>;

impl PartialEq for dyn Identity {
    fn eq(&self, other: &Self) -> bool {
        self.id() == other.id()
    }
}

impl Eq for dyn Identity {}

/// Downcast a shared identity to its concrete type.
pub fn downcast_identity<T: Identity>(identity: &IdentityRef) -> Option<&T> {
    identity.as_any().downcast_ref::<T>()
}
