//! Request-state error types and their stable numeric codes.

use thiserror::Error;

/// Stable numeric codes for every [`StateError`] variant.
///
/// Codes live in the -33000 block so they can travel next to JSON-RPC
/// errors without colliding with the reserved -32xxx range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateErrorCode {
    UnknownSlot,
    DuplicateSlot,
    NoTargetSlot,
    NoRepository,
    InvalidTimestamp,
    InvalidLocale,
    InvalidRecord,
    InvalidConfig,

    // Custom code
    Custom(i32),
}

impl StateErrorCode {
    pub fn code(&self) -> i32 {
        match self {
            Self::UnknownSlot => -33001,
            Self::DuplicateSlot => -33002,
            Self::NoTargetSlot => -33003,
            Self::NoRepository => -33004,
            Self::InvalidTimestamp => -33010,
            Self::InvalidLocale => -33011,
            Self::InvalidRecord => -33012,
            Self::InvalidConfig => -33020,
            Self::Custom(c) => *c,
        }
    }

    pub fn from_code(code: i32) -> Self {
        match code {
            -33001 => Self::UnknownSlot,
            -33002 => Self::DuplicateSlot,
            -33003 => Self::NoTargetSlot,
            -33004 => Self::NoRepository,
            -33010 => Self::InvalidTimestamp,
            -33011 => Self::InvalidLocale,
            -33012 => Self::InvalidRecord,
            -33020 => Self::InvalidConfig,
            c => Self::Custom(c),
        }
    }
}

/// Errors raised by the request-state container.
///
/// Repository misses are not errors: an id that resolves to nothing simply
/// leaves the slot empty.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StateError {
    /// A write targeted a slot that the active registry does not define.
    #[error("unknown identity slot: {0}")]
    UnknownSlot(String),

    /// A registry was built with the same slot name twice.
    #[error("identity slot defined twice: {0}")]
    DuplicateSlot(String),

    /// An `either_*` lookup was made on a registry without the `target_*` slot.
    #[error("registry has no target slot for {0}")]
    NoTargetSlot(String),

    /// No repository was registered for the slot's repository kind.
    #[error("no repository registered for kind: {0}")]
    NoRepository(String),

    #[error("invalid started timestamp: {0:?}")]
    InvalidTimestamp(String),

    #[error("invalid locale tag: {0:?}")]
    InvalidLocale(String),

    /// A record could not be decoded from its transport form.
    #[error("invalid state record: {0}")]
    InvalidRecord(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

impl StateError {
    pub fn error_code(&self) -> StateErrorCode {
        match self {
            Self::UnknownSlot(_) => StateErrorCode::UnknownSlot,
            Self::DuplicateSlot(_) => StateErrorCode::DuplicateSlot,
            Self::NoTargetSlot(_) => StateErrorCode::NoTargetSlot,
            Self::NoRepository(_) => StateErrorCode::NoRepository,
            Self::InvalidTimestamp(_) => StateErrorCode::InvalidTimestamp,
            Self::InvalidLocale(_) => StateErrorCode::InvalidLocale,
            Self::InvalidRecord(_) => StateErrorCode::InvalidRecord,
            Self::InvalidConfig(_) => StateErrorCode::InvalidConfig,
        }
    }

    pub fn code(&self) -> i32 {
        self.error_code().code()
    }
}

/// Result alias used throughout the request-state crates.
pub type StateResult<T> = Result<T, StateError>;
