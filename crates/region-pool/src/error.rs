//! Error reporting for pool operations.
//!
//! No pool error is fatal. Every operation exists in a `try_*` form that
//! returns [`PoolError`], and in a plain form that refuses the request
//! (`None`, `0` or a no-op) after handing the error to the pool's
//! [`DiagnosticHook`].

use core::fmt;

use derive_more::IsVariant;
use snafu::{GenerateImplicitData, Snafu};

use crate::region::PoolId;

/// Source location where an error was raised.
///
/// A thin wrapper over the `&'static` value returned by
/// [`core::panic::Location::caller`], plugged into snafu through
/// [`GenerateImplicitData`] so every `#[snafu(implicit)]` field records the
/// call site of the context selector. Unlike `snafu::Location` it keeps the
/// reference instead of copying file, line and column out of it.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Location(&'static core::panic::Location<'static>);

impl Default for Location {
    #[track_caller]
    fn default() -> Self {
        Self(core::panic::Location::caller())
    }
}

impl GenerateImplicitData for Location {
    #[track_caller]
    fn generate() -> Self {
        Self::default()
    }
}

impl fmt::Debug for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&self.0, f)
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

/// Errors raised by slab and arena pool operations.
#[derive(Debug, Snafu, IsVariant)]
#[snafu(visibility(pub(crate)))]
#[non_exhaustive]
pub enum PoolError {
    /// The region or parameters given at construction cannot host a pool.
    ///
    /// The pool is left inert.
    #[snafu(display("invalid pool configuration: {reason}"))]
    InvalidConfiguration {
        reason: &'static str,
        #[snafu(implicit)]
        location: Location,
    },
    /// No free slot or block can satisfy the request.
    #[snafu(display("pool exhausted, cannot satisfy {requested} bytes"))]
    ExhaustedCapacity {
        requested: usize,
        #[snafu(implicit)]
        location: Location,
    },
    /// A pointer does not resolve to memory handed out by this pool.
    ///
    /// Nothing was written through the pointer.
    #[snafu(display("pointer {address:#x} was not allocated by this pool"))]
    ForeignOrCorruptPointer {
        address: usize,
        #[snafu(implicit)]
        location: Location,
    },
    /// The pool's bookkeeping or block chain is inconsistent.
    ///
    /// The operation was aborted before mutating anything.
    #[snafu(display("pool invariant violated: {reason}"))]
    StructuralInvariantViolation {
        reason: &'static str,
        #[snafu(implicit)]
        location: Location,
    },
    /// A request or release size of zero, or larger than the block it names.
    #[snafu(display("invalid request size: {size}"))]
    InvalidRequest {
        size: usize,
        #[snafu(implicit)]
        location: Location,
    },
}

impl PoolError {
    /// Returns where the error was raised.
    #[must_use]
    pub fn location(&self) -> Location {
        match self {
            Self::InvalidConfiguration { location, .. }
            | Self::ExhaustedCapacity { location, .. }
            | Self::ForeignOrCorruptPointer { location, .. }
            | Self::StructuralInvariantViolation { location, .. }
            | Self::InvalidRequest { location, .. } => *location,
        }
    }
}

/// Callback invoked whenever a plain (non-`try_*`) operation refuses a
/// request.
pub type DiagnosticHook = fn(&PoolError);

/// Per-pool diagnostic routing: logs refused operations and forwards them
/// to the caller's hook, if any.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct Diagnostics {
    hook: Option<DiagnosticHook>,
}

impl Diagnostics {
    pub(crate) const fn new() -> Self {
        Self { hook: None }
    }

    pub(crate) fn set_hook(&mut self, hook: Option<DiagnosticHook>) {
        self.hook = hook;
    }

    pub(crate) fn report(&self, pool: Option<PoolId>, op: &'static str, err: &PoolError) {
        match (err, pool) {
            (
                PoolError::ForeignOrCorruptPointer { .. }
                | PoolError::StructuralInvariantViolation { .. },
                Some(pool),
            ) => log::warn!("{pool}: {op} refused: {err} (at {})", err.location()),
            (
                PoolError::ForeignOrCorruptPointer { .. }
                | PoolError::StructuralInvariantViolation { .. },
                None,
            ) => log::warn!("inert pool: {op} refused: {err} (at {})", err.location()),
            (_, Some(pool)) => log::debug!("{pool}: {op} refused: {err}"),
            (_, None) => log::debug!("inert pool: {op} refused: {err}"),
        }
        if let Some(hook) = self.hook {
            hook(err);
        }
    }
}
