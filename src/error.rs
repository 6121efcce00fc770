use thiserror::Error;

/// Recoverable failures from the hash table's public operations.
///
/// Programmer errors (unbalanced `read_lock`/`read_unlock`, unregistering a
/// thread that never registered, a bucket GC walking into a dummy where a
/// user node was expected) are not represented here: those are fatal and
/// surface as a panic, per the crate's propagation policy.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum LfhtError {
    /// `del` or `replace` targeted a node that was concurrently removed.
    #[error("node was concurrently removed")]
    NotFound,

    /// `create` was given an `init_size` that was neither 0 nor a power of two.
    #[error("initial size must be 0 or a power of two")]
    InvalidArg,

    /// `destroy` was called while user nodes remained in the table.
    #[error("table is not empty")]
    NonEmpty,
}

/// Failures from the grace-period engine's fallible entry points.
///
/// `read_lock`/`read_unlock`/`synchronize` never fail (misuse of them is
/// fatal, per the crate's propagation policy); only registering a reader
/// during teardown is recoverable.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum GpError {
    /// The engine is being torn down and can no longer accept new readers.
    #[error("engine is shutting down")]
    ShuttingDown,
}
