//! Error taxonomy for the dispatch pipeline.
//!
//! Every fatal condition the pipeline can surface funnels through
//! [`ProtonError`]. Non-fatal, ignorable target failures never reach this
//! type directly — they are logged and swallowed by the controller's drain
//! loop, per the ignore-exceptions contract.

use std::fmt;

use thiserror::Error;

/// Construction-time validation failures.
///
/// Raised synchronously when a [`crate::mapper::Mapper`] or
/// [`crate::mapper::StackMapper`] is built with an invalid option; never
/// raised mid-run.
#[derive(Debug, Error)]
pub enum ArgumentError {
    /// The `affinity` descriptor could not be parsed.
    #[error("invalid affinity descriptor: {0}")]
    BadAffinity(#[from] proton_affinity::AffinityParseError),

    /// Ordered-map mode was constructed with a non-empty `ignore_exceptions`
    /// set, which is forbidden to keep "strictly increasing `jobid`" simple.
    #[error("ordered map mode does not support ignore_exceptions")]
    OrderedWithIgnorableErrors,

    /// `nworkers` was zero.
    #[error("nworkers must be at least 1")]
    ZeroWorkers,
}

/// Why a worker-thread-local target invocation could not complete.
#[derive(Debug)]
pub struct WorkerFailure<K, E> {
    /// The classification of the failure, used to check against
    /// `ignore_exceptions`.
    pub kind: K,
    /// The user error value itself.
    pub value: E,
    /// A formatted trace, written verbatim to the error log file.
    pub trace: String,
    /// Whether the originating worker's `ignore_exceptions` set contained
    /// `kind`. Decided once, by the worker, from the same set the
    /// controller was constructed with — carried along so the controller
    /// does not need its own copy just to repeat the membership check.
    pub ignorable: bool,
}

/// A fatal condition that did not originate from the user's target at all:
/// either the target panicked, or a channel carried an envelope that should
/// be structurally impossible.
#[derive(Debug, Clone)]
pub enum FatalReason {
    /// The user's target function panicked instead of returning `Err`.
    Panic(String),
    /// An internal invariant was violated — always an implementation bug.
    Protocol(&'static str),
}

impl fmt::Display for FatalReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FatalReason::Panic(msg) => write!(f, "target panicked: {msg}"),
            FatalReason::Protocol(msg) => write!(f, "protocol violation: {msg}"),
        }
    }
}

/// The error surfaced to the caller from the controller's result stream.
#[derive(Debug, Error)]
pub enum ProtonError<K: fmt::Debug, E: std::error::Error> {
    /// Invalid construction option; see [`ArgumentError`].
    #[error("invalid argument: {0}")]
    Argument(#[from] ArgumentError),

    /// The job generator raised or yielded something unusable.
    #[error("job generator failed: {0}")]
    Generator(String),

    /// The target raised an un-ignored error while processing a job.
    #[error("worker failed with {kind:?}: {source}")]
    Worker {
        kind: K,
        #[source]
        source: E,
        trace: String,
    },

    /// The ordered-mode reassembly buffer exceeded its bound.
    #[error("waiting queue exceeded its capacity, out-of-order skew too large")]
    WaitingQueueFull,

    /// The target panicked, or an envelope violated the channel protocol.
    #[error("{0}")]
    Fatal(FatalReason),
}

impl<K: fmt::Debug, E: std::error::Error> From<FatalReason> for ProtonError<K, E> {
    fn from(reason: FatalReason) -> Self {
        ProtonError::Fatal(reason)
    }
}

impl<K: fmt::Debug, E: std::error::Error> ProtonError<K, E> {
    pub(crate) fn worker(failure: WorkerFailure<K, E>) -> Self {
        ProtonError::Worker {
            kind: failure.kind,
            source: failure.value,
            trace: failure.trace,
        }
    }
}

/// A target error type must classify itself so the controller can compare
/// it against the caller's `ignore_exceptions` set.
///
/// This is the idiomatic stand-in for the original's `issubclass(exception,
/// Exception)` checks: instead of comparing exception *types* at runtime,
/// the caller picks a `Kind` enum (or any `Eq + Hash` type) up front and
/// implements this trait once for their error type.
pub trait FailureKind: std::error::Error + Send + 'static {
    /// The classification used for `ignore_exceptions` membership checks.
    type Kind: Eq + std::hash::Hash + Clone + fmt::Debug + Send + Sync + 'static;

    /// Classify this failure instance.
    fn kind(&self) -> Self::Kind;
}
