//! The tagged-variant control envelopes that travel on `InputQ` and
//! `OutputQ`.

use crate::error::{FatalReason, WorkerFailure};
use crate::job::{Job, StackerOutput, WorkerOutput};

/// What travels on `InputQ`: jobs, a terminal generator failure, or the
/// end-of-stream marker.
pub(crate) enum InEnvelope<A> {
    Job(Job<A>),
    GeneratorError(String),
    EndingSignal,
}

/// What travels on `OutputQ`.
pub(crate) enum OutEnvelope<Ans, K, E> {
    WorkerOutput(WorkerOutput<Ans>),
    StackerOutput(StackerOutput<Ans>),
    WorkerError(WorkerFailure<K, E>),
    GeneratorError(String),
    Fatal(FatalReason),
    EndingSignal,
}
