//! Job records and the other small value types that travel over the
//! framed channels.

use std::time::{Duration, Instant};

/// A job id, assigned by the feeder in strictly increasing, gap-free order
/// starting at 0.
pub type JobId = u64;

/// A pair of wall-clock instants bracketing some interval of work.
#[derive(Debug, Clone, Copy)]
pub struct TimeSpan {
    pub start: Instant,
    pub end: Instant,
}

impl TimeSpan {
    pub fn new(start: Instant, end: Instant) -> Self {
        Self { start, end }
    }

    pub fn elapsed(&self) -> Duration {
        self.end.saturating_duration_since(self.start)
    }
}

/// A single unit of work, immutable once the feeder has stamped it.
///
/// `A` is the caller's argument type; the original's separate positional
/// and named argument lists collapse into this single generic field, since
/// Rust has no runtime `*args`/`**kwargs` equivalent — callers model a job's
/// arguments as a struct or tuple of their choosing.
#[derive(Debug, Clone)]
pub struct Job<A> {
    pub id: JobId,
    pub args: A,
    /// Wall-clock interval bracketing the generator call that produced this
    /// job (before the generator was asked, after it yielded).
    pub gen_time: TimeSpan,
}

/// The per-job result emitted by a plain (non-stacking) worker.
#[derive(Debug, Clone)]
pub struct WorkerOutput<Ans> {
    pub jobid: JobId,
    pub answer: Ans,
    pub gen_time: TimeSpan,
    pub proc_time: TimeSpan,
}

/// The cumulative result emitted by a [`crate::stacker::Stacker`] at
/// shutdown, and by [`crate::mapper::StackMapper::stack`] as the grand
/// total.
#[derive(Debug, Clone)]
pub struct StackerOutput<Ans> {
    pub stacker_name: String,
    pub jobids: Vec<JobId>,
    /// `None` represents the combine operation's identity — no job has been
    /// folded in yet.
    pub answer: Option<Ans>,
    pub gen_time_total: Duration,
    pub proc_time_total: Duration,
}

impl<Ans> StackerOutput<Ans> {
    pub fn identity(stacker_name: impl Into<String>) -> Self {
        Self {
            stacker_name: stacker_name.into(),
            jobids: Vec::new(),
            answer: None,
            gen_time_total: Duration::ZERO,
            proc_time_total: Duration::ZERO,
        }
    }

    /// Combine two partials with the user-supplied associative (and, in
    /// practice, commutative — see spec.md §9) combine function. The
    /// identity case (either side has no answer yet) yields the other
    /// operand untouched.
    pub fn combine(mut self, other: Self, combine: &impl Fn(Ans, Ans) -> Ans) -> Self {
        self.jobids.extend(other.jobids);
        self.gen_time_total += other.gen_time_total;
        self.proc_time_total += other.proc_time_total;
        self.answer = match (self.answer.take(), other.answer) {
            (None, None) => None,
            (Some(a), None) => Some(a),
            (None, Some(b)) => Some(b),
            (Some(a), Some(b)) => Some(combine(a, b)),
        };
        self
    }
}
