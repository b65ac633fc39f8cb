//! The target adapter: wraps the user-supplied callable and knows whether
//! it expects a [`WorkerHandle`] as its first argument.
//!
//! spec.md §4.3 detects this by inspecting the target's parameter names at
//! construction time, a trick Rust has no equivalent for. Per spec.md §9
//! Design Notes, this workspace instead offers the explicit two-constructor
//! opt-in the notes recommend (`Mapper::new` vs `Mapper::new_with_worker`);
//! the distinction below is which of the two internal wrapper types the
//! caller's constructor produced.

use crate::job::Job;
use crate::worker_handle::WorkerHandle;

/// Internal dispatch trait unifying plain and worker-aware targets behind
/// one call signature. Each worker thread holds its own `Clone` of the
/// target, which is the Rust expression of spec.md §4.4's "each worker has
/// its own heavy read-only state" — cloning is cheap when that state is
/// wrapped in an `Arc`, and happens once at spawn, never per job.
pub trait Invoke<A, Ans, E>: Clone + Send + 'static {
    fn invoke(&self, worker: &WorkerHandle, job: &Job<A>) -> Result<Ans, E>;
}

/// Wraps a target that does not want a worker handle.
#[derive(Clone)]
pub struct Plain<F>(pub F);

impl<A, Ans, E, F> Invoke<A, Ans, E> for Plain<F>
where
    F: Fn(&Job<A>) -> Result<Ans, E> + Clone + Send + 'static,
{
    fn invoke(&self, _worker: &WorkerHandle, job: &Job<A>) -> Result<Ans, E> {
        (self.0)(job)
    }
}

/// Wraps a target that receives the worker handle as its first argument.
#[derive(Clone)]
pub struct WithWorker<F>(pub F);

impl<A, Ans, E, F> Invoke<A, Ans, E> for WithWorker<F>
where
    F: Fn(&WorkerHandle, &Job<A>) -> Result<Ans, E> + Clone + Send + 'static,
{
    fn invoke(&self, worker: &WorkerHandle, job: &Job<A>) -> Result<Ans, E> {
        (self.0)(worker, job)
    }
}
