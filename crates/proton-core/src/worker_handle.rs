//! The handle exposed to a target function that opted in to receiving the
//! worker (via `Mapper::new_with_worker` / `StackMapper::new_with_worker`).

use std::cell::{Cell, RefCell};
use std::sync::Arc;

use parking_lot::lock_api::RawMutex as _;
use parking_lot::RawMutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::message::{Message, MessageSender};

/// A cross-thread exclusion lock shared among every worker in a pipeline,
/// passed in via the `lock` construction option.
#[derive(Clone)]
pub struct SharedLock(Arc<RawMutex>);

impl SharedLock {
    pub fn new() -> Self {
        Self(Arc::new(RawMutex::INIT))
    }
}

impl Default for SharedLock {
    fn default() -> Self {
        Self::new()
    }
}

/// Per-worker state exposed to target functions registered with
/// `*_with_worker`.
///
/// Deliberately not `Sync`: a handle is created fresh for each worker
/// thread and never shared across threads, so its interior mutability uses
/// plain `Cell`/`RefCell` rather than atomics or a mutex.
pub struct WorkerHandle {
    name: String,
    rng: RefCell<StdRng>,
    messages: MessageSender,
    lock: Option<SharedLock>,
    holding_lock: Cell<bool>,
}

impl WorkerHandle {
    pub(crate) fn new(
        name: String,
        seed: u64,
        messages: MessageSender,
        lock: Option<SharedLock>,
    ) -> Self {
        Self {
            name,
            rng: RefCell::new(StdRng::seed_from_u64(seed)),
            messages,
            lock,
            holding_lock: Cell::new(false),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// A deterministic pseudo-random value in `[0, 1)`, drawn from this
    /// worker's seeded RNG.
    pub fn rand(&self) -> f64 {
        self.rng.borrow_mut().random::<f64>()
    }

    /// `n` deterministic pseudo-random values in `[0, 1)`.
    pub fn rand_n(&self, n: usize) -> Vec<f64> {
        let mut rng = self.rng.borrow_mut();
        (0..n).map(|_| rng.random::<f64>()).collect()
    }

    /// Enqueue a progress message. Never blocks; dropped silently if
    /// `MessageQ` is full (see spec.md §4.1).
    pub fn communicate(&self, text: impl Into<String>) {
        self.messages
            .send(Message::new(self.name.clone(), text, None));
    }

    /// Acquire the shared lock.
    ///
    /// # Panics
    ///
    /// Panics if no lock was configured for this pipeline, or if this
    /// worker already holds it. Rust's `Result`-based error model has no
    /// slot for this in the caller's own error type, so misuse is treated
    /// the same way an internal protocol violation is: it unwinds the
    /// worker thread and is reported to the controller as a fatal,
    /// non-ignorable failure (see `FatalReason::Panic`).
    pub fn acquire(&self) {
        let Some(lock) = &self.lock else {
            panic!("cannot acquire the lock: no lock was provided when constructing the mapper");
        };
        if self.holding_lock.get() {
            panic!("{} already holds the lock", self.name);
        }
        lock.0.lock();
        self.holding_lock.set(true);
    }

    /// Release the shared lock.
    ///
    /// # Panics
    ///
    /// Panics if this worker does not currently hold the lock.
    pub fn release(&self) {
        if !self.holding_lock.get() {
            panic!("{} does not hold the lock", self.name);
        }
        // SAFETY: `holding_lock` guarantees this worker called `acquire`
        // and has not released since.
        unsafe {
            self.lock.as_ref().unwrap().0.unlock();
        }
        self.holding_lock.set(false);
    }
}
