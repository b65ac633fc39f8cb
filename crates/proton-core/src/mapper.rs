//! The controller: spawns, supervises, routes, and tears down the pipeline,
//! and is itself the lazy producer the caller iterates.

use std::collections::HashSet;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::sync::Arc;
use std::thread;

use proton_affinity::Affinity;
use rand::Rng;

use crate::envelope::OutEnvelope;
use crate::error::{ArgumentError, FailureKind, FatalReason, ProtonError, WorkerFailure};
use crate::job::{Job, StackerOutput, WorkerOutput};
use crate::message::MessageSender;
use crate::reorder::{OrderedItem, ReorderBuffer};
use crate::target::{Invoke, Plain, WithWorker};
use crate::worker::WorkerConfig;
use crate::worker_handle::{SharedLock, WorkerHandle};

const ERROR_LOG_PATH: &str = "protonerrors.log";
/// How far ahead of `expected` the ordered buffer may grow. Chosen as a
/// multiple of the channel capacity: out-of-order skew beyond a few times
/// the number of in-flight jobs indicates a pathological job mix rather
/// than ordinary scheduling jitter.
const REORDER_BOUND_FACTOR: usize = 64;

/// Construction options shared by every controller variant, mirroring
/// spec.md §6's option table.
pub struct Options<K> {
    pub nworkers: Option<usize>,
    pub affinity: Option<String>,
    pub lock: Option<SharedLock>,
    pub verbose: bool,
    pub lowpriority: bool,
    pub ignore_exceptions: HashSet<K>,
}

impl<K> Default for Options<K> {
    fn default() -> Self {
        Self {
            nworkers: None,
            affinity: None,
            lock: None,
            verbose: false,
            lowpriority: false,
            ignore_exceptions: HashSet::new(),
        }
    }
}

/// What one `pull()` from the output side yielded.
enum Pulled<Ans> {
    Output(WorkerOutput<Ans>),
    Stacked(StackerOutput<Ans>),
}

/// Shared lifecycle/drain machinery for [`Mapper`] and [`StackMapper`].
struct PipelineCore<Ans, E: FailureKind> {
    output_rx: flume::Receiver<OutEnvelope<Ans, E::Kind, E>>,
    message_tx: MessageSender,
    nactive: usize,
    error_log: Option<File>,
    ended_cleanly: bool,
    feeder: Option<thread::JoinHandle<()>>,
    workers: Vec<thread::JoinHandle<()>>,
    printer: Option<thread::JoinHandle<()>>,
}

impl<Ans, E: FailureKind> Drop for PipelineCore<Ans, E> {
    fn drop(&mut self) {
        // Close the message channel first so the printer can wind down
        // regardless of which exit path we took.
        self.message_tx.close();

        if self.ended_cleanly {
            if let Some(feeder) = self.feeder.take() {
                let _ = feeder.join();
            }
            for worker in self.workers.drain(..) {
                let _ = worker.join();
            }
            if let Some(printer) = self.printer.take() {
                let _ = printer.join();
            }
        }
        // Error / early-exit path: `output_rx` and `message_tx` are about to
        // be dropped along with `self`, which disconnects every remaining
        // channel end. Any worker blocked on a send observes that and
        // unwinds its loop on its own; we do not join or signal it further,
        // per the best-effort forced-termination design recorded in
        // DESIGN.md.
    }
}

impl<Ans, E: FailureKind> PipelineCore<Ans, E> {
    fn pull(&mut self) -> Option<Result<Pulled<Ans>, ProtonError<E::Kind, E>>> {
        loop {
            if self.nactive == 0 {
                return None;
            }

            let envelope = match self.output_rx.recv() {
                Ok(envelope) => envelope,
                Err(_) => {
                    self.nactive = 0;
                    self.ended_cleanly = true;
                    return None;
                }
            };

            match envelope {
                OutEnvelope::EndingSignal => {
                    self.nactive -= 1;
                    tracing::debug!(remaining = self.nactive, "observed worker EndingSignal");
                    if self.nactive == 0 {
                        self.ended_cleanly = true;
                        return None;
                    }
                }
                OutEnvelope::GeneratorError(message) => {
                    return Some(Err(ProtonError::Generator(message)));
                }
                OutEnvelope::WorkerError(failure) => {
                    self.log_failure(&failure);
                    if failure.ignorable {
                        continue;
                    }
                    return Some(Err(ProtonError::worker(failure)));
                }
                OutEnvelope::Fatal(reason) => {
                    return Some(Err(ProtonError::Fatal(reason)));
                }
                OutEnvelope::WorkerOutput(output) => {
                    return Some(Ok(Pulled::Output(output)));
                }
                OutEnvelope::StackerOutput(output) => {
                    return Some(Ok(Pulled::Stacked(output)));
                }
            }
        }
    }

    fn log_failure(&mut self, failure: &WorkerFailure<E::Kind, E>) {
        let Some(file) = self.error_log.as_mut() else {
            return;
        };
        if let Err(err) = writeln!(file, "{}", failure.trace) {
            tracing::warn!(error = %err, path = ERROR_LOG_PATH, "failed to write to error log");
        }
    }
}

/// Everything needed before the per-variant worker/stacker threads are
/// spawned: channels, the feeder, the printer, applied OS tuning, and the
/// per-worker name/seed assignment.
struct Setup<A, Ans, E: FailureKind> {
    input_rx: flume::Receiver<crate::envelope::InEnvelope<A>>,
    input_tx: flume::Sender<crate::envelope::InEnvelope<A>>,
    output_tx: flume::Sender<OutEnvelope<Ans, E::Kind, E>>,
    output_rx: flume::Receiver<OutEnvelope<Ans, E::Kind, E>>,
    message_sender: MessageSender,
    feeder: thread::JoinHandle<()>,
    printer: thread::JoinHandle<()>,
    names_seeds: Vec<(String, u64)>,
    affinity: Option<Affinity>,
    error_log: Option<File>,
}

fn setup<A, Ans, E, I>(
    jobs: I,
    options: &Options<E::Kind>,
) -> Result<Setup<A, Ans, E>, ProtonError<E::Kind, E>>
where
    A: Send + 'static,
    Ans: Send + 'static,
    E: FailureKind,
    I: Iterator<Item = Result<A, String>> + Send + 'static,
{
    let nworkers = match options.nworkers {
        Some(0) => return Err(ArgumentError::ZeroWorkers.into()),
        Some(n) => n,
        None => std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1),
    };

    let affinity = match &options.affinity {
        Some(descriptor) => Some(Affinity::parse(descriptor).map_err(ArgumentError::BadAffinity)?),
        None => None,
    };

    let (input_tx, input_rx) = flume::bounded(nworkers);
    let (output_tx, output_rx) = flume::bounded(nworkers);
    let (message_tx, message_rx) = flume::bounded(1000);
    let message_sender = MessageSender::new(message_tx);

    let mut host_rng = rand::rng();
    let names_seeds: Vec<(String, u64)> = (0..nworkers)
        .map(|i| (format!("Worker_{i:04}"), host_rng.random::<u64>()))
        .collect();

    let feeder = crate::feeder::spawn_feeder(
        jobs,
        input_tx.clone(),
        message_sender.clone(),
        affinity.clone(),
        nworkers,
    );
    let printer = crate::printer::spawn_printer(
        message_rx,
        options.verbose,
        affinity.clone(),
        nworkers + 1,
    );

    if options.lowpriority {
        if let Err(err) = proton_affinity::lower_current_process_group_priority() {
            tracing::warn!(error = %err, "failed to lower process group priority");
        }
    }

    let error_log = match OpenOptions::new().create(true).append(true).open(ERROR_LOG_PATH) {
        Ok(file) => Some(file),
        Err(err) => {
            tracing::warn!(error = %err, path = ERROR_LOG_PATH, "failed to open error log, worker errors will not be persisted");
            None
        }
    };

    Ok(Setup {
        input_rx,
        input_tx,
        output_tx,
        output_rx,
        message_sender,
        feeder,
        printer,
        names_seeds,
        affinity,
        error_log,
    })
}

/// Unordered (async) map mode. A lazy producer of [`WorkerOutput`]s.
pub struct Mapper<Ans, E: FailureKind> {
    core: PipelineCore<Ans, E>,
    had_ignore_exceptions: bool,
}

impl<Ans, E> Mapper<Ans, E>
where
    Ans: Send + 'static,
    E: FailureKind,
{
    pub fn new<A, I, F>(
        jobs: I,
        target: F,
        options: Options<E::Kind>,
    ) -> Result<Self, ProtonError<E::Kind, E>>
    where
        A: Send + 'static,
        I: Iterator<Item = Result<A, String>> + Send + 'static,
        F: Fn(&Job<A>) -> Result<Ans, E> + Clone + Send + 'static,
    {
        Self::build(jobs, Plain(target), options)
    }

    pub fn new_with_worker<A, I, F>(
        jobs: I,
        target: F,
        options: Options<E::Kind>,
    ) -> Result<Self, ProtonError<E::Kind, E>>
    where
        A: Send + 'static,
        I: Iterator<Item = Result<A, String>> + Send + 'static,
        F: Fn(&WorkerHandle, &Job<A>) -> Result<Ans, E> + Clone + Send + 'static,
    {
        Self::build(jobs, WithWorker(target), options)
    }

    fn build<A, I, T>(
        jobs: I,
        target: T,
        options: Options<E::Kind>,
    ) -> Result<Self, ProtonError<E::Kind, E>>
    where
        A: Send + 'static,
        I: Iterator<Item = Result<A, String>> + Send + 'static,
        T: Invoke<A, Ans, E>,
    {
        let setup = setup::<A, Ans, E, I>(jobs, &options)?;
        let had_ignore_exceptions = !options.ignore_exceptions.is_empty();
        let ignore = Arc::new(options.ignore_exceptions);
        let nworkers = setup.names_seeds.len();

        let mut workers = Vec::with_capacity(nworkers);
        for (index, (name, seed)) in setup.names_seeds.into_iter().enumerate() {
            let config = WorkerConfig {
                name,
                seed,
                lock: options.lock.clone(),
                ignore: ignore.clone(),
            };
            workers.push(crate::worker::spawn_worker(
                config,
                target.clone(),
                setup.input_rx.clone(),
                setup.input_tx.clone(),
                setup.output_tx.clone(),
                setup.message_sender.clone(),
                setup.affinity.clone(),
                index,
            ));
        }
        drop(setup.input_tx);
        drop(setup.input_rx);
        drop(setup.output_tx);

        Ok(Self {
            core: PipelineCore {
                output_rx: setup.output_rx,
                message_tx: setup.message_sender,
                nactive: nworkers,
                error_log: setup.error_log,
                ended_cleanly: false,
                feeder: Some(setup.feeder),
                workers,
                printer: Some(setup.printer),
            },
            had_ignore_exceptions,
        })
    }

    /// Wrap this already-running mapper so iteration yields results in
    /// strict `jobid` order. Fails if `ignore_exceptions` was non-empty, per
    /// spec.md §4.7 — but by this point the pipeline has already been
    /// spawned; prefer [`OrderedMapper::new`] to validate first.
    pub fn ordered(self) -> Result<OrderedMapper<Ans, E>, ProtonError<E::Kind, E>> {
        if self.had_ignore_exceptions {
            return Err(ArgumentError::OrderedWithIgnorableErrors.into());
        }
        Ok(self.into_ordered_unchecked())
    }

    fn into_ordered_unchecked(self) -> OrderedMapper<Ans, E> {
        let bound = self.core.workers.len().max(1) * REORDER_BOUND_FACTOR;
        OrderedMapper {
            inner: self,
            buffer: ReorderBuffer::new(bound),
            pending: Vec::new(),
        }
    }
}

impl<Ans, E> Iterator for Mapper<Ans, E>
where
    Ans: Send + 'static,
    E: FailureKind,
{
    type Item = Result<WorkerOutput<Ans>, ProtonError<E::Kind, E>>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.core.pull()? {
            Ok(Pulled::Output(output)) => Some(Ok(output)),
            Ok(Pulled::Stacked(_)) => Some(Err(
                FatalReason::Protocol("map mode received a StackerOutput").into(),
            )),
            Err(err) => Some(Err(err)),
        }
    }
}

/// Ordered (sync) map mode: restores strict `jobid` order over an
/// underlying [`Mapper`].
pub struct OrderedMapper<Ans, E: FailureKind> {
    inner: Mapper<Ans, E>,
    buffer: ReorderBuffer<Ans>,
    pending: Vec<OrderedItem<Ans>>,
}

impl<Ans, E> OrderedMapper<Ans, E>
where
    Ans: Send + 'static,
    E: FailureKind,
{
    /// Construct ordered-map mode directly. Validates `ignore_exceptions`
    /// and fails before any worker is spawned, per spec.md §4.7 — unlike
    /// [`Mapper::ordered`], which wraps an already-running [`Mapper`].
    pub fn new<A, I, F>(
        jobs: I,
        target: F,
        options: Options<E::Kind>,
    ) -> Result<Self, ProtonError<E::Kind, E>>
    where
        A: Send + 'static,
        I: Iterator<Item = Result<A, String>> + Send + 'static,
        F: Fn(&Job<A>) -> Result<Ans, E> + Clone + Send + 'static,
    {
        if !options.ignore_exceptions.is_empty() {
            return Err(ArgumentError::OrderedWithIgnorableErrors.into());
        }
        let mapper = Mapper::build(jobs, Plain(target), options)?;
        Ok(mapper.into_ordered_unchecked())
    }

    /// `worker`-aware counterpart of [`OrderedMapper::new`].
    pub fn new_with_worker<A, I, F>(
        jobs: I,
        target: F,
        options: Options<E::Kind>,
    ) -> Result<Self, ProtonError<E::Kind, E>>
    where
        A: Send + 'static,
        I: Iterator<Item = Result<A, String>> + Send + 'static,
        F: Fn(&WorkerHandle, &Job<A>) -> Result<Ans, E> + Clone + Send + 'static,
    {
        if !options.ignore_exceptions.is_empty() {
            return Err(ArgumentError::OrderedWithIgnorableErrors.into());
        }
        let mapper = Mapper::build(jobs, WithWorker(target), options)?;
        Ok(mapper.into_ordered_unchecked())
    }
}

impl<Ans, E> Iterator for OrderedMapper<Ans, E>
where
    Ans: Send + 'static,
    E: FailureKind,
{
    type Item = Result<OrderedItem<Ans>, ProtonError<E::Kind, E>>;

    fn next(&mut self) -> Option<Self::Item> {
        if !self.pending.is_empty() {
            return Some(Ok(self.pending.remove(0)));
        }

        loop {
            match self.inner.next() {
                Some(Ok(output)) => match self.buffer.accept(output) {
                    Ok(mut ready) => {
                        if ready.is_empty() {
                            continue;
                        }
                        let first = ready.remove(0);
                        self.pending.extend(ready);
                        return Some(Ok(first));
                    }
                    Err(err) => return Some(Err(err)),
                },
                Some(Err(err)) => return Some(Err(err)),
                None => {
                    let mut drained = self.buffer.drain_on_exhaustion();
                    if drained.is_empty() {
                        return None;
                    }
                    let first = drained.remove(0);
                    self.pending.extend(drained);
                    return Some(Ok(first));
                }
            }
        }
    }
}

/// Stack mode: workers locally reduce with an associative combine; the
/// controller performs the final reduction across stackers.
pub struct StackMapper<Ans, E: FailureKind> {
    core: PipelineCore<Ans, E>,
    combine: Arc<dyn Fn(Ans, Ans) -> Ans + Send + Sync>,
}

impl<Ans, E> StackMapper<Ans, E>
where
    Ans: Send + 'static,
    E: FailureKind,
{
    pub fn new<A, I, F>(
        jobs: I,
        target: F,
        combine: impl Fn(Ans, Ans) -> Ans + Send + Sync + 'static,
        options: Options<E::Kind>,
    ) -> Result<Self, ProtonError<E::Kind, E>>
    where
        A: Send + 'static,
        I: Iterator<Item = Result<A, String>> + Send + 'static,
        F: Fn(&Job<A>) -> Result<Ans, E> + Clone + Send + 'static,
    {
        Self::build(jobs, Plain(target), combine, options)
    }

    pub fn new_with_worker<A, I, F>(
        jobs: I,
        target: F,
        combine: impl Fn(Ans, Ans) -> Ans + Send + Sync + 'static,
        options: Options<E::Kind>,
    ) -> Result<Self, ProtonError<E::Kind, E>>
    where
        A: Send + 'static,
        I: Iterator<Item = Result<A, String>> + Send + 'static,
        F: Fn(&WorkerHandle, &Job<A>) -> Result<Ans, E> + Clone + Send + 'static,
    {
        Self::build(jobs, WithWorker(target), combine, options)
    }

    fn build<A, I, T>(
        jobs: I,
        target: T,
        combine: impl Fn(Ans, Ans) -> Ans + Send + Sync + 'static,
        options: Options<E::Kind>,
    ) -> Result<Self, ProtonError<E::Kind, E>>
    where
        A: Send + 'static,
        I: Iterator<Item = Result<A, String>> + Send + 'static,
        T: Invoke<A, Ans, E>,
    {
        let setup = setup::<A, Ans, E, I>(jobs, &options)?;
        let ignore = Arc::new(options.ignore_exceptions);
        let combine: Arc<dyn Fn(Ans, Ans) -> Ans + Send + Sync> = Arc::new(combine);
        let nworkers = setup.names_seeds.len();

        let mut workers = Vec::with_capacity(nworkers);
        for (index, (name, seed)) in setup.names_seeds.into_iter().enumerate() {
            let config = WorkerConfig {
                name,
                seed,
                lock: options.lock.clone(),
                ignore: ignore.clone(),
            };
            workers.push(crate::stacker::spawn_stacker(
                config,
                target.clone(),
                combine.clone(),
                setup.input_rx.clone(),
                setup.input_tx.clone(),
                setup.output_tx.clone(),
                setup.message_sender.clone(),
                setup.affinity.clone(),
                index,
            ));
        }
        drop(setup.input_tx);
        drop(setup.input_rx);
        drop(setup.output_tx);

        Ok(Self {
            core: PipelineCore {
                output_rx: setup.output_rx,
                message_tx: setup.message_sender,
                nactive: nworkers,
                error_log: setup.error_log,
                ended_cleanly: false,
                feeder: Some(setup.feeder),
                workers,
                printer: Some(setup.printer),
            },
            combine,
        })
    }

    /// Drain the pipeline and reduce every stacker's partial into one grand
    /// total, consuming the controller.
    pub fn stack(mut self) -> Result<StackerOutput<Ans>, ProtonError<E::Kind, E>> {
        let mut total: Option<StackerOutput<Ans>> = None;
        loop {
            match self.core.pull() {
                None => break,
                Some(Err(err)) => return Err(err),
                Some(Ok(Pulled::Output(_))) => {
                    return Err(FatalReason::Protocol("stack mode received a WorkerOutput").into());
                }
                Some(Ok(Pulled::Stacked(partial))) => {
                    total = Some(match total.take() {
                        None => partial,
                        Some(acc) => acc.combine(partial, self.combine.as_ref()),
                    });
                }
            }
        }
        Ok(total.unwrap_or_else(|| StackerOutput::identity("stack")))
    }
}
