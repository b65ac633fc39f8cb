//! The worker: one of N isolated executors draining `InputQ`, invoking the
//! target, and enqueuing results on `OutputQ`.

use std::collections::HashSet;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread;
use std::time::Instant;

use proton_affinity::Affinity;
use tracing::{debug, error, warn};

use crate::envelope::{InEnvelope, OutEnvelope};
use crate::error::{FailureKind, FatalReason, WorkerFailure};
use crate::job::{JobId, TimeSpan, WorkerOutput};
use crate::message::MessageSender;
use crate::target::Invoke;
use crate::worker_handle::{SharedLock, WorkerHandle};

/// Construction-time parameters for one worker, distinct per worker only in
/// `name` and `seed`.
pub(crate) struct WorkerConfig<K> {
    pub name: String,
    pub seed: u64,
    pub lock: Option<SharedLock>,
    pub ignore: Arc<HashSet<K>>,
}

pub(crate) fn spawn_worker<A, Ans, E, T>(
    config: WorkerConfig<E::Kind>,
    target: T,
    input_rx: flume::Receiver<InEnvelope<A>>,
    input_tx: flume::Sender<InEnvelope<A>>,
    output_tx: flume::Sender<OutEnvelope<Ans, E::Kind, E>>,
    messages: MessageSender,
    affinity: Option<Affinity>,
    child_index: usize,
) -> thread::JoinHandle<()>
where
    A: Send + 'static,
    Ans: Send + 'static,
    E: FailureKind,
    T: Invoke<A, Ans, E>,
{
    thread::Builder::new()
        .name(config.name.clone())
        .spawn(move || {
            run_worker(
                config, target, input_rx, input_tx, output_tx, messages, affinity, child_index,
            )
        })
        .expect("failed to spawn worker thread")
}

fn run_worker<A, Ans, E, T>(
    config: WorkerConfig<E::Kind>,
    target: T,
    input_rx: flume::Receiver<InEnvelope<A>>,
    input_tx: flume::Sender<InEnvelope<A>>,
    output_tx: flume::Sender<OutEnvelope<Ans, E::Kind, E>>,
    messages: MessageSender,
    affinity: Option<Affinity>,
    child_index: usize,
) where
    A: Send + 'static,
    Ans: Send + 'static,
    E: FailureKind,
    T: Invoke<A, Ans, E>,
{
    if let Some(affinity) = affinity {
        proton_affinity::pin_current_thread(affinity, child_index);
    }

    let WorkerConfig {
        name,
        seed,
        lock,
        ignore,
    } = config;

    let handle = WorkerHandle::new(name.clone(), seed, messages, lock);

    loop {
        let Ok(envelope) = input_rx.recv() else {
            // InputQ disconnected out from under us (forced teardown). Stop.
            return;
        };

        match envelope {
            InEnvelope::EndingSignal => {
                debug!(worker = %name, "observed EndingSignal, passing it on");
                handle.communicate("done");
                let _ = input_tx.send(InEnvelope::EndingSignal);
                let _ = output_tx.send(OutEnvelope::EndingSignal);
                return;
            }
            InEnvelope::GeneratorError(message) => {
                warn!(worker = %name, "forwarding generator failure");
                let _ = input_tx.send(InEnvelope::EndingSignal);
                let _ = output_tx.send(OutEnvelope::GeneratorError(message));
                return;
            }
            InEnvelope::Job(job) => {
                let jobid: JobId = job.id;
                let start = Instant::now();
                let result = panic::catch_unwind(AssertUnwindSafe(|| target.invoke(&handle, &job)));
                let end = Instant::now();
                let proc_time = TimeSpan::new(start, end);

                match result {
                    Ok(Ok(answer)) => {
                        debug!(worker = %name, jobid, "job succeeded");
                        let output = WorkerOutput {
                            jobid,
                            answer,
                            gen_time: job.gen_time,
                            proc_time,
                        };
                        if output_tx.send(OutEnvelope::WorkerOutput(output)).is_err() {
                            return;
                        }
                    }
                    Ok(Err(value)) => {
                        let kind = value.kind();
                        let trace = format!("{name} job {jobid} failed: {value}\n{value:?}");
                        error!(worker = %name, jobid, kind = ?kind, "target returned an error");
                        let ignorable = ignore.contains(&kind);
                        let failure = WorkerFailure {
                            kind: kind.clone(),
                            value,
                            trace,
                            ignorable,
                        };
                        if output_tx.send(OutEnvelope::WorkerError(failure)).is_err() {
                            return;
                        }
                        if !ignorable {
                            let _ = input_tx.send(InEnvelope::EndingSignal);
                            return;
                        }
                        warn!(worker = %name, jobid, "ignored failure, continuing");
                    }
                    Err(panic_payload) => {
                        let message = panic_message(&panic_payload);
                        error!(worker = %name, jobid, panic = %message, "target panicked");
                        let _ = output_tx.send(OutEnvelope::Fatal(FatalReason::Panic(format!(
                            "{name} job {jobid}: {message}"
                        ))));
                        let _ = input_tx.send(InEnvelope::EndingSignal);
                        return;
                    }
                }

                handle.communicate(format!("finished job {jobid}"));
            }
        }
    }
}

pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
