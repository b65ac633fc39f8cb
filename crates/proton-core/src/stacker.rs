//! The stacker: a worker variant used by stack mode that locally reduces its
//! results via an associative combine instead of emitting one output per job.

use std::collections::HashSet;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread;

use proton_affinity::Affinity;
use tracing::{debug, error, warn};

use crate::envelope::{InEnvelope, OutEnvelope};
use crate::error::{FailureKind, FatalReason, WorkerFailure};
use crate::job::{JobId, StackerOutput};
use crate::message::MessageSender;
use crate::target::Invoke;
use crate::worker::WorkerConfig;
use crate::worker_handle::WorkerHandle;

pub(crate) fn spawn_stacker<A, Ans, E, T>(
    config: WorkerConfig<E::Kind>,
    target: T,
    combine: Arc<dyn Fn(Ans, Ans) -> Ans + Send + Sync>,
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
            run_stacker(
                config, target, combine, input_rx, input_tx, output_tx, messages, affinity,
                child_index,
            )
        })
        .expect("failed to spawn stacker thread")
}

fn run_stacker<A, Ans, E, T>(
    config: WorkerConfig<E::Kind>,
    target: T,
    combine: Arc<dyn Fn(Ans, Ans) -> Ans + Send + Sync>,
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
    let mut partial: StackerOutput<Ans> = StackerOutput::identity(name.clone());

    loop {
        let Ok(envelope) = input_rx.recv() else {
            return;
        };

        match envelope {
            InEnvelope::EndingSignal => {
                debug!(stacker = %name, "observed EndingSignal, passing it on");
                if partial.answer.is_some() {
                    let _ = output_tx.send(OutEnvelope::StackerOutput(partial));
                    partial = StackerOutput::identity(name.clone());
                }
                handle.communicate("done");
                let _ = input_tx.send(InEnvelope::EndingSignal);
                let _ = output_tx.send(OutEnvelope::EndingSignal);
                return;
            }
            InEnvelope::GeneratorError(message) => {
                warn!(stacker = %name, "forwarding generator failure");
                let _ = input_tx.send(InEnvelope::EndingSignal);
                let _ = output_tx.send(OutEnvelope::GeneratorError(message));
                return;
            }
            InEnvelope::Job(job) => {
                let jobid: JobId = job.id;
                let gen_time = job.gen_time;
                let start = std::time::Instant::now();
                let result = panic::catch_unwind(AssertUnwindSafe(|| target.invoke(&handle, &job)));
                let end = std::time::Instant::now();
                let proc_time = crate::job::TimeSpan::new(start, end);

                match result {
                    Ok(Ok(answer)) => {
                        debug!(stacker = %name, jobid, "job folded into partial");
                        let single = StackerOutput {
                            stacker_name: name.clone(),
                            jobids: vec![jobid],
                            answer: Some(answer),
                            gen_time_total: gen_time.elapsed(),
                            proc_time_total: proc_time.elapsed(),
                        };
                        partial = partial.combine(single, combine.as_ref());
                    }
                    Ok(Err(value)) => {
                        let kind = value.kind();
                        let trace = format!("{name} job {jobid} failed: {value}\n{value:?}");
                        error!(stacker = %name, jobid, kind = ?kind, "target returned an error");
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
                        warn!(stacker = %name, jobid, "ignored failure, skipping job");
                    }
                    Err(panic_payload) => {
                        let message = crate::worker::panic_message(&panic_payload);
                        error!(stacker = %name, jobid, panic = %message, "target panicked");
                        let _ = output_tx.send(OutEnvelope::Fatal(FatalReason::Panic(format!(
                            "{name} job {jobid}: {message}"
                        ))));
                        let _ = input_tx.send(InEnvelope::EndingSignal);
                        return;
                    }
                }
            }
        }
    }
}
