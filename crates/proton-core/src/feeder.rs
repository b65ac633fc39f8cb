//! The feeder: the single producer turning the caller's lazy job sequence
//! into `InputQ` envelopes.

use std::thread;
use std::time::Instant;

use tracing::{debug, error};

use proton_affinity::Affinity;

use crate::envelope::InEnvelope;
use crate::job::{Job, JobId, TimeSpan};
use crate::message::MessageSender;

/// Spawns the feeder thread.
///
/// `jobs` yields `Ok(args)` for each successfully produced job, or `Err(msg)`
/// once, terminally, if production failed — the closest Rust equivalent to
/// "the generator raised", since an `Iterator`'s `Item` type is fixed and a
/// single exception-typed failure can't interrupt it the way a Python
/// generator's `raise` can. Whichever variant `jobs` yields last before
/// ending the iteration is treated as the sequence's outcome: an `Err` stops
/// the feeder immediately and is reported as a `GeneratorError`.
pub(crate) fn spawn_feeder<A, I>(
    jobs: I,
    input_tx: flume::Sender<InEnvelope<A>>,
    messages: MessageSender,
    affinity: Option<Affinity>,
    child_index: usize,
) -> thread::JoinHandle<()>
where
    A: Send + 'static,
    I: Iterator<Item = Result<A, String>> + Send + 'static,
{
    thread::Builder::new()
        .name("proton-feeder".to_string())
        .spawn(move || run_feeder(jobs, input_tx, messages, affinity, child_index))
        .expect("failed to spawn feeder thread")
}

fn run_feeder<A, I>(
    jobs: I,
    input_tx: flume::Sender<InEnvelope<A>>,
    messages: MessageSender,
    affinity: Option<Affinity>,
    child_index: usize,
) where
    I: Iterator<Item = Result<A, String>>,
{
    if let Some(affinity) = affinity {
        proton_affinity::pin_current_thread(affinity, child_index);
    }

    let mut next_id: JobId = 0;
    let mut gen_start = Instant::now();

    for item in jobs {
        let gen_end = Instant::now();
        let gen_time = TimeSpan::new(gen_start, gen_end);

        match item {
            Ok(args) => {
                let job = Job {
                    id: next_id,
                    args,
                    gen_time,
                };
                debug!(jobid = next_id, "feeder produced job");
                messages.send(crate::message::Message::new(
                    "Feeder",
                    format!("produced job {next_id}"),
                    Some(next_id),
                ));
                if input_tx.send(InEnvelope::Job(job)).is_err() {
                    // Downstream closed (early-exit / error teardown). Stop quietly.
                    return;
                }
                next_id += 1;
            }
            Err(message) => {
                error!(error = %message, "feeder's job sequence failed");
                let _ = input_tx.send(InEnvelope::GeneratorError(message));
                let _ = input_tx.send(InEnvelope::EndingSignal);
                return;
            }
        }

        gen_start = Instant::now();
    }

    debug!(total = next_id, "feeder exhausted, sending EndingSignal");
    let _ = input_tx.send(InEnvelope::EndingSignal);
}
