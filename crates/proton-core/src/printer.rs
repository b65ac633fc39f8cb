//! The printer collaborator: drains `MessageQ` and renders progress.
//!
//! This is an out-of-scope collaborator per spec.md §1 ("the interactive
//! terminal printer / progress bars... only their interfaces are specified
//! in §6"), given one concrete, minimal implementation here so the examples
//! and tests have something real to exercise.

use std::thread;

use indicatif::{ProgressBar, ProgressStyle};
use proton_affinity::Affinity;

use crate::message::MessageEnvelope;

/// Spawn the printer thread. It always drains `MessageQ` — workers call
/// `communicate()` regardless of `verbose` — but only renders when
/// `verbose` is set.
pub(crate) fn spawn_printer(
    message_rx: flume::Receiver<MessageEnvelope>,
    verbose: bool,
    affinity: Option<Affinity>,
    child_index: usize,
) -> thread::JoinHandle<()> {
    thread::Builder::new()
        .name("proton-printer".to_string())
        .spawn(move || run_printer(message_rx, verbose, affinity, child_index))
        .expect("failed to spawn printer thread")
}

fn run_printer(
    message_rx: flume::Receiver<MessageEnvelope>,
    verbose: bool,
    affinity: Option<Affinity>,
    child_index: usize,
) {
    if let Some(affinity) = affinity {
        proton_affinity::pin_current_thread(affinity, child_index);
    }

    let bar = if verbose {
        let bar = ProgressBar::new_spinner();
        bar.set_style(
            ProgressStyle::with_template("{spinner} {elapsed_precise} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner()),
        );
        Some(bar)
    } else {
        None
    };

    while let Ok(envelope) = message_rx.recv() {
        match envelope {
            MessageEnvelope::EndingSignal => break,
            MessageEnvelope::Text(message) => {
                tracing::debug!(
                    sender = %message.sender_name,
                    jobid = ?message.jobid,
                    "{}", message.text
                );
                if let Some(bar) = &bar {
                    bar.set_message(format!("[{}] {}", message.sender_name, message.text));
                    bar.tick();
                }
            }
        }
    }

    if let Some(bar) = bar {
        bar.finish_and_clear();
    }
}
