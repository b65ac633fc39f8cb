//! Counts words per line across a generated corpus using stack mode: each
//! worker locally sums its lines' word counts, and the controller performs
//! the final reduction.

use proton_core::{FailureKind, Options, StackMapper};

#[derive(Debug, thiserror::Error)]
#[error("unreachable")]
struct NoError;

impl FailureKind for NoError {
    type Kind = ();
    fn kind(&self) -> Self::Kind {}
}

fn main() {
    tracing_subscriber::fmt::init();

    let lines = vec![
        "the quick brown fox",
        "jumps over the lazy dog",
        "pack my box with five dozen liquor jugs",
        "how vexingly quick daft zebras jump",
    ];

    let jobs = lines.into_iter().map(Ok);

    let stacker: StackMapper<usize, NoError> = StackMapper::new(
        jobs,
        |job| Ok(job.args.split_whitespace().count()),
        |a, b| a + b,
        Options {
            nworkers: Some(2),
            verbose: true,
            ..Options::default()
        },
    )
    .expect("valid options");

    let total = stacker.stack().expect("no errors in this demo");
    println!("total words: {}", total.answer.unwrap_or(0));
}
