use std::hint::black_box;

use criterion::{Criterion, criterion_group, criterion_main};
use proton_core::{FailureKind, Mapper, Options};

#[derive(Debug, thiserror::Error)]
#[error("unreachable")]
struct NoError;

impl FailureKind for NoError {
    type Kind = ();
    fn kind(&self) -> Self::Kind {}
}

const NUM_JOBS: i64 = 50_000;

fn run_with_workers(nworkers: usize) -> i64 {
    let jobs = (0..NUM_JOBS).map(Ok);
    let options = Options {
        nworkers: Some(nworkers),
        ..Options::default()
    };
    let mapper: Mapper<i64, NoError> =
        Mapper::new(jobs, |job| Ok(job.args * 2), options).expect("valid options");
    mapper.map(|r| r.unwrap().answer).sum()
}

fn dispatch_throughput(c: &mut Criterion) {
    let mut group = c.benchmark_group("dispatch_throughput");
    for nworkers in [1usize, 2, 4, 8] {
        group.bench_function(format!("workers_{nworkers}"), |b| {
            b.iter(|| black_box(run_with_workers(nworkers)))
        });
    }
    group.finish();
}

criterion_group!(benches, dispatch_throughput);
criterion_main!(benches);
