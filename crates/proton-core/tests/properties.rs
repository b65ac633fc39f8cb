//! Property-based tests for the universal invariants that must hold over
//! any job set, not just the scenarios in `scenarios.rs`.

use std::collections::HashSet;

use proptest::prelude::*;
use proton_core::{FailureKind, Mapper, Options, StackMapper};

#[derive(Debug, Clone, thiserror::Error)]
#[error("never happens")]
struct Never;

impl FailureKind for Never {
    type Kind = ();
    fn kind(&self) -> Self::Kind {}
}

proptest! {
    /// Completeness: every job submitted produces exactly one answer back,
    /// regardless of worker count, when nothing fails.
    #[test]
    fn completeness_under_any_worker_count(
        values in prop::collection::vec(0i64..1000, 0..200),
        nworkers in 1usize..6,
    ) {
        let n = values.len();
        let jobs = values.clone().into_iter().map(Ok);
        let mapper: Mapper<i64, Never> = Mapper::new(
            jobs,
            |job| Ok(job.args * 2),
            Options { nworkers: Some(nworkers), ..Options::default() },
        ).expect("valid options");

        let mut answers: Vec<i64> = mapper.map(|r| r.expect("no errors").answer).collect();
        answers.sort_unstable();

        let mut expected: Vec<i64> = values.into_iter().map(|v| v * 2).collect();
        expected.sort_unstable();

        prop_assert_eq!(answers.len(), n);
        prop_assert_eq!(answers, expected);
    }

    /// Stack-mode reduction with a commutative, associative combine yields
    /// the same grand total no matter how the jobs are split across workers.
    #[test]
    fn stack_reduction_matches_sequential_sum(
        values in prop::collection::vec(0i64..1000, 0..200),
        nworkers in 1usize..6,
    ) {
        let expected_sum: i64 = values.iter().sum();
        let jobs = values.into_iter().map(Ok);
        let stacker: StackMapper<i64, Never> = StackMapper::new(
            jobs,
            |job| Ok(job.args),
            |a, b| a + b,
            Options { nworkers: Some(nworkers), ..Options::default() },
        ).expect("valid options");

        let total = stacker.stack().expect("no errors");
        prop_assert_eq!(total.answer.unwrap_or(0), expected_sum);
    }

    /// Ignored errors never change the answer set for the jobs that did
    /// succeed, and never surface to the caller.
    #[test]
    fn ignored_errors_never_surface(
        values in prop::collection::vec(0i64..50, 1..100),
        nworkers in 1usize..4,
    ) {
        let mut ignore = HashSet::new();
        ignore.insert("always");

        #[derive(Debug, Clone, thiserror::Error)]
        #[error("always fails")]
        struct AlwaysFails;
        impl FailureKind for AlwaysFails {
            type Kind = &'static str;
            fn kind(&self) -> Self::Kind { "always" }
        }

        let jobs = values.clone().into_iter().map(Ok);
        let mapper: Mapper<i64, AlwaysFails> = Mapper::new(
            jobs,
            |job| {
                if job.args % 7 == 0 {
                    Err(AlwaysFails)
                } else {
                    Ok(job.args)
                }
            },
            Options { nworkers: Some(nworkers), ignore_exceptions: ignore, ..Options::default() },
        ).expect("valid options");

        for item in mapper {
            prop_assert!(item.is_ok(), "ignored errors must never surface to the caller");
        }
    }
}
