//! End-to-end scenarios exercising the full pipeline: construction, normal
//! completion, non-fatal and fatal error handling, and ordered-mode
//! validation.

use std::collections::HashSet;
use std::sync::Mutex;
use std::time::Duration;

use proton_core::{FailureKind, Mapper, OrderedItem, OrderedMapper, Options, ProtonError};

/// Serializes tests that change the process's current directory, since
/// `protonerrors.log` is resolved relative to cwd and cwd is process-global.
static CWD_LOCK: Mutex<()> = Mutex::new(());

#[derive(Debug, Clone, thiserror::Error)]
enum DemoError {
    #[error("bad value: {0}")]
    ValueError(String),
    #[error("missing name: {0}")]
    NameError(String),
    #[error("fatal: {0}")]
    FatalError(String),
}

impl FailureKind for DemoError {
    type Kind = &'static str;

    fn kind(&self) -> Self::Kind {
        match self {
            DemoError::ValueError(_) => "ValueError",
            DemoError::NameError(_) => "NameError",
            DemoError::FatalError(_) => "FatalError",
        }
    }
}

/// Scenario 1: a clean run through both unordered and ordered map mode
/// reproduces the same multiset of answers, and the ordered view restores
/// strict input order.
#[test]
fn scenario_1_clean_run_async_and_sync() {
    let jobs = (0..=9i64).map(Ok);
    let mapper: Mapper<i64, DemoError> =
        Mapper::new(jobs, |job| Ok(job.args * 2), Options {
            nworkers: Some(4),
            ..Options::default()
        })
        .expect("valid options");

    let mut async_answers: Vec<i64> = mapper.map(|r| r.expect("no errors").answer).collect();
    async_answers.sort_unstable();
    assert_eq!(async_answers, (0..=9i64).map(|i| i * 2).collect::<Vec<_>>());

    let jobs = (0..=9i64).map(Ok);
    let ordered: OrderedMapper<i64, DemoError> = OrderedMapper::new(
        jobs,
        |job| Ok(job.args * 2),
        Options {
            nworkers: Some(4),
            ..Options::default()
        },
    )
    .expect("valid options");

    let sync_answers: Vec<i64> = ordered
        .map(|r| match r.expect("no errors") {
            OrderedItem::Output(output) => output.answer,
            OrderedItem::Missing(jobid) => panic!("unexpected missing jobid {jobid}"),
        })
        .collect();
    assert_eq!(sync_answers, (0..=9i64).map(|i| i * 2).collect::<Vec<_>>());
}

/// Scenario 2: with two workers and a monotonically decreasing per-job
/// sleep, the bounded InputQ's backpressure causes completions to arrive in
/// reverse order under the async (unordered) consumer.
#[test]
fn scenario_2_reversed_completion_order_under_backpressure() {
    let jobs = (0..10i64).map(Ok);
    let mapper: Mapper<i64, DemoError> = Mapper::new(
        jobs,
        |job| {
            let millis = 40 - (job.args as u64) * 3;
            std::thread::sleep(Duration::from_millis(millis));
            Ok(job.args)
        },
        Options {
            nworkers: Some(2),
            ..Options::default()
        },
    )
    .expect("valid options");

    let completion_order: Vec<i64> = mapper.map(|r| r.expect("no errors").answer).collect();
    let expected: Vec<i64> = (0..10i64).rev().collect();
    assert_eq!(
        completion_order, expected,
        "decreasing job durations should telescope into reverse completion order"
    );
}

/// Scenario 3: a non-fatal, ignored error is swallowed and skipped; the
/// remaining jobs still complete.
#[test]
fn scenario_3_ignored_error_is_skipped() {
    let jobs = (0..10i64).map(Ok);
    let mut ignore = HashSet::new();
    ignore.insert("ValueError");

    let mapper: Mapper<i64, DemoError> = Mapper::new(
        jobs,
        |job| {
            if job.args == 5 {
                Err(DemoError::ValueError("five is unlucky".into()))
            } else {
                Ok(job.args)
            }
        },
        Options {
            nworkers: Some(3),
            ignore_exceptions: ignore,
            ..Options::default()
        },
    )
    .expect("valid options");

    let mut answers: Vec<i64> = mapper.map(|r| r.expect("ignored error never surfaces").answer).collect();
    answers.sort_unstable();
    let expected: Vec<i64> = (0..10i64).filter(|&i| i != 5).collect();
    assert_eq!(answers, expected);
}

/// Scenario 4: an un-ignored error surfaces to the caller and is persisted
/// to the error log file.
#[test]
fn scenario_4_unignored_error_surfaces_and_is_logged() {
    let _guard = CWD_LOCK.lock().unwrap();
    let dir = tempfile::tempdir().expect("tempdir");
    let original = std::env::current_dir().expect("cwd");
    std::env::set_current_dir(dir.path()).expect("chdir into tempdir");

    let result = (|| {
        let jobs = (0..10i64).map(Ok);
        let mapper: Mapper<i64, DemoError> = Mapper::new(
            jobs,
            |job| {
                if job.args == 3 {
                    Err(DemoError::NameError("job 3 has no name".into()))
                } else {
                    Ok(job.args)
                }
            },
            Options {
                nworkers: Some(2),
                ..Options::default()
            },
        )
        .expect("valid options");

        let mut saw_error = false;
        for item in mapper {
            match item {
                Err(ProtonError::Worker { kind, .. }) => {
                    assert_eq!(kind, "NameError");
                    saw_error = true;
                }
                Ok(_) => {}
                Err(other) => panic!("unexpected error variant: {other:?}"),
            }
        }
        assert!(saw_error, "the un-ignored NameError should have surfaced");

        let log_contents = std::fs::read_to_string("protonerrors.log").expect("error log written");
        assert!(log_contents.contains("job 3 has no name"));
    })();

    std::env::set_current_dir(original).expect("restore cwd");
    result
}

/// Scenario 5: a target panic is contained and reported as a fatal error
/// rather than crashing the process.
#[test]
fn scenario_5_panic_is_contained_as_fatal() {
    let jobs = (0..10i64).map(Ok);
    let mapper: Mapper<i64, DemoError> = Mapper::new(
        jobs,
        |job| {
            if job.args == 7 {
                panic!("deliberate panic for job 7");
            }
            Ok(job.args)
        },
        Options {
            nworkers: Some(2),
            ..Options::default()
        },
    )
    .expect("valid options");

    let mut saw_fatal = false;
    for item in mapper {
        if let Err(ProtonError::Fatal(reason)) = item {
            let message = reason.to_string();
            assert!(message.contains("deliberate panic for job 7"));
            saw_fatal = true;
        }
    }
    assert!(saw_fatal, "the panicking job should surface as a fatal error");
}

/// Scenario 6: ordered mode constructed with a non-empty `ignore_exceptions`
/// fails construction before any worker thread is spawned.
#[test]
fn scenario_6_ordered_mode_rejects_ignore_exceptions_up_front() {
    let jobs = (0..10i64).map(Ok);
    let mut ignore = HashSet::new();
    ignore.insert("ValueError");

    let result: Result<OrderedMapper<i64, DemoError>, _> = OrderedMapper::new(
        jobs,
        |job| Ok(job.args),
        Options {
            nworkers: Some(2),
            ignore_exceptions: ignore,
            ..Options::default()
        },
    );

    match result {
        Err(ProtonError::Argument(_)) => {}
        other => panic!("expected an argument error, got {other:?}"),
    }
}
