//! A parallel map/stack dispatch engine.
//!
//! Given a lazy sequence of jobs and a per-job target function, [`Mapper`]
//! distributes the work across a fixed pool of worker threads and hands
//! results back as an iterator, either unordered ([`Mapper`] itself) or
//! restored to input order ([`Mapper::ordered`]). [`StackMapper`] instead
//! reduces every result into a single value with a user-supplied
//! associative combine.
//!
//! ```no_run
//! use proton_core::{Mapper, Options};
//!
//! #[derive(Debug, thiserror::Error)]
//! #[error("boom")]
//! struct Boom;
//!
//! impl proton_core::FailureKind for Boom {
//!     type Kind = ();
//!     fn kind(&self) -> Self::Kind {}
//! }
//!
//! let jobs = (0..10i32).map(Ok);
//! let mapper = Mapper::new(jobs, |job| Ok::<_, Boom>(job.args * 2), Options::default())
//!     .expect("valid options");
//! let total: i32 = mapper.map(|r| r.unwrap().answer).sum();
//! assert_eq!(total, 90);
//! ```

mod envelope;
mod error;
mod feeder;
mod job;
mod mapper;
mod message;
mod printer;
mod reorder;
mod stacker;
mod target;
mod worker;
mod worker_handle;

pub use error::{ArgumentError, FailureKind, FatalReason, ProtonError, WorkerFailure};
pub use job::{Job, JobId, StackerOutput, TimeSpan, WorkerOutput};
pub use mapper::{Mapper, OrderedMapper, Options, StackMapper};
pub use message::Message;
pub use reorder::OrderedItem;
pub use worker_handle::{SharedLock, WorkerHandle};

pub use proton_affinity::{Affinity, AffinityParseError};
