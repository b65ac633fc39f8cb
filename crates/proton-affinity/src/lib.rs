//! CPU affinity and process-priority helpers.
//!
//! These are the "opaque side-effecting calls on an external scheduler"
//! collaborator from the controller's option set: a descriptor string is
//! parsed once at construction time, and applied once per child thread after
//! the pipeline has been spawned. Neither affinity nor priority is ever
//! revisited for the lifetime of a run.

use std::fmt;

use thiserror::Error;

/// A parsed `affinity` option: either a single core or an inclusive range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Affinity {
    /// Pin to a single core.
    Single(usize),
    /// Pin to any core in the inclusive range `[start, end]`.
    Range { start: usize, end: usize },
}

/// An invalid affinity descriptor string.
#[derive(Debug, Error)]
#[error("malformed affinity descriptor {descriptor:?}: {reason}")]
pub struct AffinityParseError {
    descriptor: String,
    reason: &'static str,
}

impl Affinity {
    /// Parse either a single non-negative integer (`"3"`) or a range
    /// `"a-b"` with `b >= a >= 0`.
    ///
    /// This adopts the stricter of the two behaviors observed in the
    /// original implementation's divergent branches: a range with equal
    /// endpoints (`"3-3"`) is accepted as equivalent to `"3"`, but `b < a`
    /// is rejected.
    pub fn parse(descriptor: &str) -> Result<Self, AffinityParseError> {
        let err = |reason: &'static str| AffinityParseError {
            descriptor: descriptor.to_string(),
            reason,
        };

        if let Some((start, end)) = descriptor.split_once('-') {
            let start: usize = start
                .trim()
                .parse()
                .map_err(|_| err("range start is not a non-negative integer"))?;
            let end: usize = end
                .trim()
                .parse()
                .map_err(|_| err("range end is not a non-negative integer"))?;
            if end < start {
                return Err(err("range end must be >= start"));
            }
            Ok(Affinity::Range { start, end })
        } else {
            let core: usize = descriptor
                .trim()
                .parse()
                .map_err(|_| err("not a non-negative integer"))?;
            Ok(Affinity::Single(core))
        }
    }

    /// The set of core ids this descriptor selects, in ascending order.
    pub fn core_ids(&self) -> Vec<usize> {
        match *self {
            Affinity::Single(c) => vec![c],
            Affinity::Range { start, end } => (start..=end).collect(),
        }
    }
}

impl fmt::Display for Affinity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Affinity::Single(c) => write!(f, "{c}"),
            Affinity::Range { start, end } => write!(f, "{start}-{end}"),
        }
    }
}

/// Pin the calling thread to one of the cores selected by `affinity`.
///
/// When the descriptor names a range, the core is chosen by `child_index`
/// modulo the range width, so that successive children are spread across
/// the range round-robin. This is best-effort: on platforms where cores
/// cannot be enumerated, or where the requested id is out of range, the
/// call is logged and skipped rather than treated as fatal, since affinity
/// is an out-of-scope collaborator rather than a core invariant.
pub fn pin_current_thread(affinity: Affinity, child_index: usize) {
    let ids = affinity.core_ids();
    let Some(&core) = ids.get(child_index % ids.len()) else {
        return;
    };

    let Some(available) = core_affinity::get_core_ids() else {
        tracing::warn!(
            affinity = %affinity,
            "could not enumerate CPU cores on this platform, skipping pin"
        );
        return;
    };

    match available
        .into_iter()
        .find(|candidate| candidate.id == core)
    {
        Some(candidate) => {
            if !core_affinity::set_for_current(candidate) {
                tracing::warn!(core, "failed to set CPU affinity for current thread");
            }
        }
        None => {
            tracing::warn!(
                core,
                "requested core id is out of range for this host, skipping pin"
            );
        }
    }
}

/// Failure applying a niceness adjustment.
#[derive(Debug, Error)]
#[error("failed to apply low-priority niceness: {0}")]
pub struct PriorityError(String);

/// Lower the scheduling priority of the calling process's process group.
///
/// Mirrors the single `renice` invocation of the original: applied once,
/// against the controller's own process group, never revisited.
#[cfg(unix)]
pub fn lower_current_process_group_priority() -> Result<(), PriorityError> {
    const NICE_INCREMENT: i32 = 10;

    // SAFETY: `getpgrp` takes no arguments and cannot fail; `setpriority`
    // is passed a valid `PRIO_PGRP` target and a plain integer increment.
    unsafe {
        let pgid = libc::getpgrp();
        let ret = libc::setpriority(libc::PRIO_PGRP, pgid as libc::id_t, NICE_INCREMENT);
        if ret != 0 {
            return Err(PriorityError(std::io::Error::last_os_error().to_string()));
        }
    }
    Ok(())
}

/// Non-Unix targets have no process-group niceness concept; this is a no-op.
#[cfg(not(unix))]
pub fn lower_current_process_group_priority() -> Result<(), PriorityError> {
    tracing::warn!("low-priority scheduling is not supported on this platform");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_single_core() {
        assert_eq!(Affinity::parse("3").unwrap(), Affinity::Single(3));
    }

    #[test]
    fn parses_range() {
        assert_eq!(
            Affinity::parse("2-5").unwrap(),
            Affinity::Range { start: 2, end: 5 }
        );
    }

    #[test]
    fn accepts_equal_range_endpoints() {
        assert_eq!(
            Affinity::parse("4-4").unwrap(),
            Affinity::Range { start: 4, end: 4 }
        );
    }

    #[test]
    fn rejects_descending_range() {
        assert!(Affinity::parse("5-2").is_err());
    }

    #[test]
    fn rejects_garbage() {
        assert!(Affinity::parse("abc").is_err());
        assert!(Affinity::parse("-1").is_err());
        assert!(Affinity::parse("1-2-3").is_err());
    }

    #[test]
    fn core_ids_enumerates_range() {
        assert_eq!(
            Affinity::parse("2-5").unwrap().core_ids(),
            vec![2, 3, 4, 5]
        );
        assert_eq!(Affinity::parse("7").unwrap().core_ids(), vec![7]);
    }
}
