//! Brackets for code that cannot be ordered.
//!
//! Calls whose instruction count or duration varies between runs (I/O,
//! allocation-heavy library code, waits on external events) would make the
//! logical clock non-reproducible. Wrap them:
//!
//! - [`Runtime::nondeterministic`] stops the event counter for the duration
//!   of the call. Other threads keep seeing the paused clock, so they still
//!   wait for this thread.
//! - [`Runtime::external_wait`] also leaves ordering, so other threads can
//!   proceed while this one blocks. On return the clock catches up to the
//!   latest synchronization.
//!
//! Both are no-ops when the caller is not ordered.

use crate::runtime::Runtime;

/// Restores the clock when a bracket ends, also on unwind.
struct Restore<'a> {
    rt: &'a Runtime,
    kind: RestoreKind,
}

enum RestoreKind {
    Enable(i64),
    Adjust,
}

impl Drop for Restore<'_> {
    fn drop(&mut self) {
        let restored = match self.kind {
            RestoreKind::Enable(increment) => self.rt.enable_clock(increment),
            RestoreKind::Adjust => self.rt.adjust_clock(),
        };
        if let Err(e) = restored {
            tracing::debug!(error = %e, "Bracket left the clock unchanged");
        }
    }
}

impl Runtime {
    /// Run `f` with the event counter stopped.
    pub fn nondeterministic<R>(&self, f: impl FnOnce() -> R) -> R {
        self.nondeterministic_with(0, f)
    }

    /// Run `f` with the event counter stopped, then add `increment` to the
    /// clock when counting resumes.
    ///
    /// The increment stands in for the work `f` did, so that repeated runs
    /// charge it identically.
    pub fn nondeterministic_with<R>(&self, increment: i64, f: impl FnOnce() -> R) -> R {
        if self.disable_clock().is_err() {
            return f();
        }
        let _restore = Restore {
            rt: self,
            kind: RestoreKind::Enable(increment),
        };
        f()
    }

    /// Run `f`, a wait on something outside the runtime, without holding back
    /// other threads.
    pub fn external_wait<R>(&self, f: impl FnOnce() -> R) -> R {
        if self.exit_clock().is_err() {
            return f();
        }
        let _restore = Restore {
            rt: self,
            kind: RestoreKind::Adjust,
        };
        f()
    }
}
