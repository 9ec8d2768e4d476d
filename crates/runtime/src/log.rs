//! Per-thread debug output.
//!
//! Runtime events go to `tracing`. When a log file prefix is configured each
//! thread instead writes its own file, `<prefix>.p<id>`, so that the event
//! sequence of one thread can be diffed across runs.

use crate::error::RuntimeError;
use crate::runtime::Runtime;
use lockstep_types::ThreadId;
use parking_lot::Mutex;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Path of the log file for `thread` under `prefix`.
pub fn thread_log_path(prefix: &Path, thread: ThreadId) -> PathBuf {
    let mut name = prefix.as_os_str().to_owned();
    name.push(format!(".p{}", thread.index()));
    PathBuf::from(name)
}

/// Optional file sink owned by one thread slot.
#[derive(Debug, Default)]
pub(crate) struct ThreadLog {
    file: Mutex<Option<BufWriter<File>>>,
}

impl ThreadLog {
    /// Create (truncate) the log file for `thread`.
    pub(crate) fn open(&self, prefix: &Path, thread: ThreadId) -> Result<(), RuntimeError> {
        let path = thread_log_path(prefix, thread);
        let file = File::create(&path).map_err(RuntimeError::LogFile)?;
        *self.file.lock() = Some(BufWriter::new(file));
        Ok(())
    }

    /// Whether a file is attached.
    pub(crate) fn is_open(&self) -> bool {
        self.file.lock().is_some()
    }

    /// Append one line and flush. Returns false if no file is attached.
    pub(crate) fn write_line(&self, line: &str) -> bool {
        let mut guard = self.file.lock();
        let Some(out) = guard.as_mut() else {
            return false;
        };
        if let Err(e) = writeln!(out, "{line}").and_then(|_| out.flush()) {
            warn!(error = %e, "Failed to write thread log");
        }
        true
    }

    /// Flush and detach the file.
    pub(crate) fn close(&self) {
        if let Some(mut out) = self.file.lock().take() {
            let _ = out.flush();
        }
    }
}

impl Runtime {
    /// Deterministic debug print.
    ///
    /// Writes `[id] clock:msg` to the calling thread's log (or `tracing` when
    /// no file is configured) and advances the clock by one, so that debug
    /// output itself happens at a fixed logical time.
    pub fn debug_log(&self, msg: impl AsRef<str>) {
        let engine = self.engine();
        let me = engine.me();
        let paused = engine.pause(me);

        let clock = engine.slot(me).clock.read();
        let line = format!("[{:2}] {}:{}", me.index(), clock.get(), msg.as_ref());
        if !engine.slot(me).log.write_line(&line) {
            info!(thread = %me, clock = clock.get(), "{}", msg.as_ref());
        }

        engine.slot(me).clock.bump(1);
        engine.resume(me, paused);
    }
}
