//! Hardware event counter backed by Linux `perf_event_open`.
//!
//! The counter is opened for the calling thread on any CPU, user space only,
//! and starts disabled. Reads return the raw count without multiplexing
//! scaling: a scaled estimate would not be reproducible between runs.

use crate::counter::{CounterKind, EventCounter, HardwareEvent};
use crate::error::CounterError;

#[cfg(target_os = "linux")]
pub use linux::HardwareCounter;

#[cfg(not(target_os = "linux"))]
pub use unsupported::HardwareCounter;

#[cfg(target_os = "linux")]
mod linux {
    use super::*;
    use std::os::fd::{AsRawFd, FromRawFd, OwnedFd};
    use tracing::{debug, warn};

    // Linux perf_event constants
    // See: https://man7.org/linux/man-pages/man2/perf_event_open.2.html

    const PERF_TYPE_HARDWARE: u32 = 0;
    const PERF_TYPE_HW_CACHE: u32 = 3;
    const PERF_COUNT_HW_INSTRUCTIONS: u64 = 1;
    const PERF_COUNT_HW_BRANCH_INSTRUCTIONS: u64 = 4;

    // Cache event config: id | (op << 8) | (result << 16).
    const PERF_COUNT_HW_CACHE_L1D: u64 = 0;
    const PERF_COUNT_HW_CACHE_OP_WRITE: u64 = 1;
    const PERF_COUNT_HW_CACHE_RESULT_ACCESS: u64 = 0;
    const L1D_WRITE_ACCESSES: u64 = PERF_COUNT_HW_CACHE_L1D
        | (PERF_COUNT_HW_CACHE_OP_WRITE << 8)
        | (PERF_COUNT_HW_CACHE_RESULT_ACCESS << 16);

    const PERF_ATTR_FLAG_DISABLED: u64 = 1 << 0;
    const PERF_ATTR_FLAG_EXCLUDE_KERNEL: u64 = 1 << 5;
    const PERF_ATTR_FLAG_EXCLUDE_HV: u64 = 1 << 6;

    const IOC_NRBITS: u64 = 8;
    const IOC_TYPEBITS: u64 = 8;
    const IOC_SIZEBITS: u64 = 14;
    const IOC_NRSHIFT: u64 = 0;
    const IOC_TYPESHIFT: u64 = IOC_NRSHIFT + IOC_NRBITS;
    const IOC_SIZESHIFT: u64 = IOC_TYPESHIFT + IOC_TYPEBITS;
    const IOC_DIRSHIFT: u64 = IOC_SIZESHIFT + IOC_SIZEBITS;
    const IOC_NONE: u64 = 0;

    const fn io(type_: u64, nr: u64) -> u64 {
        (IOC_NONE << IOC_DIRSHIFT) | (type_ << IOC_TYPESHIFT) | (nr << IOC_NRSHIFT)
    }

    const PERF_EVENT_IOC_ENABLE: libc::c_ulong = io(b'$' as u64, 0) as libc::c_ulong;
    const PERF_EVENT_IOC_DISABLE: libc::c_ulong = io(b'$' as u64, 1) as libc::c_ulong;

    /// Matches the kernel's `struct perf_event_attr` (VER1 layout).
    #[repr(C)]
    #[derive(Clone, Copy)]
    struct PerfEventAttr {
        type_: u32,
        size: u32,
        config: u64,
        sample_period_or_freq: u64,
        sample_type: u64,
        read_format: u64,
        flags: u64,
        wakeup_events: u32,
        bp_type: u32,
        config1: u64,
        config2: u64,
    }

    impl PerfEventAttr {
        fn for_event(event: HardwareEvent) -> Self {
            let (type_, config) = match event {
                HardwareEvent::Instructions => (PERF_TYPE_HARDWARE, PERF_COUNT_HW_INSTRUCTIONS),
                HardwareEvent::Branches => (PERF_TYPE_HARDWARE, PERF_COUNT_HW_BRANCH_INSTRUCTIONS),
                // Every retired store writes L1D once.
                HardwareEvent::Stores => (PERF_TYPE_HW_CACHE, L1D_WRITE_ACCESSES),
            };
            Self {
                type_,
                size: std::mem::size_of::<Self>() as u32,
                config,
                sample_period_or_freq: 0,
                sample_type: 0,
                read_format: 0,
                flags: PERF_ATTR_FLAG_DISABLED
                    | PERF_ATTR_FLAG_EXCLUDE_KERNEL
                    | PERF_ATTR_FLAG_EXCLUDE_HV,
                wakeup_events: 0,
                bp_type: 0,
                config1: 0,
                config2: 0,
            }
        }
    }

    /// A PMU counter for one thread.
    #[derive(Debug)]
    pub struct HardwareCounter {
        fd: OwnedFd,
        event: HardwareEvent,
    }

    impl HardwareCounter {
        /// Open `event` for the calling thread, disabled.
        pub fn open(event: HardwareEvent) -> Result<Self, CounterError> {
            let attr = PerfEventAttr::for_event(event);
            // pid 0 = calling thread, cpu -1 = any, no group, no flags.
            let ret = unsafe {
                libc::syscall(
                    libc::SYS_perf_event_open,
                    &attr as *const PerfEventAttr,
                    0 as libc::c_int,
                    -1 as libc::c_int,
                    -1 as libc::c_int,
                    0 as libc::c_ulong,
                )
            };
            if ret < 0 {
                return Err(CounterError::Open {
                    event: event.name(),
                    source: std::io::Error::last_os_error(),
                });
            }
            // SAFETY: the syscall returned a fresh descriptor we now own.
            let fd = unsafe { OwnedFd::from_raw_fd(ret as libc::c_int) };
            debug!(event = event.name(), fd = fd.as_raw_fd(), "Opened hardware counter");
            Ok(Self { fd, event })
        }

        fn ioctl(&self, request: libc::c_ulong) {
            let ret = unsafe { libc::ioctl(self.fd.as_raw_fd(), request as _, 0) };
            if ret < 0 {
                warn!(
                    event = self.event.name(),
                    error = %std::io::Error::last_os_error(),
                    "perf ioctl failed"
                );
            }
        }
    }

    impl EventCounter for HardwareCounter {
        fn read(&self) -> u64 {
            let mut value: u64 = 0;
            let bytes = unsafe {
                libc::read(
                    self.fd.as_raw_fd(),
                    &mut value as *mut u64 as *mut libc::c_void,
                    std::mem::size_of::<u64>(),
                )
            };
            if bytes != std::mem::size_of::<u64>() as isize {
                warn!(event = self.event.name(), bytes, "Short read from perf counter");
                return 0;
            }
            value
        }

        fn enable(&self) {
            self.ioctl(PERF_EVENT_IOC_ENABLE);
        }

        fn disable(&self) {
            self.ioctl(PERF_EVENT_IOC_DISABLE);
        }

        fn kind(&self) -> CounterKind {
            CounterKind::Hardware(self.event)
        }
    }

}

#[cfg(not(target_os = "linux"))]
mod unsupported {
    use super::*;

    /// Placeholder for platforms without `perf_event_open`.
    #[derive(Debug)]
    pub struct HardwareCounter {
        event: HardwareEvent,
    }

    impl HardwareCounter {
        /// Always fails with [`CounterError::Unsupported`].
        pub fn open(_event: HardwareEvent) -> Result<Self, CounterError> {
            Err(CounterError::Unsupported)
        }
    }

    impl EventCounter for HardwareCounter {
        fn read(&self) -> u64 {
            0
        }

        fn enable(&self) {}

        fn disable(&self) {}

        fn kind(&self) -> CounterKind {
            CounterKind::Hardware(self.event)
        }
    }
}
