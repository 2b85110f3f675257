//! Real-time scheduling for the cyclic thread.
//!
//! Memory locking (mlockall) and SCHED_FIFO elevation, applied from inside
//! the cycle thread before the first exchange. Missing privileges degrade
//! to a warning; determinism is a deployment concern, not a correctness
//! one.

use motion_common::RealtimeConfig;
use tracing::{info, warn};

/// Apply the configured real-time settings to the calling thread.
pub fn init_cycle_thread(config: &RealtimeConfig) {
    if !config.enabled {
        return;
    }
    if config.lock_memory {
        lock_memory();
    }
    set_fifo_scheduler(config.priority);
}

#[cfg(target_os = "linux")]
fn lock_memory() {
    use nix::sys::mman::{mlockall, MlockAllFlags};

    match mlockall(MlockAllFlags::MCL_CURRENT | MlockAllFlags::MCL_FUTURE) {
        Ok(()) => info!("memory locked"),
        Err(nix::errno::Errno::EPERM) => {
            warn!("mlockall failed with EPERM - running without CAP_IPC_LOCK, page faults may occur");
        }
        Err(e) => warn!(error = %e, "mlockall failed"),
    }
}

#[cfg(not(target_os = "linux"))]
fn lock_memory() {
    warn!("mlockall not available on this platform");
}

#[cfg(target_os = "linux")]
fn set_fifo_scheduler(priority: u8) {
    let priority = priority.clamp(1, 99);
    let param = libc::sched_param {
        sched_priority: i32::from(priority),
    };

    // SAFETY: sched_setscheduler with pid 0 targets the calling thread and
    // a valid sched_param
    let result = unsafe { libc::sched_setscheduler(0, libc::SCHED_FIFO, &param) };
    if result == -1 {
        let err = std::io::Error::last_os_error();
        if err.raw_os_error() == Some(libc::EPERM) {
            warn!("sched_setscheduler failed with EPERM - run with CAP_SYS_NICE or as root");
        } else {
            warn!(error = %err, "sched_setscheduler failed");
        }
    } else {
        info!(priority, "cycle thread scheduled SCHED_FIFO");
    }
}

#[cfg(not(target_os = "linux"))]
fn set_fifo_scheduler(priority: u8) {
    warn!(priority, "real-time scheduling not available on this platform");
}
