//! Signal handling for graceful daemon shutdown.
//!
//! SIGTERM and SIGINT set an atomic flag; the main loop polls it and runs
//! the ordinary shutdown path. Handlers touch nothing but the atomic, as
//! required for async-signal safety.

use std::sync::atomic::{AtomicBool, Ordering};
use tracing::debug;

static SHUTDOWN_FLAG: AtomicBool = AtomicBool::new(false);

/// Handle for shutdown-signal management.
#[derive(Debug, Clone, Copy)]
pub struct SignalHandler;

impl SignalHandler {
    /// Register the process signal handlers.
    pub fn install() -> std::io::Result<Self> {
        #[cfg(unix)]
        {
            use std::os::raw::c_int;

            extern "C" fn shutdown_handler(_: c_int) {
                SHUTDOWN_FLAG.store(true, Ordering::Relaxed);
            }

            // SAFETY: the handler only stores to a static atomic
            unsafe {
                libc::signal(libc::SIGTERM, shutdown_handler as libc::sighandler_t);
                libc::signal(libc::SIGINT, shutdown_handler as libc::sighandler_t);
            }
            debug!("signal handlers registered");
        }

        Ok(Self)
    }

    /// Whether a shutdown signal has been received.
    #[inline]
    pub fn shutdown_requested(&self) -> bool {
        SHUTDOWN_FLAG.load(Ordering::Relaxed)
    }

    /// Manually request shutdown (e.g. after a bounded demo run).
    pub fn request_shutdown(&self) {
        SHUTDOWN_FLAG.store(true, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manual_shutdown_request() {
        let handler = SignalHandler::install().unwrap();
        handler.request_shutdown();
        assert!(handler.shutdown_requested());
    }
}
