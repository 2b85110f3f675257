use thiserror::Error;

/// Motion master error types covering transport, startup, and drive-engine
/// failures.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum MotionError {
    /// Configuration or initialization error.
    #[error("configuration error: {0}")]
    Config(String),

    /// Fieldbus transport unavailable or a transport call failed.
    #[error("transport error: {0}")]
    Transport(String),

    /// The bus did not reach the operational state during startup.
    #[error("startup failed: {0}")]
    StartupFailed(String),

    /// A motion operation was requested while the bus is not in OP or the
    /// drive's power stage is not enabled.
    #[error("drive {slave} not enabled")]
    DriveNotEnabled {
        /// Slave index of the drive.
        slave: u16,
    },

    /// The drive did not echo the requested operating mode within the retry
    /// budget.
    #[error("drive {slave} did not enter mode {requested} within {retries} cycles")]
    ModeChangeTimeout {
        /// Slave index of the drive.
        slave: u16,
        /// Requested mode (signed mode byte).
        requested: i8,
        /// Retry budget that was exhausted.
        retries: u32,
    },

    /// The power stage did not reach the expected state in time.
    #[error("drive {slave} power stage timeout")]
    PowerStageTimeout {
        /// Slave index of the drive.
        slave: u16,
    },

    /// A motion handshake (ack/motion-complete) did not finish in time.
    #[error("drive {slave} motion handshake timeout")]
    MotionTimeout {
        /// Slave index of the drive.
        slave: u16,
    },

    /// The drive raised the velocity following-error bit during a velocity
    /// task.
    #[error("drive {slave} velocity following error")]
    VelocityFollowingError {
        /// Slave index of the drive.
        slave: u16,
    },

    /// Fault/warning bits survived the fault-reset pulse budget.
    #[error("drive {slave} faults could not be acknowledged")]
    FaultResetFailed {
        /// Slave index of the drive.
        slave: u16,
    },

    /// Jog requested with both directions set, or with neither.
    #[error("jog task requires exactly one direction")]
    JogDirection,

    /// SDO read/write failed (working counter zero or mailbox timeout).
    #[error("SDO {index:#06x}:{subindex} failed on slave {slave}")]
    Sdo {
        /// Slave index.
        slave: u16,
        /// Object dictionary index.
        index: u16,
        /// Object dictionary subindex.
        subindex: u8,
    },
}

/// Convenience type alias for motion master operations.
pub type MotionResult<T> = Result<T, MotionError>;
