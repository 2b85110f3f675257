//! Fieldbus layer for the SCARA motion master.
//!
//! This crate provides:
//! - [`FieldbusTransport`] trait: the contract over the underlying
//!   EtherCAT library (SOEM or the simulated bus)
//! - [`image`] module with the process-data image and its bit and word
//!   accessors
//! - [`cia402`] module with drive-profile wire definitions (control/status
//!   words, modes, mapped PDO offsets, object dictionary addresses)
//! - [`pdo`] module with the pre-op CiA 402 PDO-map configurator
//! - [`slave`] module with slave records and fieldbus state values
//! - [`sim`] module with a simulated transport and drive models, for
//!   testing without hardware

pub mod cia402;
pub mod image;
pub mod pdo;
pub mod slave;
#[cfg(feature = "simulated")]
pub mod sim;
#[cfg(all(feature = "soem", target_os = "linux"))]
pub mod soem_transport;

pub use cia402::{OperatingMode, SdoAddress};
pub use image::{IoImage, SlaveIo};
pub use slave::{al_status_string, SlaveInfo, SlaveIoSizes, SlaveState};
#[cfg(feature = "simulated")]
pub use sim::{DriveModel, SimHandle, SimulatedTransport};
#[cfg(all(feature = "soem", target_os = "linux"))]
pub use soem_transport::SoemTransport;

use motion_common::MotionResult;
use std::time::Duration;

/// Contract over the underlying fieldbus library.
///
/// Implementations only translate these calls; all policy (retries, state
/// sequencing, handshakes) lives in the master. The simulated transport
/// implements the same surface against in-memory drive models.
pub trait FieldbusTransport: Send {
    /// Bind the transport to a network interface.
    fn init(&mut self, iface: &str) -> MotionResult<()>;

    /// Release the interface.
    fn close(&mut self);

    /// Enumerate and auto-configure slaves. Returns the slave count.
    fn config_init(&mut self) -> MotionResult<usize>;

    /// Map process data. Returns per-slave I/O sizes indexed by bus
    /// position (entry 0 is slave 1).
    fn config_map(&mut self) -> MotionResult<Vec<SlaveIoSizes>>;

    /// Configure distributed clocks. Returns whether DC is in use.
    fn config_dc(&mut self) -> MotionResult<bool>;

    /// Request a state for one slave (0 = all slaves).
    fn write_state(&mut self, slave: u16, state: SlaveState) -> MotionResult<()>;

    /// Read the lowest state across all slaves.
    fn read_state(&mut self) -> SlaveState;

    /// Wait until a slave (0 = all) reaches the expected state or the
    /// timeout expires. Returns the state actually observed.
    fn state_check(&mut self, slave: u16, expected: SlaveState, timeout: Duration) -> SlaveState;

    /// Ship the staged output image to the wire.
    fn send_process_data(&mut self, image: &IoImage) -> MotionResult<()>;

    /// Receive fresh inputs into the image. Returns the working counter.
    fn receive_process_data(&mut self, image: &mut IoImage, timeout: Duration) -> MotionResult<u16>;

    /// Mailbox SDO read into `buf`. Returns the number of bytes read.
    fn sdo_read(
        &mut self,
        slave: u16,
        address: SdoAddress,
        complete_access: bool,
        buf: &mut [u8],
        timeout: Duration,
    ) -> MotionResult<usize>;

    /// Mailbox SDO write.
    fn sdo_write(
        &mut self,
        slave: u16,
        address: SdoAddress,
        complete_access: bool,
        data: &[u8],
        timeout: Duration,
    ) -> MotionResult<()>;

    /// Number of discovered slaves.
    fn slave_count(&self) -> usize;

    /// Descriptor for one slave (1-based index).
    fn slave_info(&self, slave: u16) -> Option<SlaveInfo>;
}
