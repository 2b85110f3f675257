//! EtherCAT master runtime and CiA 402 drive engine.
//!
//! The entry point is [`Master::connect`], which brings the bus to OP and
//! starts the cyclic process-data loop. Motion operations are available on
//! the master directly (taking a slave index) or through a per-drive
//! [`Drive`] handle.
//!
//! ```no_run
//! use motion_common::MasterConfig;
//! use motion_fieldbus::sim::SimulatedTransport;
//! use motion_master::{Master, PositionOptions};
//!
//! # fn main() -> motion_common::MotionResult<()> {
//! let (transport, _sim) = SimulatedTransport::single_drive();
//! let master = Master::connect(MasterConfig::for_interface("sim0"), Box::new(transport))?;
//!
//! let axis = master.drive(1);
//! axis.enable_powerstage()?;
//! axis.referencing_task(false)?;
//! axis.position_task(500_000, PositionOptions::default().velocity(40_000).absolute())?;
//! # Ok(())
//! # }
//! ```

pub mod drive;
pub mod master;
pub mod realtime;
pub mod stats;

pub use drive::Drive;
pub use master::{Master, PositionOptions};
pub use stats::{CycleStats, CycleStatsSnapshot};
