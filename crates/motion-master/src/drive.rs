//! Per-drive façade over the master.

use crate::master::{Master, PositionOptions};
use motion_common::MotionResult;
use motion_fieldbus::SdoAddress;
use std::time::Duration;

/// A view of one drive on the bus.
///
/// Saves callers from threading the slave index through every call. The
/// handle is a value-semantic borrow of the master; creating or dropping
/// one has no effect on bus state.
#[derive(Debug, Clone, Copy)]
pub struct Drive<'m> {
    master: &'m Master,
    slave: u16,
}

impl<'m> Drive<'m> {
    pub(crate) fn new(master: &'m Master, slave: u16) -> Self {
        Self { master, slave }
    }

    /// Bus index of this drive.
    pub fn slave(&self) -> u16 {
        self.slave
    }

    /// See [`Master::enable_powerstage`].
    pub fn enable_powerstage(&self) -> MotionResult<()> {
        self.master.enable_powerstage(self.slave)
    }

    /// See [`Master::disable_powerstage`].
    pub fn disable_powerstage(&self) -> MotionResult<()> {
        self.master.disable_powerstage(self.slave)
    }

    /// See [`Master::acknowledge_faults`].
    pub fn acknowledge_faults(&self) -> MotionResult<()> {
        self.master.acknowledge_faults(self.slave)
    }

    /// See [`Master::referencing_task`].
    pub fn referencing_task(&self, always: bool) -> MotionResult<()> {
        self.master.referencing_task(self.slave, always)
    }

    /// See [`Master::jog_task`].
    pub fn jog_task(
        &self,
        jog_positive: bool,
        jog_negative: bool,
        duration: Option<Duration>,
    ) -> MotionResult<()> {
        self.master
            .jog_task(self.slave, jog_positive, jog_negative, duration)
    }

    /// See [`Master::stop_motion_task`].
    pub fn stop_motion_task(&self) -> MotionResult<()> {
        self.master.stop_motion_task(self.slave)
    }

    /// See [`Master::position_task`].
    pub fn position_task(&self, target: i32, options: PositionOptions) -> MotionResult<()> {
        self.master.position_task(self.slave, target, options)
    }

    /// See [`Master::velocity_task`].
    pub fn velocity_task(&self, velocity: i32, duration: Option<Duration>) -> MotionResult<()> {
        self.master.velocity_task(self.slave, velocity, duration)
    }

    /// See [`Master::record_task`].
    pub fn record_task(&self, record: i32) -> MotionResult<()> {
        self.master.record_task(self.slave, record)
    }

    /// See [`Master::wait_for_target_position`].
    pub fn wait_for_target_position(&self) -> MotionResult<()> {
        self.master.wait_for_target_position(self.slave)
    }

    /// Actual position.
    pub fn position(&self) -> i32 {
        self.master.position(self.slave)
    }

    /// Actual velocity.
    pub fn velocity(&self) -> i32 {
        self.master.velocity(self.slave)
    }

    /// Fault/warning indication as a negative count.
    pub fn error_count(&self) -> i32 {
        self.master.error_count(self.slave)
    }

    /// Currently selected/executing record.
    pub fn record(&self) -> MotionResult<i32> {
        self.master.record(self.slave)
    }

    /// Mailbox SDO read.
    pub fn sdo_read(&self, address: SdoAddress, buf: &mut [u8]) -> MotionResult<usize> {
        self.master.sdo_read(self.slave, address, buf)
    }

    /// Mailbox SDO write.
    pub fn sdo_write(&self, address: SdoAddress, data: &[u8]) -> MotionResult<()> {
        self.master.sdo_write(self.slave, address, data)
    }
}
