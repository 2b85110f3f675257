//! Fieldbus master runtime and CiA 402 drive engine.
//!
//! The [`Master`] owns the bus for its whole life: it brings the slaves
//! from INIT through PRE-OP (where matching drives get their PDO mapping)
//! and SAFE-OP to OP, runs the cyclic process-data loop on a background
//! thread, and exposes the per-drive motion operations. Dropping the
//! master requests INIT for all slaves, joins the loop, and closes the
//! transport.
//!
//! Motion operations are protocol-level state machines over the CiA 402
//! control/status word: they stage control bits into the output image and
//! poll status bits from the input image, sleeping one cycle between
//! observations. Every handshake that starts a motion waits for the
//! drive's acknowledge bit before trusting motion-complete, so a latched
//! bit from a previous command can never satisfy a new one.

use crate::realtime;
use crate::stats::{CycleStats, CycleStatsSnapshot};
use motion_common::{MasterConfig, MotionError, MotionResult};
use motion_fieldbus::cia402::{control_bit, od, rxpdo, status_bit, txpdo, OperatingMode, SdoAddress};
use motion_fieldbus::{al_status_string, pdo, FieldbusTransport, IoImage, SlaveInfo, SlaveState};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, trace, warn};

/// Retry budget for a mode change, in cycles.
const MODE_CHANGE_RETRIES: u32 = 100;
/// Shared retry budget for the power-stage enable sequence, in cycles.
const POWER_STAGE_RETRIES: u32 = 1_000_000;
/// Retry budget for motion-complete handshakes, in cycles.
const MOTION_POLL_RETRIES: u32 = 1_000_000;
/// Retry budget for the power-stage disable poll, in cycles.
const DISABLE_RETRIES: u32 = 1000;
/// Fault-reset pulse budget.
const FAULT_RESET_RETRIES: u32 = 1000;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    // A poisoned lock still holds a byte-consistent image
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

/// State shared with the cyclic thread.
struct Shared {
    image: Mutex<IoImage>,
    transport: Mutex<Box<dyn FieldbusTransport>>,
    operational: AtomicBool,
    stats: CycleStats,
    cycle_time: Duration,
    receive_timeout: Duration,
    expected_wkc: u16,
}

/// Options for [`Master::position_task`].
#[derive(Debug, Clone, Copy, Default)]
pub struct PositionOptions {
    /// Profile velocity written to the mapped PDO field.
    pub velocity: Option<u32>,
    /// Profile acceleration, written via SDO before the motion.
    pub acceleration: Option<u32>,
    /// Profile deceleration, written via SDO before the motion.
    pub deceleration: Option<u32>,
    /// Absolute target (false = relative to the current position).
    pub absolute: bool,
    /// Return as soon as the motion is started.
    pub nonblocking: bool,
}

impl PositionOptions {
    /// Set the profile velocity.
    pub fn velocity(mut self, velocity: u32) -> Self {
        self.velocity = Some(velocity);
        self
    }

    /// Set profile acceleration and deceleration.
    pub fn ramps(mut self, acceleration: u32, deceleration: u32) -> Self {
        self.acceleration = Some(acceleration);
        self.deceleration = Some(deceleration);
        self
    }

    /// Target is absolute.
    pub fn absolute(mut self) -> Self {
        self.absolute = true;
        self
    }

    /// Do not wait for completion.
    pub fn nonblocking(mut self) -> Self {
        self.nonblocking = true;
        self
    }
}

/// EtherCAT master for CiA 402 motion drives.
pub struct Master {
    shared: Arc<Shared>,
    slaves: Vec<SlaveInfo>,
    config: MasterConfig,
    cycle_thread: Option<JoinHandle<()>>,
}

impl std::fmt::Debug for Master {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Master")
            .field("interface", &self.config.interface)
            .field("slave_count", &self.slaves.len())
            .field("operational", &self.connected())
            .finish()
    }
}

impl Master {
    /// Bring up the bus and start the cyclic loop.
    ///
    /// Runs the full startup sequence (enumerate, PDO-map matching drives,
    /// map process data, SAFE-OP, OP) with the configured retry budget.
    /// On success the cyclic thread is running and every motion operation
    /// is available.
    ///
    /// # Errors
    ///
    /// [`MotionError::Transport`] if the interface cannot be bound (fatal),
    /// [`MotionError::StartupFailed`] if the bus never reached OP.
    pub fn connect(
        config: MasterConfig,
        mut transport: Box<dyn FieldbusTransport>,
    ) -> MotionResult<Self> {
        info!(
            interface = %config.interface,
            cycle_time_us = config.cycle_time.as_micros() as u64,
            "starting motion master"
        );

        transport.init(&config.interface).map_err(|e| {
            error!(interface = %config.interface, error = %e, "no socket connection; run privileged and verify the adapter name");
            e
        })?;

        let mut attempt = 0;
        let (image, slaves) = loop {
            attempt += 1;
            match startup(transport.as_mut(), &config) {
                Ok(ok) => break ok,
                Err(e) if attempt <= config.startup_retries => {
                    warn!(attempt, error = %e, "startup attempt failed, retrying");
                }
                Err(e) => {
                    error!(error = %e, "unable to start motion master");
                    transport.close();
                    return Err(e);
                }
            }
        };

        let expected_wkc = slaves
            .iter()
            .map(|s| u16::from(s.input_len > 0) + 2 * u16::from(s.output_len > 0))
            .sum();

        let shared = Arc::new(Shared {
            image: Mutex::new(image),
            transport: Mutex::new(transport),
            operational: AtomicBool::new(true),
            stats: CycleStats::default(),
            cycle_time: config.cycle_time,
            receive_timeout: config.receive_timeout,
            expected_wkc,
        });

        let thread_shared = Arc::clone(&shared);
        let realtime_config = config.realtime.clone();
        let cycle_thread = thread::Builder::new()
            .name("motion-cycle".into())
            .spawn(move || {
                realtime::init_cycle_thread(&realtime_config);
                cycle_loop(&thread_shared);
            })
            .map_err(|e| {
                shared.operational.store(false, Ordering::Release);
                lock(&shared.transport).close();
                MotionError::Config(format!("failed to spawn cycle thread: {e}"))
            })?;

        info!(slaves = slaves.len(), expected_wkc, "motion master operational");
        Ok(Self {
            shared,
            slaves,
            config,
            cycle_thread: Some(cycle_thread),
        })
    }

    /// Whether the bus reached OP and the cyclic loop is running.
    pub fn connected(&self) -> bool {
        self.shared.operational.load(Ordering::Acquire)
    }

    /// Discovered slaves, bus order.
    pub fn slaves(&self) -> &[SlaveInfo] {
        &self.slaves
    }

    /// Cyclic exchange statistics.
    pub fn stats(&self) -> CycleStatsSnapshot {
        self.shared.stats.snapshot()
    }

    /// Handle bound to one drive.
    pub fn drive(&self, slave: u16) -> crate::drive::Drive<'_> {
        crate::drive::Drive::new(self, slave)
    }

    /// Sleep exactly one cycle time.
    pub fn wait_cycle(&self) {
        thread::sleep(self.shared.cycle_time);
    }

    fn image(&self) -> MutexGuard<'_, IoImage> {
        lock(&self.shared.image)
    }

    fn transport(&self) -> MutexGuard<'_, Box<dyn FieldbusTransport>> {
        lock(&self.shared.transport)
    }

    fn input_bit(&self, slave: u16, bit: u8) -> bool {
        self.image().input_bit(slave, bit, txpdo::STATUSWORD)
    }

    fn set_control_bit(&self, slave: u16, bit: u8) {
        self.image().set_bit(slave, bit, rxpdo::CONTROLWORD);
    }

    fn clear_control_bit(&self, slave: u16, bit: u8) {
        self.image().unset_bit(slave, bit, rxpdo::CONTROLWORD);
    }

    fn unset_control(&self, slave: u16) -> u16 {
        self.image().unset_control(slave)
    }

    fn raw_mode_display(&self, slave: u16) -> u8 {
        self.image()
            .inputs(slave)
            .get(txpdo::MODE_DISPLAY as usize)
            .copied()
            .unwrap_or(0)
    }

    /// Whether the drive can accept motion commands.
    fn ready_state(&self, slave: u16) -> bool {
        self.connected() && self.input_bit(slave, status_bit::OPERATION_ENABLED)
    }

    fn guard_enabled(&self, slave: u16) -> MotionResult<()> {
        if self.ready_state(slave) {
            Ok(())
        } else {
            warn!(slave, "drive not enabled, movement not possible");
            Err(MotionError::DriveNotEnabled { slave })
        }
    }

    // === Status ===

    /// Actual position of a drive.
    pub fn position(&self, slave: u16) -> i32 {
        self.image().input_i32(slave, txpdo::POSITION_ACTUAL)
    }

    /// Actual velocity of a drive.
    pub fn velocity(&self, slave: u16) -> i32 {
        self.image().input_i32(slave, txpdo::VELOCITY_ACTUAL)
    }

    /// Signed 16-bit field from a slave's input image, for I/O modules
    /// outside the drive profile.
    pub fn input_i16(&self, slave: u16, byte: u8) -> i16 {
        self.image().input_i16(slave, byte)
    }

    /// Error indication as a negative count: -1 per active fault/warning
    /// bit, 0 when clean.
    pub fn error_count(&self, slave: u16) -> i32 {
        let image = self.image();
        let mut count = 0;
        if image.input_bit(slave, status_bit::FAULT, txpdo::STATUSWORD) {
            count -= 1;
        }
        if image.input_bit(slave, status_bit::WARNING, txpdo::STATUSWORD) {
            count -= 1;
        }
        count
    }

    /// Record number currently selected/executing, via SDO.
    pub fn record(&self, slave: u16) -> MotionResult<i32> {
        let mut buf = [0u8; 4];
        self.sdo_read(slave, od::NEXT_RECORD, &mut buf)?;
        Ok(i32::from_le_bytes(buf))
    }

    // === SDO access ===

    /// Mailbox SDO write. Holds only the transport lock, never the image
    /// lock, so cyclic traffic stalls at most one mailbox transfer.
    pub fn sdo_write(&self, slave: u16, address: SdoAddress, data: &[u8]) -> MotionResult<()> {
        self.transport()
            .sdo_write(slave, address, false, data, self.config.sdo_timeout)
    }

    /// Mailbox SDO read into `buf`. Returns the number of bytes read.
    pub fn sdo_read(&self, slave: u16, address: SdoAddress, buf: &mut [u8]) -> MotionResult<usize> {
        self.transport()
            .sdo_read(slave, address, false, buf, self.config.sdo_timeout)
    }

    // === Power stage ===

    /// Acknowledge faults: zero the output buffer once so the stored
    /// command cannot retrigger, then pulse fault-reset until the
    /// fault/warning bits drop.
    pub fn acknowledge_faults(&self, slave: u16) -> MotionResult<()> {
        if !self.connected() {
            warn!(slave, "bus not operational");
            return Err(MotionError::DriveNotEnabled { slave });
        }
        if self.error_count(slave) == 0 {
            return Ok(());
        }

        info!(slave, "acknowledging faults");
        self.image().zero_outputs(slave);
        // One cycle so the empty frame reaches the drive first
        self.wait_cycle();

        let mut budget = FAULT_RESET_RETRIES;
        while self.error_count(slave) != 0 {
            if budget == 0 {
                error!(slave, "faults did not clear");
                return Err(MotionError::FaultResetFailed { slave });
            }
            budget -= 1;
            self.set_control_bit(slave, control_bit::FAULT_RESET);
            self.wait_cycle();
            self.clear_control_bit(slave, control_bit::FAULT_RESET);
            self.wait_cycle();
        }
        debug!(slave, "faults acknowledged");
        Ok(())
    }

    /// Enable the power stage: reset faults, then walk the CiA 402 enable
    /// sequence by asserting control bits and polling status.
    pub fn enable_powerstage(&self, slave: u16) -> MotionResult<()> {
        if !self.connected() {
            warn!(slave, "bus not operational");
            return Err(MotionError::DriveNotEnabled { slave });
        }
        info!(slave, "enabling power stage");
        self.acknowledge_faults(slave)?;

        let mut budget = POWER_STAGE_RETRIES;
        while !(self.input_bit(slave, status_bit::VOLTAGE_ENABLED)
            && self.input_bit(slave, status_bit::QUICK_STOP))
        {
            if budget == 0 {
                break;
            }
            budget -= 1;
            {
                let mut image = self.image();
                image.set_bit(slave, control_bit::QUICK_STOP, rxpdo::CONTROLWORD);
                image.set_bit(slave, control_bit::ENABLE_VOLTAGE, rxpdo::CONTROLWORD);
            }
            self.wait_cycle();
        }

        while !self.input_bit(slave, status_bit::OPERATION_ENABLED) {
            if budget == 0 {
                break;
            }
            budget -= 1;
            {
                let mut image = self.image();
                image.set_bit(slave, control_bit::ENABLE_OPERATION, rxpdo::CONTROLWORD);
                image.set_bit(slave, control_bit::SWITCH_ON, rxpdo::CONTROLWORD);
            }
            self.wait_cycle();
        }

        if self.input_bit(slave, status_bit::VOLTAGE_ENABLED)
            && self.input_bit(slave, status_bit::QUICK_STOP)
            && self.input_bit(slave, status_bit::OPERATION_ENABLED)
        {
            info!(slave, "power stage enabled");
            Ok(())
        } else {
            error!(slave, "power stage enable timed out");
            Err(MotionError::PowerStageTimeout { slave })
        }
    }

    /// Disable the power stage and wait for operation-enabled to drop.
    pub fn disable_powerstage(&self, slave: u16) -> MotionResult<()> {
        debug!(slave, "disabling power stage");
        {
            let mut image = self.image();
            image.unset_bit(slave, control_bit::ENABLE_OPERATION, rxpdo::CONTROLWORD);
            image.unset_bit(slave, control_bit::SWITCH_ON, rxpdo::CONTROLWORD);
        }
        self.wait_cycle();
        {
            let mut image = self.image();
            image.unset_bit(slave, control_bit::QUICK_STOP, rxpdo::CONTROLWORD);
            image.unset_bit(slave, control_bit::ENABLE_VOLTAGE, rxpdo::CONTROLWORD);
        }

        let mut budget = DISABLE_RETRIES;
        while self.input_bit(slave, status_bit::OPERATION_ENABLED) {
            if budget == 0 {
                error!(slave, "power stage did not disable");
                return Err(MotionError::PowerStageTimeout { slave });
            }
            budget -= 1;
            self.wait_cycle();
        }
        debug!(slave, "power stage disabled");
        Ok(())
    }

    // === Mode handling ===

    /// Switch the drive's operating mode and wait for the display echo.
    ///
    /// Drives report the previous mode for several cycles, so the write is
    /// repeated each cycle until the echo arrives or the budget runs out.
    /// On success the mode-specific control bits are left cleared so the
    /// next motion start presents a clean edge.
    pub fn set_mode(&self, slave: u16, mode: OperatingMode) -> MotionResult<()> {
        let byte = mode.as_byte();
        let mut budget = MODE_CHANGE_RETRIES;
        while self.raw_mode_display(slave) != byte {
            if budget == 0 {
                warn!(slave, requested = %mode, "mode change timed out");
                return Err(MotionError::ModeChangeTimeout {
                    slave,
                    requested: mode as i8,
                    retries: MODE_CHANGE_RETRIES,
                });
            }
            budget -= 1;
            {
                let mut image = self.image();
                image.unset_control(slave);
                image.set_byte(slave, byte, rxpdo::MODE);
            }
            self.wait_cycle();
        }
        self.unset_control(slave);
        debug!(slave, %mode, "mode active");
        Ok(())
    }

    // === Motion tasks ===

    /// Run a profile-position motion.
    pub fn position_task(
        &self,
        slave: u16,
        target: i32,
        options: PositionOptions,
    ) -> MotionResult<()> {
        self.guard_enabled(slave)?;
        info!(
            slave,
            target,
            absolute = options.absolute,
            "starting position task"
        );

        if let (Some(acceleration), Some(deceleration)) =
            (options.acceleration, options.deceleration)
        {
            self.sdo_write(slave, od::PROFILE_ACCELERATION, &acceleration.to_le_bytes())?;
            self.sdo_write(slave, od::PROFILE_DECELERATION, &deceleration.to_le_bytes())?;
        }
        if let Some(velocity) = options.velocity {
            self.image()
                .set_u32(slave, velocity, rxpdo::PROFILE_VELOCITY);
        }

        self.set_mode(slave, OperatingMode::ProfilePosition)?;
        {
            let mut image = self.image();
            image.unset_control(slave);
            if !options.absolute {
                image.set_bit(slave, control_bit::RELATIVE, rxpdo::CONTROLWORD);
            }
            image.set_i32(slave, target, rxpdo::TARGET_POSITION);
        }
        self.wait_cycle();
        {
            let mut image = self.image();
            image.unset_bit(slave, control_bit::HALT, rxpdo::CONTROLWORD);
            image.set_bit(slave, control_bit::START_MOTION, rxpdo::CONTROLWORD);
        }

        if options.nonblocking {
            debug!(slave, "non-blocking: motion initiated");
            return Ok(());
        }
        self.wait_for_target_position(slave)
    }

    /// Wait until the drive acknowledges the running motion command and
    /// then reaches its target.
    ///
    /// The acknowledge wait is what makes a latched motion-complete from a
    /// previous command harmless.
    pub fn wait_for_target_position(&self, slave: u16) -> MotionResult<()> {
        let mut budget = MOTION_POLL_RETRIES;
        while !self.input_bit(slave, status_bit::ACK_START) {
            budget = budget
                .checked_sub(1)
                .ok_or(MotionError::MotionTimeout { slave })?;
            self.wait_cycle();
        }
        while !self.input_bit(slave, status_bit::MOTION_COMPLETE) {
            budget = budget
                .checked_sub(1)
                .ok_or(MotionError::MotionTimeout { slave })?;
            trace!(slave, position = self.position(slave), "awaiting target");
            // Release the start edge while the drive works
            self.unset_control(slave);
            self.wait_cycle();
        }
        debug!(slave, position = self.position(slave), "target reached");
        Ok(())
    }

    /// Run a profile-velocity motion. `duration` of `None` returns once
    /// the target velocity is reached and leaves the drive running;
    /// otherwise the motion is stopped after the given time.
    pub fn velocity_task(
        &self,
        slave: u16,
        velocity: i32,
        duration: Option<Duration>,
    ) -> MotionResult<()> {
        self.guard_enabled(slave)?;
        info!(slave, velocity, "starting velocity task");

        self.set_mode(slave, OperatingMode::ProfileVelocity)?;
        self.image()
            .set_i32(slave, velocity, rxpdo::TARGET_VELOCITY);
        self.wait_cycle();
        self.clear_control_bit(slave, control_bit::HALT);

        let mut budget = MOTION_POLL_RETRIES;
        loop {
            if self.input_bit(slave, status_bit::VELOCITY_ERROR) {
                error!(slave, "velocity following error");
                return Err(MotionError::VelocityFollowingError { slave });
            }
            if self.input_bit(slave, status_bit::MOTION_COMPLETE) {
                debug!(slave, "target velocity reached");
                break;
            }
            budget = budget
                .checked_sub(1)
                .ok_or(MotionError::MotionTimeout { slave })?;
            self.wait_cycle();
        }

        if let Some(duration) = duration.filter(|d| !d.is_zero()) {
            thread::sleep(duration);
            self.stop_motion_task(slave)?;
            debug!(slave, "velocity task complete");
        }
        Ok(())
    }

    /// Home the drive. When `always` is false and the drive already holds
    /// a valid reference, the task is skipped.
    pub fn referencing_task(&self, slave: u16, always: bool) -> MotionResult<()> {
        self.guard_enabled(slave)?;
        self.set_mode(slave, OperatingMode::Homing)?;

        if self.input_bit(slave, status_bit::HOMED) && !always {
            info!(slave, "already homed");
            return Ok(());
        }

        info!(slave, "starting homing");
        self.unset_control(slave);
        self.set_control_bit(slave, control_bit::START_MOTION);

        let mut budget = MOTION_POLL_RETRIES;
        while !self.input_bit(slave, status_bit::REF_REACHED) {
            budget = budget
                .checked_sub(1)
                .ok_or(MotionError::MotionTimeout { slave })?;
            self.wait_cycle();
        }
        self.clear_control_bit(slave, control_bit::START_MOTION);
        info!(slave, "homing complete");
        Ok(())
    }

    /// Jog in one direction. With a duration the jog stops after the given
    /// time; without one it keeps running until [`Master::stop_motion_task`].
    pub fn jog_task(
        &self,
        slave: u16,
        jog_positive: bool,
        jog_negative: bool,
        duration: Option<Duration>,
    ) -> MotionResult<()> {
        if jog_positive == jog_negative {
            warn!(slave, "jog requires exactly one direction");
            return Err(MotionError::JogDirection);
        }
        self.guard_enabled(slave)?;
        info!(slave, positive = jog_positive, "starting jog");

        self.set_mode(slave, OperatingMode::Jog)?;
        self.unset_control(slave);

        // Wait for standstill; motion-complete reads "not jogging" here
        let mut budget = MOTION_POLL_RETRIES;
        while !self.input_bit(slave, status_bit::MOTION_COMPLETE) {
            budget = budget
                .checked_sub(1)
                .ok_or(MotionError::MotionTimeout { slave })?;
            self.wait_cycle();
        }

        let bit = if jog_positive {
            control_bit::START_MOTION
        } else {
            control_bit::JOG_NEGATIVE
        };
        self.set_control_bit(slave, bit);

        if let Some(duration) = duration.filter(|d| !d.is_zero()) {
            thread::sleep(duration);
            self.stop_motion_task(slave)?;
        }
        Ok(())
    }

    /// Stop the active motion by releasing the motion bits and waiting for
    /// motion-complete.
    pub fn stop_motion_task(&self, slave: u16) -> MotionResult<()> {
        self.guard_enabled(slave)?;
        debug!(slave, "stopping motion");
        self.unset_control(slave);

        let mut budget = MOTION_POLL_RETRIES;
        while !self.input_bit(slave, status_bit::MOTION_COMPLETE) {
            budget = budget
                .checked_sub(1)
                .ok_or(MotionError::MotionTimeout { slave })?;
            self.wait_cycle();
        }
        Ok(())
    }

    /// Execute a pre-parameterised record-table entry.
    pub fn record_task(&self, slave: u16, record: i32) -> MotionResult<()> {
        self.guard_enabled(slave)?;
        info!(slave, record, "starting record task");

        self.set_mode(slave, OperatingMode::Record)?;
        self.unset_control(slave);
        // Mailbox traffic, deliberately issued without the image lock
        self.sdo_write(slave, od::NEXT_RECORD, &record.to_le_bytes())?;
        self.wait_cycle();
        {
            let mut image = self.image();
            image.unset_bit(slave, control_bit::HALT, rxpdo::CONTROLWORD);
            image.set_bit(slave, control_bit::START_MOTION, rxpdo::CONTROLWORD);
        }

        self.wait_for_target_position(slave)?;
        info!(slave, record, "record task complete");
        Ok(())
    }

    /// Request INIT for all slaves, stop the cyclic loop, and close the
    /// transport. Called from `Drop` as well; idempotent.
    pub fn shutdown(&mut self) -> MotionResult<()> {
        let Some(handle) = self.cycle_thread.take() else {
            return Ok(());
        };
        info!("shutting down, requesting INIT for all slaves");

        if let Err(e) = self.transport().write_state(0, SlaveState::Init) {
            warn!(error = %e, "INIT request failed");
        }
        // Legacy poll budget: one cycle-time worth of ticks
        let mut budget = self.config.cycle_time.as_micros() as u64;
        while budget > 0 && self.transport().read_state() != SlaveState::Init {
            budget -= 1;
            self.wait_cycle();
        }

        self.shared.operational.store(false, Ordering::Release);
        if handle.join().is_err() {
            warn!("cycle thread panicked");
        }

        let mut transport = self.transport();
        let clean = transport.read_state() == SlaveState::Init;
        transport.close();
        drop(transport);

        if clean {
            info!("clean exit");
            Ok(())
        } else {
            warn!("could not exit cleanly");
            Err(MotionError::Transport("bus did not return to INIT".into()))
        }
    }
}

impl Drop for Master {
    fn drop(&mut self) {
        let _ = self.shutdown();
    }
}

/// One full startup attempt: enumerate, configure, map, SAFE-OP, OP.
fn startup(
    transport: &mut dyn FieldbusTransport,
    config: &MasterConfig,
) -> MotionResult<(IoImage, Vec<SlaveInfo>)> {
    debug!("starting bus configuration");
    let count = transport.config_init()?;
    if count == 0 {
        return Err(MotionError::StartupFailed("no slaves found".into()));
    }
    info!(slaves = count, "slaves found and configured");

    // PDO-map drives of the supported family while the bus is in PRE-OP
    for slave in 1..=count as u16 {
        if let Some(info) = transport.slave_info(slave) {
            info!(slave, name = %info.name, eep_id = format!("{:#x}", info.eep_id), "configuring slave");
            if pdo::is_supported_drive(&info.name, info.eep_id) {
                pdo::configure_cia402(transport, slave, config.cycle_time, config.sdo_timeout);
            }
        }
    }

    let layout = transport.config_map()?;
    let mut image = IoImage::from_layout(&layout);
    transport.config_dc()?;

    for slave in 1..=count as u16 {
        let state = transport.state_check(slave, SlaveState::SafeOp, config.state_timeout);
        if state != SlaveState::SafeOp {
            warn!(slave, %state, "slave has not reached SAFE_OP");
        }
    }
    transport.state_check(0, SlaveState::SafeOp, config.state_timeout);
    debug!("slaves mapped, requesting OP");

    transport.write_state(0, SlaveState::Op)?;
    let mut tries = config.op_retries + 1;
    loop {
        // At least one valid process-data round-trip keeps the outputs of
        // the slaves happy during the transition
        transport.send_process_data(&image)?;
        transport.receive_process_data(&mut image, config.receive_timeout)?;

        if transport.state_check(0, SlaveState::Op, config.state_timeout) == SlaveState::Op {
            break;
        }
        tries -= 1;
        if tries == 0 {
            for slave in 1..=count as u16 {
                if let Some(info) = transport.slave_info(slave) {
                    if info.state != SlaveState::Op {
                        error!(
                            slave,
                            state = %info.state,
                            code = format!("{:#06x}", info.al_status_code),
                            reason = al_status_string(info.al_status_code),
                            "slave did not reach OP"
                        );
                    }
                }
            }
            return Err(MotionError::StartupFailed(
                "not all slaves reached operational state".into(),
            ));
        }
        debug!(tries_left = tries, "waiting for OP");
    }

    info!("operational state reached for all slaves");
    let slaves = (1..=count as u16)
        .filter_map(|s| transport.slave_info(s))
        .collect();
    Ok((image, slaves))
}

/// Cyclic process-data loop. One send/receive round-trip per cycle under
/// the image lock, deadline accounting, sleep for the remainder.
fn cycle_loop(shared: &Shared) {
    debug!("cycle loop started");
    while shared.operational.load(Ordering::Acquire) {
        let start = Instant::now();
        {
            let mut image = lock(&shared.image);
            let mut transport = lock(&shared.transport);
            if let Err(e) = transport.send_process_data(&image) {
                warn!(error = %e, "process data send failed");
            }
            match transport.receive_process_data(&mut image, shared.receive_timeout) {
                Ok(wkc) => {
                    let rtt = start.elapsed().as_micros().min(u32::MAX as u128) as u32;
                    let wkc_ok = wkc >= shared.expected_wkc;
                    if !wkc_ok {
                        warn!(wkc, expected = shared.expected_wkc, "working counter short");
                    }
                    shared.stats.record_cycle(rtt, wkc_ok);
                }
                Err(e) => {
                    warn!(error = %e, "process data receive failed");
                    shared.stats.record_receive_error();
                }
            }
        }

        let elapsed = start.elapsed();
        if elapsed > shared.cycle_time {
            shared.stats.record_deadline_miss();
            warn!(
                elapsed_us = elapsed.as_micros() as u64,
                cycle_us = shared.cycle_time.as_micros() as u64,
                "cycle deadline missed"
            );
        } else {
            thread::sleep(shared.cycle_time - elapsed);
        }
    }
    debug!("cycle loop stopped");
}
