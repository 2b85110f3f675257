//! Simulated fieldbus with CiA 402 drive models.
//!
//! Services the process-data image synchronously: every
//! `receive_process_data` steps each drive model once against the staged
//! outputs and refreshes the input image. This allows the master logic,
//! including every motion-task handshake, to be exercised without
//! hardware.
//!
//! A [`SimHandle`] shares the underlying state so tests can inspect and
//! perturb drives while the master's cyclic thread is running.

use crate::cia402::{od, ControlWord, OperatingMode, SdoAddress, StatusWord};
use crate::image::IoImage;
use crate::slave::{SlaveInfo, SlaveIoSizes, SlaveState};
use crate::FieldbusTransport;
use motion_common::{MotionError, MotionResult};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tracing::{debug, trace};

/// Input bytes exposed by the simulated drives (matches the TxPDO map).
const DRIVE_INPUT_LEN: usize = 18;
/// Output bytes consumed by the simulated drives (matches the RxPDO map).
const DRIVE_OUTPUT_LEN: usize = 24;

/// Position increment per cycle while jogging.
const JOG_STEP: i32 = 100;

/// One recorded SDO write, for configuration assertions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SdoWrite {
    /// Target slave.
    pub slave: u16,
    /// Object address.
    pub address: SdoAddress,
    /// Complete-access flag.
    pub complete_access: bool,
    /// Raw payload.
    pub data: Vec<u8>,
}

/// Behaviour model of one simulated device.
#[derive(Debug, Clone)]
pub struct DriveModel {
    /// Device name as reported from the EEPROM.
    pub name: String,
    /// EEPROM product id.
    pub eep_id: u32,
    /// Whether this device runs the CiA 402 model (false for plain I/O
    /// modules, which only occupy bus positions).
    pub is_drive: bool,
    /// Input/output byte counts reported at mapping time.
    pub io_sizes: SlaveIoSizes,

    /// Cycles between a mode write and the display echo.
    pub mode_echo_delay: u32,
    /// Never echo a requested mode (mode-change failure injection).
    pub refuse_mode: bool,
    /// Cycles between a start edge and `ack_start`.
    pub ack_delay: u32,
    /// Cycles between a start edge and `motion_complete`.
    pub motion_duration: u32,
    /// Cycles between a start edge and `ref_reached` in homing mode.
    pub homing_duration: u32,
    /// Cycles until the target velocity is reported reached.
    pub velocity_ramp: u32,
    /// Raise the velocity following-error bit instead of reaching the
    /// velocity.
    pub velocity_error: bool,
    /// Fault-reset rising edges required to clear a fault.
    pub reset_pulses_needed: u32,

    /// Active fault bit.
    pub fault: bool,
    /// Active warning bit.
    pub warning: bool,
    /// Drive has a valid reference (homed bit).
    pub homed: bool,

    /// Count of observed nonzero-to-zero output buffer transitions.
    pub zeroed_output_events: u32,
    /// Total fault-reset rising edges observed.
    pub reset_pulses_seen: u32,
    /// Record number last written via SDO.
    pub record: i32,

    status: StatusWord,
    mode_display: u8,
    position: i32,
    velocity: i32,
    target_cache: i32,
    mode_countdown: Option<u32>,
    ack_countdown: Option<u32>,
    motion_countdown: Option<u32>,
    homing_countdown: Option<u32>,
    velocity_countdown: Option<u32>,
    velocity_reached: bool,
    pulses_toward_clear: u32,
    prev_start: bool,
    prev_fault_reset: bool,
    prev_outputs_nonzero: bool,
    last_outputs: Vec<u8>,
}

impl DriveModel {
    /// A CMMT-family servo drive.
    pub fn cmmt() -> Self {
        Self {
            name: "CMMT-AS".into(),
            eep_id: 0x7B5A25,
            is_drive: true,
            io_sizes: SlaveIoSizes {
                input_len: DRIVE_INPUT_LEN,
                output_len: DRIVE_OUTPUT_LEN,
            },
            mode_echo_delay: 2,
            refuse_mode: false,
            ack_delay: 1,
            motion_duration: 5,
            homing_duration: 5,
            velocity_ramp: 3,
            velocity_error: false,
            reset_pulses_needed: 1,
            fault: false,
            warning: false,
            homed: false,
            zeroed_output_events: 0,
            reset_pulses_seen: 0,
            record: 0,
            status: StatusWord::empty(),
            mode_display: 0,
            position: 0,
            velocity: 0,
            target_cache: 0,
            mode_countdown: None,
            ack_countdown: None,
            motion_countdown: None,
            homing_countdown: None,
            velocity_countdown: None,
            velocity_reached: false,
            pulses_toward_clear: 0,
            prev_start: false,
            prev_fault_reset: false,
            prev_outputs_nonzero: false,
            last_outputs: Vec::new(),
        }
    }

    /// A plain I/O module occupying a bus position; no CiA 402 behaviour.
    pub fn io_module(name: impl Into<String>, eep_id: u32) -> Self {
        Self {
            name: name.into(),
            eep_id,
            is_drive: false,
            io_sizes: SlaveIoSizes {
                input_len: 2,
                output_len: 2,
            },
            ..Self::cmmt()
        }
    }

    /// Raw status word currently reported.
    pub fn status(&self) -> StatusWord {
        self.status
    }

    /// Force status bits (e.g. a latched `motion_complete` from a previous
    /// motion).
    pub fn set_status(&mut self, bits: StatusWord) {
        self.status |= bits;
    }

    /// Mode the drive currently reports.
    pub fn mode_display(&self) -> u8 {
        self.mode_display
    }

    /// Reported actual position.
    pub fn position(&self) -> i32 {
        self.position
    }

    /// Outputs snapshot from the most recent cycle.
    pub fn last_outputs(&self) -> &[u8] {
        &self.last_outputs
    }

    /// Inject a fault (and optionally a warning) that clears after
    /// `pulses` fault-reset edges.
    pub fn inject_fault(&mut self, warning: bool, pulses: u32) {
        self.fault = true;
        self.warning = warning;
        self.reset_pulses_needed = pulses.max(1);
        self.pulses_toward_clear = 0;
    }

    fn latch_outputs(&mut self, outputs: &[u8]) {
        let nonzero = outputs.iter().any(|&b| b != 0);
        if self.prev_outputs_nonzero && !nonzero {
            self.zeroed_output_events += 1;
        }
        self.prev_outputs_nonzero = nonzero;
        self.last_outputs = outputs.to_vec();
    }

    /// Advance the model one cycle against the latched outputs and refresh
    /// the input bytes.
    fn step(&mut self, inputs: &mut [u8]) {
        if !self.is_drive {
            return;
        }

        let control = ControlWord::from_bits_retain(if self.last_outputs.len() >= 2 {
            u16::from_le_bytes([self.last_outputs[0], self.last_outputs[1]])
        } else {
            0
        });
        let mode_cmd = self.last_outputs.get(2).copied().unwrap_or(0);
        let target = read_i32(&self.last_outputs, 3);
        let target_velocity = read_i32(&self.last_outputs, 11);

        self.step_faults(control);
        self.step_power(control);
        self.step_mode(mode_cmd);
        self.step_motion(control, target, target_velocity);

        self.write_inputs(inputs);
    }

    fn step_faults(&mut self, control: ControlWord) {
        let reset = control.contains(ControlWord::FAULT_RESET);
        if reset && !self.prev_fault_reset {
            self.reset_pulses_seen += 1;
            if self.fault || self.warning {
                self.pulses_toward_clear += 1;
                if self.pulses_toward_clear >= self.reset_pulses_needed {
                    self.fault = false;
                    self.warning = false;
                    self.pulses_toward_clear = 0;
                }
            }
        }
        self.prev_fault_reset = reset;

        self.status.set(StatusWord::FAULT, self.fault);
        self.status.set(StatusWord::WARNING, self.warning);
    }

    fn step_power(&mut self, control: ControlWord) {
        let volt_req = control.contains(ControlWord::QUICK_STOP | ControlWord::ENABLE_VOLTAGE);
        let op_req = control.contains(ControlWord::ENABLE_OPERATION | ControlWord::SWITCH_ON);

        let powered = volt_req && !self.fault;
        self.status.set(
            StatusWord::VOLTAGE_ENABLED | StatusWord::QUICK_STOP | StatusWord::READY_TO_SWITCH_ON,
            powered,
        );
        self.status.set(
            StatusWord::SWITCHED_ON | StatusWord::OPERATION_ENABLED,
            powered && op_req,
        );
        self.status.set(StatusWord::REMOTE, true);
    }

    fn step_mode(&mut self, mode_cmd: u8) {
        if self.refuse_mode || self.mode_display == mode_cmd {
            self.mode_countdown = None;
            return;
        }
        match self.mode_countdown {
            None => self.mode_countdown = Some(self.mode_echo_delay),
            Some(0) => {
                self.mode_display = mode_cmd;
                self.mode_countdown = None;
                // A fresh mode starts with a clean motion state
                self.motion_countdown = None;
                self.ack_countdown = None;
                self.homing_countdown = None;
                self.velocity_countdown = None;
                self.velocity_reached = false;
                self.status -= StatusWord::ACK_START | StatusWord::RECORD_COMPLETE;
            }
            Some(n) => self.mode_countdown = Some(n - 1),
        }
    }

    fn step_motion(&mut self, control: ControlWord, target: i32, target_velocity: i32) {
        let enabled = self.status.contains(StatusWord::OPERATION_ENABLED);
        let start = control.contains(ControlWord::START_MOTION);
        let jog_neg = control.contains(ControlWord::JOG_NEGATIVE);
        let halt = control.contains(ControlWord::HALT);
        let start_edge = start && !self.prev_start;
        self.prev_start = start;

        let mode = OperatingMode::from_byte(self.mode_display);
        match mode {
            Some(OperatingMode::ProfilePosition) | Some(OperatingMode::Record) if enabled => {
                if start_edge && !halt {
                    self.ack_countdown = Some(self.ack_delay);
                    self.motion_countdown = Some(self.motion_duration);
                    self.target_cache = target;
                }

                match self.ack_countdown {
                    Some(0) => {
                        self.status |= StatusWord::ACK_START;
                        self.ack_countdown = None;
                    }
                    Some(n) => self.ack_countdown = Some(n - 1),
                    None => {}
                }
                if !start {
                    // Handshake: the drive drops the acknowledge once the
                    // start bit is released
                    self.status -= StatusWord::ACK_START;
                    self.ack_countdown = None;
                }

                match self.motion_countdown {
                    Some(0) => {
                        self.position = self.target_cache;
                        self.motion_countdown = None;
                    }
                    Some(n) => self.motion_countdown = Some(n - 1),
                    None => {}
                }
                // Target reached stays latched while no motion is running
                self.status
                    .set(StatusWord::MOTION_COMPLETE, self.motion_countdown.is_none());
            }
            Some(OperatingMode::Homing) if enabled => {
                if start_edge {
                    self.homing_countdown = Some(self.homing_duration);
                }
                match self.homing_countdown {
                    Some(0) => {
                        self.homed = true;
                        self.homing_countdown = None;
                    }
                    Some(n) => self.homing_countdown = Some(n - 1),
                    None => {}
                }
                // Bit 12 doubles as ref-reached in homing mode
                self.status
                    .set(StatusWord::ACK_START, start && self.homed);
            }
            Some(OperatingMode::Jog) if enabled => {
                let jogging = (start || jog_neg) && !halt;
                if jogging {
                    self.position += if start { JOG_STEP } else { -JOG_STEP };
                }
                // Motion complete reads "not jogging" in this mode
                self.status.set(StatusWord::MOTION_COMPLETE, !jogging);
            }
            Some(OperatingMode::ProfileVelocity) if enabled => {
                if self.velocity_error {
                    self.status |= StatusWord::RECORD_COMPLETE;
                    self.status -= StatusWord::MOTION_COMPLETE;
                } else if !halt {
                    match self.velocity_countdown {
                        None if !self.velocity_reached => {
                            self.velocity_countdown = Some(self.velocity_ramp)
                        }
                        Some(0) => {
                            self.velocity_reached = true;
                            self.velocity_countdown = None;
                        }
                        Some(n) => self.velocity_countdown = Some(n - 1),
                        None => {}
                    }
                    if self.velocity_reached {
                        self.velocity = target_velocity;
                    }
                    self.status
                        .set(StatusWord::MOTION_COMPLETE, self.velocity_reached);
                } else {
                    self.velocity_countdown = None;
                    self.velocity_reached = false;
                    self.velocity = 0;
                    self.status -= StatusWord::MOTION_COMPLETE;
                }
            }
            _ => {}
        }

        self.status.set(StatusWord::HOMED, self.homed);
    }

    fn write_inputs(&self, inputs: &mut [u8]) {
        if inputs.len() >= 2 {
            inputs[0..2].copy_from_slice(&self.status.bits().to_le_bytes());
        }
        if inputs.len() >= 3 {
            inputs[2] = self.mode_display;
        }
        if inputs.len() >= 7 {
            inputs[3..7].copy_from_slice(&self.position.to_le_bytes());
        }
        if inputs.len() >= 15 {
            inputs[11..15].copy_from_slice(&self.velocity.to_le_bytes());
        }
    }
}

fn read_i32(bytes: &[u8], offset: usize) -> i32 {
    if bytes.len() >= offset + 4 {
        i32::from_le_bytes(bytes[offset..offset + 4].try_into().unwrap_or([0; 4]))
    } else {
        0
    }
}

/// Shared state behind the simulated transport.
#[derive(Debug)]
struct SimState {
    open: bool,
    interface: String,
    bus_state: SlaveState,
    /// Refuse the transition to OP (startup failure injection).
    refuse_op: bool,
    /// Artificial delay in `receive_process_data`.
    receive_delay: Option<Duration>,
    drives: Vec<DriveModel>,
    sdo_writes: Vec<SdoWrite>,
    cycle_count: u64,
}

/// Simulated EtherCAT transport for tests and benches.
#[derive(Debug)]
pub struct SimulatedTransport {
    state: Arc<Mutex<SimState>>,
}

/// Shared view of the simulated bus, for inspecting and perturbing drive
/// models while a master owns the transport.
#[derive(Debug, Clone)]
pub struct SimHandle {
    state: Arc<Mutex<SimState>>,
}

impl SimulatedTransport {
    /// Create a simulated bus with the given devices at positions 1..=N.
    pub fn new(drives: Vec<DriveModel>) -> (Self, SimHandle) {
        let state = Arc::new(Mutex::new(SimState {
            open: false,
            interface: String::new(),
            bus_state: SlaveState::Init,
            refuse_op: false,
            receive_delay: None,
            drives,
            sdo_writes: Vec::new(),
            cycle_count: 0,
        }));
        let handle = SimHandle {
            state: Arc::clone(&state),
        };
        (Self { state }, handle)
    }

    /// One CMMT drive, the common single-axis test setup.
    pub fn single_drive() -> (Self, SimHandle) {
        Self::new(vec![DriveModel::cmmt()])
    }

    fn lock(&self) -> MutexGuard<'_, SimState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl SimHandle {
    fn lock(&self) -> MutexGuard<'_, SimState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Run a closure against one drive model (1-based index).
    ///
    /// # Panics
    ///
    /// Panics on an unknown index; tests address fixed topologies.
    pub fn with_drive<R>(&self, slave: u16, f: impl FnOnce(&mut DriveModel) -> R) -> R {
        let mut state = self.lock();
        let drive = state
            .drives
            .get_mut(slave as usize - 1)
            .expect("unknown simulated slave");
        f(drive)
    }

    /// Status word a drive currently reports.
    pub fn status(&self, slave: u16) -> StatusWord {
        self.with_drive(slave, |d| d.status())
    }

    /// Mode byte a drive currently reports.
    pub fn mode_display(&self, slave: u16) -> u8 {
        self.with_drive(slave, |d| d.mode_display())
    }

    /// Reported actual position of a drive.
    pub fn position(&self, slave: u16) -> i32 {
        self.with_drive(slave, |d| d.position())
    }

    /// Snapshot of the outputs a drive saw in the latest cycle.
    pub fn last_outputs(&self, slave: u16) -> Vec<u8> {
        self.with_drive(slave, |d| d.last_outputs().to_vec())
    }

    /// All SDO writes recorded so far.
    pub fn sdo_writes(&self) -> Vec<SdoWrite> {
        self.lock().sdo_writes.clone()
    }

    /// Delay every `receive_process_data` by `delay` (deadline-miss
    /// injection).
    pub fn set_receive_delay(&self, delay: Option<Duration>) {
        self.lock().receive_delay = delay;
    }

    /// Refuse the transition to OP.
    pub fn refuse_op(&self, refuse: bool) {
        self.lock().refuse_op = refuse;
    }

    /// Cycles exchanged so far.
    pub fn cycle_count(&self) -> u64 {
        self.lock().cycle_count
    }
}

impl FieldbusTransport for SimulatedTransport {
    fn init(&mut self, iface: &str) -> MotionResult<()> {
        let mut state = self.lock();
        state.open = true;
        state.interface = iface.to_string();
        debug!(interface = iface, "simulated transport bound");
        Ok(())
    }

    fn close(&mut self) {
        let mut state = self.lock();
        state.open = false;
        debug!(cycles = state.cycle_count, "simulated transport closed");
    }

    fn config_init(&mut self) -> MotionResult<usize> {
        let state = self.lock();
        if !state.open {
            return Err(MotionError::Transport("transport not open".into()));
        }
        Ok(state.drives.len())
    }

    fn config_map(&mut self) -> MotionResult<Vec<SlaveIoSizes>> {
        let state = self.lock();
        if !state.open {
            return Err(MotionError::Transport("transport not open".into()));
        }
        Ok(state.drives.iter().map(|d| d.io_sizes).collect())
    }

    fn config_dc(&mut self) -> MotionResult<bool> {
        Ok(true)
    }

    fn write_state(&mut self, slave: u16, state: SlaveState) -> MotionResult<()> {
        let mut sim = self.lock();
        if !sim.open {
            return Err(MotionError::Transport("transport not open".into()));
        }
        trace!(slave, %state, "simulated state request");
        if state == SlaveState::Op && sim.refuse_op {
            return Ok(());
        }
        sim.bus_state = state;
        Ok(())
    }

    fn read_state(&mut self) -> SlaveState {
        self.lock().bus_state
    }

    fn state_check(&mut self, _slave: u16, expected: SlaveState, _timeout: Duration) -> SlaveState {
        let mut sim = self.lock();
        // The simulated bus reaches any granted state immediately
        if expected == SlaveState::Op && sim.refuse_op {
            return sim.bus_state;
        }
        sim.bus_state = expected;
        sim.bus_state
    }

    fn send_process_data(&mut self, image: &IoImage) -> MotionResult<()> {
        let mut sim = self.lock();
        if !sim.open {
            return Err(MotionError::Transport("transport not open".into()));
        }
        for idx in 0..sim.drives.len() {
            let slave = (idx + 1) as u16;
            let outputs = image.outputs(slave).to_vec();
            sim.drives[idx].latch_outputs(&outputs);
        }
        Ok(())
    }

    fn receive_process_data(&mut self, image: &mut IoImage, _timeout: Duration) -> MotionResult<u16> {
        let delay = self.lock().receive_delay;
        if let Some(delay) = delay {
            std::thread::sleep(delay);
        }

        let mut sim = self.lock();
        if !sim.open {
            return Err(MotionError::Transport("transport not open".into()));
        }
        sim.cycle_count += 1;

        let mut wkc = 0;
        for idx in 0..sim.drives.len() {
            let slave = (idx + 1) as u16;
            sim.drives[idx].step(image.inputs_mut(slave));
            if sim.drives[idx].io_sizes.input_len > 0 {
                wkc += 1;
            }
            if sim.drives[idx].io_sizes.output_len > 0 {
                wkc += 2;
            }
        }
        Ok(wkc)
    }

    fn sdo_read(
        &mut self,
        slave: u16,
        address: SdoAddress,
        _complete_access: bool,
        buf: &mut [u8],
        _timeout: Duration,
    ) -> MotionResult<usize> {
        let state = self.lock();
        let drive = (slave as usize)
            .checked_sub(1)
            .and_then(|i| state.drives.get(i))
            .ok_or(MotionError::Sdo {
                slave,
                index: address.index,
                subindex: address.subindex,
            })?;

        if address == od::NEXT_RECORD && buf.len() >= 4 {
            buf[..4].copy_from_slice(&drive.record.to_le_bytes());
            return Ok(4);
        }
        let n = buf.len().min(4);
        buf[..n].fill(0);
        Ok(n)
    }

    fn sdo_write(
        &mut self,
        slave: u16,
        address: SdoAddress,
        complete_access: bool,
        data: &[u8],
        _timeout: Duration,
    ) -> MotionResult<()> {
        let mut state = self.lock();
        if slave == 0 || slave as usize > state.drives.len() {
            return Err(MotionError::Sdo {
                slave,
                index: address.index,
                subindex: address.subindex,
            });
        }
        if address == od::NEXT_RECORD && data.len() >= 4 {
            let record = i32::from_le_bytes(data[..4].try_into().unwrap_or([0; 4]));
            state.drives[slave as usize - 1].record = record;
        }
        state.sdo_writes.push(SdoWrite {
            slave,
            address,
            complete_access,
            data: data.to_vec(),
        });
        Ok(())
    }

    fn slave_count(&self) -> usize {
        self.lock().drives.len()
    }

    fn slave_info(&self, slave: u16) -> Option<SlaveInfo> {
        let state = self.lock();
        let drive = (slave as usize).checked_sub(1).and_then(|i| state.drives.get(i))?;
        let mut info = SlaveInfo::new(slave, drive.name.clone(), drive.eep_id);
        info.state = state.bus_state;
        info.input_len = drive.io_sizes.input_len;
        info.output_len = drive.io_sizes.output_len;
        Some(info)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cia402::{control_bit, rxpdo};

    fn exchange(transport: &mut SimulatedTransport, image: &mut IoImage) {
        transport.send_process_data(image).unwrap();
        transport
            .receive_process_data(image, Duration::from_micros(2000))
            .unwrap();
    }

    fn bring_up(transport: &mut SimulatedTransport) -> IoImage {
        transport.init("sim0").unwrap();
        let count = transport.config_init().unwrap();
        assert!(count > 0);
        let layout = transport.config_map().unwrap();
        IoImage::from_layout(&layout)
    }

    #[test]
    fn test_power_stage_model() {
        let (mut transport, handle) = SimulatedTransport::single_drive();
        let mut image = bring_up(&mut transport);

        exchange(&mut transport, &mut image);
        assert_eq!(image.status_word(1), StatusWord::REMOTE.bits());

        image.set_bit(1, control_bit::QUICK_STOP, rxpdo::CONTROLWORD);
        image.set_bit(1, control_bit::ENABLE_VOLTAGE, rxpdo::CONTROLWORD);
        exchange(&mut transport, &mut image);
        assert!(handle
            .status(1)
            .contains(StatusWord::VOLTAGE_ENABLED | StatusWord::QUICK_STOP));
        assert!(!handle.status(1).contains(StatusWord::OPERATION_ENABLED));

        image.set_bit(1, control_bit::ENABLE_OPERATION, rxpdo::CONTROLWORD);
        image.set_bit(1, control_bit::SWITCH_ON, rxpdo::CONTROLWORD);
        exchange(&mut transport, &mut image);
        assert!(handle.status(1).contains(StatusWord::OPERATION_ENABLED));
    }

    #[test]
    fn test_mode_echo_hysteresis() {
        let (mut transport, handle) = SimulatedTransport::single_drive();
        let mut image = bring_up(&mut transport);

        image.set_byte(1, OperatingMode::ProfilePosition.as_byte(), rxpdo::MODE);
        // Echo delay of 2: the display lags the request
        exchange(&mut transport, &mut image);
        assert_eq!(handle.mode_display(1), 0);
        exchange(&mut transport, &mut image);
        exchange(&mut transport, &mut image);
        assert_eq!(
            handle.mode_display(1),
            OperatingMode::ProfilePosition.as_byte()
        );
    }

    #[test]
    fn test_fault_clears_after_pulses() {
        let (mut transport, handle) = SimulatedTransport::single_drive();
        let mut image = bring_up(&mut transport);

        handle.with_drive(1, |d| d.inject_fault(true, 3));
        exchange(&mut transport, &mut image);
        assert!(handle.status(1).contains(StatusWord::FAULT | StatusWord::WARNING));

        for _ in 0..3 {
            image.set_bit(1, control_bit::FAULT_RESET, rxpdo::CONTROLWORD);
            exchange(&mut transport, &mut image);
            image.unset_bit(1, control_bit::FAULT_RESET, rxpdo::CONTROLWORD);
            exchange(&mut transport, &mut image);
        }
        assert!(!handle.status(1).contains(StatusWord::FAULT));
        assert_eq!(handle.with_drive(1, |d| d.reset_pulses_seen), 3);
    }

    #[test]
    fn test_sdo_record_roundtrip() {
        let (mut transport, handle) = SimulatedTransport::single_drive();
        transport.init("sim0").unwrap();

        transport
            .sdo_write(1, od::NEXT_RECORD, false, &7i32.to_le_bytes(), Duration::ZERO)
            .unwrap();
        let mut buf = [0u8; 4];
        let n = transport
            .sdo_read(1, od::NEXT_RECORD, false, &mut buf, Duration::ZERO)
            .unwrap();
        assert_eq!(n, 4);
        assert_eq!(i32::from_le_bytes(buf), 7);
        assert_eq!(handle.sdo_writes().len(), 1);
    }
}
