//! SOEM-backed EtherCAT transport (Linux only, feature `soem`).
//!
//! Translates the [`FieldbusTransport`] contract onto the `soem` crate,
//! which wraps the Simple Open EtherCAT Master library.
//!
//! # Requirements
//!
//! - Linux with raw socket capabilities (CAP_NET_RAW) or root privileges
//! - libsoem-dev installed or SOEM built from source
//!
//! # Thread Safety
//!
//! The underlying SOEM context is not thread-safe; the master serialises
//! all access behind its transport lock.

use crate::cia402::SdoAddress;
use crate::image::IoImage;
use crate::slave::{SlaveInfo, SlaveIoSizes, SlaveState};
use crate::FieldbusTransport;
use motion_common::{MotionError, MotionResult};
use std::ffi::c_int;
use std::fs;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Maximum number of slaves supported.
const MAX_SLAVES: usize = 128;

/// Maximum number of groups.
const MAX_GROUPS: usize = 2;

/// I/O map size (4KB as per SOEM API).
const IO_MAP_SIZE: usize = 4096;

/// Linux capability bit for CAP_NET_RAW.
const CAP_NET_RAW_BIT: u32 = 13;

/// SOEM-based EtherCAT transport.
///
/// Owns the buffer storage the SOEM context borrows. The context itself is
/// created fresh per operation (`with_context`), because the `soem` crate's
/// `Context` holds mutable references and cannot be stored alongside them.
pub struct SoemTransport {
    interface: String,
    port: soem::Port,
    slaves: Vec<soem::Slave>,
    slave_count: c_int,
    groups: Vec<soem::Group>,
    esibuf: Vec<soem::ESIBuf>,
    esimap: Vec<soem::ESIMap>,
    elist: Vec<soem::ERing>,
    idxstack: Vec<soem::IdxStack>,
    ecaterror: Vec<soem::Boolean>,
    dc_time: i64,
    sm_commtype: Vec<soem::SMCommType>,
    pdo_assign: Vec<soem::PDOAssign>,
    pdo_desc: Vec<soem::PDODesc>,
    eep_sm: Vec<soem::EEPROMSM>,
    eep_fmmu: Vec<soem::EEPROMFMMU>,
    io_map: Box<[u8; IO_MAP_SIZE]>,
    /// Per-slave I/O sizes captured at mapping time, bus order.
    layout: Vec<SlaveIoSizes>,
    initialized: bool,
}

impl SoemTransport {
    /// Create a transport for the given network interface. The socket is
    /// opened by [`FieldbusTransport::init`].
    pub fn new() -> Self {
        Self {
            interface: String::new(),
            port: soem::Port::default(),
            slaves: vec![soem::Slave::default(); MAX_SLAVES + 1], // +1 for the bus slot
            slave_count: 0,
            groups: vec![soem::Group::default(); MAX_GROUPS],
            esibuf: vec![soem::ESIBuf::default(); MAX_SLAVES],
            esimap: vec![soem::ESIMap::default(); MAX_SLAVES],
            elist: vec![soem::ERing::default(); MAX_SLAVES],
            idxstack: vec![soem::IdxStack::default(); MAX_SLAVES],
            ecaterror: vec![soem::Boolean::default(); MAX_SLAVES],
            dc_time: 0,
            sm_commtype: vec![soem::SMCommType::default(); MAX_SLAVES],
            pdo_assign: vec![soem::PDOAssign::default(); MAX_SLAVES],
            pdo_desc: vec![soem::PDODesc::default(); MAX_SLAVES],
            eep_sm: vec![soem::EEPROMSM::default(); MAX_SLAVES],
            eep_fmmu: vec![soem::EEPROMFMMU::default(); MAX_SLAVES],
            io_map: Box::new([0u8; IO_MAP_SIZE]),
            layout: Vec::new(),
            initialized: false,
        }
    }

    fn check_interface_exists(interface: &str) -> MotionResult<()> {
        let path = format!("/sys/class/net/{interface}");
        if !Path::new(&path).exists() {
            return Err(MotionError::Transport(format!(
                "EtherCAT interface '{interface}' not found (expected {path})"
            )));
        }
        Ok(())
    }

    fn has_cap_net_raw() -> bool {
        let status = match fs::read_to_string("/proc/self/status") {
            Ok(status) => status,
            Err(_) => return false,
        };

        for line in status.lines() {
            if let Some(value) = line.strip_prefix("CapEff:\t") {
                if let Ok(bits) = u64::from_str_radix(value.trim(), 16) {
                    return (bits & (1u64 << CAP_NET_RAW_BIT)) != 0;
                }
                break;
            }
        }
        false
    }

    fn check_raw_socket_privilege() -> MotionResult<()> {
        // SAFETY: geteuid has no preconditions
        let is_root = unsafe { libc::geteuid() == 0 };
        if is_root || Self::has_cap_net_raw() {
            return Ok(());
        }

        Err(MotionError::Transport(
            "EtherCAT requires CAP_NET_RAW (or root) to open raw sockets".into(),
        ))
    }

    /// Create a temporary SOEM context borrowing the owned storage, run one
    /// operation against it.
    fn with_context<F, T>(&mut self, f: F) -> MotionResult<T>
    where
        F: FnOnce(&mut soem::Context<'_>) -> MotionResult<T>,
    {
        let mut context = soem::Context::new(
            &[&self.interface],
            &mut self.port,
            &mut self.slaves,
            &mut self.slave_count,
            &mut self.groups,
            &mut self.esibuf,
            &mut self.esimap,
            &mut self.elist,
            &mut self.idxstack,
            &mut self.ecaterror,
            &mut self.dc_time,
            &mut self.sm_commtype,
            &mut self.pdo_assign,
            &mut self.pdo_desc,
            &mut self.eep_sm,
            &mut self.eep_fmmu,
        )
        .map_err(|e| {
            MotionError::Transport(format!(
                "failed to create SOEM context on {}: {:?}",
                self.interface, e
            ))
        })?;

        f(&mut context)
    }

    fn to_soem_state(state: SlaveState) -> soem::EtherCatState {
        match state {
            SlaveState::Init => soem::EtherCatState::Init,
            SlaveState::PreOp => soem::EtherCatState::PreOp,
            SlaveState::SafeOp => soem::EtherCatState::SafeOp,
            SlaveState::Op => soem::EtherCatState::Op,
            SlaveState::Bootstrap => soem::EtherCatState::Boot,
        }
    }

    fn from_soem_state(state: soem::EtherCatState) -> SlaveState {
        match state {
            soem::EtherCatState::PreOp => SlaveState::PreOp,
            soem::EtherCatState::SafeOp => SlaveState::SafeOp,
            soem::EtherCatState::Op => SlaveState::Op,
            soem::EtherCatState::Boot => SlaveState::Bootstrap,
            _ => SlaveState::Init,
        }
    }

    /// Byte region of the I/O map holding a slave's outputs. Group 0 maps
    /// all outputs first, inputs after, both in bus order.
    fn output_region(&self, slave: u16) -> Option<(usize, usize)> {
        let idx = (slave as usize).checked_sub(1)?;
        let start: usize = self.layout.get(..idx)?.iter().map(|s| s.output_len).sum();
        let len = self.layout.get(idx)?.output_len;
        Some((start, len))
    }

    fn input_region(&self, slave: u16) -> Option<(usize, usize)> {
        let total_out: usize = self.layout.iter().map(|s| s.output_len).sum();
        let idx = (slave as usize).checked_sub(1)?;
        let start: usize = self.layout.get(..idx)?.iter().map(|s| s.input_len).sum();
        let len = self.layout.get(idx)?.input_len;
        Some((total_out + start, len))
    }
}

impl Default for SoemTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for SoemTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SoemTransport")
            .field("interface", &self.interface)
            .field("initialized", &self.initialized)
            .field("slave_count", &self.slave_count)
            .finish_non_exhaustive()
    }
}

impl FieldbusTransport for SoemTransport {
    fn init(&mut self, iface: &str) -> MotionResult<()> {
        if iface.is_empty() {
            return Err(MotionError::Transport("interface name cannot be empty".into()));
        }
        Self::check_interface_exists(iface)?;
        Self::check_raw_socket_privilege()?;

        self.interface = iface.to_string();
        // Creating a context binds the raw socket; failure here means the
        // interface is unusable.
        self.with_context(|_ctx| Ok(()))?;
        self.initialized = true;
        info!(interface = iface, "SOEM transport bound");
        Ok(())
    }

    fn close(&mut self) {
        self.initialized = false;
        self.layout.clear();
        self.slave_count = 0;
        debug!(interface = %self.interface, "SOEM transport closed");
        // The context and its socket are released per-operation; nothing
        // further to tear down here.
    }

    fn config_init(&mut self) -> MotionResult<usize> {
        let count = self.with_context(|ctx| {
            ctx.config_init(false)
                .map_err(|e| MotionError::Transport(format!("config_init failed: {e:?}")))
        })?;
        Ok(count as usize)
    }

    fn config_map(&mut self) -> MotionResult<Vec<SlaveIoSizes>> {
        // SAFETY: io_map is owned by self, has a stable address, and
        // outlives the context created inside with_context.
        let io_map: &mut [u8; IO_MAP_SIZE] =
            unsafe { &mut *(std::ptr::from_mut(&mut *self.io_map).cast::<[u8; IO_MAP_SIZE]>()) };

        self.with_context(|ctx| {
            ctx.config_map_group(io_map, 0).map_err(|mut errors| {
                if let Some(e) = errors.next() {
                    MotionError::Transport(format!("config_map failed: {e:?}"))
                } else {
                    MotionError::Transport("config_map failed: unknown error".into())
                }
            })?;
            Ok(())
        })?;

        let count = self.slave_count as usize;
        let mut layout = Vec::with_capacity(count);
        for idx in 1..=count.min(MAX_SLAVES) {
            let slave = &self.slaves[idx];
            layout.push(SlaveIoSizes {
                input_len: slave.input_size() as usize,
                output_len: slave.output_size() as usize,
            });
        }
        self.layout = layout.clone();
        Ok(layout)
    }

    fn config_dc(&mut self) -> MotionResult<bool> {
        self.with_context(|ctx| {
            ctx.config_dc().map_err(|mut errors| {
                if let Some(e) = errors.next() {
                    MotionError::Transport(format!("config_dc failed: {e:?}"))
                } else {
                    MotionError::Transport("config_dc failed: unknown error".into())
                }
            })
        })
    }

    fn write_state(&mut self, slave: u16, state: SlaveState) -> MotionResult<()> {
        let soem_state = Self::to_soem_state(state);
        self.with_context(|ctx| {
            ctx.set_state(soem_state, slave);
            ctx.write_state(slave)
                .map_err(|e| MotionError::Transport(format!("write_state {state} failed: {e:?}")))?;
            Ok(())
        })
    }

    fn read_state(&mut self) -> SlaveState {
        // A zero-timeout check returns the lowest state currently read
        self.with_context(|ctx| Ok(ctx.check_state(0, soem::EtherCatState::Op, 0)))
            .map(Self::from_soem_state)
            .unwrap_or(SlaveState::Init)
    }

    fn state_check(&mut self, slave: u16, expected: SlaveState, timeout: Duration) -> SlaveState {
        let soem_state = Self::to_soem_state(expected);
        let timeout_us = timeout.as_micros().min(c_int::MAX as u128) as c_int;
        self.with_context(|ctx| Ok(ctx.check_state(slave, soem_state, timeout_us)))
            .map(Self::from_soem_state)
            .unwrap_or(SlaveState::Init)
    }

    fn send_process_data(&mut self, image: &IoImage) -> MotionResult<()> {
        for slave in 1..=self.layout.len() as u16 {
            if let Some((start, len)) = self.output_region(slave) {
                let outputs = image.outputs(slave);
                let n = len.min(outputs.len());
                if start + n <= IO_MAP_SIZE {
                    self.io_map[start..start + n].copy_from_slice(&outputs[..n]);
                }
            }
        }
        self.with_context(|ctx| {
            ctx.send_processdata();
            Ok(())
        })
    }

    fn receive_process_data(&mut self, image: &mut IoImage, timeout: Duration) -> MotionResult<u16> {
        let timeout_us = timeout.as_micros().min(c_int::MAX as u128) as c_int;
        let wkc = self.with_context(|ctx| Ok(ctx.receive_processdata(timeout_us)))?;

        for slave in 1..=self.layout.len() as u16 {
            if let Some((start, len)) = self.input_region(slave) {
                let inputs = image.inputs_mut(slave);
                let n = len.min(inputs.len());
                if start + n <= IO_MAP_SIZE {
                    inputs[..n].copy_from_slice(&self.io_map[start..start + n]);
                }
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
        timeout: Duration,
    ) -> MotionResult<usize> {
        let timeout_us = timeout.as_micros().min(c_int::MAX as u128) as c_int;
        let err = MotionError::Sdo {
            slave,
            index: address.index,
            subindex: address.subindex,
        };

        self.with_context(|ctx| match buf.len() {
            1 => {
                let value: u8 = ctx
                    .read_sdo(slave, address.index, address.subindex, timeout_us)
                    .map_err(|_| err.clone())?;
                buf[0] = value;
                Ok(1)
            }
            2 => {
                let value: u16 = ctx
                    .read_sdo(slave, address.index, address.subindex, timeout_us)
                    .map_err(|_| err.clone())?;
                buf[..2].copy_from_slice(&value.to_le_bytes());
                Ok(2)
            }
            _ => {
                let value: u32 = ctx
                    .read_sdo(slave, address.index, address.subindex, timeout_us)
                    .map_err(|_| err.clone())?;
                let n = buf.len().min(4);
                buf[..n].copy_from_slice(&value.to_le_bytes()[..n]);
                Ok(n)
            }
        })
    }

    fn sdo_write(
        &mut self,
        slave: u16,
        address: SdoAddress,
        complete_access: bool,
        data: &[u8],
        timeout: Duration,
    ) -> MotionResult<()> {
        let timeout_us = timeout.as_micros().min(c_int::MAX as u128) as c_int;
        let err = MotionError::Sdo {
            slave,
            index: address.index,
            subindex: address.subindex,
        };

        self.with_context(|ctx| match data.len() {
            1 => ctx
                .write_sdo(slave, address.index, address.subindex, &data[0], timeout_us)
                .map_err(|_| err.clone()),
            2 => {
                let value = u16::from_le_bytes([data[0], data[1]]);
                ctx.write_sdo(slave, address.index, address.subindex, &value, timeout_us)
                    .map_err(|_| err.clone())
            }
            4 => {
                let value = u32::from_le_bytes([data[0], data[1], data[2], data[3]]);
                ctx.write_sdo(slave, address.index, address.subindex, &value, timeout_us)
                    .map_err(|_| err.clone())
            }
            n if n % 4 == 0 && complete_access => {
                // The wrapper exposes typed transfers only; a complete-access
                // entry array degrades to per-subindex writes.
                for (i, chunk) in data.chunks_exact(4).enumerate() {
                    let value =
                        u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
                    let subindex = address.subindex + i as u8;
                    ctx.write_sdo(slave, address.index, subindex, &value, timeout_us)
                        .map_err(|_| err.clone())?;
                }
                Ok(())
            }
            n => {
                warn!(slave, address = %address, len = n, "unsupported SDO write length");
                Err(err.clone())
            }
        })
    }

    fn slave_count(&self) -> usize {
        self.slave_count as usize
    }

    fn slave_info(&self, slave: u16) -> Option<SlaveInfo> {
        let idx = slave as usize;
        if idx == 0 || idx > self.slave_count as usize || idx >= self.slaves.len() {
            return None;
        }
        let raw = &self.slaves[idx];
        let mut info = SlaveInfo::new(slave, raw.name(), raw.eep_id());
        info.state = Self::from_soem_state(raw.state());
        if let Some(sizes) = self.layout.get(idx - 1) {
            info.input_len = sizes.input_len;
            info.output_len = sizes.output_len;
        }
        Some(info)
    }
}
