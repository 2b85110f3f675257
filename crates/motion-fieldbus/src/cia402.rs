//! CiA 402 drive profile wire definitions.
//!
//! Bit positions, word views, operating modes, and the mapped PDO layout
//! shared by the drive engine, the PDO configurator, and the simulated bus.
//! The layout matches the Festo CMMT family mapping written at pre-op by
//! [`crate::pdo::configure_cia402`] and must stay in sync with it.

use serde::{Deserialize, Serialize};

/// Control word bit positions (object 0x6040).
///
/// Bits 4..=6 and 9 are operation-mode specific: bit 4 starts a motion
/// (new set-point, jog positive, start homing), bit 5 jogs negative,
/// bit 6 selects relative positioning, bit 9 is change-on-set-point.
pub mod control_bit {
    /// Switch on.
    pub const SWITCH_ON: u8 = 0;
    /// Enable voltage.
    pub const ENABLE_VOLTAGE: u8 = 1;
    /// Quick stop (active low on the wire).
    pub const QUICK_STOP: u8 = 2;
    /// Enable operation.
    pub const ENABLE_OPERATION: u8 = 3;
    /// Start motion: new set-point / jog positive / start homing.
    pub const START_MOTION: u8 = 4;
    /// Jog in the negative direction.
    pub const JOG_NEGATIVE: u8 = 5;
    /// Positioning type: relative when set.
    pub const RELATIVE: u8 = 6;
    /// Reset fault (rising edge).
    pub const FAULT_RESET: u8 = 7;
    /// Halt the current motion.
    pub const HALT: u8 = 8;
    /// Change on set-point.
    pub const CHANGE_ON_SETPOINT: u8 = 9;
}

/// Status word bit positions (object 0x6041).
pub mod status_bit {
    /// Ready to switch on.
    pub const READY_TO_SWITCH_ON: u8 = 0;
    /// Switched on.
    pub const SWITCHED_ON: u8 = 1;
    /// Operation enabled.
    pub const OPERATION_ENABLED: u8 = 2;
    /// Fault.
    pub const FAULT: u8 = 3;
    /// Voltage enabled.
    pub const VOLTAGE_ENABLED: u8 = 4;
    /// Quick stop (inactive when set).
    pub const QUICK_STOP: u8 = 5;
    /// Switch on disabled.
    pub const SWITCH_ON_DISABLED: u8 = 6;
    /// Warning.
    pub const WARNING: u8 = 7;
    /// Manufacturer specific.
    pub const MANUFACTURER: u8 = 8;
    /// Remote (controlword processed).
    pub const REMOTE: u8 = 9;
    /// Motion complete: target reached / not jogging / record sequence done.
    pub const MOTION_COMPLETE: u8 = 10;
    /// New motion command acknowledged.
    pub const ACK_START: u8 = 12;
    /// Reference reached (homing mode view of bit 12).
    pub const REF_REACHED: u8 = 12;
    /// Individual record complete / velocity following error.
    pub const RECORD_COMPLETE: u8 = 13;
    /// Velocity following error (velocity mode view of bit 13).
    pub const VELOCITY_ERROR: u8 = 13;
    /// Drive homed.
    pub const HOMED: u8 = 15;
}

bitflags::bitflags! {
    /// Whole-word view of the control word.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct ControlWord: u16 {
        const SWITCH_ON = 1 << control_bit::SWITCH_ON;
        const ENABLE_VOLTAGE = 1 << control_bit::ENABLE_VOLTAGE;
        const QUICK_STOP = 1 << control_bit::QUICK_STOP;
        const ENABLE_OPERATION = 1 << control_bit::ENABLE_OPERATION;
        const START_MOTION = 1 << control_bit::START_MOTION;
        const JOG_NEGATIVE = 1 << control_bit::JOG_NEGATIVE;
        const RELATIVE = 1 << control_bit::RELATIVE;
        const FAULT_RESET = 1 << control_bit::FAULT_RESET;
        const HALT = 1 << control_bit::HALT;
        const CHANGE_ON_SETPOINT = 1 << control_bit::CHANGE_ON_SETPOINT;
    }
}

bitflags::bitflags! {
    /// Whole-word view of the status word.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct StatusWord: u16 {
        const READY_TO_SWITCH_ON = 1 << status_bit::READY_TO_SWITCH_ON;
        const SWITCHED_ON = 1 << status_bit::SWITCHED_ON;
        const OPERATION_ENABLED = 1 << status_bit::OPERATION_ENABLED;
        const FAULT = 1 << status_bit::FAULT;
        const VOLTAGE_ENABLED = 1 << status_bit::VOLTAGE_ENABLED;
        const QUICK_STOP = 1 << status_bit::QUICK_STOP;
        const SWITCH_ON_DISABLED = 1 << status_bit::SWITCH_ON_DISABLED;
        const WARNING = 1 << status_bit::WARNING;
        const MANUFACTURER = 1 << status_bit::MANUFACTURER;
        const REMOTE = 1 << status_bit::REMOTE;
        const MOTION_COMPLETE = 1 << status_bit::MOTION_COMPLETE;
        const ACK_START = 1 << status_bit::ACK_START;
        const RECORD_COMPLETE = 1 << status_bit::RECORD_COMPLETE;
        const HOMED = 1 << status_bit::HOMED;
    }
}

/// Modes of operation (object 0x6060, echoed at 0x6061).
///
/// Record and jog are manufacturer-specific negative modes; on the wire the
/// mode byte carries their two's-complement encoding (236 and 253). Torque
/// mode is reserved by the profile but not supported by this engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[repr(i8)]
pub enum OperatingMode {
    /// No mode selected.
    #[default]
    NoMode = 0,
    /// Profile position mode.
    ProfilePosition = 1,
    /// Velocity mode (legacy).
    Velocity = 2,
    /// Profile velocity mode.
    ProfileVelocity = 3,
    /// Homing mode.
    Homing = 6,
    /// Record table execution (manufacturer specific, byte 236).
    Record = -20,
    /// Jog mode (manufacturer specific, byte 253).
    Jog = -3,
}

impl OperatingMode {
    /// Raw byte written to the mode-of-operation object.
    pub fn as_byte(self) -> u8 {
        self as i8 as u8
    }

    /// Parse a mode-display byte; unknown values yield `None`.
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte as i8 {
            0 => Some(Self::NoMode),
            1 => Some(Self::ProfilePosition),
            2 => Some(Self::Velocity),
            3 => Some(Self::ProfileVelocity),
            6 => Some(Self::Homing),
            -20 => Some(Self::Record),
            -3 => Some(Self::Jog),
            _ => None,
        }
    }
}

impl std::fmt::Display for OperatingMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NoMode => write!(f, "no mode"),
            Self::ProfilePosition => write!(f, "profile position"),
            Self::Velocity => write!(f, "velocity"),
            Self::ProfileVelocity => write!(f, "profile velocity"),
            Self::Homing => write!(f, "homing"),
            Self::Record => write!(f, "record"),
            Self::Jog => write!(f, "jog"),
        }
    }
}

/// Byte offsets of the mapped RxPDO fields in a drive's output image.
pub mod rxpdo {
    /// Controlword, 16 bit.
    pub const CONTROLWORD: u8 = 0;
    /// Mode of operation, 8 bit.
    pub const MODE: u8 = 2;
    /// Target position, 32 bit.
    pub const TARGET_POSITION: u8 = 3;
    /// Profile velocity, 32 bit.
    pub const PROFILE_VELOCITY: u8 = 7;
    /// Target velocity, 32 bit.
    pub const TARGET_VELOCITY: u8 = 11;
}

/// Byte offsets of the mapped TxPDO fields in a drive's input image.
pub mod txpdo {
    /// Statusword, 16 bit.
    pub const STATUSWORD: u8 = 0;
    /// Mode of operation display, 8 bit.
    pub const MODE_DISPLAY: u8 = 2;
    /// Position actual value, 32 bit.
    pub const POSITION_ACTUAL: u8 = 3;
    /// Velocity actual value, 32 bit.
    pub const VELOCITY_ACTUAL: u8 = 11;
}

/// SDO (Service Data Object) address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SdoAddress {
    /// Object index.
    pub index: u16,
    /// Object subindex.
    pub subindex: u8,
}

impl SdoAddress {
    /// Create a new SDO address.
    pub const fn new(index: u16, subindex: u8) -> Self {
        Self { index, subindex }
    }
}

impl std::fmt::Display for SdoAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:#06x}:{}", self.index, self.subindex)
    }
}

/// Object dictionary addresses used by the engine and configurator.
pub mod od {
    use super::SdoAddress;

    /// Process-data cycle time in seconds (f32, manufacturer specific).
    pub const CYCLE_TIME: SdoAddress = SdoAddress::new(0x212E, 0x02);
    /// RxPDO mapping object.
    pub const RXPDO_MAP: SdoAddress = SdoAddress::new(0x1600, 0);
    /// TxPDO mapping object.
    pub const TXPDO_MAP: SdoAddress = SdoAddress::new(0x1A00, 0);
    /// SM2 (output) PDO assignment.
    pub const SM2_ASSIGN: SdoAddress = SdoAddress::new(0x1C12, 0);
    /// SM3 (input) PDO assignment.
    pub const SM3_ASSIGN: SdoAddress = SdoAddress::new(0x1C13, 0);
    /// Profile acceleration.
    pub const PROFILE_ACCELERATION: SdoAddress = SdoAddress::new(0x6083, 0);
    /// Profile deceleration.
    pub const PROFILE_DECELERATION: SdoAddress = SdoAddress::new(0x6084, 0);
    /// Next record table index: selects and reports the executing record.
    pub const NEXT_RECORD: SdoAddress = SdoAddress::new(0x216F, 0x14);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mode_byte_encoding() {
        assert_eq!(OperatingMode::Record.as_byte(), 236);
        assert_eq!(OperatingMode::Jog.as_byte(), 253);
        assert_eq!(OperatingMode::ProfilePosition.as_byte(), 1);
        assert_eq!(OperatingMode::from_byte(236), Some(OperatingMode::Record));
        assert_eq!(OperatingMode::from_byte(253), Some(OperatingMode::Jog));
        assert_eq!(OperatingMode::from_byte(6), Some(OperatingMode::Homing));
        // Torque mode is reserved, not supported
        assert_eq!(OperatingMode::from_byte(4), None);
    }

    #[test]
    fn test_word_views_match_bit_positions() {
        assert_eq!(
            StatusWord::ACK_START.bits(),
            1 << status_bit::ACK_START
        );
        assert_eq!(
            ControlWord::START_MOTION.bits() | ControlWord::RELATIVE.bits(),
            (1 << 4) | (1 << 6)
        );
    }

    #[test]
    fn test_sdo_address_display() {
        let addr = od::NEXT_RECORD;
        assert_eq!(format!("{addr}"), "0x216f:20");
    }
}
