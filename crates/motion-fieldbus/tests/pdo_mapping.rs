//! PDO-map configurator tests against the simulated transport.

use motion_fieldbus::pdo::configure_cia402;
use motion_fieldbus::sim::SimulatedTransport;
use motion_fieldbus::FieldbusTransport;
use std::time::Duration;

const SDO_TIMEOUT: Duration = Duration::from_millis(50);

#[test]
fn test_write_sequence_and_values() {
    let (mut transport, sim) = SimulatedTransport::single_drive();
    transport.init("sim0").unwrap();

    let cycle_time = Duration::from_micros(2000);
    let successes = configure_cia402(&mut transport, 1, cycle_time, SDO_TIMEOUT);
    assert_eq!(successes, 9);

    let writes = sim.sdo_writes();
    assert_eq!(writes.len(), 9);

    // 1. Cycle time as float seconds
    assert_eq!(writes[0].address.index, 0x212E);
    assert_eq!(writes[0].address.subindex, 2);
    assert_eq!(writes[0].data, 0.002f32.to_le_bytes());

    // 2. RxPDO: declared count, then the 9 entry descriptors in one
    //    complete-access transfer
    assert_eq!(writes[1].address.index, 0x1600);
    assert_eq!(writes[1].address.subindex, 0);
    assert_eq!(writes[1].data, vec![9]);
    assert_eq!(writes[2].address.index, 0x1600);
    assert_eq!(writes[2].address.subindex, 1);
    assert!(writes[2].complete_access);
    assert_eq!(writes[2].data.len(), 9 * 4);
    assert_eq!(&writes[2].data[0..4], &0x6040_0010u32.to_le_bytes());
    assert_eq!(&writes[2].data[8..12], &0x607A_0020u32.to_le_bytes());
    assert_eq!(&writes[2].data[32..36], &0x0000_0008u32.to_le_bytes());

    // 3. TxPDO: declared count of 9 but the 7 provided descriptors
    assert_eq!(writes[3].address.index, 0x1A00);
    assert_eq!(writes[3].data, vec![9]);
    assert_eq!(writes[4].address.index, 0x1A00);
    assert_eq!(writes[4].address.subindex, 1);
    assert!(writes[4].complete_access);
    assert_eq!(writes[4].data.len(), 7 * 4);
    assert_eq!(&writes[4].data[0..4], &0x6041_0010u32.to_le_bytes());
    assert_eq!(&writes[4].data[24..28], &0x0000_0008u32.to_le_bytes());

    // 4. Sync-manager assignment, then activation
    assert_eq!(writes[5].address.index, 0x1C12);
    assert_eq!(writes[5].address.subindex, 1);
    assert_eq!(writes[5].data, 0x1600u16.to_le_bytes());
    assert_eq!(writes[6].address.index, 0x1C13);
    assert_eq!(writes[6].data, 0x1A00u16.to_le_bytes());
    assert_eq!(writes[7].address.index, 0x1C12);
    assert_eq!(writes[7].address.subindex, 0);
    assert_eq!(writes[7].data, vec![1]);
    assert_eq!(writes[8].address.index, 0x1C13);
    assert_eq!(writes[8].address.subindex, 0);
    assert_eq!(writes[8].data, vec![1]);
}

#[test]
fn test_failed_writes_are_counted() {
    let (mut transport, _sim) = SimulatedTransport::single_drive();
    transport.init("sim0").unwrap();

    // Slave 5 does not exist; every write fails but none aborts the run
    let successes = configure_cia402(
        &mut transport,
        5,
        Duration::from_micros(2000),
        SDO_TIMEOUT,
    );
    assert_eq!(successes, 0);
}
