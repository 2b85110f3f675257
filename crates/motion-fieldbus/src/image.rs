//! Process-data image shared between the drive engine and the cyclic loop.
//!
//! One pair of byte buffers per slave: outputs are staged by the engine and
//! shipped on the wire each cycle, inputs are refreshed from the wire each
//! cycle. The image carries no locking of its own; the master wraps it in
//! a single mutex held per staging operation by callers and across one
//! send/receive round-trip by the cyclic loop.
//!
//! Bit addressing follows the legacy master: a bit index above 7 advances
//! the byte, and a byte advanced past the end of the slave's buffer wraps
//! to 0. Callers must not rely on the wrap for addresses they control; it
//! exists for compatibility only.

use crate::cia402::{control_bit, rxpdo, txpdo};
use crate::slave::SlaveIoSizes;

/// Byte buffers for one slave.
#[derive(Debug, Clone, Default)]
pub struct SlaveIo {
    /// Device-to-master bytes, refreshed by the cyclic loop.
    pub inputs: Vec<u8>,
    /// Master-to-device bytes, staged by the engine.
    pub outputs: Vec<u8>,
}

/// Process-data image for the whole bus.
///
/// Slot 0 is the bus itself and carries no process data; drives occupy
/// 1..=N matching their bus position.
#[derive(Debug, Clone, Default)]
pub struct IoImage {
    slaves: Vec<SlaveIo>,
}

impl IoImage {
    /// Build an image from the per-slave sizes reported at mapping time.
    pub fn from_layout(layout: &[SlaveIoSizes]) -> Self {
        let mut slaves = Vec::with_capacity(layout.len() + 1);
        slaves.push(SlaveIo::default());
        for sizes in layout {
            slaves.push(SlaveIo {
                inputs: vec![0; sizes.input_len],
                outputs: vec![0; sizes.output_len],
            });
        }
        Self { slaves }
    }

    /// Number of slaves (excluding the bus slot).
    pub fn slave_count(&self) -> usize {
        self.slaves.len().saturating_sub(1)
    }

    /// Input buffer of a slave (empty slice for unknown indices).
    pub fn inputs(&self, slave: u16) -> &[u8] {
        self.slaves
            .get(slave as usize)
            .map_or(&[][..], |s| s.inputs.as_slice())
    }

    /// Mutable input buffer, for the transport to refresh.
    pub fn inputs_mut(&mut self, slave: u16) -> &mut [u8] {
        match self.slaves.get_mut(slave as usize) {
            Some(s) => s.inputs.as_mut_slice(),
            None => &mut [],
        }
    }

    /// Output buffer of a slave (empty slice for unknown indices).
    pub fn outputs(&self, slave: u16) -> &[u8] {
        self.slaves
            .get(slave as usize)
            .map_or(&[][..], |s| s.outputs.as_slice())
    }

    /// Mutable output buffer, for staging.
    pub fn outputs_mut(&mut self, slave: u16) -> &mut [u8] {
        match self.slaves.get_mut(slave as usize) {
            Some(s) => s.outputs.as_mut_slice(),
            None => &mut [],
        }
    }

    /// Resolve a (bit, base byte) address against a buffer length with the
    /// legacy wrap. Returns (byte index, bit mask); `None` for an empty
    /// buffer.
    fn resolve(mut bit: u8, mut byte: u8, len: usize) -> Option<(usize, u8)> {
        if len == 0 {
            return None;
        }
        while bit > 7 {
            bit -= 8;
            byte = byte.wrapping_add(1);
            if byte as usize >= len {
                byte = 0;
            }
        }
        Some(((byte as usize) % len, 1 << bit))
    }

    /// Set a bit in the output image. `base` is the byte the bit index is
    /// relative to, usually the control word. Returns the resulting byte.
    pub fn set_bit(&mut self, slave: u16, bit: u8, base: u8) -> u8 {
        let outputs = self.outputs_mut(slave);
        match Self::resolve(bit, base, outputs.len()) {
            Some((idx, mask)) => {
                outputs[idx] |= mask;
                outputs[idx]
            }
            None => 0,
        }
    }

    /// Clear a bit in the output image. Returns the resulting byte.
    pub fn unset_bit(&mut self, slave: u16, bit: u8, base: u8) -> u8 {
        let outputs = self.outputs_mut(slave);
        match Self::resolve(bit, base, outputs.len()) {
            Some((idx, mask)) => {
                outputs[idx] &= !mask;
                outputs[idx]
            }
            None => 0,
        }
    }

    /// Read a bit from the input image, with the same wrap semantics
    /// against the input length.
    pub fn input_bit(&self, slave: u16, bit: u8, base: u8) -> bool {
        let inputs = self.inputs(slave);
        match Self::resolve(bit, base, inputs.len()) {
            Some((idx, mask)) => inputs[idx] & mask != 0,
            None => false,
        }
    }

    /// Clear the mode-specific control bits 4, 5, 6 and 9 in one staging
    /// operation (two byte writes). Must be invoked between consecutive
    /// motion commands so the next start presents a clean edge. Returns the
    /// resulting control word.
    pub fn unset_control(&mut self, slave: u16) -> u16 {
        const LOW_MASK: u8 = (1 << control_bit::START_MOTION)
            | (1 << control_bit::JOG_NEGATIVE)
            | (1 << control_bit::RELATIVE);
        const HIGH_MASK: u8 = 1 << (control_bit::CHANGE_ON_SETPOINT - 8);

        let cw = rxpdo::CONTROLWORD as usize;
        let outputs = self.outputs_mut(slave);
        if outputs.len() < cw + 2 {
            return 0;
        }
        outputs[cw] &= !LOW_MASK;
        outputs[cw + 1] &= !HIGH_MASK;
        u16::from_le_bytes([outputs[cw], outputs[cw + 1]])
    }

    /// Write a single output byte.
    pub fn set_byte(&mut self, slave: u16, value: u8, offset: u8) {
        let outputs = self.outputs_mut(slave);
        if let Some(b) = outputs.get_mut(offset as usize) {
            *b = value;
        }
    }

    /// Read back a staged output byte.
    pub fn output_byte(&self, slave: u16, offset: u8) -> u8 {
        self.outputs(slave)
            .get(offset as usize)
            .copied()
            .unwrap_or(0)
    }

    /// Write a little-endian u16 into the output image.
    pub fn set_u16(&mut self, slave: u16, value: u16, offset: u8) {
        let offset = offset as usize;
        let outputs = self.outputs_mut(slave);
        if offset + 2 <= outputs.len() {
            outputs[offset..offset + 2].copy_from_slice(&value.to_le_bytes());
        }
    }

    /// Write a little-endian i32 into the output image.
    pub fn set_i32(&mut self, slave: u16, value: i32, offset: u8) {
        let offset = offset as usize;
        let outputs = self.outputs_mut(slave);
        if offset + 4 <= outputs.len() {
            outputs[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
        }
    }

    /// Write a little-endian u32 into the output image.
    pub fn set_u32(&mut self, slave: u16, value: u32, offset: u8) {
        let offset = offset as usize;
        let outputs = self.outputs_mut(slave);
        if offset + 4 <= outputs.len() {
            outputs[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
        }
    }

    /// Read a little-endian u16 from the input image.
    pub fn input_u16(&self, slave: u16, offset: u8) -> u16 {
        let offset = offset as usize;
        let inputs = self.inputs(slave);
        if offset + 2 <= inputs.len() {
            u16::from_le_bytes([inputs[offset], inputs[offset + 1]])
        } else {
            0
        }
    }

    /// Read a little-endian i16 from the input image.
    pub fn input_i16(&self, slave: u16, offset: u8) -> i16 {
        self.input_u16(slave, offset) as i16
    }

    /// Read a little-endian u32 from the input image.
    pub fn input_u32(&self, slave: u16, offset: u8) -> u32 {
        let offset = offset as usize;
        let inputs = self.inputs(slave);
        if offset + 4 <= inputs.len() {
            let bytes: [u8; 4] = inputs[offset..offset + 4]
                .try_into()
                .unwrap_or([0; 4]);
            u32::from_le_bytes(bytes)
        } else {
            0
        }
    }

    /// Read a little-endian i32 from the input image.
    pub fn input_i32(&self, slave: u16, offset: u8) -> i32 {
        self.input_u32(slave, offset) as i32
    }

    /// Current staged control word.
    pub fn control_word(&self, slave: u16) -> u16 {
        let outputs = self.outputs(slave);
        let cw = rxpdo::CONTROLWORD as usize;
        if outputs.len() >= cw + 2 {
            u16::from_le_bytes([outputs[cw], outputs[cw + 1]])
        } else {
            0
        }
    }

    /// Last received status word.
    pub fn status_word(&self, slave: u16) -> u16 {
        self.input_u16(slave, txpdo::STATUSWORD)
    }

    /// Zero a slave's whole output buffer (used before fault acknowledge so
    /// the stored command cannot retrigger).
    pub fn zero_outputs(&mut self, slave: u16) {
        self.outputs_mut(slave).fill(0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cia402::status_bit;

    fn image(input_len: usize, output_len: usize) -> IoImage {
        IoImage::from_layout(&[SlaveIoSizes {
            input_len,
            output_len,
        }])
    }

    #[test]
    fn test_set_unset_bit_masks() {
        let mut img = image(15, 15);

        img.set_bit(1, control_bit::QUICK_STOP, rxpdo::CONTROLWORD);
        img.set_bit(1, control_bit::ENABLE_VOLTAGE, rxpdo::CONTROLWORD);
        assert_eq!(img.output_byte(1, 0), 0b0000_0110);

        img.unset_bit(1, control_bit::QUICK_STOP, rxpdo::CONTROLWORD);
        assert_eq!(img.output_byte(1, 0), 0b0000_0010);
    }

    #[test]
    fn test_bit_index_advances_byte() {
        let mut img = image(15, 15);

        // Bit 8 relative to the control word lands in byte 1, bit 0
        img.set_bit(1, control_bit::HALT, rxpdo::CONTROLWORD);
        assert_eq!(img.output_byte(1, 0), 0);
        assert_eq!(img.output_byte(1, 1), 0b0000_0001);

        img.set_bit(1, control_bit::CHANGE_ON_SETPOINT, rxpdo::CONTROLWORD);
        assert_eq!(img.output_byte(1, 1), 0b0000_0011);
    }

    #[test]
    fn test_byte_wrap_at_buffer_end() {
        // 2-byte output buffer: bit 17 from byte 0 walks bytes 1, then
        // wraps to 0 and lands on bit 1
        let mut img = image(2, 2);
        img.set_bit(1, 17, 0);
        assert_eq!(img.output_byte(1, 0), 0b0000_0010);
        assert_eq!(img.output_byte(1, 1), 0);

        // Same walk on the input side
        let mut img = image(2, 2);
        img.inputs_mut(1)[0] = 0b0000_0010;
        assert!(img.input_bit(1, 17, 0));
    }

    #[test]
    fn test_unset_control_clears_only_mode_bits() {
        let mut img = image(15, 15);
        // Stage every control bit
        img.set_u16(1, 0xFFFF, rxpdo::CONTROLWORD);

        let cw = img.unset_control(1);
        assert_eq!(cw & (1 << 4), 0);
        assert_eq!(cw & (1 << 5), 0);
        assert_eq!(cw & (1 << 6), 0);
        assert_eq!(cw & (1 << 9), 0);
        // Everything else untouched
        assert_eq!(cw, 0xFFFF & !((1 << 4) | (1 << 5) | (1 << 6) | (1 << 9)));
        assert_eq!(img.control_word(1), cw);
    }

    #[test]
    fn test_little_endian_roundtrip() {
        let mut img = image(15, 15);

        img.set_i32(1, 500_000, rxpdo::TARGET_POSITION);
        assert_eq!(
            &img.outputs(1)[3..7],
            &500_000i32.to_le_bytes()
        );

        img.set_u32(1, 40_000, rxpdo::PROFILE_VELOCITY);
        assert_eq!(&img.outputs(1)[7..11], &40_000u32.to_le_bytes());

        img.inputs_mut(1)[3..7].copy_from_slice(&(-123_456i32).to_le_bytes());
        assert_eq!(img.input_i32(1, txpdo::POSITION_ACTUAL), -123_456);

        img.set_u16(1, 0x1234, 0);
        assert_eq!(img.output_byte(1, 0), 0x34);
        assert_eq!(img.output_byte(1, 1), 0x12);
    }

    #[test]
    fn test_status_word_view() {
        let mut img = image(15, 15);
        img.inputs_mut(1)[0] = 0b0011_0100;
        img.inputs_mut(1)[1] = 0b0001_0000;
        assert!(img.input_bit(1, status_bit::VOLTAGE_ENABLED, txpdo::STATUSWORD));
        assert!(img.input_bit(1, status_bit::QUICK_STOP, txpdo::STATUSWORD));
        assert!(img.input_bit(1, status_bit::ACK_START, txpdo::STATUSWORD));
        assert!(!img.input_bit(1, status_bit::FAULT, txpdo::STATUSWORD));
        assert_eq!(img.status_word(1), 0b0001_0000_0011_0100);
    }

    #[test]
    fn test_zero_outputs() {
        let mut img = image(15, 15);
        img.set_u16(1, 0xFFFF, 0);
        img.set_i32(1, -1, rxpdo::TARGET_POSITION);
        img.zero_outputs(1);
        assert!(img.outputs(1).iter().all(|&b| b == 0));
    }

    #[test]
    fn test_bus_slot_is_inert() {
        let mut img = image(15, 15);
        assert_eq!(img.set_bit(0, 4, 0), 0);
        assert_eq!(img.unset_control(0), 0);
        assert!(!img.input_bit(0, 0, 0));
        assert_eq!(img.slave_count(), 1);
    }
}
