//! Interrupt flag / interrupt enable registers, shared by every subsystem

use crate::cpu::InterruptType;
use bincode::{Decode, Encode};

const IMPLEMENTED_BITS: u8 = 0x3F;

#[derive(Debug, Clone, Default, Encode, Decode)]
pub struct InterruptRegisters {
    enabled: u8,
    flags: u8,
}

impl InterruptRegisters {
    pub fn read_ie(&self) -> u8 {
        self.enabled | !IMPLEMENTED_BITS
    }

    pub fn write_ie(&mut self, value: u8) {
        self.enabled = value & IMPLEMENTED_BITS;
    }

    pub fn read_if(&self) -> u8 {
        self.flags | !IMPLEMENTED_BITS
    }

    pub fn write_if(&mut self, value: u8) {
        self.flags = value & IMPLEMENTED_BITS;
    }

    pub fn set_flag(&mut self, interrupt_type: InterruptType) {
        log::trace!("Interrupt flag set: {interrupt_type:?}");

        self.flags |= interrupt_type.register_mask();
    }

    pub fn clear_flag(&mut self, interrupt_type: InterruptType) {
        log::trace!("Interrupt flag cleared: {interrupt_type:?}");

        self.flags &= !interrupt_type.register_mask();
    }

    pub fn none_pending(&self) -> bool {
        self.enabled == 0 && self.flags == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unimplemented_bits_read_high() {
        let mut registers = InterruptRegisters::default();
        registers.write_ie(0xFF);
        registers.write_if(0xFF);

        assert_eq!(registers.read_ie(), 0xFF);
        assert_eq!(registers.read_if(), 0xFF);

        registers.write_ie(0x00);
        registers.write_if(0x00);
        assert_eq!(registers.read_ie(), 0xC0);
        assert_eq!(registers.read_if(), 0xC0);
    }

    #[test]
    fn set_and_clear_flags() {
        let mut registers = InterruptRegisters::default();

        registers.set_flag(InterruptType::Timer);
        registers.set_flag(InterruptType::Rtc);
        assert_eq!(registers.read_if() & 0x3F, 0x24);

        registers.clear_flag(InterruptType::Timer);
        assert_eq!(registers.read_if() & 0x3F, 0x20);
    }
}
