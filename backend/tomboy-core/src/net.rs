//! Network port
//!
//! Actual networking lives in the host shell; the core models the send/recv RAM pages and a
//! control register that must respond correctly to reads/writes, completing transfers after a
//! fixed cycle count.

use crate::cpu::InterruptType;
use crate::interrupts::InterruptRegisters;
use bincode::{Decode, Encode};
use tomboy_common::boxedarray::BoxedByteArray;
use tomboy_common::num::GetBit;

pub const NET_RAM_LEN: usize = 4096;

// Transfers complete in a fixed cycle count, roughly 4 ms of emulated time
const TRANSFER_BUS_CYCLES: u32 = 4096;

#[derive(Debug, Clone, Encode, Decode)]
pub struct NetworkPort {
    send_ram: BoxedByteArray<NET_RAM_LEN>,
    recv_ram: BoxedByteArray<NET_RAM_LEN>,
    transfer_enabled: bool,
    internal_clock: bool,
    transfer_cycles_remaining: u32,
}

impl NetworkPort {
    pub fn new() -> Self {
        Self {
            send_ram: BoxedByteArray::new(),
            recv_ram: BoxedByteArray::new(),
            transfer_enabled: false,
            internal_clock: false,
            transfer_cycles_remaining: 0,
        }
    }

    pub fn tick_bus_cycle(&mut self, interrupt_registers: &mut InterruptRegisters) {
        if !self.transfer_enabled || !self.internal_clock || self.transfer_cycles_remaining == 0 {
            return;
        }

        self.transfer_cycles_remaining -= 1;
        if self.transfer_cycles_remaining == 0 {
            self.transfer_enabled = false;
            interrupt_registers.set_flag(InterruptType::Net);
        }
    }

    // NETC: Network control
    pub fn read_control(&self) -> u8 {
        0x7E | (u8::from(self.transfer_enabled) << 7) | u8::from(self.internal_clock)
    }

    // NETC: Network control
    pub fn write_control(&mut self, value: u8) {
        self.transfer_enabled = value.bit(7);
        self.internal_clock = value.bit(0);

        if self.transfer_enabled && self.internal_clock {
            self.transfer_cycles_remaining = TRANSFER_BUS_CYCLES;
        }

        log::trace!("NETC write: {value:02X}");
        log::trace!("  Transfer enabled: {}", self.transfer_enabled);
        log::trace!("  Internal clock: {}", self.internal_clock);
    }

    pub fn read_send_ram(&self, address: u32) -> u8 {
        self.send_ram[(address as usize) & (NET_RAM_LEN - 1)]
    }

    pub fn write_send_ram(&mut self, address: u32, value: u8) {
        self.send_ram[(address as usize) & (NET_RAM_LEN - 1)] = value;
    }

    pub fn read_recv_ram(&self, address: u32) -> u8 {
        self.recv_ram[(address as usize) & (NET_RAM_LEN - 1)]
    }

    pub fn write_recv_ram(&mut self, address: u32, value: u8) {
        self.recv_ram[(address as usize) & (NET_RAM_LEN - 1)] = value;
    }

    /// The page the program queued for transmission; the host shell ships it
    pub fn outgoing(&self) -> &[u8] {
        self.send_ram.as_slice()
    }

    /// The host shell stores received data where the program will read it
    pub fn deliver_incoming(&mut self, data: &[u8]) {
        let len = data.len().min(NET_RAM_LEN);
        self.recv_ram[..len].copy_from_slice(&data[..len]);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transfer_completes_and_raises_interrupt() {
        let mut port = NetworkPort::new();
        let mut interrupt_registers = InterruptRegisters::default();

        port.write_control(0x81);
        assert_eq!(port.read_control(), 0xFF);

        for _ in 0..TRANSFER_BUS_CYCLES - 1 {
            port.tick_bus_cycle(&mut interrupt_registers);
        }
        assert_eq!(interrupt_registers.read_if() & 0x08, 0);

        port.tick_bus_cycle(&mut interrupt_registers);
        assert_ne!(interrupt_registers.read_if() & 0x08, 0);
        assert_eq!(port.read_control(), 0x7F);
    }

    #[test]
    fn external_clock_transfer_never_completes() {
        let mut port = NetworkPort::new();
        let mut interrupt_registers = InterruptRegisters::default();

        port.write_control(0x80);
        for _ in 0..2 * TRANSFER_BUS_CYCLES {
            port.tick_bus_cycle(&mut interrupt_registers);
        }

        assert_eq!(port.read_control(), 0xFE);
        assert_eq!(interrupt_registers.read_if() & 0x08, 0);
    }

    #[test]
    fn ram_pages_mirror() {
        let mut port = NetworkPort::new();

        port.write_send_ram(0x0010, 0xAB);
        assert_eq!(port.read_send_ram(0x1010), 0xAB);

        port.deliver_incoming(&[1, 2, 3]);
        assert_eq!(port.read_recv_ram(0x0001), 2);
    }
}
