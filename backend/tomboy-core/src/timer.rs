//! Programmable timer: free-running 16-bit divider plus the TIMA/TMA/TAC interval counter

use crate::cpu::InterruptType;
use crate::interrupts::InterruptRegisters;
use bincode::{Decode, Encode};
use tomboy_common::num::GetBit;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Encode, Decode)]
enum ClockSelect {
    Zero,
    One,
    Two,
    Three,
}

impl ClockSelect {
    fn from_byte(byte: u8) -> Self {
        match byte & 0x3 {
            0x0 => Self::Zero,
            0x1 => Self::One,
            0x2 => Self::Two,
            0x3 => Self::Three,
            _ => unreachable!("value & 0x3 is always <= 0x3"),
        }
    }

    fn to_bits(self) -> u8 {
        match self {
            Self::Zero => 0,
            Self::One => 1,
            Self::Two => 2,
            Self::Three => 3,
        }
    }

    fn divider_bit(self) -> u8 {
        match self {
            // 4096 Hz
            Self::Zero => 9,
            // 262144 Hz
            Self::One => 3,
            // 65536 Hz
            Self::Two => 5,
            // 16384 Hz
            Self::Three => 7,
        }
    }
}

#[derive(Debug, Clone, Encode, Decode)]
pub struct Timer {
    divider: u16,
    enabled: bool,
    counter: u8,
    modulo: u8,
    clock_select: ClockSelect,
    previous_divider_bit: bool,
    reload_pending: bool,
}

impl Timer {
    pub fn new() -> Self {
        Self {
            divider: 0,
            enabled: false,
            counter: 0,
            modulo: 0,
            clock_select: ClockSelect::Zero,
            previous_divider_bit: false,
            reload_pending: false,
        }
    }

    pub fn tick_bus_cycle(&mut self, interrupt_registers: &mut InterruptRegisters) {
        // The full 16-bit divider always ticks, even when the interval counter is disabled.
        // One bus cycle is 4 master cycles
        self.divider = self.divider.wrapping_add(4);

        if !self.enabled {
            return;
        }

        // The counter reads 0x00 for one cycle after overflowing; the modulo reload lands here
        if self.reload_pending {
            self.counter = self.modulo;
            self.reload_pending = false;
            return;
        }

        self.check_for_counter_increment(interrupt_registers);
    }

    fn check_for_counter_increment(&mut self, interrupt_registers: &mut InterruptRegisters) {
        let divider_bit = self.divider.bit(self.clock_select.divider_bit());
        if self.previous_divider_bit && !divider_bit {
            let (new_counter, overflow) = self.counter.overflowing_add(1);
            self.counter = new_counter;

            if overflow {
                interrupt_registers.set_flag(InterruptType::Timer);
                self.reload_pending = true;
            }
        }

        self.previous_divider_bit = divider_bit;
    }

    // DIV: Divider
    pub fn read_div(&self) -> u8 {
        // DIV reads out as the highest 8 bits of the internal divider
        (self.divider >> 8) as u8
    }

    pub fn write_div(&mut self, interrupt_registers: &mut InterruptRegisters) {
        // Writing any value resets the divider to 0; the selected bit dropping can itself
        // clock the counter
        self.divider = 0;

        if self.enabled {
            self.check_for_counter_increment(interrupt_registers);
        }
    }

    // TIMA: Interval counter
    pub fn read_tima(&self) -> u8 {
        self.counter
    }

    pub fn write_tima(&mut self, value: u8) {
        self.counter = value;
    }

    // TMA: Interval modulo
    pub fn read_tma(&self) -> u8 {
        self.modulo
    }

    pub fn write_tma(&mut self, value: u8) {
        self.modulo = value;
    }

    // TAC: Timer control
    pub fn read_tac(&self) -> u8 {
        0xF8 | (u8::from(self.enabled) << 2) | self.clock_select.to_bits()
    }

    pub fn write_tac(&mut self, value: u8, interrupt_registers: &mut InterruptRegisters) {
        self.enabled = value.bit(2);
        self.clock_select = ClockSelect::from_byte(value);

        if self.enabled {
            self.check_for_counter_increment(interrupt_registers);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tick_cycles(timer: &mut Timer, interrupt_registers: &mut InterruptRegisters, cycles: u32) {
        assert_eq!(cycles % 4, 0);
        for _ in 0..cycles / 4 {
            timer.tick_bus_cycle(interrupt_registers);
        }
    }

    #[test]
    fn div_tracks_divider_high_byte() {
        let mut timer = Timer::new();
        let mut interrupt_registers = InterruptRegisters::default();

        tick_cycles(&mut timer, &mut interrupt_registers, 256);
        assert_eq!(timer.read_div(), 0x01);

        tick_cycles(&mut timer, &mut interrupt_registers, 256);
        assert_eq!(timer.read_div(), 0x02);
    }

    #[test]
    fn div_write_resets_to_zero() {
        let mut timer = Timer::new();
        let mut interrupt_registers = InterruptRegisters::default();

        tick_cycles(&mut timer, &mut interrupt_registers, 2048);
        assert_ne!(timer.read_div(), 0x00);

        timer.write_div(&mut interrupt_registers);
        assert_eq!(timer.read_div(), 0x00);
    }

    #[test]
    fn overflow_at_4096_hz() {
        let mut timer = Timer::new();
        let mut interrupt_registers = InterruptRegisters::default();

        // Enable + clock select 0 (4096 Hz, divider bit 9)
        timer.write_tac(0b100, &mut interrupt_registers);
        timer.write_tma(0xFD);
        timer.write_tima(0xFD);

        // 3 increments at 1024 cycles apiece; the third overflows
        tick_cycles(&mut timer, &mut interrupt_registers, 3072);
        assert_eq!(timer.read_tima(), 0x00);
        assert_ne!(interrupt_registers.read_if() & 0x04, 0);

        // The modulo reload lands on the following cycle
        timer.tick_bus_cycle(&mut interrupt_registers);
        assert_eq!(timer.read_tima(), 0xFD);
    }

    #[test]
    fn overflow_sets_flag_exactly_once() {
        let mut timer = Timer::new();
        let mut interrupt_registers = InterruptRegisters::default();

        timer.write_tac(0b101, &mut interrupt_registers);
        timer.write_tima(0xFF);

        // Clock select 1 increments every 16 cycles
        tick_cycles(&mut timer, &mut interrupt_registers, 16);
        assert_eq!(timer.read_tima(), 0x00);
        assert_ne!(interrupt_registers.read_if() & 0x04, 0);

        interrupt_registers.write_if(0x00);
        tick_cycles(&mut timer, &mut interrupt_registers, 16);
        assert_eq!(interrupt_registers.read_if() & 0x04, 0);
        assert_eq!(timer.read_tima(), 0x01);
    }

    #[test]
    fn disabled_counter_does_not_increment() {
        let mut timer = Timer::new();
        let mut interrupt_registers = InterruptRegisters::default();

        timer.write_tac(0b001, &mut interrupt_registers);
        tick_cycles(&mut timer, &mut interrupt_registers, 4096);
        assert_eq!(timer.read_tima(), 0x00);
    }
}
