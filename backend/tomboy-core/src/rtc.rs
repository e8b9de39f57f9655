//! Real-time clock ports
//!
//! The wall clock is only consulted when the latch register is written; the once-per-second
//! interrupt is counted in emulated cycles so that execution stays deterministic.

use crate::cpu::InterruptType;
use crate::interrupts::InterruptRegisters;
use bincode::{Decode, Encode};
use tomboy_common::num::{GetBit, U16Ext};
use tomboy_common::timeutils;

// 2^22 master cycles = one emulated second of bus cycles
const BUS_CYCLES_PER_SECOND: u32 = 1 << 20;

#[derive(Debug, Clone, Copy, Default, Encode, Decode)]
struct RtcTime {
    nanos: u32,
    seconds: u8,
    minutes: u8,
    hours: u8,
    days: u16,
    day_overflow: bool,
}

#[derive(Debug, Clone, Encode, Decode)]
pub struct RealTimeClock {
    current_time: RtcTime,
    latched_time: RtcTime,
    last_update_nanos: u128,
    halted: bool,
    interrupt_enabled: bool,
    interrupt_cycle_counter: u32,
}

impl RealTimeClock {
    pub fn new() -> Self {
        Self {
            current_time: RtcTime::default(),
            latched_time: RtcTime::default(),
            last_update_nanos: timeutils::current_time_nanos(),
            halted: false,
            interrupt_enabled: false,
            interrupt_cycle_counter: 0,
        }
    }

    pub fn tick_bus_cycle(&mut self, interrupt_registers: &mut InterruptRegisters) {
        if !self.interrupt_enabled {
            return;
        }

        self.interrupt_cycle_counter += 1;
        if self.interrupt_cycle_counter == BUS_CYCLES_PER_SECOND {
            self.interrupt_cycle_counter = 0;
            interrupt_registers.set_flag(InterruptType::Rtc);
        }
    }

    pub fn read_register(&self, port: u8) -> u8 {
        match port {
            // RTCS/RTCM/RTCH: latched time of day
            0x08 => self.latched_time.seconds,
            0x09 => self.latched_time.minutes,
            0x0A => self.latched_time.hours,
            // RTCDH: day counter high bit + halt + day overflow
            0x0B => {
                (self.latched_time.days.msb() & 0x01)
                    | (u8::from(self.halted) << 6)
                    | (u8::from(self.latched_time.day_overflow) << 7)
            }
            // RTCDL: day counter low byte
            0x0C => self.latched_time.days.lsb(),
            // RTCL is write-only
            0x0D => 0xFF,
            // RTCR: control
            0x0E => {
                0xBE | (u8::from(self.interrupt_enabled) << 6) | u8::from(self.halted)
            }
            _ => 0xFF,
        }
    }

    pub fn write_register(&mut self, port: u8, value: u8) {
        match port {
            0x08 => {
                self.current_time.seconds = value % 60;
            }
            0x09 => {
                self.current_time.minutes = value % 60;
            }
            0x0A => {
                self.current_time.hours = value % 24;
            }
            0x0B => {
                self.current_time.days.set_msb(value & 0x01);
                self.current_time.day_overflow = value.bit(7);
            }
            0x0C => {
                self.current_time.days.set_lsb(value);
            }
            0x0D => {
                // Any write latches the live time into the readable registers
                self.update_time();
                self.latched_time = self.current_time;

                log::trace!("RTC latched to {:?}", self.latched_time);
            }
            0x0E => {
                self.interrupt_enabled = value.bit(6);
                self.halted = value.bit(0);

                log::trace!(
                    "RTCR write: {value:02X} (halted = {}, interrupt enabled = {})",
                    self.halted,
                    self.interrupt_enabled
                );
            }
            _ => {}
        }
    }

    fn update_time(&mut self) {
        let current_time_nanos = timeutils::current_time_nanos();
        if current_time_nanos < self.last_update_nanos {
            log::error!(
                "Time has gone backwards; last update was at {} ns, current time is {current_time_nanos} ns",
                self.last_update_nanos
            );
            self.last_update_nanos = current_time_nanos;
            return;
        }

        if self.halted {
            self.last_update_nanos = current_time_nanos;
            return;
        }

        let elapsed_nanos = current_time_nanos - self.last_update_nanos;
        self.last_update_nanos = current_time_nanos;

        let new_nanos = u128::from(self.current_time.nanos) + elapsed_nanos;
        self.current_time.nanos = (new_nanos % 1_000_000_000) as u32;
        if new_nanos < 1_000_000_000 {
            return;
        }

        let new_seconds = u64::from(self.current_time.seconds) + (new_nanos / 1_000_000_000) as u64;
        self.current_time.seconds = (new_seconds % 60) as u8;
        if new_seconds < 60 {
            return;
        }

        let new_minutes = u64::from(self.current_time.minutes) + new_seconds / 60;
        self.current_time.minutes = (new_minutes % 60) as u8;
        if new_minutes < 60 {
            return;
        }

        let new_hours = u64::from(self.current_time.hours) + new_minutes / 60;
        self.current_time.hours = (new_hours % 24) as u8;
        if new_hours < 24 {
            return;
        }

        let new_days = u64::from(self.current_time.days) + new_hours / 24;
        self.current_time.days = (new_days % 512) as u16;
        if new_days >= 512 {
            self.current_time.day_overflow = true;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn latch_exposes_written_time() {
        let mut rtc = RealTimeClock::new();

        rtc.write_register(0x08, 30);
        rtc.write_register(0x09, 15);
        rtc.write_register(0x0A, 8);
        rtc.write_register(0x0C, 200);

        // Nothing visible until the latch write
        assert_eq!(rtc.read_register(0x08), 0);

        rtc.write_register(0x0D, 0x00);
        assert_eq!(rtc.read_register(0x08), 30);
        assert_eq!(rtc.read_register(0x09), 15);
        assert_eq!(rtc.read_register(0x0A), 8);
        assert_eq!(rtc.read_register(0x0C), 200);
    }

    #[test]
    fn second_interrupt_when_enabled() {
        let mut rtc = RealTimeClock::new();
        let mut interrupt_registers = InterruptRegisters::default();

        rtc.write_register(0x0E, 0x40);
        for _ in 0..BUS_CYCLES_PER_SECOND - 1 {
            rtc.tick_bus_cycle(&mut interrupt_registers);
        }
        assert_eq!(interrupt_registers.read_if() & 0x20, 0);

        rtc.tick_bus_cycle(&mut interrupt_registers);
        assert_ne!(interrupt_registers.read_if() & 0x20, 0);
    }

    #[test]
    fn control_register_round_trip() {
        let mut rtc = RealTimeClock::new();
        assert_eq!(rtc.read_register(0x0E), 0xBE);

        rtc.write_register(0x0E, 0x41);
        assert_eq!(rtc.read_register(0x0E), 0xFF);
    }
}
