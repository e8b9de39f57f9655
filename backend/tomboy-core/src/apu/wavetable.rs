use crate::apu::components::{TimerTickEffect, WavetableLengthCounter, WavetableTimer};
use bincode::{Decode, Encode};
use tomboy_common::num::GetBit;

#[derive(Debug, Clone, Encode, Decode)]
pub struct WavetableChannel {
    ram: [u8; 16],
    sample_buffer: u8,
    timer: WavetableTimer,
    length_counter: WavetableLengthCounter,
    volume: u8,
    channel_enabled: bool,
    dac_enabled: bool,
}

impl WavetableChannel {
    pub fn new() -> Self {
        Self {
            ram: [0; 16],
            sample_buffer: 0,
            timer: WavetableTimer::new(),
            length_counter: WavetableLengthCounter::new(),
            volume: 0,
            channel_enabled: false,
            dac_enabled: false,
        }
    }

    pub fn read_ram(&self, address: u32) -> u8 {
        // While the channel is playing, reads are redirected to the byte the channel is
        // currently sampling
        if self.channel_enabled {
            return self.ram[(self.timer.phase >> 1) as usize];
        }

        self.ram[(address & 0xF) as usize]
    }

    pub fn write_ram(&mut self, address: u32, value: u8) {
        if self.channel_enabled {
            self.ram[(self.timer.phase >> 1) as usize] = value;
            return;
        }

        self.ram[(address & 0xF) as usize] = value;
    }

    pub fn read_register_0(&self) -> u8 {
        0x7F | (u8::from(self.dac_enabled) << 7)
    }

    pub fn write_register_0(&mut self, value: u8) {
        // NR30: Wave DAC enabled
        self.dac_enabled = value.bit(7);

        if !self.dac_enabled {
            self.channel_enabled = false;
        }

        log::trace!("NR30 write, DAC enabled: {}", self.dac_enabled);
    }

    pub fn write_register_1(&mut self, value: u8) {
        // NR31: Wave length counter reload
        self.length_counter.load(value);

        log::trace!("NR31 write, length counter: {}", self.length_counter.counter);
    }

    pub fn read_register_2(&self) -> u8 {
        0x9F | (self.volume << 5)
    }

    pub fn write_register_2(&mut self, value: u8) {
        // NR32: Wave output level
        self.volume = (value >> 5) & 0x03;

        log::trace!("NR32 write, output level: {}", self.volume);
    }

    pub fn write_register_3(&mut self, value: u8) {
        // NR33: Wave period low bits
        self.timer.write_period_low(value);

        log::trace!("NR33 write, timer period: {}", self.timer.period());
    }

    pub fn read_register_4(&self) -> u8 {
        0xBF | (u8::from(self.length_counter.enabled) << 6)
    }

    pub fn write_register_4(&mut self, value: u8) {
        // NR34: Wave period high bits + length counter enabled + trigger
        self.timer.write_period_high(value);
        self.length_counter.set_enabled(value.bit(6));

        if value.bit(7) && self.dac_enabled {
            // Channel triggered; a trigger with the DAC disabled is ignored
            self.channel_enabled = true;

            self.timer.trigger();
            self.timer.phase = 0;
            self.length_counter.trigger();
        }

        log::trace!("NR34 write");
        log::trace!("  Timer period: {}", self.timer.period());
        log::trace!("  Length counter enabled: {}", self.length_counter.enabled);
        log::trace!("  Triggered: {}", value.bit(7));
    }

    pub fn tick_bus_cycle(&mut self) {
        if !self.channel_enabled {
            return;
        }

        if self.timer.tick_bus_cycle() == TimerTickEffect::Clocked {
            self.sample_buffer = self.ram[(self.timer.phase >> 1) as usize];
        }
    }

    pub fn clock_length_counter(&mut self) {
        let prev_enabled = self.channel_enabled;
        self.length_counter.clock(&mut self.channel_enabled);

        if prev_enabled && !self.channel_enabled {
            // The channel continues to output the current sample buffer while disabled, as long
            // as the DAC is still on; clear it so a stopped channel goes quiet
            self.sample_buffer = 0;
        }
    }

    /// Current 4-bit DAC level, or None if the DAC is disabled
    #[must_use]
    pub fn sample(&self) -> Option<u8> {
        if !self.dac_enabled {
            return None;
        }

        // First sample in the high nibble, second in the low nibble
        let sample = if !self.timer.phase.bit(0) {
            self.sample_buffer >> 4
        } else {
            self.sample_buffer & 0xF
        };

        // Output level: mute / 100% / 50% / 25%
        let shift = [4, 0, 1, 2][self.volume as usize];
        Some(sample >> shift)
    }

    #[must_use]
    pub fn enabled(&self) -> bool {
        self.channel_enabled
    }

    /// Reset everything except wave RAM, which survives APU power-down
    pub fn reset(&mut self) {
        *self = Self { ram: self.ram, ..Self::new() };
    }
}
