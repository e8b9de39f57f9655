//! APU: two pulse channels, one wavetable channel, one LFSR noise channel, mixed to stereo

mod components;
mod noise;
mod pulse;
mod wavetable;

use crate::apu::noise::NoiseChannel;
use crate::apu::pulse::PulseChannel;
use crate::apu::wavetable::WavetableChannel;
use crate::audio::SampleClock;
use crate::control::CpuSpeed;
use crate::timer::Timer;
use bincode::{Decode, Encode};
use std::array;
use tomboy_common::num::GetBit;

#[derive(Debug, Clone, Copy, Encode, Decode)]
struct StereoControl {
    left_volume: u8,
    right_volume: u8,
    vin_bits: u8,
    left_channels: [bool; 4],
    right_channels: [bool; 4],
}

impl StereoControl {
    fn zero() -> Self {
        Self {
            left_volume: 0,
            right_volume: 0,
            vin_bits: 0,
            left_channels: [false; 4],
            right_channels: [false; 4],
        }
    }

    fn read_volume(&self) -> u8 {
        (self.left_volume << 4) | self.right_volume | self.vin_bits
    }

    fn write_volume(&mut self, value: u8) {
        self.left_volume = (value >> 4) & 0x07;
        self.right_volume = value & 0x07;
        // VIN has no source on this console; the pan bits are plain storage
        self.vin_bits = value & 0x88;

        log::trace!("NR50 write");
        log::trace!("  L volume: {}", self.left_volume);
        log::trace!("  R volume: {}", self.right_volume);
    }

    fn read_enabled(&self) -> u8 {
        let high_nibble = stereo_channels_to_nibble(self.left_channels);
        let low_nibble = stereo_channels_to_nibble(self.right_channels);
        (high_nibble << 4) | low_nibble
    }

    fn write_enabled(&mut self, value: u8) {
        self.left_channels = array::from_fn(|i| value.bit(4 + i as u8));
        self.right_channels = array::from_fn(|i| value.bit(i as u8));

        log::trace!("NR51 write");
        log::trace!("  L enabled: {:?}", self.left_channels);
        log::trace!("  R enabled: {:?}", self.right_channels);
    }
}

fn stereo_channels_to_nibble(channels: [bool; 4]) -> u8 {
    channels.into_iter().enumerate().map(|(i, b)| u8::from(b) << i).reduce(|a, b| a | b).unwrap()
}

#[derive(Debug, Clone, Encode, Decode)]
pub struct Apu {
    enabled: bool,
    pulse_1: PulseChannel,
    pulse_2: PulseChannel,
    wavetable: WavetableChannel,
    noise: NoiseChannel,
    stereo_control: StereoControl,
    frame_sequencer_step: u8,
    previous_div_bit: bool,
    sample_clock: SampleClock,
}

impl Apu {
    pub fn new() -> Self {
        Self {
            enabled: false,
            pulse_1: PulseChannel::new(),
            pulse_2: PulseChannel::new(),
            wavetable: WavetableChannel::new(),
            noise: NoiseChannel::new(),
            stereo_control: StereoControl::zero(),
            frame_sequencer_step: 0,
            previous_div_bit: false,
            sample_clock: SampleClock::new(),
        }
    }

    pub fn tick_bus_cycle(&mut self, timer: &Timer, cpu_speed: CpuSpeed) {
        let div_bit_index = match cpu_speed {
            CpuSpeed::Normal => 4,
            CpuSpeed::Double => 5,
        };

        let div_bit = timer.read_div().bit(div_bit_index);
        if self.previous_div_bit && !div_bit {
            self.frame_sequencer_step = (self.frame_sequencer_step + 1) & 7;

            if self.enabled {
                // Length counters at 256 Hz, envelopes at 64 Hz, pulse 1 sweep at 128 Hz
                if !self.frame_sequencer_step.bit(0) {
                    self.clock_length_counters();
                }

                if self.frame_sequencer_step == 7 {
                    self.clock_envelopes();
                }

                if self.frame_sequencer_step == 2 || self.frame_sequencer_step == 6 {
                    self.pulse_1.clock_sweep();
                }
            }
        }
        self.previous_div_bit = div_bit;

        if !self.enabled {
            self.sample_clock.collect_sample(0.0, 0.0);
            return;
        }

        self.pulse_1.tick_bus_cycle();
        self.pulse_2.tick_bus_cycle();
        self.wavetable.tick_bus_cycle();
        self.noise.tick_bus_cycle();

        self.generate_sample();
    }

    fn generate_sample(&mut self) {
        // Channel DAC outputs in the range [-15, +15]
        let channel_samples = [
            digital_to_analog(self.pulse_1.sample()),
            digital_to_analog(self.pulse_2.sample()),
            digital_to_analog(self.wavetable.sample()),
            digital_to_analog(self.noise.sample()),
        ];

        let mut sample_l = 0;
        let mut sample_r = 0;
        for (i, channel_sample) in channel_samples.into_iter().enumerate() {
            sample_l += i32::from(self.stereo_control.left_channels[i]) * channel_sample;
            sample_r += i32::from(self.stereo_control.right_channels[i]) * channel_sample;
        }

        // L/R sums are in [-60, +60]; the volume multiplier is 1-8, so the scaled values land in
        // [-480, +480] and divide out to [-1.0, +1.0]
        sample_l *= i32::from(self.stereo_control.left_volume + 1);
        sample_r *= i32::from(self.stereo_control.right_volume + 1);

        self.sample_clock.collect_sample(sample_l as f32 / 480.0, sample_r as f32 / 480.0);
    }

    fn clock_length_counters(&mut self) {
        self.pulse_1.clock_length_counter();
        self.pulse_2.clock_length_counter();
        self.wavetable.clock_length_counter();
        self.noise.clock_length_counter();
    }

    fn clock_envelopes(&mut self) {
        self.pulse_1.clock_envelope();
        self.pulse_2.clock_envelope();
        self.noise.clock_envelope();
    }

    pub fn pop_sample(&mut self) -> Option<(f32, f32)> {
        self.sample_clock.pop_sample()
    }

    pub fn read_register(&self, address: u32) -> u8 {
        log::trace!("APU read register {address:08X}");

        let port = address & 0x7F;

        if !self.enabled && (0x10..=0x25).contains(&port) {
            // Powering down the APU clears NR10-NR51 and they read as zero until power-up
            return 0x00;
        }

        match port {
            0x10 => self.pulse_1.read_register_0(),
            0x11 => self.pulse_1.read_register_1(),
            0x12 => self.pulse_1.read_register_2(),
            0x14 => self.pulse_1.read_register_4(),
            0x16 => self.pulse_2.read_register_1(),
            0x17 => self.pulse_2.read_register_2(),
            0x19 => self.pulse_2.read_register_4(),
            0x1A => self.wavetable.read_register_0(),
            0x1C => self.wavetable.read_register_2(),
            0x1E => self.wavetable.read_register_4(),
            0x21 => self.noise.read_register_2(),
            0x22 => self.noise.read_register_3(),
            0x23 => self.noise.read_register_4(),
            0x24 => self.stereo_control.read_volume(),
            0x25 => self.stereo_control.read_enabled(),
            0x26 => self.read_nr52(),
            0x30..=0x3F => self.wavetable.read_ram(address),
            _ => 0xFF,
        }
    }

    fn read_nr52(&self) -> u8 {
        (u8::from(self.enabled) << 7)
            | (u8::from(self.noise.enabled()) << 3)
            | (u8::from(self.wavetable.enabled()) << 2)
            | (u8::from(self.pulse_2.enabled()) << 1)
            | u8::from(self.pulse_1.enabled())
    }

    pub fn write_register(&mut self, address: u32, value: u8) {
        log::trace!("APU write register {address:08X} {value:02X}");

        let port = address & 0x7F;

        if !self.enabled && port != 0x26 && !(0x30..=0x3F).contains(&port) {
            // While the APU is disabled, writes are only allowed to NR52 and wave RAM
            return;
        }

        match port {
            0x10 => self.pulse_1.write_register_0(value),
            0x11 => self.pulse_1.write_register_1(value),
            0x12 => self.pulse_1.write_register_2(value),
            0x13 => self.pulse_1.write_register_3(value),
            0x14 => self.pulse_1.write_register_4(value, true),
            0x16 => self.pulse_2.write_register_1(value),
            0x17 => self.pulse_2.write_register_2(value),
            0x18 => self.pulse_2.write_register_3(value),
            0x19 => self.pulse_2.write_register_4(value, false),
            0x1A => self.wavetable.write_register_0(value),
            0x1B => self.wavetable.write_register_1(value),
            0x1C => self.wavetable.write_register_2(value),
            0x1D => self.wavetable.write_register_3(value),
            0x1E => self.wavetable.write_register_4(value),
            0x20 => self.noise.write_register_1(value),
            0x21 => self.noise.write_register_2(value),
            0x22 => self.noise.write_register_3(value),
            0x23 => self.noise.write_register_4(value),
            0x24 => self.stereo_control.write_volume(value),
            0x25 => self.stereo_control.write_enabled(value),
            0x26 => self.write_nr52(value),
            0x30..=0x3F => self.wavetable.write_ram(address, value),
            _ => {}
        }
    }

    fn write_nr52(&mut self, value: u8) {
        let prev_enabled = self.enabled;
        self.enabled = value.bit(7);

        if prev_enabled && !self.enabled {
            // Reset all channel and register state; wave RAM is kept
            self.pulse_1 = PulseChannel::new();
            self.pulse_2 = PulseChannel::new();
            self.wavetable.reset();
            self.noise = NoiseChannel::new();
            self.stereo_control = StereoControl::zero();
        } else if !prev_enabled && self.enabled {
            // Reset frame sequencer step
            self.frame_sequencer_step = 7;
        }

        log::trace!("NR52 write, APU enabled: {}", self.enabled);
    }

    // Wave RAM is also reachable through its own bus window, not just the port page
    pub fn read_wave_ram(&self, address: u32) -> u8 {
        self.wavetable.read_ram(address)
    }

    pub fn write_wave_ram(&mut self, address: u32, value: u8) {
        self.wavetable.write_ram(address, value);
    }

    // PCM12: live DAC outputs of pulse 1 (low nibble) and pulse 2 (high nibble)
    pub fn read_pcm12(&self) -> u8 {
        let pulse_1 = self.pulse_1.sample().unwrap_or(0);
        let pulse_2 = self.pulse_2.sample().unwrap_or(0);
        (pulse_2 << 4) | pulse_1
    }

    // PCM34: live DAC outputs of wave (low nibble) and noise (high nibble)
    pub fn read_pcm34(&self) -> u8 {
        let wave = self.wavetable.sample().unwrap_or(0);
        let noise = self.noise.sample().unwrap_or(0);
        (noise << 4) | wave
    }
}

fn digital_to_analog(sample: Option<u8>) -> i32 {
    let Some(sample) = sample else { return 0 };

    // Map 0 to -15 and 15 to +15
    (2 * i32::from(sample)) - 15
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interrupts::InterruptRegisters;

    fn apu_with_timer() -> (Apu, Timer, InterruptRegisters) {
        let mut apu = Apu::new();
        apu.write_register(0xFFFFFF26, 0x80);
        (apu, Timer::new(), InterruptRegisters::default())
    }

    fn tick(apu: &mut Apu, timer: &mut Timer, interrupt_registers: &mut InterruptRegisters) {
        timer.tick_bus_cycle(interrupt_registers);
        apu.tick_bus_cycle(timer, CpuSpeed::Normal);
    }

    #[test]
    fn nr52_reflects_channel_enables() {
        let (mut apu, ..) = apu_with_timer();

        assert_eq!(apu.read_register(0xFFFFFF26), 0x80);

        // Trigger pulse 2 with a valid DAC
        apu.write_register(0xFFFFFF17, 0xF0);
        apu.write_register(0xFFFFFF19, 0x80);
        assert_eq!(apu.read_register(0xFFFFFF26), 0x82);
    }

    #[test]
    fn powering_down_clears_registers() {
        let (mut apu, ..) = apu_with_timer();

        apu.write_register(0xFFFFFF24, 0x77);
        apu.write_register(0xFFFFFF25, 0xFF);
        apu.write_register(0xFFFFFF12, 0xF3);

        apu.write_register(0xFFFFFF26, 0x00);
        for port in 0x10..=0x25_u32 {
            assert_eq!(apu.read_register(0xFFFFFF00 | port), 0x00, "port {port:02X}");
        }

        // Writes other than NR52/wave RAM are ignored while powered down
        apu.write_register(0xFFFFFF24, 0x55);
        apu.write_register(0xFFFFFF26, 0x80);
        assert_eq!(apu.read_register(0xFFFFFF24), 0x00);
    }

    #[test]
    fn wave_ram_survives_power_down() {
        let (mut apu, ..) = apu_with_timer();

        apu.write_register(0xFFFFFF30, 0xAB);
        apu.write_register(0xFFFFFF26, 0x00);
        assert_eq!(apu.read_register(0xFFFFFF30), 0xAB);

        apu.write_register(0xFFFFFF31, 0xCD);
        assert_eq!(apu.read_register(0xFFFFFF31), 0xCD);
    }

    #[test]
    fn length_counter_expires_at_256_hz() {
        let (mut apu, mut timer, mut interrupt_registers) = apu_with_timer();

        // Pulse 1: length 63 (counter = 1), length enable + trigger
        apu.write_register(0xFFFFFF12, 0xF0);
        apu.write_register(0xFFFFFF11, 63);
        apu.write_register(0xFFFFFF14, 0xC0);
        assert_eq!(apu.read_register(0xFFFFFF26), 0x81);

        // Two frame-sequencer steps guarantee one length clock. One step happens per falling
        // edge of DIV bit 4, i.e. every 8192 master cycles
        for _ in 0..2 * 8192 / 4 {
            tick(&mut apu, &mut timer, &mut interrupt_registers);
        }

        assert_eq!(apu.read_register(0xFFFFFF26), 0x80);
    }

    #[test]
    fn pcm_ports_expose_dac_levels() {
        let (mut apu, ..) = apu_with_timer();

        // Idle DACs read zero
        assert_eq!(apu.read_pcm12(), 0x00);

        // Pulse 2 at 3/4 duty outputs its volume at phase 0
        apu.write_register(0xFFFFFF17, 0xA0);
        apu.write_register(0xFFFFFF16, 0b1100_0000);
        apu.write_register(0xFFFFFF19, 0x80);
        assert_eq!(apu.read_pcm12(), 0xA0);
    }
}
