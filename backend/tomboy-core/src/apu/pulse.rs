use crate::apu::components::{Envelope, PulseTimer, StandardLengthCounter};
use bincode::{Decode, Encode};
use tomboy_common::num::GetBit;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Encode, Decode)]
enum DutyCycle {
    #[default]
    OneEighth,
    OneFourth,
    OneHalf,
    ThreeFourths,
}

impl DutyCycle {
    fn waveform_step(self, phase: u8) -> bool {
        let table: u8 = match self {
            Self::OneEighth => 0b0000_0001,
            Self::OneFourth => 0b0000_0011,
            Self::OneHalf => 0b0000_1111,
            Self::ThreeFourths => 0b1111_1100,
        };

        // Step 0 is the most significant bit
        table.bit(7 - phase)
    }

    fn from_byte(byte: u8) -> Self {
        match (byte >> 6) & 0x03 {
            0x00 => Self::OneEighth,
            0x01 => Self::OneFourth,
            0x02 => Self::OneHalf,
            0x03 => Self::ThreeFourths,
            _ => unreachable!("value & 0x03 is always <= 0x03"),
        }
    }

    fn to_bits(self) -> u8 {
        match self {
            Self::OneEighth => 0x00,
            Self::OneFourth => 0x40,
            Self::OneHalf => 0x80,
            Self::ThreeFourths => 0xC0,
        }
    }
}

#[derive(Debug, Clone, Encode, Decode)]
struct SweepUnit {
    enabled: bool,
    shadow_period: u16,
    counter: u8,
    pace: u8,
    shift: u8,
    negate: bool,
}

impl SweepUnit {
    fn new() -> Self {
        Self { enabled: false, shadow_period: 0, counter: 0, pace: 0, shift: 0, negate: false }
    }

    fn clock(&mut self, timer: &mut PulseTimer, channel_enabled: &mut bool) {
        if !self.enabled {
            return;
        }

        self.counter -= 1;
        if self.counter == 0 {
            self.counter = self.counter_reload_value();

            if self.pace == 0 {
                // Pace of 0 disables sweep updates (but not the sweep unit counter; a pace of 0
                // is treated as 8 as far as the counter is concerned)
                return;
            }

            let next_period = self.calculate_next_period();
            if next_period <= 2047 && self.shift != 0 {
                self.shadow_period = next_period;
                timer.write_period(next_period);

                // When sweep adjusts the period, it immediately runs another calculation and
                // disables the channel if the second calculation overflows
                if self.calculate_next_period() > 2047 {
                    *channel_enabled = false;
                }
            } else if next_period > 2047 {
                *channel_enabled = false;
            }
        }
    }

    fn calculate_next_period(&self) -> u16 {
        let mut delta = self.shadow_period >> self.shift;
        if self.negate {
            delta = (!delta).wrapping_add(1);
        }

        self.shadow_period.wrapping_add(delta)
    }

    fn trigger(&mut self, timer: PulseTimer, channel_enabled: &mut bool) {
        self.shadow_period = timer.period();
        self.counter = self.counter_reload_value();

        self.enabled = self.pace != 0 || self.shift != 0;

        // If shift is non-zero, trigger immediately runs an overflow check without writing the
        // result back
        if self.shift != 0 && self.calculate_next_period() > 2047 {
            *channel_enabled = false;
        }
    }

    fn counter_reload_value(&self) -> u8 {
        if self.pace == 0 { 8 } else { self.pace }
    }

    fn read_register(&self) -> u8 {
        0x80 | (self.pace << 4) | (u8::from(self.negate) << 3) | self.shift
    }

    fn write_register(&mut self, value: u8) {
        self.pace = (value >> 4) & 0x07;
        self.negate = value.bit(3);
        self.shift = value & 0x07;

        if self.counter == 0 {
            self.counter = self.pace;
        }
    }
}

#[derive(Debug, Clone, Encode, Decode)]
pub struct PulseChannel {
    duty_cycle: DutyCycle,
    length_counter: StandardLengthCounter,
    envelope: Envelope,
    sweep: SweepUnit,
    timer: PulseTimer,
    channel_enabled: bool,
    dac_enabled: bool,
}

impl PulseChannel {
    pub fn new() -> Self {
        Self {
            duty_cycle: DutyCycle::default(),
            length_counter: StandardLengthCounter::new(),
            envelope: Envelope::new(),
            sweep: SweepUnit::new(),
            timer: PulseTimer::new(),
            channel_enabled: false,
            dac_enabled: false,
        }
    }

    pub fn clock_sweep(&mut self) {
        self.sweep.clock(&mut self.timer, &mut self.channel_enabled);
    }

    pub fn clock_length_counter(&mut self) {
        self.length_counter.clock(&mut self.channel_enabled);
    }

    pub fn clock_envelope(&mut self) {
        self.envelope.clock();
    }

    pub fn tick_bus_cycle(&mut self) {
        if !self.channel_enabled {
            return;
        }

        self.timer.tick_bus_cycle();
    }

    /// Current 4-bit DAC level, or None if the DAC is disabled
    #[must_use]
    pub fn sample(&self) -> Option<u8> {
        if !self.dac_enabled {
            return None;
        }

        if !self.channel_enabled {
            return Some(0);
        }

        let waveform_step = self.duty_cycle.waveform_step(self.timer.phase);
        Some(u8::from(waveform_step) * self.envelope.volume)
    }

    #[must_use]
    pub fn read_register_0(&self) -> u8 {
        self.sweep.read_register()
    }

    pub fn write_register_0(&mut self, value: u8) {
        // NR10: Pulse 1 sweep control
        self.sweep.write_register(value);

        log::trace!("NR10 write, sweep: {:?}", self.sweep);
    }

    #[must_use]
    pub fn read_register_1(&self) -> u8 {
        // Length reload bits are write-only
        0x3F | self.duty_cycle.to_bits()
    }

    pub fn write_register_1(&mut self, value: u8) {
        // NR11/NR21: Pulse duty cycle and length counter reload
        self.duty_cycle = DutyCycle::from_byte(value);
        self.length_counter.load(value);

        log::trace!("NRx1 write");
        log::trace!("  Duty cycle: {:?}", self.duty_cycle);
        log::trace!("  Length counter: {}", self.length_counter.counter);
    }

    #[must_use]
    pub fn read_register_2(&self) -> u8 {
        self.envelope.read_register()
    }

    pub fn write_register_2(&mut self, value: u8) {
        // NR12/NR22: Pulse envelope control
        self.envelope.write_register(value);
        self.dac_enabled = value & 0xF8 != 0;

        if !self.dac_enabled {
            // Disabling DAC always disables the channel
            self.channel_enabled = false;
        }

        log::trace!("NRx2 write");
        log::trace!("  Envelope: {:?}", self.envelope);
        log::trace!("  DAC enabled: {}", self.dac_enabled);
    }

    pub fn write_register_3(&mut self, value: u8) {
        // NR13/NR23: Pulse period low bits
        self.timer.write_period_low(value);

        log::trace!("NRx3 write, timer period: {}", self.timer.period());
    }

    #[must_use]
    pub fn read_register_4(&self) -> u8 {
        // Period bits and the trigger bit are write-only
        0xBF | (u8::from(self.length_counter.enabled) << 6)
    }

    pub fn write_register_4(&mut self, value: u8, has_sweep: bool) {
        // NR14/NR24: Pulse period high bits + length counter enabled + trigger
        self.timer.write_period_high(value);
        self.length_counter.set_enabled(value.bit(6));

        if value.bit(7) && self.dac_enabled {
            // Channel triggered; a trigger with the DAC disabled is ignored
            self.channel_enabled = true;

            self.length_counter.trigger();
            self.envelope.trigger();
            self.timer.trigger();

            if has_sweep {
                self.sweep.trigger(self.timer, &mut self.channel_enabled);
            }
        }

        log::trace!("NRx4 write");
        log::trace!("  Timer period: {}", self.timer.period());
        log::trace!("  Length counter enabled: {}", self.length_counter.enabled);
        log::trace!("  Triggered: {}", value.bit(7));
    }

    #[must_use]
    pub fn enabled(&self) -> bool {
        self.channel_enabled
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn triggered_channel(duty_bits: u8, period: u16) -> PulseChannel {
        let mut channel = PulseChannel::new();
        channel.write_register_1(duty_bits);
        channel.write_register_2(0xF0);
        channel.write_register_3(period as u8);
        channel.write_register_4(0x80 | ((period >> 8) as u8), false);
        channel
    }

    /// Collect the DAC level at each of the 8 duty steps
    fn duty_outputs(channel: &mut PulseChannel, period: u16) -> [u8; 8] {
        let cycles_per_step = (2048 - period) as usize;
        std::array::from_fn(|_| {
            let sample = channel.sample().expect("DAC is enabled");
            for _ in 0..cycles_per_step {
                channel.tick_bus_cycle();
            }
            sample
        })
    }

    #[test]
    fn half_duty_waveform() {
        // Period 0x700: output toggles at 131072 / (2048 - 0x700) Hz
        let mut channel = triggered_channel(0b10_000000, 0x700);

        assert_eq!(duty_outputs(&mut channel, 0x700), [0, 0, 0, 0, 15, 15, 15, 15]);
    }

    #[test]
    fn eighth_duty_waveform() {
        let mut channel = triggered_channel(0b00_000000, 0x780);

        assert_eq!(duty_outputs(&mut channel, 0x780), [0, 0, 0, 0, 0, 0, 0, 15]);
    }

    #[test]
    fn trigger_with_dac_disabled_is_ignored() {
        let mut channel = PulseChannel::new();
        channel.write_register_2(0x00);
        channel.write_register_4(0x87, false);

        assert!(!channel.enabled());
        assert_eq!(channel.sample(), None);
    }

    #[test]
    fn sweep_overflow_disables_channel() {
        let mut channel = PulseChannel::new();
        // Pace 1, additive, shift 1
        channel.write_register_0(0b0001_0001);
        channel.write_register_2(0xF0);
        // Period 0x7FF: next period = 0x7FF + 0x3FF > 2047
        channel.write_register_3(0xFF);
        channel.write_register_4(0x87, true);

        // The immediate overflow check at trigger already disables the channel
        assert!(!channel.enabled());
    }

    #[test]
    fn sweep_writeback_adjusts_period() {
        let mut channel = PulseChannel::new();
        // Pace 1, additive, shift 2
        channel.write_register_0(0b0001_0010);
        channel.write_register_2(0xF0);
        // Period 0x400 -> next = 0x400 + 0x100 = 0x500
        channel.write_register_3(0x00);
        channel.write_register_4(0x84, true);
        assert!(channel.enabled());

        channel.clock_sweep();
        assert_eq!(channel.timer.period(), 0x500);
        assert!(channel.enabled());
    }
}
