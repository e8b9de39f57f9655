use bincode::{Decode, Encode};
use tomboy_common::num::GetBit;

#[derive(Debug, Clone, Copy, Encode, Decode)]
pub struct LengthCounter<const MAX: u16> {
    pub enabled: bool,
    pub counter: u16,
}

impl<const MAX: u16> LengthCounter<MAX> {
    pub fn new() -> Self {
        Self { enabled: false, counter: MAX }
    }

    pub fn load(&mut self, value: u8) {
        let masked_value = u16::from(value) & (MAX - 1);
        self.counter = MAX - masked_value;
    }

    pub fn trigger(&mut self) {
        if self.counter == 0 {
            self.counter = MAX;
        }
    }

    pub fn clock(&mut self, channel_enabled: &mut bool) {
        if !self.enabled || self.counter == 0 {
            return;
        }

        self.counter -= 1;
        if self.counter == 0 {
            *channel_enabled = false;
        }
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }
}

pub type StandardLengthCounter = LengthCounter<64>;
pub type WavetableLengthCounter = LengthCounter<256>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Encode, Decode)]
pub enum EnvelopeDirection {
    Increasing,
    #[default]
    Decreasing,
}

impl EnvelopeDirection {
    fn from_bit(bit: bool) -> Self {
        if bit { Self::Increasing } else { Self::Decreasing }
    }

    fn to_bit(self) -> bool {
        self == Self::Increasing
    }
}

#[derive(Debug, Clone, Copy, Encode, Decode)]
pub struct Envelope {
    pub volume: u8,
    enabled: bool,
    period: u8,
    counter: u8,
    direction: EnvelopeDirection,
    initial_volume: u8,
    configured_direction: EnvelopeDirection,
    configured_period: u8,
}

impl Envelope {
    pub fn new() -> Self {
        Self {
            volume: 0,
            enabled: false,
            period: 0,
            counter: 0,
            direction: EnvelopeDirection::default(),
            initial_volume: 0,
            configured_direction: EnvelopeDirection::default(),
            configured_period: 0,
        }
    }

    pub fn read_register(self) -> u8 {
        (self.initial_volume << 4)
            | (u8::from(self.configured_direction.to_bit()) << 3)
            | self.configured_period
    }

    pub fn write_register(&mut self, value: u8) {
        self.initial_volume = value >> 4;
        self.configured_direction = EnvelopeDirection::from_bit(value.bit(3));
        self.configured_period = value & 0x07;
    }

    pub fn trigger(&mut self) {
        self.volume = self.initial_volume;
        self.direction = self.configured_direction;
        self.period = self.configured_period;

        self.enabled = true;
        self.counter = self.period;
    }

    pub fn clock(&mut self) {
        if self.period == 0 || !self.enabled {
            return;
        }

        self.counter -= 1;
        if self.counter == 0 {
            self.counter = self.period;

            match (self.direction, self.volume) {
                (EnvelopeDirection::Decreasing, 0) | (EnvelopeDirection::Increasing, 15) => {
                    // Volume cannot decrease past 0 or increase past 15;
                    // disable the envelope until next trigger
                    self.enabled = false;
                }
                (EnvelopeDirection::Decreasing, _) => {
                    self.volume -= 1;
                }
                (EnvelopeDirection::Increasing, _) => {
                    self.volume += 1;
                }
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerTickEffect {
    None,
    Clocked,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Encode, Decode)]
pub struct PhaseTimer<const MAX_PHASE: u8, const TICKS_PER_CYCLE: u16> {
    pub phase: u8,
    period: u16,
    counter: u16,
    reload: u16,
}

impl<const MAX_PHASE: u8, const TICKS_PER_CYCLE: u16> PhaseTimer<MAX_PHASE, TICKS_PER_CYCLE> {
    pub fn new() -> Self {
        // Sanity check that (MAX_PHASE + 1) is a power of 2
        assert_eq!(MAX_PHASE.trailing_ones() + MAX_PHASE.leading_zeros(), u8::BITS);

        Self { phase: 0, period: 0, counter: 2048, reload: 2048 }
    }

    pub fn period(self) -> u16 {
        self.period
    }

    pub fn write_period_low(&mut self, value: u8) {
        self.write_period((self.period & 0xFF00) | u16::from(value));
    }

    pub fn write_period_high(&mut self, value: u8) {
        self.write_period((self.period & 0x00FF) | (u16::from(value & 0x07) << 8));
    }

    pub fn write_period(&mut self, value: u16) {
        self.period = value;
        self.reload = 2048 - value;
    }

    pub fn trigger(&mut self) {
        self.counter = self.reload;
    }

    pub fn tick_bus_cycle(&mut self) -> TimerTickEffect {
        let mut tick_effect = TimerTickEffect::None;

        for _ in 0..TICKS_PER_CYCLE {
            self.counter -= 1;
            if self.counter == 0 {
                self.counter = self.reload;
                self.phase = (self.phase + 1) & MAX_PHASE;
                tick_effect = TimerTickEffect::Clocked;
            }
        }

        tick_effect
    }
}

pub type PulseTimer = PhaseTimer<7, 1>;
pub type WavetableTimer = PhaseTimer<31, 2>;
