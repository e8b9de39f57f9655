//! System control ports: speed switching, object priority, graphics mode

use crate::GraphicsMode;
use bincode::{Decode, Encode};
use tomboy_common::num::GetBit;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Encode, Decode)]
pub enum CpuSpeed {
    #[default]
    Normal = 0,
    Double = 1,
}

impl CpuSpeed {
    fn toggle(self) -> Self {
        match self {
            Self::Normal => Self::Double,
            Self::Double => Self::Normal,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Encode, Decode)]
pub enum ObjPriority {
    // Lower OAM index wins
    #[default]
    OamIndex = 0,
    // Lower X coordinate wins
    XCoordinate = 1,
}

impl ObjPriority {
    fn from_bit(bit: bool) -> Self {
        if bit { Self::XCoordinate } else { Self::OamIndex }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Encode, Decode)]
pub struct ControlRegisters {
    pub speed: CpuSpeed,
    pub speed_switch_armed: bool,
    pub double_speed_odd_cycle: bool,
    pub obj_priority: ObjPriority,
    pub graphics_mode: GraphicsMode,
    pub vbp_scratch: u8,
}

impl ControlRegisters {
    pub fn new() -> Self {
        Self {
            speed: CpuSpeed::default(),
            speed_switch_armed: false,
            double_speed_odd_cycle: false,
            obj_priority: ObjPriority::default(),
            graphics_mode: GraphicsMode::default(),
            vbp_scratch: 0,
        }
    }

    pub fn read_key1(self) -> u8 {
        0x7E | ((self.speed as u8) << 7) | u8::from(self.speed_switch_armed)
    }

    pub fn write_key1(&mut self, value: u8) {
        self.speed_switch_armed = value.bit(0);

        log::trace!("KEY1 write: {value:02X} (speed switch armed = {})", self.speed_switch_armed);
    }

    pub fn perform_speed_switch(&mut self) {
        self.speed = self.speed.toggle();
        self.speed_switch_armed = false;
        self.double_speed_odd_cycle = false;

        log::trace!("Speed changed to {:?}", self.speed);
    }

    pub fn read_opri(self) -> u8 {
        0xFE | (self.obj_priority as u8)
    }

    pub fn write_opri(&mut self, value: u8) {
        self.obj_priority = ObjPriority::from_bit(value.bit(0));

        log::trace!("OPRI write: {value:02X} (OBJ priority = {:?})", self.obj_priority);
    }

    pub fn read_grpm(self) -> u8 {
        0xFE | u8::from(self.graphics_mode == GraphicsMode::Color)
    }

    pub fn write_grpm(&mut self, value: u8) {
        self.graphics_mode =
            if value.bit(0) { GraphicsMode::Color } else { GraphicsMode::Classic };

        log::trace!("GRPM write: {value:02X} (graphics mode = {})", self.graphics_mode);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn speed_switch_round_trip() {
        let mut control = ControlRegisters::new();
        assert_eq!(control.read_key1(), 0x7E);

        control.write_key1(0x01);
        assert_eq!(control.read_key1(), 0x7F);

        control.perform_speed_switch();
        assert_eq!(control.speed, CpuSpeed::Double);
        assert_eq!(control.read_key1(), 0xFE);
    }

    #[test]
    fn grpm_selects_graphics_mode() {
        let mut control = ControlRegisters::new();
        assert_eq!(control.graphics_mode, GraphicsMode::Classic);

        control.write_grpm(0x01);
        assert_eq!(control.graphics_mode, GraphicsMode::Color);
        assert_eq!(control.read_grpm(), 0xFF);
    }
}
