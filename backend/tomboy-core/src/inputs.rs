//! Joypad input handling and the JOYP register

use crate::cpu::InterruptType;
use crate::interrupts::InterruptRegisters;
use bincode::{Decode, Encode};
use tomboy_common::num::GetBit;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Encode, Decode)]
pub enum TomboyButton {
    Up,
    Left,
    Right,
    Down,
    A,
    B,
    Select,
    Start,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Encode, Decode)]
pub struct TomboyInputs {
    pub up: bool,
    pub left: bool,
    pub right: bool,
    pub down: bool,
    pub a: bool,
    pub b: bool,
    pub start: bool,
    pub select: bool,
}

impl TomboyInputs {
    pub fn set_button(&mut self, button: TomboyButton, pressed: bool) {
        let field = match button {
            TomboyButton::Up => &mut self.up,
            TomboyButton::Left => &mut self.left,
            TomboyButton::Right => &mut self.right,
            TomboyButton::Down => &mut self.down,
            TomboyButton::A => &mut self.a,
            TomboyButton::B => &mut self.b,
            TomboyButton::Select => &mut self.select,
            TomboyButton::Start => &mut self.start,
        };
        *field = pressed;
    }
}

#[derive(Debug, Clone, Encode, Decode)]
pub struct InputState {
    inputs: TomboyInputs,
    dpad_selected: bool,
    buttons_selected: bool,
    previous_lines: u8,
}

impl InputState {
    pub fn new() -> Self {
        Self {
            inputs: TomboyInputs::default(),
            dpad_selected: false,
            buttons_selected: false,
            previous_lines: 0x0F,
        }
    }

    pub fn set_inputs(&mut self, inputs: TomboyInputs) {
        self.inputs = inputs;
    }

    pub fn inputs_mut(&mut self) -> &mut TomboyInputs {
        &mut self.inputs
    }

    // JOYP: Joypad select + button lines
    pub fn read_joyp(&self) -> u8 {
        0xC0 | (u8::from(!self.buttons_selected) << 5)
            | (u8::from(!self.dpad_selected) << 4)
            | self.selected_lines()
    }

    // JOYP: Only the group-select bits are writable
    pub fn write_joyp(&mut self, value: u8) {
        self.dpad_selected = !value.bit(4);
        self.buttons_selected = !value.bit(5);

        log::trace!(
            "JOYP write: {value:02X} (dpad = {}, buttons = {})",
            self.dpad_selected,
            self.buttons_selected
        );
    }

    /// Button lines of the selected groups, active low
    fn selected_lines(&self) -> u8 {
        let mut lines = 0x0F;

        if self.dpad_selected {
            lines &= !((u8::from(self.inputs.down) << 3)
                | (u8::from(self.inputs.up) << 2)
                | (u8::from(self.inputs.left) << 1)
                | u8::from(self.inputs.right));
        }

        if self.buttons_selected {
            lines &= !((u8::from(self.inputs.start) << 3)
                | (u8::from(self.inputs.select) << 2)
                | (u8::from(self.inputs.b) << 1)
                | u8::from(self.inputs.a));
        }

        lines
    }

    /// Raise IF.JOYPAD on any 1->0 transition of a selected button line
    pub fn check_for_joypad_interrupt(&mut self, interrupt_registers: &mut InterruptRegisters) {
        let lines = self.selected_lines();

        if self.previous_lines & !lines != 0 {
            interrupt_registers.set_flag(InterruptType::Joypad);
        }

        self.previous_lines = lines;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn joyp_reflects_selected_group() {
        let mut state = InputState::new();
        state.inputs_mut().set_button(TomboyButton::A, true);
        state.inputs_mut().set_button(TomboyButton::Up, true);

        // Nothing selected: all lines high
        assert_eq!(state.read_joyp(), 0xFF);

        // Button group selected (bit 5 written low): A pulls line 0 low
        state.write_joyp(0x10);
        assert_eq!(state.read_joyp(), 0xDE);

        // D-pad group selected (bit 4 written low): Up pulls line 2 low
        state.write_joyp(0x20);
        assert_eq!(state.read_joyp(), 0xEB);
    }

    #[test]
    fn press_edge_raises_interrupt_once() {
        let mut state = InputState::new();
        let mut interrupt_registers = InterruptRegisters::default();

        state.write_joyp(0x10);
        state.check_for_joypad_interrupt(&mut interrupt_registers);
        assert_eq!(interrupt_registers.read_if() & 0x10, 0);

        state.inputs_mut().set_button(TomboyButton::Start, true);
        state.check_for_joypad_interrupt(&mut interrupt_registers);
        assert_ne!(interrupt_registers.read_if() & 0x10, 0);

        // Held button does not retrigger
        interrupt_registers.write_if(0x00);
        state.check_for_joypad_interrupt(&mut interrupt_registers);
        assert_eq!(interrupt_registers.read_if() & 0x10, 0);
    }
}
