//! Memory bus: 32-bit address decoding and per-cycle component advancement

use crate::apu::Apu;
use crate::control::{ControlRegisters, CpuSpeed};
use crate::cpu::{BusInterface, InterruptType};
use crate::dma::DmaUnit;
use crate::graphics::RgbaFrameBuffer;
use crate::inputs::InputState;
use crate::interrupts::InterruptRegisters;
use crate::memory::Memory;
use crate::net::NetworkPort;
use crate::ppu::Ppu;
use crate::program::Program;
use crate::rtc::RealTimeClock;
use crate::timer::Timer;

pub struct Bus<'a> {
    pub program: &'a Program,
    pub ppu: &'a mut Ppu,
    pub apu: &'a mut Apu,
    pub memory: &'a mut Memory,
    pub net: &'a mut NetworkPort,
    pub rtc: &'a mut RealTimeClock,
    pub interrupt_registers: &'a mut InterruptRegisters,
    pub control: &'a mut ControlRegisters,
    pub timer: &'a mut Timer,
    pub dma_unit: &'a mut DmaUnit,
    pub input_state: &'a mut InputState,
    pub rgba_buffer: &'a RgbaFrameBuffer,
}

impl Bus<'_> {
    /// Advance every component by one bus cycle. Normative order: timer, then APU, then PPU
    /// dots, then DMA.
    fn tick_components(&mut self) {
        self.timer.tick_bus_cycle(self.interrupt_registers);
        self.net.tick_bus_cycle(self.interrupt_registers);
        self.rtc.tick_bus_cycle(self.interrupt_registers);

        if self.control.speed == CpuSpeed::Double {
            // In double speed the CPU runs two bus cycles per 4 master cycles; everything below
            // advances at its normal rate
            self.control.double_speed_odd_cycle = !self.control.double_speed_odd_cycle;
            if self.control.double_speed_odd_cycle {
                return;
            }
        }

        self.apu.tick_bus_cycle(self.timer, self.control.speed);

        for _ in 0..4 {
            self.ppu.tick_dot(
                *self.control,
                self.dma_unit.oam_dma_in_progress(),
                self.interrupt_registers,
            );
        }

        self.dma_unit.oam_dma_tick(self.program, self.memory, self.ppu);

        if self.ppu.take_hblank_entered() {
            self.dma_unit.notify_hblank();
        }
        for _ in 0..2 {
            self.dma_unit.vram_dma_copy_byte(self.program, self.memory, self.ppu);
        }
    }

    fn read_io_register(&self, address: u32) -> u8 {
        let port = address as u8;
        log::trace!("I/O register read: {port:02X}");

        match port {
            0x00 => self.input_state.read_joyp(),
            0x01 => self.net.read_control(),
            0x04 => self.timer.read_div(),
            0x05 => self.timer.read_tima(),
            0x06 => self.timer.read_tma(),
            0x07 => self.timer.read_tac(),
            0x08..=0x0E => self.rtc.read_register(port),
            0x0F => self.interrupt_registers.read_if(),
            0x10..=0x26 | 0x30..=0x3F => self.apu.read_register(address),
            0x40..=0x45 | 0x4A..=0x4E | 0x50 | 0x58..=0x5B => self.ppu.read_register(port),
            0x46..=0x48 => self.dma_unit.read_dma_page(port - 0x46),
            0x49 => self.dma_unit.read_dma_register(),
            0x4F => self.control.read_key1(),
            0x51..=0x54 => self.dma_unit.read_hdma_source(port - 0x51),
            0x55 | 0x56 => self.dma_unit.read_hdma_dest(port - 0x55),
            0x57 => self.dma_unit.read_hdma7(),
            0x5C => self.control.read_opri(),
            0x5D => self.control.read_grpm(),
            0x5E => self.control.vbp_scratch,
            0x60 => self.apu.read_pcm12(),
            0x61 => self.apu.read_pcm34(),
            _ => {
                log::debug!("Unexpected I/O register read: {port:02X}");
                0xFF
            }
        }
    }

    fn write_io_register(&mut self, address: u32, value: u8) {
        let port = address as u8;
        log::trace!("I/O register write: {port:02X} {value:02X}");

        match port {
            0x00 => self.input_state.write_joyp(value),
            0x01 => self.net.write_control(value),
            0x04 => self.timer.write_div(self.interrupt_registers),
            0x05 => self.timer.write_tima(value),
            0x06 => self.timer.write_tma(value),
            0x07 => self.timer.write_tac(value, self.interrupt_registers),
            0x08..=0x0E => self.rtc.write_register(port, value),
            0x0F => self.interrupt_registers.write_if(value),
            0x10..=0x26 | 0x30..=0x3F => self.apu.write_register(address, value),
            0x40..=0x45 | 0x4A..=0x4E | 0x50 | 0x58..=0x5B => {
                self.ppu.write_register(port, value);
            }
            0x46..=0x48 => self.dma_unit.write_dma_page(port - 0x46, value),
            0x49 => self.dma_unit.write_dma_register(value),
            0x4F => self.control.write_key1(value),
            0x51..=0x54 => self.dma_unit.write_hdma_source(port - 0x51, value),
            0x55 | 0x56 => self.dma_unit.write_hdma_dest(port - 0x55, value),
            0x57 => self.dma_unit.write_hdma7(value),
            0x5C => self.control.write_opri(value),
            0x5D => self.control.write_grpm(value),
            0x5E => self.control.vbp_scratch = value,
            _ => {
                log::debug!("Unexpected I/O register write: {port:02X} {value:02X}");
            }
        }
    }
}

impl BusInterface for Bus<'_> {
    fn read(&mut self, address: u32) -> u8 {
        self.tick_components();

        match address {
            0x0000_0000..=0x3FFF_FFFF => self.program.read_rom(address),
            // XRAM window: reserved
            0x4000_0000..=0x7FFF_FFFF => 0xFF,
            0x8000_0000..=0x9FFF_FFFF => self.memory.read_sram(address),
            0xA000_0000..=0xA001_67FF => self.rgba_buffer.read_byte(address & 0x0001_FFFF),
            0xB000_0000..=0xB000_FFFF => self.net.read_send_ram(address),
            0xB001_0000..=0xB001_FFFF => self.net.read_recv_ram(address),
            0xC000_0000..=0xDFFF_FFFF => self.memory.read_wram(address),
            0xE000_0000..=0xE000_1FFF => self.ppu.read_vram(address),
            0xE001_0000..=0xE001_007F => self.ppu.read_cram(address & 0x7F),
            0xE002_0000..=0xE002_009F => {
                if self.dma_unit.oam_dma_in_progress() {
                    0xFF
                } else {
                    self.ppu.read_oam(address)
                }
            }
            0xE003_0000..=0xE003_000F => self.apu.read_wave_ram(address),
            0xFFFF_FF00..=0xFFFF_FFFE => self.read_io_register(address),
            0xFFFF_FFFF => self.interrupt_registers.read_ie(),
            _ => {
                log::debug!("Unmapped read: {address:08X}");
                0xFF
            }
        }
    }

    fn write(&mut self, address: u32, value: u8) {
        self.tick_components();

        match address {
            // Program ROM and the screen shadow are read-only
            0x0000_0000..=0x3FFF_FFFF | 0xA000_0000..=0xA001_67FF => {}
            0x8000_0000..=0x9FFF_FFFF => self.memory.write_sram(address, value),
            0xB000_0000..=0xB000_FFFF => self.net.write_send_ram(address, value),
            0xB001_0000..=0xB001_FFFF => self.net.write_recv_ram(address, value),
            0xC000_0000..=0xDFFF_FFFF => self.memory.write_wram(address, value),
            0xE000_0000..=0xE000_1FFF => self.ppu.write_vram(address, value),
            0xE001_0000..=0xE001_007F => self.ppu.write_cram(address & 0x7F, value),
            0xE002_0000..=0xE002_009F => {
                if !self.dma_unit.oam_dma_in_progress() {
                    self.ppu.write_oam(address, value);
                }
            }
            0xE003_0000..=0xE003_000F => self.apu.write_wave_ram(address, value),
            0xFFFF_FF00..=0xFFFF_FFFE => self.write_io_register(address, value),
            0xFFFF_FFFF => self.interrupt_registers.write_ie(value),
            _ => {
                log::debug!("Unmapped write: {address:08X} {value:02X}");
            }
        }
    }

    fn idle(&mut self) {
        self.tick_components();
    }

    fn read_ie_register(&self) -> u8 {
        self.interrupt_registers.read_ie() & 0x3F
    }

    fn read_if_register(&self) -> u8 {
        self.interrupt_registers.read_if() & 0x3F
    }

    fn acknowledge_interrupt(&mut self, interrupt_type: InterruptType) {
        self.interrupt_registers.clear_flag(interrupt_type);
    }

    fn halt(&self) -> bool {
        self.dma_unit.vram_dma_active()
    }

    fn speed_switch_armed(&self) -> bool {
        self.control.speed_switch_armed
    }

    fn perform_speed_switch(&mut self) {
        self.control.perform_speed_switch();
    }
}
