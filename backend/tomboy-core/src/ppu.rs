//! PPU: dot-accurate scanline renderer

mod fifo;
mod registers;

use crate::control::{ControlRegisters, ObjPriority};
use crate::cpu::InterruptType;
use crate::interrupts::InterruptRegisters;
use crate::ppu::fifo::PixelFifo;
use crate::ppu::registers::{ColorRam, Registers};
use bincode::{Decode, Encode};
use std::ops::Deref;
use tomboy_common::arrayvec::ArrayVec;
use tomboy_common::boxedarray::BoxedWordArray;
use tomboy_common::frontend::FrameSize;
use tomboy_common::num::GetBit;

pub const SCREEN_WIDTH: usize = 160;
pub const SCREEN_HEIGHT: usize = 144;

pub const FRAME_BUFFER_LEN: usize = SCREEN_WIDTH * SCREEN_HEIGHT;

pub const FRAME_SIZE: FrameSize =
    FrameSize { width: SCREEN_WIDTH as u32, height: SCREEN_HEIGHT as u32 };

// 144 rendered lines + 10 vertical blanking lines
pub const LINES_PER_FRAME: u8 = 154;
pub const DOTS_PER_LINE: u16 = 456;
const OAM_SCAN_DOTS: u16 = 80;

const MAX_SPRITES_PER_LINE: usize = 10;

// 2 banks of 8 KiB
const VRAM_LEN: usize = 16 * 1024;
const OAM_LEN: usize = 160;

// Disabling the display shows white, which is $7FFF in RGB555
const WHITE: u16 = 0x7FFF;

pub(crate) type Vram = [u8; VRAM_LEN];
type Oam = [u8; OAM_LEN];

pub(crate) type SpriteList = ArrayVec<SpriteData, MAX_SPRITES_PER_LINE>;

#[derive(Debug, Clone, Encode, Decode)]
pub struct PpuFrameBuffer(BoxedWordArray<FRAME_BUFFER_LEN>);

impl PpuFrameBuffer {
    pub fn iter(&self) -> impl Iterator<Item = u16> + '_ {
        self.0.iter().copied()
    }

    fn set(&mut self, line: u8, pixel: u8, color: u16) {
        self.0[(line as usize) * SCREEN_WIDTH + (pixel as usize)] = color;
    }

    fn fill(&mut self, color: u16) {
        self.0.fill(color);
    }
}

impl Default for PpuFrameBuffer {
    fn default() -> Self {
        Self(BoxedWordArray::new())
    }
}

impl Deref for PpuFrameBuffer {
    type Target = [u16; FRAME_BUFFER_LEN];

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Encode, Decode)]
pub enum PpuMode {
    // Mode 1
    VBlank,
    // Mode 0
    HBlank,
    // Mode 2
    ScanningOam,
    // Mode 3
    Rendering,
}

impl PpuMode {
    fn to_bits(self) -> u8 {
        match self {
            Self::HBlank => 0,
            Self::VBlank => 1,
            Self::ScanningOam => 2,
            Self::Rendering => 3,
        }
    }
}

#[derive(Debug, Clone, Encode, Decode)]
struct State {
    scanline: u8,
    dot: u16,
    mode: PpuMode,
    prev_stat_interrupt_line: bool,
    previously_enabled: bool,
    // The first line after re-enabling does not signal an LY=LYC coincidence
    coincidence_deferred: bool,
    frame_complete: bool,
    hblank_entered: bool,
    invariant_violation: bool,
}

impl State {
    fn new() -> Self {
        Self {
            scanline: 0,
            dot: 0,
            mode: PpuMode::ScanningOam,
            prev_stat_interrupt_line: false,
            previously_enabled: true,
            coincidence_deferred: false,
            frame_complete: false,
            hblank_entered: false,
            invariant_violation: false,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Encode, Decode)]
pub(crate) struct SpriteData {
    oam_index: u8,
    x: u8,
    y: u8,
    tile_number: u8,
    vram_bank: u8,
    // Attribute bits 0-2 select the color-mode palette, bit 4 the classic-mode palette
    color_palette: u8,
    classic_palette: u8,
    horizontal_flip: bool,
    vertical_flip: bool,
    low_priority: bool,
}

#[derive(Debug, Clone, Encode, Decode)]
pub struct Ppu {
    frame_buffer: PpuFrameBuffer,
    vram: Box<Vram>,
    oam: Box<Oam>,
    registers: Registers,
    bg_palette_ram: ColorRam,
    sprite_palette_ram: ColorRam,
    state: State,
    sprite_buffer: SpriteList,
    fifo: PixelFifo,
}

impl Ppu {
    pub fn new() -> Self {
        Self {
            frame_buffer: PpuFrameBuffer::default(),
            vram: vec![0; VRAM_LEN].into_boxed_slice().try_into().unwrap(),
            oam: vec![0; OAM_LEN].into_boxed_slice().try_into().unwrap(),
            registers: Registers::new(),
            bg_palette_ram: ColorRam::new(),
            sprite_palette_ram: ColorRam::new(),
            state: State::new(),
            sprite_buffer: SpriteList::new(),
            fifo: PixelFifo::new(),
        }
    }

    pub fn tick_dot(
        &mut self,
        control: ControlRegisters,
        oam_dma_in_progress: bool,
        interrupt_registers: &mut InterruptRegisters,
    ) {
        if !self.registers.ppu_enabled {
            if self.state.previously_enabled {
                // Disabling clears the display to white and parks the PPU at line 0 in HBLANK
                self.frame_buffer.fill(WHITE);
                self.state.frame_complete = true;

                self.state.scanline = 0;
                self.state.dot = 0;
                self.state.mode = PpuMode::HBlank;

                self.sprite_buffer.clear();
                self.fifo = PixelFifo::new();

                self.state.previously_enabled = false;
                self.state.prev_stat_interrupt_line = false;
            }

            // The PPU does not process at all while disabled
            return;
        } else if !self.state.previously_enabled {
            // Re-enabled: restart at line 0 in OAM scan, with the line-0 coincidence deferred
            self.state.previously_enabled = true;
            self.state.coincidence_deferred = true;
            self.state.mode = PpuMode::ScanningOam;
        }

        if self.state.dot == 0 && self.state.mode == PpuMode::ScanningOam {
            self.scan_oam(control.obj_priority, oam_dma_in_progress);
        }

        if self.state.mode == PpuMode::Rendering {
            self.fifo.tick(
                &self.vram,
                &self.registers,
                &self.sprite_buffer,
                &self.bg_palette_ram,
                &self.sprite_palette_ram,
                control.graphics_mode,
                &mut self.frame_buffer,
            );
            if self.fifo.take_overflow() {
                self.state.invariant_violation = true;
            }

            if self.fifo.done_with_line() {
                log::trace!(
                    "Pixel pipeline finished line {} after dot {}",
                    self.state.scanline,
                    self.state.dot
                );
                self.state.mode = PpuMode::HBlank;
                self.state.hblank_entered = true;
            }
        }

        self.state.dot += 1;
        if self.state.dot == DOTS_PER_LINE {
            // Programs can satisfy the window Y condition mid-line
            self.fifo.check_window_y(self.state.scanline, &self.registers);

            self.state.dot = 0;
            self.state.scanline += 1;
            if self.state.scanline == 1 {
                self.state.coincidence_deferred = false;
            }
            if self.state.scanline == LINES_PER_FRAME {
                self.state.scanline = 0;
                self.fifo.reset_frame_state();
            }

            if self.state.scanline < SCREEN_HEIGHT as u8 {
                self.state.mode = PpuMode::ScanningOam;
            } else if self.state.scanline == SCREEN_HEIGHT as u8 {
                self.state.mode = PpuMode::VBlank;
                interrupt_registers.set_flag(InterruptType::VBlank);
                self.state.frame_complete = true;
            }
        } else if self.state.scanline < SCREEN_HEIGHT as u8 && self.state.dot == OAM_SCAN_DOTS {
            self.fifo.start_new_line(self.state.scanline, &self.registers);
            self.state.mode = PpuMode::Rendering;
        }

        let stat_interrupt_line = self.stat_interrupt_line();
        if !self.state.prev_stat_interrupt_line && stat_interrupt_line {
            log::trace!(
                "STAT interrupt at line {} dot {}",
                self.state.scanline,
                self.state.dot
            );
            interrupt_registers.set_flag(InterruptType::LcdStatus);
        }
        self.state.prev_stat_interrupt_line = stat_interrupt_line;
    }

    fn scan_oam(&mut self, obj_priority: ObjPriority, oam_dma_in_progress: bool) {
        self.sprite_buffer.clear();

        // The PPU cannot read OAM while an OAM DMA is running
        if oam_dma_in_progress {
            return;
        }

        let scanline = self.state.scanline;
        let sprite_height = if self.registers.double_height_sprites { 16 } else { 8 };

        for oam_idx in 0..OAM_LEN / 4 {
            let oam_addr = 4 * oam_idx;

            let y = self.oam[oam_addr];

            // OAM Y is offset by 16; check whether this object covers the current line
            let sprite_top = i16::from(y) - 16;
            let sprite_bottom = sprite_top + sprite_height;
            if !(sprite_top..sprite_bottom).contains(&scanline.into()) {
                continue;
            }

            let x = self.oam[oam_addr + 1];
            let tile_number = self.oam[oam_addr + 2];
            let attributes = self.oam[oam_addr + 3];

            self.sprite_buffer.push(SpriteData {
                oam_index: oam_idx as u8,
                x,
                y,
                tile_number,
                vram_bank: u8::from(attributes.bit(3)),
                color_palette: attributes & 0x07,
                classic_palette: u8::from(attributes.bit(4)),
                horizontal_flip: attributes.bit(5),
                vertical_flip: attributes.bit(6),
                low_priority: attributes.bit(7),
            });
            if self.sprite_buffer.len() == MAX_SPRITES_PER_LINE {
                break;
            }
        }

        // List order is merge priority: earlier entries win overlaps
        if obj_priority == ObjPriority::XCoordinate {
            self.sprite_buffer.as_mut_slice().sort_by_key(|sprite| (sprite.x, sprite.oam_index));
        }
    }

    fn stat_interrupt_line(&self) -> bool {
        (self.registers.lyc_interrupt_enabled && self.coincidence())
            || (self.registers.mode_2_interrupt_enabled && self.state.mode == PpuMode::ScanningOam)
            || (self.registers.mode_1_interrupt_enabled && self.state.mode == PpuMode::VBlank)
            || (self.registers.mode_0_interrupt_enabled && self.state.mode == PpuMode::HBlank)
    }

    fn coincidence(&self) -> bool {
        !self.state.coincidence_deferred && self.state.scanline == self.registers.ly_compare
    }

    pub fn frame_buffer(&self) -> &PpuFrameBuffer {
        &self.frame_buffer
    }

    pub fn frame_complete(&self) -> bool {
        self.state.frame_complete
    }

    pub fn clear_frame_complete(&mut self) {
        self.state.frame_complete = false;
    }

    pub fn take_hblank_entered(&mut self) -> bool {
        let entered = self.state.hblank_entered;
        self.state.hblank_entered = false;
        entered
    }

    pub fn take_invariant_violation(&mut self) -> bool {
        let violated = self.state.invariant_violation;
        self.state.invariant_violation = false;
        violated
    }

    pub fn mode(&self) -> PpuMode {
        self.state.mode
    }

    pub fn ly(&self) -> u8 {
        self.state.scanline
    }

    pub fn read_vram(&self, address: u32) -> u8 {
        if self.cpu_can_access_vram() {
            self.vram[map_vram_address(address, self.registers.vram_bank) as usize]
        } else {
            0xFF
        }
    }

    pub fn write_vram(&mut self, address: u32, value: u8) {
        if self.cpu_can_access_vram() {
            self.vram[map_vram_address(address, self.registers.vram_bank) as usize] = value;
        }
    }

    /// VRAM access for the block-copy DMA engines, which are not mode-gated
    pub fn write_vram_for_dma(&mut self, vram_offset: u16, value: u8) {
        let address = (u32::from(self.registers.vram_bank) << 13) | u32::from(vram_offset & 0x1FFF);
        self.vram[address as usize] = value;
    }

    pub fn read_vram_for_dma(&self, address: u32) -> u8 {
        self.vram[map_vram_address(address, self.registers.vram_bank) as usize]
    }

    pub fn read_oam(&self, address: u32) -> u8 {
        if self.cpu_can_access_oam() {
            self.oam[(address as usize) % OAM_LEN]
        } else {
            0xFF
        }
    }

    pub fn write_oam(&mut self, address: u32, value: u8) {
        if self.cpu_can_access_oam() {
            self.oam[(address as usize) % OAM_LEN] = value;
        }
    }

    // OAM DMA writes land at any time, even during OAM scan and rendering
    pub fn write_oam_for_dma(&mut self, offset: u8, value: u8) {
        self.oam[(offset as usize) % OAM_LEN] = value;
    }

    pub fn read_cram(&self, offset: u32) -> u8 {
        let accessible = self.cpu_can_access_vram();
        if offset.bit(6) {
            self.sprite_palette_ram.read_direct(offset, accessible)
        } else {
            self.bg_palette_ram.read_direct(offset, accessible)
        }
    }

    pub fn write_cram(&mut self, offset: u32, value: u8) {
        let accessible = self.cpu_can_access_vram();
        if offset.bit(6) {
            self.sprite_palette_ram.write_direct(offset, value, accessible);
        } else {
            self.bg_palette_ram.write_direct(offset, value, accessible);
        }
    }

    fn cpu_can_access_oam(&self) -> bool {
        matches!(self.state.mode, PpuMode::HBlank | PpuMode::VBlank)
    }

    fn cpu_can_access_vram(&self) -> bool {
        self.state.mode != PpuMode::Rendering
    }

    pub fn read_register(&self, port: u8) -> u8 {
        match port {
            0x40 => self.registers.read_lcdc(),
            0x41 => self.registers.read_stat(self.coincidence(), self.state.mode),
            0x42 => self.registers.bg_y_scroll,
            0x43 => self.registers.bg_x_scroll,
            // LY: current line
            0x44 => self.state.scanline,
            0x45 => self.registers.ly_compare,
            0x4A => self.registers.read_bgp(),
            0x4B => self.registers.read_obp0(),
            0x4C => self.registers.read_obp1(),
            0x4D => self.registers.window_y,
            0x4E => self.registers.window_x,
            0x50 => self.registers.read_vbk(),
            0x58 => self.bg_palette_ram.read_index_port(),
            0x59 => self.bg_palette_ram.read_data_port(self.cpu_can_access_vram()),
            0x5A => self.sprite_palette_ram.read_index_port(),
            0x5B => self.sprite_palette_ram.read_data_port(self.cpu_can_access_vram()),
            _ => {
                log::warn!("PPU register read {port:02X}");
                0xFF
            }
        }
    }

    pub fn write_register(&mut self, port: u8, value: u8) {
        log::trace!(
            "PPU register write on line {} dot {}: {port:02X} set to {value:02X}",
            self.state.scanline,
            self.state.dot
        );

        match port {
            0x40 => self.write_lcdc(value),
            0x41 => self.registers.write_stat(value),
            0x42 => self.registers.write_scy(value),
            0x43 => self.registers.write_scx(value),
            // LY, not writable
            0x44 => {}
            0x45 => self.registers.write_lyc(value),
            0x4A => self.registers.write_bgp(value),
            0x4B => self.registers.write_obp0(value),
            0x4C => self.registers.write_obp1(value),
            0x4D => self.registers.write_wy(value),
            0x4E => self.registers.write_wx(value),
            0x50 => self.registers.write_vbk(value),
            0x58 => self.bg_palette_ram.write_index_port(value),
            0x59 => {
                let accessible = self.cpu_can_access_vram();
                self.bg_palette_ram.write_data_port(value, accessible);
            }
            0x5A => self.sprite_palette_ram.write_index_port(value),
            0x5B => {
                let accessible = self.cpu_can_access_vram();
                self.sprite_palette_ram.write_data_port(value, accessible);
            }
            _ => log::warn!("PPU register write {port:02X} {value:02X}"),
        }
    }

    fn write_lcdc(&mut self, value: u8) {
        // Turning the display off is only legal during VBLANK; elsewhere the write is ignored
        if !value.bit(7) && self.registers.ppu_enabled && self.state.mode != PpuMode::VBlank {
            log::debug!("Ignoring LCDC write {value:02X}: display disable outside VBLANK");
            return;
        }

        self.registers.write_lcdc(value);
    }
}

fn map_vram_address(address: u32, vram_bank: u8) -> u32 {
    (u32::from(vram_bank) << 13) | (address & 0x1FFF)
}
