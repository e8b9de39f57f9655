//! DMA engines: OAM DMA, general VRAM DMA, and H-blank VRAM DMA

use crate::memory::Memory;
use crate::ppu::Ppu;
use crate::program::Program;
use bincode::{Decode, Encode};
use tomboy_common::num::{GetBit, U16Ext, U32Ext};

const OAM_DMA_BUS_CYCLES: u8 = 160;

const BYTES_PER_HBLANK: u8 = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Encode, Decode)]
enum VramDmaState {
    Idle,
    General { bytes_remaining: u16 },
    HBlankWaiting { blocks_remaining: u8 },
    HBlankCopying { blocks_remaining: u8, bytes_remaining: u8 },
    Cancelled { blocks_remaining: u8 },
    Complete,
}

#[derive(Debug, Clone, Encode, Decode)]
pub struct DmaUnit {
    // OAM DMA
    oam_dma_source: u32,
    oam_dma_page_high: u8,
    oam_dma_page_mid: u8,
    oam_dma_page_low: u8,
    oam_dma_offset: u8,
    oam_dma_running: bool,
    // VRAM DMA
    vram_dma_source: u32,
    vram_dma_dest: u16,
    vram_dma_state: VramDmaState,
}

impl DmaUnit {
    pub fn new() -> Self {
        Self {
            oam_dma_source: 0,
            oam_dma_page_high: 0,
            oam_dma_page_mid: 0,
            oam_dma_page_low: 0,
            oam_dma_offset: 0,
            oam_dma_running: false,
            vram_dma_source: 0,
            vram_dma_dest: 0,
            vram_dma_state: VramDmaState::Idle,
        }
    }

    // DMA1-DMA3: source page bytes 31:24 / 23:16 / 15:8
    pub fn read_dma_page(&self, index: u8) -> u8 {
        match index {
            0 => self.oam_dma_page_high,
            1 => self.oam_dma_page_mid,
            _ => self.oam_dma_page_low,
        }
    }

    pub fn write_dma_page(&mut self, index: u8, value: u8) {
        match index {
            0 => self.oam_dma_page_high = value,
            1 => self.oam_dma_page_mid = value,
            _ => self.oam_dma_page_low = value,
        }

        log::trace!("DMA{} write: {value:02X}", index + 1);
    }

    // DMA: initiate; the written value doubles as source bits 31:24
    pub fn read_dma_register(&self) -> u8 {
        self.oam_dma_page_high
    }

    pub fn write_dma_register(&mut self, value: u8) {
        self.oam_dma_page_high = value;
        self.oam_dma_source = (u32::from(value) << 24)
            | (u32::from(self.oam_dma_page_mid) << 16)
            | (u32::from(self.oam_dma_page_low) << 8);

        self.oam_dma_offset = 0;
        self.oam_dma_running = true;

        log::trace!("DMA written: {value:02X}");
        log::trace!("  OAM DMA source address: {:08X}", self.oam_dma_source);
    }

    /// Copy one OAM byte per bus cycle while an OAM DMA is active
    pub fn oam_dma_tick(&mut self, program: &Program, memory: &Memory, ppu: &mut Ppu) {
        if !self.oam_dma_running {
            return;
        }

        let source_addr = self.oam_dma_source | u32::from(self.oam_dma_offset);
        let byte = read_dma_source(source_addr, program, memory, ppu);
        ppu.write_oam_for_dma(self.oam_dma_offset, byte);

        log::trace!("Copied {byte:02X} to OAM[{}] from {source_addr:08X}", self.oam_dma_offset);

        self.oam_dma_offset += 1;
        if self.oam_dma_offset == OAM_DMA_BUS_CYCLES {
            self.oam_dma_running = false;
        }
    }

    pub fn oam_dma_in_progress(&self) -> bool {
        self.oam_dma_running
    }

    // HDMA1-HDMA4: VRAM DMA source bytes 31:24 down to 7:0
    pub fn read_hdma_source(&self, index: u8) -> u8 {
        self.vram_dma_source.byte(3 - index)
    }

    pub fn write_hdma_source(&mut self, index: u8, value: u8) {
        // Transfers are 16-byte aligned
        let value = if index == 3 { value & 0xF0 } else { value };
        self.vram_dma_source.set_byte(3 - index, value);

        log::trace!("HDMA{} write: {value:02X}", index + 1);
    }

    // HDMA5-HDMA6: destination offset within VRAM
    pub fn read_hdma_dest(&self, index: u8) -> u8 {
        if index == 0 { self.vram_dma_dest.msb() } else { self.vram_dma_dest.lsb() }
    }

    pub fn write_hdma_dest(&mut self, index: u8, value: u8) {
        if index == 0 {
            self.vram_dma_dest.set_msb(value & 0x1F);
        } else {
            self.vram_dma_dest.set_lsb(value & 0xF0);
        }

        log::trace!("HDMA{} write: {value:02X}", index + 5);
    }

    // HDMA7: length + mode / status
    pub fn read_hdma7(&self) -> u8 {
        match self.vram_dma_state {
            VramDmaState::Idle | VramDmaState::Complete => 0xFF,
            VramDmaState::General { bytes_remaining } => {
                ((bytes_remaining / 16) as u8).wrapping_sub(1) & 0x7F
            }
            VramDmaState::HBlankWaiting { blocks_remaining }
            | VramDmaState::HBlankCopying { blocks_remaining, .. } => {
                blocks_remaining.wrapping_sub(1) & 0x7F
            }
            // Cancellation latches bit 7 high along with the remaining length
            VramDmaState::Cancelled { blocks_remaining } => {
                0x80 | (blocks_remaining.wrapping_sub(1) & 0x7F)
            }
        }
    }

    pub fn write_hdma7(&mut self, value: u8) {
        let blocks = (value & 0x7F) + 1;

        if value.bit(7) {
            // H-blank DMA: 16 bytes at each entry to HBLANK
            self.vram_dma_state = VramDmaState::HBlankWaiting { blocks_remaining: blocks };

            log::trace!("HDMA started: {blocks} blocks from {:08X}", self.vram_dma_source);
        } else {
            match self.vram_dma_state {
                VramDmaState::HBlankWaiting { blocks_remaining }
                | VramDmaState::HBlankCopying { blocks_remaining, .. } => {
                    // Clearing bit 7 mid-transfer cancels the pending H-blank DMA
                    self.vram_dma_state = VramDmaState::Cancelled { blocks_remaining };

                    log::trace!("HDMA cancelled with {blocks_remaining} blocks remaining");
                }
                _ => {
                    // General DMA: the whole block copy runs with the CPU stalled
                    self.vram_dma_state =
                        VramDmaState::General { bytes_remaining: u16::from(blocks) * 16 };

                    log::trace!("GDMA started: {blocks} blocks from {:08X}", self.vram_dma_source);
                }
            }
        }
    }

    /// The CPU is stalled while a VRAM DMA is copying
    pub fn vram_dma_active(&self) -> bool {
        matches!(
            self.vram_dma_state,
            VramDmaState::General { .. } | VramDmaState::HBlankCopying { .. }
        )
    }

    pub fn notify_hblank(&mut self) {
        if let VramDmaState::HBlankWaiting { blocks_remaining } = self.vram_dma_state {
            self.vram_dma_state = VramDmaState::HBlankCopying {
                blocks_remaining,
                bytes_remaining: BYTES_PER_HBLANK,
            };
        }
    }

    /// Copy one VRAM DMA byte if a transfer is running; called twice per bus cycle
    pub fn vram_dma_copy_byte(&mut self, program: &Program, memory: &Memory, ppu: &mut Ppu) {
        match self.vram_dma_state {
            VramDmaState::General { bytes_remaining } => {
                self.copy_vram_byte(program, memory, ppu);

                self.vram_dma_state = if bytes_remaining == 1 {
                    VramDmaState::Complete
                } else {
                    VramDmaState::General { bytes_remaining: bytes_remaining - 1 }
                };
            }
            VramDmaState::HBlankCopying { blocks_remaining, bytes_remaining } => {
                self.copy_vram_byte(program, memory, ppu);

                self.vram_dma_state = if bytes_remaining == 1 {
                    if blocks_remaining == 1 {
                        VramDmaState::Complete
                    } else {
                        VramDmaState::HBlankWaiting { blocks_remaining: blocks_remaining - 1 }
                    }
                } else {
                    VramDmaState::HBlankCopying {
                        blocks_remaining,
                        bytes_remaining: bytes_remaining - 1,
                    }
                };
            }
            _ => {}
        }
    }

    fn copy_vram_byte(&mut self, program: &Program, memory: &Memory, ppu: &mut Ppu) {
        let byte = read_dma_source(self.vram_dma_source, program, memory, ppu);
        ppu.write_vram_for_dma(self.vram_dma_dest, byte);

        self.vram_dma_source = self.vram_dma_source.wrapping_add(1);
        self.vram_dma_dest = self.vram_dma_dest.wrapping_add(1) & 0x1FFF;
    }
}

fn read_dma_source(address: u32, program: &Program, memory: &Memory, ppu: &Ppu) -> u8 {
    match address {
        0x0000_0000..=0x3FFF_FFFF => program.read_rom(address),
        0x8000_0000..=0x9FFF_FFFF => memory.read_sram(address),
        0xC000_0000..=0xDFFF_FFFF => memory.read_wram(address),
        0xE000_0000..=0xE000_1FFF => ppu.read_vram_for_dma(address),
        // Everything else is not readable by the DMA engines
        _ => 0xFF,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::program;

    fn harness() -> (DmaUnit, Program, Memory, Ppu) {
        let program = Program::parse(program::test_image(0x8000, 0x400)).unwrap();
        let memory = Memory::new(0x8000, 0x400, None);

        // Park the PPU in HBLANK so OAM and VRAM are CPU-visible to the assertions
        let mut ppu = Ppu::new();
        let mut interrupt_registers = crate::interrupts::InterruptRegisters::default();
        for _ in 0..400 {
            ppu.tick_dot(crate::control::ControlRegisters::new(), false, &mut interrupt_registers);
        }
        assert_eq!(ppu.mode(), crate::ppu::PpuMode::HBlank);

        (DmaUnit::new(), program, memory, ppu)
    }

    #[test]
    fn oam_dma_copies_160_bytes_from_wram() {
        let (mut dma, program, mut memory, mut ppu) = harness();

        for i in 0..160 {
            memory.write_wram(0x4500 + i, i as u8);
        }

        // Source 0xC0004500: DMA=0xC0, DMA2=0x00, DMA3=0x45
        dma.write_dma_page(1, 0x00);
        dma.write_dma_page(2, 0x45);
        dma.write_dma_register(0xC0);
        assert!(dma.oam_dma_in_progress());

        for _ in 0..160 {
            dma.oam_dma_tick(&program, &memory, &mut ppu);
        }
        assert!(!dma.oam_dma_in_progress());

        for i in 0..160_u8 {
            assert_eq!(ppu.read_oam(u32::from(i)), i, "OAM[{i}]");
        }
    }

    #[test]
    fn gdma_copies_atomically_before_cpu_resumes() {
        let (mut dma, program, mut memory, mut ppu) = harness();

        for i in 0..32 {
            memory.write_wram(0xFFF8000 + i, (i + 1) as u8);
        }

        for (index, byte) in [0xDF, 0xFF, 0x80, 0x00].into_iter().enumerate() {
            dma.write_hdma_source(index as u8, byte);
        }
        dma.write_hdma_dest(0, 0x00);
        dma.write_hdma_dest(1, 0x00);

        // Bit 7 clear: general DMA, length 1 -> 32 bytes
        dma.write_hdma7(0x01);
        assert!(dma.vram_dma_active());

        for _ in 0..32 {
            dma.vram_dma_copy_byte(&program, &memory, &mut ppu);
        }
        assert!(!dma.vram_dma_active());
        assert_eq!(dma.read_hdma7(), 0xFF);

        for i in 0..32 {
            assert_eq!(ppu.read_vram(i), (i + 1) as u8, "VRAM[{i}]");
        }

        // Source and destination registers were incremented by the copy
        assert_eq!(dma.read_hdma_source(3), 0x20);
        assert_eq!(dma.read_hdma_dest(1), 0x20);
    }

    #[test]
    fn hdma_copies_one_block_per_hblank() {
        let (mut dma, program, mut memory, mut ppu) = harness();

        for i in 0..32 {
            memory.write_wram(0xFFF8000 + i, (i + 1) as u8);
        }

        for (index, byte) in [0xDF, 0xFF, 0x80, 0x00].into_iter().enumerate() {
            dma.write_hdma_source(index as u8, byte);
        }
        dma.write_hdma_dest(0, 0x00);
        dma.write_hdma_dest(1, 0x00);

        // Bit 7 set: H-blank DMA, 2 blocks of 16 bytes
        dma.write_hdma7(0x81);
        assert!(!dma.vram_dma_active());
        assert_eq!(dma.read_hdma7(), 0x01);

        // Nothing copies until an HBLANK entry
        dma.vram_dma_copy_byte(&program, &memory, &mut ppu);
        assert_eq!(ppu.read_vram(0), 0x00);

        dma.notify_hblank();
        for _ in 0..16 {
            dma.vram_dma_copy_byte(&program, &memory, &mut ppu);
        }
        assert_eq!(dma.read_hdma7(), 0x00);
        assert_eq!(ppu.read_vram(15), 16);
        assert_eq!(ppu.read_vram(16), 0x00);

        dma.notify_hblank();
        for _ in 0..16 {
            dma.vram_dma_copy_byte(&program, &memory, &mut ppu);
        }
        assert_eq!(dma.read_hdma7(), 0xFF);
        assert_eq!(ppu.read_vram(31), 32);
    }

    #[test]
    fn hdma_cancel_latches_bit_7() {
        let (mut dma, program, memory, mut ppu) = harness();

        dma.write_hdma7(0x83);
        dma.notify_hblank();
        for _ in 0..16 {
            dma.vram_dma_copy_byte(&program, &memory, &mut ppu);
        }

        // 3 blocks left of 4; clearing bit 7 cancels
        dma.write_hdma7(0x00);
        assert_eq!(dma.read_hdma7(), 0x82);

        // A cancelled transfer stays cancelled across HBLANKs
        dma.notify_hblank();
        dma.vram_dma_copy_byte(&program, &memory, &mut ppu);
        assert_eq!(dma.read_hdma7(), 0x82);
    }
}
