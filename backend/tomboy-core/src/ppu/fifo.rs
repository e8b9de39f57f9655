//! Pixel pipeline: the background/window fetcher, the two pixel FIFOs, and per-dot mixing

use crate::GraphicsMode;
use crate::ppu::registers::{ColorRam, Registers, TileDataArea};
use crate::ppu::{PpuFrameBuffer, SCREEN_WIDTH, SpriteData, SpriteList, Vram};
use bincode::{Decode, Encode};
use tomboy_common::num::GetBit;

const FIFO_LEN: usize = 32;

// Pixels fetched ahead of the current tile; pushes wait while more than a tile is queued
const FIFO_PUSH_THRESHOLD: u8 = 8;

const BANK_1_OFFSET: u16 = 0x2000;
const ATTRIBUTE_MAP_OFFSET: u16 = 0x2000;

// RGB555 shades for classic-mode colors 0-3, white to black
const CLASSIC_SHADES: [u16; 4] = [0x7FFF, 0x56B5, 0x294A, 0x0000];

#[derive(Debug, Clone, Copy, Default, Encode, Decode)]
struct BgPixel {
    color: u8,
    palette: u8,
    high_priority: bool,
}

#[derive(Debug, Clone, Copy, Default, Encode, Decode)]
struct ObjPixel {
    color: u8,
    palette: u8,
    low_priority: bool,
}

/// Fixed-capacity circular pixel queue. Overflow is an emulator bug, not a program bug; it
/// trips a debug assertion and latches a flag that aborts the current tick.
#[derive(Debug, Clone, Encode, Decode)]
struct PixelQueue<T> {
    slots: [T; FIFO_LEN],
    head: u8,
    len: u8,
    overflowed: bool,
}

impl<T: Copy + Default> PixelQueue<T> {
    fn new() -> Self {
        Self { slots: [T::default(); FIFO_LEN], head: 0, len: 0, overflowed: false }
    }

    fn push(&mut self, pixel: T) {
        debug_assert!((self.len as usize) < FIFO_LEN, "pixel FIFO overflow");
        if self.len as usize == FIFO_LEN {
            self.overflowed = true;
            return;
        }

        self.slots[(self.head as usize + self.len as usize) % FIFO_LEN] = pixel;
        self.len += 1;
    }

    fn pop(&mut self) -> Option<T> {
        if self.len == 0 {
            return None;
        }

        let pixel = self.slots[self.head as usize];
        self.head = (self.head + 1) % FIFO_LEN as u8;
        self.len -= 1;
        Some(pixel)
    }

    fn get_mut(&mut self, index: u8) -> &mut T {
        debug_assert!(index < self.len);
        &mut self.slots[(self.head as usize + index as usize) % FIFO_LEN]
    }

    fn clear(&mut self) {
        self.head = 0;
        self.len = 0;
    }

    fn len(&self) -> u8 {
        self.len
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Encode, Decode)]
enum FetcherStep {
    TileNumber,
    TileLow,
    TileHigh,
    PushPixels,
    Sleep,
}

#[derive(Debug, Clone, Encode, Decode)]
pub struct PixelFifo {
    bg: PixelQueue<BgPixel>,
    obj: PixelQueue<ObjPixel>,
    line: u8,
    screen_x: u8,
    discard: u8,
    // Fetcher state
    step: FetcherStep,
    step_dot: u8,
    fetcher_x: u8,
    tile_number: u8,
    tile_attributes: u8,
    tile_low: u8,
    tile_high: u8,
    // Window state
    wy_latched: bool,
    in_window: bool,
    window_line: u8,
    window_triggered_this_line: bool,
    // Sprite fetch state
    fetched_sprites: u16,
    sprite_stall: u8,
    pending_sprite: Option<SpriteData>,
}

impl PixelFifo {
    pub fn new() -> Self {
        Self {
            bg: PixelQueue::new(),
            obj: PixelQueue::new(),
            line: 0,
            screen_x: 0,
            discard: 0,
            step: FetcherStep::TileNumber,
            step_dot: 0,
            fetcher_x: 0,
            tile_number: 0,
            tile_attributes: 0,
            tile_low: 0,
            tile_high: 0,
            wy_latched: false,
            in_window: false,
            window_line: 0,
            window_triggered_this_line: false,
            fetched_sprites: 0,
            sprite_stall: 0,
            pending_sprite: None,
        }
    }

    pub fn start_new_line(&mut self, scanline: u8, registers: &Registers) {
        if self.window_triggered_this_line {
            self.window_line += 1;
        }

        self.bg.clear();
        self.obj.clear();
        self.line = scanline;
        self.screen_x = 0;

        // Fine X scroll discards the first (SCX % 8) pixels of the line
        self.discard = registers.bg_x_scroll % 8;

        self.step = FetcherStep::TileNumber;
        self.step_dot = 0;
        self.fetcher_x = 0;
        self.in_window = false;
        self.window_triggered_this_line = false;
        self.fetched_sprites = 0;
        self.sprite_stall = 0;
        self.pending_sprite = None;

        // The window Y condition latches for the rest of the frame once LY matches WY
        if scanline == registers.window_y {
            self.wy_latched = true;
        }
    }

    pub fn reset_frame_state(&mut self) {
        self.wy_latched = false;
        self.window_line = 0;
        self.window_triggered_this_line = false;
    }

    pub fn check_window_y(&mut self, scanline: u8, registers: &Registers) {
        // Re-checked at end of line as well; programs can set WY == LY during the line
        if scanline == registers.window_y {
            self.wy_latched = true;
        }
    }

    pub fn done_with_line(&self) -> bool {
        self.screen_x == SCREEN_WIDTH as u8
    }

    pub fn take_overflow(&mut self) -> bool {
        let overflowed = self.bg.overflowed || self.obj.overflowed;
        self.bg.overflowed = false;
        self.obj.overflowed = false;
        overflowed
    }

    #[allow(clippy::too_many_arguments)]
    pub fn tick(
        &mut self,
        vram: &Vram,
        registers: &Registers,
        sprites: &SpriteList,
        bg_cram: &ColorRam,
        obj_cram: &ColorRam,
        graphics_mode: GraphicsMode,
        frame_buffer: &mut PpuFrameBuffer,
    ) {
        // A sprite fetch pauses everything else
        if self.sprite_stall != 0 {
            self.sprite_stall -= 1;
            if self.sprite_stall == 0 {
                if let Some(sprite) = self.pending_sprite.take() {
                    self.merge_sprite_pixels(sprite, vram, registers, graphics_mode);
                }
            }
            return;
        }

        if registers.sprites_enabled && self.check_sprite_trigger(sprites) {
            return;
        }

        self.check_window_trigger(registers);

        self.fetcher_dot(vram, registers, graphics_mode);

        self.emit_pixel(registers, bg_cram, obj_cram, graphics_mode, frame_buffer);
    }

    /// Begin an object fetch if an unfetched object covers the current X position.
    /// The fetch costs a minimum of 6 dots, plus an alignment penalty when the object lands at
    /// the start of a background tile.
    fn check_sprite_trigger(&mut self, sprites: &SpriteList) -> bool {
        for (i, sprite) in sprites.iter().enumerate() {
            if self.fetched_sprites.bit(i as u8) {
                continue;
            }

            let triggered =
                sprite.x == self.screen_x + 8 || (self.screen_x == 0 && sprite.x < 8);
            if !triggered {
                continue;
            }

            self.fetched_sprites |= 1 << i;
            self.pending_sprite = Some(sprite);

            let penalty = if self.bg_aligned() { self.bg.len().saturating_sub(2) } else { 0 };
            self.sprite_stall = 6 + penalty;

            log::trace!(
                "Object fetch at line {} x {}: {} dots",
                self.line,
                self.screen_x,
                self.sprite_stall
            );
            return true;
        }

        false
    }

    fn bg_aligned(&self) -> bool {
        self.discard == 0 && self.screen_x % 8 == 0
    }

    fn check_window_trigger(&mut self, registers: &Registers) {
        if self.in_window
            || !registers.window_enabled
            || !self.wy_latched
            || self.screen_x + 7 < registers.window_x
        {
            return;
        }

        // Entering the window flushes the background FIFO and restarts the fetcher at the
        // window's left edge
        self.bg.clear();
        self.in_window = true;
        self.window_triggered_this_line = true;
        self.fetcher_x = 0;
        self.step = FetcherStep::TileNumber;
        self.step_dot = 0;
        self.discard = 0;

        log::trace!("Window triggered at line {} x {}", self.line, self.screen_x);
    }

    fn fetcher_dot(&mut self, vram: &Vram, registers: &Registers, graphics_mode: GraphicsMode) {
        // Every fetcher step takes 2 dots
        self.step_dot += 1;
        if self.step_dot < 2 {
            return;
        }
        self.step_dot = 0;

        match self.step {
            FetcherStep::TileNumber => {
                self.fetch_tile_number(vram, registers, graphics_mode);
                self.step = FetcherStep::TileLow;
            }
            FetcherStep::TileLow => {
                self.tile_low = vram[self.tile_row_address(registers) as usize];
                self.step = FetcherStep::TileHigh;
            }
            FetcherStep::TileHigh => {
                self.tile_high = vram[(self.tile_row_address(registers) + 1) as usize];
                self.step = FetcherStep::PushPixels;
            }
            FetcherStep::PushPixels => {
                if self.bg.len() <= FIFO_PUSH_THRESHOLD {
                    self.push_bg_pixels();
                    self.fetcher_x = self.fetcher_x.wrapping_add(1);
                    self.step = FetcherStep::TileNumber;
                } else {
                    self.step = FetcherStep::Sleep;
                }
            }
            FetcherStep::Sleep => {
                // Idle, then refetch the same tile
                self.step = FetcherStep::TileNumber;
            }
        }
    }

    fn fetch_tile_number(
        &mut self,
        vram: &Vram,
        registers: &Registers,
        graphics_mode: GraphicsMode,
    ) {
        let map_addr = if self.in_window {
            let tile_map_y = u16::from(self.window_line / 8);
            registers.window_tile_map_addr | (tile_map_y << 5) | u16::from(self.fetcher_x & 31)
        } else {
            let coarse_x_scroll = registers.bg_x_scroll / 8;
            let tile_map_x = u16::from(self.fetcher_x.wrapping_add(coarse_x_scroll) & 31);
            let bg_y = self.line.wrapping_add(registers.bg_y_scroll);
            let tile_map_y = u16::from(bg_y / 8);

            registers.bg_tile_map_addr | (tile_map_y << 5) | tile_map_x
        };

        // Tile indices live in bank 0; the attribute map shares the address in bank 1
        self.tile_number = vram[map_addr as usize];
        self.tile_attributes = match graphics_mode {
            GraphicsMode::Classic => 0,
            GraphicsMode::Color => vram[(map_addr + ATTRIBUTE_MAP_OFFSET) as usize],
        };
    }

    fn tile_row_address(&self, registers: &Registers) -> u16 {
        let row_in_tile = if self.in_window {
            self.window_line % 8
        } else {
            self.line.wrapping_add(registers.bg_y_scroll) % 8
        };

        // Vertical flip
        let row_in_tile =
            if self.tile_attributes.bit(6) { 7 - row_in_tile } else { row_in_tile };

        let bank_offset = if self.tile_attributes.bit(3) { BANK_1_OFFSET } else { 0 };
        bank_offset
            | (registers.bg_tile_data_area.tile_address(self.tile_number)
                + 2 * u16::from(row_in_tile))
    }

    fn push_bg_pixels(&mut self) {
        let horizontal_flip = self.tile_attributes.bit(5);
        let palette = self.tile_attributes & 0x07;
        let high_priority = self.tile_attributes.bit(7);

        for i in 0..8 {
            let bit = if horizontal_flip { i } else { 7 - i };
            let color =
                u8::from(self.tile_low.bit(bit)) | (u8::from(self.tile_high.bit(bit)) << 1);

            self.bg.push(BgPixel { color, palette, high_priority });
        }
    }

    fn merge_sprite_pixels(
        &mut self,
        sprite: SpriteData,
        vram: &Vram,
        registers: &Registers,
        graphics_mode: GraphicsMode,
    ) {
        let sprite_height: u8 = if registers.double_height_sprites { 16 } else { 8 };

        // OAM Y is offset by 16; the scan guarantees the line intersects
        let mut row = self.line + 16 - sprite.y;
        if sprite.vertical_flip {
            row = sprite_height - 1 - row;
        }

        let mut tile_number = sprite.tile_number;
        if registers.double_height_sprites {
            tile_number &= 0xFE;
            if row >= 8 {
                tile_number |= 0x01;
                row -= 8;
            }
        }

        let vram_bank = match graphics_mode {
            GraphicsMode::Classic => 0,
            GraphicsMode::Color => u16::from(sprite.vram_bank) * BANK_1_OFFSET,
        };
        let tile_addr =
            vram_bank | (TileDataArea::SPRITES.tile_address(tile_number) + 2 * u16::from(row));
        let tile_low = vram[tile_addr as usize];
        let tile_high = vram[(tile_addr + 1) as usize];

        // Objects hanging off the left edge only contribute their visible tail
        let first_visible = 8_u8.saturating_sub(sprite.x);

        while self.obj.len() < 8 {
            self.obj.push(ObjPixel::default());
        }

        for i in first_visible..8 {
            let bit = if sprite.horizontal_flip { i } else { 7 - i };
            let color = u8::from(tile_low.bit(bit)) | (u8::from(tile_high.bit(bit)) << 1);

            // Earlier-fetched objects win; later pixels only fill transparent slots
            let slot = self.obj.get_mut(i - first_visible);
            if slot.color == 0 && color != 0 {
                let palette = match graphics_mode {
                    GraphicsMode::Classic => sprite.classic_palette,
                    GraphicsMode::Color => sprite.color_palette,
                };
                *slot = ObjPixel { color, palette, low_priority: sprite.low_priority };
            }
        }
    }

    fn emit_pixel(
        &mut self,
        registers: &Registers,
        bg_cram: &ColorRam,
        obj_cram: &ColorRam,
        graphics_mode: GraphicsMode,
        frame_buffer: &mut PpuFrameBuffer,
    ) {
        let Some(bg_pixel) = self.bg.pop() else { return };

        if self.discard != 0 {
            self.discard -= 1;
            return;
        }

        let bg_color = if registers.bg_enabled || graphics_mode == GraphicsMode::Color {
            bg_pixel.color
        } else {
            0
        };

        // Objects win unless a priority flag defers to a non-zero background color.
        // In color mode the BG enable bit acts as a master priority switch instead
        let winning_obj = self.obj.pop().filter(|obj| {
            registers.sprites_enabled
                && obj.color != 0
                && ((graphics_mode == GraphicsMode::Color && !registers.bg_enabled)
                    || !(obj.low_priority || bg_pixel.high_priority)
                    || bg_color == 0)
        });

        let color = match (winning_obj, graphics_mode) {
            (Some(obj), GraphicsMode::Classic) => {
                let shade =
                    registers.sprite_palettes[(obj.palette & 0x01) as usize][obj.color as usize];
                CLASSIC_SHADES[shade as usize]
            }
            (Some(obj), GraphicsMode::Color) => obj_cram.color(obj.palette, obj.color),
            (None, GraphicsMode::Classic) => {
                CLASSIC_SHADES[registers.bg_palette[bg_color as usize] as usize]
            }
            (None, GraphicsMode::Color) => bg_cram.color(bg_pixel.palette, bg_color),
        };

        frame_buffer.set(self.line, self.screen_x, color);
        self.screen_x += 1;
    }
}
