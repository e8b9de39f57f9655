//! Conversion from the PPU's RGB555 frame buffer to host-facing RGBA8888

use crate::ppu::{FRAME_BUFFER_LEN, PpuFrameBuffer};
use bincode::{Decode, Encode};
use std::iter;
use std::ops::Deref;
use tomboy_common::frontend::Color;

// [round(255 * i / 31) for i in range(32)]
const RGB_5_TO_8: &[u8; 32] = &[
    0, 8, 16, 25, 33, 41, 49, 58, 66, 74, 82, 90, 99, 107, 115, 123, 132, 140, 148, 156, 165, 173,
    181, 189, 197, 206, 214, 222, 230, 239, 247, 255,
];

#[derive(Debug, Clone, Encode, Decode)]
pub struct RgbaFrameBuffer(Vec<Color>);

impl RgbaFrameBuffer {
    pub fn copy_from(&mut self, ppu_frame_buffer: &PpuFrameBuffer) {
        for (ppu_color, rgba_color) in iter::zip(ppu_frame_buffer.iter(), self.0.iter_mut()) {
            *rgba_color = map_color(ppu_color);
        }
    }

    /// Raw byte view for the read-only screen window on the bus
    pub fn read_byte(&self, offset: u32) -> u8 {
        let bytes: &[u8] = bytemuck::cast_slice(&self.0);
        bytes.get(offset as usize).copied().unwrap_or(0xFF)
    }
}

fn map_color(ppu_color: u16) -> Color {
    let r = ppu_color & 0x1F;
    let g = (ppu_color >> 5) & 0x1F;
    let b = (ppu_color >> 10) & 0x1F;

    Color::rgb(RGB_5_TO_8[r as usize], RGB_5_TO_8[g as usize], RGB_5_TO_8[b as usize])
}

impl Default for RgbaFrameBuffer {
    fn default() -> Self {
        Self(vec![Color::default(); FRAME_BUFFER_LEN])
    }
}

impl Deref for RgbaFrameBuffer {
    type Target = [Color];

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_rgb555_endpoints() {
        assert_eq!(map_color(0x7FFF), Color::rgb(255, 255, 255));
        assert_eq!(map_color(0x0000), Color::rgb(0, 0, 0));
        assert_eq!(map_color(0x001F), Color::rgb(255, 0, 0));
        assert_eq!(map_color(0x03E0), Color::rgb(0, 255, 0));
        assert_eq!(map_color(0x7C00), Color::rgb(0, 0, 255));
    }

    #[test]
    fn byte_view_is_rgba_order() {
        let mut buffer = RgbaFrameBuffer::default();
        let ppu_buffer = PpuFrameBuffer::default();
        buffer.copy_from(&ppu_buffer);

        // Color 0 is black with full alpha
        assert_eq!(buffer.read_byte(0), 0);
        assert_eq!(buffer.read_byte(3), 255);

        // Past the end reads open bus
        assert_eq!(buffer.read_byte(4 * FRAME_BUFFER_LEN as u32), 0xFF);
    }
}
