//! Console RAM: working RAM and battery-backed static RAM, sized by the program header

use bincode::{Decode, Encode};
use rand::RngExt;

#[derive(Debug, Clone, Encode, Decode)]
pub struct Memory {
    wram: Box<[u8]>,
    sram: Box<[u8]>,
    sram_dirty: bool,
}

impl Memory {
    pub fn new(wram_len: u32, sram_len: u32, initial_sram: Option<Vec<u8>>) -> Self {
        // Power-on WRAM contents are unspecified; don't let programs rely on zeroes
        let mut wram = vec![0; wram_len as usize].into_boxed_slice();
        rand::rng().fill(wram.as_mut());

        let sram = match initial_sram {
            Some(bytes) if bytes.len() == sram_len as usize => bytes.into_boxed_slice(),
            Some(bytes) => {
                log::warn!(
                    "Ignoring persisted SRAM image: expected {sram_len} bytes, was {}",
                    bytes.len()
                );
                vec![0; sram_len as usize].into_boxed_slice()
            }
            None => vec![0; sram_len as usize].into_boxed_slice(),
        };

        Self { wram, sram, sram_dirty: false }
    }

    pub fn read_wram(&self, address: u32) -> u8 {
        self.wram[(address as usize) & (self.wram.len() - 1)]
    }

    pub fn write_wram(&mut self, address: u32, value: u8) {
        let len = self.wram.len();
        self.wram[(address as usize) & (len - 1)] = value;
    }

    pub fn read_sram(&self, address: u32) -> u8 {
        if self.sram.is_empty() {
            return 0xFF;
        }

        self.sram[(address as usize) & (self.sram.len() - 1)]
    }

    pub fn write_sram(&mut self, address: u32, value: u8) {
        if self.sram.is_empty() {
            return;
        }

        let len = self.sram.len();
        self.sram[(address as usize) & (len - 1)] = value;
        self.sram_dirty = true;
    }

    pub fn sram(&self) -> &[u8] {
        &self.sram
    }

    pub fn get_and_clear_sram_dirty(&mut self) -> bool {
        let dirty = self.sram_dirty;
        self.sram_dirty = false;
        dirty
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wram_round_trip_with_mirroring() {
        let mut memory = Memory::new(0x1000, 0, None);

        memory.write_wram(0x0ABC, 0x42);
        assert_eq!(memory.read_wram(0x0ABC), 0x42);

        // The window mirrors modulo the requested size
        assert_eq!(memory.read_wram(0x5ABC), 0x42);
    }

    #[test]
    fn sram_tracks_dirty_state() {
        let mut memory = Memory::new(0x400, 0x400, None);
        assert!(!memory.get_and_clear_sram_dirty());

        memory.write_sram(0x10, 0x99);
        assert_eq!(memory.read_sram(0x10), 0x99);
        assert!(memory.get_and_clear_sram_dirty());
        assert!(!memory.get_and_clear_sram_dirty());
    }

    #[test]
    fn persisted_sram_must_match_requested_size() {
        let memory = Memory::new(0x400, 0x400, Some(vec![0xAA; 0x400]));
        assert_eq!(memory.read_sram(0x3FF), 0xAA);

        let memory = Memory::new(0x400, 0x400, Some(vec![0xAA; 0x200]));
        assert_eq!(memory.read_sram(0x3FF), 0x00);
    }

    #[test]
    fn absent_sram_reads_open_bus() {
        let mut memory = Memory::new(0x400, 0, None);
        memory.write_sram(0x10, 0x99);
        assert_eq!(memory.read_sram(0x10), 0xFF);
    }
}
