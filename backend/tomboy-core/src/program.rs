//! Program image parsing: the "TMBY" header, requested RAM sizes, and metadata strings

use bincode::{Decode, Encode};
use thiserror::Error;

pub const MAGIC: [u8; 4] = *b"TMBY";

// Header + at least one page of entry-point code
const MIN_IMAGE_LEN: usize = 12290;

pub const ENTRY_POINT: u32 = 0x0160;

const WRAM_SIZE_CAP: u32 = 16 * 1024 * 1024;
const SRAM_SIZE_CAP: u32 = 1024 * 1024;
const XRAM_SIZE_CAP: u32 = 1024 * 1024;

const MIN_RAM_SIZE: u32 = 1024;

#[derive(Debug, Error)]
pub enum ProgramLoadError {
    #[error("Program image is {actual} bytes; the header alone requires {MIN_IMAGE_LEN}")]
    ImageTooShort { actual: usize },
    #[error("Program identifier is {actual:02X?}, expected {MAGIC:02X?} (\"TMBY\")")]
    InvalidMagic { actual: [u8; 4] },
    #[error(
        "Requested {region} size {requested} is invalid; must be a power of two in [{min}, {max}]"
    )]
    InvalidRamSize { region: &'static str, requested: u32, min: u32, max: u32 },
    #[error("Program {field} string is not NUL-terminated")]
    UnterminatedString { field: &'static str },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Encode, Decode)]
pub struct Version {
    pub major: u8,
    pub minor: u8,
    pub patch: u16,
}

impl Version {
    fn from_packed(packed: u32) -> Self {
        Self { major: (packed >> 24) as u8, minor: (packed >> 16) as u8, patch: packed as u16 }
    }
}

impl std::fmt::Display for Version {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

#[derive(Debug, Clone, Encode, Decode)]
pub struct Program {
    rom: Box<[u8]>,
    version: Version,
    wram_len: u32,
    sram_len: u32,
    xram_len: u32,
    name: String,
    author: String,
    description: String,
}

impl Program {
    /// Validate a program image and take ownership of its bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if the image is truncated, carries the wrong identifier, requests an
    /// invalid RAM size, or contains an unterminated metadata string.
    pub fn parse(rom: Vec<u8>) -> Result<Self, ProgramLoadError> {
        if rom.len() < MIN_IMAGE_LEN {
            return Err(ProgramLoadError::ImageTooShort { actual: rom.len() });
        }

        let magic: [u8; 4] = rom[0x00..0x04].try_into().unwrap();
        if magic != MAGIC {
            return Err(ProgramLoadError::InvalidMagic { actual: magic });
        }

        let version = Version::from_packed(read_u32(&rom, 0x04));
        let wram_len = read_u32(&rom, 0x08);
        let sram_len = read_u32(&rom, 0x0C);
        let xram_len = read_u32(&rom, 0x10);

        validate_ram_size("WRAM", wram_len, MIN_RAM_SIZE, WRAM_SIZE_CAP)?;
        // SRAM and XRAM are optional; zero means not present
        if sram_len != 0 {
            validate_ram_size("SRAM", sram_len, MIN_RAM_SIZE, SRAM_SIZE_CAP)?;
        }
        if xram_len != 0 {
            validate_ram_size("XRAM", xram_len, MIN_RAM_SIZE, XRAM_SIZE_CAP)?;
        }

        let name = read_string(&rom, 0x20, 32, "name")?;
        let author = read_string(&rom, 0x40, 32, "author")?;
        let description = read_string(&rom, 0x60, 256, "description")?;

        log::info!("Loaded program \"{name}\" v{version} by {author}");
        log::debug!("  WRAM {wram_len} bytes, SRAM {sram_len} bytes, XRAM {xram_len} bytes");

        Ok(Self {
            rom: rom.into_boxed_slice(),
            version,
            wram_len,
            sram_len,
            xram_len,
            name,
            author,
            description,
        })
    }

    pub fn read_rom(&self, address: u32) -> u8 {
        self.rom.get(address as usize).copied().unwrap_or(0xFF)
    }

    pub fn version(&self) -> Version {
        self.version
    }

    pub fn wram_len(&self) -> u32 {
        self.wram_len
    }

    pub fn sram_len(&self) -> u32 {
        self.sram_len
    }

    pub fn xram_len(&self) -> u32 {
        self.xram_len
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn author(&self) -> &str {
        &self.author
    }

    pub fn description(&self) -> &str {
        &self.description
    }
}

fn read_u32(rom: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes(rom[offset..offset + 4].try_into().unwrap())
}

fn validate_ram_size(
    region: &'static str,
    requested: u32,
    min: u32,
    max: u32,
) -> Result<(), ProgramLoadError> {
    if requested < min || requested > max || !requested.is_power_of_two() {
        return Err(ProgramLoadError::InvalidRamSize { region, requested, min, max });
    }

    Ok(())
}

fn read_string(
    rom: &[u8],
    offset: usize,
    max_len: usize,
    field: &'static str,
) -> Result<String, ProgramLoadError> {
    let bytes = &rom[offset..offset + max_len];
    let Some(nul_position) = bytes.iter().position(|&b| b == 0) else {
        return Err(ProgramLoadError::UnterminatedString { field });
    };

    Ok(String::from_utf8_lossy(&bytes[..nul_position]).into_owned())
}

#[cfg(test)]
pub(crate) fn test_image(wram_len: u32, sram_len: u32) -> Vec<u8> {
    let mut rom = vec![0; MIN_IMAGE_LEN];
    rom[0x00..0x04].copy_from_slice(&MAGIC);
    rom[0x04..0x08].copy_from_slice(&0x0102_0003_u32.to_le_bytes());
    rom[0x08..0x0C].copy_from_slice(&wram_len.to_le_bytes());
    rom[0x0C..0x10].copy_from_slice(&sram_len.to_le_bytes());
    rom[0x10..0x14].copy_from_slice(&1024_u32.to_le_bytes());
    rom[0x20..0x25].copy_from_slice(b"Test\0");
    rom[0x40..0x47].copy_from_slice(b"Nobody\0");
    rom[0x60..0x6D].copy_from_slice(b"A test image\0");
    rom
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_valid_image() {
        let program = Program::parse(test_image(0x8000, 0x400)).unwrap();

        assert_eq!(program.version(), Version { major: 1, minor: 2, patch: 3 });
        assert_eq!(program.wram_len(), 0x8000);
        assert_eq!(program.sram_len(), 0x400);
        assert_eq!(program.name(), "Test");
        assert_eq!(program.author(), "Nobody");
        assert_eq!(program.description(), "A test image");
    }

    #[test]
    fn rejects_bad_magic() {
        let mut rom = test_image(0x8000, 0);
        rom[0x03] = b'X';

        assert!(matches!(
            Program::parse(rom),
            Err(ProgramLoadError::InvalidMagic { actual: [b'T', b'M', b'B', b'X'] })
        ));
    }

    #[test]
    fn rejects_truncated_image() {
        let rom = vec![0; MIN_IMAGE_LEN - 1];

        assert!(matches!(Program::parse(rom), Err(ProgramLoadError::ImageTooShort { .. })));
    }

    #[test]
    fn rejects_oversized_wram_request() {
        let rom = test_image(32 * 1024 * 1024, 0);

        assert!(matches!(
            Program::parse(rom),
            Err(ProgramLoadError::InvalidRamSize { region: "WRAM", .. })
        ));
    }

    #[test]
    fn rejects_non_power_of_two_request() {
        let rom = test_image(0x8000, 0x300);

        assert!(matches!(
            Program::parse(rom),
            Err(ProgramLoadError::InvalidRamSize { region: "SRAM", .. })
        ));
    }

    #[test]
    fn rejects_unterminated_name() {
        let mut rom = test_image(0x8000, 0);
        rom[0x20..0x40].fill(b'A');

        assert!(matches!(
            Program::parse(rom),
            Err(ProgramLoadError::UnterminatedString { field: "name" })
        ));
    }

    #[test]
    fn out_of_image_reads_open_bus() {
        let program = Program::parse(test_image(0x8000, 0)).unwrap();

        assert_eq!(program.read_rom(0x0000_0000), b'T');
        assert_eq!(program.read_rom(0x3FFF_FFFF), 0xFF);
    }
}
