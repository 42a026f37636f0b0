//! ROM container identification.
//!
//! Only recognizes the container by its magic bytes and splits an iNES image
//! into PRG/CHR. Mapper behaviour and game-database lookups belong to the
//! emulation core.

use std::path::Path;

use tracing::info;

use crate::error::RomError;
use crate::png::crc32;

const INES_HEADER: usize = 16;
const TRAINER_SIZE: usize = 512;
const PRG_BANK: usize = 16 * 1024;
const CHR_BANK: usize = 8 * 1024;

/// Container format, detected from the file's magic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RomFormat {
    INes,
    Fds,
    Nsf,
    Nsfe,
    Unif,
}

impl RomFormat {
    pub fn name(self) -> &'static str {
        match self {
            RomFormat::INes => "iNES",
            RomFormat::Fds => "FDS",
            RomFormat::Nsf => "NSF",
            RomFormat::Nsfe => "NSFE",
            RomFormat::Unif => "UNIF",
        }
    }

    /// Identify a container by magic bytes.
    pub fn detect(data: &[u8]) -> Option<RomFormat> {
        if data.starts_with(b"NES\x1a") {
            Some(RomFormat::INes)
        } else if data.starts_with(b"FDS\x1a") || data.starts_with(b"\x01*NINTENDO-HVC*") {
            Some(RomFormat::Fds)
        } else if data.starts_with(b"NESM\x1a") {
            Some(RomFormat::Nsf)
        } else if data.starts_with(b"NSFE") {
            Some(RomFormat::Nsfe)
        } else if data.starts_with(b"UNIF") {
            Some(RomFormat::Unif)
        } else {
            None
        }
    }
}

/// A loaded ROM file.
#[derive(Debug, Clone)]
pub struct RomImage {
    pub name: String,
    pub format: RomFormat,
    pub crc32: u32,
    /// PRG-ROM (iNES only; empty otherwise)
    pub prg: Vec<u8>,
    /// CHR-ROM (iNES only; empty means the cartridge uses CHR-RAM)
    pub chr: Vec<u8>,
    /// iNES mapper number
    pub mapper: u16,
    pub data: Vec<u8>,
}

impl RomImage {
    /// Read and identify a ROM file.
    pub fn load(path: &Path) -> Result<Self, RomError> {
        let data = std::fs::read(path)?;
        let name = path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("rom")
            .to_string();
        Self::parse(&name, data)
    }

    /// Identify a ROM image held in memory.
    pub fn parse(name: &str, data: Vec<u8>) -> Result<Self, RomError> {
        if data.len() < 10 {
            return Err(RomError::TooSmall(data.len()));
        }
        let format = RomFormat::detect(&data).ok_or(RomError::UnknownFormat)?;
        let crc = crc32(&data);
        info!(rom = name, format = format.name(), crc32 = format_args!("{:08X}", crc), "Loading rom");

        let mut rom = RomImage {
            name: name.to_string(),
            format,
            crc32: crc,
            prg: Vec::new(),
            chr: Vec::new(),
            mapper: 0,
            data,
        };
        if format == RomFormat::INes {
            rom.split_ines()?;
        }
        Ok(rom)
    }

    fn split_ines(&mut self) -> Result<(), RomError> {
        let d = &self.data;
        if d.len() < INES_HEADER {
            return Err(RomError::Truncated("iNES"));
        }
        let prg_len = d[4] as usize * PRG_BANK;
        let chr_len = d[5] as usize * CHR_BANK;
        let has_trainer = d[6] & 0x04 != 0;
        self.mapper = ((d[6] >> 4) | (d[7] & 0xF0)) as u16;

        let prg_start = INES_HEADER + if has_trainer { TRAINER_SIZE } else { 0 };
        let chr_start = prg_start + prg_len;
        if d.len() < chr_start + chr_len {
            return Err(RomError::Truncated("iNES"));
        }
        self.prg = d[prg_start..chr_start].to_vec();
        self.chr = d[chr_start..chr_start + chr_len].to_vec();
        Ok(())
    }

    pub fn has_chr_ram(&self) -> bool {
        self.chr.is_empty()
    }
}

/// Build a minimal iNES image (used by tests and the synthetic console demo).
pub fn build_ines(prg_banks: u8, chr: &[u8]) -> Vec<u8> {
    let chr_banks = chr.len().div_ceil(CHR_BANK);
    let mut out = Vec::with_capacity(INES_HEADER + prg_banks as usize * PRG_BANK + chr_banks * CHR_BANK);
    out.extend_from_slice(b"NES\x1a");
    out.push(prg_banks);
    out.push(chr_banks as u8);
    out.extend_from_slice(&[0; 10]);
    out.resize(INES_HEADER + prg_banks as usize * PRG_BANK, 0xEA);
    let chr_start = out.len();
    out.extend_from_slice(chr);
    out.resize(chr_start + chr_banks * CHR_BANK, 0);
    out
}
