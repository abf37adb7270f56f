//! Sector-addressed disk images (`VCD` format).
//!
//! File layout: an 11-byte header — the magic `VCD`, a version byte, the
//! disk type, the write-protect flag, sides, tracks per side, sectors per
//! track, and a little-endian bytes-per-sector word — followed by the
//! bad-sector bitmap (one bit per sector, LSB first, padded to whole
//! bytes), followed by the sector payload in sector order.
//!
//! Media errors (`NoMedia`, `Protected`, `BadSector`) are part of the
//! emulated device contract and are returned for the guest to observe;
//! corrupt images and I/O failures are host-side errors.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use thiserror::Error;

pub const DISK_MAGIC: [u8; 3] = *b"VCD";
pub const HEADER_VERSION: u8 = 1;

const HEADER_SIZE: u64 = 11;
const WRITE_PROTECT_OFFSET: u64 = 5;

pub type Result<T> = std::result::Result<T, DiskError>;

#[derive(Debug, Error)]
pub enum DiskError {
    #[error("no media (the disk file is not open)")]
    NoMedia,

    #[error("disk is write protected")]
    Protected,

    #[error("bad sector {0}")]
    BadSector(u16),

    #[error("sector {sector} out of range (disk has {total})")]
    SectorOutOfRange { sector: u16, total: u32 },

    #[error("not a usable disk image: {0}")]
    Corrupt(&'static str),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiskType {
    Floppy,
}

impl DiskType {
    fn to_byte(self) -> u8 {
        match self {
            DiskType::Floppy => b'F',
        }
    }

    fn from_byte(b: u8) -> Result<Self> {
        match b {
            b'F' => Ok(DiskType::Floppy),
            _ => Err(DiskError::Corrupt("unknown disk type")),
        }
    }
}

/// Disk geometry and protection state, as stored in the image header.
#[derive(Debug, Clone)]
pub struct DiskDescriptor {
    pub disk_type: DiskType,
    pub write_protect: bool,
    pub sides: u8,
    pub tracks_per_side: u8,
    pub sectors_per_track: u8,
    pub bytes_per_sector: u16,
}

impl DiskDescriptor {
    pub fn total_tracks(&self) -> u16 {
        self.sides as u16 * self.tracks_per_side as u16
    }

    pub fn total_sectors(&self) -> u32 {
        self.sides as u32 * self.tracks_per_side as u32 * self.sectors_per_track as u32
    }

    /// log2 of the sector size, for geometries with power-of-two sectors.
    pub fn bytes_exponent(&self) -> u8 {
        15 - self.bytes_per_sector.leading_zeros() as u8
    }

    fn bitmap_len(&self) -> usize {
        self.total_sectors().div_ceil(8) as usize
    }

    fn validate(&self) -> Result<()> {
        if self.total_sectors() == 0 {
            return Err(DiskError::Corrupt("disk has no sectors"));
        }
        if self.bytes_per_sector == 0 {
            return Err(DiskError::Corrupt("zero bytes per sector"));
        }
        Ok(())
    }
}

/// A file-backed disk image.
#[derive(Debug)]
pub struct Disk {
    path: PathBuf,
    file: Option<File>,
    descriptor: DiskDescriptor,
    bad_sectors: Vec<u8>,
}

impl Disk {
    /// Creates a new image: header, cleared bad-sector bitmap, zeroed
    /// payload.
    pub fn create(path: impl AsRef<Path>, descriptor: DiskDescriptor) -> Result<Self> {
        descriptor.validate()?;
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path.as_ref())?;

        let mut header = Vec::with_capacity(HEADER_SIZE as usize);
        header.extend_from_slice(&DISK_MAGIC);
        header.push(HEADER_VERSION);
        header.push(descriptor.disk_type.to_byte());
        header.push(descriptor.write_protect as u8);
        header.push(descriptor.sides);
        header.push(descriptor.tracks_per_side);
        header.push(descriptor.sectors_per_track);
        header.extend_from_slice(&descriptor.bytes_per_sector.to_le_bytes());
        file.write_all(&header)?;

        let bad_sectors = vec![0u8; descriptor.bitmap_len()];
        file.write_all(&bad_sectors)?;

        let payload =
            descriptor.total_sectors() as u64 * descriptor.bytes_per_sector as u64;
        file.set_len(HEADER_SIZE + bad_sectors.len() as u64 + payload)?;
        file.flush()?;

        Ok(Self {
            path: path.as_ref().to_owned(),
            file: Some(file),
            descriptor,
            bad_sectors,
        })
    }

    /// Opens an existing image, verifying the magic and version.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let mut file = OpenOptions::new().read(true).write(true).open(path.as_ref())?;

        let mut header = [0u8; HEADER_SIZE as usize];
        file.read_exact(&mut header)
            .map_err(|_| DiskError::Corrupt("short header"))?;
        if header[0..3] != DISK_MAGIC {
            return Err(DiskError::Corrupt("bad magic"));
        }
        if header[3] != HEADER_VERSION {
            return Err(DiskError::Corrupt("unsupported version"));
        }

        let descriptor = DiskDescriptor {
            disk_type: DiskType::from_byte(header[4])?,
            write_protect: header[5] != 0,
            sides: header[6],
            tracks_per_side: header[7],
            sectors_per_track: header[8],
            bytes_per_sector: u16::from_le_bytes([header[9], header[10]]),
        };
        descriptor.validate()?;

        let mut bad_sectors = vec![0u8; descriptor.bitmap_len()];
        file.read_exact(&mut bad_sectors)
            .map_err(|_| DiskError::Corrupt("short bad-sector bitmap"))?;

        Ok(Self {
            path: path.as_ref().to_owned(),
            file: Some(file),
            descriptor,
            bad_sectors,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn descriptor(&self) -> &DiskDescriptor {
        &self.descriptor
    }

    pub fn is_valid(&self) -> bool {
        self.file.is_some()
    }

    /// Removes the media: subsequent sector access reports `NoMedia`.
    pub fn eject(&mut self) {
        self.file = None;
    }

    pub fn is_protected(&self) -> bool {
        self.descriptor.write_protect
    }

    /// Flips write protection, persisting the flag in the header.
    pub fn set_write_protected(&mut self, protected: bool) -> Result<()> {
        self.descriptor.write_protect = protected;
        let file = self.file.as_mut().ok_or(DiskError::NoMedia)?;
        file.seek(SeekFrom::Start(WRITE_PROTECT_OFFSET))?;
        file.write_all(&[protected as u8])?;
        Ok(())
    }

    pub fn is_sector_bad(&self, sector: u16) -> bool {
        let idx = sector as usize;
        match self.bad_sectors.get(idx / 8) {
            Some(byte) => byte & (1 << (idx % 8)) != 0,
            None => false,
        }
    }

    /// Marks or clears a sector in the bad-sector bitmap and persists the
    /// bitmap.
    pub fn set_sector_bad(&mut self, sector: u16, bad: bool) -> Result<()> {
        self.check_sector(sector)?;
        let idx = sector as usize;
        if bad {
            self.bad_sectors[idx / 8] |= 1 << (idx % 8);
        } else {
            self.bad_sectors[idx / 8] &= !(1 << (idx % 8));
        }
        let file = self.file.as_mut().ok_or(DiskError::NoMedia)?;
        file.seek(SeekFrom::Start(HEADER_SIZE))?;
        file.write_all(&self.bad_sectors)?;
        Ok(())
    }

    fn check_sector(&self, sector: u16) -> Result<()> {
        let total = self.descriptor.total_sectors();
        if (sector as u32) < total {
            Ok(())
        } else {
            Err(DiskError::SectorOutOfRange { sector, total })
        }
    }

    fn sector_offset(&self, sector: u16) -> u64 {
        HEADER_SIZE
            + self.bad_sectors.len() as u64
            + sector as u64 * self.descriptor.bytes_per_sector as u64
    }

    /// Reads one sector into `buf`, resizing it to the sector size.
    pub fn read_sector(&mut self, sector: u16, buf: &mut Vec<u8>) -> Result<()> {
        self.check_sector(sector)?;
        if self.is_sector_bad(sector) {
            return Err(DiskError::BadSector(sector));
        }
        let offset = self.sector_offset(sector);
        let len = self.descriptor.bytes_per_sector as usize;
        let file = self.file.as_mut().ok_or(DiskError::NoMedia)?;

        buf.clear();
        buf.resize(len, 0);
        file.seek(SeekFrom::Start(offset))?;
        file.read_exact(buf)?;
        Ok(())
    }

    /// Writes at most one sector of `data` at `sector`; shorter buffers
    /// leave the remainder of the sector untouched. With `dry_run` only
    /// the preconditions are checked and the media is untouched.
    pub fn write_sector(&mut self, sector: u16, data: &[u8], dry_run: bool) -> Result<()> {
        self.check_sector(sector)?;
        if self.file.is_none() {
            return Err(DiskError::NoMedia);
        }
        if self.descriptor.write_protect {
            return Err(DiskError::Protected);
        }
        if self.is_sector_bad(sector) {
            return Err(DiskError::BadSector(sector));
        }
        if dry_run {
            return Ok(());
        }

        let offset = self.sector_offset(sector);
        let len = (self.descriptor.bytes_per_sector as usize).min(data.len());
        let file = self.file.as_mut().expect("checked above");
        file.seek(SeekFrom::Start(offset))?;
        file.write_all(&data[..len])?;
        Ok(())
    }
}
