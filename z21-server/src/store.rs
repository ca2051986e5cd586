//! Byte-addressable persistent configuration.
//!
//! Layout:
//! ```text
//! 0x000  serial number MSB
//! 0x001  serial number LSB
//! 0x032  station record (10 bytes)
//! 0x03C  track record (16 bytes)
//! 0x200  client subscriptions, one local byte per client hash
//! ```
//!
//! Erased cells read `0xFF`.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use log::{debug, info};
use thiserror::Error;

pub const SERIAL_MSB: u16 = 0x000;
pub const SERIAL_LSB: u16 = 0x001;

/// Station settings (RailCom, power button, programming read mode).
pub const STATION_RECORD: u16 = 50;
pub const STATION_RECORD_LEN: usize = 10;

/// Track settings (reset/program packet counts, track voltages).
pub const TRACK_RECORD: u16 = 60;
pub const TRACK_RECORD_LEN: usize = 16;

/// Base of the per-client subscription bytes.
pub const CLIENT_FLAGS: u16 = 0x200;

/// Value of an erased cell.
pub const ERASED: u8 = 0xFF;

/// Size of a full store image.
pub const STORE_SIZE: usize = 0x300;

/// Accepted track voltage range in mV; anything else reads as the default.
pub const TRACK_VOLTAGE_MIN: u16 = 11_000;
pub const TRACK_VOLTAGE_MAX: u16 = 23_000;
pub const TRACK_VOLTAGE_DEFAULT: u16 = 20_000;

/// Offsets of the main and programming track voltages inside the track record.
const MAIN_VOLTAGE: usize = 12;
const PROG_VOLTAGE: usize = 14;

/// Store-related errors.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Offset lies outside the store.
    #[error("Store offset out of range: {0:#06x}")]
    OutOfRange(u16),

    /// Backing file could not be read or written.
    #[error("Store I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Persistent byte store.
pub trait ConfigStore {
    /// Read one byte. Out-of-range reads return [`ERASED`].
    fn read(&self, offset: u16) -> u8;

    fn write(&mut self, offset: u16, value: u8) -> Result<(), StoreError>;

    /// Fill `buf` from consecutive offsets.
    fn read_into(&self, offset: u16, buf: &mut [u8]) {
        for (i, byte) in buf.iter_mut().enumerate() {
            *byte = self.read(offset.wrapping_add(i as u16));
        }
    }

    /// Write `data` to consecutive offsets, stopping at the first error.
    fn write_all(&mut self, offset: u16, data: &[u8]) -> Result<(), StoreError> {
        for (i, byte) in data.iter().enumerate() {
            self.write(offset.wrapping_add(i as u16), *byte)?;
        }
        Ok(())
    }
}

/// Clamp a track voltage to the accepted range.
pub fn clamp_track_voltage(millivolts: u16) -> u16 {
    if (TRACK_VOLTAGE_MIN..=TRACK_VOLTAGE_MAX).contains(&millivolts) {
        millivolts
    } else {
        TRACK_VOLTAGE_DEFAULT
    }
}

/// Apply [`clamp_track_voltage`] to both voltages of a track record.
pub fn clamp_track_record(record: &mut [u8; TRACK_RECORD_LEN]) {
    for at in [MAIN_VOLTAGE, PROG_VOLTAGE] {
        let value = u16::from_le_bytes([record[at], record[at + 1]]);
        record[at..at + 2].copy_from_slice(&clamp_track_voltage(value).to_le_bytes());
    }
}

/// In-memory store, erased at construction.
#[derive(Debug, Clone)]
pub struct MemoryConfigStore {
    bytes: Vec<u8>,
}

impl Default for MemoryConfigStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryConfigStore {
    pub fn new() -> Self {
        Self {
            bytes: vec![ERASED; STORE_SIZE],
        }
    }
}

impl ConfigStore for MemoryConfigStore {
    fn read(&self, offset: u16) -> u8 {
        self.bytes.get(offset as usize).copied().unwrap_or(ERASED)
    }

    fn write(&mut self, offset: u16, value: u8) -> Result<(), StoreError> {
        let cell = self
            .bytes
            .get_mut(offset as usize)
            .ok_or(StoreError::OutOfRange(offset))?;
        *cell = value;
        Ok(())
    }
}

/// Store backed by an image file, written through on every write.
#[derive(Debug)]
pub struct FileConfigStore {
    path: PathBuf,
    file: File,
    bytes: Vec<u8>,
}

impl FileConfigStore {
    /// Open the image at `path`, creating an erased one if it does not exist.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();

        let mut bytes = if path.exists() {
            let bytes = fs::read(&path)?;
            info!("Loaded config store from {:?} ({} bytes)", path, bytes.len());
            bytes
        } else {
            info!("Creating config store at {:?}", path);
            Vec::new()
        };
        bytes.resize(STORE_SIZE, ERASED);

        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)?;
        file.write_all(&bytes)?;
        file.flush()?;

        Ok(Self { path, file, bytes })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ConfigStore for FileConfigStore {
    fn read(&self, offset: u16) -> u8 {
        self.bytes.get(offset as usize).copied().unwrap_or(ERASED)
    }

    fn write(&mut self, offset: u16, value: u8) -> Result<(), StoreError> {
        let cell = self
            .bytes
            .get_mut(offset as usize)
            .ok_or(StoreError::OutOfRange(offset))?;
        if *cell == value {
            return Ok(());
        }
        *cell = value;

        self.file.seek(SeekFrom::Start(u64::from(offset)))?;
        self.file.write_all(&[value])?;
        self.file.flush()?;
        debug!("Store write {:#06x} = {:#04x}", offset, value);
        Ok(())
    }
}
