// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! On-flash layout: geometry constants and the two wire structures.
//!
//! The filesystem occupies a fixed extent of the memory-mapped SPI flash:
//!
//! ```text
//! sector 0   superblock (magic, version, stats; rest erased 0xFF)
//! sector 1   file table (128 entries x 32 bytes = one full sector)
//! sector 2+  data area, 958 sectors of 4 KiB
//! ```
//!
//! Both structures are bit-exact: tooling on the host side parses them, so
//! field order, widths, and endianness (little, the device's native) are
//! frozen.

use zerocopy::{FromBytes, FromZeros, Immutable, IntoBytes, KnownLayout};

/// Flash erase-sector size.
pub const SECTOR_SIZE: usize = 4096;

/// First byte of the filesystem region in flash.
pub const FLASH_BASE: u32 = 0x0004_0000;
/// One past the last byte of the region (4 MiB part).
pub const FLASH_END: u32 = 0x0040_0000;

pub const SUPER_ADDR: u32 = FLASH_BASE;
pub const TABLE_ADDR: u32 = FLASH_BASE + SECTOR_SIZE as u32;
pub const DATA_ADDR: u32 = FLASH_BASE + 2 * SECTOR_SIZE as u32;

/// Number of data sectors (958 on the 4 MiB part).
pub const DATA_SECTORS: u32 = (FLASH_END - DATA_ADDR) / SECTOR_SIZE as u32;

/// Maximum number of files; the table fills exactly one sector.
pub const MAX_FILES: usize = 128;

/// File name field width, including the terminating NUL.
pub const NAME_LEN: usize = 24;

/// The bytes 'O','S','F','T' at the start of the superblock.
pub const MAGIC: u32 = u32::from_le_bytes(*b"OSFT");
pub const VERSION: u32 = 1;

/// The superblock, at offset 0 of the region. Only these four words are
/// meaningful; the rest of its sector stays erased (0xFF).
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout)]
#[repr(C)]
pub struct Superblock {
    pub magic: u32,
    pub version: u32,
    /// Data-sector count the filesystem was formatted with.
    pub total_sectors: u32,
    /// Number of live file-table entries.
    pub file_count: u32,
}

impl Superblock {
    pub fn is_valid(&self) -> bool {
        self.magic == MAGIC && self.version == VERSION
    }
}

/// One file-table entry: exactly 32 bytes, packed without padding.
///
/// An entry is free iff its first name byte is 0x00 (cleared) or 0xFF
/// (erased flash). Every file occupies the single contiguous sector run
/// `start_sector .. start_sector + sector_count` in the data area.
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout)]
#[repr(C)]
pub struct FileEntry {
    /// NUL-terminated name; 23 usable bytes.
    pub name: [u8; NAME_LEN],
    /// File size in bytes.
    pub size: u32,
    /// First data sector (index into the data area, not the flash).
    pub start_sector: u16,
    /// Sectors reserved; always `ceil(size / SECTOR_SIZE)` or more.
    pub sector_count: u16,
}

// The table is parsed in place by host tooling; the size is load-bearing.
const _: () = assert!(core::mem::size_of::<FileEntry>() == 32);
const _: () = assert!(MAX_FILES * 32 == SECTOR_SIZE);

impl FileEntry {
    pub fn is_free(&self) -> bool {
        self.name[0] == 0x00 || self.name[0] == 0xFF
    }

    /// The stored name, up to the first NUL. Free entries return "".
    pub fn name_bytes(&self) -> &[u8] {
        if self.is_free() {
            return &[];
        }
        let end = self
            .name
            .iter()
            .position(|&b| b == 0)
            .unwrap_or(NAME_LEN);
        &self.name[..end]
    }

    pub fn matches(&self, name: &str) -> bool {
        !self.is_free() && self.name_bytes() == name.as_bytes()
    }

    /// Stamps `name`, NUL-filling the remainder of the field. The caller
    /// has already validated the length.
    pub fn set_name(&mut self, name: &str) {
        self.name = [0; NAME_LEN];
        self.name[..name.len()].copy_from_slice(name.as_bytes());
    }

    pub fn clear(&mut self) {
        *self = FileEntry::new_zeroed();
    }
}

/// A word-aligned sector-sized buffer, suitable for the staging buffer and
/// for direct flash transfers.
#[repr(C, align(4))]
pub struct SectorBuf {
    pub bytes: [u8; SECTOR_SIZE],
}

impl SectorBuf {
    pub const fn new() -> Self {
        Self {
            bytes: [0; SECTOR_SIZE],
        }
    }
}

impl Default for SectorBuf {
    fn default() -> Self {
        Self::new()
    }
}
