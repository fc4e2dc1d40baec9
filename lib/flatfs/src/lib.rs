// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Flat filesystem on raw SPI flash.
//!
//! Flat namespace, contiguous allocation, no directories -- in the spirit
//! of the old disk filing systems. Up to 128 files on ~3.7 MiB of flash.
//!
//! Layout (see [`layout`]): one superblock sector, one file-table sector,
//! then the data area. Free space is found by building a sector bitmap
//! from the table on the fly and scanning it first-fit for a contiguous
//! run; there is no persistent allocation state beyond the table itself.
//!
//! All flash access goes through the [`Flash`] seam, whose operations
//! mirror the ROM primitives: word-aligned buffers and addresses, erase by
//! sector. A single staging sector buffer, borrowed at construction, is
//! used for every read-modify-write cycle; taking it as `&mut` for the
//! duration of each call is what makes the operations non-reentrant by
//! construction rather than by convention.
//!
//! Nothing here journals. Power loss mid-operation can lose the file being
//! written; it cannot corrupt the sectors of other files, because data is
//! always written before the table points at it. The exception is
//! [`FlatFs::upload`], which reserves its entry up front -- a crash mid
//! upload leaves a full-size file whose unwritten tail reads as 0xFF.

#![cfg_attr(not(test), no_std)]

pub mod layout;
#[cfg(target_arch = "xtensa")]
pub mod rom;
mod upload;

use zerocopy::{FromBytes, FromZeros, IntoBytes};

use layout::{
    FileEntry, SectorBuf, Superblock, DATA_ADDR, DATA_SECTORS, NAME_LEN,
    SECTOR_SIZE, SUPER_ADDR, TABLE_ADDR,
};

pub use upload::UploadPort;

/// Flash access, in the shape of the vendor ROM primitives.
///
/// `read` and `write` require word-aligned addresses, buffer pointers, and
/// lengths; `FlatFs` bounces unaligned transfers internally so only
/// conforming calls reach an implementation. `erase_sector` takes an
/// absolute sector index (address / [`SECTOR_SIZE`]) and leaves the sector
/// all-0xFF. Writes can only clear bits; writing unerased flash is a
/// caller bug that real hardware punishes with garbage.
pub trait Flash {
    fn read(&mut self, addr: u32, dst: &mut [u8]);
    fn write(&mut self, addr: u32, src: &[u8]);
    fn erase_sector(&mut self, index: u32);
}

/// Borrowed flash is flash; lets a caller keep the device around after the
/// filesystem is dropped.
impl<T: Flash + ?Sized> Flash for &mut T {
    fn read(&mut self, addr: u32, dst: &mut [u8]) {
        (**self).read(addr, dst)
    }

    fn write(&mut self, addr: u32, src: &[u8]) {
        (**self).write(addr, src)
    }

    fn erase_sector(&mut self, index: u32) {
        (**self).erase_sector(index)
    }
}

/// Filesystem errors. `NotMounted` is returned by every operation before a
/// successful `mount` or `format`.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum FsError {
    NotMounted,
    /// Name empty, too long (over 23 bytes), or otherwise unusable.
    BadName,
    /// Zero-length payload where one is required.
    ZeroSize,
    /// A file of this name already exists.
    Exists,
    NotFound,
    /// The file table has no free entry.
    NoSlot,
    /// No contiguous run of free sectors is long enough.
    NoSpace,
    /// An append would need more sectors than the file has reserved.
    WouldNotFit,
    /// The upload byte source went silent.
    Timeout,
}

/// The filesystem driver. One instance owns the flash seam and the staging
/// buffer; operations take `&mut self`, so no two can interleave.
pub struct FlatFs<'b, F: Flash> {
    flash: F,
    staging: &'b mut SectorBuf,
    mounted: bool,
}

impl<'b, F: Flash> FlatFs<'b, F> {
    /// Wraps `flash`. The filesystem starts unmounted; call [`mount`] or
    /// [`format`].
    ///
    /// [`mount`]: FlatFs::mount
    /// [`format`]: FlatFs::format
    pub fn new(flash: F, staging: &'b mut SectorBuf) -> Self {
        Self {
            flash,
            staging,
            mounted: false,
        }
    }

    /// Mounts by validating the superblock; fails with `NotMounted` if the
    /// magic or version doesn't match (i.e. the flash holds no filesystem).
    pub fn mount(&mut self) -> Result<(), FsError> {
        let sb = self.read_super();
        if !sb.is_valid() {
            self.mounted = false;
            return Err(FsError::NotMounted);
        }
        self.mounted = true;
        Ok(())
    }

    pub fn is_mounted(&self) -> bool {
        self.mounted
    }

    /// Erases the metadata sectors and writes a fresh, empty filesystem.
    /// Mounts it as a side effect. Data sectors are not touched; they are
    /// erased lazily on allocation.
    pub fn format(&mut self) -> Result<(), FsError> {
        self.erase_at(SUPER_ADDR);
        self.erase_at(TABLE_ADDR);

        // Erased flash reads 0xFF, but a free entry wants a 0x00 name
        // byte; write the table as explicit zeroes.
        self.staging.bytes.fill(0);
        self.flash.write(TABLE_ADDR, &self.staging.bytes);

        self.write_super(Superblock {
            magic: layout::MAGIC,
            version: layout::VERSION,
            total_sectors: DATA_SECTORS,
            file_count: 0,
        });

        self.mounted = true;
        Ok(())
    }

    /// Creates `name` with the given contents. The whole payload is
    /// written before the table entry appears, so a crash mid-create
    /// leaves no file at all.
    pub fn create(&mut self, name: &str, data: &[u8]) -> Result<(), FsError> {
        self.check_mounted()?;
        check_name(name)?;
        if data.is_empty() {
            return Err(FsError::ZeroSize);
        }

        self.read_table();
        if self.find_file(name).is_some() {
            return Err(FsError::Exists);
        }
        let slot = self.find_free_slot().ok_or(FsError::NoSlot)?;

        let nsec = sectors_for(data.len() as u32);
        let start = self.alloc_run(nsec).ok_or(FsError::NoSpace)?;

        // Payload first. The staging buffer still holds the table; data
        // writes go through the bounce path, not through staging.
        self.write_run(start, nsec, data);

        let e = self.entry_mut(slot);
        e.clear();
        e.set_name(name);
        e.size = data.len() as u32;
        e.start_sector = start;
        e.sector_count = nsec;
        self.write_table();

        self.bump_file_count(1);
        Ok(())
    }

    /// Reads up to `out.len()` bytes of `name`, returning how many were
    /// actually read (the minimum of the file size and the buffer).
    pub fn read(&mut self, name: &str, out: &mut [u8]) -> Result<usize, FsError> {
        self.check_mounted()?;
        self.read_table();
        let e = *self.find_entry(name).ok_or(FsError::NotFound)?;

        let to_read = (e.size as usize).min(out.len());
        let addr = DATA_ADDR + u32::from(e.start_sector) * SECTOR_SIZE as u32;
        self.read_any(addr, &mut out[..to_read]);
        Ok(to_read)
    }

    /// File size in bytes.
    pub fn stat(&mut self, name: &str) -> Result<u32, FsError> {
        self.check_mounted()?;
        self.read_table();
        let e = self.find_entry(name).ok_or(FsError::NotFound)?;
        Ok(e.size)
    }

    /// Removes `name` from the table. Its sectors are not erased; the next
    /// allocation that picks them erases first.
    pub fn delete(&mut self, name: &str) -> Result<(), FsError> {
        self.check_mounted()?;
        self.read_table();
        let slot = self.find_file(name).ok_or(FsError::NotFound)?;
        self.entry_mut(slot).clear();
        self.write_table();
        self.bump_file_count(-1);
        Ok(())
    }

    /// Replaces the contents of `name`, creating it if absent. If the new
    /// payload fits the already-reserved sectors the file is rewritten in
    /// place (keeping its start sector); otherwise it is deleted and
    /// re-created wherever space is found.
    pub fn overwrite(&mut self, name: &str, data: &[u8]) -> Result<(), FsError> {
        self.check_mounted()?;
        check_name(name)?;
        if data.is_empty() {
            return Err(FsError::ZeroSize);
        }

        self.read_table();
        let slot = match self.find_file(name) {
            Some(s) => s,
            None => return self.create(name, data),
        };

        let old = *self.entry_mut(slot);
        let new_nsec = sectors_for(data.len() as u32);

        if new_nsec <= old.sector_count {
            self.write_run(old.start_sector, new_nsec, data);
            let e = self.entry_mut(slot);
            e.size = data.len() as u32;
            e.sector_count = new_nsec;
            self.write_table();
            return Ok(());
        }

        // Doesn't fit in place: drop the entry and create afresh.
        self.entry_mut(slot).clear();
        self.write_table();
        self.bump_file_count(-1);
        self.create(name, data)
    }

    /// Appends to `name` inside its existing sector reservation. Fails
    /// with `WouldNotFit` if the grown file would need more sectors;
    /// callers that want relocation should use `overwrite`.
    pub fn append(&mut self, name: &str, data: &[u8]) -> Result<(), FsError> {
        self.check_mounted()?;
        if data.is_empty() {
            return Err(FsError::ZeroSize);
        }

        self.read_table();
        let slot = self.find_file(name).ok_or(FsError::NotFound)?;
        let e = *self.entry_mut(slot);

        let new_total = e.size + data.len() as u32;
        if sectors_for(new_total) > e.sector_count {
            return Err(FsError::WouldNotFit);
        }

        let mut src = data;
        let mut write_pos = e.size;

        // The last sector is partially filled: read-modify-erase-rewrite.
        let offset_in_sec = (write_pos as usize) % SECTOR_SIZE;
        if offset_in_sec != 0 {
            let sec = write_pos / SECTOR_SIZE as u32;
            let addr = DATA_ADDR
                + (u32::from(e.start_sector) + sec) * SECTOR_SIZE as u32;

            self.flash.read(addr, &mut self.staging.bytes);
            let space = SECTOR_SIZE - offset_in_sec;
            let chunk = src.len().min(space);
            self.staging.bytes[offset_in_sec..offset_in_sec + chunk]
                .copy_from_slice(&src[..chunk]);
            self.erase_at(addr);
            self.flash.write(addr, &self.staging.bytes);

            src = &src[chunk..];
            write_pos += chunk as u32;
        }

        // Any remaining data lands on fresh sector boundaries.
        while !src.is_empty() {
            let sec = write_pos / SECTOR_SIZE as u32;
            let addr = DATA_ADDR
                + (u32::from(e.start_sector) + sec) * SECTOR_SIZE as u32;
            let chunk = src.len().min(SECTOR_SIZE);

            self.erase_at(addr);
            self.write_any(addr, &src[..chunk]);

            src = &src[chunk..];
            write_pos += chunk as u32;
        }

        // Only the size field changes; the reservation is untouched.
        self.read_table();
        self.entry_mut(slot).size = new_total;
        self.write_table();
        Ok(())
    }

    /// Renames `old` to `new`. Pure table edit; no data moves.
    pub fn rename(&mut self, old: &str, new: &str) -> Result<(), FsError> {
        self.check_mounted()?;
        check_name(old)?;
        check_name(new)?;

        self.read_table();
        let slot = self.find_file(old).ok_or(FsError::NotFound)?;
        if self.find_file(new).is_some() {
            return Err(FsError::Exists);
        }
        self.entry_mut(slot).set_name(new);
        self.write_table();
        Ok(())
    }

    /// Free space, in bytes: free sectors times the sector size.
    pub fn free_bytes(&mut self) -> Result<u32, FsError> {
        self.check_mounted()?;
        self.read_table();
        let bitmap = self.build_bitmap();
        let free = (0..DATA_SECTORS)
            .filter(|&i| !bitmap_get(&bitmap, i))
            .count() as u32;
        Ok(free * SECTOR_SIZE as u32)
    }

    /// Number of live files, per the superblock.
    pub fn file_count(&mut self) -> Result<u32, FsError> {
        self.check_mounted()?;
        Ok(self.read_super().file_count)
    }

    /// Feeds every live table entry to `f`, for directory listings.
    pub fn for_each_file(
        &mut self,
        mut f: impl FnMut(&FileEntry),
    ) -> Result<(), FsError> {
        self.check_mounted()?;
        self.read_table();
        for e in self.entries() {
            if !e.is_free() {
                f(e);
            }
        }
        Ok(())
    }

    // ---- internals ----

    fn check_mounted(&self) -> Result<(), FsError> {
        if self.mounted {
            Ok(())
        } else {
            Err(FsError::NotMounted)
        }
    }

    /// Loads the file table into the staging buffer.
    fn read_table(&mut self) {
        self.flash.read(TABLE_ADDR, &mut self.staging.bytes);
    }

    /// Writes the staging buffer back as the file table.
    fn write_table(&mut self) {
        self.erase_at(TABLE_ADDR);
        self.flash.write(TABLE_ADDR, &self.staging.bytes);
    }

    fn entries(&self) -> &[FileEntry] {
        // Infallible: the staging buffer is word-aligned and exactly
        // MAX_FILES entries long.
        <[FileEntry]>::ref_from_bytes(&self.staging.bytes).unwrap()
    }

    fn entries_mut(&mut self) -> &mut [FileEntry] {
        <[FileEntry]>::mut_from_bytes(&mut self.staging.bytes).unwrap()
    }

    fn entry_mut(&mut self, slot: usize) -> &mut FileEntry {
        &mut self.entries_mut()[slot]
    }

    /// Finds `name` in the staged table.
    fn find_file(&self, name: &str) -> Option<usize> {
        self.entries().iter().position(|e| e.matches(name))
    }

    fn find_entry(&self, name: &str) -> Option<&FileEntry> {
        self.entries().iter().find(|e| e.matches(name))
    }

    fn find_free_slot(&self) -> Option<usize> {
        self.entries().iter().position(|e| e.is_free())
    }

    /// Builds the occupancy bitmap from the staged table: one bit per data
    /// sector.
    fn build_bitmap(&self) -> [u8; BITMAP_BYTES] {
        let mut bitmap = [0u8; BITMAP_BYTES];
        for e in self.entries() {
            if e.is_free() {
                continue;
            }
            for s in 0..u32::from(e.sector_count) {
                let bit = u32::from(e.start_sector) + s;
                if bit < DATA_SECTORS {
                    bitmap_set(&mut bitmap, bit);
                }
            }
        }
        bitmap
    }

    /// First-fit run finder: the lowest start index with `count`
    /// consecutive free sectors.
    fn alloc_run(&self, count: u16) -> Option<u16> {
        let bitmap = self.build_bitmap();
        let mut run = 0u32;
        let mut start = 0u32;
        for i in 0..DATA_SECTORS {
            if bitmap_get(&bitmap, i) {
                run = 0;
                start = i + 1;
            } else {
                run += 1;
                if run >= u32::from(count) {
                    return Some(start as u16);
                }
            }
        }
        None
    }

    /// Erases `count` sectors from `start` and writes `data` across them,
    /// zero-padding the final word. Does not touch the staging buffer.
    fn write_run(&mut self, start: u16, count: u16, data: &[u8]) {
        let mut remaining = data;
        for s in 0..count {
            let addr = DATA_ADDR
                + (u32::from(start) + u32::from(s)) * SECTOR_SIZE as u32;
            self.erase_at(addr);
            let chunk = remaining.len().min(SECTOR_SIZE);
            self.write_any(addr, &remaining[..chunk]);
            remaining = &remaining[chunk..];
        }
    }

    fn erase_at(&mut self, addr: u32) {
        self.flash.erase_sector(addr / SECTOR_SIZE as u32);
    }

    fn read_super(&mut self) -> Superblock {
        let mut sb = Superblock::new_zeroed();
        self.flash.read(SUPER_ADDR, sb.as_mut_bytes());
        sb
    }

    /// Rewrites the superblock sector: the four words, then 0xFF. Reuses
    /// the staging buffer, so any staged table is gone afterwards.
    fn write_super(&mut self, sb: Superblock) {
        self.staging.bytes.fill(0xFF);
        self.staging.bytes[..core::mem::size_of::<Superblock>()]
            .copy_from_slice(sb.as_bytes());
        self.erase_at(SUPER_ADDR);
        self.flash.write(SUPER_ADDR, &self.staging.bytes);
    }

    fn bump_file_count(&mut self, delta: i32) {
        let mut sb = self.read_super();
        sb.file_count = sb.file_count.saturating_add_signed(delta);
        self.write_super(sb);
    }

    /// Reads into an arbitrarily aligned, arbitrarily sized buffer by
    /// bouncing through a small aligned chunk where necessary.
    fn read_any(&mut self, mut addr: u32, dst: &mut [u8]) {
        if dst.as_ptr() as usize % 4 == 0 && dst.len() % 4 == 0 {
            self.flash.read(addr, dst);
            return;
        }
        let mut bounce = Bounce::new();
        let mut dst = dst;
        while !dst.is_empty() {
            let n = dst.len().min(BOUNCE_LEN);
            let aligned = (n + 3) & !3;
            self.flash.read(addr, &mut bounce.bytes[..aligned]);
            dst[..n].copy_from_slice(&bounce.bytes[..n]);
            addr += n as u32;
            dst = &mut dst[n..];
        }
    }

    /// Writes from an arbitrarily aligned buffer, zero-padding the final
    /// partial word.
    fn write_any(&mut self, mut addr: u32, src: &[u8]) {
        if src.as_ptr() as usize % 4 == 0 && src.len() % 4 == 0 {
            self.flash.write(addr, src);
            return;
        }
        let mut bounce = Bounce::new();
        let mut src = src;
        while !src.is_empty() {
            let n = src.len().min(BOUNCE_LEN);
            let aligned = (n + 3) & !3;
            bounce.bytes[..n].copy_from_slice(&src[..n]);
            bounce.bytes[n..aligned].fill(0);
            self.flash.write(addr, &bounce.bytes[..aligned]);
            addr += n as u32;
            src = &src[n..];
        }
    }
}

const BITMAP_BYTES: usize = (DATA_SECTORS as usize + 7) / 8;

const BOUNCE_LEN: usize = 64;

#[repr(C, align(4))]
struct Bounce {
    bytes: [u8; BOUNCE_LEN],
}

impl Bounce {
    fn new() -> Self {
        Self {
            bytes: [0; BOUNCE_LEN],
        }
    }
}

fn bitmap_get(bitmap: &[u8], bit: u32) -> bool {
    bitmap[(bit / 8) as usize] & (1 << (bit % 8)) != 0
}

fn bitmap_set(bitmap: &mut [u8], bit: u32) {
    bitmap[(bit / 8) as usize] |= 1 << (bit % 8);
}

/// Sectors needed for `len` bytes.
fn sectors_for(len: u32) -> u16 {
    len.div_ceil(SECTOR_SIZE as u32) as u16
}

fn check_name(name: &str) -> Result<(), FsError> {
    if name.is_empty() || name.len() >= NAME_LEN {
        return Err(FsError::BadName);
    }
    Ok(())
}
