// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! [`Flash`] over the vendor ROM's SPI routines.
//!
//! The mask ROM exposes three routines for the serial flash; they are the
//! only way to program it without re-implementing the SPI controller
//! dance. All three demand word-aligned buffers and lengths, which is why
//! the [`Flash`] trait carries the same contract.
//!
//! Only compiled for the real target; hosts test against a RAM model.

use crate::Flash;

extern "C" {
    fn SPIRead(addr: u32, dst: *mut u8, len: u32) -> i32;
    fn SPIWrite(addr: u32, src: *const u8, len: u32) -> i32;
    fn SPIEraseSector(sector: u32) -> i32;
}

/// The one SPI flash behind the ROM routines. Zero-sized; the flash is a
/// hardware singleton and exclusivity comes from whoever owns the
/// [`crate::FlatFs`] wrapping this.
pub struct RomFlash;

impl Flash for RomFlash {
    fn read(&mut self, addr: u32, dst: &mut [u8]) {
        // Safety: the trait contract guarantees alignment, and dst is a
        // live exclusive buffer of the given length. The ROM returns a
        // status we have no way to act on; a failed read leaves garbage,
        // same as on the C side.
        unsafe {
            SPIRead(addr, dst.as_mut_ptr(), dst.len() as u32);
        }
    }

    fn write(&mut self, addr: u32, src: &[u8]) {
        // Safety: as in read.
        unsafe {
            SPIWrite(addr, src.as_ptr(), src.len() as u32);
        }
    }

    fn erase_sector(&mut self, index: u32) {
        // Safety: erasing a sector has no memory-safety implications on
        // this side of the bus.
        unsafe {
            SPIEraseSector(index);
        }
    }
}
