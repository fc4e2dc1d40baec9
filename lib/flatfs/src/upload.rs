// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The streaming upload protocol.
//!
//! The host side (a small script talking to the shell) sends a file as raw
//! bytes; the device acknowledges each committed sector with one `#` byte
//! so the host never outruns flash programming. The exchange:
//!
//! 1. Device emits `READY\n` once the entry and sectors are reserved.
//! 2. Host streams `min(SECTOR_SIZE, remaining)` payload bytes; device
//!    fills a sector, pads the remainder with 0xFF, erases, programs, and
//!    emits `#`.
//! 3. After the last sector the device emits `\nOK 0x<crc16>\n`, where the
//!    checksum is CRC-16/CCITT (poly 0x1021, init 0xFFFF, no reflection,
//!    no final XOR) over the received payload only -- padding excluded --
//!    as four lowercase hex digits.
//! 4. If the line goes silent for the timeout, the device deletes the
//!    reserved entry and emits `ERR timeout\n`.
//!
//! The entry is stamped *before* the transfer so the reservation survives
//! partial receipt; a crash mid-upload therefore leaves a full-size file
//! whose unwritten tail reads as 0xFF. That is a documented limitation,
//! not a bug to fix here.

use core::fmt::Write as _;

use crc::{Crc, CRC_16_IBM_3740};

use crate::layout::{DATA_ADDR, SECTOR_SIZE};
use crate::{check_name, sectors_for, Flash, FlatFs, FsError};

/// CRC-16/CCITT as the upload tooling computes it. (The IBM 3740 name is
/// the catalog's; parameters are poly 0x1021, init 0xFFFF, no reflection,
/// no final XOR.)
const CRC16: Crc<u16> = Crc::<u16>::new(&CRC_16_IBM_3740);

/// What the upload path needs from the platform: the serial byte channel,
/// plus just enough of the scheduler to wait politely.
///
/// `try_read_byte` must not block; `write_byte` may busy-wait on the
/// transmit FIFO. `now` is the kernel tick counter; `yield_now` gives the
/// CPU away while the line is idle.
pub trait UploadPort {
    fn try_read_byte(&mut self) -> Option<u8>;
    fn write_byte(&mut self, b: u8);
    fn now(&self) -> u32;
    fn yield_now(&mut self);
}

/// `fmt::Write` over an [`UploadPort`], for the protocol's text lines.
struct PortWriter<'a, P: UploadPort>(&'a mut P);

impl<P: UploadPort> core::fmt::Write for PortWriter<'_, P> {
    fn write_str(&mut self, s: &str) -> core::fmt::Result {
        for b in s.bytes() {
            self.0.write_byte(b);
        }
        Ok(())
    }
}

impl<F: Flash> FlatFs<'_, F> {
    /// Receives `total` bytes from `port` into a file named `name`,
    /// sector by sector, per the protocol above. Returns the CRC-16 the
    /// device computed (the same value it printed on the `OK` line).
    ///
    /// An existing file of the same name is replaced. `timeout_ticks` is
    /// the allowed inter-byte gap; the conventional setting is ten
    /// seconds' worth of ticks.
    ///
    /// This is the only filesystem operation that yields: between byte
    /// polls, via `port.yield_now()`. The staging buffer is busy for the
    /// whole call, which is exactly why the filesystem API is `&mut self`.
    pub fn upload<P: UploadPort>(
        &mut self,
        port: &mut P,
        name: &str,
        total: u32,
        timeout_ticks: u32,
    ) -> Result<u16, FsError> {
        self.check_mounted()?;
        check_name(name)?;
        if total == 0 {
            return Err(FsError::ZeroSize);
        }

        // Replace any existing file, then reserve the entry up front so
        // the sectors stay ours across the (long) transfer.
        self.read_table();
        if let Some(slot) = self.find_file(name) {
            self.entry_mut(slot).clear();
            self.write_table();
            self.bump_file_count(-1);
            self.read_table();
        }

        let slot = self.find_free_slot().ok_or(FsError::NoSlot)?;
        let nsec = sectors_for(total);
        let start = self.alloc_run(nsec).ok_or(FsError::NoSpace)?;

        let e = self.entry_mut(slot);
        e.clear();
        e.set_name(name);
        e.size = total;
        e.start_sector = start;
        e.sector_count = nsec;
        self.write_table();
        self.bump_file_count(1);

        // Tell the host to start streaming.
        let mut w = PortWriter(port);
        let _ = w.write_str("READY\n");

        let mut digest = CRC16.digest();
        let mut received = 0u32;

        for sec in 0..u32::from(nsec) {
            let chunk = ((total - received) as usize).min(SECTOR_SIZE);

            // Pull this sector's bytes, yielding while the line is idle.
            let mut got = 0;
            let mut last_byte = port.now();
            while got < chunk {
                match port.try_read_byte() {
                    Some(b) => {
                        self.staging.bytes[got] = b;
                        got += 1;
                        last_byte = port.now();
                    }
                    None => {
                        port.yield_now();
                        if port.now().wrapping_sub(last_byte) > timeout_ticks
                        {
                            // Give the reservation back before reporting.
                            let _ = self.delete(name);
                            let mut w = PortWriter(port);
                            let _ = w.write_str("ERR timeout\n");
                            return Err(FsError::Timeout);
                        }
                    }
                }
            }

            // Checksum covers the payload only, never the padding.
            digest.update(&self.staging.bytes[..got]);
            received += got as u32;

            self.staging.bytes[got..].fill(0xFF);

            let addr = DATA_ADDR + (u32::from(start) + sec) * SECTOR_SIZE as u32;
            self.erase_at(addr);
            self.flash.write(addr, &self.staging.bytes);

            // Sector committed; the host is waiting for this.
            port.write_byte(b'#');
        }

        let crc = digest.finalize();
        let mut w = PortWriter(port);
        let _ = write!(w, "\nOK {:#06x}\n", crc);
        Ok(crc)
    }
}
