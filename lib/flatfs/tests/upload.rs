// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The upload wire protocol, end to end against the scripted port.

mod common;

use common::{crc16_ccitt, RamFlash, ScriptedPort};
use flatfs::layout::{SectorBuf, DATA_ADDR, SECTOR_SIZE};
use flatfs::{FlatFs, FsError};

const TIMEOUT_TICKS: u32 = 10 * 100; // ten seconds at 100 Hz

fn format<'a>(
    ram: &'a mut RamFlash,
    staging: &'a mut SectorBuf,
) -> FlatFs<'a, &'a mut RamFlash> {
    let mut fs = FlatFs::new(ram, staging);
    fs.format().unwrap();
    fs
}

#[test]
fn known_vector_crc_on_the_ok_line() {
    // CRC-16/CCITT of "123456789" is the catalog check value 0x29b1.
    let mut ram = RamFlash::new();
    let mut staging = SectorBuf::new();
    let mut fs = format(&mut ram, &mut staging);
    let mut port = ScriptedPort::new(b"123456789");

    let crc = fs
        .upload(&mut port, "digits.txt", 9, TIMEOUT_TICKS)
        .unwrap();
    assert_eq!(crc, 0x29B1);
    assert_eq!(port.output_str(), "READY\n#\nOK 0x29b1\n");
}

#[test]
fn three_sector_upload_acks_each_sector() {
    let mut ram = RamFlash::new();
    let mut staging = SectorBuf::new();
    let mut fs = format(&mut ram, &mut staging);

    let payload: Vec<u8> =
        (0..3 * SECTOR_SIZE).map(|i| (i % 253) as u8).collect();
    let mut port = ScriptedPort::new(&payload);

    let crc = fs
        .upload(&mut port, "game.bin", payload.len() as u32, TIMEOUT_TICKS)
        .unwrap();

    let expected = format!("READY\n###\nOK {:#06x}\n", crc16_ccitt(&payload));
    assert_eq!(port.output_str(), expected);
    assert_eq!(crc, crc16_ccitt(&payload));

    assert_eq!(fs.stat("game.bin"), Ok(payload.len() as u32));
    let mut back = vec![0u8; payload.len()];
    fs.read("game.bin", &mut back).unwrap();
    assert_eq!(back, payload);
}

#[test]
fn partial_final_sector_is_ff_padded() {
    let mut ram = RamFlash::new();
    let mut staging = SectorBuf::new();
    {
        let mut fs = format(&mut ram, &mut staging);
        let mut port = ScriptedPort::new(&[0x11u8; 100]);
        fs.upload(&mut port, "stub", 100, TIMEOUT_TICKS).unwrap();
        assert_eq!(fs.stat("stub"), Ok(100));
    }
    // Padding (not part of the file) programs as 0xFF, i.e. stays erased.
    let sector = ram.sector(DATA_ADDR / SECTOR_SIZE as u32);
    assert!(sector[..100].iter().all(|&b| b == 0x11));
    assert!(sector[100..].iter().all(|&b| b == 0xFF));
}

#[test]
fn upload_replaces_existing_file() {
    let mut ram = RamFlash::new();
    let mut staging = SectorBuf::new();
    let mut fs = format(&mut ram, &mut staging);

    fs.create("fw", &[1u8; 50]).unwrap();
    let mut port = ScriptedPort::new(&[2u8; 80]);
    fs.upload(&mut port, "fw", 80, TIMEOUT_TICKS).unwrap();

    assert_eq!(fs.stat("fw"), Ok(80));
    assert_eq!(fs.file_count(), Ok(1));
    let mut back = [0u8; 80];
    fs.read("fw", &mut back).unwrap();
    assert_eq!(back, [2u8; 80]);
}

#[test]
fn silence_times_out_and_reclaims_the_entry() {
    let mut ram = RamFlash::new();
    let mut staging = SectorBuf::new();
    let mut fs = format(&mut ram, &mut staging);

    // Ten bytes arrive, then the host goes away.
    let mut port = ScriptedPort::new(&[9u8; 10]);
    let err = fs.upload(&mut port, "half", 4096, TIMEOUT_TICKS);
    assert_eq!(err, Err(FsError::Timeout));

    // The reservation is gone and the error line was emitted.
    assert_eq!(fs.stat("half"), Err(FsError::NotFound));
    assert_eq!(fs.file_count(), Ok(0));
    assert!(port.output_str().ends_with("ERR timeout\n"));
    assert!(port.output_str().starts_with("READY\n"));
    // No sector was ever acknowledged.
    assert!(!port.output_str().contains('#'));
    // And the wait really did span the timeout, one yield per idle poll.
    assert!(port.yields > TIMEOUT_TICKS);
}

#[test]
fn upload_validates_arguments() {
    let mut ram = RamFlash::new();
    let mut staging = SectorBuf::new();
    let mut fs = format(&mut ram, &mut staging);
    let mut port = ScriptedPort::new(b"");

    assert_eq!(
        fs.upload(&mut port, "", 10, TIMEOUT_TICKS),
        Err(FsError::BadName)
    );
    assert_eq!(
        fs.upload(&mut port, "zero", 0, TIMEOUT_TICKS),
        Err(FsError::ZeroSize)
    );
    // Nothing was emitted for rejected uploads.
    assert!(port.output.is_empty());
}

#[test]
fn unmounted_upload_fails() {
    let mut ram = RamFlash::new();
    let mut staging = SectorBuf::new();
    let mut fs = FlatFs::new(&mut ram, &mut staging);
    let mut port = ScriptedPort::new(b"abc");
    assert_eq!(
        fs.upload(&mut port, "x", 3, TIMEOUT_TICKS),
        Err(FsError::NotMounted)
    );
}
