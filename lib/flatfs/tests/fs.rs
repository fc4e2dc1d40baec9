// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Filesystem behavior against the RAM flash model.

mod common;

use common::RamFlash;
use flatfs::layout::{
    SectorBuf, DATA_SECTORS, FLASH_BASE, MAX_FILES, SECTOR_SIZE,
};
use flatfs::{FlatFs, FsError};

/// Formats a fresh filesystem over `ram`.
fn format<'a>(
    ram: &'a mut RamFlash,
    staging: &'a mut SectorBuf,
) -> FlatFs<'a, &'a mut RamFlash> {
    let mut fs = FlatFs::new(ram, staging);
    fs.format().unwrap();
    fs
}

#[test]
fn blank_flash_does_not_mount() {
    let mut ram = RamFlash::new();
    let mut staging = SectorBuf::new();
    let mut fs = FlatFs::new(&mut ram, &mut staging);
    assert_eq!(fs.mount(), Err(FsError::NotMounted));
    assert!(!fs.is_mounted());
}

#[test]
fn operations_before_mount_fail() {
    let mut ram = RamFlash::new();
    let mut staging = SectorBuf::new();
    let mut fs = FlatFs::new(&mut ram, &mut staging);
    assert_eq!(fs.create("a", b"x"), Err(FsError::NotMounted));
    assert_eq!(fs.stat("a"), Err(FsError::NotMounted));
    assert_eq!(fs.delete("a"), Err(FsError::NotMounted));
    assert_eq!(fs.free_bytes(), Err(FsError::NotMounted));
}

#[test]
fn format_then_remount() {
    let mut ram = RamFlash::new();
    {
        let mut staging = SectorBuf::new();
        format(&mut ram, &mut staging);
    }
    // A second instance finds the filesystem on "power-up".
    let mut staging = SectorBuf::new();
    let mut fs = FlatFs::new(&mut ram, &mut staging);
    fs.mount().unwrap();
    assert_eq!(fs.file_count(), Ok(0));
    assert_eq!(
        fs.free_bytes(),
        Ok(DATA_SECTORS * SECTOR_SIZE as u32)
    );
}

#[test]
fn superblock_is_bit_exact() {
    let mut ram = RamFlash::new();
    {
        let mut staging = SectorBuf::new();
        format(&mut ram, &mut staging);
    }
    let sb = ram.sector(FLASH_BASE / SECTOR_SIZE as u32);
    assert_eq!(&sb[0..4], b"OSFT");
    assert_eq!(u32::from_le_bytes(sb[4..8].try_into().unwrap()), 1);
    assert_eq!(
        u32::from_le_bytes(sb[8..12].try_into().unwrap()),
        DATA_SECTORS
    );
    assert_eq!(u32::from_le_bytes(sb[12..16].try_into().unwrap()), 0);
    // Everything past the four words stays erased.
    assert!(sb[16..].iter().all(|&b| b == 0xFF));
}

#[test]
fn file_table_entry_is_bit_exact() {
    let mut ram = RamFlash::new();
    {
        let mut staging = SectorBuf::new();
        let mut fs = format(&mut ram, &mut staging);
        fs.create("hello.txt", b"Goodbye!").unwrap();
    }
    let table = ram.sector(FLASH_BASE / SECTOR_SIZE as u32 + 1);
    let e = &table[0..32];
    assert_eq!(&e[0..9], b"hello.txt");
    assert!(e[9..24].iter().all(|&b| b == 0));
    assert_eq!(u32::from_le_bytes(e[24..28].try_into().unwrap()), 8);
    assert_eq!(u16::from_le_bytes(e[28..30].try_into().unwrap()), 0);
    assert_eq!(u16::from_le_bytes(e[30..32].try_into().unwrap()), 1);
}

#[test]
fn create_read_rename_delete_roundtrip() {
    let mut ram = RamFlash::new();
    let mut staging = SectorBuf::new();
    let mut fs = format(&mut ram, &mut staging);

    fs.create("hello.txt", b"Goodbye!").unwrap();
    assert_eq!(fs.stat("hello.txt"), Ok(8));
    assert_eq!(fs.file_count(), Ok(1));

    let mut buf = [0u8; 64];
    let n = fs.read("hello.txt", &mut buf).unwrap();
    assert_eq!(&buf[..n], b"Goodbye!");

    fs.rename("hello.txt", "msg").unwrap();
    assert_eq!(fs.stat("hello.txt"), Err(FsError::NotFound));
    let n = fs.read("msg", &mut buf).unwrap();
    assert_eq!(&buf[..n], b"Goodbye!");

    fs.delete("msg").unwrap();
    assert_eq!(fs.stat("msg"), Err(FsError::NotFound));
    assert_eq!(fs.file_count(), Ok(0));
}

#[test]
fn read_truncates_to_buffer() {
    let mut ram = RamFlash::new();
    let mut staging = SectorBuf::new();
    let mut fs = format(&mut ram, &mut staging);
    fs.create("long", &[7u8; 100]).unwrap();

    let mut small = [0u8; 10];
    assert_eq!(fs.read("long", &mut small), Ok(10));
    assert_eq!(small, [7u8; 10]);
}

#[test]
fn multi_sector_files_round_trip() {
    let mut ram = RamFlash::new();
    let mut staging = SectorBuf::new();
    let mut fs = format(&mut ram, &mut staging);

    // 2.5 sectors of a recognizable pattern.
    let data: Vec<u8> =
        (0..SECTOR_SIZE * 5 / 2).map(|i| (i % 251) as u8).collect();
    fs.create("big", &data).unwrap();
    assert_eq!(fs.stat("big"), Ok(data.len() as u32));

    let mut back = vec![0u8; data.len()];
    assert_eq!(fs.read("big", &mut back), Ok(data.len()));
    assert_eq!(back, data);
}

#[test]
fn name_validation() {
    let mut ram = RamFlash::new();
    let mut staging = SectorBuf::new();
    let mut fs = format(&mut ram, &mut staging);

    assert_eq!(fs.create("", b"x"), Err(FsError::BadName));
    // 23 bytes is the longest storable name; 24 no longer fits the NUL.
    let long = "x".repeat(24);
    assert_eq!(fs.create(&long, b"x"), Err(FsError::BadName));
    let just_fits = "y".repeat(23);
    fs.create(&just_fits, b"x").unwrap();
    assert_eq!(fs.stat(&just_fits), Ok(1));
}

#[test]
fn zero_length_create_is_rejected() {
    let mut ram = RamFlash::new();
    let mut staging = SectorBuf::new();
    let mut fs = format(&mut ram, &mut staging);
    assert_eq!(fs.create("empty", b""), Err(FsError::ZeroSize));
}

#[test]
fn duplicate_create_fails() {
    let mut ram = RamFlash::new();
    let mut staging = SectorBuf::new();
    let mut fs = format(&mut ram, &mut staging);
    fs.create("a", b"one").unwrap();
    assert_eq!(fs.create("a", b"two"), Err(FsError::Exists));
    // The original contents survive the rejected create.
    let mut buf = [0u8; 8];
    let n = fs.read("a", &mut buf).unwrap();
    assert_eq!(&buf[..n], b"one");
}

#[test]
fn table_fills_at_max_files() {
    let mut ram = RamFlash::new();
    let mut staging = SectorBuf::new();
    let mut fs = format(&mut ram, &mut staging);

    for i in 0..MAX_FILES {
        fs.create(&format!("f{i}"), b"x").unwrap();
    }
    // Space remains (958 data sectors, 128 used) but slots do not.
    assert_eq!(fs.create("straw", b"x"), Err(FsError::NoSlot));
    assert_eq!(fs.file_count(), Ok(MAX_FILES as u32));
}

#[test]
fn allocation_is_contiguous_first_fit() {
    let mut ram = RamFlash::new();
    let mut staging = SectorBuf::new();
    let mut fs = format(&mut ram, &mut staging);

    fs.create("a", &[1u8; 100]).unwrap(); // sector 0
    fs.create("b", &[2u8; 100]).unwrap(); // sector 1
    fs.delete("a").unwrap();

    // Two sectors don't fit in the single-sector hole; first fit lands
    // past b.
    let two = vec![3u8; SECTOR_SIZE + 1];
    fs.create("c", &two).unwrap();
    // A one-sector file reuses the hole.
    fs.create("d", &[4u8; 10]).unwrap();

    let mut placements = Vec::new();
    fs.for_each_file(|e| {
        placements
            .push((e.name_bytes().to_vec(), e.start_sector, e.sector_count));
    })
    .unwrap();
    placements.sort();
    assert_eq!(
        placements,
        vec![
            (b"b".to_vec(), 1, 1),
            (b"c".to_vec(), 2, 2),
            (b"d".to_vec(), 0, 1),
        ]
    );
}

#[test]
fn no_space_when_no_contiguous_run() {
    let mut ram = RamFlash::new();
    let mut staging = SectorBuf::new();
    let mut fs = format(&mut ram, &mut staging);

    // One file owns all but the last data sector.
    let huge = vec![0xABu8; (DATA_SECTORS as usize - 1) * SECTOR_SIZE];
    fs.create("huge", &huge).unwrap();
    assert_eq!(fs.free_bytes(), Ok(SECTOR_SIZE as u32));

    let two = vec![1u8; SECTOR_SIZE + 1];
    assert_eq!(fs.create("two", &two), Err(FsError::NoSpace));
    // A single sector still fits.
    fs.create("one", b"fits").unwrap();
}

#[test]
fn overwrite_in_place_keeps_start_sector() {
    let mut ram = RamFlash::new();
    let mut staging = SectorBuf::new();
    let mut fs = format(&mut ram, &mut staging);

    let big = vec![5u8; SECTOR_SIZE + 10]; // 2 sectors
    fs.create("cfg", &big).unwrap();
    fs.create("pin", b"pin").unwrap(); // sector 2

    fs.overwrite("cfg", b"tiny now").unwrap();
    assert_eq!(fs.stat("cfg"), Ok(8));

    let mut start = None;
    let mut count = None;
    fs.for_each_file(|e| {
        if e.name_bytes() == b"cfg" {
            start = Some(e.start_sector);
            count = Some(e.sector_count);
        }
    })
    .unwrap();
    // Same place, smaller reservation.
    assert_eq!(start, Some(0));
    assert_eq!(count, Some(1));
    assert_eq!(fs.file_count(), Ok(2));

    let mut buf = [0u8; 16];
    let n = fs.read("cfg", &mut buf).unwrap();
    assert_eq!(&buf[..n], b"tiny now");
}

#[test]
fn overwrite_relocates_when_grown() {
    let mut ram = RamFlash::new();
    let mut staging = SectorBuf::new();
    let mut fs = format(&mut ram, &mut staging);

    fs.create("a", b"small").unwrap(); // sector 0
    fs.create("wall", b"w").unwrap(); // sector 1

    let grown = vec![9u8; SECTOR_SIZE * 2];
    fs.overwrite("a", &grown).unwrap();
    assert_eq!(fs.stat("a"), Ok(grown.len() as u32));

    let mut back = vec![0u8; grown.len()];
    fs.read("a", &mut back).unwrap();
    assert_eq!(back, grown);
    assert_eq!(fs.file_count(), Ok(2));
}

#[test]
fn overwrite_creates_missing_file() {
    let mut ram = RamFlash::new();
    let mut staging = SectorBuf::new();
    let mut fs = format(&mut ram, &mut staging);
    fs.overwrite("fresh", b"data").unwrap();
    assert_eq!(fs.stat("fresh"), Ok(4));
}

#[test]
fn append_within_reservation() {
    let mut ram = RamFlash::new();
    let mut staging = SectorBuf::new();
    let mut fs = format(&mut ram, &mut staging);

    fs.create("log", b"first ").unwrap();
    fs.append("log", b"second").unwrap();
    assert_eq!(fs.stat("log"), Ok(12));

    let mut buf = [0u8; 32];
    let n = fs.read("log", &mut buf).unwrap();
    assert_eq!(&buf[..n], b"first second");
}

#[test]
fn append_crossing_into_reserved_sector() {
    let mut ram = RamFlash::new();
    let mut staging = SectorBuf::new();
    let mut fs = format(&mut ram, &mut staging);

    // Two sectors reserved, the second holding only four bytes so far.
    let data = vec![1u8; SECTOR_SIZE + 4];
    fs.create("spill", &data).unwrap();

    // The append lands entirely in the partially-filled last sector,
    // which must be read back, merged, erased, and rewritten.
    let extra = vec![2u8; 4000];
    fs.append("spill", &extra).unwrap();
    assert_eq!(fs.stat("spill"), Ok((data.len() + extra.len()) as u32));

    let mut back = vec![0u8; data.len() + extra.len()];
    fs.read("spill", &mut back).unwrap();
    assert_eq!(&back[..data.len()], &data[..]);
    assert_eq!(&back[data.len()..], &extra[..]);
}

#[test]
fn append_that_needs_more_sectors_fails() {
    let mut ram = RamFlash::new();
    let mut staging = SectorBuf::new();
    let mut fs = format(&mut ram, &mut staging);

    fs.create("full", &[3u8; 4000]).unwrap(); // 1 sector reserved
    assert_eq!(
        fs.append("full", &[4u8; 200]),
        Err(FsError::WouldNotFit)
    );
    // The failed append changed nothing.
    assert_eq!(fs.stat("full"), Ok(4000));
}

#[test]
fn rename_inverse_is_identity() {
    let mut ram = RamFlash::new();
    let mut staging = SectorBuf::new();
    let mut fs = format(&mut ram, &mut staging);

    fs.create("a", b"payload").unwrap();
    let mut before = Vec::new();
    fs.for_each_file(|e| {
        before.push((e.name_bytes().to_vec(), e.size, e.start_sector));
    })
    .unwrap();

    fs.rename("a", "b").unwrap();
    assert_eq!(fs.rename("b", "a"), Ok(()));

    let mut after = Vec::new();
    fs.for_each_file(|e| {
        after.push((e.name_bytes().to_vec(), e.size, e.start_sector));
    })
    .unwrap();
    assert_eq!(before, after);
}

#[test]
fn rename_onto_existing_name_fails() {
    let mut ram = RamFlash::new();
    let mut staging = SectorBuf::new();
    let mut fs = format(&mut ram, &mut staging);
    fs.create("a", b"1").unwrap();
    fs.create("b", b"2").unwrap();
    assert_eq!(fs.rename("a", "b"), Err(FsError::Exists));
    assert_eq!(fs.rename("ghost", "c"), Err(FsError::NotFound));
}

#[test]
fn free_bytes_tracks_allocation() {
    let mut ram = RamFlash::new();
    let mut staging = SectorBuf::new();
    let mut fs = format(&mut ram, &mut staging);

    let total = DATA_SECTORS * SECTOR_SIZE as u32;
    assert_eq!(fs.free_bytes(), Ok(total));
    fs.create("one", &[0u8; 1]).unwrap();
    assert_eq!(fs.free_bytes(), Ok(total - SECTOR_SIZE as u32));
    let big = vec![0u8; SECTOR_SIZE * 3];
    fs.create("three", &big).unwrap();
    assert_eq!(fs.free_bytes(), Ok(total - 4 * SECTOR_SIZE as u32));
    fs.delete("one").unwrap();
    assert_eq!(fs.free_bytes(), Ok(total - 3 * SECTOR_SIZE as u32));
}

#[test]
fn deleted_sectors_are_erased_on_reuse() {
    let mut ram = RamFlash::new();
    let mut staging = SectorBuf::new();
    let mut fs = format(&mut ram, &mut staging);

    fs.create("old", &[0x55u8; 100]).unwrap();
    fs.delete("old").unwrap();
    // The RAM model ANDs writes, so if create skipped the erase the 0x55
    // residue would corrupt the new contents.
    fs.create("new", &[0xAAu8; 100]).unwrap();
    let mut buf = [0u8; 100];
    fs.read("new", &mut buf).unwrap();
    assert_eq!(buf, [0xAAu8; 100]);
}
