// Copyright 2024 Kevin Ludwig
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! MBR partition table parsing and active-partition selection.

use core::cmp::Reverse;

use fat32_err::{Error, FsError, Result};
use fat32_ds::BLOCK_SIZE;
use zerocopy::little_endian::U32;
use zerocopy::{FromBytes, Immutable, KnownLayout};

/// Byte offset of the first partition entry within the MBR sector.
const PARTITION_TABLE_OFFSET: usize = 446;
/// Size in bytes of a single partition table entry.
const PARTITION_ENTRY_SIZE: usize = 16;
/// Number of primary partition entries in an MBR.
pub const PARTITION_COUNT: usize = 4;

#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, Immutable, KnownLayout)]
struct RawPartitionEntry {
    boot_flag: u8,
    start_chs: [u8; 3],
    partition_type: u8,
    end_chs: [u8; 3],
    start_lba: U32,
    num_sectors: U32,
}

/// A single entry of the MBR partition table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PartitionEntry {
    pub boot_flag: u8,
    pub start_chs: [u8; 3],
    pub partition_type: u8,
    pub end_chs: [u8; 3],
    pub start_lba: u32,
    pub num_sectors: u32,
}

impl PartitionEntry {
    /// Byte offset of the start of this partition, relative to the start of
    /// the device.
    pub fn partition_offset(&self) -> u64 {
        self.start_lba as u64 * BLOCK_SIZE as u64
    }
}

/// Parses the four primary partition entries out of the MBR sector (LBA 0).
pub fn parse_partitions(sector0: &[u8; BLOCK_SIZE]) -> Result<[PartitionEntry; PARTITION_COUNT]> {
    let mut entries = [PartitionEntry::default(); PARTITION_COUNT];
    for (i, entry) in entries.iter_mut().enumerate() {
        let start = PARTITION_TABLE_OFFSET + i * PARTITION_ENTRY_SIZE;
        let raw = RawPartitionEntry::ref_from_bytes(&sector0[start..start + PARTITION_ENTRY_SIZE])
            .map_err(|_| Error::Fs(FsError::MalformedOnDisk("partition entry does not fit")))?;
        *entry = PartitionEntry {
            boot_flag: raw.boot_flag,
            start_chs: raw.start_chs,
            partition_type: raw.partition_type,
            end_chs: raw.end_chs,
            start_lba: raw.start_lba.get(),
            num_sectors: raw.num_sectors.get(),
        };
    }
    Ok(entries)
}

/// Selects the active partition: the largest by sector count, ties broken by
/// the smaller starting LBA. Fails with [`FsError::MalformedOnDisk`] if every
/// entry is empty.
pub fn select_active_partition(
    entries: &[PartitionEntry; PARTITION_COUNT],
) -> Result<PartitionEntry> {
    let mut sorted = *entries;
    sorted.sort_by_key(|p| (Reverse(p.num_sectors), p.start_lba));
    let active = sorted[0];
    if active.num_sectors == 0 {
        return Err(Error::Fs(FsError::MalformedOnDisk(
            "no partition entry has a nonzero sector count",
        )));
    }
    Ok(active)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry_bytes(
        boot_flag: u8,
        partition_type: u8,
        start_lba: u32,
        num_sectors: u32,
    ) -> [u8; 16] {
        let mut buf = [0u8; 16];
        buf[0] = boot_flag;
        buf[4] = partition_type;
        buf[8..12].copy_from_slice(&start_lba.to_le_bytes());
        buf[12..16].copy_from_slice(&num_sectors.to_le_bytes());
        buf
    }

    fn sector_with_entries(entries: [[u8; 16]; 4]) -> [u8; BLOCK_SIZE] {
        let mut sector = [0u8; BLOCK_SIZE];
        for (i, entry) in entries.iter().enumerate() {
            let start = PARTITION_TABLE_OFFSET + i * PARTITION_ENTRY_SIZE;
            sector[start..start + PARTITION_ENTRY_SIZE].copy_from_slice(entry);
        }
        sector
    }

    #[test]
    fn parses_four_entries_at_fixed_offsets() {
        let sector = sector_with_entries([
            entry_bytes(0x00, 0x0b, 1, 131071),
            [0u8; 16],
            [0u8; 16],
            [0u8; 16],
        ]);
        let entries = parse_partitions(&sector).unwrap();
        assert_eq!(entries[0].num_sectors, 131071);
        assert_eq!(entries[0].start_lba, 1);
        assert_eq!(entries[0].partition_type, 0x0b);
        for e in &entries[1..] {
            assert_eq!(e.num_sectors, 0);
        }
    }

    #[test]
    fn picks_largest_partition_tie_broken_by_lba() {
        let sector = sector_with_entries([
            entry_bytes(0x00, 0x0c, 100, 2000),
            entry_bytes(0x00, 0x0b, 1, 131071),
            entry_bytes(0x00, 0x0b, 500, 131071),
            [0u8; 16],
        ]);
        let entries = parse_partitions(&sector).unwrap();
        let active = select_active_partition(&entries).unwrap();
        assert_eq!(active.start_lba, 1);
        assert_eq!(active.num_sectors, 131071);
    }

    #[test]
    fn all_empty_partitions_is_malformed() {
        let sector = sector_with_entries([[0u8; 16]; 4]);
        let entries = parse_partitions(&sector).unwrap();
        let err = select_active_partition(&entries).unwrap_err();
        assert!(matches!(err, Error::Fs(FsError::MalformedOnDisk(_))));
    }
}
