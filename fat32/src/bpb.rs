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

//! The FAT32 BIOS Parameter Block: geometry of a single partition, and the
//! absolute byte offsets derived from it.

use fat32_err::{Error, FsError, Result};
use zerocopy::little_endian::{U16, U32};
use zerocopy::{FromBytes, Immutable, KnownLayout};

#[repr(C, packed)]
#[derive(Debug, Clone, Copy, FromBytes, Immutable, KnownLayout)]
struct RawBpb {
    jmp_boot: [u8; 3],
    oem_name: [u8; 8],
    bytes_per_sector: U16,
    sectors_per_cluster: u8,
    reserved_sector_count: U16,
    num_fats: u8,
    root_entry_count: U16,
    total_sectors_16: U16,
    media: u8,
    fat_size_16: U16,
    sectors_per_track: U16,
    num_heads: U16,
    hidden_sectors: U32,
    total_sectors_32: U32,
    // FAT32 extended BPB
    fat_size_32: U32,
    ext_flags: U16,
    fs_version: U16,
    root_cluster: U32,
    fs_info: U16,
    backup_boot_sector: U16,
    reserved: [u8; 12],
    drive_number: u8,
    reserved1: u8,
    boot_signature: u8,
    volume_id: U32,
    volume_label: [u8; 11],
    fs_type: [u8; 8],
}

/// Size in bytes of a single directory entry, on every FAT variant.
pub const DIR_ENTRY_SIZE: u64 = 32;

/// The decoded BIOS Parameter Block of a FAT32 partition, plus the absolute
/// byte offsets (relative to the start of the device) derived from it.
#[derive(Debug, Clone, Copy)]
pub struct BiosParameterBlock {
    pub bytes_per_sector: u16,
    pub sectors_per_cluster: u8,
    pub reserved_sector_count: u16,
    pub num_fats: u8,
    pub fat_size_32: u32,
    pub root_cluster: u32,
    pub total_sectors: u32,

    /// Absolute byte offset, from the start of the device, of the start of
    /// the partition this BPB was read from.
    partition_offset: u64,
}

impl BiosParameterBlock {
    /// Parses a BPB out of the first sector of a partition.
    pub fn parse(sector: &[u8; 512], partition_offset: u64) -> Result<Self> {
        let raw = RawBpb::ref_from_bytes(&sector[..core::mem::size_of::<RawBpb>()])
            .map_err(|_| Error::Fs(FsError::MalformedOnDisk("boot sector does not fit a BPB")))?;

        let bytes_per_sector = raw.bytes_per_sector.get();
        let sectors_per_cluster = raw.sectors_per_cluster;
        let num_fats = raw.num_fats;
        let fat_size_32 = raw.fat_size_32.get();

        if bytes_per_sector == 0 {
            return Err(Error::Fs(FsError::MalformedOnDisk(
                "bytes_per_sector is zero",
            )));
        }
        if sectors_per_cluster == 0 {
            return Err(Error::Fs(FsError::MalformedOnDisk(
                "sectors_per_cluster is zero",
            )));
        }
        if num_fats == 0 {
            return Err(Error::Fs(FsError::MalformedOnDisk("num_fats is zero")));
        }
        if fat_size_32 == 0 {
            return Err(Error::Fs(FsError::MalformedOnDisk(
                "fat_size_32 is zero; not a FAT32 volume",
            )));
        }

        let total_sectors = if raw.total_sectors_16.get() != 0 {
            raw.total_sectors_16.get() as u32
        } else {
            raw.total_sectors_32.get()
        };

        Ok(Self {
            bytes_per_sector,
            sectors_per_cluster,
            reserved_sector_count: raw.reserved_sector_count.get(),
            num_fats,
            fat_size_32,
            root_cluster: raw.root_cluster.get(),
            total_sectors,
            partition_offset,
        })
    }

    /// Byte offset, from the start of the device, of the first FAT.
    pub fn fat_byte_offset(&self) -> u64 {
        self.partition_offset + self.reserved_sector_count as u64 * self.bytes_per_sector as u64
    }

    /// Byte size of a single FAT.
    pub fn fat_size_bytes(&self) -> u64 {
        self.fat_size_32 as u64 * self.bytes_per_sector as u64
    }

    /// Byte offset, from the start of the device, of the first data sector
    /// (the sector holding cluster 2).
    pub fn data_byte_offset(&self) -> u64 {
        self.fat_byte_offset() + self.num_fats as u64 * self.fat_size_bytes()
    }

    /// Byte size of a single cluster.
    pub fn bytes_per_cluster(&self) -> u64 {
        self.sectors_per_cluster as u64 * self.bytes_per_sector as u64
    }

    /// Byte offset, from the start of the device, of the given cluster's
    /// first byte. Cluster numbering starts at 2.
    pub fn cluster_byte_offset(&self, cluster: u32) -> u64 {
        self.data_byte_offset() + (cluster as u64 - 2) * self.bytes_per_cluster()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_sector() -> [u8; 512] {
        let mut sector = [0u8; 512];
        sector[11..13].copy_from_slice(&512u16.to_le_bytes()); // bytes_per_sector
        sector[13] = 1; // sectors_per_cluster
        sector[14..16].copy_from_slice(&32u16.to_le_bytes()); // reserved_sector_count
        sector[16] = 2; // num_fats
        sector[36..40].copy_from_slice(&1008u32.to_le_bytes()); // fat_size_32
        sector[44..48].copy_from_slice(&2u32.to_le_bytes()); // root_cluster
        sector[32..36].copy_from_slice(&131071u32.to_le_bytes()); // total_sectors_32
        sector
    }

    #[test]
    fn derives_absolute_offsets_from_spec_geometry() {
        let partition_offset = 512; // LBA 1
        let bpb = BiosParameterBlock::parse(&sample_sector(), partition_offset).unwrap();
        assert_eq!(bpb.fat_byte_offset(), partition_offset + 32 * 512);
        assert_eq!(bpb.fat_size_bytes(), 1008 * 512);
        assert_eq!(
            bpb.data_byte_offset(),
            partition_offset + 32 * 512 + 2 * 1008 * 512
        );
        assert_eq!(bpb.bytes_per_cluster(), 512);
        assert_eq!(bpb.cluster_byte_offset(2), bpb.data_byte_offset());
        assert_eq!(
            bpb.cluster_byte_offset(3),
            bpb.data_byte_offset() + 512
        );
    }

    #[test]
    fn rejects_zero_fat_size_as_not_fat32() {
        let mut sector = sample_sector();
        sector[36..40].copy_from_slice(&0u32.to_le_bytes());
        let err = BiosParameterBlock::parse(&sector, 512).unwrap_err();
        assert!(matches!(err, Error::Fs(FsError::MalformedOnDisk(_))));
    }

    #[test]
    fn rejects_zero_bytes_per_sector() {
        let mut sector = sample_sector();
        sector[11..13].copy_from_slice(&0u16.to_le_bytes());
        let err = BiosParameterBlock::parse(&sector, 512).unwrap_err();
        assert!(matches!(err, Error::Fs(FsError::MalformedOnDisk(_))));
    }
}
