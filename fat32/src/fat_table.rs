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

//! The file allocation table: cluster chain lookups and free-cluster
//! allocation.
//!
//! [`FatTable`] holds only byte offsets derived from the BPB, not a borrow of
//! the block device, so it stays `Copy` and callers pass `&mut BlockIo`
//! explicitly to each method. That keeps a [`FatTable`] and a borrowed
//! `BlockIo` free of each other, which matters once both are held alongside
//! a cluster data stream over the same device.

use fat32_err::{Error, FsError, Result};
use fat32_ds::BlockIo;

use crate::bpb::BiosParameterBlock;

/// Entries at or above this value mark the end of a cluster chain. FAT32
/// implementations write `0x0FFFFFFF` but only check the low 28 bits.
pub const EOC_MARKER: u32 = 0x0fff_fff8;
/// The high 4 bits of a FAT32 entry are reserved and must be preserved
/// across writes.
const FAT_ENTRY_MASK: u32 = 0x0fff_ffff;
const FAT_ENTRY_SIZE: u64 = 4;

/// Geometry of the file allocation table, derived once from the BPB.
#[derive(Debug, Clone, Copy)]
pub struct FatTable {
    fat_byte_offset: u64,
    fat_size_bytes: u64,
}

impl FatTable {
    pub fn new(bpb: &BiosParameterBlock) -> Self {
        Self {
            fat_byte_offset: bpb.fat_byte_offset(),
            fat_size_bytes: bpb.fat_size_bytes(),
        }
    }

    fn entry_byte_offset(&self, cluster: u32) -> u64 {
        self.fat_byte_offset + cluster as u64 * FAT_ENTRY_SIZE
    }

    /// Reads the raw 32-bit FAT entry for `cluster`, including its reserved
    /// high nibble.
    fn read_raw_entry(&self, io: &mut BlockIo, cluster: u32) -> Result<u32> {
        let offset = self.entry_byte_offset(cluster);
        let block = io.read_bytes(offset)?;
        let within_block = (offset % fat32_ds::BLOCK_SIZE as u64) as usize;
        let bytes: [u8; 4] = block[within_block..within_block + 4]
            .try_into()
            .expect("4-byte FAT entry always fits within one block");
        Ok(u32::from_le_bytes(bytes))
    }

    fn write_raw_entry(&self, io: &mut BlockIo, cluster: u32, raw: u32) -> Result<()> {
        let offset = self.entry_byte_offset(cluster);
        let mut block = io.read_bytes(offset)?;
        let within_block = (offset % fat32_ds::BLOCK_SIZE as u64) as usize;
        block[within_block..within_block + 4].copy_from_slice(&raw.to_le_bytes());
        io.write_bytes(offset, &block)
    }

    /// Follows the chain one link: the cluster `cluster` points to, or
    /// `None` if `cluster` is the last cluster of its chain.
    pub fn next_cluster(&self, io: &mut BlockIo, cluster: u32) -> Result<Option<u32>> {
        let raw = self.read_raw_entry(io, cluster)? & FAT_ENTRY_MASK;
        if raw >= EOC_MARKER || raw == 0 {
            Ok(None)
        } else {
            Ok(Some(raw))
        }
    }

    /// Walks the chain starting at `cluster` to its last link.
    pub fn last_cluster_of(&self, io: &mut BlockIo, cluster: u32) -> Result<u32> {
        let mut current = cluster;
        while let Some(next) = self.next_cluster(io, current)? {
            current = next;
        }
        Ok(current)
    }

    /// Scans the table for the first entry marked free (value `0`).
    pub fn find_free_cluster(&self, io: &mut BlockIo) -> Result<u32> {
        let entry_count = self.fat_size_bytes / FAT_ENTRY_SIZE;
        for cluster in 2..entry_count as u32 {
            let raw = self.read_raw_entry(io, cluster)? & FAT_ENTRY_MASK;
            if raw == 0 {
                return Ok(cluster);
            }
        }
        Err(Error::Fs(FsError::DiskFull))
    }

    /// Marks `cluster` as the end of its chain, preserving its reserved high
    /// nibble.
    fn mark_end_of_chain(&self, io: &mut BlockIo, cluster: u32) -> Result<()> {
        let raw = self.read_raw_entry(io, cluster)?;
        let reserved = raw & !FAT_ENTRY_MASK;
        self.write_raw_entry(io, cluster, reserved | EOC_MARKER)
    }

    /// Allocates a free cluster and links it after `tail`, the current last
    /// cluster of a chain. Returns the newly allocated cluster number.
    pub fn allocate_after(&self, io: &mut BlockIo, tail: u32) -> Result<u32> {
        let free = self.find_free_cluster(io)?;
        self.mark_end_of_chain(io, free)?;
        let raw = self.read_raw_entry(io, tail)?;
        let reserved = raw & !FAT_ENTRY_MASK;
        self.write_raw_entry(io, tail, reserved | (free & FAT_ENTRY_MASK))?;
        Ok(free)
    }

    /// Allocates a free cluster as the sole cluster of a brand new chain.
    pub fn allocate_new(&self, io: &mut BlockIo) -> Result<u32> {
        let free = self.find_free_cluster(io)?;
        self.mark_end_of_chain(io, free)?;
        Ok(free)
    }
}
