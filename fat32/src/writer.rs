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

//! Append and create write paths.
//!
//! These are free functions rather than methods on [`crate::disk::Disk`] so
//! each one's dependencies (the device, the geometry, the directory entry
//! being updated) are explicit parameters instead of fields threaded through
//! `self`.

use fat32_err::{Error, FsError, Result};
use fat32_ds::BlockIo;

use crate::bpb::DIR_ENTRY_SIZE;
use crate::dir_entry::{self, FatDate, FatTime, File, FileAttributes};
use crate::disk::Geometry;

/// Writes `data` into the tail end of `cluster`'s already-occupied bytes.
///
/// `occupied` is how many bytes of the cluster are already used by the
/// file (`file_size % bytes_per_cluster`, or a full cluster if the file
/// size is an exact multiple). Returns however many bytes of `data` fit in
/// the remaining space of the cluster; the caller appends what's left to a
/// newly allocated cluster.
fn write_to_cluster_tail<'a>(
    io: &mut BlockIo,
    geometry: &Geometry,
    cluster: u32,
    occupied: u64,
    data: &'a [u8],
) -> Result<usize> {
    let bytes_per_cluster = geometry.bpb.bytes_per_cluster();
    let offset = geometry.bpb.cluster_byte_offset(cluster);
    let space = (bytes_per_cluster - occupied) as usize;
    let take = data.len().min(space);
    if take == 0 {
        return Ok(0);
    }

    let write_offset = offset + occupied;
    let block_start = write_offset - write_offset % fat32_ds::BLOCK_SIZE as u64;
    let mut cursor = write_offset;
    let mut written = 0usize;
    let mut block = io.read_bytes(block_start)?;
    let mut current_block_start = block_start;

    while written < take {
        if cursor - current_block_start >= fat32_ds::BLOCK_SIZE as u64 {
            io.write_bytes(current_block_start, &block)?;
            current_block_start += fat32_ds::BLOCK_SIZE as u64;
            block = io.read_bytes(current_block_start)?;
        }
        let within_block = (cursor - current_block_start) as usize;
        block[within_block] = data[written];
        cursor += 1;
        written += 1;
    }
    io.write_bytes(current_block_start, &block)?;

    Ok(take)
}

/// Appends `data` to a file whose current last cluster is `last_cluster`
/// and whose current size is `size`, allocating new clusters as needed.
/// Returns the new total size.
pub fn append_to_file(
    io: &mut BlockIo,
    geometry: &Geometry,
    mut last_cluster: u32,
    size: u64,
    data: &[u8],
) -> Result<u64> {
    io.require_writable()?;

    let bytes_per_cluster = geometry.bpb.bytes_per_cluster();
    let mut occupied = if size == 0 {
        0
    } else {
        match size % bytes_per_cluster {
            0 => bytes_per_cluster,
            rem => rem,
        }
    };

    let mut remaining = data;
    while !remaining.is_empty() {
        let written = write_to_cluster_tail(io, geometry, last_cluster, occupied, remaining)?;
        remaining = &remaining[written..];
        occupied += written as u64;

        if !remaining.is_empty() {
            last_cluster = geometry.fat_table.allocate_after(io, last_cluster)?;
            occupied = 0;
        }
    }

    Ok(size + data.len() as u64)
}

/// Finds the byte offset of the first free (`0x00`-terminated or
/// `0xe5`-deleted) directory entry slot in the root directory, walking its
/// full cluster chain and allocating a new cluster if every existing one is
/// full.
fn find_free_root_entry_offset(io: &mut BlockIo, geometry: &Geometry, root_cluster: u32) -> Result<u64> {
    let mut cluster = root_cluster;
    loop {
        let offset = geometry.bpb.cluster_byte_offset(cluster);
        let bytes_per_cluster = geometry.bpb.bytes_per_cluster();
        let mut pos = 0u64;
        while pos < bytes_per_cluster {
            let entry_offset = offset + pos;
            let block = io.read_bytes(entry_offset)?;
            let within_block = (entry_offset % fat32_ds::BLOCK_SIZE as u64) as usize;
            let first_byte = block[within_block];
            if first_byte == 0x00 || first_byte == 0xe5 {
                return Ok(entry_offset);
            }
            pos += DIR_ENTRY_SIZE;
        }

        match geometry.fat_table.next_cluster(io, cluster)? {
            Some(next) => cluster = next,
            None => {
                let new_cluster = geometry.fat_table.allocate_after(io, cluster)?;
                return Ok(geometry.bpb.cluster_byte_offset(new_cluster));
            }
        }
    }
}

/// Creates a new, empty file in the root directory.
///
/// Fails with [`FsError::RootDirFull`] only in the degenerate case where
/// even allocating a fresh cluster for the root directory does not yield a
/// free slot; in practice [`find_free_root_entry_offset`] always succeeds or
/// returns [`FsError::DiskFull`] first.
pub fn create_file(
    io: &mut BlockIo,
    geometry: &Geometry,
    root_cluster: u32,
    name: &str,
) -> Result<File> {
    io.require_writable()?;

    let entry_offset = find_free_root_entry_offset(io, geometry, root_cluster)?;
    let first_cluster = geometry.fat_table.allocate_new(io)?;

    let date = FatDate { year: 1980, month: 1, day: 1 };
    let time = FatTime { hour: 0, minute: 0, second: 0 };
    let attributes = FileAttributes::ARCHIVE;

    let encoded = dir_entry::encode_directory_entry(
        name,
        attributes,
        date,
        time,
        date,
        time,
        first_cluster,
        0,
    );
    write_directory_entry_bytes(io, entry_offset, &encoded)?;

    Ok(File {
        name: name.to_string(),
        attributes,
        creation_date: date,
        creation_time: time,
        write_date: date,
        write_time: time,
        first_cluster,
        size: 0,
        byte_offset: entry_offset,
    })
}

/// Rewrites a single directory entry's raw bytes at its known byte offset.
pub fn write_directory_entry_bytes(io: &mut BlockIo, byte_offset: u64, encoded: &[u8]) -> Result<()> {
    io.require_writable()?;
    if encoded.len() != DIR_ENTRY_SIZE as usize {
        return Err(Error::Fs(FsError::MalformedOnDisk(
            "directory entry is not 32 bytes",
        )));
    }

    let block_start = byte_offset - byte_offset % fat32_ds::BLOCK_SIZE as u64;
    let within_block = (byte_offset - block_start) as usize;
    let mut block = io.read_bytes(block_start)?;
    block[within_block..within_block + encoded.len()].copy_from_slice(encoded);
    io.write_bytes(block_start, &block)
}

/// Rewrites `file`'s directory entry with an updated size, after content was
/// appended to it.
pub fn update_file_size(io: &mut BlockIo, file: &File, new_size: u32) -> Result<()> {
    let encoded = dir_entry::encode_directory_entry(
        &file.name,
        file.attributes,
        file.creation_date,
        file.creation_time,
        file.write_date,
        file.write_time,
        file.first_cluster,
        new_size,
    );
    write_directory_entry_bytes(io, file.byte_offset, &encoded)
}
