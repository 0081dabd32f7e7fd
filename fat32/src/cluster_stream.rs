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

//! Cluster-granular streaming reads of a file's contents.

use fat32_err::Result;
use fat32_ds::{BlockIo, BLOCK_SIZE};

use crate::disk::Geometry;

/// A pull-based iterator over a file's contents, one LBA-sized sector at a
/// time.
///
/// Each item is the bytes of one sector, truncated to the file's remaining
/// size on the final sector of the final cluster. Holding `&'a mut BlockIo`
/// ties the stream's lifetime to the device borrow it reads through, so it
/// cannot outlive (or be used concurrently with) another operation on the
/// same device.
pub struct ClusterStream<'a> {
    io: &'a mut BlockIo,
    geometry: Geometry,
    bytes_remaining: u64,
    /// The cluster the next sector will be read from, or `None` once the
    /// stream is exhausted.
    cluster: Option<u32>,
    /// 0-based index, within `cluster`, of the next sector to read.
    sector_index: u32,
    /// How many sectors of `cluster` hold bytes belonging to this file.
    sectors_in_cluster: u32,
    /// `cluster`'s successor in the chain, read once up front when `cluster`
    /// is entered (`sector_index == 0`), per spec: used both to know where
    /// to advance and whether the final sector of `cluster` is the file's
    /// last sector.
    next_cluster: Option<u32>,
}

impl<'a> ClusterStream<'a> {
    pub(crate) fn new(io: &'a mut BlockIo, geometry: Geometry, first_cluster: u32, size: u64) -> Self {
        let bytes_per_sector = BLOCK_SIZE as u64;
        let bytes_per_cluster = geometry.bpb.bytes_per_cluster();
        let cluster = if size == 0 { None } else { Some(first_cluster) };
        let sectors_in_cluster = if size == 0 {
            0
        } else {
            sectors_for(bytes_per_cluster.min(size), bytes_per_sector)
        };
        Self {
            io,
            geometry,
            bytes_remaining: size,
            cluster,
            sector_index: 0,
            sectors_in_cluster,
            next_cluster: None,
        }
    }
}

fn sectors_for(bytes: u64, bytes_per_sector: u64) -> u32 {
    bytes.div_ceil(bytes_per_sector) as u32
}

impl<'a> Iterator for ClusterStream<'a> {
    type Item = Result<Vec<u8>>;

    fn next(&mut self) -> Option<Self::Item> {
        let cluster = self.cluster?;
        let bytes_per_sector = BLOCK_SIZE as u64;
        let bytes_per_cluster = self.geometry.bpb.bytes_per_cluster();

        if self.sector_index == 0 {
            match self.geometry.fat_table.next_cluster(self.io, cluster) {
                Ok(next) => self.next_cluster = next,
                Err(e) => return Some(Err(e)),
            }
        }

        let sector_offset = self.geometry.bpb.cluster_byte_offset(cluster)
            + self.sector_index as u64 * bytes_per_sector;
        let block = match self.io.read_bytes(sector_offset) {
            Ok(block) => block,
            Err(e) => return Some(Err(e)),
        };

        let is_last_sector_of_cluster = self.sector_index + 1 == self.sectors_in_cluster;
        let is_last_cluster = self.next_cluster.is_none();

        let mut data = block.to_vec();
        if is_last_sector_of_cluster && is_last_cluster {
            let last_len = match self.bytes_remaining % bytes_per_sector {
                0 => bytes_per_sector,
                rem => rem,
            } as usize;
            data.truncate(last_len);
            self.bytes_remaining -= last_len as u64;
        } else {
            self.bytes_remaining -= bytes_per_sector.min(self.bytes_remaining);
        }

        if is_last_sector_of_cluster {
            self.sector_index = 0;
            self.cluster = self.next_cluster;
            if self.cluster.is_some() {
                let take = bytes_per_cluster.min(self.bytes_remaining);
                self.sectors_in_cluster = sectors_for(take, bytes_per_sector);
            }
        } else {
            self.sector_index += 1;
        }

        Some(Ok(data))
    }
}
