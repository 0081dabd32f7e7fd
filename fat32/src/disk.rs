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

//! [`Disk`]: the entry point for mounting and operating on a FAT32 volume.

use log::{debug, info};

use fat32_err::{Error, FsError, Result};
use fat32_ds::BlockIo;

use crate::bpb::BiosParameterBlock;
use crate::cluster_stream::ClusterStream;
use crate::dir_entry::{self, File};
use crate::fat_table::FatTable;
use crate::partition::{self, PartitionEntry};
use crate::writer;

/// The BPB and FAT geometry of a mounted partition, bundled so the pieces
/// that need both (the cluster stream, the writer functions) can take one
/// `Copy` value instead of two.
#[derive(Debug, Clone, Copy)]
pub struct Geometry {
    pub bpb: BiosParameterBlock,
    pub fat_table: FatTable,
}

enum DiskState {
    Uninitialised,
    Initialised {
        partition: PartitionEntry,
        geometry: Geometry,
    },
}

/// A FAT32 volume, addressed through an injected [`BlockIo`] capability.
///
/// A `Disk` starts [`DiskState::Uninitialised`] and must be [`Disk::init`]ed
/// before any other operation; every other method returns
/// [`Error::NotInitialised`] until then, rather than requiring callers to
/// unwrap an `Option`.
pub struct Disk {
    io: BlockIo,
    state: DiskState,
}

impl Disk {
    pub fn new(io: BlockIo) -> Self {
        Self {
            io,
            state: DiskState::Uninitialised,
        }
    }

    /// Reads the MBR, selects the active partition, and parses its BPB.
    pub fn init(&mut self) -> Result<()> {
        let sector0 = self.io.read_bytes(0)?;
        let entries = partition::parse_partitions(&sector0)?;
        let partition = partition::select_active_partition(&entries)?;
        info!(
            "selected partition at LBA {} ({} sectors)",
            partition.start_lba, partition.num_sectors
        );

        let boot_sector = self.io.read_bytes(partition.partition_offset())?;
        let bpb = BiosParameterBlock::parse(&boot_sector, partition.partition_offset())?;
        debug!(
            "root cluster {}, {} bytes/cluster",
            bpb.root_cluster,
            bpb.bytes_per_cluster()
        );

        let fat_table = FatTable::new(&bpb);
        self.state = DiskState::Initialised {
            partition,
            geometry: Geometry { bpb, fat_table },
        };
        Ok(())
    }

    fn geometry(&self) -> Result<Geometry> {
        match &self.state {
            DiskState::Uninitialised => Err(Error::NotInitialised),
            DiskState::Initialised { geometry, .. } => Ok(*geometry),
        }
    }

    /// The parsed BIOS Parameter Block of the mounted partition.
    pub fn bios_parameter_block(&self) -> Result<BiosParameterBlock> {
        Ok(self.geometry()?.bpb)
    }

    /// The partition selected by [`Disk::init`].
    pub fn active_partition(&self) -> Result<PartitionEntry> {
        match &self.state {
            DiskState::Uninitialised => Err(Error::NotInitialised),
            DiskState::Initialised { partition, .. } => Ok(*partition),
        }
    }

    /// Total blocks read from the underlying device so far.
    pub fn reads(&self) -> u64 {
        self.io.reads()
    }

    /// Total blocks written to the underlying device so far.
    pub fn writes(&self) -> u64 {
        self.io.writes()
    }

    /// Lists the short (8.3) directory entries in the root directory,
    /// following its full cluster chain. Long file name fragments are
    /// included as-is (see [`File::is_lfn`]) rather than filtered out,
    /// since reassembling them is out of scope.
    pub fn list_root_files(&mut self) -> Result<Vec<File>> {
        let geometry = self.geometry()?;
        let mut files = Vec::new();
        let mut cluster = geometry.bpb.root_cluster;

        loop {
            let offset = geometry.bpb.cluster_byte_offset(cluster);
            let cluster_bytes = self.read_cluster_bytes(offset, geometry.bpb.bytes_per_cluster())?;
            let (mut entries, terminated) =
                dir_entry::parse_directory_entries(&cluster_bytes, offset)?;
            files.append(&mut entries);
            if terminated {
                break;
            }
            match geometry.fat_table.next_cluster(&mut self.io, cluster)? {
                Some(next) => cluster = next,
                None => break,
            }
        }

        Ok(files)
    }

    fn read_cluster_bytes(&mut self, offset: u64, len: u64) -> Result<Vec<u8>> {
        let mut data = Vec::with_capacity(len as usize);
        let mut cursor = offset;
        while (data.len() as u64) < len {
            let block = self.io.read_bytes(cursor)?;
            data.extend_from_slice(&block);
            cursor += block.len() as u64;
        }
        data.truncate(len as usize);
        Ok(data)
    }

    /// Streams a file's contents one sector at a time.
    pub fn read_file_in_chunks(&mut self, file: &File) -> Result<ClusterStream<'_>> {
        let geometry = self.geometry()?;
        Ok(ClusterStream::new(
            &mut self.io,
            geometry,
            file.first_cluster,
            file.size as u64,
        ))
    }

    /// Appends `data` to the end of `file`, allocating clusters as needed,
    /// and rewrites its directory entry with the new size. Returns the
    /// updated [`File`].
    pub fn append_to_file(&mut self, file: &File, data: &[u8]) -> Result<File> {
        let geometry = self.geometry()?;
        self.io.require_writable()?;

        let last_cluster = geometry
            .fat_table
            .last_cluster_of(&mut self.io, file.first_cluster)?;
        let new_size = writer::append_to_file(&mut self.io, &geometry, last_cluster, file.size as u64, data)?;

        let new_size_u32 = u32::try_from(new_size).map_err(|_| {
            Error::Fs(FsError::MalformedOnDisk("file size exceeds FAT32's 32-bit limit"))
        })?;
        let mut updated = file.clone();
        updated.size = new_size_u32;
        writer::update_file_size(&mut self.io, &updated, new_size_u32)?;
        Ok(updated)
    }

    /// Creates a new, empty file in the root directory.
    pub fn create_file(&mut self, name: &str) -> Result<File> {
        let geometry = self.geometry()?;
        self.io.require_writable()?;
        writer::create_file(&mut self.io, &geometry, geometry.bpb.root_cluster, name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    fn build_image() -> Vec<u8> {
        // Mirrors the geometry used in the end-to-end scenarios: a single
        // partition of type 0x0b starting at LBA 1, 1 sector/cluster,
        // 2 FATs of 1008 sectors each, root directory at cluster 2.
        let bytes_per_sector = 512usize;
        let total_sectors = 131071usize;
        let mut image = vec![0u8; (1 + total_sectors) * bytes_per_sector];

        // MBR partition entry 0
        image[446] = 0x00;
        image[446 + 4] = 0x0b;
        image[446 + 8..446 + 12].copy_from_slice(&1u32.to_le_bytes());
        image[446 + 12..446 + 16].copy_from_slice(&(total_sectors as u32).to_le_bytes());

        let partition_offset = bytes_per_sector; // LBA 1
        let bpb_at = |field: usize, bytes: &[u8]| {
            image[partition_offset + field..partition_offset + field + bytes.len()]
                .copy_from_slice(bytes)
        };
        bpb_at(11, &512u16.to_le_bytes());
        bpb_at(13, &[1u8]);
        bpb_at(14, &32u16.to_le_bytes());
        bpb_at(16, &[2u8]);
        bpb_at(36, &1008u32.to_le_bytes());
        bpb_at(44, &2u32.to_le_bytes());
        bpb_at(32, &(total_sectors as u32).to_le_bytes());

        image
    }

    fn make_disk(image: Vec<u8>) -> Disk {
        let backing = Rc::new(RefCell::new(image));
        let read_backing = backing.clone();
        let write_backing = backing.clone();
        let io = BlockIo::with_writer(
            move |block_index| {
                let mut buf = [0u8; 512];
                let data = read_backing.borrow();
                let start = block_index as usize * 512;
                if start < data.len() {
                    let end = (start + 512).min(data.len());
                    buf[..end - start].copy_from_slice(&data[start..end]);
                }
                Ok(buf)
            },
            move |block_index, block| {
                let mut data = write_backing.borrow_mut();
                let start = block_index as usize * 512;
                let end = start + 512;
                if data.len() < end {
                    data.resize(end, 0);
                }
                data[start..end].copy_from_slice(block);
                Ok(())
            },
        );
        Disk::new(io)
    }

    #[test]
    fn uninitialised_disk_rejects_operations() {
        let mut disk = make_disk(build_image());
        let err = disk.list_root_files().unwrap_err();
        assert!(matches!(err, Error::NotInitialised));
    }

    #[test]
    fn init_selects_partition_and_parses_bpb() {
        let mut disk = make_disk(build_image());
        disk.init().unwrap();
        let partition = disk.active_partition().unwrap();
        assert_eq!(partition.start_lba, 1);
        let bpb = disk.bios_parameter_block().unwrap();
        assert_eq!(bpb.root_cluster, 2);
        assert_eq!(bpb.bytes_per_cluster(), 512);
    }

    #[test]
    fn empty_root_directory_lists_no_files() {
        let mut disk = make_disk(build_image());
        disk.init().unwrap();
        let files = disk.list_root_files().unwrap();
        assert!(files.is_empty());
    }

    #[test]
    fn create_then_append_then_read_round_trips() {
        let mut disk = make_disk(build_image());
        disk.init().unwrap();

        let file = disk.create_file("HELLO.TXT").unwrap();
        assert_eq!(file.size, 0);

        let updated = disk.append_to_file(&file, b"hello world").unwrap();
        assert_eq!(updated.size, 11);

        let chunks: Result<Vec<Vec<u8>>> = disk.read_file_in_chunks(&updated).unwrap().collect();
        let data: Vec<u8> = chunks.unwrap().concat();
        assert_eq!(data, b"hello world");

        let files = disk.list_root_files().unwrap();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].name, "HELLO.TXT");
        assert_eq!(files[0].size, 11);
    }

    #[test]
    fn append_across_a_cluster_boundary_allocates_a_new_cluster() {
        let mut disk = make_disk(build_image());
        disk.init().unwrap();
        let file = disk.create_file("BIG.TXT").unwrap();

        let first_chunk = vec![b'a'; 512];
        let file = disk.append_to_file(&file, &first_chunk).unwrap();
        let writes_after_first = disk.writes();

        let file = disk.append_to_file(&file, b"x").unwrap();
        assert_eq!(file.size, 513);
        assert!(disk.writes() > writes_after_first);

        let chunks: Result<Vec<Vec<u8>>> = disk.read_file_in_chunks(&file).unwrap().collect();
        let data: Vec<u8> = chunks.unwrap().concat();
        assert_eq!(data.len(), 513);
        assert_eq!(&data[512..], b"x");
    }

    #[test]
    fn read_only_device_rejects_append_before_any_write() {
        let image = build_image();
        let backing = Rc::new(RefCell::new(image));
        let read_backing = backing.clone();
        let io = BlockIo::new(move |block_index| {
            let mut buf = [0u8; 512];
            let data = read_backing.borrow();
            let start = block_index as usize * 512;
            if start < data.len() {
                let end = (start + 512).min(data.len());
                buf[..end - start].copy_from_slice(&data[start..end]);
            }
            Ok(buf)
        });
        let mut disk = Disk::new(io);
        disk.init().unwrap();
        let err = disk.create_file("NOPE.TXT").unwrap_err();
        assert!(matches!(err, Error::Io(fat32_err::IoError::ReadOnly)));
    }
}
