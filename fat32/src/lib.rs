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

//! A FAT32 filesystem driver over an abstract block device.
//!
//! [`Disk`] is the entry point: it reads the MBR partition table, selects
//! the largest partition, parses its BIOS Parameter Block, and from there
//! can list the root directory, stream file contents cluster by cluster,
//! append to existing files, and create new empty files in the root
//! directory.

pub mod bpb;
pub mod cluster_stream;
pub mod dir_entry;
pub mod disk;
pub mod fat_table;
pub mod partition;
pub mod writer;

pub use dir_entry::{FatDate, FatTime, File, FileAttributes};
pub use disk::Disk;
pub use fat32_err::{Error, FsError, IoError, Result};
pub use fat32_ds::BlockIo;
pub use partition::PartitionEntry;
