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

//! A convenience [`BlockIo`] backed by a regular file, built from positional
//! reads/writes so a single open `File` can serve both the reader and the
//! writer capability without juggling a shared cursor.
//!
//! This is not part of the driver's in-scope surface (the block device is
//! always an external collaborator); it exists so embedding binaries and
//! integration tests have something real to hand to [`BlockIo::new`] /
//! [`BlockIo::with_writer`].

use std::fs::OpenOptions;
use std::io;
use std::os::unix::fs::FileExt;
use std::path::Path;

use fat32_err::{Error, IoError};

use crate::{Block, BlockIo, BLOCK_SIZE};

/// Opens `path` as a block device, read-only or read/write.
pub fn open(path: impl AsRef<Path>, writable: bool) -> io::Result<BlockIo> {
    let file = OpenOptions::new()
        .read(true)
        .write(writable)
        .open(path)?;

    let reader_file = file.try_clone()?;
    let reader = move |block_index: u32| -> fat32_err::Result<Block> {
        let mut block = [0u8; BLOCK_SIZE];
        reader_file
            .read_exact_at(&mut block, block_index as u64 * BLOCK_SIZE as u64)
            .map_err(|_| Error::Io(IoError::ReadFailed { block: block_index }))?;
        Ok(block)
    };

    if writable {
        let writer_file = file;
        let writer = move |block_index: u32, data: &Block| -> fat32_err::Result<()> {
            writer_file
                .write_all_at(data, block_index as u64 * BLOCK_SIZE as u64)
                .map_err(|_| Error::Io(IoError::WriteFailed { block: block_index }))
        };
        Ok(BlockIo::with_writer(reader, writer))
    } else {
        Ok(BlockIo::new(reader))
    }
}
