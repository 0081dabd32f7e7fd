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

//! Adapts a caller-supplied block reader/writer capability into byte-offset
//! reads and writes.
//!
//! The reader and writer are ordinary capabilities (closures), not an object
//! the caller must subclass: a [`BlockIo`] is constructed from a `FnMut(u32)
//! -> Result<Block>` reader and, optionally, a `FnMut(u32, &Block) ->
//! Result<()>` writer. Omitting the writer gives a read-only device; any
//! attempt to mutate through it fails with [`IoError::ReadOnly`] before any
//! I/O is issued.

pub mod file;

use fat32_err::{Error, IoError, Result};
use log::trace;

/// The atomic I/O granularity of the underlying medium.
pub const BLOCK_SIZE: usize = 512;

/// One logical block.
pub type Block = [u8; BLOCK_SIZE];

type Reader = dyn FnMut(u32) -> Result<Block>;
type Writer = dyn FnMut(u32, &Block) -> Result<()>;

/// Wraps a block reader/writer capability, translating byte offsets to
/// block indices and counting the reads and writes it delegates.
pub struct BlockIo {
    reader: Box<Reader>,
    writer: Option<Box<Writer>>,
    reads: u64,
    writes: u64,
}

impl BlockIo {
    /// Builds a read-only `BlockIo` around the given block reader.
    pub fn new(reader: impl FnMut(u32) -> Result<Block> + 'static) -> Self {
        Self {
            reader: Box::new(reader),
            writer: None,
            reads: 0,
            writes: 0,
        }
    }

    /// Builds a read/write `BlockIo` around the given reader and writer.
    pub fn with_writer(
        reader: impl FnMut(u32) -> Result<Block> + 'static,
        writer: impl FnMut(u32, &Block) -> Result<()> + 'static,
    ) -> Self {
        Self {
            reader: Box::new(reader),
            writer: Some(Box::new(writer)),
            reads: 0,
            writes: 0,
        }
    }

    /// Whether a writer capability was supplied.
    pub fn is_writable(&self) -> bool {
        self.writer.is_some()
    }

    /// Fails with [`IoError::ReadOnly`] if no writer capability was
    /// supplied. Callers that are about to mutate the device should check
    /// this before issuing any read, so a read-only device never performs
    /// partial I/O on behalf of a doomed write.
    pub fn require_writable(&self) -> Result<()> {
        if self.writer.is_some() {
            Ok(())
        } else {
            Err(Error::Io(IoError::ReadOnly))
        }
    }

    /// Reads the block containing `offset`. Callers always pass
    /// block-aligned offsets.
    pub fn read_bytes(&mut self, offset: u64) -> Result<Block> {
        let block_index = (offset / BLOCK_SIZE as u64) as u32;
        trace!("read block {block_index}");
        let block = (self.reader)(block_index)?;
        self.reads += 1;
        Ok(block)
    }

    /// Writes a full block at the block containing `offset`.
    pub fn write_bytes(&mut self, offset: u64, data: &Block) -> Result<()> {
        self.require_writable()?;
        let block_index = (offset / BLOCK_SIZE as u64) as u32;
        trace!("write block {block_index}");
        let writer = self.writer.as_mut().expect("checked by require_writable");
        writer(block_index, data)?;
        self.writes += 1;
        Ok(())
    }

    /// Number of blocks read so far.
    pub fn reads(&self) -> u64 {
        self.reads
    }

    /// Number of blocks written so far.
    pub fn writes(&self) -> u64 {
        self.writes
    }
}
