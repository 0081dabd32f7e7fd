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

//! The 32-byte directory entry codec.
//!
//! Long file name entries (`attributes == 0x0F`) are recognised so they can
//! be skipped or passed over without being mistaken for short entries, but
//! their Unicode name fragments are not reassembled: [`File::name`] always
//! reflects the 8.3 short name.

use fat32_err::Result;
use zerocopy::little_endian::{U16, U32};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

use crate::bpb::DIR_ENTRY_SIZE;

bitflags::bitflags! {
    /// The FAT directory entry attribute byte.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct FileAttributes: u8 {
        const READ_ONLY = 0x01;
        const HIDDEN    = 0x02;
        const SYSTEM    = 0x04;
        const VOLUME_ID = 0x08;
        const DIRECTORY = 0x10;
        const ARCHIVE   = 0x20;
        const RESERVED_1 = 0x40;
        const RESERVED_2 = 0x80;
        /// `READ_ONLY | HIDDEN | SYSTEM | VOLUME_ID`: marks a long file name
        /// entry rather than a short 8.3 entry.
        const LFN = 0x0f;
    }
}

/// A FAT packed date: `(year - 1980) << 9 | month << 5 | day`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FatDate {
    pub year: u16,
    pub month: u8,
    pub day: u8,
}

impl FatDate {
    pub fn from_packed(packed: u16) -> Self {
        Self {
            year: 1980 + (packed >> 9),
            month: ((packed >> 5) & 0x0f) as u8,
            day: (packed & 0x1f) as u8,
        }
    }

    pub fn to_packed(self) -> u16 {
        ((self.year - 1980) << 9) | ((self.month as u16) << 5) | self.day as u16
    }
}

/// A FAT packed time: `hour << 11 | minute << 5 | (second / 2)`. FAT stores
/// seconds at two-second resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FatTime {
    pub hour: u8,
    pub minute: u8,
    pub second: u8,
}

impl FatTime {
    pub fn from_packed(packed: u16) -> Self {
        Self {
            hour: (packed >> 11) as u8,
            minute: ((packed >> 5) & 0x3f) as u8,
            second: ((packed & 0x1f) * 2) as u8,
        }
    }

    pub fn to_packed(self) -> u16 {
        ((self.hour as u16) << 11) | ((self.minute as u16) << 5) | (self.second as u16 / 2)
    }
}

#[repr(C, packed)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout)]
struct RawDirEntry {
    name: [u8; 11],
    attributes: u8,
    nt_reserved: u8,
    creation_time_tenth: u8,
    creation_time: U16,
    creation_date: U16,
    last_access_date: U16,
    first_cluster_hi: U16,
    write_time: U16,
    write_date: U16,
    first_cluster_lo: U16,
    file_size: U32,
}

/// A decoded short (8.3) directory entry, together with the absolute byte
/// offset it occupies on disk so it can be rewritten in place.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct File {
    pub name: String,
    pub attributes: FileAttributes,
    pub creation_date: FatDate,
    pub creation_time: FatTime,
    pub write_date: FatDate,
    pub write_time: FatTime,
    pub first_cluster: u32,
    pub size: u32,
    /// Absolute byte offset of this entry's 32 bytes on the device.
    pub byte_offset: u64,
}

impl File {
    /// Whether this entry is a long file name fragment rather than a short
    /// 8.3 entry.
    pub fn is_lfn(&self) -> bool {
        self.attributes.bits() == FileAttributes::LFN.bits()
    }

    pub fn is_directory(&self) -> bool {
        self.attributes.contains(FileAttributes::DIRECTORY)
    }
}

/// Marker for an entry never used and terminating the directory.
const ENTRY_FREE_TERMINATOR: u8 = 0x00;
/// Marker for an entry that once held a file, now deleted.
const ENTRY_DELETED: u8 = 0xe5;

/// Decodes every directory entry in one cluster's worth of bytes.
///
/// Returns the decoded [`File`]s alongside a flag indicating whether the
/// `0x00` terminator byte was encountered: when `true`, the caller should
/// stop scanning entirely rather than continue into the next cluster of the
/// directory's chain.
pub fn parse_directory_entries(cluster: &[u8], cluster_byte_offset: u64) -> Result<(Vec<File>, bool)> {
    let mut files = Vec::new();
    let mut terminated = false;

    for (i, chunk) in cluster.chunks_exact(DIR_ENTRY_SIZE as usize).enumerate() {
        let first_byte = chunk[0];
        if first_byte == ENTRY_FREE_TERMINATOR {
            terminated = true;
            break;
        }
        if first_byte == ENTRY_DELETED {
            continue;
        }

        let raw = match RawDirEntry::ref_from_bytes(chunk) {
            Ok(raw) => raw,
            Err(_) => continue,
        };
        let attributes = FileAttributes::from_bits_truncate(raw.attributes);
        let name = decode_short_name(&raw.name);
        let first_cluster =
            ((raw.first_cluster_hi.get() as u32) << 16) | raw.first_cluster_lo.get() as u32;

        files.push(File {
            name,
            attributes,
            creation_date: FatDate::from_packed(raw.creation_date.get()),
            creation_time: FatTime::from_packed(raw.creation_time.get()),
            write_date: FatDate::from_packed(raw.write_date.get()),
            write_time: FatTime::from_packed(raw.write_time.get()),
            first_cluster,
            size: raw.file_size.get(),
            byte_offset: cluster_byte_offset + i as u64 * DIR_ENTRY_SIZE,
        });
    }

    Ok((files, terminated))
}

/// Encodes a short 8.3 name, attributes, timestamps, first cluster and size
/// into the raw 32-byte directory entry layout.
pub fn encode_directory_entry(
    name: &str,
    attributes: FileAttributes,
    creation_date: FatDate,
    creation_time: FatTime,
    write_date: FatDate,
    write_time: FatTime,
    first_cluster: u32,
    size: u32,
) -> [u8; DIR_ENTRY_SIZE as usize] {
    let raw = RawDirEntry {
        name: encode_short_name(name),
        attributes: attributes.bits(),
        nt_reserved: 0,
        creation_time_tenth: 0,
        creation_time: U16::new(creation_time.to_packed()),
        creation_date: U16::new(creation_date.to_packed()),
        last_access_date: U16::new(write_date.to_packed()),
        first_cluster_hi: U16::new((first_cluster >> 16) as u16),
        write_time: U16::new(write_time.to_packed()),
        write_date: U16::new(write_date.to_packed()),
        first_cluster_lo: U16::new((first_cluster & 0xffff) as u16),
        file_size: U32::new(size),
    };
    let mut buf = [0u8; DIR_ENTRY_SIZE as usize];
    buf.copy_from_slice(raw.as_bytes());
    buf
}

/// Decodes an 11-byte padded 8.3 name (`NAME` + `EXT`, space-padded) into a
/// dotted display name such as `"README.TXT"`.
fn decode_short_name(raw: &[u8; 11]) -> String {
    let base = String::from_utf8_lossy(&raw[0..8]).trim_end().to_string();
    let ext = String::from_utf8_lossy(&raw[8..11]).trim_end().to_string();
    if ext.is_empty() {
        base
    } else {
        format!("{base}.{ext}")
    }
}

/// Encodes a dotted display name back into the 11-byte padded 8.3 layout.
/// Names longer than 8+3 characters are truncated; this driver does not
/// synthesize long file name entries.
fn encode_short_name(name: &str) -> [u8; 11] {
    let mut buf = [b' '; 11];
    let (base, ext) = match name.split_once('.') {
        Some((base, ext)) => (base, ext),
        None => (name, ""),
    };
    for (dst, src) in buf[0..8].iter_mut().zip(base.as_bytes().iter().take(8)) {
        *dst = src.to_ascii_uppercase();
    }
    for (dst, src) in buf[8..11].iter_mut().zip(ext.as_bytes().iter().take(3)) {
        *dst = src.to_ascii_uppercase();
    }
    buf
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry_bytes(name: &str, attributes: u8, first_cluster: u32, size: u32) -> Vec<u8> {
        encode_directory_entry(
            name,
            FileAttributes::from_bits_truncate(attributes),
            FatDate { year: 2024, month: 1, day: 2 },
            FatTime { hour: 3, minute: 4, second: 6 },
            FatDate { year: 2024, month: 1, day: 2 },
            FatTime { hour: 3, minute: 4, second: 6 },
            first_cluster,
            size,
        )
        .to_vec()
    }

    #[test]
    fn round_trips_name_attributes_cluster_and_size() {
        let bytes = entry_bytes("README.TXT", FileAttributes::ARCHIVE.bits(), 5, 1234);
        let (files, terminated) = parse_directory_entries(&bytes, 0x1000).unwrap();
        assert!(!terminated);
        assert_eq!(files.len(), 1);
        let f = &files[0];
        assert_eq!(f.name, "README.TXT");
        assert_eq!(f.first_cluster, 5);
        assert_eq!(f.size, 1234);
        assert_eq!(f.byte_offset, 0x1000);
        assert!(!f.is_directory());
        assert!(!f.is_lfn());
    }

    #[test]
    fn date_and_time_round_trip_through_pack_unpack() {
        let date = FatDate { year: 2024, month: 11, day: 30 };
        let time = FatTime { hour: 13, minute: 45, second: 30 };
        assert_eq!(FatDate::from_packed(date.to_packed()), date);
        // Seconds round to even 2-second granularity.
        assert_eq!(FatTime::from_packed(time.to_packed()).second, 30);
    }

    #[test]
    fn zero_byte_stops_scan_and_reports_terminated() {
        let mut bytes = entry_bytes("ONE.TXT", FileAttributes::ARCHIVE.bits(), 5, 1);
        bytes.extend(vec![0u8; 32]);
        bytes.extend(entry_bytes("TWO.TXT", FileAttributes::ARCHIVE.bits(), 6, 2));
        let (files, terminated) = parse_directory_entries(&bytes, 0).unwrap();
        assert!(terminated);
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].name, "ONE.TXT");
    }

    #[test]
    fn deleted_entry_is_skipped_but_scan_continues() {
        let mut bytes = entry_bytes("GONE.TXT", FileAttributes::ARCHIVE.bits(), 5, 1);
        bytes[0] = 0xe5;
        bytes.extend(entry_bytes("HERE.TXT", FileAttributes::ARCHIVE.bits(), 6, 2));
        let (files, terminated) = parse_directory_entries(&bytes, 0).unwrap();
        assert!(!terminated);
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].name, "HERE.TXT");
    }

    #[test]
    fn lfn_entry_is_detected_without_unicode_reconstruction() {
        let bytes = entry_bytes("IGNORED", FileAttributes::LFN.bits(), 0, 0);
        let (files, _) = parse_directory_entries(&bytes, 0).unwrap();
        assert_eq!(files.len(), 1);
        assert!(files[0].is_lfn());
    }

    #[test]
    fn directory_entry_with_all_lfn_bits_plus_others_is_not_lfn() {
        // attr=0x1F and 0x2F both have bits 0-3 all set (superset of LFN's
        // mask) but are a directory/archive entry, not an LFN fragment.
        let bytes = entry_bytes("DIR", FileAttributes::DIRECTORY.bits() | 0x0f, 5, 0);
        let (files, _) = parse_directory_entries(&bytes, 0).unwrap();
        assert_eq!(files.len(), 1);
        assert!(!files[0].is_lfn());
    }
}
