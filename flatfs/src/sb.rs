//! The device header and the region arithmetic derived from it.
//!
//! The header is the only self-describing part of the image. Everything else
//! is located by the fixed functions below:
//!
//! ```text
//! | Header | Bitmap | Descriptor table | padding | Inode table | Data blocks |
//! ```
//!
//! The bitmap stores one byte per data block. Descriptor records are an id
//! byte (zero means the slot is empty) followed by a NUL-padded name. The
//! inode table starts at the next block boundary after the descriptor table
//! and holds one block-sized record per file id. All integers on disk are
//! big-endian.

use std::convert::TryInto;

use crate::error::{FsError, Result};

const MAGIC: u32 = 0x464C_5446; // FLTF
const VERSION: u32 = 1;

/// Encoded header length in bytes.
pub const HEADER_LEN: u64 = 24;

/// Per-inode metadata ahead of the block slots: kind, pad, links, size.
pub(crate) const INODE_HEADER_LEN: u32 = 8;

/// Width of one encoded block slot inside an inode record.
pub(crate) const SLOT_LEN: u32 = 4;

/// Device shape, fixed at format time and re-read at mount.
/// [`Geometry::with_blocks`] gives the classic small defaults: 512-byte
/// blocks, nine files, eight-character names.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Geometry {
    /// Size of one data block in bytes. Also the size of one inode record.
    pub block_size: u32,
    /// Number of data blocks on the device.
    pub block_count: u32,
    /// Capacity of the descriptor and inode tables. File ids are `1..=max_files`.
    pub max_files: u32,
    /// Maximum file name length in bytes.
    pub name_len: u32,
}

impl Geometry {
    /// A device of `block_count` data blocks with the classic constants.
    pub fn with_blocks(block_count: u32) -> Self {
        Self {
            block_size: 512,
            block_count,
            max_files: 9,
            name_len: 8,
        }
    }

    /// Checked at both format and mount time so a bad image is refused
    /// before any region offset is computed from it.
    pub fn validate(&self) -> Result<()> {
        if self.block_size < 64 {
            return Err(FsError::Format(format!(
                "block size {} is below the 64 byte minimum",
                self.block_size
            )));
        }
        if self.block_count == 0 {
            return Err(FsError::Format("device has no data blocks".to_string()));
        }
        if self.max_files == 0 || self.max_files > 255 {
            return Err(FsError::Format(format!(
                "max file count {} is not in 1..=255",
                self.max_files
            )));
        }
        if self.name_len == 0 || self.name_len > 255 {
            return Err(FsError::Format(format!(
                "name length {} is not in 1..=255",
                self.name_len
            )));
        }
        Ok(())
    }

    /// Reads a header from the first `HEADER_LEN` bytes of `buf`.
    pub fn parse(buf: &[u8]) -> Result<Self> {
        if buf.len() < HEADER_LEN as usize {
            return Err(FsError::Format("device too short for a header".to_string()));
        }

        let magic = u32::from_be_bytes(buf[0..4].try_into().unwrap());
        if magic != MAGIC {
            return Err(FsError::Format(format!("bad magic {:#010x}", magic)));
        }
        let version = u32::from_be_bytes(buf[4..8].try_into().unwrap());
        if version != VERSION {
            return Err(FsError::Format(format!("unsupported version {}", version)));
        }

        let geo = Self {
            block_size: u32::from_be_bytes(buf[8..12].try_into().unwrap()),
            block_count: u32::from_be_bytes(buf[12..16].try_into().unwrap()),
            max_files: u32::from_be_bytes(buf[16..20].try_into().unwrap()),
            name_len: u32::from_be_bytes(buf[20..24].try_into().unwrap()),
        };
        geo.validate()?;
        Ok(geo)
    }

    /// Encodes the header as a series of big-endian fields.
    pub fn serialize(&self) -> Vec<u8> {
        let mut encoded = Vec::with_capacity(HEADER_LEN as usize);
        encoded.extend_from_slice(&MAGIC.to_be_bytes());
        encoded.extend_from_slice(&VERSION.to_be_bytes());
        encoded.extend_from_slice(&self.block_size.to_be_bytes());
        encoded.extend_from_slice(&self.block_count.to_be_bytes());
        encoded.extend_from_slice(&self.max_files.to_be_bytes());
        encoded.extend_from_slice(&self.name_len.to_be_bytes());
        encoded
    }

    pub(crate) fn bitmap_start(&self) -> u64 {
        HEADER_LEN
    }

    /// One descriptor record: id byte plus the padded name.
    pub(crate) fn desc_entry_len(&self) -> u64 {
        1 + u64::from(self.name_len)
    }

    pub(crate) fn desc_start(&self) -> u64 {
        self.bitmap_start() + u64::from(self.block_count)
    }

    pub(crate) fn desc_len(&self) -> u64 {
        u64::from(self.max_files) * self.desc_entry_len()
    }

    /// The inode table begins at the first block boundary at or after the
    /// end of the descriptor table.
    pub(crate) fn inode_start(&self) -> u64 {
        let bs = u64::from(self.block_size);
        let desc_end = self.desc_start() + self.desc_len();
        (desc_end + bs - 1) / bs * bs
    }

    /// Byte offset of the record for `id`.
    pub(crate) fn inode_at(&self, id: u8) -> u64 {
        self.inode_start() + u64::from(id - 1) * u64::from(self.block_size)
    }

    pub(crate) fn data_start(&self) -> u64 {
        self.inode_start() + u64::from(self.max_files) * u64::from(self.block_size)
    }

    /// Byte offset of data block `block`.
    pub(crate) fn block_at(&self, block: u32) -> u64 {
        self.data_start() + u64::from(block) * u64::from(self.block_size)
    }

    /// Total image length implied by this geometry.
    pub fn device_len(&self) -> u64 {
        self.data_start() + u64::from(self.block_count) * u64::from(self.block_size)
    }

    /// How many block slots one inode record can hold, which bounds the
    /// largest file the device can represent.
    pub(crate) fn slots_per_inode(&self) -> u32 {
        (self.block_size - INODE_HEADER_LEN) / SLOT_LEN
    }

    /// Blocks required to back a file of `size` bytes.
    pub(crate) fn blocks_needed(&self, size: u32) -> u32 {
        let bs = u64::from(self.block_size);
        ((u64::from(size) + bs - 1) / bs) as u32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn can_encode_and_decode_headers() {
        let geo = Geometry::with_blocks(64);
        let parsed = Geometry::parse(&geo.serialize()).unwrap();
        assert_eq!(parsed, geo);
    }

    #[test]
    fn parsing_buffer_with_bad_magic_fails() {
        let mut encoded = Geometry::with_blocks(64).serialize();
        encoded[0] = 0;
        match Geometry::parse(&encoded) {
            Err(FsError::Format(_)) => (),
            other => panic!("expected format error, got {:?}", other),
        }
    }

    #[test]
    fn parsing_short_buffer_fails() {
        assert!(Geometry::parse(&[0; 8]).is_err());
    }

    #[test]
    fn rejects_out_of_range_geometry() {
        let mut geo = Geometry::with_blocks(64);
        geo.max_files = 300;
        assert!(geo.validate().is_err());

        let mut geo = Geometry::with_blocks(64);
        geo.block_size = 16;
        assert!(geo.validate().is_err());

        assert!(Geometry::with_blocks(0).validate().is_err());
    }

    #[test]
    fn inode_table_starts_on_a_block_boundary() {
        let geo = Geometry::with_blocks(64);
        assert_eq!(geo.inode_start() % u64::from(geo.block_size), 0);
        assert!(geo.inode_start() >= geo.desc_start() + geo.desc_len());
    }

    #[test]
    fn regions_do_not_overlap() {
        let geo = Geometry::with_blocks(64);
        assert!(geo.bitmap_start() >= HEADER_LEN);
        assert!(geo.desc_start() >= geo.bitmap_start() + u64::from(geo.block_count));
        assert!(geo.data_start() >= geo.inode_start());
        assert_eq!(
            geo.device_len(),
            geo.block_at(geo.block_count - 1) + u64::from(geo.block_size)
        );
    }

    #[test]
    fn block_arithmetic_rounds_up_without_padding_block() {
        let geo = Geometry::with_blocks(64);
        assert_eq!(geo.blocks_needed(0), 0);
        assert_eq!(geo.blocks_needed(1), 1);
        assert_eq!(geo.blocks_needed(512), 1);
        assert_eq!(geo.blocks_needed(513), 2);
        assert_eq!(geo.blocks_needed(1000), 2);
    }
}
