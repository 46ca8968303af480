use std::convert::TryInto;

use crate::disk::Volume;
use crate::error::{FsError, Result};
use crate::sb::{Geometry, INODE_HEADER_LEN, SLOT_LEN};

/// What a descriptor entry ultimately points at.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FileKind {
    File,
    Directory,
}

/// In-memory image of one inode record.
///
/// The record on disk is one block wide: an eight byte header (kind, pad,
/// link count, size) followed by fixed-width block slots. A slot stores the
/// physical block number plus one, so a zeroed slot is unambiguously empty
/// even though block zero is a real data block. `size` implies exactly
/// `blocks_needed(size)` populated slots, in file order, starting at slot
/// zero.
pub(crate) struct Inode {
    pub kind: FileKind,
    pub links: u16,
    pub size: u32,
    /// Physical block addresses owned by this file, in file order.
    pub blocks: Vec<u32>,
}

impl Inode {
    /// A freshly created file: one link, no data blocks.
    pub fn new_file() -> Self {
        Self {
            kind: FileKind::File,
            links: 1,
            size: 0,
            blocks: Vec::new(),
        }
    }

    pub fn load<V: Volume>(vol: &mut V, geo: &Geometry, id: u8) -> Result<Self> {
        let mut record = vec![0u8; geo.block_size as usize];
        vol.read_at(geo.inode_at(id), &mut record)?;

        let kind = match record[0] {
            0 => FileKind::File,
            1 => FileKind::Directory,
            other => {
                return Err(FsError::Format(format!(
                    "inode {} has kind byte {}",
                    id, other
                )))
            }
        };
        let links = u16::from_be_bytes(record[2..4].try_into().unwrap());
        let size = u32::from_be_bytes(record[4..8].try_into().unwrap());

        let mut blocks = Vec::new();
        for slot in 0..geo.slots_per_inode() as usize {
            let at = INODE_HEADER_LEN as usize + slot * SLOT_LEN as usize;
            let encoded = u32::from_be_bytes(record[at..at + 4].try_into().unwrap());
            if encoded == 0 {
                break;
            }
            blocks.push(encoded - 1);
        }

        Ok(Self {
            kind,
            links,
            size,
            blocks,
        })
    }

    /// Writes the whole record back, zeroing every slot beyond the
    /// populated ones.
    pub fn store<V: Volume>(&self, vol: &mut V, geo: &Geometry, id: u8) -> Result<()> {
        debug_assert!(self.blocks.len() <= geo.slots_per_inode() as usize);

        let mut record = vec![0u8; geo.block_size as usize];
        record[0] = match self.kind {
            FileKind::File => 0,
            FileKind::Directory => 1,
        };
        record[2..4].copy_from_slice(&self.links.to_be_bytes());
        record[4..8].copy_from_slice(&self.size.to_be_bytes());
        for (slot, &block) in self.blocks.iter().enumerate() {
            let at = INODE_HEADER_LEN as usize + slot * SLOT_LEN as usize;
            record[at..at + 4].copy_from_slice(&(block + 1).to_be_bytes());
        }

        vol.write_at(geo.inode_at(id), &record)?;
        Ok(())
    }

    /// Zero-fills the record after the last link is gone.
    pub fn wipe<V: Volume>(vol: &mut V, geo: &Geometry, id: u8) -> Result<()> {
        vol.write_at(geo.inode_at(id), &vec![0u8; geo.block_size as usize])?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::disk::FileDisk;

    fn test_volume(geo: &Geometry) -> FileDisk {
        let mut disk = FileDisk::from(tempfile::tempfile().unwrap());
        disk.write_at(0, &vec![0u8; geo.device_len() as usize])
            .unwrap();
        disk
    }

    #[test]
    fn records_round_trip_through_the_volume() {
        let geo = Geometry::with_blocks(16);
        let mut vol = test_volume(&geo);

        let node = Inode {
            kind: FileKind::File,
            links: 2,
            size: 1000,
            blocks: vec![0, 5],
        };
        node.store(&mut vol, &geo, 3).unwrap();

        let loaded = Inode::load(&mut vol, &geo, 3).unwrap();
        assert_eq!(loaded.kind, FileKind::File);
        assert_eq!(loaded.links, 2);
        assert_eq!(loaded.size, 1000);
        assert_eq!(loaded.blocks, vec![0, 5]);
    }

    #[test]
    fn block_zero_survives_the_slot_encoding() {
        let geo = Geometry::with_blocks(16);
        let mut vol = test_volume(&geo);

        let mut node = Inode::new_file();
        node.size = 1;
        node.blocks.push(0);
        node.store(&mut vol, &geo, 1).unwrap();

        assert_eq!(Inode::load(&mut vol, &geo, 1).unwrap().blocks, vec![0]);
    }

    #[test]
    fn wipe_leaves_a_dead_record() {
        let geo = Geometry::with_blocks(16);
        let mut vol = test_volume(&geo);

        let node = Inode {
            kind: FileKind::File,
            links: 1,
            size: 600,
            blocks: vec![2, 3],
        };
        node.store(&mut vol, &geo, 2).unwrap();
        Inode::wipe(&mut vol, &geo, 2).unwrap();

        let loaded = Inode::load(&mut vol, &geo, 2).unwrap();
        assert_eq!(loaded.links, 0);
        assert_eq!(loaded.size, 0);
        assert!(loaded.blocks.is_empty());
    }

    #[test]
    fn neighboring_records_do_not_clobber_each_other() {
        let geo = Geometry::with_blocks(16);
        let mut vol = test_volume(&geo);

        let mut first = Inode::new_file();
        first.size = 10;
        first.blocks.push(7);
        first.store(&mut vol, &geo, 1).unwrap();

        let second = Inode::new_file();
        second.store(&mut vol, &geo, 2).unwrap();

        assert_eq!(Inode::load(&mut vol, &geo, 1).unwrap().blocks, vec![7]);
        assert!(Inode::load(&mut vol, &geo, 2).unwrap().blocks.is_empty());
    }
}
