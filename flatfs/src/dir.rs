use crate::disk::Volume;
use crate::error::Result;
use crate::sb::Geometry;

/// One occupied descriptor slot: the flat namespace maps names to file ids.
/// Several entries may carry the same id; that is what a hard link is.
#[derive(Debug, Clone, PartialEq)]
pub struct DirEntry {
    pub id: u8,
    pub name: String,
}

/// View over the on-disk descriptor table. Like the allocator it keeps no
/// state: every lookup scans the table region fresh from the volume.
///
/// A record is an id byte followed by the NUL-padded name; id zero marks an
/// empty slot. The slot index is not the file id.
pub(crate) struct DirTable<'a, V: Volume> {
    vol: &'a mut V,
    geo: &'a Geometry,
}

impl<'a, V: Volume> DirTable<'a, V> {
    pub fn new(vol: &'a mut V, geo: &'a Geometry) -> Self {
        Self { vol, geo }
    }

    fn region(&mut self) -> Result<Vec<u8>> {
        let mut records = vec![0u8; self.geo.desc_len() as usize];
        self.vol.read_at(self.geo.desc_start(), &mut records)?;
        Ok(records)
    }

    fn slot_at(&self, slot: u32) -> u64 {
        self.geo.desc_start() + u64::from(slot) * self.geo.desc_entry_len()
    }

    /// Occupied slots in table order.
    pub fn entries(&mut self) -> Result<Vec<DirEntry>> {
        let records = self.region()?;
        let entry_len = self.geo.desc_entry_len() as usize;

        let mut listing = Vec::new();
        for slot in 0..self.geo.max_files as usize {
            let record = &records[slot * entry_len..(slot + 1) * entry_len];
            if record[0] == 0 {
                continue;
            }
            listing.push(DirEntry {
                id: record[0],
                name: decode_name(&record[1..]),
            });
        }
        Ok(listing)
    }

    /// Resolves a name to its file id. Creation rejects duplicates, so at
    /// most one slot can match.
    pub fn find(&mut self, name: &str) -> Result<Option<u8>> {
        Ok(self
            .entries()?
            .into_iter()
            .find(|entry| entry.name == name)
            .map(|entry| entry.id))
    }

    /// Like `find`, but also reports which slot holds the entry so the
    /// caller can clear it.
    pub fn find_slot(&mut self, name: &str) -> Result<Option<(u32, u8)>> {
        let records = self.region()?;
        let entry_len = self.geo.desc_entry_len() as usize;

        for slot in 0..self.geo.max_files as usize {
            let record = &records[slot * entry_len..(slot + 1) * entry_len];
            if record[0] != 0 && decode_name(&record[1..]) == name {
                return Ok(Some((slot as u32, record[0])));
            }
        }
        Ok(None)
    }

    /// The first empty slot, if the table is not full.
    pub fn free_slot(&mut self) -> Result<Option<u32>> {
        let records = self.region()?;
        let entry_len = self.geo.desc_entry_len() as usize;

        for slot in 0..self.geo.max_files as usize {
            if records[slot * entry_len] == 0 {
                return Ok(Some(slot as u32));
            }
        }
        Ok(None)
    }

    pub fn write_entry(&mut self, slot: u32, id: u8, name: &str) -> Result<()> {
        debug_assert!(name.as_bytes().len() <= self.geo.name_len as usize);

        let mut record = vec![0u8; self.geo.desc_entry_len() as usize];
        record[0] = id;
        record[1..=name.as_bytes().len()].copy_from_slice(name.as_bytes());
        self.vol.write_at(self.slot_at(slot), &record)?;
        Ok(())
    }

    /// Blanks a slot back to the empty sentinel.
    pub fn clear_slot(&mut self, slot: u32) -> Result<()> {
        let record = vec![0u8; self.geo.desc_entry_len() as usize];
        self.vol.write_at(self.slot_at(slot), &record)?;
        Ok(())
    }
}

fn decode_name(raw: &[u8]) -> String {
    let end = raw.iter().position(|&b| b == 0).unwrap_or(raw.len());
    String::from_utf8_lossy(&raw[..end]).into_owned()
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
    fn entries_come_back_in_slot_order() {
        let geo = Geometry::with_blocks(16);
        let mut vol = test_volume(&geo);
        let mut dir = DirTable::new(&mut vol, &geo);

        dir.write_entry(0, 1, "alpha").unwrap();
        dir.write_entry(2, 2, "beta").unwrap();

        let listing = dir.entries().unwrap();
        assert_eq!(
            listing,
            vec![
                DirEntry {
                    id: 1,
                    name: "alpha".to_string()
                },
                DirEntry {
                    id: 2,
                    name: "beta".to_string()
                },
            ]
        );
    }

    #[test]
    fn find_resolves_names_and_ignores_cleared_slots() {
        let geo = Geometry::with_blocks(16);
        let mut vol = test_volume(&geo);
        let mut dir = DirTable::new(&mut vol, &geo);

        dir.write_entry(0, 1, "a").unwrap();
        dir.write_entry(1, 1, "b").unwrap();
        assert_eq!(dir.find("b").unwrap(), Some(1));

        dir.clear_slot(1).unwrap();
        assert_eq!(dir.find("b").unwrap(), None);
        assert_eq!(dir.find("a").unwrap(), Some(1));
    }

    #[test]
    fn free_slot_reuses_cleared_entries() {
        let geo = Geometry::with_blocks(16);
        let mut vol = test_volume(&geo);
        let mut dir = DirTable::new(&mut vol, &geo);

        assert_eq!(dir.free_slot().unwrap(), Some(0));
        dir.write_entry(0, 1, "a").unwrap();
        dir.write_entry(1, 2, "b").unwrap();
        assert_eq!(dir.free_slot().unwrap(), Some(2));

        dir.clear_slot(0).unwrap();
        assert_eq!(dir.free_slot().unwrap(), Some(0));
    }

    #[test]
    fn names_use_the_full_fixed_width() {
        let geo = Geometry::with_blocks(16);
        let mut vol = test_volume(&geo);
        let mut dir = DirTable::new(&mut vol, &geo);

        dir.write_entry(0, 1, "eightchr").unwrap();
        assert_eq!(dir.find("eightchr").unwrap(), Some(1));
        assert_eq!(dir.find("eight").unwrap(), None);
    }
}
