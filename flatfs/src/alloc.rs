use crate::disk::Volume;
use crate::error::Result;
use crate::sb::Geometry;

const FREE: u8 = 0;
const USED: u8 = 1;

#[derive(Debug, PartialEq)]
pub(crate) enum State {
    Free,
    Used,
}

/// View over the on-disk allocation map: one byte per data block. The view
/// holds no state of its own, so every query re-reads the volume and every
/// mutation lands on it immediately.
///
/// Allocation is strictly first-fit from block zero. There is no free list
/// and no best-fit search; the scan order is part of the observable contract.
pub(crate) struct Bitmap<'a, V: Volume> {
    vol: &'a mut V,
    geo: &'a Geometry,
}

impl<'a, V: Volume> Bitmap<'a, V> {
    pub fn new(vol: &'a mut V, geo: &'a Geometry) -> Self {
        Self { vol, geo }
    }

    fn region(&mut self) -> Result<Vec<u8>> {
        let mut units = vec![0u8; self.geo.block_count as usize];
        self.vol.read_at(self.geo.bitmap_start(), &mut units)?;
        Ok(units)
    }

    #[allow(dead_code)]
    pub fn state(&mut self, block: u32) -> Result<State> {
        debug_assert!(block < self.geo.block_count);
        let mut unit = [0u8; 1];
        self.vol
            .read_at(self.geo.bitmap_start() + u64::from(block), &mut unit)?;
        Ok(if unit[0] == FREE {
            State::Free
        } else {
            State::Used
        })
    }

    /// The lowest free block, if any.
    pub fn find_free(&mut self) -> Result<Option<u32>> {
        let units = self.region()?;
        Ok(units.iter().position(|&u| u == FREE).map(|i| i as u32))
    }

    pub fn free_count(&mut self) -> Result<u32> {
        let units = self.region()?;
        Ok(units.iter().filter(|&&u| u == FREE).count() as u32)
    }

    /// The first `want` free blocks in scan order, without claiming any of
    /// them. Callers mark the blocks used themselves once the whole
    /// operation is certain to go through.
    pub fn take_free(&mut self, want: u32) -> Result<Option<Vec<u32>>> {
        let units = self.region()?;
        let free: Vec<u32> = units
            .iter()
            .enumerate()
            .filter(|(_, &u)| u == FREE)
            .map(|(i, _)| i as u32)
            .take(want as usize)
            .collect();
        if (free.len() as u32) < want {
            return Ok(None);
        }
        Ok(Some(free))
    }

    pub fn set_used(&mut self, block: u32) -> Result<()> {
        self.put(block, USED)
    }

    pub fn set_free(&mut self, block: u32) -> Result<()> {
        self.put(block, FREE)
    }

    fn put(&mut self, block: u32, unit: u8) -> Result<()> {
        debug_assert!(block < self.geo.block_count);
        self.vol
            .write_at(self.geo.bitmap_start() + u64::from(block), &[unit])?;
        Ok(())
    }
}
