//! The file system facade: mounts a volume and exposes the operation set.
//!
//! Nothing below this layer is cached apart from the occupancy shadow of the
//! descriptor table; every operation resolves its metadata fresh from the
//! volume, then drives the allocator and block store directly.

use std::collections::HashMap;
use std::path::Path;

use log::{debug, info};

use crate::alloc::Bitmap;
use crate::dir::{DirEntry, DirTable};
use crate::disk::{FileDisk, Volume};
use crate::error::{FsError, Result};
use crate::node::{FileKind, Inode};
use crate::sb::{Geometry, HEADER_LEN};

/// Session-scoped reference to an open file, issued by `open` and retired by
/// `close`. Never persisted; a fresh mount starts the numbering over.
pub type Handle = u32;

/// Metadata reported by `stat`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FileStat {
    pub id: u8,
    pub kind: FileKind,
    pub links: u16,
    pub size: u32,
}

/// Everything that exists only while a device is mounted.
struct Session<V> {
    vol: V,
    geo: Geometry,
    /// Shadow of descriptor-table occupancy, indexed by id minus one. It is
    /// rebuilt from the table at mount and updated only after the writes it
    /// mirrors have succeeded, so the two can never diverge.
    live: Vec<bool>,
    /// Open-file table: handle to file id.
    handles: HashMap<Handle, u8>,
    next_handle: Handle,
}

/// A flat file system over any [`Volume`].
///
/// The instance is an explicit device object: callers may hold several,
/// one per backing image, and tests can run them side by side. All
/// operations other than `mount` and `format` require a mounted session
/// and report [`FsError::NotMounted`] otherwise.
pub struct FlatFs<V: Volume> {
    session: Option<Session<V>>,
}

impl<V: Volume> Default for FlatFs<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl FlatFs<FileDisk> {
    /// Opens the image at `path` read/write and mounts it. The file is
    /// never created here; formatting is a separate step.
    pub fn mount_path<P: AsRef<Path>>(&mut self, path: P) -> Result<()> {
        let vol = FileDisk::open(path)?;
        self.mount(vol)
    }
}

impl<V: Volume> FlatFs<V> {
    pub fn new() -> Self {
        Self { session: None }
    }

    /// Lays a fresh image onto the volume: zero-fills the whole device
    /// length, then writes the header. Everything else (empty bitmap, empty
    /// descriptor table, dead inodes) is all zeroes by construction.
    pub fn format(vol: &mut V, geo: &Geometry) -> Result<()> {
        geo.validate()?;

        let zero = vec![0u8; geo.block_size as usize];
        let mut at = 0;
        while at < geo.device_len() {
            let chunk = (geo.device_len() - at).min(zero.len() as u64) as usize;
            vol.write_at(at, &zero[..chunk])?;
            at += chunk as u64;
        }
        vol.write_at(0, &geo.serialize())?;
        vol.sync()?;

        info!("formatted device: {} blocks of {} bytes", geo.block_count, geo.block_size);
        Ok(())
    }

    /// Takes ownership of the volume, validates its header, and rebuilds
    /// the occupancy shadow from the descriptor table. Mounting while
    /// already mounted unmounts first. On any failure the facade is left
    /// unmounted and the volume is dropped.
    pub fn mount(&mut self, mut vol: V) -> Result<()> {
        if self.is_mounted() {
            self.unmount();
        }

        let len = vol.len()?;
        if len < HEADER_LEN {
            return Err(FsError::Format("device too short for a header".to_string()));
        }
        let mut header = [0u8; HEADER_LEN as usize];
        vol.read_at(0, &mut header)?;
        let geo = Geometry::parse(&header)?;

        if len < geo.device_len() {
            return Err(FsError::Format(format!(
                "device is {} bytes but the header implies {}",
                len,
                geo.device_len()
            )));
        }

        let mut live = vec![false; geo.max_files as usize];
        for entry in DirTable::new(&mut vol, &geo).entries()? {
            if u32::from(entry.id) > geo.max_files {
                return Err(FsError::Format(format!(
                    "descriptor entry {:?} has id {} beyond the table",
                    entry.name, entry.id
                )));
            }
            live[entry.id as usize - 1] = true;
        }

        info!(
            "mounted device: {} blocks, {} of {} ids live",
            geo.block_count,
            live.iter().filter(|&&l| l).count(),
            geo.max_files
        );
        self.session = Some(Session {
            vol,
            geo,
            live,
            handles: HashMap::new(),
            next_handle: 0,
        });
        Ok(())
    }

    /// Drops the session: volume handle, geometry, occupancy shadow and the
    /// open-file table. No flush is needed since every write was applied
    /// eagerly.
    pub fn unmount(&mut self) {
        if self.session.take().is_some() {
            info!("unmounted device");
        }
    }

    pub fn is_mounted(&self) -> bool {
        self.session.is_some()
    }

    fn session_mut(&mut self) -> Result<&mut Session<V>> {
        self.session.as_mut().ok_or(FsError::NotMounted)
    }

    /// Free blocks remaining on the device.
    pub fn free_blocks(&mut self) -> Result<u32> {
        let s = self.session_mut()?;
        let geo = s.geo;
        Bitmap::new(&mut s.vol, &geo).free_count()
    }

    /// Creates an empty file. No data blocks are allocated here; growth
    /// happens exclusively through `truncate`.
    pub fn create(&mut self, name: &str) -> Result<()> {
        let s = self.session_mut()?;
        let geo = s.geo;

        if name.as_bytes().len() > geo.name_len as usize {
            return Err(FsError::NameTooLong);
        }

        let mut dir = DirTable::new(&mut s.vol, &geo);
        if dir.find(name)?.is_some() {
            return Err(FsError::AlreadyExists);
        }
        let slot = dir.free_slot()?.ok_or(FsError::TableFull)?;
        // Lowest id not referenced by any descriptor entry.
        let id = s
            .live
            .iter()
            .position(|&used| !used)
            .map(|i| (i + 1) as u8)
            .ok_or(FsError::TableFull)?;
        dir.write_entry(slot, id, name)?;
        Inode::new_file().store(&mut s.vol, &geo, id)?;
        s.live[id as usize - 1] = true;

        debug!("created {:?} as id {}", name, id);
        Ok(())
    }

    /// Binds a second name to an existing file's inode and bumps its link
    /// count: a classic hard link.
    pub fn link(&mut self, existing: &str, new: &str) -> Result<()> {
        let s = self.session_mut()?;
        let geo = s.geo;

        if new.as_bytes().len() > geo.name_len as usize {
            return Err(FsError::NameTooLong);
        }

        let mut dir = DirTable::new(&mut s.vol, &geo);
        if dir.find(new)?.is_some() {
            return Err(FsError::AlreadyExists);
        }
        let id = dir.find(existing)?.ok_or(FsError::NotFound)?;
        let slot = dir.free_slot()?.ok_or(FsError::TableFull)?;
        dir.write_entry(slot, id, new)?;

        let mut node = Inode::load(&mut s.vol, &geo, id)?;
        node.links += 1;
        node.store(&mut s.vol, &geo, id)?;

        debug!("linked {:?} -> id {} as {:?}", existing, id, new);
        Ok(())
    }

    /// Removes one name. When the last link goes, the file's blocks are
    /// returned to the allocator and the inode record is wiped.
    pub fn unlink(&mut self, name: &str) -> Result<()> {
        let s = self.session_mut()?;
        let geo = s.geo;

        let mut dir = DirTable::new(&mut s.vol, &geo);
        let (slot, id) = dir.find_slot(name)?.ok_or(FsError::NotFound)?;
        dir.clear_slot(slot)?;

        let mut node = Inode::load(&mut s.vol, &geo, id)?;
        node.links = node.links.saturating_sub(1);
        if node.links > 0 {
            node.store(&mut s.vol, &geo, id)?;
            return Ok(());
        }

        let mut bmp = Bitmap::new(&mut s.vol, &geo);
        for &block in &node.blocks {
            bmp.set_free(block)?;
        }
        Inode::wipe(&mut s.vol, &geo, id)?;
        s.live[id as usize - 1] = false;

        info!("released id {} and {} blocks", id, node.blocks.len());
        Ok(())
    }

    /// Issues a fresh handle for `name`. Handles are monotonically
    /// increasing for the life of the session; several may reference the
    /// same inode.
    pub fn open(&mut self, name: &str) -> Result<Handle> {
        let s = self.session_mut()?;
        let geo = s.geo;

        let id = DirTable::new(&mut s.vol, &geo)
            .find(name)?
            .ok_or(FsError::NotFound)?;

        s.next_handle += 1;
        s.handles.insert(s.next_handle, id);
        Ok(s.next_handle)
    }

    pub fn close(&mut self, handle: Handle) -> Result<()> {
        let s = self.session_mut()?;
        s.handles
            .remove(&handle)
            .map(|_| ())
            .ok_or(FsError::HandleNotOpen)
    }

    /// Writes `data` at `offset` within the file's current size. A file is
    /// never grown implicitly: a range past the end is `OutOfRange`, not an
    /// extension.
    pub fn write(&mut self, handle: Handle, offset: u32, data: &[u8]) -> Result<()> {
        let s = self.session_mut()?;
        let geo = s.geo;

        let id = *s.handles.get(&handle).ok_or(FsError::HandleNotOpen)?;
        let node = Inode::load(&mut s.vol, &geo, id)?;
        check_range(&geo, &node, offset, data.len() as u64)?;

        let bs = u64::from(geo.block_size);
        let mut done = 0usize;
        let mut at = u64::from(offset);
        while done < data.len() {
            let within = at % bs;
            let chunk = ((bs - within).min((data.len() - done) as u64)) as usize;
            let block = node.blocks[(at / bs) as usize];
            s.vol
                .write_at(geo.block_at(block) + within, &data[done..done + chunk])?;
            done += chunk;
            at += chunk as u64;
        }
        Ok(())
    }

    /// Reads `size` bytes starting at `offset`, with the same bounds rule
    /// as `write`.
    pub fn read(&mut self, handle: Handle, offset: u32, size: u32) -> Result<Vec<u8>> {
        let s = self.session_mut()?;
        let geo = s.geo;

        let id = *s.handles.get(&handle).ok_or(FsError::HandleNotOpen)?;
        let node = Inode::load(&mut s.vol, &geo, id)?;
        check_range(&geo, &node, offset, u64::from(size))?;

        let bs = u64::from(geo.block_size);
        let mut payload = vec![0u8; size as usize];
        let mut done = 0usize;
        let mut at = u64::from(offset);
        while done < payload.len() {
            let within = at % bs;
            let chunk = ((bs - within).min((payload.len() - done) as u64)) as usize;
            let block = node.blocks[(at / bs) as usize];
            s.vol
                .read_at(geo.block_at(block) + within, &mut payload[done..done + chunk])?;
            done += chunk;
            at += chunk as u64;
        }
        Ok(payload)
    }

    /// Resizes a file by name. Admission is all-or-nothing: the request is
    /// checked against the free-block count (and the inode's slot capacity)
    /// before anything is mutated, and growth claims its blocks only after
    /// all of them have been gathered.
    pub fn truncate(&mut self, name: &str, new_size: u32) -> Result<()> {
        let s = self.session_mut()?;
        let geo = s.geo;

        let id = DirTable::new(&mut s.vol, &geo)
            .find(name)?
            .ok_or(FsError::NotFound)?;
        let mut node = Inode::load(&mut s.vol, &geo, id)?;

        let free = Bitmap::new(&mut s.vol, &geo).free_count()?;
        if u64::from(new_size) > u64::from(free) * u64::from(geo.block_size) {
            return Err(FsError::CapacityExceeded);
        }
        let need = geo.blocks_needed(new_size);
        if need > geo.slots_per_inode() {
            return Err(FsError::CapacityExceeded);
        }

        let have = node.blocks.len() as u32;
        if need > have {
            let fresh = Bitmap::new(&mut s.vol, &geo)
                .take_free(need - have)?
                .ok_or(FsError::CapacityExceeded)?;
            if let Err(err) = apply_grow(&mut s.vol, &geo, id, &mut node, &fresh, new_size) {
                // Back out whatever the failed apply already claimed.
                let mut bmp = Bitmap::new(&mut s.vol, &geo);
                for &block in &node.blocks[have as usize..] {
                    let _ = bmp.set_free(block);
                }
                return Err(err);
            }
        } else if need < have {
            // Shrink: drop size first, then free each block past the new
            // tail and clear its slot.
            node.size = new_size;
            let doomed = node.blocks.split_off(need as usize);
            node.store(&mut s.vol, &geo, id)?;
            let mut bmp = Bitmap::new(&mut s.vol, &geo);
            for &block in &doomed {
                bmp.set_free(block)?;
            }
        } else {
            node.size = new_size;
            node.store(&mut s.vol, &geo, id)?;
        }

        debug!(
            "truncated {:?} to {} bytes ({} -> {} blocks)",
            name, new_size, have, need
        );
        Ok(())
    }

    /// Reports kind, link count and size for a live id.
    pub fn stat(&mut self, id: u8) -> Result<FileStat> {
        let s = self.session_mut()?;
        let geo = s.geo;

        if id == 0 || u32::from(id) > geo.max_files || !s.live[id as usize - 1] {
            return Err(FsError::NotFound);
        }
        let node = Inode::load(&mut s.vol, &geo, id)?;
        Ok(FileStat {
            id,
            kind: node.kind,
            links: node.links,
            size: node.size,
        })
    }

    /// The directory listing, one record per occupied slot, in table order.
    pub fn list(&mut self) -> Result<Vec<DirEntry>> {
        let s = self.session_mut()?;
        let geo = s.geo;
        DirTable::new(&mut s.vol, &geo).entries()
    }
}

/// Shared bounds check for the read/write engine: the range must lie inside
/// the file's current size, and the block list must actually cover it.
fn check_range(geo: &Geometry, node: &Inode, offset: u32, len: u64) -> Result<()> {
    if u64::from(offset) + len > u64::from(node.size) {
        return Err(FsError::OutOfRange);
    }
    if geo.blocks_needed(node.size) as usize > node.blocks.len() {
        return Err(FsError::Format(
            "inode block list does not cover its size".to_string(),
        ));
    }
    Ok(())
}

/// The apply phase of growth: claim each gathered block, zero-fill it, and
/// append its slot; the new size is persisted last. The caller rolls the
/// bitmap back if this returns early.
fn apply_grow<V: Volume>(
    vol: &mut V,
    geo: &Geometry,
    id: u8,
    node: &mut Inode,
    fresh: &[u32],
    new_size: u32,
) -> Result<()> {
    let zero = vec![0u8; geo.block_size as usize];
    for &block in fresh {
        Bitmap::new(vol, geo).set_used(block)?;
        vol.write_at(geo.block_at(block), &zero)?;
        node.blocks.push(block);
    }
    node.size = new_size;
    node.store(vol, geo, id)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_fs(blocks: u32) -> FlatFs<FileDisk> {
        let mut vol = FileDisk::from(tempfile::tempfile().unwrap());
        FlatFs::format(&mut vol, &Geometry::with_blocks(blocks)).unwrap();

        let mut fs = FlatFs::new();
        fs.mount(vol).unwrap();
        fs
    }

    #[test]
    fn operations_before_mount_report_not_mounted() {
        let mut fs: FlatFs<FileDisk> = FlatFs::new();
        assert!(matches!(fs.create("a"), Err(FsError::NotMounted)));
        assert!(matches!(fs.open("a"), Err(FsError::NotMounted)));
        assert!(matches!(fs.list(), Err(FsError::NotMounted)));
        assert!(!fs.is_mounted());
    }

    #[test]
    fn create_rejects_duplicates_and_long_names() {
        let mut fs = test_fs(16);
        fs.create("notes").unwrap();
        assert!(matches!(fs.create("notes"), Err(FsError::AlreadyExists)));
        assert!(matches!(
            fs.create("ninechars"),
            Err(FsError::NameTooLong)
        ));
    }

    #[test]
    fn ids_start_at_one_and_reuse_the_lowest_free() {
        let mut fs = test_fs(16);
        fs.create("a").unwrap();
        fs.create("b").unwrap();
        assert_eq!(fs.stat(1).unwrap().id, 1);
        assert_eq!(fs.stat(2).unwrap().id, 2);

        fs.unlink("a").unwrap();
        fs.create("c").unwrap();
        // Id 1 came free and is handed out again.
        let listing = fs.list().unwrap();
        assert!(listing.iter().any(|e| e.name == "c" && e.id == 1));
    }

    #[test]
    fn descriptor_table_fills_up() {
        let mut fs = test_fs(16);
        for i in 0..9 {
            fs.create(&format!("f{}", i)).unwrap();
        }
        assert!(matches!(fs.create("one-more"), Err(FsError::TableFull)));
    }

    #[test]
    fn handles_are_monotonic_within_a_session() {
        let mut fs = test_fs(16);
        fs.create("x").unwrap();
        assert_eq!(fs.open("x").unwrap(), 1);
        assert_eq!(fs.open("x").unwrap(), 2);
        fs.close(1).unwrap();
        assert!(matches!(fs.close(1), Err(FsError::HandleNotOpen)));
        assert_eq!(fs.open("x").unwrap(), 3);
    }

    #[test]
    fn write_never_grows_a_file() {
        let mut fs = test_fs(16);
        fs.create("x").unwrap();
        let fd = fs.open("x").unwrap();
        assert!(matches!(fs.write(fd, 0, b"hi"), Err(FsError::OutOfRange)));

        fs.truncate("x", 4).unwrap();
        assert!(matches!(fs.write(fd, 3, b"hi"), Err(FsError::OutOfRange)));
        fs.write(fd, 2, b"hi").unwrap();
    }

    #[test]
    fn stat_reports_dead_ids_as_missing() {
        let mut fs = test_fs(16);
        assert!(matches!(fs.stat(0), Err(FsError::NotFound)));
        assert!(matches!(fs.stat(1), Err(FsError::NotFound)));
        assert!(matches!(fs.stat(200), Err(FsError::NotFound)));
    }

    #[test]
    fn mount_refuses_an_unformatted_volume() {
        let mut vol = FileDisk::from(tempfile::tempfile().unwrap());
        vol.write_at(0, &[0u8; 4096]).unwrap();

        let mut fs = FlatFs::new();
        assert!(matches!(fs.mount(vol), Err(FsError::Format(_))));
        assert!(!fs.is_mounted());
    }

    #[test]
    fn mount_path_fails_without_side_effects_for_a_missing_image() {
        let dir = tempfile::tempdir().unwrap();
        let mut fs = FlatFs::new();
        assert!(matches!(
            fs.mount_path(dir.path().join("missing.img")),
            Err(FsError::Io(_))
        ));
        assert!(!fs.is_mounted());
    }
}
