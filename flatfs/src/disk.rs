use std::fs::{File, OpenOptions};
use std::io::prelude::*;
use std::io::SeekFrom;
use std::path::Path;

/// Byte-addressed random access to the backing store. Every higher layer
/// talks to the device exclusively through this seam, so tests and tooling
/// can substitute their own medium.
pub trait Volume {
    /// Fills `buf` from the device starting at `offset`.
    ///
    /// # Errors
    ///
    /// Reading past the end of the device returns an error.
    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> std::io::Result<()>;
    /// Writes all of `buf` to the device starting at `offset`.
    fn write_at(&mut self, offset: u64, buf: &[u8]) -> std::io::Result<()>;
    /// Current device length in bytes.
    fn len(&mut self) -> std::io::Result<u64>;
    /// Forces any buffered writes down to the medium.
    fn sync(&mut self) -> std::io::Result<()>;
}

/// A disk image living in a single host file, driven by seek + read/write.
pub struct FileDisk {
    fd: File,
}

impl FileDisk {
    /// Opens an existing image read/write. The engine never formats, so a
    /// missing path is an error rather than a fresh file.
    pub fn open<P: AsRef<Path>>(path: P) -> std::io::Result<Self> {
        let fd = OpenOptions::new().read(true).write(true).open(path)?;
        Ok(FileDisk { fd })
    }

    /// Creates a brand new image file for formatting, failing if the path
    /// already exists.
    pub fn create<P: AsRef<Path>>(path: P) -> std::io::Result<Self> {
        let fd = OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(path)?;
        Ok(FileDisk { fd })
    }

    /// Returns ownership of the underlying file descriptor to the caller.
    pub fn into_file(self) -> File {
        self.fd
    }
}

impl From<File> for FileDisk {
    fn from(fd: File) -> Self {
        FileDisk { fd }
    }
}

impl Volume for FileDisk {
    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> std::io::Result<()> {
        self.fd.seek(SeekFrom::Start(offset))?;
        self.fd.read_exact(buf)
    }

    fn write_at(&mut self, offset: u64, buf: &[u8]) -> std::io::Result<()> {
        self.fd.seek(SeekFrom::Start(offset))?;
        self.fd.write_all(buf)
    }

    fn len(&mut self) -> std::io::Result<u64> {
        Ok(self.fd.metadata()?.len())
    }

    fn sync(&mut self) -> std::io::Result<()> {
        self.fd.sync_all()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_bytes_at_an_offset() {
        let mut disk = FileDisk::from(tempfile::tempfile().unwrap());
        disk.write_at(100, b"flat").unwrap();
        disk.sync().unwrap();

        let mut buf = [0u8; 4];
        disk.read_at(100, &mut buf).unwrap();
        assert_eq!(&buf, b"flat");
        assert_eq!(disk.len().unwrap(), 104);
    }

    #[test]
    fn reading_past_the_end_fails() {
        let mut disk = FileDisk::from(tempfile::tempfile().unwrap());
        disk.write_at(0, &[0xAA; 16]).unwrap();

        let mut buf = [0u8; 8];
        assert!(disk.read_at(12, &mut buf).is_err());
    }

    #[test]
    fn open_refuses_a_missing_path() {
        let dir = tempfile::tempdir().unwrap();
        assert!(FileDisk::open(dir.path().join("no-such-image")).is_err());
    }
}
