//! A miniature disk-backed file system living inside a single host file.
//!
//! The image holds a self-describing header, a free-space bitmap, a flat
//! descriptor table (the single directory), an inode table, and fixed-size
//! data blocks. [`FlatFs`] mounts a [`Volume`] over that layout and exposes
//! create, open/close, read/write, link/unlink, truncate, stat and list.
//! There is no journaling, no concurrency and no directory hierarchy;
//! exactly one session owns the volume for its lifetime.

mod alloc;
mod dir;
mod disk;
mod error;
mod fs;
mod node;
mod sb;

pub use crate::dir::DirEntry;
pub use crate::disk::{FileDisk, Volume};
pub use crate::error::{FsError, Result};
pub use crate::fs::{FileStat, FlatFs, Handle};
pub use crate::node::FileKind;
pub use crate::sb::Geometry;
