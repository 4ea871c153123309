//! A cluster based file system stored inside a single host file.
//!
//! An image is a sequence of fixed size clusters:
//!
//! ```text
//! | SuperBlock | Bitmap (data region) | Inode table | Data region |
//! ```
//!
//! [`Disk`] owns the image and manages clusters and inodes. [`FileSystem`] builds
//! the hierarchical namespace (directories, files and symbolic links) on top of it.
//!
//! ```no_run
//! use clusterfs::{FileSystem, InodeKind};
//!
//! let mut fs = FileSystem::open("disk.img")?;
//! if !fs.is_formatted() {
//!     fs.format(50_000_000)?;
//! }
//! fs.create("/docs", InodeKind::Directory)?;
//! fs.copy_in("notes.txt", Some("/docs"))?;
//! # Ok::<(), clusterfs::FsError>(())
//! ```
#[macro_use]
mod logging;

mod alloc;
mod chain;
mod dir;
mod disk;
mod error;
mod fs;
pub mod io;
mod node;
mod path;
mod sb;

pub use crate::chain::Chain;
pub use crate::dir::{DirectoryItem, DIR_ITEM_SIZE, MAX_NAME_LEN};
pub use crate::disk::{Disk, DiskStats};
pub use crate::error::{FsError, Resource, Result};
pub use crate::fs::{CheckReport, DirEntry, FileSystem, FsInfo, InodeInfo, MAX_SYMLINK_DEPTH};
pub use crate::logging::EventLog;
pub use crate::node::{ClusterIndex, Inode, InodeId, InodeKind};
pub use crate::sb::{FormatOptions, SuperBlock, ROOT_INODE_ID};
