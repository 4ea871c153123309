use std::fmt;

use thiserror::Error;

/// The kind of on-disk resource an allocation ran out of.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resource {
    Inodes,
    Clusters,
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Resource::Inodes => write!(f, "inodes"),
            Resource::Clusters => write!(f, "clusters"),
        }
    }
}

#[derive(Error, Debug)]
pub enum FsError {
    #[error("invalid configuration: {0}")]
    Configuration(String),
    #[error("disk is not formatted")]
    NotInitialized,
    #[error("no free {0} left")]
    ResourceExhausted(Resource),
    #[error("cluster {index} is out of bounds (data region has {limit} clusters)")]
    OutOfBounds { index: u64, limit: u64 },
    #[error("no such file or directory: {0}")]
    NotFound(String),
    #[error("already exists: {0}")]
    AlreadyExists(String),
    #[error("not a directory: {0}")]
    NotADirectory(String),
    #[error("is a directory: {0}")]
    IsADirectory(String),
    #[error("directory not empty: {0}")]
    DirectoryNotEmpty(String),
    #[error("cannot replace {existing} with {incoming}: {path}")]
    CrossKind {
        path: String,
        existing: &'static str,
        incoming: &'static str,
    },
    #[error("too many levels of symbolic links: {0}")]
    TooManySymbolicLinks(String),
    #[error("invalid name: {0:?}")]
    InvalidName(String),
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("file of {size} bytes exceeds the maximum of {max} bytes")]
    FileTooLarge { size: u64, max: u64 },
    #[error("corrupted disk structure: {0}")]
    Corrupted(String),
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, FsError>;
