use zerocopy::byteorder::{BigEndian, U32, U64};
use zerocopy::{AsBytes, FromBytes, FromZeroes, Unaligned};

use crate::error::{FsError, Result};

pub type InodeId = u32;
/// Index of a cluster inside the data region.
pub type ClusterIndex = u32;

pub const INODE_SIZE: usize = 64;
pub const NUM_DIRECT_POINTERS: usize = 5;
/// Marks an unused cluster pointer on disk.
const NULL_POINTER: u32 = u32::MAX;

const FLAG_USED: u8 = 0b0000_0001;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InodeKind {
    File,
    Directory,
    Symlink,
}

impl InodeKind {
    fn code(self) -> u8 {
        match self {
            InodeKind::File => 1,
            InodeKind::Directory => 2,
            InodeKind::Symlink => 3,
        }
    }

    fn from_code(code: u8) -> Option<Self> {
        match code {
            1 => Some(InodeKind::File),
            2 => Some(InodeKind::Directory),
            3 => Some(InodeKind::Symlink),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            InodeKind::File => "file",
            InodeKind::Directory => "directory",
            InodeKind::Symlink => "symbolic link",
        }
    }
}

/// On-disk inode record. Every multi-byte field is big endian and the struct has no
/// padding, so the byte image is identical on every host.
///
/// This structure __must be exactly 64 bytes.__
#[repr(C)]
#[derive(AsBytes, FromBytes, FromZeroes, Unaligned, Clone, Copy)]
struct RawInode {
    id: U32<BigEndian>,
    flags: u8,
    kind: u8,
    reserved0: [u8; 2],
    /// The total size of the content in bytes.
    size: U64<BigEndian>,
    direct: [U32<BigEndian>; NUM_DIRECT_POINTERS],
    /// Cluster of pointers to data clusters.
    single_indirect: U32<BigEndian>,
    /// Cluster of pointers to clusters of pointers to data clusters.
    double_indirect: U32<BigEndian>,
    /// Reserved for future expansion up to the 64 byte limit.
    reserved1: [u8; 20],
}

fn pointer(raw: U32<BigEndian>) -> Option<ClusterIndex> {
    match raw.get() {
        NULL_POINTER => None,
        nr => Some(nr),
    }
}

fn raw_pointer(ptr: Option<ClusterIndex>) -> U32<BigEndian> {
    U32::new(ptr.unwrap_or(NULL_POINTER))
}

/// In-memory view of an inode slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Inode {
    pub id: InodeId,
    pub free: bool,
    pub kind: InodeKind,
    pub size: u64,
    pub direct: [Option<ClusterIndex>; NUM_DIRECT_POINTERS],
    pub single_indirect: Option<ClusterIndex>,
    pub double_indirect: Option<ClusterIndex>,
}

impl Inode {
    pub fn free(id: InodeId) -> Self {
        Self {
            id,
            free: true,
            kind: InodeKind::File,
            size: 0,
            direct: [None; NUM_DIRECT_POINTERS],
            single_indirect: None,
            double_indirect: None,
        }
    }

    pub fn is_dir(&self) -> bool {
        self.kind == InodeKind::Directory
    }

    /// Whether any cluster is still attached to this inode.
    pub fn has_clusters(&self) -> bool {
        self.direct.iter().any(Option::is_some)
            || self.single_indirect.is_some()
            || self.double_indirect.is_some()
    }

    fn to_raw(&self) -> RawInode {
        let mut direct = [U32::new(NULL_POINTER); NUM_DIRECT_POINTERS];
        for (slot, ptr) in direct.iter_mut().zip(self.direct.iter()) {
            *slot = raw_pointer(*ptr);
        }
        RawInode {
            id: U32::new(self.id),
            flags: if self.free { 0 } else { FLAG_USED },
            kind: self.kind.code(),
            reserved0: [0; 2],
            size: U64::new(self.size),
            direct,
            single_indirect: raw_pointer(self.single_indirect),
            double_indirect: raw_pointer(self.double_indirect),
            reserved1: [0; 20],
        }
    }

    fn from_raw(slot: InodeId, raw: &RawInode) -> Result<Self> {
        // A zeroed slot is a free inode that has never been written.
        if raw.flags & FLAG_USED == 0 {
            return Ok(Self::free(slot));
        }
        if raw.id.get() != slot {
            return Err(FsError::Corrupted(format!(
                "inode slot {} records id {}",
                slot,
                raw.id.get()
            )));
        }
        let kind = InodeKind::from_code(raw.kind).ok_or_else(|| {
            FsError::Corrupted(format!("inode {} has unknown kind {}", slot, raw.kind))
        })?;
        let mut direct = [None; NUM_DIRECT_POINTERS];
        for (slot, ptr) in direct.iter_mut().zip(raw.direct.iter()) {
            *slot = pointer(*ptr);
        }
        Ok(Self {
            id: slot,
            free: false,
            kind,
            size: raw.size.get(),
            direct,
            single_indirect: pointer(raw.single_indirect),
            double_indirect: pointer(raw.double_indirect),
        })
    }
}

/// All inode slots of the image, kept in memory and written back one table block at
/// a time.
pub struct InodeTable {
    nodes: Vec<Inode>,
    cluster_size: usize,
}

impl InodeTable {
    pub fn new(count: u32, cluster_size: u32) -> Self {
        Self {
            nodes: (0..count).map(Inode::free).collect(),
            cluster_size: cluster_size as usize,
        }
    }

    /// Decodes `count` inodes from the raw inode table region.
    pub fn load(region: &[u8], count: u32, cluster_size: u32) -> Result<Self> {
        let needed = count as usize * INODE_SIZE;
        if region.len() < needed {
            return Err(FsError::Corrupted(format!(
                "inode table needs {} bytes, region has {}",
                needed,
                region.len()
            )));
        }
        let nodes = region[..needed]
            .chunks_exact(INODE_SIZE)
            .zip(0..count)
            .map(|(bytes, id)| {
                let raw = RawInode::read_from(bytes).ok_or_else(|| {
                    FsError::Corrupted(format!("inode {} record is malformed", id))
                })?;
                Inode::from_raw(id, &raw)
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            nodes,
            cluster_size: cluster_size as usize,
        })
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn get(&self, id: InodeId) -> Option<&Inode> {
        self.nodes.get(id as usize)
    }

    /// Overwrites the slot `node.id` points at.
    pub fn put(&mut self, node: Inode) {
        let id = node.id as usize;
        self.nodes[id] = node;
    }

    pub fn lowest_free(&self) -> Option<InodeId> {
        self.nodes.iter().find(|n| n.free).map(|n| n.id)
    }

    pub fn used(&self) -> impl Iterator<Item = &Inode> {
        self.nodes.iter().filter(|n| !n.free)
    }

    pub fn count_used(&self) -> usize {
        self.used().count()
    }

    fn nodes_per_block(&self) -> usize {
        self.cluster_size / INODE_SIZE
    }

    /// Table block (relative to the start of the table) holding inode `id`.
    pub fn block_of(&self, id: InodeId) -> usize {
        id as usize / self.nodes_per_block()
    }

    /// Number of table blocks holding at least one inode.
    pub fn blocks(&self) -> usize {
        (self.nodes.len() + self.nodes_per_block() - 1) / self.nodes_per_block()
    }

    /// Serializes an entire disk block of inodes for writing to disk.
    pub fn serialize_block(&self, block: usize) -> Vec<u8> {
        let mut block_buf = vec![0; self.cluster_size];
        let per_block = self.nodes_per_block();
        let start = (block * per_block).min(self.nodes.len());
        let end = (start + per_block).min(self.nodes.len());
        for (i, node) in self.nodes[start..end].iter().enumerate() {
            let offset = i * INODE_SIZE;
            block_buf[offset..offset + INODE_SIZE].copy_from_slice(node.to_raw().as_bytes());
        }
        block_buf
    }
}
