//! Cluster and inode management on top of a block device backed by a host file.

use std::fs::{File, OpenOptions};
use std::io::{BufReader, BufWriter, ErrorKind, Read, Write};
use std::path::{Path, PathBuf};

use crate::alloc::{Bitmap, NextAvailableAllocation, State};
use crate::chain::{self, Chain};
use crate::dir::Directory;
use crate::error::{FsError, Resource, Result};
use crate::io::{BlockStorage, FileBlockEmulator, FileBlockEmulatorBuilder};
use crate::logging::EventLog;
use crate::node::{ClusterIndex, Inode, InodeId, InodeKind, InodeTable, NUM_DIRECT_POINTERS};
use crate::sb::{FormatOptions, SuperBlock, ROOT_INODE_ID, SUPERBLOCK_SIZE};

/// Allocation counters of a formatted image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DiskStats {
    pub cluster_size: u32,
    pub cluster_count: u32,
    pub used_clusters: u32,
    pub inode_count: u32,
    pub used_inodes: u32,
}

impl DiskStats {
    pub fn free_clusters(&self) -> u32 {
        self.cluster_count - self.used_clusters
    }
}

/// The structures of a formatted image, cached in memory.
struct Mounted {
    dev: FileBlockEmulator,
    log: EventLog,
    sb: SuperBlock,
    bitmap: Bitmap,
    inodes: InodeTable,
}

fn read_region(dev: &mut FileBlockEmulator, first: usize, count: usize) -> Result<Vec<u8>> {
    let block_size = dev.block_size();
    let mut region = vec![0; count * block_size];
    for (i, block) in region.chunks_exact_mut(block_size).enumerate() {
        dev.read_block(first + i, block)?;
    }
    Ok(region)
}

impl Mounted {
    fn load(mut dev: FileBlockEmulator, sb: SuperBlock, log: EventLog) -> Result<Self> {
        if dev.block_count() < sb.total_blocks() {
            return Err(FsError::Corrupted(format!(
                "image holds {} clusters, superblock describes {}",
                dev.block_count(),
                sb.total_blocks()
            )));
        }
        let region = read_region(&mut dev, sb.bitmap_block(), sb.bitmap_blocks())?;
        let bitmap = Bitmap::parse(&region, sb.cluster_count as usize)?;
        let region = read_region(&mut dev, sb.inode_table_block(), sb.inode_table_blocks())?;
        let inodes = InodeTable::load(&region, sb.inode_count, sb.cluster_size)?;
        match inodes.get(sb.root_inode) {
            Some(root) if !root.free && root.is_dir() => (),
            _ => {
                return Err(FsError::Corrupted(
                    "root inode is not an allocated directory".to_string(),
                ))
            }
        }
        Ok(Self {
            dev,
            log,
            sb,
            bitmap,
            inodes,
        })
    }

    fn cluster_size(&self) -> usize {
        self.sb.cluster_size as usize
    }

    fn check_cluster(&self, index: ClusterIndex) -> Result<()> {
        if index >= self.sb.cluster_count {
            return Err(FsError::OutOfBounds {
                index: index as u64,
                limit: self.sb.cluster_count as u64,
            });
        }
        Ok(())
    }

    fn read_data(&mut self, index: ClusterIndex, buf: &mut [u8]) -> Result<()> {
        self.check_cluster(index)?;
        self.dev.read_block(self.sb.data_block(index), buf)?;
        Ok(())
    }

    fn write_data(&mut self, index: ClusterIndex, buf: &[u8]) -> Result<()> {
        self.check_cluster(index)?;
        self.dev.write_block(self.sb.data_block(index), buf)?;
        Ok(())
    }

    fn persist_bitmap(&mut self) -> Result<()> {
        let first = self.sb.bitmap_block();
        let block_size = self.cluster_size();
        for (i, chunk) in self.bitmap.serialize().chunks(block_size).enumerate() {
            self.dev.write_block(first + i, chunk)?;
        }
        Ok(())
    }

    fn persist_table_block(&mut self, block: usize) -> Result<()> {
        let buf = self.inodes.serialize_block(block);
        self.dev
            .write_block(self.sb.inode_table_block() + block, &buf)?;
        Ok(())
    }

    fn persist_inode(&mut self, id: InodeId) -> Result<()> {
        self.persist_table_block(self.inodes.block_of(id))
    }

    fn inode(&self, id: InodeId) -> Result<&Inode> {
        self.inodes.get(id).ok_or_else(|| {
            FsError::InvalidArgument(format!(
                "inode {} does not exist (table has {})",
                id,
                self.inodes.len()
            ))
        })
    }

    fn used_inode(&self, id: InodeId) -> Result<&Inode> {
        let node = self.inode(id)?;
        if node.free {
            return Err(FsError::NotFound(format!("inode {}", id)));
        }
        Ok(node)
    }

    fn read_pointers(&mut self, cluster: ClusterIndex, count: usize) -> Result<Vec<ClusterIndex>> {
        let mut buf = vec![0; self.cluster_size()];
        self.read_data(cluster, &mut buf)?;
        let pointers = chain::decode_pointers(&buf, count)?;
        for &pointer in &pointers {
            self.check_cluster(pointer)?;
        }
        Ok(pointers)
    }

    /// Follows the pointers of `node` to every cluster it owns.
    fn read_chain(&mut self, node: &Inode) -> Result<Chain> {
        let p = self.sb.pointers_per_cluster() as usize;
        let count = chain::data_clusters_for(node.size, self.sb.cluster_size) as usize;
        let missing =
            || FsError::Corrupted(format!("inode {} is missing cluster pointers", node.id));

        let mut chain = Chain::default();
        for pointer in node.direct.iter().take(count.min(NUM_DIRECT_POINTERS)) {
            let cluster = pointer.ok_or_else(missing)?;
            self.check_cluster(cluster)?;
            chain.data.push(cluster);
        }
        let mut rest = count.saturating_sub(NUM_DIRECT_POINTERS);
        if rest > 0 {
            let single = node.single_indirect.ok_or_else(missing)?;
            let n = rest.min(p);
            chain.index.push(single);
            chain.data.extend(self.read_pointers(single, n)?);
            rest -= n;
        }
        if rest > 0 {
            let double = node.double_indirect.ok_or_else(missing)?;
            chain.index.push(double);
            for cluster in self.read_pointers(double, (rest + p - 1) / p)? {
                let n = rest.min(p);
                chain.index.push(cluster);
                chain.data.extend(self.read_pointers(cluster, n)?);
                rest -= n;
            }
        }
        Ok(chain)
    }

    fn create_inode<F>(&mut self, kind: InodeKind, content: F) -> Result<InodeId>
    where
        F: FnOnce(InodeId) -> Vec<u8>,
    {
        let id = self
            .inodes
            .lowest_free()
            .ok_or(FsError::ResourceExhausted(Resource::Inodes))?;
        let bytes = content(id);
        self.store(id, kind, bytes.len() as u64, bytes.as_slice(), false)?;
        Ok(id)
    }

    /// Whether `len` bytes fit in free clusters without touching any existing chain.
    fn can_stage(&self, len: u64) -> bool {
        self.bitmap
            .has_free(chain::clusters_for(len, self.sb.cluster_size) as usize)
    }

    /// Replaces the content of inode `id` with `len` bytes read from `reader`.
    ///
    /// With `reuse` the clusters already owned by the inode are overwritten in place
    /// and only the difference is claimed; otherwise the content is staged in fresh
    /// clusters and the old ones are released once the inode points at the new chain.
    /// When a step fails before the inode is updated every freshly claimed cluster is
    /// returned to the bitmap.
    fn store<R: Read>(
        &mut self,
        id: InodeId,
        kind: InodeKind,
        len: u64,
        mut reader: R,
        reuse: bool,
    ) -> Result<()> {
        let max = self.sb.max_file_size();
        if len > max {
            return Err(FsError::FileTooLarge { size: len, max });
        }
        let current = self.inode(id)?.clone();
        let old = if current.free {
            Chain::default()
        } else {
            self.read_chain(&current)?
        };

        let data_count = chain::data_clusters_for(len, self.sb.cluster_size) as usize;
        let need = data_count
            + chain::index_clusters_for(data_count as u64, self.sb.pointers_per_cluster()) as usize;
        let pool: Vec<ClusterIndex> = if reuse {
            old.clusters().collect()
        } else {
            Vec::new()
        };
        let reused = need.min(pool.len());
        let extra = need - reused;
        if !self.bitmap.has_free(extra) {
            return Err(FsError::ResourceExhausted(Resource::Clusters));
        }
        let fresh: Vec<ClusterIndex> = NextAvailableAllocation::new(&self.bitmap)
            .take(extra)
            .map(|nr| nr as ClusterIndex)
            .collect();
        for &cluster in &fresh {
            self.bitmap.set_reserved(cluster as usize);
        }

        let mut data = pool[..reused].to_vec();
        data.extend_from_slice(&fresh);
        let index = data.split_off(data_count);
        let next = Chain { data, index };
        let mut updated = current.clone();
        updated.free = false;
        updated.kind = kind;
        updated.size = len;

        if let Err(err) = self.commit(&mut updated, &next, len, &mut reader) {
            self.inodes.put(current);
            for &cluster in &fresh {
                self.bitmap.set_free(cluster as usize);
            }
            // The bitmap may already have reached the disk.
            if let Err(undo) = self.persist_bitmap() {
                event!(
                    self.log,
                    Error,
                    "clusters {:?} stay marked used on disk: {}",
                    fresh,
                    undo
                );
            }
            return Err(err);
        }

        let leftover: Vec<ClusterIndex> = if reuse {
            pool[reused..].to_vec()
        } else {
            old.clusters().collect()
        };
        if !leftover.is_empty() {
            for &cluster in &leftover {
                self.bitmap.set_free(cluster as usize);
            }
            self.persist_bitmap()?;
        }
        Ok(())
    }

    /// Writes data clusters, then index clusters, then the bitmap, then the inode.
    fn commit<R: Read>(
        &mut self,
        updated: &mut Inode,
        next: &Chain,
        len: u64,
        reader: &mut R,
    ) -> Result<()> {
        let index_blocks = chain::attach(updated, next, self.sb.cluster_size)?;

        let mut buf = vec![0; self.cluster_size()];
        let mut remaining = len;
        for &cluster in &next.data {
            let n = remaining.min(buf.len() as u64) as usize;
            buf[n..].fill(0);
            reader.read_exact(&mut buf[..n])?;
            self.write_data(cluster, &buf)?;
            remaining -= n as u64;
        }
        for (cluster, block) in &index_blocks {
            self.write_data(*cluster, block)?;
        }

        self.persist_bitmap()?;
        self.inodes.put(updated.clone());
        self.persist_inode(updated.id)
    }

    /// Writes the content of inode `id` to `writer`, returning the bytes written.
    fn read_into<W: Write>(&mut self, id: InodeId, writer: &mut W) -> Result<u64> {
        let node = self.used_inode(id)?.clone();
        let chain = self.read_chain(&node)?;
        let mut buf = vec![0; self.cluster_size()];
        let mut remaining = node.size;
        for cluster in chain.data {
            let n = remaining.min(buf.len() as u64) as usize;
            self.read_data(cluster, &mut buf)?;
            writer.write_all(&buf[..n])?;
            remaining -= n as u64;
        }
        Ok(node.size)
    }
}

/// An image file and, once formatted, the file system structures inside it.
///
/// Every operation on an unformatted disk fails with [`FsError::NotInitialized`]
/// except [`Disk::format`].
pub struct Disk {
    image: PathBuf,
    log: EventLog,
    mounted: Option<Mounted>,
}

impl Disk {
    /// Opens the image at `image`, logging through the `log` facade.
    pub fn open<P: AsRef<Path>>(image: P) -> Result<Self> {
        Self::open_with_log(image, EventLog::facade())
    }

    /// Opens the image at `image`. A missing image, or a file that does not hold a
    /// valid file system, leaves the disk unformatted.
    pub fn open_with_log<P: AsRef<Path>>(image: P, log: EventLog) -> Result<Self> {
        let mut disk = Disk {
            image: image.as_ref().to_path_buf(),
            log,
            mounted: None,
        };
        disk.mounted = disk.mount()?;
        Ok(disk)
    }

    fn mount(&self) -> Result<Option<Mounted>> {
        let mut file = match File::open(&self.image) {
            Ok(file) => file,
            Err(err) if err.kind() == ErrorKind::NotFound => {
                event!(
                    self.log,
                    Info,
                    "{} does not exist yet, format it before use",
                    self.image.display()
                );
                return Ok(None);
            }
            Err(err) => return Err(err.into()),
        };
        let mut head = vec![0; SUPERBLOCK_SIZE];
        let parsed = file
            .read_exact(&mut head)
            .map_err(FsError::from)
            .and_then(|_| SuperBlock::parse(&head));
        let sb = match parsed {
            Ok(sb) => sb,
            Err(err) => {
                event!(
                    self.log,
                    Warn,
                    "{} does not hold a file system ({}), format it before use",
                    self.image.display(),
                    err
                );
                return Ok(None);
            }
        };

        let dev = FileBlockEmulator::open_disk(&self.image, sb.cluster_size as usize)?;
        match Mounted::load(dev, sb, self.log.clone()) {
            Ok(mounted) => {
                event!(
                    self.log,
                    Info,
                    "mounted {}: {} clusters of {} bytes, {} inodes",
                    self.image.display(),
                    mounted.sb.cluster_count,
                    mounted.sb.cluster_size,
                    mounted.sb.inode_count
                );
                Ok(Some(mounted))
            }
            Err(FsError::Corrupted(reason)) => {
                event!(
                    self.log,
                    Warn,
                    "{} is damaged ({}), format it before use",
                    self.image.display(),
                    reason
                );
                Ok(None)
            }
            Err(err) => Err(err),
        }
    }

    fn mounted(&self) -> Result<&Mounted> {
        self.mounted.as_ref().ok_or(FsError::NotInitialized)
    }

    fn mounted_mut(&mut self) -> Result<&mut Mounted> {
        self.mounted.as_mut().ok_or(FsError::NotInitialized)
    }

    /// Logs a failed operation before handing the result back.
    fn report<T>(&self, op: &str, result: Result<T>) -> Result<T> {
        if let Err(err) = &result {
            event!(self.log, Error, "{}: {}", op, err);
        }
        result
    }

    pub fn log(&self) -> &EventLog {
        &self.log
    }

    pub fn is_formatted(&self) -> bool {
        self.mounted.is_some()
    }

    /// Formats the image with the default cluster size and inode density.
    pub fn format(&mut self, size: u64) -> Result<()> {
        self.format_with(size, &FormatOptions::default())
    }

    /// Recreates the image as an empty file system of `size` bytes holding only the
    /// root directory. Any previous content is discarded.
    pub fn format_with(&mut self, size: u64, opts: &FormatOptions) -> Result<()> {
        let sb = SuperBlock::plan(size, opts);
        let sb = self.report("format", sb)?;
        self.mounted = None;
        let result = Self::initialize(&self.image, sb, self.log.clone());
        let mounted = self.report("format", result)?;
        event!(
            self.log,
            Info,
            "formatted {}: {} bytes, {} clusters of {} bytes, {} inodes",
            self.image.display(),
            mounted.sb.image_size,
            mounted.sb.cluster_count,
            mounted.sb.cluster_size,
            mounted.sb.inode_count
        );
        self.mounted = Some(mounted);
        Ok(())
    }

    fn initialize(image: &Path, sb: SuperBlock, log: EventLog) -> Result<Mounted> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(image)?;
        let mut dev = FileBlockEmulatorBuilder::from(file)
            .with_block_size(sb.cluster_size as usize)
            .with_block_count(sb.total_blocks())
            .build()?;

        let mut block = vec![0; sb.cluster_size as usize];
        block[..SUPERBLOCK_SIZE].copy_from_slice(&sb.serialize());
        dev.write_block(0, &block)?;

        let mut mounted = Mounted {
            dev,
            log,
            bitmap: Bitmap::new(sb.cluster_count as usize),
            inodes: InodeTable::new(sb.inode_count, sb.cluster_size),
            sb,
        };
        mounted.persist_bitmap()?;
        for block in 0..mounted.inodes.blocks() {
            mounted.persist_table_block(block)?;
        }
        let root = mounted.create_inode(InodeKind::Directory, |id| {
            Directory::new(id, id).serialize()
        })?;
        if root != ROOT_INODE_ID {
            return Err(FsError::Corrupted(format!(
                "root directory landed in inode {}",
                root
            )));
        }
        mounted.dev.sync_disk()?;
        Ok(mounted)
    }

    pub fn superblock(&self) -> Result<&SuperBlock> {
        Ok(&self.mounted()?.sb)
    }

    pub fn stats(&self) -> Result<DiskStats> {
        let m = self.mounted()?;
        Ok(DiskStats {
            cluster_size: m.sb.cluster_size,
            cluster_count: m.sb.cluster_count,
            used_clusters: m.bitmap.count_used() as u32,
            inode_count: m.sb.inode_count,
            used_inodes: m.inodes.count_used() as u32,
        })
    }

    /// The inode in slot `id`, allocated or not.
    pub fn inode(&self, id: InodeId) -> Result<&Inode> {
        self.mounted()?.inode(id)
    }

    pub fn used_inodes(&self) -> Result<Vec<InodeId>> {
        Ok(self.mounted()?.inodes.used().map(|n| n.id).collect())
    }

    pub fn has_free_inode(&self) -> Result<bool> {
        Ok(self.mounted()?.inodes.lowest_free().is_some())
    }

    /// Allocates the lowest free inode as an empty file.
    pub fn claim_inode(&mut self) -> Result<InodeId> {
        self.create_inode(InodeKind::File, |_| Vec::new())
    }

    /// Allocates the lowest free inode with `content` built from its id. The content
    /// clusters reach the disk before the inode is marked allocated.
    pub fn create_inode<F>(&mut self, kind: InodeKind, content: F) -> Result<InodeId>
    where
        F: FnOnce(InodeId) -> Vec<u8>,
    {
        let result = self
            .mounted_mut()
            .and_then(|m| m.create_inode(kind, content));
        let id = self.report("claim inode", result)?;
        event!(self.log, Debug, "claimed inode {} as {}", id, kind.name());
        Ok(id)
    }

    /// Marks an inode free. The inode must not own clusters any more.
    pub fn free_inode(&mut self, id: InodeId) -> Result<()> {
        if id == ROOT_INODE_ID {
            return Err(FsError::InvalidArgument(
                "the root inode cannot be freed".to_string(),
            ));
        }
        let m = self.mounted_mut()?;
        if m.used_inode(id)?.has_clusters() {
            return Err(FsError::InvalidArgument(format!(
                "inode {} still owns clusters",
                id
            )));
        }
        m.inodes.put(Inode::free(id));
        let result = m.persist_inode(id);
        self.report("free inode", result)?;
        event!(self.log, Debug, "freed inode {}", id);
        Ok(())
    }

    /// Releases the clusters of inode `id`, then frees the inode.
    pub fn release_inode(&mut self, id: InodeId) -> Result<()> {
        self.write_content(id, &[])?;
        self.free_inode(id)
    }

    pub fn is_there_at_least_n_free_clusters(&self, n: u64) -> Result<bool> {
        Ok(self.mounted()?.bitmap.has_free(n as usize))
    }

    pub fn is_cluster_used(&self, index: ClusterIndex) -> Result<bool> {
        let m = self.mounted()?;
        m.check_cluster(index)?;
        Ok(m.bitmap.get(index as usize) == State::Used)
    }

    pub fn used_clusters(&self) -> Result<Vec<ClusterIndex>> {
        let m = self.mounted()?;
        Ok((0..m.sb.cluster_count)
            .filter(|&i| m.bitmap.get(i as usize) == State::Used)
            .collect())
    }

    /// Marks the `n` lowest free clusters used. Either all `n` are claimed or the
    /// bitmap is left untouched.
    pub fn claim_clusters(&mut self, n: usize) -> Result<Vec<ClusterIndex>> {
        let result = self.mounted_mut().and_then(|m| {
            if !m.bitmap.has_free(n) {
                return Err(FsError::ResourceExhausted(Resource::Clusters));
            }
            let claimed: Vec<ClusterIndex> = NextAvailableAllocation::new(&m.bitmap)
                .take(n)
                .map(|nr| nr as ClusterIndex)
                .collect();
            for &cluster in &claimed {
                m.bitmap.set_reserved(cluster as usize);
            }
            if let Err(err) = m.persist_bitmap() {
                for &cluster in &claimed {
                    m.bitmap.set_free(cluster as usize);
                }
                return Err(err);
            }
            Ok(claimed)
        });
        let claimed = self.report("claim clusters", result)?;
        event!(self.log, Debug, "claimed clusters {:?}", claimed);
        Ok(claimed)
    }

    /// Marks `clusters` free. Every index is validated before the bitmap changes.
    pub fn free_clusters(&mut self, clusters: &[ClusterIndex]) -> Result<()> {
        let result = self.mounted_mut().and_then(|m| {
            for (i, &cluster) in clusters.iter().enumerate() {
                m.check_cluster(cluster)?;
                if m.bitmap.get(cluster as usize) == State::Free || clusters[..i].contains(&cluster)
                {
                    return Err(FsError::InvalidArgument(format!(
                        "cluster {} is not in use",
                        cluster
                    )));
                }
            }
            for &cluster in clusters {
                m.bitmap.set_free(cluster as usize);
            }
            m.persist_bitmap()
        });
        self.report("free clusters", result)?;
        event!(self.log, Debug, "freed clusters {:?}", clusters);
        Ok(())
    }

    pub fn read_cluster(&mut self, index: ClusterIndex) -> Result<Vec<u8>> {
        let m = self.mounted_mut()?;
        let mut buf = vec![0; m.cluster_size()];
        m.read_data(index, &mut buf)?;
        Ok(buf)
    }

    /// Writes `bytes` to the head of cluster `index`.
    pub fn write_cluster(&mut self, index: ClusterIndex, bytes: &[u8]) -> Result<()> {
        let m = self.mounted_mut()?;
        if bytes.len() > m.cluster_size() {
            return Err(FsError::InvalidArgument(format!(
                "{} bytes do not fit in a cluster of {}",
                bytes.len(),
                m.cluster_size()
            )));
        }
        m.write_data(index, bytes)
    }

    /// The data and index clusters of inode `id`.
    pub fn chain(&mut self, id: InodeId) -> Result<Chain> {
        let m = self.mounted_mut()?;
        let node = m.used_inode(id)?.clone();
        m.read_chain(&node)
    }

    pub fn read_content(&mut self, id: InodeId) -> Result<Vec<u8>> {
        let m = self.mounted_mut()?;
        let mut content = Vec::with_capacity(m.used_inode(id)?.size as usize);
        m.read_into(id, &mut content)?;
        Ok(content)
    }

    /// Replaces the content of an allocated inode, growing or shrinking its chain.
    pub fn write_content(&mut self, id: InodeId, bytes: &[u8]) -> Result<()> {
        let result = self.mounted_mut().and_then(|m| {
            let kind = m.used_inode(id)?.kind;
            m.store(id, kind, bytes.len() as u64, bytes, true)
        });
        self.report("write content", result)?;
        event!(self.log, Trace, "wrote {} bytes to inode {}", bytes.len(), id);
        Ok(())
    }

    /// Streams a regular host file into the chain of file inode `id`, replacing its
    /// previous content. Returns the number of bytes copied.
    ///
    /// The new content is staged in free clusters when they suffice. Otherwise the
    /// clusters of the old content are overwritten in place, and a host read error
    /// midway leaves the old content partly overwritten.
    pub fn copy_host_file_into_chain<P: AsRef<Path>>(&mut self, host: P, id: InodeId) -> Result<u64> {
        let host = host.as_ref();
        let result = self.mounted_mut().and_then(|m| {
            if m.used_inode(id)?.kind != InodeKind::File {
                return Err(FsError::InvalidArgument(format!(
                    "inode {} is not a regular file",
                    id
                )));
            }
            let file = File::open(host)?;
            let meta = file.metadata()?;
            if !meta.is_file() {
                return Err(FsError::InvalidArgument(format!(
                    "{} is not a regular file",
                    host.display()
                )));
            }
            let reuse = !m.can_stage(meta.len());
            if reuse {
                event!(
                    m.log,
                    Warn,
                    "too few free clusters to stage {} bytes, overwriting inode {} in place",
                    meta.len(),
                    id
                );
            }
            m.store(id, InodeKind::File, meta.len(), BufReader::new(file), reuse)?;
            Ok(meta.len())
        });
        let copied = self.report("copy host file in", result)?;
        event!(
            self.log,
            Info,
            "copied {} bytes from {} into inode {}",
            copied,
            host.display(),
            id
        );
        Ok(copied)
    }

    /// Writes the content of inode `id` into a host file, creating or truncating it.
    pub fn copy_chain_into_host_file<P: AsRef<Path>>(&mut self, id: InodeId, host: P) -> Result<u64> {
        let host = host.as_ref();
        let result = self.mounted_mut().and_then(|m| {
            m.used_inode(id)?;
            let mut writer = BufWriter::new(File::create(host)?);
            let copied = m.read_into(id, &mut writer)?;
            writer.flush()?;
            Ok(copied)
        });
        let copied = self.report("copy chain out", result)?;
        event!(
            self.log,
            Info,
            "copied {} bytes from inode {} to {}",
            copied,
            id,
            host.display()
        );
        Ok(copied)
    }

    /// Flushes the image to stable storage.
    pub fn sync(&mut self) -> Result<()> {
        self.mounted_mut()?.dev.sync_disk()?;
        Ok(())
    }
}
