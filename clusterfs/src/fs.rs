use std::fmt;
use std::path::Path;

use crate::chain;
use crate::dir::{self, Directory, DirectoryItem, DIR_ITEM_SIZE, PARENT_NAME, SELF_NAME};
use crate::disk::Disk;
use crate::error::{FsError, Resource, Result};
use crate::logging::EventLog;
use crate::node::{ClusterIndex, InodeId, InodeKind};
use crate::path;
use crate::sb::{FormatOptions, ROOT_INODE_ID};

/// Symbolic links followed while resolving one path before giving up.
pub const MAX_SYMLINK_DEPTH: usize = 32;

/// One item of a directory listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    pub name: String,
    pub inode: InodeId,
    pub kind: InodeKind,
    pub size: u64,
    /// Content of a symbolic link.
    pub link_target: Option<String>,
}

/// What `stat` reports about a single inode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InodeInfo {
    pub id: InodeId,
    pub kind: InodeKind,
    pub size: u64,
    pub data_clusters: Vec<ClusterIndex>,
    pub index_clusters: Vec<ClusterIndex>,
    pub link_target: Option<String>,
}

impl fmt::Display for InodeInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} - {} B - i-node {} - clusters {:?}",
            self.kind.name(),
            self.size,
            self.id,
            self.data_clusters
        )?;
        if !self.index_clusters.is_empty() {
            write!(f, " - index clusters {:?}", self.index_clusters)?;
        }
        if let Some(target) = &self.link_target {
            write!(f, " -> {}", target)?;
        }
        Ok(())
    }
}

/// Superblock fields and allocation counters of a formatted image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FsInfo {
    pub signature: String,
    pub description: String,
    pub image_size: u64,
    pub cluster_size: u32,
    pub cluster_count: u32,
    pub used_clusters: u32,
    pub inode_count: u32,
    pub used_inodes: u32,
    pub bitmap_offset: u64,
    pub inode_table_offset: u64,
    pub data_offset: u64,
    pub max_file_size: u64,
}

impl fmt::Display for FsInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "signature:          {}", self.signature)?;
        writeln!(f, "volume descriptor:  {}", self.description)?;
        writeln!(f, "disk size:          {} B", self.image_size)?;
        writeln!(f, "cluster size:       {} B", self.cluster_size)?;
        writeln!(
            f,
            "clusters:           {} used of {}",
            self.used_clusters, self.cluster_count
        )?;
        writeln!(
            f,
            "inodes:             {} used of {}",
            self.used_inodes, self.inode_count
        )?;
        writeln!(f, "bitmap start:       {}", self.bitmap_offset)?;
        writeln!(f, "inode table start:  {}", self.inode_table_offset)?;
        writeln!(f, "data start:         {}", self.data_offset)?;
        write!(f, "max file size:      {} B", self.max_file_size)
    }
}

/// Outcome of a consistency check.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CheckReport {
    /// Allocated inodes examined.
    pub inodes: usize,
    /// Clusters marked used in the bitmap.
    pub clusters: usize,
    pub problems: Vec<String>,
}

impl CheckReport {
    pub fn is_consistent(&self) -> bool {
        self.problems.is_empty()
    }
}

impl fmt::Display for CheckReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} inodes and {} clusters checked, {} problems",
            self.inodes,
            self.clusters,
            self.problems.len()
        )?;
        for problem in &self.problems {
            write!(f, "\n  {}", problem)?;
        }
        Ok(())
    }
}

/// Where a path resolved to.
struct Located {
    /// Directory holding the final entry.
    parent: InodeId,
    /// Name of the final entry, absent when the path named the start directory.
    name: Option<String>,
    id: InodeId,
}

/// The hierarchical namespace of an image: paths, directories, files and symbolic
/// links, plus a current working directory.
pub struct FileSystem {
    disk: Disk,
    cwd: InodeId,
    log: EventLog,
}

impl FileSystem {
    pub fn new(disk: Disk) -> Self {
        let log = disk.log().clone();
        Self {
            disk,
            cwd: ROOT_INODE_ID,
            log,
        }
    }

    pub fn open<P: AsRef<Path>>(image: P) -> Result<Self> {
        Ok(Self::new(Disk::open(image)?))
    }

    pub fn open_with_log<P: AsRef<Path>>(image: P, log: EventLog) -> Result<Self> {
        Ok(Self::new(Disk::open_with_log(image, log)?))
    }

    pub fn disk(&self) -> &Disk {
        &self.disk
    }

    pub fn disk_mut(&mut self) -> &mut Disk {
        &mut self.disk
    }

    pub fn is_formatted(&self) -> bool {
        self.disk.is_formatted()
    }

    /// Flushes the image to stable storage.
    pub fn sync(&mut self) -> Result<()> {
        self.disk.sync()
    }

    pub fn format(&mut self, size: u64) -> Result<()> {
        self.format_with(size, &FormatOptions::default())
    }

    /// Formats the image and moves the working directory back to the root.
    pub fn format_with(&mut self, size: u64, opts: &FormatOptions) -> Result<()> {
        self.disk.format_with(size, opts)?;
        self.cwd = ROOT_INODE_ID;
        Ok(())
    }

    fn directory(&mut self, id: InodeId, path: &str) -> Result<Directory> {
        if !self.disk.inode(id)?.is_dir() {
            return Err(FsError::NotADirectory(path.to_string()));
        }
        Directory::parse(&self.disk.read_content(id)?)
    }

    fn link_target(&mut self, id: InodeId) -> Result<String> {
        String::from_utf8(self.disk.read_content(id)?).map_err(|_| {
            FsError::Corrupted(format!("symbolic link {} is not valid UTF-8", id))
        })
    }

    fn kind_of(&self, id: InodeId) -> Result<InodeKind> {
        Ok(self.disk.inode(id)?.kind)
    }

    fn walk(&mut self, path: &str, follow_final: bool) -> Result<Located> {
        if path.is_empty() {
            return Err(FsError::NotFound(String::new()));
        }
        self.disk.superblock()?;
        let mut current = if path::is_absolute(path) {
            ROOT_INODE_ID
        } else {
            self.cwd
        };
        let mut located = Located {
            parent: current,
            name: None,
            id: current,
        };
        let mut pending: Vec<String> = path::components(path).rev().map(str::to_string).collect();
        let mut links = 0;

        while let Some(name) = pending.pop() {
            let dir = self.directory(current, path)?;
            let child = dir
                .lookup(&name)
                .ok_or_else(|| FsError::NotFound(path.to_string()))?;
            if self.kind_of(child)? == InodeKind::Symlink && (follow_final || !pending.is_empty()) {
                links += 1;
                if links > MAX_SYMLINK_DEPTH {
                    return Err(FsError::TooManySymbolicLinks(path.to_string()));
                }
                // Relative targets continue from the directory holding the link.
                let target = self.link_target(child)?;
                if path::is_absolute(&target) {
                    current = ROOT_INODE_ID;
                }
                pending.extend(path::components(&target).rev().map(str::to_string));
                located = Located {
                    parent: current,
                    name: None,
                    id: current,
                };
                continue;
            }
            located = Located {
                parent: current,
                name: Some(name),
                id: child,
            };
            current = child;
        }
        Ok(located)
    }

    /// Resolves `path` to an inode. Symbolic links in intermediate components are
    /// always followed, a link in the final component only with `follow_final_link`.
    pub fn resolve_path(&mut self, path: &str, follow_final_link: bool) -> Result<InodeId> {
        Ok(self.walk(path, follow_final_link)?.id)
    }

    /// The directory a new entry at `path` goes into, and the entry's name.
    fn parent_for_new(&mut self, path: &str) -> Result<(InodeId, String)> {
        let (parent, name) =
            path::split_last(path).ok_or_else(|| FsError::InvalidName(path.to_string()))?;
        dir::validate_name(name)?;
        let parent_id = self.walk(parent, true)?.id;
        if !self.disk.inode(parent_id)?.is_dir() {
            return Err(FsError::NotADirectory(parent.to_string()));
        }
        Ok((parent_id, name.to_string()))
    }

    /// The directory and name `dst` designates: an existing directory receives the
    /// entry under `default_name`, anything else names the entry itself.
    fn destination(&mut self, dst: &str, default_name: &str) -> Result<(InodeId, String)> {
        let existing = match self.walk(dst, true) {
            Ok(loc) => Some(loc.id),
            Err(FsError::NotFound(_)) => None,
            Err(err) => return Err(err),
        };
        match existing {
            Some(id) if self.disk.inode(id)?.is_dir() => Ok((id, default_name.to_string())),
            _ => self.parent_for_new(dst),
        }
    }

    fn cluster_size(&self) -> Result<u32> {
        Ok(self.disk.superblock()?.cluster_size)
    }

    /// Clusters a directory needs to grow by one item.
    fn growth(&self, dir: &Directory) -> Result<u64> {
        let c = self.cluster_size()?;
        let len = dir.byte_len();
        Ok(chain::clusters_for(len + DIR_ITEM_SIZE as u64, c) - chain::clusters_for(len, c))
    }

    fn ensure_clusters(&self, n: u64) -> Result<()> {
        if !self.disk.is_there_at_least_n_free_clusters(n)? {
            let free = self.disk.stats()?.free_clusters();
            event!(self.log, Error, "{} free clusters needed, {} left", n, free);
            return Err(FsError::ResourceExhausted(Resource::Clusters));
        }
        Ok(())
    }

    fn ensure_inode(&self) -> Result<()> {
        if !self.disk.has_free_inode()? {
            event!(self.log, Error, "inode table is full");
            return Err(FsError::ResourceExhausted(Resource::Inodes));
        }
        Ok(())
    }

    /// Lists `item` in directory `parent`. If that fails the inode the item points
    /// at is released again.
    fn link_into(&mut self, parent: InodeId, dir: &mut Directory, item: DirectoryItem) -> Result<()> {
        let id = item.inode;
        let result = match dir.insert(item) {
            Ok(()) => self.disk.write_content(parent, &dir.serialize()),
            Err(err) => Err(err),
        };
        if let Err(err) = result {
            if let Err(undo) = self.disk.release_inode(id) {
                event!(self.log, Error, "inode {} leaked: {}", id, undo);
            }
            return Err(err);
        }
        Ok(())
    }

    /// Whether `ancestor` is `node` or one of the directories above it.
    fn is_ancestor_or_self(&mut self, ancestor: InodeId, mut node: InodeId) -> Result<bool> {
        let limit = self.disk.superblock()?.inode_count;
        for _ in 0..=limit {
            if node == ancestor {
                return Ok(true);
            }
            if node == ROOT_INODE_ID {
                return Ok(false);
            }
            node = self.directory(node, PARENT_NAME)?.parent();
        }
        Err(FsError::Corrupted(
            "directory parents form a cycle".to_string(),
        ))
    }

    /// Creates an empty file or directory at `path`.
    pub fn create(&mut self, path: &str, kind: InodeKind) -> Result<InodeId> {
        let content_clusters = match kind {
            InodeKind::File => 0,
            InodeKind::Directory => chain::clusters_for(2 * DIR_ITEM_SIZE as u64, self.cluster_size()?),
            InodeKind::Symlink => {
                return Err(FsError::InvalidArgument(
                    "symbolic links are created with a target".to_string(),
                ))
            }
        };
        let (parent, name) = self.parent_for_new(path)?;
        let mut dir = self.directory(parent, path)?;
        if dir.lookup(&name).is_some() {
            return Err(FsError::AlreadyExists(path.to_string()));
        }
        self.ensure_inode()?;
        self.ensure_clusters(content_clusters + self.growth(&dir)?)?;

        let id = match kind {
            InodeKind::Directory => self
                .disk
                .create_inode(kind, |id| Directory::new(id, parent).serialize())?,
            _ => self.disk.claim_inode()?,
        };
        self.link_into(parent, &mut dir, DirectoryItem::new(name, id))?;
        event!(self.log, Info, "created {} {} as inode {}", kind.name(), path, id);
        Ok(id)
    }

    /// Removes the entry at `path`. A non-empty directory is only removed, together
    /// with everything below it, when `recursive` is set. The root, the working
    /// directory and its ancestors cannot be removed.
    pub fn remove(&mut self, path: &str, recursive: bool) -> Result<()> {
        let loc = self.walk(path, false)?;
        let name = match loc.name {
            Some(name) if name != SELF_NAME && name != PARENT_NAME => name,
            _ => {
                return Err(FsError::InvalidArgument(format!(
                    "refusing to remove {}",
                    path
                )))
            }
        };
        if loc.id == ROOT_INODE_ID || self.is_ancestor_or_self(loc.id, self.cwd)? {
            return Err(FsError::InvalidArgument(format!(
                "{} is the current directory or one of its ancestors",
                path
            )));
        }
        if self.disk.inode(loc.id)?.is_dir() && !recursive && !self.directory(loc.id, path)?.is_empty() {
            return Err(FsError::DirectoryNotEmpty(path.to_string()));
        }

        self.remove_tree(loc.id, path)?;
        let mut parent = self.directory(loc.parent, path)?;
        parent.remove(&name);
        self.disk.write_content(loc.parent, &parent.serialize())?;
        event!(self.log, Info, "removed {}", path);
        Ok(())
    }

    /// Removes a directory, which must be empty.
    pub fn remove_dir(&mut self, path: &str) -> Result<()> {
        let id = self.walk(path, false)?.id;
        if !self.disk.inode(id)?.is_dir() {
            return Err(FsError::NotADirectory(path.to_string()));
        }
        self.remove(path, false)
    }

    /// Releases the clusters and inodes of `id` and, for directories, of everything
    /// below it.
    fn remove_tree(&mut self, id: InodeId, path: &str) -> Result<()> {
        if self.disk.inode(id)?.is_dir() {
            let dir = self.directory(id, path)?;
            for item in dir.entries() {
                self.remove_tree(item.inode, path)?;
            }
        }
        self.disk.release_inode(id)
    }

    /// Moves the entry at `src` to `dst`. When `dst` is an existing directory the
    /// entry keeps its name and moves into it.
    pub fn rename(&mut self, src: &str, dst: &str) -> Result<()> {
        let from = self.walk(src, false)?;
        let from_name = match from.name {
            Some(name) if name != SELF_NAME && name != PARENT_NAME => name,
            _ => {
                return Err(FsError::InvalidArgument(format!(
                    "refusing to move {}",
                    src
                )))
            }
        };
        let moving = self.kind_of(from.id)?;
        let (to_parent, to_name) = self.destination(dst, &from_name)?;
        if to_parent == from.parent && to_name == from_name {
            return Ok(());
        }

        let mut to_dir = self.directory(to_parent, dst)?;
        if let Some(existing) = to_dir.lookup(&to_name) {
            let existing = self.kind_of(existing)?;
            if (existing == InodeKind::Directory) != (moving == InodeKind::Directory) {
                return Err(FsError::CrossKind {
                    path: dst.to_string(),
                    existing: existing.name(),
                    incoming: moving.name(),
                });
            }
            return Err(FsError::AlreadyExists(dst.to_string()));
        }
        if moving == InodeKind::Directory && self.is_ancestor_or_self(from.id, to_parent)? {
            return Err(FsError::InvalidArgument(format!(
                "cannot move {} into itself",
                src
            )));
        }

        if to_parent == from.parent {
            to_dir.remove(&from_name);
            to_dir.insert(DirectoryItem::new(to_name, from.id))?;
            self.disk.write_content(to_parent, &to_dir.serialize())?;
        } else {
            self.ensure_clusters(self.growth(&to_dir)?)?;
            to_dir.insert(DirectoryItem::new(to_name, from.id))?;
            let mut from_dir = self.directory(from.parent, src)?;
            from_dir.remove(&from_name);
            self.disk.write_content(from.parent, &from_dir.serialize())?;
            if let Err(err) = self.disk.write_content(to_parent, &to_dir.serialize()) {
                from_dir.insert(DirectoryItem::new(from_name, from.id))?;
                if let Err(undo) = self.disk.write_content(from.parent, &from_dir.serialize()) {
                    event!(self.log, Error, "{} lost its directory entry: {}", src, undo);
                }
                return Err(err);
            }
            if moving == InodeKind::Directory {
                let mut moved = self.directory(from.id, dst)?;
                moved.rebind_parent(to_parent);
                self.disk.write_content(from.id, &moved.serialize())?;
            }
        }
        event!(self.log, Info, "moved {} to {}", src, dst);
        Ok(())
    }

    /// Duplicates the file or symbolic link at `src` under `dst`.
    pub fn copy(&mut self, src: &str, dst: &str) -> Result<InodeId> {
        let from = self.walk(src, false)?;
        let kind = self.kind_of(from.id)?;
        let name = match (kind, from.name) {
            (InodeKind::Directory, _) | (_, None) => {
                return Err(FsError::IsADirectory(src.to_string()))
            }
            (_, Some(name)) => name,
        };
        let (parent, name) = self.destination(dst, &name)?;
        let mut dir = self.directory(parent, dst)?;
        if dir.lookup(&name).is_some() {
            return Err(FsError::AlreadyExists(dst.to_string()));
        }

        let content = self.disk.read_content(from.id)?;
        self.ensure_inode()?;
        self.ensure_clusters(
            chain::clusters_for(content.len() as u64, self.cluster_size()?) + self.growth(&dir)?,
        )?;
        let id = self.disk.create_inode(kind, |_| content)?;
        self.link_into(parent, &mut dir, DirectoryItem::new(name, id))?;
        event!(self.log, Info, "copied {} to {}", src, dst);
        Ok(id)
    }

    /// Copies a host file into the image. Without `dest` the file lands in the
    /// working directory under its host name. An existing file at the destination is
    /// overwritten.
    pub fn copy_in<P: AsRef<Path>>(&mut self, host: P, dest: Option<&str>) -> Result<InodeId> {
        let host = host.as_ref();
        let meta = std::fs::metadata(host)?;
        if !meta.is_file() {
            return Err(FsError::InvalidArgument(format!(
                "{} is not a regular file",
                host.display()
            )));
        }
        let host_name = host
            .file_name()
            .and_then(|name| name.to_str())
            .ok_or_else(|| FsError::InvalidName(host.display().to_string()))?;
        let (parent, name) = match dest {
            Some(dest) => self.destination(dest, host_name)?,
            None => (self.cwd, host_name.to_string()),
        };
        dir::validate_name(&name)?;
        let target = dest.unwrap_or(&name).to_string();

        let mut dir = self.directory(parent, &target)?;
        if let Some(existing) = dir.lookup(&name) {
            return match self.kind_of(existing)? {
                InodeKind::File => {
                    self.disk.copy_host_file_into_chain(host, existing)?;
                    Ok(existing)
                }
                InodeKind::Directory => Err(FsError::IsADirectory(target)),
                InodeKind::Symlink => Err(FsError::AlreadyExists(target)),
            };
        }

        self.ensure_inode()?;
        self.ensure_clusters(chain::clusters_for(meta.len(), self.cluster_size()?) + self.growth(&dir)?)?;
        let id = self.disk.claim_inode()?;
        if let Err(err) = self.disk.copy_host_file_into_chain(host, id) {
            if let Err(undo) = self.disk.release_inode(id) {
                event!(self.log, Error, "inode {} leaked: {}", id, undo);
            }
            return Err(err);
        }
        self.link_into(parent, &mut dir, DirectoryItem::new(name, id))?;
        Ok(id)
    }

    /// Copies the file at `src` to a host file.
    pub fn copy_out<P: AsRef<Path>>(&mut self, src: &str, host: P) -> Result<u64> {
        let id = self.walk(src, true)?.id;
        if self.disk.inode(id)?.is_dir() {
            return Err(FsError::IsADirectory(src.to_string()));
        }
        self.disk.copy_chain_into_host_file(id, host)
    }

    /// Creates a symbolic link at `link` whose content is `target`. The target is
    /// stored as given and only resolved when the link is followed.
    pub fn make_symbolic_link(&mut self, link: &str, target: &str) -> Result<InodeId> {
        if target.is_empty() {
            return Err(FsError::InvalidArgument(
                "symbolic link target is empty".to_string(),
            ));
        }
        let (parent, name) = self.parent_for_new(link)?;
        let mut dir = self.directory(parent, link)?;
        if dir.lookup(&name).is_some() {
            return Err(FsError::AlreadyExists(link.to_string()));
        }
        self.ensure_inode()?;
        self.ensure_clusters(
            chain::clusters_for(target.len() as u64, self.cluster_size()?) + self.growth(&dir)?,
        )?;
        let id = self
            .disk
            .create_inode(InodeKind::Symlink, |_| target.as_bytes().to_vec())?;
        self.link_into(parent, &mut dir, DirectoryItem::new(name, id))?;
        event!(self.log, Info, "linked {} to {}", link, target);
        Ok(id)
    }

    pub fn read_link(&mut self, path: &str) -> Result<String> {
        let id = self.walk(path, false)?.id;
        if self.kind_of(id)? != InodeKind::Symlink {
            return Err(FsError::InvalidArgument(format!(
                "not a symbolic link: {}",
                path
            )));
        }
        self.link_target(id)
    }

    pub fn read_file(&mut self, path: &str) -> Result<Vec<u8>> {
        let id = self.walk(path, true)?.id;
        if self.disk.inode(id)?.is_dir() {
            return Err(FsError::IsADirectory(path.to_string()));
        }
        self.disk.read_content(id)
    }

    /// Every item of a directory, `.` and `..` included. Without `path` the working
    /// directory is listed.
    pub fn list(&mut self, path: Option<&str>) -> Result<Vec<DirEntry>> {
        let (id, shown) = match path {
            Some(p) => (self.walk(p, true)?.id, p),
            None => {
                self.disk.superblock()?;
                (self.cwd, SELF_NAME)
            }
        };
        let dir = self.directory(id, shown)?;
        let mut entries = Vec::with_capacity(dir.items().len());
        for item in dir.items() {
            let node = self.disk.inode(item.inode)?.clone();
            let link_target = match node.kind {
                InodeKind::Symlink => Some(self.link_target(item.inode)?),
                _ => None,
            };
            entries.push(DirEntry {
                name: item.name.clone(),
                inode: item.inode,
                kind: node.kind,
                size: node.size,
                link_target,
            });
        }
        Ok(entries)
    }

    pub fn change_directory(&mut self, path: &str) -> Result<()> {
        let id = self.walk(path, true)?.id;
        if !self.disk.inode(id)?.is_dir() {
            return Err(FsError::NotADirectory(path.to_string()));
        }
        self.cwd = id;
        Ok(())
    }

    /// Absolute path of the working directory.
    pub fn current_path(&mut self) -> Result<String> {
        let limit = self.disk.superblock()?.inode_count as usize;
        let mut names = Vec::new();
        let mut node = self.cwd;
        while node != ROOT_INODE_ID {
            if names.len() > limit {
                return Err(FsError::Corrupted(
                    "directory parents form a cycle".to_string(),
                ));
            }
            let parent = self.directory(node, PARENT_NAME)?.parent();
            let name = self
                .directory(parent, PARENT_NAME)?
                .name_of(node)
                .map(str::to_string)
                .ok_or_else(|| {
                    FsError::Corrupted(format!(
                        "directory {} is not listed in its parent",
                        node
                    ))
                })?;
            names.push(name);
            node = parent;
        }
        Ok(path::join_absolute(names.iter().rev().map(String::as_str)))
    }

    /// Describes the entry at `path` without following a final symbolic link.
    pub fn stat(&mut self, path: &str) -> Result<InodeInfo> {
        let id = self.walk(path, false)?.id;
        let node = self.disk.inode(id)?.clone();
        let chain = self.disk.chain(id)?;
        let link_target = match node.kind {
            InodeKind::Symlink => Some(self.link_target(id)?),
            _ => None,
        };
        Ok(InodeInfo {
            id,
            kind: node.kind,
            size: node.size,
            data_clusters: chain.data,
            index_clusters: chain.index,
            link_target,
        })
    }

    pub fn info(&self) -> Result<FsInfo> {
        let sb = self.disk.superblock()?;
        let stats = self.disk.stats()?;
        Ok(FsInfo {
            signature: sb.signature.clone(),
            description: sb.description.clone(),
            image_size: sb.image_size,
            cluster_size: sb.cluster_size,
            cluster_count: sb.cluster_count,
            used_clusters: stats.used_clusters,
            inode_count: sb.inode_count,
            used_inodes: stats.used_inodes,
            bitmap_offset: sb.bitmap_offset,
            inode_table_offset: sb.inode_table_offset,
            data_offset: sb.data_offset,
            max_file_size: sb.max_file_size(),
        })
    }

    /// Walks the whole tree and cross-checks directory entries, inode chains and the
    /// cluster bitmap.
    pub fn check(&mut self) -> Result<CheckReport> {
        let sb = self.disk.superblock()?.clone();
        let mut report = CheckReport::default();
        let mut references = vec![0_usize; sb.inode_count as usize];
        let mut owners: Vec<Option<InodeId>> = vec![None; sb.cluster_count as usize];

        references[ROOT_INODE_ID as usize] = 1;
        let mut pending = vec![(ROOT_INODE_ID, ROOT_INODE_ID)];
        while let Some((id, parent)) = pending.pop() {
            let dir = match self.directory(id, PARENT_NAME) {
                Ok(dir) => dir,
                Err(err) => {
                    report.problems.push(format!("directory inode {}: {}", id, err));
                    continue;
                }
            };
            if dir.id() != id || dir.parent() != parent {
                report.problems.push(format!(
                    "directory inode {} lists '.' as {} and '..' as {}, expected {} and {}",
                    id,
                    dir.id(),
                    dir.parent(),
                    id,
                    parent
                ));
            }
            for item in dir.entries() {
                let node = match self.disk.inode(item.inode) {
                    Ok(node) if !node.free => node,
                    Ok(_) => {
                        report.problems.push(format!(
                            "{} in directory {} points at free inode {}",
                            item.name, id, item.inode
                        ));
                        continue;
                    }
                    Err(err) => {
                        report.problems.push(format!("{} in directory {}: {}", item.name, id, err));
                        continue;
                    }
                };
                references[item.inode as usize] += 1;
                if references[item.inode as usize] > 1 {
                    report
                        .problems
                        .push(format!("inode {} is listed more than once", item.inode));
                    continue;
                }
                if node.is_dir() {
                    pending.push((item.inode, id));
                }
            }
        }

        for id in self.disk.used_inodes()? {
            report.inodes += 1;
            if references[id as usize] == 0 {
                report
                    .problems
                    .push(format!("inode {} is allocated but not listed anywhere", id));
            }
            let chain = match self.disk.chain(id) {
                Ok(chain) => chain,
                Err(err) => {
                    report.problems.push(format!("inode {}: {}", id, err));
                    continue;
                }
            };
            for cluster in chain.clusters() {
                match owners[cluster as usize] {
                    Some(owner) => report.problems.push(format!(
                        "cluster {} belongs to inodes {} and {}",
                        cluster, owner, id
                    )),
                    None => owners[cluster as usize] = Some(id),
                }
                if !self.disk.is_cluster_used(cluster)? {
                    report.problems.push(format!(
                        "cluster {} of inode {} is marked free",
                        cluster, id
                    ));
                }
            }
        }

        for cluster in self.disk.used_clusters()? {
            report.clusters += 1;
            if owners[cluster as usize].is_none() {
                report
                    .problems
                    .push(format!("cluster {} is marked used but owned by no inode", cluster));
            }
        }

        if report.is_consistent() {
            event!(self.log, Info, "check passed: {}", report);
        } else {
            event!(self.log, Warn, "check found problems: {}", report);
        }
        Ok(report)
    }
}
