use std::path::Path;

/// The block number to access ranging from 0 (the first block) to n - 1 (the last
/// block) where n is number of blocks available.
pub type BlockNumber = usize;

/// Fixed-size block storage backing a disk image.
///
/// clusterfs maps exactly one cluster onto one storage block, so the block size of
/// the device is the cluster size recorded in the superblock. Every structure on the
/// image (superblock, bitmap, inode table, data region) starts on a block boundary.
pub trait BlockStorage {
    /// Opens an existing disk at the specified path. This method does not validate the
    /// storage blocks, it is up for clients to ensure disks are appropriately initialized.
    fn open_disk<P: AsRef<Path>>(path: P, block_size: usize) -> std::io::Result<Self>
    where
        Self: std::marker::Sized;
    /// Size of a single block in bytes.
    fn block_size(&self) -> usize;
    /// Number of addressable blocks.
    fn block_count(&self) -> usize;
    /// Reads disk block number into provided buffer.
    ///
    /// # Errors
    ///
    /// Attempting to read a block out of range, or into a buffer smaller than a block,
    /// will return an error.
    fn read_block(&mut self, blocknr: BlockNumber, buf: &mut [u8]) -> std::io::Result<()>;
    /// Writes provided buffer into the specified block number. Buffers shorter than a
    /// block only overwrite the head of the block.
    ///
    /// # Errors
    ///
    /// Attempting to write a block out of range will return an error.
    fn write_block(&mut self, blocknr: BlockNumber, buf: &[u8]) -> std::io::Result<()>;
    /// Flush any buffered disk IO from memory. This is useful if it must guaranteed
    /// the disk writes actually occurred, for instance, if being re-read from
    /// disk.
    fn sync_disk(&mut self) -> std::io::Result<()>;
}
