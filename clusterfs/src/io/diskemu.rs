use super::{BlockNumber, BlockStorage};
use std::fs::{File, OpenOptions};
use std::io::prelude::*;
use std::io::{ErrorKind, SeekFrom};
use std::path::Path;

/// 512 bytes matches the sector size of most disks and is the smallest cluster size
/// the file system accepts.
pub const DEFAULT_BLOCK_SIZE: usize = 512;

/// Emulates block disk storage in userspace using a file as block storage.
pub struct FileBlockEmulator {
    /// The file must be a fixed-size file some exact multiple of the size of a block.
    fd: File,
    /// Size of every block in bytes.
    block_size: usize,
    /// The total number of blocks available in the file store.
    block_count: usize,
}

impl FileBlockEmulator {
    fn check_range(&self, blocknr: BlockNumber) -> std::io::Result<()> {
        if blocknr >= self.block_count {
            return Err(std::io::Error::new(
                ErrorKind::InvalidInput,
                format!(
                    "block {} out of range (device has {} blocks)",
                    blocknr, self.block_count
                ),
            ));
        }
        Ok(())
    }

    fn offset(&self, blocknr: BlockNumber) -> u64 {
        (blocknr as u64) * (self.block_size as u64)
    }
}

impl BlockStorage for FileBlockEmulator {
    fn open_disk<P: AsRef<Path>>(dest: P, block_size: usize) -> std::io::Result<Self>
    where
        Self: std::marker::Sized,
    {
        if block_size == 0 {
            return Err(std::io::Error::new(
                ErrorKind::InvalidInput,
                "block size must be non-zero",
            ));
        }
        // Return error if the file does not exist rather than create one.
        let fd = OpenOptions::new().read(true).write(true).open(dest)?;
        let block_count = (fd.metadata()?.len() / block_size as u64) as usize;
        Ok(FileBlockEmulator {
            fd,
            block_size,
            block_count,
        })
    }

    fn block_size(&self) -> usize {
        self.block_size
    }

    fn block_count(&self) -> usize {
        self.block_count
    }

    fn read_block(&mut self, blocknr: BlockNumber, buf: &mut [u8]) -> std::io::Result<()> {
        self.check_range(blocknr)?;
        if buf.len() < self.block_size {
            return Err(std::io::Error::new(
                ErrorKind::InvalidInput,
                "buffer does not contain enough space to read block",
            ));
        }
        let offset = self.offset(blocknr);
        self.fd.seek(SeekFrom::Start(offset))?;
        self.fd.read_exact(&mut buf[..self.block_size])
    }

    /// This method truncates writes that exceed the block size.
    fn write_block(&mut self, blocknr: BlockNumber, buf: &[u8]) -> std::io::Result<()> {
        self.check_range(blocknr)?;
        let offset = self.offset(blocknr);
        self.fd.seek(SeekFrom::Start(offset))?;

        let max = self.block_size.min(buf.len());
        self.fd.write_all(&buf[..max])
    }

    fn sync_disk(&mut self) -> std::io::Result<()> {
        self.fd.sync_all()
    }
}

pub struct FileBlockEmulatorBuilder {
    fd: File,
    block_size: usize,
    block_count: usize,
}

impl From<File> for FileBlockEmulatorBuilder {
    fn from(fd: File) -> Self {
        FileBlockEmulatorBuilder {
            fd,
            block_size: DEFAULT_BLOCK_SIZE,
            block_count: 0,
        }
    }
}

impl FileBlockEmulatorBuilder {
    /// Sets the size of a single block in bytes.
    pub fn with_block_size(mut self, bytes: usize) -> Self {
        self.block_size = bytes;
        self
    }

    /// Sets the number of desired blocks in the block store device.
    pub fn with_block_count(mut self, blocks: usize) -> Self {
        self.block_count = blocks;
        self
    }

    /// This builder assumes ownership of the file descriptor used and does
    /// destructive things to prepare the file for use. Additionally, ownership
    /// of the file is transfered to the emulator meaning this builder can only
    /// be used to create one emulator.
    pub fn build(mut self) -> std::io::Result<FileBlockEmulator> {
        if self.block_size == 0 || self.block_count == 0 {
            return Err(std::io::Error::new(
                ErrorKind::InvalidInput,
                "block size and block count must be non-zero",
            ));
        }
        let len = (self.block_size as u64) * (self.block_count as u64);
        self.zero_medium(len)?;
        Ok(FileBlockEmulator {
            fd: self.fd,
            block_size: self.block_size,
            block_count: self.block_count,
        })
    }

    fn zero_medium(&mut self, len: u64) -> std::io::Result<()> {
        // Truncating first discards any previous content, the second call extends the
        // file with zero bytes.
        self.fd.set_len(0)?;
        self.fd.set_len(len)?;
        self.fd.seek(SeekFrom::Start(0))?;
        Ok(())
    }
}
