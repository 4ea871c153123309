use crate::error::{FsError, Result};
use crate::node::{InodeId, INODE_SIZE, NUM_DIRECT_POINTERS};

pub const SB_MAGIC: u32 = 0x434C_4653; // CLFS
const SB_VERSION: u16 = 1;

/// Number of bytes the encoded superblock occupies at the start of cluster 0.
pub const SUPERBLOCK_SIZE: usize = 316;

pub const SIGNATURE: &str = "clusterfs";
pub const SIGNATURE_LEN: usize = 9;
pub const VOLUME_DESCRIPTION: &str = "A simple cluster based file system emulator";
pub const VOLUME_DESC_LEN: usize = 251;

pub const MIN_CLUSTER_SIZE: u32 = 512;
pub const MAX_CLUSTER_SIZE: u32 = 65536;
pub const DEFAULT_CLUSTER_SIZE: u32 = 512;
/// One inode for every 4 KiB of image unless told otherwise.
pub const DEFAULT_BYTES_PER_INODE: u32 = 4096;

/// The inode table and the bitmap live in memory while mounted, so both are capped.
pub const MAX_INODE_COUNT: u64 = 1 << 20;
pub const MAX_CLUSTER_COUNT: u64 = 1 << 27;

pub const ROOT_INODE_ID: InodeId = 0;

// Field offsets inside the encoded superblock.
const OFF_MAGIC: usize = 0;
const OFF_VERSION: usize = 4;
const OFF_IMAGE_SIZE: usize = 8;
const OFF_CLUSTER_SIZE: usize = 16;
const OFF_CLUSTER_COUNT: usize = 20;
const OFF_INODE_COUNT: usize = 24;
const OFF_ROOT_INODE: usize = 28;
const OFF_BITMAP: usize = 32;
const OFF_INODE_TABLE: usize = 40;
const OFF_DATA: usize = 48;
const OFF_SIGNATURE: usize = 56;
const OFF_DESCRIPTION: usize = OFF_SIGNATURE + SIGNATURE_LEN;

/// Parameters accepted by `format`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormatOptions {
    /// Cluster size in bytes; a power of two between 512 and 65536.
    pub cluster_size: u32,
    /// Image bytes per inode, used when `inode_count` is not set.
    pub bytes_per_inode: u32,
    /// Exact number of inodes to create.
    pub inode_count: Option<u32>,
}

impl Default for FormatOptions {
    fn default() -> Self {
        Self {
            cluster_size: DEFAULT_CLUSTER_SIZE,
            bytes_per_inode: DEFAULT_BYTES_PER_INODE,
            inode_count: None,
        }
    }
}

/// The first cluster of the file system storing information critical for mounting
/// the file system and verifying the underlying disk is formatted correctly.
///
/// Every other structure is located through the offsets kept here, so images of
/// different sizes and cluster sizes can coexist.
///
/// # Layout
/// ================================================================
/// | SuperBlock | Bitmap (data region) | Inode table | Data region |
/// ================================================================
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SuperBlock {
    pub signature: String,
    pub description: String,
    /// Size of the backing image in bytes.
    pub image_size: u64,
    pub cluster_size: u32,
    /// Number of clusters in the data region (and bits in the bitmap).
    pub cluster_count: u32,
    pub inode_count: u32,
    pub root_inode: InodeId,
    /// Byte offset of the bitmap.
    pub bitmap_offset: u64,
    /// Byte offset of the inode table.
    pub inode_table_offset: u64,
    /// Byte offset of the first data cluster.
    pub data_offset: u64,
}

fn div_ceil(n: u64, d: u64) -> u64 {
    (n + d - 1) / d
}

fn field<const N: usize>(buf: &[u8], offset: usize) -> Result<[u8; N]> {
    buf.get(offset..offset + N)
        .and_then(|bytes| bytes.try_into().ok())
        .ok_or_else(|| {
            FsError::Corrupted(format!(
                "superblock truncated: need {} bytes at offset {}",
                N, offset
            ))
        })
}

fn fixed_str(bytes: &[u8]) -> String {
    let len = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
    String::from_utf8_lossy(&bytes[..len]).into_owned()
}

fn put_str(buf: &mut [u8], offset: usize, len: usize, value: &str) {
    let bytes = value.as_bytes();
    let n = bytes.len().min(len);
    buf[offset..offset + n].copy_from_slice(&bytes[..n]);
}

impl SuperBlock {
    /// Computes the layout of a fresh image of `image_size` bytes.
    ///
    /// Cluster 0 holds the superblock, followed by as many bitmap clusters as the
    /// data region needs, the inode table, and the data region itself.
    pub fn plan(image_size: u64, opts: &FormatOptions) -> Result<Self> {
        let c = opts.cluster_size;
        if !c.is_power_of_two() || !(MIN_CLUSTER_SIZE..=MAX_CLUSTER_SIZE).contains(&c) {
            return Err(FsError::Configuration(format!(
                "cluster size {} must be a power of two between {} and {}",
                c, MIN_CLUSTER_SIZE, MAX_CLUSTER_SIZE
            )));
        }
        let c = c as u64;

        let inode_count = match opts.inode_count {
            Some(n) => n as u64,
            None => {
                if opts.bytes_per_inode == 0 {
                    return Err(FsError::Configuration(
                        "bytes per inode must be non-zero".to_string(),
                    ));
                }
                (image_size / opts.bytes_per_inode as u64).max(1)
            }
        };
        if inode_count == 0 || inode_count > MAX_INODE_COUNT {
            return Err(FsError::Configuration(format!(
                "inode count {} out of range 1..={}",
                inode_count, MAX_INODE_COUNT
            )));
        }

        let total = image_size / c;
        if total > MAX_CLUSTER_COUNT {
            return Err(FsError::Configuration(format!(
                "image of {} bytes has more than {} clusters of {} bytes",
                image_size, MAX_CLUSTER_COUNT, c
            )));
        }
        let inode_blocks = div_ceil(inode_count * INODE_SIZE as u64, c);
        // Superblock, inode table, at least one bitmap cluster and one data cluster.
        if total < 1 + inode_blocks + 2 {
            return Err(FsError::Configuration(format!(
                "{} bytes cannot hold the superblock, a bitmap, {} inodes and a data cluster",
                image_size, inode_count
            )));
        }
        let remaining = total - 1 - inode_blocks;
        let bitmap_blocks = div_ceil(remaining, 8 * c + 1);
        let data_blocks = remaining - bitmap_blocks;

        let bitmap_offset = c;
        let inode_table_offset = bitmap_offset + bitmap_blocks * c;
        let data_offset = inode_table_offset + inode_blocks * c;

        Ok(Self {
            signature: SIGNATURE.to_string(),
            description: VOLUME_DESCRIPTION.to_string(),
            image_size,
            cluster_size: c as u32,
            cluster_count: data_blocks as u32,
            inode_count: inode_count as u32,
            root_inode: ROOT_INODE_ID,
            bitmap_offset,
            inode_table_offset,
            data_offset,
        })
    }

    /// Reads the superblock from the head of a buffer. The magic constant and the
    /// derived offsets are validated so a foreign file is rejected instead of mounted.
    pub fn parse(buf: &[u8]) -> Result<Self> {
        let magic = u32::from_be_bytes(field(buf, OFF_MAGIC)?);
        if magic != SB_MAGIC {
            return Err(FsError::Corrupted(format!(
                "superblock magic {:#010x} invalid",
                magic
            )));
        }
        let version = u16::from_be_bytes(field(buf, OFF_VERSION)?);
        if version != SB_VERSION {
            return Err(FsError::Corrupted(format!(
                "unsupported superblock version {}",
                version
            )));
        }

        let sb = Self {
            signature: fixed_str(&field::<SIGNATURE_LEN>(buf, OFF_SIGNATURE)?),
            description: fixed_str(&field::<VOLUME_DESC_LEN>(buf, OFF_DESCRIPTION)?),
            image_size: u64::from_be_bytes(field(buf, OFF_IMAGE_SIZE)?),
            cluster_size: u32::from_be_bytes(field(buf, OFF_CLUSTER_SIZE)?),
            cluster_count: u32::from_be_bytes(field(buf, OFF_CLUSTER_COUNT)?),
            inode_count: u32::from_be_bytes(field(buf, OFF_INODE_COUNT)?),
            root_inode: u32::from_be_bytes(field(buf, OFF_ROOT_INODE)?),
            bitmap_offset: u64::from_be_bytes(field(buf, OFF_BITMAP)?),
            inode_table_offset: u64::from_be_bytes(field(buf, OFF_INODE_TABLE)?),
            data_offset: u64::from_be_bytes(field(buf, OFF_DATA)?),
        };
        sb.validate()?;
        Ok(sb)
    }

    fn validate(&self) -> Result<()> {
        let c = self.cluster_size as u64;
        let ok = self.cluster_size.is_power_of_two()
            && (MIN_CLUSTER_SIZE..=MAX_CLUSTER_SIZE).contains(&self.cluster_size)
            && self.bitmap_offset == c
            && self.bitmap_offset < self.inode_table_offset
            && self.inode_table_offset < self.data_offset
            && self.inode_table_offset % c == 0
            && self.data_offset % c == 0
            && self.inode_count > 0
            && self.inode_count as u64 <= MAX_INODE_COUNT
            && self.cluster_count as u64 <= MAX_CLUSTER_COUNT
            && self.root_inode < self.inode_count
            && self.cluster_count > 0
            && self.data_offset + self.cluster_count as u64 * c <= self.image_size
            && self.bitmap_blocks() as u64 * c * 8 >= self.cluster_count as u64
            && self.inode_table_blocks() as u64 * c >= self.inode_count as u64 * INODE_SIZE as u64;
        if !ok {
            return Err(FsError::Corrupted(
                "superblock offsets are inconsistent".to_string(),
            ));
        }
        Ok(())
    }

    /// Serializes the SuperBlock into a SUPERBLOCK_SIZE buffer for writing to disk.
    /// The encoding is a series of fields at fixed offsets with big endian byte order.
    pub fn serialize(&self) -> Vec<u8> {
        let mut buf = vec![0; SUPERBLOCK_SIZE];
        buf[OFF_MAGIC..OFF_MAGIC + 4].copy_from_slice(&SB_MAGIC.to_be_bytes());
        buf[OFF_VERSION..OFF_VERSION + 2].copy_from_slice(&SB_VERSION.to_be_bytes());
        buf[OFF_IMAGE_SIZE..OFF_IMAGE_SIZE + 8].copy_from_slice(&self.image_size.to_be_bytes());
        buf[OFF_CLUSTER_SIZE..OFF_CLUSTER_SIZE + 4]
            .copy_from_slice(&self.cluster_size.to_be_bytes());
        buf[OFF_CLUSTER_COUNT..OFF_CLUSTER_COUNT + 4]
            .copy_from_slice(&self.cluster_count.to_be_bytes());
        buf[OFF_INODE_COUNT..OFF_INODE_COUNT + 4].copy_from_slice(&self.inode_count.to_be_bytes());
        buf[OFF_ROOT_INODE..OFF_ROOT_INODE + 4].copy_from_slice(&self.root_inode.to_be_bytes());
        buf[OFF_BITMAP..OFF_BITMAP + 8].copy_from_slice(&self.bitmap_offset.to_be_bytes());
        buf[OFF_INODE_TABLE..OFF_INODE_TABLE + 8]
            .copy_from_slice(&self.inode_table_offset.to_be_bytes());
        buf[OFF_DATA..OFF_DATA + 8].copy_from_slice(&self.data_offset.to_be_bytes());
        put_str(&mut buf, OFF_SIGNATURE, SIGNATURE_LEN, &self.signature);
        put_str(&mut buf, OFF_DESCRIPTION, VOLUME_DESC_LEN, &self.description);
        buf
    }

    fn block_of(&self, offset: u64) -> usize {
        (offset / self.cluster_size as u64) as usize
    }

    /// Total number of device blocks the image spans.
    pub fn total_blocks(&self) -> usize {
        (self.image_size / self.cluster_size as u64) as usize
    }

    pub fn bitmap_block(&self) -> usize {
        self.block_of(self.bitmap_offset)
    }

    pub fn bitmap_blocks(&self) -> usize {
        self.block_of(self.inode_table_offset) - self.bitmap_block()
    }

    pub fn inode_table_block(&self) -> usize {
        self.block_of(self.inode_table_offset)
    }

    pub fn inode_table_blocks(&self) -> usize {
        self.block_of(self.data_offset) - self.inode_table_block()
    }

    /// Device block backing data cluster `index`.
    pub fn data_block(&self, index: u32) -> usize {
        self.block_of(self.data_offset) + index as usize
    }

    /// Number of cluster pointers an index cluster holds.
    pub fn pointers_per_cluster(&self) -> u64 {
        self.cluster_size as u64 / 4
    }

    /// Largest file the direct, single indirect and double indirect pointers address.
    pub fn max_file_size(&self) -> u64 {
        let p = self.pointers_per_cluster();
        (NUM_DIRECT_POINTERS as u64 + p + p * p) * self.cluster_size as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MIB: u64 = 1024 * 1024;

    #[test]
    fn can_encode_and_decode_superblocks() {
        let sb = SuperBlock::plan(MIB, &FormatOptions::default()).unwrap();
        let encoded = sb.serialize();

        let parsed = SuperBlock::parse(&encoded).unwrap();

        assert_eq!(parsed, sb);
    }

    #[test]
    fn plans_one_mebibyte_image_with_512_byte_clusters() {
        let sb = SuperBlock::plan(MIB, &FormatOptions::default()).unwrap();

        assert_eq!(sb.inode_count, 256);
        assert_eq!(sb.bitmap_offset, 512);
        assert_eq!(sb.bitmap_blocks(), 1);
        assert_eq!(sb.inode_table_blocks(), 256 * INODE_SIZE / 512);
        assert_eq!(sb.cluster_count, 2048 - 1 - 1 - 32);
        assert_eq!(sb.data_offset, (1 + 1 + 32) * 512);
        assert_eq!(sb.max_file_size(), (5 + 128 + 128 * 128) * 512);
    }

    #[test]
    fn bitmap_covers_every_data_cluster() {
        for size in [64 * 1024, 3 * MIB + 17, 50_000_000] {
            let sb = SuperBlock::plan(size, &FormatOptions::default()).unwrap();
            assert!(sb.bitmap_blocks() * sb.cluster_size as usize * 8 >= sb.cluster_count as usize);
            assert!(sb.data_offset + sb.cluster_count as u64 * 512 <= size);
        }
    }

    #[test]
    fn rejects_images_too_small_for_minimal_layout() {
        let opts = FormatOptions {
            inode_count: Some(1),
            ..FormatOptions::default()
        };
        match SuperBlock::plan(3 * 512, &opts) {
            Err(FsError::Configuration(_)) => (),
            other => panic!("unexpected result {:?}", other),
        }
        // Superblock, bitmap, one inode cluster and one data cluster is the minimum.
        let sb = SuperBlock::plan(4 * 512, &opts).unwrap();
        assert_eq!(sb.cluster_count, 1);
    }

    #[test]
    fn rejects_bad_cluster_sizes() {
        for cluster_size in [0, 256, 1000, 131072] {
            let opts = FormatOptions {
                cluster_size,
                ..FormatOptions::default()
            };
            assert!(matches!(
                SuperBlock::plan(MIB, &opts),
                Err(FsError::Configuration(_))
            ));
        }
    }

    #[test]
    fn rejects_images_too_large_to_mount() {
        assert!(matches!(
            SuperBlock::plan(600_000_000_000, &FormatOptions::default()),
            Err(FsError::Configuration(_))
        ));

        let opts = FormatOptions {
            inode_count: Some(MAX_INODE_COUNT as u32 + 1),
            ..FormatOptions::default()
        };
        assert!(matches!(
            SuperBlock::plan(1 << 30, &opts),
            Err(FsError::Configuration(_))
        ));

        let opts = FormatOptions {
            cluster_size: MAX_CLUSTER_SIZE,
            ..FormatOptions::default()
        };
        assert!(SuperBlock::plan(1 << 32, &opts).is_ok());
    }

    #[test]
    fn parsing_buffer_with_invalid_magic_fails() {
        let zero_buffer_with_right_size = vec![0; 512];
        assert!(matches!(
            SuperBlock::parse(&zero_buffer_with_right_size),
            Err(FsError::Corrupted(_))
        ));
    }

    #[test]
    fn parsing_truncated_buffer_fails() {
        let sb = SuperBlock::plan(MIB, &FormatOptions::default()).unwrap();
        let encoded = sb.serialize();
        assert!(SuperBlock::parse(&encoded[..40]).is_err());
    }
}
