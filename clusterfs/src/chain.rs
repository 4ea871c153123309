//! Maps the clusters of a file onto the pointers of its inode.
//!
//! The first [`NUM_DIRECT_POINTERS`] data clusters are referenced from the inode
//! itself. The next `P` (pointers per cluster) live in the single indirect cluster,
//! and the rest are reached through the double indirect cluster, whose entries each
//! point at a second level cluster of `P` data pointers.
//!
//! Index clusters are always listed in the same order: the single indirect cluster,
//! the double indirect cluster, then every second level cluster in the order it
//! appears in the double indirect cluster.

use zerocopy::byteorder::{BigEndian, U32};
use zerocopy::{AsBytes, FromBytes};

use crate::error::{FsError, Result};
use crate::node::{ClusterIndex, Inode, NUM_DIRECT_POINTERS};

/// The clusters a single inode owns.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Chain {
    /// Data clusters in content order.
    pub data: Vec<ClusterIndex>,
    /// Index clusters holding pointers, ordered as described in the module docs.
    pub index: Vec<ClusterIndex>,
}

impl Chain {
    /// Every cluster of the chain, data first.
    pub fn clusters(&self) -> impl Iterator<Item = ClusterIndex> + '_ {
        self.data.iter().chain(self.index.iter()).copied()
    }
}

/// Number of data clusters holding `size` bytes.
pub fn data_clusters_for(size: u64, cluster_size: u32) -> u64 {
    let c = cluster_size as u64;
    (size + c - 1) / c
}

/// Number of index clusters required to address `data` data clusters.
pub fn index_clusters_for(data: u64, pointers_per_cluster: u64) -> u64 {
    let p = pointers_per_cluster;
    let mut rest = data.saturating_sub(NUM_DIRECT_POINTERS as u64);
    if rest == 0 {
        return 0;
    }
    // Single indirect.
    let mut index = 1;
    rest = rest.saturating_sub(p);
    if rest > 0 {
        // Double indirect plus its second level clusters.
        index += 1 + (rest + p - 1) / p;
    }
    index
}

/// Total clusters, data plus index, a chain of `size` bytes occupies.
pub fn clusters_for(size: u64, cluster_size: u32) -> u64 {
    let data = data_clusters_for(size, cluster_size);
    data + index_clusters_for(data, cluster_size as u64 / 4)
}

/// Pointer clusters to write when laying out a chain, as `(cluster, contents)`.
pub type IndexBlocks = Vec<(ClusterIndex, Vec<u8>)>;

/// Records `chain` in the pointer fields of `node` and returns the index clusters
/// that must be written for the pointers to resolve.
///
/// `chain.index` must hold exactly `index_clusters_for(chain.data.len())` clusters.
pub fn attach(node: &mut Inode, chain: &Chain, cluster_size: u32) -> Result<IndexBlocks> {
    let p = cluster_size as usize / 4;
    let expected = index_clusters_for(chain.data.len() as u64, p as u64) as usize;
    if chain.index.len() != expected {
        return Err(FsError::InvalidArgument(format!(
            "chain of {} data clusters needs {} index clusters, got {}",
            chain.data.len(),
            expected,
            chain.index.len()
        )));
    }

    node.direct = [None; NUM_DIRECT_POINTERS];
    node.single_indirect = None;
    node.double_indirect = None;
    let mut blocks = IndexBlocks::new();

    let (direct, rest) = chain.data.split_at(chain.data.len().min(NUM_DIRECT_POINTERS));
    for (slot, cluster) in node.direct.iter_mut().zip(direct) {
        *slot = Some(*cluster);
    }
    if rest.is_empty() {
        return Ok(blocks);
    }

    let mut index = chain.index.iter().copied();
    let (single, rest) = rest.split_at(rest.len().min(p));
    let single_cluster = next_index(&mut index)?;
    node.single_indirect = Some(single_cluster);
    blocks.push((single_cluster, encode_pointers(single, cluster_size)));
    if rest.is_empty() {
        return Ok(blocks);
    }

    let double_cluster = next_index(&mut index)?;
    node.double_indirect = Some(double_cluster);
    let mut second_level = Vec::new();
    for group in rest.chunks(p) {
        let cluster = next_index(&mut index)?;
        second_level.push(cluster);
        blocks.push((cluster, encode_pointers(group, cluster_size)));
    }
    blocks.insert(1, (double_cluster, encode_pointers(&second_level, cluster_size)));
    Ok(blocks)
}

fn next_index(index: &mut impl Iterator<Item = ClusterIndex>) -> Result<ClusterIndex> {
    index
        .next()
        .ok_or_else(|| FsError::InvalidArgument("chain is missing index clusters".to_string()))
}

/// Encodes pointers as big endian words padded with zeros to a full cluster.
pub fn encode_pointers(pointers: &[ClusterIndex], cluster_size: u32) -> Vec<u8> {
    let words: Vec<U32<BigEndian>> = pointers.iter().map(|p| U32::new(*p)).collect();
    let mut buf = words.as_slice().as_bytes().to_vec();
    buf.resize(cluster_size as usize, 0);
    buf
}

/// Decodes the first `count` pointers of an index cluster.
pub fn decode_pointers(buf: &[u8], count: usize) -> Result<Vec<ClusterIndex>> {
    let words = buf
        .get(..count * 4)
        .and_then(U32::<BigEndian>::slice_from)
        .ok_or_else(|| {
            FsError::Corrupted(format!(
                "index cluster of {} bytes cannot hold {} pointers",
                buf.len(),
                count
            ))
        })?;
    Ok(words.iter().map(|w| w.get()).collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    const P: u64 = 128;

    #[test]
    fn small_files_need_no_index_clusters() {
        assert_eq!(index_clusters_for(0, P), 0);
        assert_eq!(index_clusters_for(5, P), 0);
        assert_eq!(clusters_for(0, 512), 0);
        assert_eq!(clusters_for(1, 512), 1);
        assert_eq!(clusters_for(5 * 512, 512), 5);
    }

    #[test]
    fn index_clusters_grow_with_indirection() {
        assert_eq!(index_clusters_for(6, P), 1);
        assert_eq!(index_clusters_for(5 + P, P), 1);
        // Double indirect plus one second level cluster.
        assert_eq!(index_clusters_for(5 + P + 1, P), 3);
        assert_eq!(index_clusters_for(5 + 2 * P, P), 3);
        assert_eq!(index_clusters_for(5 + 2 * P + 1, P), 4);
        assert_eq!(index_clusters_for(5 + P + P * P, P), 2 + P);
    }

    #[test]
    fn pointers_are_big_endian_words() {
        let buf = encode_pointers(&[1, 0x0102_0304], 512);
        assert_eq!(buf.len(), 512);
        assert_eq!(&buf[..8], &[0, 0, 0, 1, 1, 2, 3, 4]);
        assert_eq!(decode_pointers(&buf, 2).unwrap(), vec![1, 0x0102_0304]);
    }

    #[test]
    fn decoding_more_pointers_than_fit_fails() {
        assert!(matches!(
            decode_pointers(&[0; 512], 129),
            Err(FsError::Corrupted(_))
        ));
    }

    #[test]
    fn attach_fills_direct_pointers_only_for_short_chains() {
        let mut node = Inode::free(1);
        let chain = Chain {
            data: vec![7, 8, 9],
            index: vec![],
        };
        let blocks = attach(&mut node, &chain, 512).unwrap();
        assert!(blocks.is_empty());
        assert_eq!(node.direct, [Some(7), Some(8), Some(9), None, None]);
        assert_eq!(node.single_indirect, None);
    }

    #[test]
    fn attach_spills_into_double_indirect() {
        let mut node = Inode::free(1);
        let data: Vec<u32> = (100..100 + 5 + 128 + 130).collect();
        let chain = Chain {
            data: data.clone(),
            index: vec![1, 2, 3, 4],
        };

        let blocks = attach(&mut node, &chain, 512).unwrap();

        assert_eq!(node.single_indirect, Some(1));
        assert_eq!(node.double_indirect, Some(2));
        let order: Vec<u32> = blocks.iter().map(|(c, _)| *c).collect();
        assert_eq!(order, vec![1, 2, 3, 4]);
        assert_eq!(decode_pointers(&blocks[0].1, 128).unwrap(), data[5..133].to_vec());
        assert_eq!(decode_pointers(&blocks[1].1, 2).unwrap(), vec![3, 4]);
        assert_eq!(decode_pointers(&blocks[3].1, 2).unwrap(), data[261..].to_vec());
    }

    #[test]
    fn attach_rejects_wrong_index_count() {
        let mut node = Inode::free(1);
        let chain = Chain {
            data: (0..6).collect(),
            index: vec![],
        };
        assert!(attach(&mut node, &chain, 512).is_err());
    }
}
