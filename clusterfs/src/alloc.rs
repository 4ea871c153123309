use crate::error::{FsError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Free,
    Used,
}

/// One bit per data cluster, least significant bit first within every byte. The
/// encoding is the on-disk format as well, so the bitmap region is a plain copy of
/// `bits`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bitmap {
    bits: Vec<u8>,
    /// Number of meaningful bits; trailing bits of the last byte are always zero.
    len: usize,
}

impl Bitmap {
    /// An all-free bitmap tracking `len` clusters.
    pub fn new(len: usize) -> Self {
        Self {
            bits: vec![0; (len + 7) / 8],
            len,
        }
    }

    /// Reads `len` bits from the head of `buf`, rejecting buffers that are too short
    /// or have bits set past the end of the map.
    pub fn parse(buf: &[u8], len: usize) -> Result<Self> {
        let bytes = (len + 7) / 8;
        let bits = buf
            .get(..bytes)
            .ok_or_else(|| {
                FsError::Corrupted(format!(
                    "bitmap needs {} bytes, region has {}",
                    bytes,
                    buf.len()
                ))
            })?
            .to_vec();
        let map = Self { bits, len };
        if len % 8 != 0 {
            let tail = map.bits[bytes - 1] >> (len % 8);
            if tail != 0 {
                return Err(FsError::Corrupted(
                    "bitmap marks clusters past the end of the data region".to_string(),
                ));
            }
        }
        Ok(map)
    }

    pub fn serialize(&self) -> &[u8] {
        &self.bits
    }

    pub fn get(&self, nr: usize) -> State {
        assert!(nr < self.len, "bit {} outside bitmap of {}", nr, self.len);
        match (self.bits[nr / 8] >> (nr % 8)) & 0b1 {
            0 => State::Free,
            _ => State::Used,
        }
    }

    pub fn set_reserved(&mut self, nr: usize) {
        assert!(nr < self.len, "bit {} outside bitmap of {}", nr, self.len);
        self.bits[nr / 8] |= 1 << (nr % 8);
    }

    pub fn set_free(&mut self, nr: usize) {
        assert!(nr < self.len, "bit {} outside bitmap of {}", nr, self.len);
        self.bits[nr / 8] &= !(1 << (nr % 8));
    }

    pub fn count_used(&self) -> usize {
        self.bits.iter().map(|b| b.count_ones() as usize).sum()
    }

    #[cfg(test)]
    pub fn count_free(&self) -> usize {
        self.len - self.count_used()
    }

    /// Whether at least `n` bits are free. Stops scanning as soon as the answer is known.
    pub fn has_free(&self, n: usize) -> bool {
        n == 0 || NextAvailableAllocation::new(self).nth(n - 1).is_some()
    }
}

/// Implements a naive allocation policy: every call to the iterator returns the next
/// free bit after the previously returned one, starting from the lowest index. The
/// iterator only reads the bitmap; callers reserve what they decide to keep.
///
/// ## Other Pre-Allocation Policies
///
/// 1. Allocation that attempts to find enough contiguous available blocks so data can be allocated
///    close together (speed ups through sequential reads).
/// 2. Allocation that attempts to spread randomly over blocks to prevent wear of physical devices
///    in the front section (that may be rewritten many times before allocating to the back).
pub struct NextAvailableAllocation<'a> {
    /// Keeps track of the next starting place for looking for available blocks.
    marker: usize,
    bitmap: &'a Bitmap,
}

impl<'a> NextAvailableAllocation<'a> {
    pub fn new(bitmap: &'a Bitmap) -> Self {
        Self { marker: 0, bitmap }
    }
}

impl Iterator for NextAvailableAllocation<'_> {
    type Item = usize;

    fn next(&mut self) -> Option<Self::Item> {
        while self.marker < self.bitmap.len {
            let i = self.marker;
            self.marker += 1;
            // Skip fully used bytes in one step.
            if i % 8 == 0 && self.bitmap.bits[i / 8] == 0xFF {
                self.marker = i + 8;
                continue;
            }
            if let State::Free = self.bitmap.get(i) {
                return Some(i);
            }
        }
        None
    }
}
