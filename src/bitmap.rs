//! Compressed bitmaps of document ids.
//!
//! A [`Bitmap`] partitions ids into blocks of 2^16 values keyed by the high
//! bits of the id. Each block is a [`container::Container`] whose encoding
//! (array, bitset or runs) is chosen from the block's density and kept
//! canonical, so equal sets serialize to identical bytes.
//!
//! Every bitmap carries the [`DocIdWidth`] of the collection it belongs to.
//! Inserting an id that does not fit the width is rejected.

pub(crate) mod container;

use std::cmp::Ordering;
use std::fmt;
use std::io::{Read, Write};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use serde::{Deserialize, Serialize};

use crate::error::{Result, StrataError};

use self::container::{Container, ContainerIter};

/// Width of document ids in a collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum DocIdWidth {
    /// Ids fit in 32 bits.
    U32,
    /// Ids fit in 64 bits.
    U64,
}

impl DocIdWidth {
    /// Largest id representable with this width.
    pub fn max_id(self) -> u64 {
        match self {
            DocIdWidth::U32 => u32::MAX as u64,
            DocIdWidth::U64 => u64::MAX,
        }
    }

    /// Number of bits.
    pub fn bits(self) -> u8 {
        match self {
            DocIdWidth::U32 => 32,
            DocIdWidth::U64 => 64,
        }
    }

    /// Parse a bit count.
    pub fn from_bits(bits: u8) -> Option<Self> {
        match bits {
            32 => Some(DocIdWidth::U32),
            64 => Some(DocIdWidth::U64),
            _ => None,
        }
    }

    /// Check that `id` fits this width.
    pub fn check(self, id: u64) -> Result<()> {
        if id > self.max_id() {
            return Err(StrataError::invariant(format!(
                "docid {id} overflows the configured {}-bit docid width",
                self.bits()
            )));
        }
        Ok(())
    }
}

impl Default for DocIdWidth {
    fn default() -> Self {
        DocIdWidth::U32
    }
}

impl TryFrom<u8> for DocIdWidth {
    type Error = String;

    fn try_from(bits: u8) -> std::result::Result<Self, Self::Error> {
        DocIdWidth::from_bits(bits).ok_or_else(|| format!("docid width must be 32 or 64, got {bits}"))
    }
}

impl From<DocIdWidth> for u8 {
    fn from(width: DocIdWidth) -> u8 {
        width.bits()
    }
}

impl fmt::Display for DocIdWidth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-bit", self.bits())
    }
}

#[inline]
fn split(id: u64) -> (u64, u16) {
    (id >> 16, id as u16)
}

#[inline]
fn join(key: u64, low: u16) -> u64 {
    (key << 16) | low as u64
}

/// A compressed set of document ids.
#[derive(Clone, PartialEq, Eq, Default)]
pub struct Bitmap {
    width: DocIdWidth,
    blocks: Vec<(u64, Container)>,
}

impl fmt::Debug for Bitmap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        const SHOWN: usize = 16;
        let ids: Vec<u64> = self.iter().take(SHOWN).collect();
        let cardinality = self.cardinality();
        f.debug_struct("Bitmap")
            .field("width", &self.width)
            .field("cardinality", &cardinality)
            .field("ids", &ids)
            .field("truncated", &(cardinality > SHOWN as u64))
            .finish()
    }
}

impl Bitmap {
    /// Create an empty bitmap.
    pub fn new(width: DocIdWidth) -> Self {
        Bitmap {
            width,
            blocks: Vec::new(),
        }
    }

    /// Build a bitmap from ids in any order; duplicates are ignored.
    pub fn from_ids<I>(width: DocIdWidth, ids: I) -> Result<Self>
    where
        I: IntoIterator<Item = u64>,
    {
        let mut ids: Vec<u64> = ids.into_iter().collect();
        ids.sort_unstable();
        ids.dedup();
        Self::from_sorted_iter(width, ids)
    }

    /// Build a bitmap from strictly ascending ids, one block at a time.
    ///
    /// Out-of-order or repeated ids are an `Invariant` error.
    pub fn from_sorted_iter<I>(width: DocIdWidth, ids: I) -> Result<Self>
    where
        I: IntoIterator<Item = u64>,
    {
        let mut blocks = Vec::new();
        let mut current_key: Option<u64> = None;
        let mut values: Vec<u16> = Vec::new();
        let mut last: Option<u64> = None;
        for id in ids {
            if let Some(prev) = last
                && id <= prev
            {
                return Err(StrataError::invariant(format!(
                    "ids are not strictly ascending: {id} after {prev}"
                )));
            }
            width.check(id)?;
            last = Some(id);
            let (key, low) = split(id);
            if current_key != Some(key) {
                if let Some(prev) = current_key
                    && let Some(container) = Container::from_sorted(std::mem::take(&mut values))
                {
                    blocks.push((prev, container));
                }
                current_key = Some(key);
            }
            values.push(low);
        }
        if let Some(prev) = current_key
            && let Some(container) = Container::from_sorted(values)
        {
            blocks.push((prev, container));
        }

        Ok(Bitmap { width, blocks })
    }

    /// Bitmap holding every id in `[0, len)`.
    pub fn full(width: DocIdWidth, len: u64) -> Result<Self> {
        if len == 0 {
            return Ok(Bitmap::new(width));
        }
        width.check(len - 1)?;
        let (last_key, last_low) = split(len - 1);
        let mut blocks = Vec::with_capacity(last_key as usize + 1);
        for key in 0..=last_key {
            let end = if key == last_key { last_low } else { u16::MAX };
            blocks.push((key, Container::from_range(0, end)));
        }
        Ok(Bitmap { width, blocks })
    }

    /// Id width of this bitmap.
    pub fn width(&self) -> DocIdWidth {
        self.width
    }

    fn find_block(&self, key: u64) -> std::result::Result<usize, usize> {
        self.blocks.binary_search_by_key(&key, |(k, _)| *k)
    }

    /// Add an id. Returns `true` when it was not present before.
    pub fn insert(&mut self, id: u64) -> Result<bool> {
        self.width.check(id)?;
        let (key, low) = split(id);
        match self.find_block(key) {
            Ok(idx) => Ok(self.blocks[idx].1.insert(low)),
            Err(idx) => {
                let container = Container::from_sorted(vec![low])
                    .ok_or_else(|| StrataError::invariant("empty single-value container"))?;
                self.blocks.insert(idx, (key, container));
                Ok(true)
            }
        }
    }

    /// Remove an id. Returns `true` when it was present.
    pub fn remove(&mut self, id: u64) -> bool {
        let (key, low) = split(id);
        let Ok(idx) = self.find_block(key) else {
            return false;
        };
        let removed = self.blocks[idx].1.remove(low);
        if self.blocks[idx].1.is_empty() {
            self.blocks.remove(idx);
        }
        removed
    }

    /// Membership test.
    pub fn contains(&self, id: u64) -> bool {
        let (key, low) = split(id);
        match self.find_block(key) {
            Ok(idx) => self.blocks[idx].1.contains(low),
            Err(_) => false,
        }
    }

    /// Number of ids in the set.
    pub fn cardinality(&self) -> u64 {
        self.blocks
            .iter()
            .map(|(_, container)| container.cardinality() as u64)
            .sum()
    }

    /// Alias of [`Bitmap::cardinality`].
    pub fn len(&self) -> u64 {
        self.cardinality()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    /// Number of ids strictly lower than `id`.
    pub fn rank(&self, id: u64) -> u64 {
        let (key, low) = split(id);
        let mut rank = 0u64;
        for (block_key, container) in &self.blocks {
            match block_key.cmp(&key) {
                Ordering::Less => rank += container.cardinality() as u64,
                Ordering::Equal => {
                    rank += container.rank(low) as u64;
                    break;
                }
                Ordering::Greater => break,
            }
        }
        rank
    }

    pub fn min(&self) -> Option<u64> {
        let (key, container) = self.blocks.first()?;
        container.min().map(|low| join(*key, low))
    }

    pub fn max(&self) -> Option<u64> {
        let (key, container) = self.blocks.last()?;
        container.max().map(|low| join(*key, low))
    }

    /// Ascending iterator over the ids. Calling `iter` again restarts.
    pub fn iter(&self) -> Iter<'_> {
        Iter {
            blocks: self.blocks.iter(),
            current: None,
        }
    }

    /// Set union. Neither input is modified.
    pub fn union(&self, other: &Bitmap) -> Bitmap {
        let mut blocks = Vec::with_capacity(self.blocks.len().max(other.blocks.len()));
        let (mut i, mut j) = (0, 0);
        while i < self.blocks.len() && j < other.blocks.len() {
            let (lk, lc) = &self.blocks[i];
            let (rk, rc) = &other.blocks[j];
            match lk.cmp(rk) {
                Ordering::Less => {
                    blocks.push((*lk, lc.clone()));
                    i += 1;
                }
                Ordering::Greater => {
                    blocks.push((*rk, rc.clone()));
                    j += 1;
                }
                Ordering::Equal => {
                    if let Some(container) = lc.union(rc) {
                        blocks.push((*lk, container));
                    }
                    i += 1;
                    j += 1;
                }
            }
        }
        blocks.extend(self.blocks[i..].iter().cloned());
        blocks.extend(other.blocks[j..].iter().cloned());
        Bitmap {
            width: self.width.max(other.width),
            blocks,
        }
    }

    /// Set intersection. Neither input is modified.
    pub fn intersect(&self, other: &Bitmap) -> Bitmap {
        let mut blocks = Vec::new();
        let (mut i, mut j) = (0, 0);
        while i < self.blocks.len() && j < other.blocks.len() {
            let (lk, lc) = &self.blocks[i];
            let (rk, rc) = &other.blocks[j];
            match lk.cmp(rk) {
                Ordering::Less => i += 1,
                Ordering::Greater => j += 1,
                Ordering::Equal => {
                    if let Some(container) = lc.intersect(rc) {
                        blocks.push((*lk, container));
                    }
                    i += 1;
                    j += 1;
                }
            }
        }
        Bitmap {
            width: self.width.max(other.width),
            blocks,
        }
    }

    /// Ids of `self` that are not in `other`. Neither input is modified.
    pub fn difference(&self, other: &Bitmap) -> Bitmap {
        let mut blocks = Vec::with_capacity(self.blocks.len());
        let mut j = 0;
        for (key, container) in &self.blocks {
            while j < other.blocks.len() && other.blocks[j].0 < *key {
                j += 1;
            }
            if j < other.blocks.len() && other.blocks[j].0 == *key {
                if let Some(diff) = container.difference(&other.blocks[j].1) {
                    blocks.push((*key, diff));
                }
            } else {
                blocks.push((*key, container.clone()));
            }
        }
        Bitmap {
            width: self.width.max(other.width),
            blocks,
        }
    }

    /// Write the canonical encoding of this bitmap.
    pub fn serialize_into<W: Write>(&self, writer: &mut W) -> Result<()> {
        writer.write_u8(self.width.bits())?;
        writer.write_u32::<LittleEndian>(self.blocks.len() as u32)?;
        for (key, container) in &self.blocks {
            writer.write_u64::<LittleEndian>(*key)?;
            container.serialize(writer)?;
        }
        Ok(())
    }

    /// Read a bitmap written by [`Bitmap::serialize_into`].
    pub fn deserialize_from<R: Read>(reader: &mut R) -> Result<Self> {
        let bits = reader.read_u8()?;
        let width = DocIdWidth::from_bits(bits)
            .ok_or_else(|| StrataError::corrupted(format!("invalid bitmap width {bits}")))?;
        let count = reader.read_u32::<LittleEndian>()? as usize;
        let max_key = width.max_id() >> 16;
        let mut blocks: Vec<(u64, Container)> = Vec::with_capacity(count.min(1 << 16));
        for _ in 0..count {
            let key = reader.read_u64::<LittleEndian>()?;
            if key > max_key || blocks.last().is_some_and(|(prev, _)| *prev >= key) {
                return Err(StrataError::corrupted(format!(
                    "bitmap block key {key} is out of order or exceeds the {width} width"
                )));
            }
            let container = Container::deserialize(reader).map_err(|e| {
                if e.kind() == std::io::ErrorKind::InvalidData {
                    StrataError::corrupted(e.to_string())
                } else {
                    StrataError::Io(e)
                }
            })?;
            blocks.push((key, container));
        }
        Ok(Bitmap { width, blocks })
    }

    /// Canonical byte encoding.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::new();
        // Writing into a Vec cannot fail.
        let _ = self.serialize_into(&mut bytes);
        bytes
    }
}

impl<'a> IntoIterator for &'a Bitmap {
    type Item = u64;
    type IntoIter = Iter<'a>;

    fn into_iter(self) -> Iter<'a> {
        self.iter()
    }
}

/// Ascending iterator over the ids of a [`Bitmap`].
pub struct Iter<'a> {
    blocks: std::slice::Iter<'a, (u64, Container)>,
    current: Option<(u64, ContainerIter<'a>)>,
}

impl Iterator for Iter<'_> {
    type Item = u64;

    fn next(&mut self) -> Option<u64> {
        loop {
            if let Some((key, iter)) = self.current.as_mut()
                && let Some(low) = iter.next()
            {
                return Some(join(*key, low));
            }
            let (key, container) = self.blocks.next()?;
            self.current = Some((*key, container.iter()));
        }
    }
}
