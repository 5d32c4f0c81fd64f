//! Per-block containers of the compressed bitmap.
//!
//! A block covers 2^16 consecutive ids. Depending on density a block is
//! stored as:
//! - a sorted array of 16-bit values (sparse blocks)
//! - a 2^16-bit bitset (dense blocks)
//! - inclusive `(start, end)` runs (clustered blocks)
//!
//! Every constructor goes through [`Container::from_sorted`] or
//! [`Container::from_words`], which pick the smallest encoding. Two containers
//! holding the same values are therefore always structurally equal.

use std::cmp::Ordering;
use std::io::{self, Read, Write};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

/// Number of 64-bit words in a bitset container.
pub(crate) const BITSET_WORDS: usize = 1024;

const BITSET_BYTES: usize = BITSET_WORDS * 8;

const TAG_ARRAY: u8 = 0;
const TAG_BITSET: u8 = 1;
const TAG_RUN: u8 = 2;

pub(crate) type Words = Box<[u64; BITSET_WORDS]>;

fn empty_words() -> Words {
    Box::new([0u64; BITSET_WORDS])
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Kind {
    Array,
    Run,
    Bitset,
}

/// Pick the encoding with the smallest serialized payload.
/// Ties resolve to Array, then Run, then Bitset.
fn choose_kind(cardinality: usize, runs: usize) -> Kind {
    let array = cardinality * 2;
    let run = runs * 4;
    if array <= run && array <= BITSET_BYTES {
        Kind::Array
    } else if run <= BITSET_BYTES {
        Kind::Run
    } else {
        Kind::Bitset
    }
}

fn runs_of(values: &[u16]) -> Vec<(u16, u16)> {
    let mut runs: Vec<(u16, u16)> = Vec::new();
    for &value in values {
        match runs.last_mut() {
            Some((_, end)) if *end as u32 + 1 == value as u32 => *end = value,
            _ => runs.push((value, value)),
        }
    }
    runs
}

fn count_runs(values: &[u16]) -> usize {
    let mut runs = 0;
    let mut prev: Option<u16> = None;
    for &value in values {
        match prev {
            Some(p) if p as u32 + 1 == value as u32 => {}
            _ => runs += 1,
        }
        prev = Some(value);
    }
    runs
}

fn count_word_runs(words: &[u64; BITSET_WORDS]) -> usize {
    let mut runs = 0usize;
    let mut carry = 0u64;
    for &word in words.iter() {
        let starts = word & !((word << 1) | carry);
        runs += starts.count_ones() as usize;
        carry = word >> 63;
    }
    runs
}

fn words_to_values(words: &[u64; BITSET_WORDS]) -> Vec<u16> {
    let mut values = Vec::new();
    for (word_idx, &word) in words.iter().enumerate() {
        let mut w = word;
        while w != 0 {
            let bit_idx = w.trailing_zeros() as usize;
            values.push((word_idx * 64 + bit_idx) as u16);
            w &= w - 1;
        }
    }
    values
}

fn set_range(words: &mut [u64; BITSET_WORDS], start: u16, end: u16) {
    let (start, end) = (start as usize, end as usize);
    let (first, last) = (start / 64, end / 64);
    for (idx, word) in words.iter_mut().enumerate().take(last + 1).skip(first) {
        let lo = if idx == first { start % 64 } else { 0 };
        let hi = if idx == last { end % 64 } else { 63 };
        let mask = if hi - lo == 63 {
            u64::MAX
        } else {
            ((1u64 << (hi - lo + 1)) - 1) << lo
        };
        *word |= mask;
    }
}

fn insert_into_runs(runs: &mut Vec<(u16, u16)>, value: u16) -> bool {
    let idx = runs.partition_point(|&(_, end)| end < value);
    if idx < runs.len() && runs[idx].0 <= value {
        return false;
    }
    let joins_prev = idx > 0 && runs[idx - 1].1 as u32 + 1 == value as u32;
    let joins_next = idx < runs.len() && value as u32 + 1 == runs[idx].0 as u32;
    match (joins_prev, joins_next) {
        (true, true) => {
            runs[idx - 1].1 = runs[idx].1;
            runs.remove(idx);
        }
        (true, false) => runs[idx - 1].1 = value,
        (false, true) => runs[idx].0 = value,
        (false, false) => runs.insert(idx, (value, value)),
    }
    true
}

fn remove_from_runs(runs: &mut Vec<(u16, u16)>, value: u16) -> bool {
    let idx = runs.partition_point(|&(_, end)| end < value);
    if idx >= runs.len() || runs[idx].0 > value {
        return false;
    }
    let (start, end) = runs[idx];
    if start == end {
        runs.remove(idx);
    } else if value == start {
        runs[idx].0 = start + 1;
    } else if value == end {
        runs[idx].1 = end - 1;
    } else {
        runs[idx].1 = value - 1;
        runs.insert(idx + 1, (value + 1, end));
    }
    true
}

/// Container types for different density patterns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Container {
    /// Sorted array of 16-bit values.
    Array(Vec<u16>),
    /// Bitmap of 2^16 bits.
    Bitset(Words),
    /// Sorted, non-adjacent inclusive `(start, end)` runs.
    Run(Vec<(u16, u16)>),
}

impl Container {
    /// Build the canonical container for strictly ascending values.
    pub(crate) fn from_sorted(values: Vec<u16>) -> Option<Container> {
        if values.is_empty() {
            return None;
        }
        let container = match choose_kind(values.len(), count_runs(&values)) {
            Kind::Array => Container::Array(values),
            Kind::Run => Container::Run(runs_of(&values)),
            Kind::Bitset => {
                let mut words = empty_words();
                for &value in &values {
                    words[value as usize / 64] |= 1u64 << (value % 64);
                }
                Container::Bitset(words)
            }
        };
        Some(container)
    }

    /// Build the canonical container from a bitset.
    pub(crate) fn from_words(words: Words) -> Option<Container> {
        let cardinality: usize = words.iter().map(|w| w.count_ones() as usize).sum();
        if cardinality == 0 {
            return None;
        }
        let container = match choose_kind(cardinality, count_word_runs(&words)) {
            Kind::Array => Container::Array(words_to_values(&words)),
            Kind::Run => Container::Run(runs_of(&words_to_values(&words))),
            Kind::Bitset => Container::Bitset(words),
        };
        Some(container)
    }

    /// Build the canonical container covering `[start, end]`.
    pub(crate) fn from_range(start: u16, end: u16) -> Container {
        let mut words = empty_words();
        set_range(&mut words, start, end);
        // A non-empty range always yields a container.
        Container::from_words(words).unwrap_or(Container::Run(vec![(start, end)]))
    }

    pub(crate) fn cardinality(&self) -> u32 {
        match self {
            Container::Array(values) => values.len() as u32,
            Container::Bitset(words) => words.iter().map(|w| w.count_ones()).sum(),
            Container::Run(runs) => runs
                .iter()
                .map(|&(start, end)| end as u32 - start as u32 + 1)
                .sum(),
        }
    }

    pub(crate) fn contains(&self, value: u16) -> bool {
        match self {
            Container::Array(values) => values.binary_search(&value).is_ok(),
            Container::Bitset(words) => (words[value as usize / 64] >> (value % 64)) & 1 == 1,
            Container::Run(runs) => runs
                .binary_search_by(|&(start, end)| {
                    if value < start {
                        Ordering::Greater
                    } else if value > end {
                        Ordering::Less
                    } else {
                        Ordering::Equal
                    }
                })
                .is_ok(),
        }
    }

    /// Number of values strictly lower than `value`.
    pub(crate) fn rank(&self, value: u16) -> u32 {
        match self {
            Container::Array(values) => values.partition_point(|&v| v < value) as u32,
            Container::Bitset(words) => {
                let word_idx = value as usize / 64;
                let full: u32 = words[..word_idx].iter().map(|w| w.count_ones()).sum();
                let mask = (1u64 << (value % 64)) - 1;
                full + (words[word_idx] & mask).count_ones()
            }
            Container::Run(runs) => {
                let mut rank = 0u32;
                for &(start, end) in runs {
                    if end < value {
                        rank += end as u32 - start as u32 + 1;
                    } else {
                        if start < value {
                            rank += value as u32 - start as u32;
                        }
                        break;
                    }
                }
                rank
            }
        }
    }

    pub(crate) fn min(&self) -> Option<u16> {
        match self {
            Container::Array(values) => values.first().copied(),
            Container::Run(runs) => runs.first().map(|&(start, _)| start),
            Container::Bitset(words) => words
                .iter()
                .enumerate()
                .find(|(_, w)| **w != 0)
                .map(|(idx, w)| (idx * 64 + w.trailing_zeros() as usize) as u16),
        }
    }

    pub(crate) fn max(&self) -> Option<u16> {
        match self {
            Container::Array(values) => values.last().copied(),
            Container::Run(runs) => runs.last().map(|&(_, end)| end),
            Container::Bitset(words) => words
                .iter()
                .enumerate()
                .rev()
                .find(|(_, w)| **w != 0)
                .map(|(idx, w)| (idx * 64 + 63 - w.leading_zeros() as usize) as u16),
        }
    }

    /// Insert a value, keeping the container canonical.
    pub(crate) fn insert(&mut self, value: u16) -> bool {
        let inserted = match self {
            Container::Array(values) => match values.binary_search(&value) {
                Ok(_) => false,
                Err(pos) => {
                    values.insert(pos, value);
                    true
                }
            },
            Container::Bitset(words) => {
                let (idx, bit) = (value as usize / 64, 1u64 << (value % 64));
                let fresh = words[idx] & bit == 0;
                words[idx] |= bit;
                fresh
            }
            Container::Run(runs) => insert_into_runs(runs, value),
        };
        if inserted {
            self.normalize();
        }
        inserted
    }

    /// Remove a value. The container may be left empty; the owning bitmap
    /// drops empty containers.
    pub(crate) fn remove(&mut self, value: u16) -> bool {
        let removed = match self {
            Container::Array(values) => match values.binary_search(&value) {
                Ok(pos) => {
                    values.remove(pos);
                    true
                }
                Err(_) => false,
            },
            Container::Bitset(words) => {
                let (idx, bit) = (value as usize / 64, 1u64 << (value % 64));
                let present = words[idx] & bit != 0;
                words[idx] &= !bit;
                present
            }
            Container::Run(runs) => remove_from_runs(runs, value),
        };
        if removed {
            self.normalize();
        }
        removed
    }

    fn kind(&self) -> Kind {
        match self {
            Container::Array(_) => Kind::Array,
            Container::Run(_) => Kind::Run,
            Container::Bitset(_) => Kind::Bitset,
        }
    }

    /// Re-pick the encoding after an in-place mutation.
    fn normalize(&mut self) {
        let (cardinality, runs) = match &*self {
            Container::Array(values) => (values.len(), count_runs(values)),
            Container::Bitset(words) => (
                words.iter().map(|w| w.count_ones() as usize).sum(),
                count_word_runs(words),
            ),
            Container::Run(runs) => (
                runs.iter()
                    .map(|&(start, end)| end as usize - start as usize + 1)
                    .sum(),
                runs.len(),
            ),
        };
        if cardinality == 0 {
            *self = Container::Array(Vec::new());
            return;
        }
        let target = choose_kind(cardinality, runs);
        if target == self.kind() {
            return;
        }
        *self = match target {
            Kind::Array => Container::Array(self.iter().collect()),
            Kind::Run => Container::Run(runs_of(&self.iter().collect::<Vec<_>>())),
            Kind::Bitset => Container::Bitset(self.to_words()),
        };
    }

    pub(crate) fn is_empty(&self) -> bool {
        match self {
            Container::Array(values) => values.is_empty(),
            Container::Run(runs) => runs.is_empty(),
            Container::Bitset(words) => words.iter().all(|w| *w == 0),
        }
    }

    pub(crate) fn to_words(&self) -> Words {
        match self {
            Container::Bitset(words) => words.clone(),
            Container::Array(values) => {
                let mut words = empty_words();
                for &value in values {
                    words[value as usize / 64] |= 1u64 << (value % 64);
                }
                words
            }
            Container::Run(runs) => {
                let mut words = empty_words();
                for &(start, end) in runs {
                    set_range(&mut words, start, end);
                }
                words
            }
        }
    }

    pub(crate) fn union(&self, other: &Container) -> Option<Container> {
        match (self, other) {
            (Container::Array(a), Container::Array(b)) => {
                let mut merged = Vec::with_capacity(a.len() + b.len());
                let (mut i, mut j) = (0, 0);
                while i < a.len() && j < b.len() {
                    match a[i].cmp(&b[j]) {
                        Ordering::Less => {
                            merged.push(a[i]);
                            i += 1;
                        }
                        Ordering::Greater => {
                            merged.push(b[j]);
                            j += 1;
                        }
                        Ordering::Equal => {
                            merged.push(a[i]);
                            i += 1;
                            j += 1;
                        }
                    }
                }
                merged.extend_from_slice(&a[i..]);
                merged.extend_from_slice(&b[j..]);
                Container::from_sorted(merged)
            }
            _ => {
                let mut words = self.to_words();
                let rhs = other.to_words();
                for (w, r) in words.iter_mut().zip(rhs.iter()) {
                    *w |= *r;
                }
                Container::from_words(words)
            }
        }
    }

    pub(crate) fn intersect(&self, other: &Container) -> Option<Container> {
        match (self, other) {
            (Container::Array(a), _) => {
                Container::from_sorted(a.iter().copied().filter(|&v| other.contains(v)).collect())
            }
            (_, Container::Array(b)) => {
                Container::from_sorted(b.iter().copied().filter(|&v| self.contains(v)).collect())
            }
            _ => {
                let mut words = self.to_words();
                let rhs = other.to_words();
                for (w, r) in words.iter_mut().zip(rhs.iter()) {
                    *w &= *r;
                }
                Container::from_words(words)
            }
        }
    }

    pub(crate) fn difference(&self, other: &Container) -> Option<Container> {
        match self {
            Container::Array(a) => {
                Container::from_sorted(a.iter().copied().filter(|&v| !other.contains(v)).collect())
            }
            _ => {
                let mut words = self.to_words();
                let rhs = other.to_words();
                for (w, r) in words.iter_mut().zip(rhs.iter()) {
                    *w &= !*r;
                }
                Container::from_words(words)
            }
        }
    }

    pub(crate) fn iter(&self) -> ContainerIter<'_> {
        match self {
            Container::Array(values) => ContainerIter::Array(values.iter()),
            Container::Bitset(words) => ContainerIter::Bitset {
                words,
                word_idx: 0,
                current: words[0],
            },
            Container::Run(runs) => ContainerIter::Run {
                runs: runs.iter(),
                next: 0,
                end: 0,
                active: false,
            },
        }
    }

    pub(crate) fn serialize<W: Write>(&self, writer: &mut W) -> io::Result<()> {
        match self {
            Container::Array(values) => {
                writer.write_u8(TAG_ARRAY)?;
                writer.write_u32::<LittleEndian>(values.len() as u32)?;
                for &value in values {
                    writer.write_u16::<LittleEndian>(value)?;
                }
            }
            Container::Bitset(words) => {
                writer.write_u8(TAG_BITSET)?;
                for &word in words.iter() {
                    writer.write_u64::<LittleEndian>(word)?;
                }
            }
            Container::Run(runs) => {
                writer.write_u8(TAG_RUN)?;
                writer.write_u32::<LittleEndian>(runs.len() as u32)?;
                for &(start, end) in runs {
                    writer.write_u16::<LittleEndian>(start)?;
                    writer.write_u16::<LittleEndian>(end)?;
                }
            }
        }
        Ok(())
    }

    /// Read a container and re-canonicalize it.
    pub(crate) fn deserialize<R: Read>(reader: &mut R) -> io::Result<Container> {
        let invalid = |msg: &str| io::Error::new(io::ErrorKind::InvalidData, msg.to_string());
        let tag = reader.read_u8()?;
        let container = match tag {
            TAG_ARRAY => {
                let len = reader.read_u32::<LittleEndian>()? as usize;
                if len > u16::MAX as usize + 1 {
                    return Err(invalid("array container too long"));
                }
                let mut values = Vec::with_capacity(len);
                for _ in 0..len {
                    let value = reader.read_u16::<LittleEndian>()?;
                    if values.last().is_some_and(|&last: &u16| last >= value) {
                        return Err(invalid("array container is not strictly ascending"));
                    }
                    values.push(value);
                }
                Container::from_sorted(values)
            }
            TAG_BITSET => {
                let mut words = empty_words();
                for word in words.iter_mut() {
                    *word = reader.read_u64::<LittleEndian>()?;
                }
                Container::from_words(words)
            }
            TAG_RUN => {
                let len = reader.read_u32::<LittleEndian>()? as usize;
                if len > u16::MAX as usize + 1 {
                    return Err(invalid("run container too long"));
                }
                let mut words = empty_words();
                let mut prev_end: Option<u16> = None;
                for _ in 0..len {
                    let start = reader.read_u16::<LittleEndian>()?;
                    let end = reader.read_u16::<LittleEndian>()?;
                    if start > end || prev_end.is_some_and(|p| p >= start) {
                        return Err(invalid("run container is not ordered"));
                    }
                    set_range(&mut words, start, end);
                    prev_end = Some(end);
                }
                Container::from_words(words)
            }
            other => return Err(invalid(&format!("unknown container tag {other}"))),
        };
        container.ok_or_else(|| invalid("empty container"))
    }

    #[cfg(test)]
    pub(crate) fn kind_name(&self) -> &'static str {
        match self {
            Container::Array(_) => "array",
            Container::Bitset(_) => "bitset",
            Container::Run(_) => "run",
        }
    }
}

/// Ascending iterator over a single container.
pub(crate) enum ContainerIter<'a> {
    Array(std::slice::Iter<'a, u16>),
    Bitset {
        words: &'a [u64; BITSET_WORDS],
        word_idx: usize,
        current: u64,
    },
    Run {
        runs: std::slice::Iter<'a, (u16, u16)>,
        next: u32,
        end: u32,
        active: bool,
    },
}

impl Iterator for ContainerIter<'_> {
    type Item = u16;

    fn next(&mut self) -> Option<u16> {
        match self {
            ContainerIter::Array(iter) => iter.next().copied(),
            ContainerIter::Bitset {
                words,
                word_idx,
                current,
            } => loop {
                if *current != 0 {
                    let bit = current.trailing_zeros() as usize;
                    *current &= *current - 1;
                    return Some((*word_idx * 64 + bit) as u16);
                }
                *word_idx += 1;
                if *word_idx >= BITSET_WORDS {
                    return None;
                }
                *current = words[*word_idx];
            },
            ContainerIter::Run {
                runs,
                next,
                end,
                active,
            } => {
                if !*active || *next > *end {
                    let &(start, stop) = runs.next()?;
                    *next = start as u32;
                    *end = stop as u32;
                    *active = true;
                }
                let value = *next as u16;
                *next += 1;
                Some(value)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sparse_values_use_array() {
        let container = Container::from_sorted(vec![1, 7, 300, 9000]).unwrap();
        assert_eq!(container.kind_name(), "array");
        assert_eq!(container.cardinality(), 4);
        assert!(container.contains(300));
        assert!(!container.contains(301));
    }

    #[test]
    fn test_consecutive_values_use_runs() {
        let values: Vec<u16> = (100..2100).collect();
        let container = Container::from_sorted(values).unwrap();
        assert_eq!(container.kind_name(), "run");
        assert_eq!(container.cardinality(), 2000);
        assert_eq!(container.rank(100), 0);
        assert_eq!(container.rank(150), 50);
        assert_eq!(container.min(), Some(100));
        assert_eq!(container.max(), Some(2099));
    }

    #[test]
    fn test_dense_scattered_values_use_bitset() {
        let values: Vec<u16> = (0..u16::MAX).step_by(3).collect();
        let container = Container::from_sorted(values.clone()).unwrap();
        assert_eq!(container.kind_name(), "bitset");
        assert_eq!(container.cardinality() as usize, values.len());
        assert_eq!(container.iter().collect::<Vec<_>>(), values);
        assert_eq!(container.rank(9), 3);
    }

    #[test]
    fn test_representation_switches_on_insert_and_remove() {
        let mut container = Container::from_sorted(vec![0]).unwrap();
        for value in (2..20_000u16).step_by(2) {
            container.insert(value);
        }
        assert_eq!(container.kind_name(), "bitset");

        for value in (2..20_000u16).step_by(2) {
            container.remove(value);
        }
        assert_eq!(container.kind_name(), "array");
        assert_eq!(container.iter().collect::<Vec<_>>(), vec![0]);
    }

    #[test]
    fn test_same_values_same_shape() {
        let values: Vec<u16> = (0..5000).collect();
        let from_values = Container::from_sorted(values.clone()).unwrap();

        let mut words = empty_words();
        for &value in &values {
            words[value as usize / 64] |= 1u64 << (value % 64);
        }
        let from_words = Container::from_words(words).unwrap();
        assert_eq!(from_values, from_words);
    }

    #[test]
    fn test_mixed_operations() {
        let runs = Container::from_range(10, 5000);
        let array = Container::from_sorted(vec![5, 10, 4999, 6000]).unwrap();

        let union = runs.union(&array).unwrap();
        assert_eq!(union.cardinality(), 4991 + 2);

        let intersect = runs.intersect(&array).unwrap();
        assert_eq!(intersect.iter().collect::<Vec<_>>(), vec![10, 4999]);

        let difference = array.difference(&runs).unwrap();
        assert_eq!(difference.iter().collect::<Vec<_>>(), vec![5, 6000]);

        assert!(array.difference(&array).is_none());
    }

    #[test]
    fn test_serialize_roundtrip_preserves_shape() {
        for container in [
            Container::from_sorted(vec![3, 4, 9]).unwrap(),
            Container::from_range(0, u16::MAX),
            Container::from_sorted((0..u16::MAX).step_by(2).collect()).unwrap(),
        ] {
            let mut bytes = Vec::new();
            container.serialize(&mut bytes).unwrap();
            let decoded = Container::deserialize(&mut bytes.as_slice()).unwrap();
            assert_eq!(decoded, container);
        }
    }

    #[test]
    fn test_deserialize_rejects_unsorted_array() {
        let mut bytes = Vec::new();
        bytes.write_u8(TAG_ARRAY).unwrap();
        bytes.write_u32::<LittleEndian>(2).unwrap();
        bytes.write_u16::<LittleEndian>(9).unwrap();
        bytes.write_u16::<LittleEndian>(3).unwrap();
        assert!(Container::deserialize(&mut bytes.as_slice()).is_err());
    }
}
