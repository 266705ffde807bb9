//! Storage buffers shared by every workgroup of a dispatch

use crate::error::{TiledError, TiledResult};
use crate::packing::DepthRange;
use bytemuck::Pod;
use std::sync::atomic::{AtomicU32, Ordering};

/// Word-addressed global buffer.
///
/// Workgroups run concurrently and each one writes a disjoint range, so
/// plain relaxed atomic stores give the same guarantees as a GPU storage
/// buffer without any locking.
#[derive(Debug)]
pub struct StorageBuffer {
    label: String,
    words: Box<[AtomicU32]>,
}

impl StorageBuffer {
    /// Zero-initialized buffer of `len` words.
    pub fn new(label: &str, len: usize) -> Self {
        log::trace!("creating storage buffer '{}' ({} words)", label, len);
        Self {
            label: label.to_string(),
            words: (0..len).map(|_| AtomicU32::new(0)).collect(),
        }
    }

    pub fn from_words(label: &str, words: &[u32]) -> Self {
        Self {
            label: label.to_string(),
            words: words.iter().map(|&w| AtomicU32::new(w)).collect(),
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn len(&self) -> usize {
        self.words.len()
    }

    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }

    pub fn load(&self, index: usize) -> u32 {
        self.words[index].load(Ordering::Relaxed)
    }

    pub fn store(&self, index: usize, value: u32) {
        self.words[index].store(value, Ordering::Relaxed);
    }

    pub fn store_slice(&self, offset: usize, values: &[u32]) {
        for (word, &value) in self.words[offset..offset + values.len()].iter().zip(values) {
            word.store(value, Ordering::Relaxed);
        }
    }

    /// Copy the contents out once the dispatch has completed.
    pub fn to_vec(&self) -> Vec<u32> {
        self.words.iter().map(|w| w.load(Ordering::Relaxed)).collect()
    }

    /// Reinterpret the contents as an array of `T`.
    pub fn read_as<T: Pod>(&self) -> TiledResult<Vec<T>> {
        let words = self.to_vec();
        bytemuck::try_cast_slice::<u32, T>(&words)
            .map(|items| items.to_vec())
            .map_err(|e| TiledError::BufferSizeMismatch {
                name: format!("{} ({e})", self.label),
                expected: std::mem::size_of::<T>() / 4,
                actual: words.len(),
            })
    }
}

/// Unpack a per-tile depth buffer.
pub fn unpack_tile_depths(words: &[u32]) -> Vec<DepthRange> {
    words.iter().map(|&w| DepthRange::unpack(w)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytemuck::{Pod, Zeroable};

    #[repr(C)]
    #[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
    struct Pair {
        a: u32,
        b: u32,
    }

    #[test]
    fn test_store_and_read_back() {
        let buffer = StorageBuffer::new("test", 4);
        buffer.store(1, 42);
        buffer.store_slice(2, &[7, 8]);
        assert_eq!(buffer.to_vec(), vec![0, 42, 7, 8]);
        assert_eq!(buffer.load(3), 8);
    }

    #[test]
    fn test_read_as_pod() {
        let buffer = StorageBuffer::from_words("pairs", &[1, 2, 3, 4]);
        let pairs: Vec<Pair> = buffer.read_as().unwrap();
        assert_eq!(pairs, vec![Pair { a: 1, b: 2 }, Pair { a: 3, b: 4 }]);

        let odd = StorageBuffer::from_words("odd", &[1, 2, 3]);
        assert!(odd.read_as::<Pair>().is_err());
    }

    #[test]
    fn test_unpack_tile_depths() {
        let ranges = unpack_tile_depths(&[0x0200_0100, DepthRange::EMPTY.pack()]);
        assert_eq!(ranges[0], DepthRange::new(0x100, 0x200));
        assert!(ranges[1].is_empty());
    }
}
