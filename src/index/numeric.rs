//! Numeric field index
//!
//! Sorted block list keyed on f64 with `block_size`-bounded leaves.
//! Blocks keep `(value, doc)` entries in order; a range query touches
//! only the blocks overlapping `[lo, hi]`.

use std::collections::HashMap;

use roaring::RoaringBitmap;

use crate::index::DocId;

#[derive(Debug, Default)]
struct Block {
    entries: Vec<(f64, DocId)>,
}

impl Block {
    fn min(&self) -> f64 {
        self.entries.first().map(|(v, _)| *v).unwrap_or(f64::NAN)
    }

    fn max(&self) -> f64 {
        self.entries.last().map(|(v, _)| *v).unwrap_or(f64::NAN)
    }
}

#[derive(Debug)]
pub struct NumericIndex {
    block_size: usize,
    blocks: Vec<Block>,
    doc_values: HashMap<DocId, f64>,
}

impl NumericIndex {
    pub fn new(block_size: usize) -> Self {
        Self {
            block_size: block_size.max(2),
            blocks: Vec::new(),
            doc_values: HashMap::new(),
        }
    }

    pub fn add(&mut self, doc: DocId, value: f64) {
        if value.is_nan() {
            return;
        }
        self.remove(doc);
        self.doc_values.insert(doc, value);

        if self.blocks.is_empty() {
            self.blocks.push(Block {
                entries: vec![(value, doc)],
            });
            return;
        }

        // Last block whose min is <= value, else the first block.
        let idx = self
            .blocks
            .partition_point(|b| b.min() <= value)
            .saturating_sub(1);
        let block = &mut self.blocks[idx];
        let pos = block.entries.partition_point(|&(v, d)| (v, d) < (value, doc));
        block.entries.insert(pos, (value, doc));

        if block.entries.len() > self.block_size {
            let tail = block.entries.split_off(block.entries.len() / 2);
            self.blocks.insert(idx + 1, Block { entries: tail });
        }
    }

    pub fn remove(&mut self, doc: DocId) {
        let Some(value) = self.doc_values.remove(&doc) else {
            return;
        };
        let idx = self
            .blocks
            .partition_point(|b| b.min() <= value)
            .saturating_sub(1);
        // The entry may sit one block earlier when mins collide.
        for i in (0..=idx).rev() {
            let block = &mut self.blocks[i];
            if let Some(pos) = block.entries.iter().position(|&(v, d)| d == doc && v == value) {
                block.entries.remove(pos);
                if block.entries.is_empty() {
                    self.blocks.remove(i);
                }
                return;
            }
            if block.max() < value {
                break;
            }
        }
    }

    pub fn value(&self, doc: DocId) -> Option<f64> {
        self.doc_values.get(&doc).copied()
    }

    /// Documents whose value lies in the range; either bound may be
    /// open (exclusive) or infinite.
    pub fn range(&self, lo: f64, hi: f64, lo_open: bool, hi_open: bool) -> RoaringBitmap {
        let mut out = RoaringBitmap::new();
        let in_range = |v: f64| {
            let above = if lo_open { v > lo } else { v >= lo };
            let below = if hi_open { v < hi } else { v <= hi };
            above && below
        };
        for block in &self.blocks {
            if block.min() > hi || block.max() < lo {
                continue;
            }
            for &(v, d) in &block.entries {
                if v > hi {
                    break;
                }
                if in_range(v) {
                    out.insert(d);
                }
            }
        }
        out
    }

    pub fn len(&self) -> usize {
        self.doc_values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.doc_values.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn filled(block_size: usize, n: u32) -> NumericIndex {
        let mut idx = NumericIndex::new(block_size);
        for i in 0..n {
            idx.add(i, i as f64);
        }
        idx
    }

    #[test]
    fn test_closed_range() {
        let idx = filled(4, 10);
        let hits = idx.range(2.0, 5.0, false, false);
        assert_eq!(hits.len(), 4);
        assert!(hits.contains(2) && hits.contains(5));
    }

    #[test]
    fn test_open_bounds() {
        let idx = filled(4, 10);
        let hits = idx.range(2.0, 5.0, true, false);
        assert!(!hits.contains(2));
        assert!(hits.contains(3) && hits.contains(5));

        let hits = idx.range(2.0, 5.0, false, true);
        assert!(hits.contains(2) && !hits.contains(5));
    }

    #[test]
    fn test_infinite_bounds() {
        let idx = filled(4, 10);
        assert_eq!(idx.range(f64::NEG_INFINITY, f64::INFINITY, false, false).len(), 10);
        assert_eq!(idx.range(7.0, f64::INFINITY, false, false).len(), 3);
    }

    #[test]
    fn test_block_splits_preserve_results() {
        // Small blocks force repeated splits
        let idx = filled(2, 100);
        assert_eq!(idx.range(10.0, 19.0, false, false).len(), 10);
    }

    #[test]
    fn test_remove_and_update() {
        let mut idx = filled(4, 10);
        idx.remove(5);
        assert!(!idx.range(5.0, 5.0, false, false).contains(5));

        idx.add(3, 100.0);
        assert!(!idx.range(3.0, 3.0, false, false).contains(3));
        assert!(idx.range(100.0, 100.0, false, false).contains(3));
    }

    #[test]
    fn test_duplicate_values() {
        let mut idx = NumericIndex::new(4);
        for doc in 0..5 {
            idx.add(doc, 1.0);
        }
        assert_eq!(idx.range(1.0, 1.0, false, false).len(), 5);
    }

    #[test]
    fn test_unordered_inserts() {
        let mut idx = NumericIndex::new(3);
        for (doc, v) in [5.0, 1.0, 9.0, 3.0, 7.0, 2.0, 8.0].iter().enumerate() {
            idx.add(doc as u32, *v);
        }
        let hits = idx.range(2.0, 7.0, false, false);
        assert_eq!(hits.len(), 4);
    }
}
