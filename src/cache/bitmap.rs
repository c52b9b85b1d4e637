//! Per-sector write-status bitmaps.
//!
//! A [`SectorBitmap`] holds one row per data disk and one bit per 512-byte
//! sector column; a set bit means the sector is still pending (no write has
//! covered it yet). Each row is padded to a whole number of `u64` words and
//! the padding bits stay clear, so chunk sizes that are not a multiple of 64
//! sectors behave exactly like the covered prefix.
//!
//! A [`ColumnMask`] is a single row of the same shape, used to describe sets
//! of sector columns (untouched columns, columns needing a read, ...).

use std::ops::Range;

use crate::bitwise::{and_words, xor_words};
use crate::error::{Error, Result};

const BITS: usize = u64::BITS as usize;

fn words_for(cols: usize) -> usize {
    cols.div_ceil(BITS)
}

/// Mask selecting the real (non-padding) bits of the last word of a row.
fn tail_mask(cols: usize) -> u64 {
    match cols % BITS {
        0 => u64::MAX,
        rem => (1u64 << rem) - 1,
    }
}

fn try_alloc_words(len: usize, fill: u64) -> Result<Vec<u64>> {
    let mut words = Vec::new();
    words
        .try_reserve_exact(len)
        .map_err(|_| Error::ResourceExhausted {
            size: len * std::mem::size_of::<u64>(),
        })?;
    words.resize(len, fill);
    Ok(words)
}

// =============================================================================
// Sector Bitmap
// =============================================================================

/// Row-major pending-sector bitmap for one chunk group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SectorBitmap {
    rows: usize,
    cols: usize,
    stride: usize,
    words: Vec<u64>,
}

impl SectorBitmap {
    /// Allocate a bitmap with every sector pending.
    pub fn try_new_pending(rows: usize, cols: usize) -> Result<Self> {
        let stride = words_for(cols);
        let mut words = try_alloc_words(rows * stride, u64::MAX)?;
        if stride > 0 {
            let mask = tail_mask(cols);
            for row in words.chunks_exact_mut(stride) {
                row[stride - 1] &= mask;
            }
        }
        Ok(Self {
            rows,
            cols,
            stride,
            words,
        })
    }

    /// Allocate a bitmap with every sector already written.
    pub fn try_new_written(rows: usize, cols: usize) -> Result<Self> {
        let stride = words_for(cols);
        Ok(Self {
            rows,
            cols,
            stride,
            words: try_alloc_words(rows * stride, 0)?,
        })
    }

    /// Number of rows (data disks).
    pub fn rows(&self) -> usize {
        self.rows
    }

    /// Number of sector columns per row.
    pub fn cols(&self) -> usize {
        self.cols
    }

    /// Total number of sectors tracked.
    pub fn len(&self) -> usize {
        self.rows * self.cols
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Raw words of one row, padding included.
    pub fn row_words(&self, row: usize) -> &[u64] {
        &self.words[row * self.stride..(row + 1) * self.stride]
    }

    /// Whether sector `col` of `row` is still pending.
    pub fn is_pending(&self, row: usize, col: usize) -> bool {
        debug_assert!(row < self.rows && col < self.cols);
        let word = self.words[row * self.stride + col / BITS];
        word & (1u64 << (col % BITS)) != 0
    }

    /// Whether the flat sector index (`row * cols + col`) is pending.
    pub fn is_pending_flat(&self, sector: usize) -> bool {
        self.is_pending(sector / self.cols, sector % self.cols)
    }

    /// Mark `count` sectors starting at flat index `start` as written.
    ///
    /// Returns how many of them were still pending.
    pub fn clear_range(&mut self, start: usize, count: usize) -> usize {
        debug_assert!(start + count <= self.len());
        let mut cleared = 0;
        let mut sector = start;
        let end = start + count;

        while sector < end {
            let row = sector / self.cols;
            let col = sector % self.cols;
            let span = (self.cols - col).min(end - sector);
            cleared += self.clear_row_span(row, col..col + span);
            sector += span;
        }

        cleared
    }

    fn clear_row_span(&mut self, row: usize, cols: Range<usize>) -> usize {
        let base = row * self.stride;
        let mut cleared = 0;
        let mut col = cols.start;

        while col < cols.end {
            let bit = col % BITS;
            let take = (BITS - bit).min(cols.end - col);
            let mask = if take == BITS {
                u64::MAX
            } else {
                ((1u64 << take) - 1) << bit
            };
            let word = &mut self.words[base + col / BITS];
            cleared += (*word & mask).count_ones() as usize;
            *word &= !mask;
            col += take;
        }

        cleared
    }

    /// True once every sector in every row has been written.
    pub fn is_clear(&self) -> bool {
        self.words.iter().all(|&w| w == 0)
    }

    /// Number of sectors still pending.
    pub fn count_pending(&self) -> usize {
        self.words.iter().map(|w| w.count_ones() as usize).sum()
    }

    /// Columns still pending on every row: `row 0 AND row 1 AND ...`.
    pub fn untouched_columns(&self) -> ColumnMask {
        let mut mask = ColumnMask::from_words(self.cols, self.row_words(0).to_vec());
        for row in 1..self.rows {
            and_words(&mut mask.words, self.row_words(row));
        }
        mask
    }

    /// One row as a column mask of pending sectors.
    pub fn pending_columns(&self, row: usize) -> ColumnMask {
        ColumnMask::from_words(self.cols, self.row_words(row).to_vec())
    }
}

// =============================================================================
// Column Mask
// =============================================================================

/// A set of sector columns within one chunk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnMask {
    cols: usize,
    words: Vec<u64>,
}

impl ColumnMask {
    fn from_words(cols: usize, mut words: Vec<u64>) -> Self {
        if let Some(last) = words.last_mut() {
            *last &= tail_mask(cols);
        }
        Self { cols, words }
    }

    /// Mask with no columns selected.
    pub fn empty(cols: usize) -> Self {
        Self {
            cols,
            words: vec![0; words_for(cols)],
        }
    }

    /// Mask with every column selected.
    pub fn full(cols: usize) -> Self {
        Self::from_words(cols, vec![u64::MAX; words_for(cols)])
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    pub fn contains(&self, col: usize) -> bool {
        col < self.cols && self.words[col / BITS] & (1u64 << (col % BITS)) != 0
    }

    pub fn count(&self) -> usize {
        self.words.iter().map(|w| w.count_ones() as usize).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.words.iter().all(|&w| w == 0)
    }

    /// Columns not in this mask.
    pub fn complement(&self) -> Self {
        let mut words = vec![u64::MAX; self.words.len()];
        xor_words(&mut words, &self.words);
        Self::from_words(self.cols, words)
    }

    /// Columns in this mask that are also set in `row`.
    pub fn and_row(&self, row: &[u64]) -> Self {
        let mut words = self.words.clone();
        and_words(&mut words, row);
        Self::from_words(self.cols, words)
    }

    /// Columns in this mask that are clear in `row`.
    pub fn and_not_row(&self, row: &[u64]) -> Self {
        let inverted: Vec<u64> = row.iter().map(|w| !w).collect();
        self.and_row(&inverted)
    }

    /// Maximal runs of consecutive selected columns, in ascending order.
    pub fn runs(&self) -> SetRuns<'_> {
        SetRuns {
            words: &self.words,
            nbits: self.cols,
            pos: 0,
        }
    }
}

/// Iterator over maximal runs of set bits.
pub struct SetRuns<'a> {
    words: &'a [u64],
    nbits: usize,
    pos: usize,
}

impl SetRuns<'_> {
    /// First index >= `from` whose bit equals `value`.
    fn find_bit(&self, from: usize, value: bool) -> Option<usize> {
        let mut idx = from;
        while idx < self.nbits {
            let w = idx / BITS;
            let mut word = if value { self.words[w] } else { !self.words[w] };
            word &= u64::MAX << (idx % BITS);
            if word != 0 {
                let found = w * BITS + word.trailing_zeros() as usize;
                return (found < self.nbits).then_some(found);
            }
            idx = (w + 1) * BITS;
        }
        None
    }
}

impl Iterator for SetRuns<'_> {
    type Item = Range<usize>;

    fn next(&mut self) -> Option<Range<usize>> {
        let start = self.find_bit(self.pos, true)?;
        let end = self.find_bit(start, false).unwrap_or(self.nbits);
        self.pos = end;
        Some(start..end)
    }
}

// =============================================================================
// Tests
// =============================================================================
