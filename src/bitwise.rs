//! Bitwise merge primitive
//!
//! In-place AND/XOR of one buffer into another. Bitmaps merge word by word;
//! data buffers XOR eight bytes at a time and finish the tail bytewise, which
//! the compiler turns into SIMD where the target allows it.

const WORD: usize = std::mem::size_of::<u64>();

/// `dst &= src` over the common prefix of the two slices.
#[inline]
pub fn and_words(dst: &mut [u64], src: &[u64]) {
    for (d, s) in dst.iter_mut().zip(src) {
        *d &= *s;
    }
}

/// `dst ^= src` over the common prefix of the two slices.
#[inline]
pub fn xor_words(dst: &mut [u64], src: &[u64]) {
    for (d, s) in dst.iter_mut().zip(src) {
        *d ^= *s;
    }
}

/// `dst ^= src`, bytewise. Only `min(dst.len(), src.len())` bytes are touched.
pub fn xor_bytes(dst: &mut [u8], src: &[u8]) {
    merge_bytes(dst, src, |a, b| a ^ b, |a, b| a ^ b);
}

#[inline(always)]
fn merge_bytes(
    dst: &mut [u8],
    src: &[u8],
    word_op: impl Fn(u64, u64) -> u64,
    byte_op: impl Fn(u8, u8) -> u8,
) {
    let len = dst.len().min(src.len());
    let (dst, src) = (&mut dst[..len], &src[..len]);

    let mut dst_words = dst.chunks_exact_mut(WORD);
    let mut src_words = src.chunks_exact(WORD);

    for (d, s) in (&mut dst_words).zip(&mut src_words) {
        let mut a = [0u8; WORD];
        let mut b = [0u8; WORD];
        a.copy_from_slice(d);
        b.copy_from_slice(s);
        let merged = word_op(u64::from_ne_bytes(a), u64::from_ne_bytes(b));
        d.copy_from_slice(&merged.to_ne_bytes());
    }

    for (d, s) in dst_words
        .into_remainder()
        .iter_mut()
        .zip(src_words.remainder())
    {
        *d = byte_op(*d, *s);
    }
}
