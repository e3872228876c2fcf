//! Row-layout sorting
//!
//! A row layout is a fixed-width byte record per row whose lexicographic
//! (memcmp) order equals the desired sort order. Values are rewritten with
//! order-preserving encodings; sorting and distinct then operate on opaque
//! bytes without knowing the key types.

use rustc_hash::{FxHashMap, FxHashSet};

use crate::strings::{StringId, StringPool};

/// Rows below this count sort with a comparison sort; above it a 16-bit LSD
/// radix sort over the layout bytes wins.
const STABLE_SORT_CUTOFF: usize = 4096;

// ============================================================================
// Order-preserving encodings
// ============================================================================

/// Big-endian so memcmp order equals numeric order.
pub fn encode_u32(x: u32) -> [u8; 4] {
    x.to_be_bytes()
}

/// Flip the sign bit so two's-complement order becomes unsigned order.
pub fn encode_i32(x: i32) -> [u8; 4] {
    ((x as u32) ^ 0x8000_0000).to_be_bytes()
}

pub fn encode_i64(x: i64) -> [u8; 8] {
    ((x as u64) ^ 0x8000_0000_0000_0000).to_be_bytes()
}

/// IEEE 754 total order: negative values flip all bits, non-negative values
/// flip just the sign bit. NaNs with the sign bit set order below everything;
/// the rest order above. -0.0 orders just below +0.0.
pub fn encode_f64(x: f64) -> [u8; 8] {
    let mut bits = x.to_bits() as i64;
    bits ^= (((bits >> 63) as u64) >> 1) as i64;
    encode_i64(bits)
}

// ============================================================================
// Sort
// ============================================================================

#[derive(Clone, Copy, Default)]
struct SortToken {
    index: u32,
    buf_offset: u32,
}

/// Stable-sorts `indices` by the row-layout bytes of each element. The i-th
/// element's bytes live at `buffer[i * stride ..][..stride]`.
pub fn sort_row_layout(buffer: &[u8], stride: usize, indices: &mut [u32]) {
    let n = indices.len();
    if n <= 1 {
        return;
    }
    let mut tokens: Vec<SortToken> = indices
        .iter()
        .enumerate()
        .map(|(i, &index)| SortToken {
            index,
            buf_offset: (i * stride) as u32,
        })
        .collect();

    if n < STABLE_SORT_CUTOFF {
        tokens.sort_by(|a, b| {
            let a = &buffer[a.buf_offset as usize..a.buf_offset as usize + stride];
            let b = &buffer[b.buf_offset as usize..b.buf_offset as usize + stride];
            a.cmp(b)
        });
    } else {
        tokens = radix_sort(tokens, buffer, stride);
    }

    for (i, token) in tokens.iter().enumerate() {
        indices[i] = token.index;
    }
}

// LSD radix sort over 16-bit digits, least significant digit first. Each
// counting pass is stable, so the final order is the full-key memcmp order.
fn radix_sort(mut tokens: Vec<SortToken>, buffer: &[u8], stride: usize) -> Vec<SortToken> {
    let n = tokens.len();
    let mut scratch = vec![SortToken::default(); n];
    let mut counts = vec![0u32; 1 << 16];

    let digit_at = |offset: u32, lo: usize, hi: usize| -> usize {
        if hi - lo == 2 {
            u16::from_be_bytes([
                buffer[offset as usize + lo],
                buffer[offset as usize + lo + 1],
            ]) as usize
        } else {
            buffer[offset as usize + lo] as usize
        }
    };

    let mut hi = stride;
    while hi > 0 {
        let lo = hi.saturating_sub(2);

        counts.iter_mut().for_each(|c| *c = 0);
        for t in &tokens {
            counts[digit_at(t.buf_offset, lo, hi)] += 1;
        }
        let mut sum = 0u32;
        for c in counts.iter_mut() {
            let count = *c;
            *c = sum;
            sum += count;
        }
        for t in &tokens {
            let d = digit_at(t.buf_offset, lo, hi);
            scratch[counts[d] as usize] = *t;
            counts[d] += 1;
        }
        std::mem::swap(&mut tokens, &mut scratch);
        hi = lo;
    }
    tokens
}

// ============================================================================
// Distinct
// ============================================================================

/// Compacts `indices`, keeping the first occurrence of each distinct
/// row-layout byte string. Returns the new length.
pub fn distinct_rows(buffer: &[u8], stride: usize, indices: &mut [u32]) -> usize {
    if indices.is_empty() {
        return 0;
    }
    let mut seen: FxHashSet<&[u8]> = FxHashSet::default();
    seen.reserve(indices.len());
    let mut write = 0;
    for read in 0..indices.len() {
        let row = &buffer[read * stride..(read + 1) * stride];
        if seen.insert(row) {
            indices[write] = indices[read];
            write += 1;
        }
    }
    write
}

// ============================================================================
// String ranks
// ============================================================================

/// Sorts the collected string ids lexicographically and replaces each map
/// value with the id's rank.
pub fn finalize_ranks(pool: &StringPool, map: &mut FxHashMap<StringId, u32>) {
    let mut ids: Vec<StringId> = map.keys().copied().collect();
    ids.sort_unstable_by(|a, b| pool.get(*a).cmp(pool.get(*b)));
    for (rank, id) in ids.iter().enumerate() {
        if let Some(v) = map.get_mut(id) {
            *v = rank as u32;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sign_of_cmp(a: &[u8], b: &[u8]) -> i32 {
        match a.cmp(b) {
            std::cmp::Ordering::Less => -1,
            std::cmp::Ordering::Equal => 0,
            std::cmp::Ordering::Greater => 1,
        }
    }

    #[test]
    fn test_encode_i64_order() {
        let values = [i64::MIN, -100, -1, 0, 1, 100, i64::MAX];
        for a in values {
            for b in values {
                let sign = sign_of_cmp(&encode_i64(a), &encode_i64(b));
                let expected = match a.cmp(&b) {
                    std::cmp::Ordering::Less => -1,
                    std::cmp::Ordering::Equal => 0,
                    std::cmp::Ordering::Greater => 1,
                };
                assert_eq!(sign, expected, "{a} vs {b}");
            }
        }
    }

    #[test]
    fn test_encode_i32_order() {
        let values = [i32::MIN, -5, 0, 7, i32::MAX];
        for a in values {
            for b in values {
                assert_eq!(
                    sign_of_cmp(&encode_i32(a), &encode_i32(b)) < 0,
                    a < b,
                    "{a} vs {b}"
                );
            }
        }
    }

    #[test]
    fn test_encode_f64_total_order() {
        // -0.0 < +0.0 in this total order; positive NaN above everything.
        let values = [
            f64::NEG_INFINITY,
            -1.5,
            -0.0,
            0.0,
            1.0e-300,
            2.5,
            f64::INFINITY,
            f64::NAN,
        ];
        for (i, &a) in values.iter().enumerate() {
            for (j, &b) in values.iter().enumerate() {
                let sign = sign_of_cmp(&encode_f64(a), &encode_f64(b));
                let expected = (i as i32 - j as i32).signum();
                assert_eq!(sign, expected, "{a} vs {b}");
            }
        }
    }

    #[test]
    fn test_sort_row_layout_small() {
        // 4-byte keys, 4 rows.
        let keys = [3u32, 1, 2, 1];
        let mut buffer = Vec::new();
        for k in keys {
            buffer.extend_from_slice(&encode_u32(k));
        }
        let mut indices = [10u32, 11, 12, 13];
        sort_row_layout(&buffer, 4, &mut indices);
        // Stable: the two 1-keys keep their relative order.
        assert_eq!(indices, [11, 13, 12, 10]);
    }

    #[test]
    fn test_sort_row_layout_radix_matches_stable() {
        // Above the cutoff the radix path must agree with a comparison sort.
        let n = STABLE_SORT_CUTOFF + 100;
        let mut buffer = Vec::with_capacity(n * 5);
        let mut expected: Vec<(Vec<u8>, u32)> = Vec::with_capacity(n);
        for i in 0..n {
            // Deterministic pseudo-random 5-byte keys (odd stride).
            let key = [
                (i * 7919 % 251) as u8,
                (i * 104729 % 241) as u8,
                (i * 31 % 255) as u8,
                (i % 13) as u8,
                (i * 3 % 7) as u8,
            ];
            buffer.extend_from_slice(&key);
            expected.push((key.to_vec(), i as u32));
        }
        let mut indices: Vec<u32> = (0..n as u32).collect();
        sort_row_layout(&buffer, 5, &mut indices);
        expected.sort_by(|a, b| a.0.cmp(&b.0).then(a.1.cmp(&b.1)));
        let expected_indices: Vec<u32> = expected.iter().map(|(_, i)| *i).collect();
        assert_eq!(indices, expected_indices);
    }

    #[test]
    fn test_distinct_rows() {
        let keys = [5u32, 3, 5, 3, 9];
        let mut buffer = Vec::new();
        for k in keys {
            buffer.extend_from_slice(&encode_u32(k));
        }
        let mut indices = [0u32, 1, 2, 3, 4];
        let kept = distinct_rows(&buffer, 4, &mut indices);
        assert_eq!(&indices[..kept], &[0, 1, 4]);
    }

    #[test]
    fn test_finalize_ranks() {
        let mut pool = StringPool::new();
        let banana = pool.intern("banana");
        let apple = pool.intern("apple");
        let cherry = pool.intern("cherry");
        let mut map = FxHashMap::default();
        map.insert(banana, 0);
        map.insert(apple, 0);
        map.insert(cherry, 0);
        finalize_ranks(&pool, &mut map);
        assert_eq!(map[&apple], 0);
        assert_eq!(map[&banana], 1);
        assert_eq!(map[&cherry], 2);
    }
}
