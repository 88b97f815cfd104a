// Length-limited canonical Huffman construction.
//
// 1. Merge tree: repeatedly combine the two lightest nodes; ties go to the
//    lower symbol, and leaves sort before internal nodes of equal weight.
// 2. Limit: clamp over-long codes to `max_bits`, then demote/promote codes
//    until the Kraft sum is exactly one and hand the shortest lengths to
//    the most frequent symbols.
// 3. Canonical assignment: consecutive codes per length, symbols ascending.

use std::cmp::Reverse;
use std::collections::BinaryHeap;

/// Code lengths for `freqs`, every length `<= max_bits`.
///
/// Symbols with zero frequency get length 0.  A single used symbol gets
/// length 1; two or more used symbols always form a complete code.
pub fn build_lengths(freqs: &[u32], max_bits: u8) -> Vec<u8> {
    let mut lengths = vec![0u8; freqs.len()];
    let used: Vec<usize> = (0..freqs.len()).filter(|&s| freqs[s] > 0).collect();
    match used.len() {
        0 => return lengths,
        1 => {
            lengths[used[0]] = 1;
            return lengths;
        }
        _ => {}
    }
    debug_assert!(used.len() <= 1usize << max_bits);

    let leaves = used.len();
    let total = 2 * leaves - 1;
    let mut parent = vec![usize::MAX; total];
    // (weight, tie order, node id); leaves order by symbol, merged nodes after all symbols.
    let mut heap: BinaryHeap<Reverse<(u64, usize, usize)>> = used
        .iter()
        .enumerate()
        .map(|(id, &sym)| Reverse((u64::from(freqs[sym]), sym, id)))
        .collect();

    let mut next_id = leaves;
    while heap.len() > 1 {
        let (Some(Reverse((wa, _, a))), Some(Reverse((wb, _, b)))) = (heap.pop(), heap.pop()) else {
            break;
        };
        parent[a] = next_id;
        parent[b] = next_id;
        heap.push(Reverse((wa + wb, freqs.len() + next_id, next_id)));
        next_id += 1;
    }

    // Parents always have larger ids, so one reverse pass yields depths.
    let mut depth = vec![0usize; total];
    for node in (0..total - 1).rev() {
        depth[node] = depth[parent[node]] + 1;
    }

    let max = usize::from(max_bits);
    if depth[..leaves].iter().all(|&d| d <= max) {
        for (id, &sym) in used.iter().enumerate() {
            lengths[sym] = depth[id] as u8;
        }
        return lengths;
    }

    let mut count = vec![0u64; max + 1];
    for &d in &depth[..leaves] {
        count[d.min(max)] += 1;
    }
    limit_counts(&mut count, max);

    // Most frequent symbols take the shortest lengths.
    let mut order: Vec<usize> = used.clone();
    order.sort_by_key(|&s| (Reverse(freqs[s]), s));
    let mut len = 1;
    for sym in order {
        while count[len] == 0 {
            len += 1;
        }
        lengths[sym] = len as u8;
        count[len] -= 1;
    }
    lengths
}

/// Adjust per-length counts (all already `<= max`) so the Kraft sum is exactly 1.
fn limit_counts(count: &mut [u64], max: usize) {
    let cap = 1u64 << max;
    let mut kraft: u64 = (1..=max).map(|l| count[l] << (max - l)).sum();

    // Over-subscribed: push the deepest sub-maximal code one level down.
    while kraft > cap {
        let mut l = max - 1;
        while l > 0 && count[l] == 0 {
            l -= 1;
        }
        if l == 0 {
            break;
        }
        count[l] -= 1;
        count[l + 1] += 1;
        kraft -= 1 << (max - l - 1);
    }

    // Under-subscribed: lift a code from the deepest level; never overshoots.
    while kraft < cap {
        let mut l = max;
        while l > 1 && count[l] == 0 {
            l -= 1;
        }
        if l <= 1 {
            break;
        }
        count[l] -= 1;
        count[l - 1] += 1;
        kraft += 1 << (max - l);
    }
}

/// Canonical codes (MSB-first values) for `lengths`.
pub fn canonical_codes(lengths: &[u8]) -> Vec<u16> {
    let max = lengths.iter().copied().max().unwrap_or(0) as usize;
    let mut bl_count = vec![0u16; max + 1];
    for &l in lengths {
        if l > 0 {
            bl_count[l as usize] += 1;
        }
    }
    let mut next_code = vec![0u16; max + 2];
    let mut code = 0u16;
    for bits in 1..=max {
        code = (code + bl_count[bits - 1]) << 1;
        next_code[bits] = code;
    }
    let mut codes = vec![0u16; lengths.len()];
    for (sym, &l) in lengths.iter().enumerate() {
        if l > 0 {
            codes[sym] = next_code[l as usize];
            next_code[l as usize] += 1;
        }
    }
    codes
}

/// Kraft sum of `lengths` scaled by `2^max_bits` (a complete code sums to `2^max_bits`).
pub fn kraft_sum(lengths: &[u8], max_bits: u8) -> u64 {
    lengths
        .iter()
        .filter(|&&l| l > 0)
        .map(|&l| {
            if l > max_bits {
                u64::MAX / 2
            } else {
                1u64 << (max_bits - l)
            }
        })
        .fold(0u64, |a, b| a.saturating_add(b))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
