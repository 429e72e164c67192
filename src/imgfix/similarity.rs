//! Gestalt (Ratcliff/Obershelp) similarity over arbitrary sequences.

use crate::imgfix::paths;

/// Longest common contiguous block inside `a[alo..ahi]` / `b[blo..bhi]`.
/// Ties resolve to the block starting earliest in `a`, then in `b`.
fn longest_match<T: PartialEq>(
    a: &[T],
    b: &[T],
    (alo, ahi): (usize, usize),
    (blo, bhi): (usize, usize),
) -> (usize, usize, usize) {
    let width = bhi - blo;
    let mut prev = vec![0usize; width + 1];
    let mut curr = vec![0usize; width + 1];
    let (mut best_i, mut best_j, mut best_len) = (alo, blo, 0usize);

    for i in alo..ahi {
        for j in blo..bhi {
            let k = j - blo + 1;
            if a[i] == b[j] {
                curr[k] = prev[k - 1] + 1;
                if curr[k] > best_len {
                    best_len = curr[k];
                    best_i = i + 1 - best_len;
                    best_j = j + 1 - best_len;
                }
            } else {
                curr[k] = 0;
            }
        }
        std::mem::swap(&mut prev, &mut curr);
    }
    (best_i, best_j, best_len)
}

/// Total size of all matching blocks found by recursive longest-match.
fn matched_len<T: PartialEq>(a: &[T], b: &[T]) -> usize {
    let mut total = 0;
    let mut queue = vec![((0, a.len()), (0, b.len()))];
    while let Some(((alo, ahi), (blo, bhi))) = queue.pop() {
        if alo >= ahi || blo >= bhi {
            continue;
        }
        let (i, j, k) = longest_match(a, b, (alo, ahi), (blo, bhi));
        if k == 0 {
            continue;
        }
        total += k;
        queue.push(((alo, i), (blo, j)));
        queue.push(((i + k, ahi), (j + k, bhi)));
    }
    total
}

/// `2*M / (|a|+|b|)`; two empty sequences are identical.
pub fn ratio<T: PartialEq>(a: &[T], b: &[T]) -> f64 {
    let total = a.len() + b.len();
    if total == 0 {
        return 1.0;
    }
    2.0 * matched_len(a, b) as f64 / total as f64
}

pub fn str_ratio(a: &str, b: &str) -> f64 {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    ratio(&a, &b)
}

/// Similarity of the lower-cased base names of two paths.
pub fn filename_similarity(a: &str, b: &str) -> f64 {
    str_ratio(
        &paths::file_name(a).to_lowercase(),
        &paths::file_name(b).to_lowercase(),
    )
}

/// Similarity of the normalized segment sequences of two paths.
pub fn path_similarity(a: &str, b: &str) -> f64 {
    ratio(&paths::segments(a), &paths::segments(b))
}
