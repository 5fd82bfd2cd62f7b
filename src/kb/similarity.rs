//! String similarity for the fuzzy fallback.
//!
//! Ratcliff/Obershelp "gestalt" matching, computed the same way as the
//! classic `SequenceMatcher.ratio()`: repeatedly take the longest common
//! block, recurse on both sides, and score `2 * matched / total_len`.
//! Sequences are compared by Unicode scalar value.
//!
//! When the second sequence is 200 elements or longer, elements occurring
//! more than `len / 100 + 1` times are treated as "popular" and cannot seed
//! a block (they may still extend one). Long OCR dumps are the common case
//! for that.

use std::collections::{HashMap, HashSet};

/// Minimum length of `b` at which popular elements are discounted.
const AUTOJUNK_MIN_LEN: usize = 200;

/// Precomputed index of the second sequence.
struct Indexed {
    chars: Vec<char>,
    positions: HashMap<char, Vec<usize>>,
}

impl Indexed {
    fn new(b: &str) -> Self {
        let chars: Vec<char> = b.chars().collect();
        let mut positions: HashMap<char, Vec<usize>> = HashMap::new();
        for (j, c) in chars.iter().enumerate() {
            positions.entry(*c).or_default().push(j);
        }

        let n = chars.len();
        if n >= AUTOJUNK_MIN_LEN {
            let limit = n / 100 + 1;
            let popular: HashSet<char> = positions
                .iter()
                .filter(|(_, idx)| idx.len() > limit)
                .map(|(c, _)| *c)
                .collect();
            positions.retain(|c, _| !popular.contains(c));
        }

        Self { chars, positions }
    }
}

/// Longest common block of `a[alo..ahi]` and `b[blo..bhi]` as `(i, j, size)`.
/// Ties go to the block starting earliest in `a`, then earliest in `b`.
fn longest_match(a: &[char], b: &Indexed, alo: usize, ahi: usize, blo: usize, bhi: usize) -> (usize, usize, usize) {
    let (mut besti, mut bestj, mut bestsize) = (alo, blo, 0usize);
    let mut run: HashMap<usize, usize> = HashMap::new();

    for (i, c) in a.iter().enumerate().take(ahi).skip(alo) {
        let mut next_run = HashMap::new();
        if let Some(js) = b.positions.get(c) {
            for &j in js {
                if j < blo {
                    continue;
                }
                if j >= bhi {
                    break;
                }
                let k = run.get(&j.wrapping_sub(1)).copied().unwrap_or(0) + 1;
                next_run.insert(j, k);
                if k > bestsize {
                    besti = i + 1 - k;
                    bestj = j + 1 - k;
                    bestsize = k;
                }
            }
        }
        run = next_run;
    }

    // Popular elements were dropped from the index; let equal neighbours
    // extend the block in both directions.
    let bc = &b.chars;
    while besti > alo && bestj > blo && a[besti - 1] == bc[bestj - 1] {
        besti -= 1;
        bestj -= 1;
        bestsize += 1;
    }
    while besti + bestsize < ahi && bestj + bestsize < bhi && a[besti + bestsize] == bc[bestj + bestsize] {
        bestsize += 1;
    }

    (besti, bestj, bestsize)
}

/// Total number of characters in matching blocks between `a` and `b`.
fn matched_chars(a: &[char], b: &Indexed) -> usize {
    let mut total = 0;
    let mut queue = vec![(0, a.len(), 0, b.chars.len())];

    while let Some((alo, ahi, blo, bhi)) = queue.pop() {
        let (i, j, k) = longest_match(a, b, alo, ahi, blo, bhi);
        if k == 0 {
            continue;
        }
        total += k;
        if alo < i && blo < j {
            queue.push((alo, i, blo, j));
        }
        if i + k < ahi && j + k < bhi {
            queue.push((i + k, ahi, j + k, bhi));
        }
    }

    total
}

fn ratio_from(matches: usize, total_len: usize) -> f64 {
    if total_len == 0 {
        1.0
    } else {
        2.0 * matches as f64 / total_len as f64
    }
}

/// Similarity ratio in `[0, 1]` between `a` and `b`.
pub fn ratio(a: &str, b: &str) -> f64 {
    let a_chars: Vec<char> = a.chars().collect();
    let indexed = Indexed::new(b);
    ratio_from(matched_chars(&a_chars, &indexed), a_chars.len() + indexed.chars.len())
}

/// Pick the candidate most similar to `input`, if it scores at least `cutoff`.
///
/// Returns the candidate's index and score. On equal scores the earlier
/// candidate wins.
pub fn closest_match<'a, I>(input: &str, candidates: I, cutoff: f64) -> Option<(usize, f64)>
where
    I: IntoIterator<Item = &'a str>,
{
    let indexed = Indexed::new(input);
    let input_len = indexed.chars.len();
    let mut best: Option<(usize, f64)> = None;

    for (idx, candidate) in candidates.into_iter().enumerate() {
        let a: Vec<char> = candidate.chars().collect();
        let total_len = a.len() + input_len;

        // Upper bound from lengths alone: cheap reject.
        if ratio_from(a.len().min(input_len), total_len) < cutoff {
            continue;
        }

        let score = ratio_from(matched_chars(&a, &indexed), total_len);
        if score < cutoff {
            continue;
        }
        if best.is_none_or(|(_, s)| score > s) {
            best = Some((idx, score));
        }
    }

    best
}
