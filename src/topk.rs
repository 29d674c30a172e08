use std::cmp::Ordering;

use ahash::AHashSet;

use crate::linalg::dot;

// Total order on (score, id): score descending, id ascending. Gives every
// query a deterministic ranking even across score ties.
#[inline]
fn rank_cmp(a: &(f32, i32), b: &(f32, i32)) -> Ordering {
    b.0.partial_cmp(&a.0)
        .unwrap_or(Ordering::Equal)
        .then_with(|| a.1.cmp(&b.1))
}

/// Score every non-excluded row of `factors` against `query` and return the
/// top `n` as (ids, scores), best first.
///
/// Partial selection, not a full sort: quickselect over the candidates then
/// an O(n log n) sort of the survivors. Returns fewer than `n` pairs when
/// fewer candidates are eligible; never pads.
pub(crate) fn top_n(
    query: &[f32],
    factors: &[f32],
    k: usize,
    n: usize,
    excluded: &AHashSet<i32>,
) -> (Vec<i32>, Vec<f32>) {
    let rows = factors.len() / k;
    let mut scored: Vec<(f32, i32)> = (0..rows as i32)
        .filter(|i| !excluded.contains(i))
        .map(|i| {
            let row = &factors[(i as usize) * k..(i as usize + 1) * k];
            (dot(query, row), i)
        })
        .collect();

    let take = n.min(scored.len());
    if take == 0 {
        return (vec![], vec![]);
    }
    scored.select_nth_unstable_by(take.saturating_sub(1), rank_cmp);
    scored.truncate(take);
    scored.sort_unstable_by(rank_cmp);
    (
        scored.iter().map(|(_, i)| *i).collect(),
        scored.iter().map(|(s, _)| *s).collect(),
    )
}
