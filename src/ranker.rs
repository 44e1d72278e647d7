use std::cmp::Ordering;

use uuid::Uuid;

/// Orders `items` by descending predicted score. Equal scores (including
/// `-0.0` and `0.0`) keep catalog order; NaN sorts after every number.
pub fn rank(scores: &[f64], items: &[Uuid]) -> Vec<Uuid> {
    debug_assert_eq!(scores.len(), items.len());

    let mut order: Vec<usize> = (0..items.len().min(scores.len())).collect();
    order.sort_by(|&a, &b| compare_scores(scores[a], scores[b]));
    order.into_iter().map(|index| items[index]).collect()
}

fn compare_scores(a: f64, b: f64) -> Ordering {
    sortable(b).total_cmp(&sortable(a))
}

fn sortable(score: f64) -> f64 {
    if score.is_nan() {
        f64::NEG_INFINITY
    } else {
        // -0.0 + 0.0 == +0.0, so signed zeros compare equal under total_cmp
        score + 0.0
    }
}
