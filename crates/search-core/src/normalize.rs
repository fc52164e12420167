/// Min-max rescales `scores` into `[0, 1]`, preserving order.
///
/// A list without spread carries no ranking signal and maps to all `1.0`.
pub fn normalize_scores(scores: &[f32]) -> Vec<f32> {
    let Some(first) = scores.first() else {
        return Vec::new();
    };
    let (min, max) = scores
        .iter()
        .fold((*first, *first), |(lo, hi), s| (lo.min(*s), hi.max(*s)));
    if max == min {
        return vec![1.0; scores.len()];
    }
    let spread = max - min;
    scores.iter().map(|s| (s - min) / spread).collect()
}
