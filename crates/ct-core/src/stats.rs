//! Small order-statistics helpers shared by the filter and the estimators.

/// Percentile with linear interpolation between order statistics.
///
/// `p` is in `[0, 100]`. Returns `None` on an empty sample. The input does
/// not need to be sorted.
#[must_use]
pub(crate) fn percentile(values: &[f64], p: f64) -> Option<f64> {
    if values.is_empty() {
        return None;
    }

    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    Some(percentile_sorted(&sorted, p))
}

/// Percentile over an already-sorted slice. Caller guarantees non-empty.
#[expect(
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    reason = "sample sizes are far below f64 integer precision"
)]
pub(crate) fn percentile_sorted(sorted: &[f64], p: f64) -> f64 {
    debug_assert!(!sorted.is_empty());
    let p = p.clamp(0.0, 100.0);
    let rank = p / 100.0 * (sorted.len() - 1) as f64;
    let low = rank.floor() as usize;
    let high = rank.ceil() as usize;
    if low == high {
        sorted[low]
    } else {
        let weight = rank - low as f64;
        sorted[low].mul_add(1.0 - weight, sorted[high] * weight)
    }
}

/// Median via the interpolated percentile.
#[must_use]
pub(crate) fn median(values: &[f64]) -> Option<f64> {
    percentile(values, 50.0)
}

/// Arithmetic mean. Returns `None` on an empty sample.
#[expect(
    clippy::cast_precision_loss,
    reason = "sample sizes are far below f64 integer precision"
)]
#[must_use]
pub(crate) fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    Some(values.iter().sum::<f64>() / values.len() as f64)
}

/// Sample standard deviation. Returns 0 for samples of fewer than 2 values.
#[expect(
    clippy::cast_precision_loss,
    reason = "sample sizes are far below f64 integer precision"
)]
#[must_use]
pub(crate) fn std_dev(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let m = mean(values).unwrap_or(0.0);
    let variance =
        values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / (values.len() - 1) as f64;
    variance.sqrt()
}
