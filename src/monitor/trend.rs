// src/monitor/trend.rs
//! Memory-leak trend detection
//!
//! Fits a least-squares line over the retained memory history and turns the
//! slope into a leak verdict. The trend is recomputed from the full history
//! on every tick once the minimum sample count is reached; it carries no
//! incremental state.

use serde::{Deserialize, Serialize};

/// Minimum samples before a trend is computed at all
pub const MIN_TREND_SAMPLES: usize = 10;

/// Derived leak analytic over the memory history window
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemoryTrend {
    /// Regression slope in bytes per sample
    pub growth_rate: f64,

    /// True when projected growth over the window exceeds the leak threshold
    pub is_leaking: bool,

    /// 0–1; grows with sample count and goodness of fit
    pub confidence: f64,

    pub sample_count: usize,
}

/// Compute the trend over `used_bytes` history, or `None` below the minimum.
///
/// `leak_threshold_bytes` is the sustained growth over the whole window that
/// flags a leak: the verdict is `slope * (n - 1) > threshold`.
pub fn compute_trend(used_bytes: &[u64], leak_threshold_bytes: u64) -> Option<MemoryTrend> {
    let n = used_bytes.len();
    if n < MIN_TREND_SAMPLES {
        return None;
    }

    let (slope, r_squared) = linear_fit(used_bytes);

    let window_growth = slope * (n as f64 - 1.0);
    let is_leaking = slope > 0.0 && window_growth > leak_threshold_bytes as f64;

    // Confidence blends sample-count saturation (full weight at 100 samples)
    // with the regression fit; both halves are monotonic and the total is
    // capped at 1.0.
    let sample_factor = (n as f64 / 100.0).min(1.0);
    let fit_factor = r_squared.clamp(0.0, 1.0);
    let confidence = (0.5 * sample_factor + 0.5 * fit_factor).min(1.0);

    Some(MemoryTrend {
        growth_rate: slope,
        is_leaking,
        confidence,
        sample_count: n,
    })
}

/// Least-squares fit over sample index, returning (slope, r_squared)
fn linear_fit(values: &[u64]) -> (f64, f64) {
    let n = values.len() as f64;
    if values.len() < 2 {
        return (0.0, 0.0);
    }

    let mut sum_x = 0.0;
    let mut sum_y = 0.0;
    let mut sum_xy = 0.0;
    let mut sum_xx = 0.0;
    let mut sum_yy = 0.0;

    for (i, &v) in values.iter().enumerate() {
        let x = i as f64;
        let y = v as f64;
        sum_x += x;
        sum_y += y;
        sum_xy += x * y;
        sum_xx += x * x;
        sum_yy += y * y;
    }

    let denom = n * sum_xx - sum_x * sum_x;
    if denom == 0.0 {
        return (0.0, 0.0);
    }

    let slope = (n * sum_xy - sum_x * sum_y) / denom;
    let intercept = (sum_y - slope * sum_x) / n;

    let ss_tot = sum_yy - (sum_y * sum_y) / n;
    let ss_res: f64 = values
        .iter()
        .enumerate()
        .map(|(i, &v)| {
            let predicted = slope * i as f64 + intercept;
            (v as f64 - predicted).powi(2)
        })
        .sum();

    // A perfectly flat series fits its own mean exactly
    let r_squared = if ss_tot != 0.0 { 1.0 - ss_res / ss_tot } else { 1.0 };

    (slope, r_squared)
}
