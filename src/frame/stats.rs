//! Small numeric helpers shared by analytics and the mutations that need summary values.

use std::cmp::Ordering;
use std::collections::HashMap;

use itertools::Itertools;

pub fn present(values: &[Option<f64>]) -> Vec<f64> {
    values.iter().flatten().copied().collect()
}

pub fn sorted(values: &[Option<f64>]) -> Vec<f64> {
    let mut present = present(values);
    present.sort_by(|a, b| a.partial_cmp(b).unwrap_or(Ordering::Equal));
    present
}

pub fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        None
    } else {
        Some(values.iter().sum::<f64>() / values.len() as f64)
    }
}

/// Standard deviation with `ddof` delta degrees of freedom (1 = sample, 0 = population)
pub fn std_dev(values: &[f64], ddof: usize) -> Option<f64> {
    let mean = mean(values)?;
    if values.len() <= ddof {
        return None;
    }
    let squares: f64 = values.iter().map(|v| (v - mean).powi(2)).sum();
    Some((squares / (values.len() - ddof) as f64).sqrt())
}

/// Quantile with linear interpolation between the closest ranks. `sorted` must be sorted.
pub fn quantile(sorted: &[f64], q: f64) -> Option<f64> {
    if sorted.is_empty() {
        return None;
    }
    let position = q.clamp(0.0, 1.0) * (sorted.len() - 1) as f64;
    let lower = position.floor() as usize;
    let upper = position.ceil() as usize;
    let fraction = position - lower as f64;
    Some(sorted[lower] + (sorted[upper] - sorted[lower]) * fraction)
}

pub fn median(values: &[Option<f64>]) -> Option<f64> {
    quantile(&sorted(values), 0.5)
}

pub fn min_max(values: &[f64]) -> Option<(f64, f64)> {
    values.iter().copied().fold(None, |acc, v| match acc {
        None => Some((v, v)),
        Some((lo, hi)) => Some((lo.min(v), hi.max(v))),
    })
}

/// Distinct non-missing values in order of first appearance, with their counts
pub fn value_counts(values: &[Option<String>]) -> Vec<(String, usize)> {
    let mut counts: HashMap<&str, usize> = HashMap::new();
    let mut order = Vec::new();
    for value in values.iter().flatten() {
        let count = counts.entry(value.as_str()).or_insert_with(|| {
            order.push(value.as_str());
            0
        });
        *count += 1;
    }
    order
        .into_iter()
        .map(|v| (v.to_string(), counts[v]))
        .collect()
}

/// Most frequent non-missing value. Ties go to the smallest value, as a sorted mode would.
pub fn mode(values: &[Option<String>]) -> Option<String> {
    value_counts(values)
        .into_iter()
        .sorted_by(|(a, count_a), (b, count_b)| count_b.cmp(count_a).then_with(|| a.cmp(b)))
        .map(|(value, _)| value)
        .next()
}

/// Numerical mode, ties going to the smallest value
pub fn numeric_mode(values: &[Option<f64>]) -> Option<f64> {
    let sorted = sorted(values);
    let mut best: Option<(f64, usize)> = None;
    for (value, group) in &sorted.into_iter().group_by(|v| *v) {
        let count = group.count();
        if best.map_or(true, |(_, best_count)| count > best_count) {
            best = Some((value, count));
        }
    }
    best.map(|(value, _)| value)
}

/// Pearson correlation over the rows where both sides are present
pub fn pearson(x: &[Option<f64>], y: &[Option<f64>]) -> Option<f64> {
    let pairs: Vec<(f64, f64)> = x
        .iter()
        .zip(y)
        .filter_map(|(a, b)| Some(((*a)?, (*b)?)))
        .collect();
    if pairs.len() < 2 {
        return None;
    }
    let n = pairs.len() as f64;
    let mean_x = pairs.iter().map(|(a, _)| a).sum::<f64>() / n;
    let mean_y = pairs.iter().map(|(_, b)| b).sum::<f64>() / n;
    let (mut cov, mut var_x, mut var_y) = (0.0, 0.0, 0.0);
    for (a, b) in &pairs {
        cov += (a - mean_x) * (b - mean_y);
        var_x += (a - mean_x).powi(2);
        var_y += (b - mean_y).powi(2);
    }
    if var_x == 0.0 || var_y == 0.0 {
        return None;
    }
    Some(cov / (var_x.sqrt() * var_y.sqrt()))
}

pub fn round_to(value: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    (value * factor).round() / factor
}
