/// Ratio, standardization and log transform of site series.

use crate::model::{ModelError, SeriesPoint};
use std::collections::HashMap;

/// Divides `numerator` by `denominator`, joined on sample id.
///
/// Samples present in only one series are dropped. Output points carry the
/// numerator's sample date, in numerator order. A sample repeated in either
/// series (no replicate aggregation) yields one point per pairing.
///
/// Division is unguarded: a zero denominator gives an infinite or NaN ratio.
pub fn ratio(numerator: &[SeriesPoint], denominator: &[SeriesPoint]) -> Vec<SeriesPoint> {
    let mut by_sample: HashMap<&str, Vec<f64>> = HashMap::new();
    for point in denominator {
        by_sample.entry(point.sample_id.as_str()).or_default().push(point.value);
    }

    numerator
        .iter()
        .flat_map(|a| {
            by_sample
                .get(a.sample_id.as_str())
                .into_iter()
                .flatten()
                .map(move |b| SeriesPoint::new(a.sample_id.clone(), a.sample_date, a.value / b))
        })
        .collect()
}

/// Population (ddof = 0) standard deviation.
pub fn population_std(values: &[f64]) -> f64 {
    if values.is_empty() {
        return f64::NAN;
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
    variance.sqrt()
}

/// Scales every value by the population standard deviation of the series.
///
/// Values are not centred, so a positive series stays positive for the log
/// transform. Fails on a series whose deviation is zero or undefined.
pub fn standardize(series: &[SeriesPoint]) -> Result<Vec<SeriesPoint>, ModelError> {
    let values: Vec<f64> = series.iter().map(|p| p.value).collect();
    let std = population_std(&values);
    if !std.is_finite() || std == 0.0 {
        return Err(ModelError::DegenerateSeries { points: series.len(), std });
    }
    Ok(series
        .iter()
        .map(|p| SeriesPoint::new(p.sample_id.clone(), p.sample_date, p.value / std))
        .collect())
}

/// Natural log of every value. Fails on the first value that is not
/// strictly positive.
pub fn log_transform(series: &[SeriesPoint]) -> Result<Vec<SeriesPoint>, ModelError> {
    series
        .iter()
        .map(|p| {
            // `!(x > 0)` also catches NaN
            if !(p.value > 0.0) {
                return Err(ModelError::InvalidDomain { value: p.value });
            }
            Ok(SeriesPoint::new(p.sample_id.clone(), p.sample_date, p.value.ln()))
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
