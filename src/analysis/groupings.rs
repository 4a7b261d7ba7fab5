/// Per-sample grouping of replicate measurements.
///
/// A lab often reports several replicates of the same analyte for one
/// sample. `aggregate_by_sample` collapses them into one point per sample.

use crate::model::SeriesPoint;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// How replicate measurements of one sample are handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Aggregation {
    /// One point per sample: the mean value, dated by the first replicate.
    #[default]
    Mean,
    /// Keep every replicate. Duplicate dates are left for the caller.
    None,
}

/// Collapses points sharing a sample id, or passes them through.
///
/// Groups are emitted in order of first appearance. Dates within a group
/// are assumed identical; the first one seen is kept.
pub fn aggregate_by_sample(points: Vec<SeriesPoint>, aggregation: Aggregation) -> Vec<SeriesPoint> {
    match aggregation {
        Aggregation::None => points,
        Aggregation::Mean => mean_by_sample(points),
    }
}

fn mean_by_sample(points: Vec<SeriesPoint>) -> Vec<SeriesPoint> {
    // index into `groups` by sample id; (point, sum, count)
    let mut index: HashMap<String, usize> = HashMap::new();
    let mut groups: Vec<(SeriesPoint, f64, usize)> = Vec::new();

    for point in points {
        match index.get(&point.sample_id) {
            Some(&i) => {
                let group = &mut groups[i];
                group.1 += point.value;
                group.2 += 1;
            }
            None => {
                index.insert(point.sample_id.clone(), groups.len());
                let value = point.value;
                groups.push((point, value, 1));
            }
        }
    }

    groups
        .into_iter()
        .map(|(mut first, sum, count)| {
            first.value = sum / count as f64;
            first
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
