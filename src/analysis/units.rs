/// Unit conversion and limit-of-detection flooring.
///
/// Measurements arrive in either genomic copies per litre or per millilitre.
/// They are converted to the requested unit, then anything below the limit
/// of detection for that unit is replaced with half the limit.

use crate::model::{ModelError, Unit};

/// Millilitres per litre.
pub const ML_PER_L: f64 = 1000.0;

/// Limit of detection in gcL. The gcMl limit is derived from it.
pub const LOD_GCL: f64 = 300.0;

/// Limit of detection for one unit.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DetectionLimit {
    pub unit: Unit,
    pub limit: f64,
}

impl DetectionLimit {
    /// Value reported in place of a reading below the limit.
    pub fn replacement(&self) -> f64 {
        self.limit / 2.0
    }
}

/// The default limit table: 300 gcL, 0.3 gcMl.
pub const DEFAULT_DETECTION_LIMITS: [DetectionLimit; 2] = [
    DetectionLimit { unit: Unit::GcL, limit: LOD_GCL },
    DetectionLimit { unit: Unit::GcMl, limit: LOD_GCL / ML_PER_L },
];

/// Converts a value recorded in `from` into `to`.
///
/// gcMl readings are multiplied by 1000 to give gcL, gcL readings divided by
/// 1000 to give gcMl; same-unit values pass through.
pub fn convert(value: f64, from: Unit, to: Unit) -> f64 {
    match (from, to) {
        (Unit::GcMl, Unit::GcL) => value * ML_PER_L,
        (Unit::GcL, Unit::GcMl) => value / ML_PER_L,
        _ => value,
    }
}

/// Converts measurement values and applies the detection-limit floor.
#[derive(Debug, Clone, PartialEq)]
pub struct UnitNormalizer {
    limits: Vec<DetectionLimit>,
}

impl Default for UnitNormalizer {
    fn default() -> Self {
        Self::new(DEFAULT_DETECTION_LIMITS.to_vec())
    }
}

impl UnitNormalizer {
    pub fn new(limits: Vec<DetectionLimit>) -> Self {
        Self { limits }
    }

    pub fn limits(&self) -> &[DetectionLimit] {
        &self.limits
    }

    /// The detection limit configured for `unit`, if any.
    pub fn limit_for(&self, unit: Unit) -> Option<&DetectionLimit> {
        self.limits.iter().find(|l| l.unit == unit)
    }

    /// Replaces a value below the limit of detection with half the limit.
    /// Values at or above the limit are returned unchanged, as are values in
    /// a unit with no configured limit.
    pub fn floor(&self, value: f64, unit: Unit) -> f64 {
        match self.limit_for(unit) {
            Some(lod) if value < lod.limit => lod.replacement(),
            _ => value,
        }
    }

    /// Expresses a value recorded under the label `recorded_unit` in
    /// `target`, then floors it.
    ///
    /// A recorded label outside the two supported units is not converted;
    /// the value is taken as already being in the target unit.
    pub fn normalize(&self, value: f64, recorded_unit: &str, target: Unit) -> f64 {
        let converted = match recorded_unit.parse::<Unit>() {
            Ok(from) => convert(value, from, target),
            Err(_) => value,
        };
        self.floor(converted, target)
    }

    /// Same as `normalize`, with the target given as a label.
    pub fn normalize_to(&self, value: f64, recorded_unit: &str, target: &str) -> Result<f64, ModelError> {
        let target = target.parse::<Unit>()?;
        Ok(self.normalize(value, recorded_unit, target))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
