/// Core data types for the wastewater surveillance models.
///
/// This module defines the shared domain model imported by all other modules:
/// the ODM table rows handed over by the loader, the derived series types the
/// analysis stages pass between each other, the unit enum, and the error
/// taxonomy. It contains no numerical logic and no I/O.

use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

// ---------------------------------------------------------------------------
// Units
// ---------------------------------------------------------------------------

/// Label for genomic copies per litre, as written in the ODM `unit` column.
pub const UNIT_GCL: &str = "gcL";

/// Label for genomic copies per millilitre.
pub const UNIT_GCML: &str = "gcMl";

/// The two supported concentration units.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Unit {
    #[serde(rename = "gcL")]
    GcL,
    #[serde(rename = "gcMl")]
    GcMl,
}

impl Unit {
    pub fn label(self) -> &'static str {
        match self {
            Unit::GcL => UNIT_GCL,
            Unit::GcMl => UNIT_GCML,
        }
    }
}

impl fmt::Display for Unit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for Unit {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            UNIT_GCL => Ok(Unit::GcL),
            UNIT_GCML => Ok(Unit::GcMl),
            other => Err(ModelError::InvalidUnit(other.to_string())),
        }
    }
}

// ---------------------------------------------------------------------------
// ODM table rows
// ---------------------------------------------------------------------------

/// One row of the ODM "Site" table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SiteRow {
    #[serde(rename = "siteID")]
    pub site_id: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(rename = "type", default)]
    pub site_type: Option<String>,
    #[serde(rename = "healthRegion", default)]
    pub health_region: Option<String>,
    #[serde(rename = "publicHealthDepartment", default)]
    pub public_health_department: Option<String>,
    #[serde(rename = "geoLat", default)]
    pub latitude: Option<f64>,
    #[serde(rename = "geoLong", default)]
    pub longitude: Option<f64>,
}

/// One row of the ODM "Sample" table.
///
/// Grab samples carry only `date_time`; composite samples also carry
/// `date_time_end` and are keyed by it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SampleRow {
    #[serde(rename = "sampleID")]
    pub sample_id: String,
    #[serde(rename = "siteID")]
    pub site_id: String,
    #[serde(rename = "dateTime")]
    pub date_time: NaiveDateTime,
    #[serde(rename = "dateTimeEnd", default)]
    pub date_time_end: Option<NaiveDateTime>,
}

impl SampleRow {
    /// The canonical temporal key of a sample: the date of the end time for
    /// composite samples, otherwise the date of the collection time.
    pub fn sample_date(&self) -> NaiveDate {
        self.date_time_end.unwrap_or(self.date_time).date()
    }
}

/// One row of the ODM "WWMeasure" table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WwMeasureRow {
    #[serde(rename = "sampleID")]
    pub sample_id: String,
    /// Analyte name, e.g. `covN1` or `nPMMoV`.
    #[serde(rename = "type")]
    pub analyte: String,
    pub unit: String,
    #[serde(default)]
    pub value: Option<f64>,
    #[serde(rename = "qualityFlag", default)]
    pub quality_flag: Option<String>,
}

/// One row of the ODM "SiteMeasure" table. Carried through date filtering
/// but not modelled.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SiteMeasureRow {
    #[serde(rename = "siteID")]
    pub site_id: String,
    #[serde(rename = "sampleID", default)]
    pub sample_id: Option<String>,
    #[serde(rename = "type")]
    pub measure_type: String,
    #[serde(default)]
    pub unit: Option<String>,
    #[serde(default)]
    pub value: Option<f64>,
}

// ---------------------------------------------------------------------------
// Derived rows and series
// ---------------------------------------------------------------------------

/// A wastewater measurement joined with the sample date of its sample.
///
/// Produced once per site by `SiteData::new` and never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SiteMeasurement {
    pub sample_id: String,
    pub analyte: String,
    pub unit: String,
    pub value: Option<f64>,
    pub quality_flag: Option<String>,
    pub sample_date: NaiveDate,
}

/// One point of a site series. The sample id travels with the value so
/// that two analyte series can be joined by sample.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SeriesPoint {
    pub sample_id: String,
    pub sample_date: NaiveDate,
    pub value: f64,
}

impl SeriesPoint {
    pub fn new(sample_id: impl Into<String>, sample_date: NaiveDate, value: f64) -> Self {
        Self {
            sample_id: sample_id.into(),
            sample_date,
            value,
        }
    }
}

/// A dated value where `None` marks a missing value (out of range for a
/// site, or no site present for an aggregate).
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct DatedValue {
    pub sample_date: NaiveDate,
    pub value: Option<f64>,
}

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Errors raised while building site series, spline models, or aggregates.
///
/// All of them signal malformed input data or configuration; none are
/// transient.
#[derive(Debug, Error, PartialEq)]
pub enum ModelError {
    /// A unit argument other than `gcL` or `gcMl`.
    #[error("invalid units \"{0}\" given for wastewater measure")]
    InvalidUnit(String),
    /// Log of a non-positive (or NaN) value.
    #[error("cannot take the log of non-positive value {value}")]
    InvalidDomain { value: f64 },
    /// Standardization of a series whose standard deviation is zero.
    #[error("cannot standardize a degenerate series ({points} points, std {std})")]
    DegenerateSeries { points: usize, std: f64 },
    /// Too few distinct dates to fit a spline.
    #[error("insufficient data: need at least {required} distinct dates, got {actual}")]
    InsufficientData { required: usize, actual: usize },
    /// The least-squares fit was rejected (bad knots, non-finite input, solver failure).
    #[error("spline fit failed: {0}")]
    FitFailure(String),
    #[error("site not found: {0}")]
    UnknownSite(String),
    #[error("no weight given for site {0}")]
    MissingWeight(String),
    #[error("invalid weight {weight} for site {site_id}")]
    InvalidWeight { site_id: String, weight: f64 },
    #[error("invalid date \"{0}\", expected YYYY-MM-DD")]
    InvalidDate(String),
    #[error("configuration error: {0}")]
    Config(String),
    /// A stage error annotated with the series it occurred in.
    #[error("site {site_id} ({gene_1}/{gene_2}, {units}): {source}")]
    Series {
        site_id: String,
        gene_1: String,
        gene_2: String,
        units: String,
        #[source]
        source: Box<ModelError>,
    },
}

impl ModelError {
    /// The stage-level error with any series context stripped.
    pub fn kind(&self) -> &ModelError {
        match self {
            ModelError::Series { source, .. } => source.kind(),
            other => other,
        }
    }

    /// Site id from the series context, if any.
    pub fn site_id(&self) -> Option<&str> {
        match self {
            ModelError::Series { site_id, .. } => Some(site_id),
            ModelError::UnknownSite(site) | ModelError::MissingWeight(site) => Some(site),
            ModelError::InvalidWeight { site_id, .. } => Some(site_id),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn at(date: &str, time: &str) -> NaiveDateTime {
        NaiveDateTime::parse_from_str(&format!("{} {}", date, time), "%Y-%m-%d %H:%M:%S")
            .expect("test timestamp should parse")
    }

    #[test]
    fn test_unit_parses_only_the_two_supported_labels() {
        assert_eq!("gcL".parse::<Unit>(), Ok(Unit::GcL));
        assert_eq!("gcMl".parse::<Unit>(), Ok(Unit::GcMl));
        assert_eq!(
            "gc/L".parse::<Unit>(),
            Err(ModelError::InvalidUnit("gc/L".to_string()))
        );
        // Labels are case-sensitive, as in the ODM dictionary.
        assert!("gcml".parse::<Unit>().is_err());
    }

    #[test]
    fn test_grab_sample_date_comes_from_date_time() {
        let sample = SampleRow {
            sample_id: "S1".to_string(),
            site_id: "A".to_string(),
            date_time: at("2021-03-01", "08:30:00"),
            date_time_end: None,
        };
        assert_eq!(sample.sample_date(), NaiveDate::from_ymd_opt(2021, 3, 1).unwrap());
    }

    #[test]
    fn test_composite_sample_date_comes_from_end_time() {
        // 24h composite started the evening before; keyed by the end date.
        let sample = SampleRow {
            sample_id: "S2".to_string(),
            site_id: "A".to_string(),
            date_time: at("2021-03-01", "09:00:00"),
            date_time_end: Some(at("2021-03-02", "09:00:00")),
        };
        assert_eq!(sample.sample_date(), NaiveDate::from_ymd_opt(2021, 3, 2).unwrap());
    }

    #[test]
    fn test_series_error_kind_unwraps_context() {
        let err = ModelError::Series {
            site_id: "A".to_string(),
            gene_1: "covN1".to_string(),
            gene_2: "nPMMoV".to_string(),
            units: "gcL".to_string(),
            source: Box::new(ModelError::InsufficientData { required: 2, actual: 1 }),
        };
        assert_eq!(err.kind(), &ModelError::InsufficientData { required: 2, actual: 1 });
        assert_eq!(err.site_id(), Some("A"));
        let message = err.to_string();
        assert!(message.contains("covN1/nPMMoV"), "context missing from '{}'", message);
    }
}
