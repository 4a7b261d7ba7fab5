/// Per-site access to ODM data.
///
/// `SiteData` copies one site's samples and wastewater measurements out of
/// an `OdmData`, joins each measurement to its sample date, and exposes the
/// analysis chain as individually callable stages:
///
///   gene selection → units/LOD → replicate aggregation → ratio
///     → standardize → log → spline
///
/// The joined rows are built once in `new` and never change afterwards, so
/// repeated queries for different gene pairs see identical inputs.

use crate::analysis::groupings::{self, Aggregation};
use crate::analysis::ratio;
use crate::analysis::spline::SplineModel;
use crate::analysis::units::UnitNormalizer;
use crate::dataset::OdmData;
use crate::model::{ModelError, SampleRow, SeriesPoint, SiteMeasurement, SiteRow, Unit};
use chrono::NaiveDate;
use std::collections::{BTreeSet, HashSet};

#[derive(Debug, Clone)]
pub struct SiteData {
    site: SiteRow,
    samples: Vec<SampleRow>,
    measures: Vec<SiteMeasurement>,
    normalizer: UnitNormalizer,
    aggregation: Aggregation,
}

impl SiteData {
    /// Extracts the site, its samples and their measurements from `data`.
    ///
    /// Fails with `UnknownSite` if the site table has no row for `site_id`.
    pub fn new(data: &OdmData, site_id: &str) -> Result<Self, ModelError> {
        let site = data
            .find_site(site_id)
            .cloned()
            .ok_or_else(|| ModelError::UnknownSite(site_id.to_string()))?;

        let samples: Vec<SampleRow> = data
            .sample()
            .iter()
            .filter(|s| s.site_id == site_id)
            .cloned()
            .collect();

        let dates = data.sample_dates();
        let own: HashSet<&str> = samples.iter().map(|s| s.sample_id.as_str()).collect();

        let measures: Vec<SiteMeasurement> = data
            .ww_measure()
            .iter()
            .filter(|m| own.contains(m.sample_id.as_str()))
            .filter_map(|m| {
                let sample_date = *dates.get(m.sample_id.as_str())?;
                Some(SiteMeasurement {
                    sample_id: m.sample_id.clone(),
                    analyte: m.analyte.clone(),
                    unit: m.unit.clone(),
                    value: m.value,
                    quality_flag: m.quality_flag.clone(),
                    sample_date,
                })
            })
            .collect();

        log::debug!(
            target: "SITE",
            "[{}] loaded {} samples, {} measurements",
            site_id,
            samples.len(),
            measures.len()
        );

        Ok(Self {
            site,
            samples,
            measures,
            normalizer: UnitNormalizer::default(),
            aggregation: Aggregation::default(),
        })
    }

    /// Replaces the detection-limit table used by `get_data_by_gene`.
    pub fn with_normalizer(mut self, normalizer: UnitNormalizer) -> Self {
        self.normalizer = normalizer;
        self
    }

    /// Sets how replicate measurements of a sample are combined.
    pub fn with_aggregation(mut self, aggregation: Aggregation) -> Self {
        self.aggregation = aggregation;
        self
    }

    // -----------------------------------------------------------------------
    // Site metadata
    // -----------------------------------------------------------------------

    pub fn site_id(&self) -> &str {
        &self.site.site_id
    }

    pub fn name(&self) -> &str {
        &self.site.name
    }

    pub fn description(&self) -> Option<&str> {
        self.site.description.as_deref()
    }

    pub fn site_type(&self) -> Option<&str> {
        self.site.site_type.as_deref()
    }

    pub fn health_region(&self) -> Option<&str> {
        self.site.health_region.as_deref()
    }

    pub fn health_department(&self) -> Option<&str> {
        self.site.public_health_department.as_deref()
    }

    pub fn latitude(&self) -> Option<f64> {
        self.site.latitude
    }

    pub fn longitude(&self) -> Option<f64> {
        self.site.longitude
    }

    pub fn samples(&self) -> &[SampleRow] {
        &self.samples
    }

    pub fn measures(&self) -> &[SiteMeasurement] {
        &self.measures
    }

    pub fn aggregation(&self) -> Aggregation {
        self.aggregation
    }

    /// Earliest and latest sample date over all of the site's samples.
    pub fn date_range(&self) -> Option<(NaiveDate, NaiveDate)> {
        let dates = self.samples.iter().map(SampleRow::sample_date);
        let min = dates.clone().min()?;
        let max = dates.max()?;
        Some((min, max))
    }

    /// Distinct analytes reported at this site, sorted.
    pub fn get_genes_reported(&self) -> Vec<String> {
        self.measures
            .iter()
            .map(|m| m.analyte.as_str())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .map(String::from)
            .collect()
    }

    // -----------------------------------------------------------------------
    // Analysis stages
    // -----------------------------------------------------------------------

    /// Date-ordered series of one analyte in `units`.
    ///
    /// Blank values are dropped, values are converted and floored at the
    /// detection limit, then replicates are combined per the aggregation
    /// setting. Fails with `InvalidUnit` for units other than gcL / gcMl.
    pub fn get_data_by_gene(&self, gene: &str, units: &str) -> Result<Vec<SeriesPoint>, ModelError> {
        let target: Unit = units.parse()?;
        let points: Vec<SeriesPoint> = self
            .measures
            .iter()
            .filter(|m| m.analyte == gene)
            .filter_map(|m| {
                let value = m.value?;
                Some(SeriesPoint::new(
                    m.sample_id.clone(),
                    m.sample_date,
                    self.normalizer.normalize(value, &m.unit, target),
                ))
            })
            .collect();

        let mut series = groupings::aggregate_by_sample(points, self.aggregation);
        series.sort_by_key(|p| p.sample_date);
        Ok(series)
    }

    /// `gene_1` divided by `gene_2`, joined by sample.
    pub fn get_normalized_data(&self, gene_1: &str, gene_2: &str, units: &str) -> Result<Vec<SeriesPoint>, ModelError> {
        self.with_context(gene_1, gene_2, units, || {
            let numerator = self.get_data_by_gene(gene_1, units)?;
            let denominator = self.get_data_by_gene(gene_2, units)?;
            Ok(ratio::ratio(&numerator, &denominator))
        })
    }

    /// Normalized data scaled by its population standard deviation.
    pub fn get_standardized_data(&self, gene_1: &str, gene_2: &str, units: &str) -> Result<Vec<SeriesPoint>, ModelError> {
        let normalized = self.get_normalized_data(gene_1, gene_2, units)?;
        self.with_context(gene_1, gene_2, units, || ratio::standardize(&normalized))
    }

    /// Natural log of the standardized data.
    pub fn get_log_standardized_data(&self, gene_1: &str, gene_2: &str, units: &str) -> Result<Vec<SeriesPoint>, ModelError> {
        let standardized = self.get_standardized_data(gene_1, gene_2, units)?;
        self.with_context(gene_1, gene_2, units, || ratio::log_transform(&standardized))
    }

    /// Spline fitted to the log-standardized data.
    pub fn get_spline_model(&self, gene_1: &str, gene_2: &str, units: &str) -> Result<SplineModel, ModelError> {
        let series = self.get_log_standardized_data(gene_1, gene_2, units)?;
        self.with_context(gene_1, gene_2, units, || SplineModel::fit(&series))
    }

    /// Runs `stage` and tags any error with this site and the gene pair.
    /// Errors that already carry context are passed through.
    fn with_context<T>(
        &self,
        gene_1: &str,
        gene_2: &str,
        units: &str,
        stage: impl FnOnce() -> Result<T, ModelError>,
    ) -> Result<T, ModelError> {
        stage().map_err(|err| match err {
            ModelError::Series { .. } => err,
            other => ModelError::Series {
                site_id: self.site.site_id.clone(),
                gene_1: gene_1.to_string(),
                gene_2: gene_2.to_string(),
                units: units.to_string(),
                source: Box::new(other),
            },
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
