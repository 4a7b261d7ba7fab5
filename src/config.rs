/// Aggregate run configuration.
///
/// A run is described by a TOML file naming the gene pair, units, date
/// window, weighting policy and the sites with their weights:
///
/// ```toml
/// [model]
/// gene_1 = "covN1"
/// gene_2 = "nPMMoV"
/// units = "gcL"
/// start_date = "2021-01-01"
/// end_date = "2021-03-31"
/// weight_policy = "normalized"
///
/// [[sites]]
/// site_id = "Ottawa-01"
/// weight = 1_100_000.0
///
/// [logging]
/// level = "info"
/// ```

use crate::analysis::groupings::Aggregation;
use crate::dataset::OdmData;
use crate::logging;
use crate::model::{DatedValue, ModelError, Unit};
use crate::modelling::{AggregateModel, WeightPolicy};
use crate::sitedata::SiteData;
use chrono::NaiveDate;
use serde::Deserialize;
use std::collections::{HashMap, HashSet};
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct AggregateConfig {
    pub model: ModelSection,
    pub sites: Vec<SiteWeight>,
    #[serde(default)]
    pub logging: Option<LoggingSection>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ModelSection {
    pub gene_1: String,
    pub gene_2: String,
    #[serde(default = "default_units")]
    pub units: String,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    #[serde(default)]
    pub weight_policy: WeightPolicy,
    #[serde(default = "default_true")]
    pub aggregate_replicates: bool,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SiteWeight {
    pub site_id: String,
    pub weight: f64,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct LoggingSection {
    #[serde(default = "default_level")]
    pub level: String,
    #[serde(default)]
    pub file: Option<String>,
    #[serde(default)]
    pub console_timestamps: bool,
}

fn default_units() -> String {
    Unit::GcL.label().to_string()
}

fn default_true() -> bool {
    true
}

fn default_level() -> String {
    "info".to_string()
}

impl AggregateConfig {
    /// Load and validate a configuration file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ModelError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .map_err(|e| ModelError::Config(format!("cannot read {}: {}", path.display(), e)))?;
        Self::from_toml_str(&contents)
    }

    pub fn from_toml_str(contents: &str) -> Result<Self, ModelError> {
        let config: AggregateConfig =
            toml::from_str(contents).map_err(|e| ModelError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ModelError> {
        self.model
            .units
            .parse::<Unit>()
            .map_err(|e| ModelError::Config(e.to_string()))?;

        if self.model.start_date > self.model.end_date {
            return Err(ModelError::Config(format!(
                "start_date {} is after end_date {}",
                self.model.start_date, self.model.end_date
            )));
        }
        if self.sites.is_empty() {
            return Err(ModelError::Config("at least one site is required".to_string()));
        }

        let mut seen = HashSet::new();
        for site in &self.sites {
            if !seen.insert(site.site_id.as_str()) {
                return Err(ModelError::Config(format!("duplicate site '{}'", site.site_id)));
            }
        }

        if let Some(section) = &self.logging {
            if logging::parse_level(&section.level).is_none() {
                return Err(ModelError::Config(format!("unknown log level '{}'", section.level)));
            }
        }
        Ok(())
    }

    pub fn site_ids(&self) -> Vec<&str> {
        self.sites.iter().map(|s| s.site_id.as_str()).collect()
    }

    pub fn weights(&self) -> HashMap<String, f64> {
        self.sites
            .iter()
            .map(|s| (s.site_id.clone(), s.weight))
            .collect()
    }

    pub fn aggregation(&self) -> Aggregation {
        if self.model.aggregate_replicates {
            Aggregation::Mean
        } else {
            Aggregation::None
        }
    }

    /// Install the global logger from the `[logging]` section, if present.
    pub fn init_logging(&self) -> bool {
        let Some(section) = &self.logging else {
            return false;
        };
        let Some(level) = logging::parse_level(&section.level) else {
            return false;
        };
        logging::init_logger(level, section.file.as_deref(), section.console_timestamps)
    }

    /// Build the site facades and the aggregate model for `data`.
    pub fn build_model(&self, data: &OdmData) -> Result<AggregateModel, ModelError> {
        let sites = self
            .sites
            .iter()
            .map(|s| Ok(SiteData::new(data, &s.site_id)?.with_aggregation(self.aggregation())))
            .collect::<Result<Vec<_>, ModelError>>()?;

        log::info!(
            target: logging::Component::Config.target(),
            "{} sites, {}/{} in {} from {} to {} ({:?} weights)",
            sites.len(),
            self.model.gene_1,
            self.model.gene_2,
            self.model.units,
            self.model.start_date,
            self.model.end_date,
            self.model.weight_policy
        );

        Ok(AggregateModel::new(sites, self.weights()).with_weight_policy(self.model.weight_policy))
    }

    /// Run the configured aggregate over `data`.
    pub fn run(&self, data: &OdmData) -> Result<Vec<DatedValue>, ModelError> {
        let model = self.build_model(data)?;
        model.get_aggregate_model(
            &self.site_ids(),
            &self.model.gene_1,
            &self.model.gene_2,
            self.model.start_date,
            self.model.end_date,
            &self.model.units,
        )
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
