/// Weighted aggregate models across several sampling sites.
///
/// Each site's spline is evaluated on a shared daily date grid. Dates outside
/// the range a site's spline was fitted on are masked as missing rather than
/// extrapolated, and the remaining site values are combined per date with
/// the site weights (often the population served).

use crate::logging;
use crate::model::{DatedValue, ModelError};
use crate::sitedata::SiteData;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// How site weights combine site values at a date.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WeightPolicy {
    /// Weighted mean over the sites present at the date: weights are
    /// renormalized to sum to one over those sites.
    #[default]
    Normalized,
    /// Plain weighted sum over the sites present at the date.
    Raw,
}

/// Combines `(weight, value)` pairs for one date. Missing values contribute
/// to neither the sum nor the total weight; if every value is missing (or
/// the present weights sum to zero under `Normalized`) the result is missing.
pub fn combine_weighted(values: &[(f64, Option<f64>)], policy: WeightPolicy) -> Option<f64> {
    let present: Vec<(f64, f64)> = values
        .iter()
        .filter_map(|&(w, v)| v.map(|v| (w, v)))
        .collect();
    if present.is_empty() {
        return None;
    }
    let weighted_sum: f64 = present.iter().map(|(w, v)| w * v).sum();
    match policy {
        WeightPolicy::Raw => Some(weighted_sum),
        WeightPolicy::Normalized => {
            let total: f64 = present.iter().map(|(w, _)| w).sum();
            if total == 0.0 { None } else { Some(weighted_sum / total) }
        }
    }
}

/// Masked spline values of several sites on one date grid, one column per
/// site in request order.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MultiSiteSplines {
    pub dates: Vec<NaiveDate>,
    pub sites: Vec<String>,
    pub values: Vec<Vec<Option<f64>>>,
}

impl MultiSiteSplines {
    /// The column for `site_id`, if it was requested.
    pub fn column(&self, site_id: &str) -> Option<&[Option<f64>]> {
        let i = self.sites.iter().position(|s| s == site_id)?;
        Some(&self.values[i])
    }
}

pub struct AggregateModel {
    sites: HashMap<String, SiteData>,
    weights: HashMap<String, f64>,
    policy: WeightPolicy,
}

impl AggregateModel {
    /// `weights` maps site ids to their weighting factors.
    pub fn new(sites: impl IntoIterator<Item = SiteData>, weights: HashMap<String, f64>) -> Self {
        Self {
            sites: sites
                .into_iter()
                .map(|s| (s.site_id().to_string(), s))
                .collect(),
            weights,
            policy: WeightPolicy::default(),
        }
    }

    pub fn with_weight_policy(mut self, policy: WeightPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn weight_policy(&self) -> WeightPolicy {
        self.policy
    }

    /// Every day from `start_date` to `end_date`, both included. Empty if
    /// `end_date` is before `start_date`.
    pub fn get_date_list(start_date: NaiveDate, end_date: NaiveDate) -> Vec<NaiveDate> {
        start_date
            .iter_days()
            .take_while(|d| *d <= end_date)
            .collect()
    }

    /// One site's spline on the daily grid, with dates outside the fitted
    /// range set to `None`.
    ///
    /// The mask uses the first and last dates of the series the spline was
    /// fitted on (`SplineModel::covers`), not `SiteData::date_range`. A sample
    /// with only one of the two genes never reaches the ratio series, so the
    /// fitted range can be narrower than the site's sampling range; masking
    /// on the wider range would return extrapolated values.
    pub fn get_site_spline(
        &self,
        site_id: &str,
        gene_1: &str,
        gene_2: &str,
        start_date: NaiveDate,
        end_date: NaiveDate,
        units: &str,
    ) -> Result<Vec<DatedValue>, ModelError> {
        let site = self
            .sites
            .get(site_id)
            .ok_or_else(|| ModelError::UnknownSite(site_id.to_string()))?;
        let model = site.get_spline_model(gene_1, gene_2, units)?;

        Ok(Self::get_date_list(start_date, end_date)
            .into_iter()
            .map(|date| DatedValue {
                sample_date: date,
                value: model.covers(date).then(|| model.evaluate(date)),
            })
            .collect())
    }

    /// Masked splines for several sites on the same grid. Any site failing
    /// to fit fails the whole call.
    pub fn get_multisite_splines(
        &self,
        sites: &[&str],
        gene_1: &str,
        gene_2: &str,
        start_date: NaiveDate,
        end_date: NaiveDate,
        units: &str,
    ) -> Result<MultiSiteSplines, ModelError> {
        let dates = Self::get_date_list(start_date, end_date);
        let mut values = Vec::with_capacity(sites.len());
        for site_id in sites {
            let spline = self
                .get_site_spline(site_id, gene_1, gene_2, start_date, end_date, units)
                .inspect_err(|err| logging::log_series_failure(site_id, "spline fit", err))?;
            values.push(spline.into_iter().map(|v| v.value).collect());
        }
        Ok(MultiSiteSplines {
            dates,
            sites: sites.iter().map(|s| s.to_string()).collect(),
            values,
        })
    }

    /// Weighted aggregate of the site splines over `[start_date, end_date]`.
    ///
    /// The output covers every grid date; a date is `None` only when no site
    /// has data there.
    pub fn get_aggregate_model(
        &self,
        sites: &[&str],
        gene_1: &str,
        gene_2: &str,
        start_date: NaiveDate,
        end_date: NaiveDate,
        units: &str,
    ) -> Result<Vec<DatedValue>, ModelError> {
        let weights = self.site_weights(sites)?;
        let splines = self.get_multisite_splines(sites, gene_1, gene_2, start_date, end_date, units)?;

        let aggregate: Vec<DatedValue> = splines
            .dates
            .iter()
            .enumerate()
            .map(|(i, &date)| {
                let at_date: Vec<(f64, Option<f64>)> = weights
                    .iter()
                    .zip(&splines.values)
                    .map(|(&w, column)| (w, column[i]))
                    .collect();
                DatedValue {
                    sample_date: date,
                    value: combine_weighted(&at_date, self.policy),
                }
            })
            .collect();

        let empty = aggregate.iter().filter(|v| v.value.is_none()).count();
        logging::log_aggregate_summary(sites.len(), aggregate.len(), empty);
        Ok(aggregate)
    }

    fn site_weights(&self, sites: &[&str]) -> Result<Vec<f64>, ModelError> {
        sites
            .iter()
            .map(|&site_id| {
                let weight = *self
                    .weights
                    .get(site_id)
                    .ok_or_else(|| ModelError::MissingWeight(site_id.to_string()))?;
                if !weight.is_finite() || weight < 0.0 {
                    return Err(ModelError::InvalidWeight {
                        site_id: site_id.to_string(),
                        weight,
                    });
                }
                Ok(weight)
            })
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_date_list_is_inclusive() {
        let dates = AggregateModel::get_date_list(date(2021, 1, 30), date(2021, 2, 2));
        assert_eq!(
            dates,
            vec![date(2021, 1, 30), date(2021, 1, 31), date(2021, 2, 1), date(2021, 2, 2)]
        );
        assert_eq!(AggregateModel::get_date_list(date(2021, 1, 1), date(2021, 1, 1)).len(), 1);
        assert!(AggregateModel::get_date_list(date(2021, 1, 2), date(2021, 1, 1)).is_empty());
    }

    #[test]
    fn test_combine_weighted_mean() {
        let value = combine_weighted(&[(2.0, Some(3.0)), (1.0, Some(6.0))], WeightPolicy::Normalized);
        assert_eq!(value, Some(4.0));
    }

    #[test]
    fn test_combine_weighted_renormalizes_over_present_sites() {
        let value = combine_weighted(&[(1.0, None), (1.0, Some(6.0))], WeightPolicy::Normalized);
        assert_eq!(value, Some(6.0));
        let value = combine_weighted(&[(5.0, None), (2.0, Some(1.5)), (2.0, Some(2.5))], WeightPolicy::Normalized);
        assert_eq!(value, Some(2.0));
    }

    #[test]
    fn test_combine_weighted_raw_sum() {
        let value = combine_weighted(&[(2.0, Some(3.0)), (1.0, Some(6.0)), (4.0, None)], WeightPolicy::Raw);
        assert_eq!(value, Some(12.0));
    }

    #[test]
    fn test_combine_weighted_all_missing() {
        assert_eq!(combine_weighted(&[(1.0, None), (2.0, None)], WeightPolicy::Normalized), None);
        assert_eq!(combine_weighted(&[(1.0, None)], WeightPolicy::Raw), None);
        assert_eq!(combine_weighted(&[], WeightPolicy::Normalized), None);
        // zero total weight has no mean
        assert_eq!(combine_weighted(&[(0.0, Some(1.0))], WeightPolicy::Normalized), None);
    }

    #[test]
    fn test_weight_policy_parses_from_lowercase() {
        #[derive(Deserialize)]
        struct Holder {
            policy: WeightPolicy,
        }
        let holder: Holder = toml::from_str("policy = \"raw\"").unwrap();
        assert_eq!(holder.policy, WeightPolicy::Raw);
        let holder: Holder = toml::from_str("policy = \"normalized\"").unwrap();
        assert_eq!(holder.policy, WeightPolicy::Normalized);
    }
}
