/// In-memory PHES-ODM dataset.
///
/// Holds the four tables the models consume, as handed over by whatever
/// loader read them (spreadsheet, directory of delimited files, database).
/// This is the single source of truth for site and sample identity; the
/// per-site facade copies what it needs out of it and never writes back.

use crate::model::{ModelError, SampleRow, SiteMeasureRow, SiteRow, WwMeasureRow};
use chrono::NaiveDate;
use std::collections::{HashMap, HashSet};

/// Date format used for date arguments and configuration values.
pub const DATE_FORMAT: &str = "%Y-%m-%d";

/// Parses a `YYYY-MM-DD` date.
pub fn parse_date(date: &str) -> Result<NaiveDate, ModelError> {
    NaiveDate::parse_from_str(date.trim(), DATE_FORMAT)
        .map_err(|_| ModelError::InvalidDate(date.to_string()))
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct OdmData {
    site: Vec<SiteRow>,
    sample: Vec<SampleRow>,
    ww_measure: Vec<WwMeasureRow>,
    site_measure: Vec<SiteMeasureRow>,
}

impl OdmData {
    pub fn new(
        site: Vec<SiteRow>,
        sample: Vec<SampleRow>,
        ww_measure: Vec<WwMeasureRow>,
        site_measure: Vec<SiteMeasureRow>,
    ) -> Self {
        Self {
            site,
            sample,
            ww_measure,
            site_measure,
        }
    }

    pub fn site(&self) -> &[SiteRow] {
        &self.site
    }

    pub fn sample(&self) -> &[SampleRow] {
        &self.sample
    }

    pub fn ww_measure(&self) -> &[WwMeasureRow] {
        &self.ww_measure
    }

    pub fn site_measure(&self) -> &[SiteMeasureRow] {
        &self.site_measure
    }

    /// Looks up a site row by id. Returns `None` if not found.
    pub fn find_site(&self, site_id: &str) -> Option<&SiteRow> {
        self.site.iter().find(|s| s.site_id == site_id)
    }

    /// All site ids, in table order.
    pub fn site_ids(&self) -> Vec<&str> {
        self.site.iter().map(|s| s.site_id.as_str()).collect()
    }

    /// The canonical sample date of every sample, keyed by sample id.
    ///
    /// If a sample id is repeated, the first row wins.
    pub fn sample_dates(&self) -> HashMap<&str, NaiveDate> {
        let mut dates = HashMap::with_capacity(self.sample.len());
        for sample in &self.sample {
            dates
                .entry(sample.sample_id.as_str())
                .or_insert_with(|| sample.sample_date());
        }
        dates
    }

    /// Returns a new dataset restricted to samples whose sample date falls
    /// within `[start_date, end_date]`. Either bound may be omitted.
    ///
    /// Wastewater and site measures are kept only if their sample survives;
    /// site measures without a sample id are dropped once any bound is set,
    /// since they cannot be dated. Sites are copied unchanged.
    pub fn filter_dates(&self, start_date: Option<NaiveDate>, end_date: Option<NaiveDate>) -> OdmData {
        if start_date.is_none() && end_date.is_none() {
            return self.clone();
        }

        let in_range = |date: NaiveDate| {
            start_date.is_none_or(|start| date >= start) && end_date.is_none_or(|end| date <= end)
        };

        let sample: Vec<SampleRow> = self
            .sample
            .iter()
            .filter(|s| in_range(s.sample_date()))
            .cloned()
            .collect();
        let kept: HashSet<&str> = sample.iter().map(|s| s.sample_id.as_str()).collect();

        let ww_measure = self
            .ww_measure
            .iter()
            .filter(|m| kept.contains(m.sample_id.as_str()))
            .cloned()
            .collect();
        let site_measure = self
            .site_measure
            .iter()
            .filter(|m| m.sample_id.as_deref().is_some_and(|id| kept.contains(id)))
            .cloned()
            .collect();

        log::debug!(
            target: "DATA",
            "filter_dates {:?}..{:?}: kept {}/{} samples",
            start_date,
            end_date,
            sample.len(),
            self.sample.len()
        );

        OdmData {
            site: self.site.clone(),
            sample,
            ww_measure,
            site_measure,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDateTime;

    fn date(s: &str) -> NaiveDate {
        parse_date(s).expect("test date should parse")
    }

    fn sample(id: &str, start: &str, end: Option<&str>) -> SampleRow {
        let parse = |s: &str| {
            NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M").expect("test timestamp should parse")
        };
        SampleRow {
            sample_id: id.to_string(),
            site_id: "A".to_string(),
            date_time: parse(start),
            date_time_end: end.map(parse),
        }
    }

    fn measure(sample_id: &str, value: f64) -> WwMeasureRow {
        WwMeasureRow {
            sample_id: sample_id.to_string(),
            analyte: "covN1".to_string(),
            unit: "gcL".to_string(),
            value: Some(value),
            quality_flag: None,
        }
    }

    fn fixture() -> OdmData {
        OdmData::new(
            vec![SiteRow {
                site_id: "A".to_string(),
                name: "Plant A".to_string(),
                description: None,
                site_type: None,
                health_region: None,
                public_health_department: None,
                latitude: None,
                longitude: None,
            }],
            vec![
                sample("S1", "2021-01-01 08:00", None),
                // Composite ending on the 5th counts as the 5th.
                sample("S2", "2021-01-04 08:00", Some("2021-01-05 08:00")),
                sample("S3", "2021-01-10 08:00", None),
            ],
            vec![measure("S1", 10.0), measure("S2", 20.0), measure("S3", 30.0)],
            vec![
                SiteMeasureRow {
                    site_id: "A".to_string(),
                    sample_id: Some("S2".to_string()),
                    measure_type: "envTemp".to_string(),
                    unit: Some("degC".to_string()),
                    value: Some(4.0),
                },
                SiteMeasureRow {
                    site_id: "A".to_string(),
                    sample_id: None,
                    measure_type: "envRnF".to_string(),
                    unit: Some("mm".to_string()),
                    value: Some(12.0),
                },
            ],
        )
    }

    #[test]
    fn test_parse_date_rejects_other_formats() {
        assert_eq!(date("2021-02-03"), NaiveDate::from_ymd_opt(2021, 2, 3).unwrap());
        assert_eq!(
            parse_date("03/02/2021"),
            Err(ModelError::InvalidDate("03/02/2021".to_string()))
        );
    }

    #[test]
    fn test_filter_dates_is_inclusive_and_uses_composite_end() {
        let data = fixture();
        let filtered = data.filter_dates(Some(date("2021-01-05")), Some(date("2021-01-10")));

        let ids: Vec<_> = filtered.sample().iter().map(|s| s.sample_id.as_str()).collect();
        assert_eq!(ids, vec!["S2", "S3"]);
        let measured: Vec<_> = filtered.ww_measure().iter().map(|m| m.sample_id.as_str()).collect();
        assert_eq!(measured, vec!["S2", "S3"]);
        assert_eq!(filtered.site_measure().len(), 1, "undated site measure should be dropped");
    }

    #[test]
    fn test_filter_dates_does_not_touch_source() {
        let data = fixture();
        let _ = data.filter_dates(Some(date("2021-01-06")), None);
        assert_eq!(data.sample().len(), 3);
        assert_eq!(data.ww_measure().len(), 3);
        assert_eq!(data.site_measure().len(), 2);
    }

    #[test]
    fn test_filter_dates_without_bounds_is_a_copy() {
        let data = fixture();
        assert_eq!(data.filter_dates(None, None), data);
    }

    #[test]
    fn test_sample_dates_first_row_wins() {
        let mut data = fixture();
        data.sample.push(sample("S1", "2022-06-01 08:00", None));
        assert_eq!(data.sample_dates()["S1"], date("2021-01-01"));
    }

    #[test]
    fn test_find_site() {
        let data = fixture();
        assert_eq!(data.find_site("A").map(|s| s.name.as_str()), Some("Plant A"));
        assert!(data.find_site("B").is_none());
        assert_eq!(data.site_ids(), vec!["A"]);
    }
}
