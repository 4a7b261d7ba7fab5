/// Series transforms for the surveillance models.
///
/// Each stage takes a flat series and returns a new one; nothing here holds
/// site state. `sitedata` chains them into the per-site pipeline.
///
/// Submodules:
/// - `units`: unit conversion and detection-limit flooring.
/// - `groupings`: collapses replicate measurements into one value per sample.
/// - `ratio`: gene ratios, standardization and the log transform.
/// - `spline`: least-squares cubic B-spline fit over sample dates.

pub mod groupings;
pub mod ratio;
pub mod spline;
pub mod units;
