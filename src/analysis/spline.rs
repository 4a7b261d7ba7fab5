/// Least-squares smoothing splines over dated series.
///
/// Dates are mapped to integer day offsets from the first observation and a
/// cubic B-spline with interior knots every `KNOT_STRIDE_DAYS` is fitted by
/// least squares. The fitted model evaluates any date; outside the observed
/// range it continues the first or last polynomial piece (no clamping).
///
/// Every knot interval must be supported by data (the Schoenberg-Whitney
/// condition); a fit across a data gap spanning knots fails instead of
/// inventing values there. The normal equations are solved with `faer`'s
/// self-adjoint eigendecomposition.

use crate::model::{ModelError, SeriesPoint};
use chrono::NaiveDate;
use faer::{Mat, Side};
use ndarray::{Array1, Array2};
use serde::Serialize;

/// Spacing of interior knots, in days.
pub const KNOT_STRIDE_DAYS: i64 = 10;

/// Polynomial degree of the fitted spline.
pub const SPLINE_DEGREE: usize = 3;

/// Eigenvalues below this fraction of the largest are treated as zero.
const RANK_TOLERANCE: f64 = 1e-10;

/// Whole days from `start` to `date` (negative before `start`).
pub fn day_offset(date: NaiveDate, start: NaiveDate) -> i64 {
    (date - start).num_days()
}

/// Interior knots `stride, 2*stride, ...` strictly below `duration`.
/// Empty when `duration <= stride`.
pub fn uniform_knots(duration: i64, stride: i64) -> Vec<f64> {
    if stride <= 0 {
        return Vec::new();
    }
    (1..)
        .map(|i| i * stride)
        .take_while(|&k| k < duration)
        .map(|k| k as f64)
        .collect()
}

// ---------------------------------------------------------------------------
// B-spline representation
// ---------------------------------------------------------------------------

/// A fitted B-spline: full knot vector, coefficients and degree.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LsqSpline {
    knots: Vec<f64>,
    coefficients: Vec<f64>,
    degree: usize,
}

impl LsqSpline {
    /// Fits a least-squares spline of at most `degree` through `(x, y)` with
    /// the given interior knots.
    ///
    /// Points are stably sorted by `x`. The boundary knots are the smallest
    /// and largest `x`, each repeated `degree + 1` times. If there are fewer
    /// distinct `x` than `degree + 1`, the degree is lowered to fit them.
    pub fn fit(x: &[f64], y: &[f64], interior_knots: &[f64], degree: usize) -> Result<Self, ModelError> {
        if x.len() != y.len() {
            return Err(ModelError::FitFailure(format!(
                "x and y lengths differ ({} vs {})",
                x.len(),
                y.len()
            )));
        }
        if let Some(bad) = x.iter().chain(y).find(|v| !v.is_finite()) {
            return Err(ModelError::FitFailure(format!("non-finite input value {}", bad)));
        }

        let mut pairs: Vec<(f64, f64)> = x.iter().copied().zip(y.iter().copied()).collect();
        pairs.sort_by(|a, b| a.0.total_cmp(&b.0));

        let distinct = count_distinct(pairs.iter().map(|p| p.0));
        if distinct < 2 {
            return Err(ModelError::InsufficientData { required: 2, actual: distinct });
        }

        let x_min = pairs[0].0;
        let x_max = pairs[pairs.len() - 1].0;
        validate_interior_knots(interior_knots, x_min, x_max)?;

        let degree = degree.min(distinct - 1);
        let mut knots = Vec::with_capacity(interior_knots.len() + 2 * (degree + 1));
        knots.extend(std::iter::repeat_n(x_min, degree + 1));
        knots.extend_from_slice(interior_knots);
        knots.extend(std::iter::repeat_n(x_max, degree + 1));
        let n_coeffs = knots.len() - degree - 1;
        check_schoenberg_whitney(&pairs, &knots, n_coeffs, degree)?;

        let mut design = Array2::<f64>::zeros((pairs.len(), n_coeffs));
        for (row, &(xi, _)) in pairs.iter().enumerate() {
            let span = find_span(&knots, n_coeffs, degree, xi);
            let basis = basis_funs(&knots, span, degree, xi);
            for (j, b) in basis.into_iter().enumerate() {
                design[[row, span - degree + j]] = b;
            }
        }
        let values = Array1::from_iter(pairs.iter().map(|p| p.1));

        let normal = design.t().dot(&design);
        let rhs = design.t().dot(&values);
        let coefficients = solve_normal_equations(&normal, &rhs)?;

        if let Some(bad) = coefficients.iter().find(|c| !c.is_finite()) {
            return Err(ModelError::FitFailure(format!("non-finite coefficient {}", bad)));
        }

        Ok(Self {
            knots,
            coefficients: coefficients.to_vec(),
            degree,
        })
    }

    /// Evaluates the spline at `x`. Outside the knot range the nearest end
    /// polynomial piece is extended.
    pub fn evaluate(&self, x: f64) -> f64 {
        let n_coeffs = self.coefficients.len();
        let span = find_span(&self.knots, n_coeffs, self.degree, x);
        basis_funs(&self.knots, span, self.degree, x)
            .into_iter()
            .enumerate()
            .map(|(j, b)| self.coefficients[span - self.degree + j] * b)
            .sum()
    }

    pub fn knots(&self) -> &[f64] {
        &self.knots
    }

    /// Knots strictly between the boundary knots.
    pub fn interior_knots(&self) -> &[f64] {
        &self.knots[self.degree + 1..self.knots.len() - self.degree - 1]
    }

    pub fn coefficients(&self) -> &[f64] {
        &self.coefficients
    }

    pub fn degree(&self) -> usize {
        self.degree
    }
}

fn count_distinct(sorted: impl Iterator<Item = f64>) -> usize {
    let mut count = 0;
    let mut last: Option<f64> = None;
    for v in sorted {
        if last != Some(v) {
            count += 1;
            last = Some(v);
        }
    }
    count
}

fn validate_interior_knots(knots: &[f64], x_min: f64, x_max: f64) -> Result<(), ModelError> {
    for (i, &k) in knots.iter().enumerate() {
        if !k.is_finite() || k <= x_min || k >= x_max {
            return Err(ModelError::FitFailure(format!(
                "interior knot {} outside data range ({}, {})",
                k, x_min, x_max
            )));
        }
        if i > 0 && k <= knots[i - 1] {
            return Err(ModelError::FitFailure(format!(
                "interior knots must be strictly increasing ({} after {})",
                k,
                knots[i - 1]
            )));
        }
    }
    Ok(())
}

/// Every coefficient needs its own data point inside the support of its
/// basis function: the first and last points anchor the end coefficients,
/// and each interior coefficient `j` takes the next unused distinct `x` in
/// `(t_j, t_{j+degree+1})`. Data gaps spanning several knot intervals fail
/// here rather than producing an unconstrained curve across the gap.
fn check_schoenberg_whitney(
    sorted: &[(f64, f64)],
    knots: &[f64],
    n_coeffs: usize,
    degree: usize,
) -> Result<(), ModelError> {
    let mut xs: Vec<f64> = sorted.iter().map(|p| p.0).collect();
    xs.dedup();
    if xs.len() < n_coeffs {
        return Err(ModelError::FitFailure(format!(
            "{} distinct points cannot determine {} spline coefficients",
            xs.len(),
            n_coeffs
        )));
    }

    let last = xs.len() - 1;
    let mut i = 0;
    for j in 1..n_coeffs - 1 {
        let (lo, hi) = (knots[j], knots[j + degree + 1]);
        i += 1;
        while i < last && xs[i] <= lo {
            i += 1;
        }
        if i >= last || xs[i] >= hi {
            return Err(ModelError::FitFailure(format!(
                "no data to support the spline between knots {} and {}",
                lo, hi
            )));
        }
    }
    Ok(())
}

/// Index `l` in `[degree, n_coeffs - 1]` of the knot interval `[t_l, t_{l+1})`
/// holding `x`, clamped at both ends so that values outside the knot range
/// use the end pieces.
fn find_span(knots: &[f64], n_coeffs: usize, degree: usize, x: f64) -> usize {
    degree + knots[degree + 1..n_coeffs].partition_point(|&t| t <= x)
}

/// The `degree + 1` basis functions that are non-zero on `span`, evaluated
/// at `x` (Cox-de Boor, triangular form).
fn basis_funs(knots: &[f64], span: usize, degree: usize, x: f64) -> Vec<f64> {
    let mut n = vec![0.0; degree + 1];
    let mut left = vec![0.0; degree + 1];
    let mut right = vec![0.0; degree + 1];
    n[0] = 1.0;
    for j in 1..=degree {
        left[j] = x - knots[span + 1 - j];
        right[j] = knots[span + j] - x;
        let mut saved = 0.0;
        for r in 0..j {
            let temp = n[r] / (right[r + 1] + left[j - r]);
            n[r] = saved + right[r + 1] * temp;
            saved = left[j - r] * temp;
        }
        n[j] = saved;
    }
    n
}

// ---------------------------------------------------------------------------
// Linear algebra
// ---------------------------------------------------------------------------

fn array_to_faer(array: &Array2<f64>) -> Mat<f64> {
    let (rows, cols) = array.dim();
    Mat::from_fn(rows, cols, |i, j| array[[i, j]])
}

/// Solves the normal equations `a * x = b` through a self-adjoint
/// eigendecomposition. A rank-deficient system is rejected.
fn solve_normal_equations(a: &Array2<f64>, b: &Array1<f64>) -> Result<Array1<f64>, ModelError> {
    if a.iter().any(|v| !v.is_finite()) {
        return Err(ModelError::FitFailure("normal matrix contains non-finite entries".to_string()));
    }

    let n = a.nrows();
    let eig = array_to_faer(a)
        .as_ref()
        .self_adjoint_eigen(Side::Lower)
        .map_err(|e| ModelError::FitFailure(format!("eigendecomposition failed: {:?}", e)))?;
    let diag = eig.S();
    let vectors = eig.U();

    let eigenvalues: Vec<f64> = (0..diag.dim()).map(|i| diag[i]).collect();
    let largest = eigenvalues.iter().fold(0.0_f64, |m, &v| m.max(v.abs()));
    let rank = eigenvalues
        .iter()
        .filter(|&&v| v > RANK_TOLERANCE * largest)
        .count();
    if largest == 0.0 || rank < n {
        return Err(ModelError::FitFailure(format!(
            "normal equations are rank deficient (rank {} of {})",
            rank, n
        )));
    }

    let mut x = Array1::<f64>::zeros(n);
    for (i, &lambda) in eigenvalues.iter().enumerate() {
        let v = Array1::from_shape_fn(n, |r| vectors[(r, i)]);
        let weight = v.dot(b) / lambda;
        x.scaled_add(weight, &v);
    }
    Ok(x)
}

// ---------------------------------------------------------------------------
// Dated model
// ---------------------------------------------------------------------------

/// A spline fitted to a dated series, evaluated by date.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SplineModel {
    start_date: NaiveDate,
    end_date: NaiveDate,
    spline: LsqSpline,
}

impl SplineModel {
    /// Fits the series with knots every `KNOT_STRIDE_DAYS` days.
    pub fn fit(series: &[SeriesPoint]) -> Result<Self, ModelError> {
        let (start_date, end_date) = date_bounds(series)?;
        let duration = day_offset(end_date, start_date);
        let knots = uniform_knots(duration, KNOT_STRIDE_DAYS);
        Self::fit_with_knots(series, &knots)
    }

    /// Fits the series with explicit interior knots, given as day offsets
    /// from the first observation.
    pub fn fit_with_knots(series: &[SeriesPoint], interior_knots: &[f64]) -> Result<Self, ModelError> {
        let (start_date, end_date) = date_bounds(series)?;
        let x: Vec<f64> = series
            .iter()
            .map(|p| day_offset(p.sample_date, start_date) as f64)
            .collect();
        let y: Vec<f64> = series.iter().map(|p| p.value).collect();
        let spline = LsqSpline::fit(&x, &y, interior_knots, SPLINE_DEGREE)?;

        log::debug!(
            target: "SPLINE",
            "fitted {} points over {}..{} with {} interior knots (degree {})",
            series.len(),
            start_date,
            end_date,
            spline.interior_knots().len(),
            spline.degree()
        );

        Ok(Self {
            start_date,
            end_date,
            spline,
        })
    }

    /// Value of the model at `date`. Dates outside `[start_date, end_date]`
    /// are extrapolated.
    pub fn evaluate(&self, date: NaiveDate) -> f64 {
        self.spline
            .evaluate(day_offset(date, self.start_date) as f64)
    }

    /// Whether `date` lies within the observed range.
    pub fn covers(&self, date: NaiveDate) -> bool {
        date >= self.start_date && date <= self.end_date
    }

    pub fn start_date(&self) -> NaiveDate {
        self.start_date
    }

    pub fn end_date(&self) -> NaiveDate {
        self.end_date
    }

    pub fn spline(&self) -> &LsqSpline {
        &self.spline
    }
}

fn date_bounds(series: &[SeriesPoint]) -> Result<(NaiveDate, NaiveDate), ModelError> {
    let start = series.iter().map(|p| p.sample_date).min();
    let end = series.iter().map(|p| p.sample_date).max();
    match (start, end) {
        (Some(start), Some(end)) => Ok((start, end)),
        _ => Err(ModelError::InsufficientData { required: 2, actual: 0 }),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn start() -> NaiveDate {
        NaiveDate::from_ymd_opt(2021, 1, 1).unwrap()
    }

    fn series_from(days: &[i64], f: impl Fn(f64) -> f64) -> Vec<SeriesPoint> {
        days.iter()
            .map(|&d| SeriesPoint::new(format!("S{}", d), start() + Duration::days(d), f(d as f64)))
            .collect()
    }

    #[test]
    fn test_uniform_knots_stop_strictly_below_duration() {
        assert_eq!(uniform_knots(35, 10), vec![10.0, 20.0, 30.0]);
        assert_eq!(uniform_knots(30, 10), vec![10.0, 20.0]);
        assert!(uniform_knots(10, 10).is_empty());
        assert!(uniform_knots(4, 10).is_empty());
        assert_eq!(uniform_knots(11, 10), vec![10.0]);
    }

    #[test]
    fn test_day_offset() {
        assert_eq!(day_offset(start() + Duration::days(40), start()), 40);
        assert_eq!(day_offset(start() - Duration::days(3), start()), -3);
    }

    #[test]
    fn test_two_close_dates_fit_without_interior_knots() {
        let series = series_from(&[0, 5], |x| 1.0 + 0.2 * x);
        let model = SplineModel::fit(&series).expect("two distinct dates should fit");
        assert!(model.spline().interior_knots().is_empty());
        assert!((model.evaluate(start()) - 1.0).abs() < 1e-9);
        assert!((model.evaluate(start() + Duration::days(5)) - 2.0).abs() < 1e-9);
        // straight line between and beyond the two points
        assert!((model.evaluate(start() + Duration::days(2)) - 1.4).abs() < 1e-9);
        assert!((model.evaluate(start() + Duration::days(10)) - 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_single_date_is_insufficient() {
        let series = series_from(&[3, 3, 3], |_| 1.0);
        assert_eq!(
            SplineModel::fit(&series),
            Err(ModelError::InsufficientData { required: 2, actual: 1 })
        );
        assert_eq!(
            SplineModel::fit(&[]),
            Err(ModelError::InsufficientData { required: 2, actual: 0 })
        );
    }

    #[test]
    fn test_knots_outside_data_range_fail() {
        let series = series_from(&[0, 7, 14, 21], |x| x.sin());
        assert!(matches!(
            SplineModel::fit_with_knots(&series, &[10.0, 25.0]),
            Err(ModelError::FitFailure(_))
        ));
        assert!(matches!(
            SplineModel::fit_with_knots(&series, &[0.0]),
            Err(ModelError::FitFailure(_))
        ));
        assert!(matches!(
            SplineModel::fit_with_knots(&series, &[15.0, 10.0]),
            Err(ModelError::FitFailure(_))
        ));
    }

    #[test]
    fn test_non_finite_values_fail() {
        let series = series_from(&[0, 7, 14], |x| if x > 10.0 { f64::NAN } else { x });
        assert!(matches!(SplineModel::fit(&series), Err(ModelError::FitFailure(_))));
    }

    #[test]
    fn test_cubic_data_is_reproduced_and_extrapolated() {
        // A cubic lies in the spline space, so the least-squares fit is exact
        // and extrapolation continues the same polynomial.
        let f = |x: f64| 0.001 * x.powi(3) - 0.05 * x * x + 0.3 * x + 2.0;
        let days: Vec<i64> = (0..=40).step_by(2).collect();
        let model = SplineModel::fit(&series_from(&days, f)).unwrap();
        assert_eq!(model.spline().interior_knots(), &[10.0, 20.0, 30.0]);
        for d in [-5_i64, 0, 13, 27, 40, 46] {
            let got = model.evaluate(start() + Duration::days(d));
            assert!(
                (got - f(d as f64)).abs() < 1e-6,
                "day {}: expected {}, got {}",
                d,
                f(d as f64),
                got
            );
        }
    }

    #[test]
    fn test_noisy_smooth_signal_is_tracked_closely() {
        let signal = |x: f64| (2.0 * std::f64::consts::PI * x / 90.0).sin();
        // deterministic "noise" well above the signal frequency
        let noise = |x: f64| 0.01 * (7.3 * x).sin();
        let days: Vec<i64> = (0..120).collect();
        let model = SplineModel::fit(&series_from(&days, |x| signal(x) + noise(x))).unwrap();

        for &d in &days {
            let residual = model.evaluate(start() + Duration::days(d)) - signal(d as f64);
            assert!(residual.abs() < 0.03, "day {}: residual {}", d, residual);
        }
    }

    #[test]
    fn test_fit_is_continuous_across_knots() {
        let days: Vec<i64> = (0..60).step_by(3).collect();
        let series = series_from(&days, |x| (x / 9.0).cos() + 0.1 * (x / 2.0).sin());
        let model = SplineModel::fit(&series).unwrap();
        for &k in model.spline().interior_knots() {
            let below = model.spline().evaluate(k - 1e-7);
            let above = model.spline().evaluate(k + 1e-7);
            assert!((below - above).abs() < 1e-5, "jump at knot {}", k);
        }
    }

    #[test]
    fn test_unsorted_and_duplicate_dates() {
        // Replicates on the same day pull the fit to their mean.
        let mut series = series_from(&[20, 0, 25, 10, 5, 30, 15], |x| x / 10.0);
        series.push(SeriesPoint::new("R1", start() + Duration::days(10), 0.5));
        series.push(SeriesPoint::new("R2", start() + Duration::days(10), 1.5));
        let model = SplineModel::fit(&series).unwrap();
        assert_eq!(model.start_date(), start());
        assert_eq!(model.end_date(), start() + Duration::days(30));
        assert!((model.evaluate(start() + Duration::days(10)) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_too_few_points_for_knots_fail() {
        // six points cannot determine nine coefficients
        let series = series_from(&[0, 2, 4, 50, 52, 54], |x| 1.0 + x / 100.0);
        match SplineModel::fit(&series) {
            Err(ModelError::FitFailure(msg)) => assert!(msg.contains("6 distinct points"), "got '{}'", msg),
            other => panic!("expected fit failure, got {:?}", other),
        }
    }

    #[test]
    fn test_data_gap_across_knots_fails() {
        let days: Vec<i64> = (0..=10).chain(50..=60).collect();
        let series = series_from(&days, |x| 1.0 + x / 100.0);
        match SplineModel::fit(&series) {
            Err(ModelError::FitFailure(msg)) => {
                assert!(msg.contains("between knots 10 and 50"), "got '{}'", msg)
            }
            other => panic!("expected fit failure, got {:?}", other),
        }
    }

    #[test]
    fn test_schoenberg_whitney_boundary_cases_fit() {
        // three points in a short window lower the degree to a parabola
        let model = SplineModel::fit(&series_from(&[0, 3, 9], |x| 0.1 * x * x)).unwrap();
        assert_eq!(model.spline().degree(), 2);
        assert!((model.evaluate(start() + Duration::days(6)) - 3.6).abs() < 1e-9);

        // one point inside each knot support is enough
        let model = SplineModel::fit(&series_from(&[0, 5, 9, 12, 16, 21], |x| x)).unwrap();
        assert_eq!(model.spline().interior_knots(), &[10.0, 20.0]);
        assert!((model.evaluate(start() + Duration::days(14)) - 14.0).abs() < 1e-6);
    }

    #[test]
    fn test_covers() {
        let model = SplineModel::fit(&series_from(&[0, 4, 8], |x| x)).unwrap();
        assert!(model.covers(start()));
        assert!(model.covers(start() + Duration::days(8)));
        assert!(!model.covers(start() - Duration::days(1)));
        assert!(!model.covers(start() + Duration::days(9)));
    }
}
