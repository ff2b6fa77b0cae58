//! Ratios between series and a smoothed trend over them.

use std::collections::{BTreeMap, BTreeSet};

use anyhow::Result;
use linfa::Dataset;
use linfa::traits::Fit;
use linfa_elasticnet::ElasticNet;
use ndarray::{Array1, Array2, Axis};

use crate::types::{Bucket, Column, MaterializedSeries, TrendRow, TrendSeries};

fn ratio(numerator: f64, denominator: f64) -> Option<f64> {
    Some(numerator / denominator).filter(|r| denominator != 0.0 && r.is_finite())
}

fn unfitted(ratios: impl IntoIterator<Item = (Bucket, Option<f64>)>) -> TrendSeries {
    TrendSeries {
        rows: ratios
            .into_iter()
            .map(|(bucket, ratio)| TrendRow {
                bucket,
                ratio,
                fitted: None,
            })
            .collect(),
    }
}

/// `numerator[column] / denominator[column]` over the union of both series'
/// buckets. A series is extended past its own range as
/// [`MaterializedSeries::value_at`] describes. A zero denominator gives `None`.
pub fn divide_series(
    numerator: &MaterializedSeries,
    numerator_column: Column,
    denominator: &MaterializedSeries,
    denominator_column: Column,
) -> TrendSeries {
    let buckets: BTreeSet<Bucket> = numerator
        .rows
        .iter()
        .chain(&denominator.rows)
        .map(|row| row.bucket)
        .collect();

    unfitted(buckets.into_iter().map(|bucket| {
        let num = numerator.value_at(&bucket, numerator_column) as f64;
        let den = denominator.value_at(&bucket, denominator_column) as f64;
        (bucket, ratio(num, den))
    }))
}

/// Ratio of two ratio series. A bucket undefined on either side, or present
/// on only one side, is undefined.
pub fn divide_trends(numerator: &TrendSeries, denominator: &TrendSeries) -> TrendSeries {
    let mut joined: BTreeMap<Bucket, (Option<f64>, Option<f64>)> = BTreeMap::new();
    for (bucket, value) in numerator.ratios() {
        joined.entry(bucket).or_default().0 = value;
    }
    for (bucket, value) in denominator.ratios() {
        joined.entry(bucket).or_default().1 = value;
    }

    unfitted(joined.into_iter().map(|(bucket, pair)| {
        let value = match pair {
            (Some(num), Some(den)) => ratio(num, den),
            _ => None,
        };
        (bucket, value)
    }))
}

/// Map each bucket to years elapsed since the earliest one.
pub fn years_since_start(buckets: &[Bucket]) -> Vec<f64> {
    let Some(origin) = buckets.iter().min() else {
        return Vec::new();
    };
    buckets
        .iter()
        .map(|b| b.months_since(origin) as f64 / 12.0)
        .collect()
}

/// A fitted one-dimensional curve.
pub trait FittedCurve {
    fn predict(&self, x: f64) -> f64;
}

/// Anything that can fit a smooth curve through `(x, y)` points.
pub trait CurveFitter {
    fn fit(&self, xs: &[f64], ys: &[f64]) -> Result<Box<dyn FittedCurve>>;
}

/// Polynomial features `x..x^degree` with an L2 penalty `alpha` on their
/// weights, fitted as an elastic net with no L1 part. The intercept is not
/// penalised.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PolynomialRidge {
    pub degree: usize,
    pub alpha: f64,
}

impl Default for PolynomialRidge {
    fn default() -> Self {
        Self {
            degree: 4,
            alpha: 1.0,
        }
    }
}

const RIDGE_TOLERANCE: f64 = 1e-10;
const RIDGE_MAX_ITERATIONS: u32 = 50_000;

#[derive(Debug, Clone, PartialEq)]
pub struct PolynomialCurve {
    pub intercept: f64,
    /// Weight of the scaled feature `x^(i + 1) / scales[i]` at index `i`.
    pub coefficients: Array1<f64>,
    pub scales: Array1<f64>,
}

impl FittedCurve for PolynomialCurve {
    fn predict(&self, x: f64) -> f64 {
        let features = polynomial_features(x, self.coefficients.len()) / &self.scales;
        self.intercept + features.dot(&self.coefficients)
    }
}

fn polynomial_features(x: f64, degree: usize) -> Array1<f64> {
    Array1::from_iter((1..=degree).scan(1.0, |power, _| {
        *power *= x;
        Some(*power)
    }))
}

impl PolynomialRidge {
    pub fn fit_polynomial(&self, xs: &[f64], ys: &[f64]) -> Result<PolynomialCurve> {
        if xs.len() != ys.len() {
            anyhow::bail!("Mismatched input lengths: {} x values, {} y values", xs.len(), ys.len());
        }
        if xs.is_empty() {
            anyhow::bail!("Cannot fit a curve through zero points");
        }

        let mut records = Array2::<f64>::zeros((xs.len(), self.degree));
        for (mut row, &x) in records.rows_mut().into_iter().zip(xs) {
            row.assign(&polynomial_features(x, self.degree));
        }
        let targets = Array1::from_vec(ys.to_vec());

        // Powers of x span orders of magnitude; coordinate descent needs
        // comparable columns. A constant column keeps scale 1.
        let scales = records
            .std_axis(Axis(0), 0.0)
            .mapv(|s| if s > f64::EPSILON { s } else { 1.0 });
        records /= &scales;

        let mean = targets.mean().unwrap_or_default();
        if xs.iter().all(|&x| x == xs[0]) {
            return Ok(PolynomialCurve {
                intercept: mean,
                coefficients: Array1::zeros(self.degree),
                scales,
            });
        }

        let model = ElasticNet::params()
            .penalty(self.alpha)
            .l1_ratio(0.0)
            .with_intercept(true)
            .tolerance(RIDGE_TOLERANCE)
            .max_iterations(RIDGE_MAX_ITERATIONS)
            .fit(&Dataset::new(records, targets))
            .map_err(|e| anyhow::anyhow!("Ridge regression failed: {e}"))?;

        Ok(PolynomialCurve {
            intercept: model.intercept(),
            coefficients: model.hyperplane().clone(),
            scales,
        })
    }
}

impl CurveFitter for PolynomialRidge {
    fn fit(&self, xs: &[f64], ys: &[f64]) -> Result<Box<dyn FittedCurve>> {
        Ok(Box::new(self.fit_polynomial(xs, ys)?))
    }
}

/// Fit `fitter` over the defined ratios of `trend` (time in years since its
/// first bucket) and evaluate it at every bucket, defined or not.
///
/// A trend without any defined ratio is returned unfitted.
pub fn fit_trend(trend: &TrendSeries, fitter: &dyn CurveFitter) -> Result<TrendSeries> {
    let buckets: Vec<Bucket> = trend.rows.iter().map(|r| r.bucket).collect();
    let xs = years_since_start(&buckets);

    let (fit_x, fit_y): (Vec<f64>, Vec<f64>) = trend
        .rows
        .iter()
        .zip(&xs)
        .filter_map(|(row, &x)| row.ratio.filter(|r| r.is_finite()).map(|r| (x, r)))
        .unzip();

    if fit_x.is_empty() {
        return Ok(trend.clone());
    }

    let curve = fitter.fit(&fit_x, &fit_y)?;
    Ok(TrendSeries {
        rows: trend
            .rows
            .iter()
            .zip(&xs)
            .map(|(row, &x)| TrendRow {
                fitted: Some(curve.predict(x)),
                ..*row
            })
            .collect(),
    })
}
