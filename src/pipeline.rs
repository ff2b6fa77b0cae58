//! Named series: which files feed them, how they are aggregated and how
//! they derive from one another.
//!
//! Every series goes through the cache gate under its own name. Count
//! series are scanned from the data directory; ratio series are computed
//! from other (untruncated) series and only truncated, and fitted, on the
//! way out.

use std::fmt;

use anyhow::{Context, Result};
use serde::Serialize;

use crate::accumulator::{AggregationPolicy, EntityKind, ReviewAccumulator};
use crate::cache::{self, CacheRepository};
use crate::config::{Config, SegmentConfig};
use crate::debug_log;
use crate::materialize::{materialize, materialize_launches};
use crate::record::ProductRecord;
use crate::scan::{FileFamily, ScanDriver, ScanSummary};
use crate::trend::{self, PolynomialRidge};
use crate::types::{
    Column, MaterializedSeries, ReportingWindow, SeriesRow, TrendRow, TrendSeries,
};
use crate::utils::warn_once;

pub const REVIEWS_GROWTH: &str = "reviews-growth";
pub const USER_COUNT: &str = "user-count";
pub const PRODUCT_COUNT: &str = "product-count";
pub const PRODUCT_LAUNCH: &str = "product-launch";
pub const REVIEWS_PER_PRODUCT: &str = "reviews-per-product";

pub const LAUNCH_SUFFIX: &str = "-launch";
pub const VERSUS: &str = "-vs-";

/// A logical series the pipeline knows how to produce.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SeriesName {
    ReviewsGrowth,
    UserCount,
    ProductCount,
    ProductLaunch,
    /// Launches of the products in one configured segment.
    SegmentLaunch(String),
    ReviewsPerProduct,
    /// Launch share of one segment relative to another, with a fitted trend.
    Comparison {
        numerator: String,
        denominator: String,
    },
}

impl SeriesName {
    /// Resolve a series name, checking segment references against `config`.
    pub fn resolve(name: &str, config: &Config) -> Result<Self> {
        let series = match name {
            REVIEWS_GROWTH => Self::ReviewsGrowth,
            USER_COUNT => Self::UserCount,
            PRODUCT_COUNT => Self::ProductCount,
            PRODUCT_LAUNCH => Self::ProductLaunch,
            REVIEWS_PER_PRODUCT => Self::ReviewsPerProduct,
            _ => {
                if let Some((numerator, denominator)) = name.split_once(VERSUS) {
                    Self::Comparison {
                        numerator: numerator.to_string(),
                        denominator: denominator.to_string(),
                    }
                } else if let Some(segment) = name.strip_suffix(LAUNCH_SUFFIX) {
                    Self::SegmentLaunch(segment.to_string())
                } else {
                    anyhow::bail!("Unknown series: {name}");
                }
            }
        };

        for segment in series.segments() {
            if config.segment(segment).is_none() {
                anyhow::bail!("Unknown segment '{segment}' in series {name}");
            }
        }
        Ok(series)
    }

    fn segments(&self) -> Vec<&str> {
        match self {
            Self::SegmentLaunch(segment) => vec![segment],
            Self::Comparison {
                numerator,
                denominator,
            } => vec![numerator, denominator],
            _ => Vec::new(),
        }
    }

    pub fn is_trend(&self) -> bool {
        matches!(self, Self::ReviewsPerProduct | Self::Comparison { .. })
    }
}

impl fmt::Display for SeriesName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ReviewsGrowth => f.write_str(REVIEWS_GROWTH),
            Self::UserCount => f.write_str(USER_COUNT),
            Self::ProductCount => f.write_str(PRODUCT_COUNT),
            Self::ProductLaunch => f.write_str(PRODUCT_LAUNCH),
            Self::SegmentLaunch(segment) => write!(f, "{segment}{LAUNCH_SUFFIX}"),
            Self::ReviewsPerProduct => f.write_str(REVIEWS_PER_PRODUCT),
            Self::Comparison {
                numerator,
                denominator,
            } => write!(f, "{numerator}{VERSUS}{denominator}"),
        }
    }
}

/// Rows of one series, as exposed to callers.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", content = "rows", rename_all = "snake_case")]
pub enum SeriesData {
    Counts(Vec<SeriesRow>),
    Trend(Vec<TrendRow>),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NamedSeries {
    pub name: String,
    #[serde(flatten)]
    pub data: SeriesData,
}

/// Every series of one run, truncated to `window`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Report {
    pub window: ReportingWindow,
    pub series: Vec<NamedSeries>,
}

pub struct Pipeline {
    config: Config,
    window: ReportingWindow,
    fitter: PolynomialRidge,
    driver: ScanDriver,
    reviews: FileFamily,
    meta: FileFamily,
    repo: Box<dyn CacheRepository>,
}

impl Pipeline {
    pub fn new(config: Config, repo: Box<dyn CacheRepository>) -> Result<Self> {
        config.validate()?;
        let window = config.reporting_window()?;
        let reviews = FileFamily::new(&config.data.reviews_pattern)?;
        let meta = FileFamily::new(&config.data.meta_pattern)?;
        Ok(Self {
            window,
            fitter: config.curve_fitter(),
            driver: ScanDriver::new(&config.data.dir),
            reviews,
            meta,
            repo,
            config,
        })
    }

    pub fn with_progress(mut self, show_progress: bool) -> Self {
        self.driver = self.driver.with_progress(show_progress);
        self
    }

    pub fn driver(&self) -> &ScanDriver {
        &self.driver
    }

    pub fn comparison_name(&self) -> SeriesName {
        SeriesName::Comparison {
            numerator: self.config.comparison.numerator.clone(),
            denominator: self.config.comparison.denominator.clone(),
        }
    }

    /// A count series truncated to the reporting window.
    pub fn counts(&self, name: &SeriesName) -> Result<MaterializedSeries> {
        cache::load_or_compute(self.repo.as_ref(), &name.to_string(), &self.window, || {
            self.compute_counts(name)
        })
    }

    /// A ratio series truncated to the reporting window. Comparisons are
    /// fitted over the truncated ratios.
    pub fn trend(&self, name: &SeriesName) -> Result<TrendSeries> {
        let truncated: TrendSeries =
            cache::load_or_compute(self.repo.as_ref(), &name.to_string(), &self.window, || {
                self.compute_trend(name)
            })?;
        match name {
            SeriesName::Comparison { .. } => trend::fit_trend(&truncated, &self.fitter)
                .with_context(|| format!("Failed to fit trend for {name}")),
            _ => Ok(truncated),
        }
    }

    pub fn series(&self, name: &SeriesName) -> Result<NamedSeries> {
        let data = if name.is_trend() {
            SeriesData::Trend(self.trend(name)?.rows)
        } else {
            SeriesData::Counts(self.counts(name)?.rows)
        };
        Ok(NamedSeries {
            name: name.to_string(),
            data,
        })
    }

    /// Every series in dependency order.
    pub fn series_names(&self) -> Vec<SeriesName> {
        let mut names = vec![
            SeriesName::ReviewsGrowth,
            SeriesName::UserCount,
            SeriesName::ProductCount,
            SeriesName::ProductLaunch,
        ];
        names.extend(
            self.config
                .segments
                .iter()
                .map(|s| SeriesName::SegmentLaunch(s.name.clone())),
        );
        names.push(SeriesName::ReviewsPerProduct);
        names.push(self.comparison_name());
        names
    }

    pub fn run_all(&self) -> Result<Report> {
        let series = self
            .series_names()
            .iter()
            .map(|name| self.series(name))
            .collect::<Result<Vec<_>>>()?;
        Ok(Report {
            window: self.window,
            series,
        })
    }

    /// An untruncated count series, as persisted.
    fn counts_full(&self, name: &SeriesName) -> Result<MaterializedSeries> {
        cache::fetch_or_compute(self.repo.as_ref(), &name.to_string(), || {
            self.compute_counts(name)
        })
    }

    fn compute_counts(&self, name: &SeriesName) -> Result<MaterializedSeries> {
        let series = match name {
            SeriesName::ReviewsGrowth => self.scan_policy(AggregationPolicy::ReviewCount),
            SeriesName::UserCount => {
                self.scan_policy(AggregationPolicy::NewActiveEntity(EntityKind::Reviewer))
            }
            SeriesName::ProductCount => {
                self.scan_policy(AggregationPolicy::NewActiveEntity(EntityKind::Product))
            }
            SeriesName::ProductLaunch => self.scan_launches(&self.meta, &self.reviews, |_| true),
            SeriesName::SegmentLaunch(segment) => {
                let segment = self.segment(segment)?;
                self.scan_launches(
                    &FileFamily::dataset("meta", &segment.dataset)?,
                    &FileFamily::dataset("reviews", &segment.dataset)?,
                    |product| segment.filter.matches(product),
                )
            }
            SeriesName::ReviewsPerProduct | SeriesName::Comparison { .. } => {
                anyhow::bail!("{name} is a ratio series, not a count series")
            }
        }
        .with_context(|| format!("Failed to compute {name}"))?;

        if series.is_empty() {
            warn_once(format!(
                "⚠️  {name}: no matching records in {}",
                self.driver.data_dir().display()
            ));
        }
        debug_log::log(
            "PIPELINE",
            "COMPUTED",
            &format!("{name} ({} rows)", series.len()),
        );
        Ok(series)
    }

    fn compute_trend(&self, name: &SeriesName) -> Result<TrendSeries> {
        match name {
            SeriesName::ReviewsPerProduct => {
                let reviews = self.counts_full(&SeriesName::ReviewsGrowth)?;
                let products = self.counts_full(&SeriesName::ProductCount)?;
                Ok(trend::divide_series(
                    &reviews,
                    Column::New,
                    &products,
                    Column::Active,
                ))
            }
            SeriesName::Comparison {
                numerator,
                denominator,
            } => {
                let all = self.counts_full(&SeriesName::ProductLaunch)?;
                let share = |segment: &str| -> Result<TrendSeries> {
                    let launches =
                        self.counts_full(&SeriesName::SegmentLaunch(segment.to_string()))?;
                    Ok(trend::divide_series(
                        &launches,
                        Column::Total,
                        &all,
                        Column::Total,
                    ))
                };
                Ok(trend::divide_trends(
                    &share(numerator)?,
                    &share(denominator)?,
                ))
            }
            _ => anyhow::bail!("{name} is a count series, not a ratio series"),
        }
    }

    fn segment(&self, name: &str) -> Result<&SegmentConfig> {
        self.config
            .segment(name)
            .with_context(|| format!("Unknown segment: {name}"))
    }

    fn scan_policy(&self, policy: AggregationPolicy) -> Result<MaterializedSeries> {
        let mut accumulator = policy.accumulator();
        let summary = self.driver.scan_reviews(&self.reviews, &mut accumulator)?;
        log_summary(&summary);
        if let ReviewAccumulator::Entity(entities) = &accumulator {
            debug_log::log(
                "PIPELINE",
                "ENTITIES",
                &format!("{} distinct {:?}", entities.entity_count(), entities.kind()),
            );
        }
        Ok(materialize(&accumulator))
    }

    fn scan_launches<P>(
        &self,
        meta: &FileFamily,
        reviews: &FileFamily,
        keep: P,
    ) -> Result<MaterializedSeries>
    where
        P: Fn(&ProductRecord) -> bool,
    {
        let (launches, summary) = self.driver.scan_launch_dates(meta, reviews, keep)?;
        log_summary(&summary);
        debug_log::log(
            "PIPELINE",
            "LAUNCHES",
            &format!(
                "{} known products, {} never reviewed",
                launches.known_products(),
                launches.unlaunched_products()
            ),
        );
        Ok(materialize_launches(&launches))
    }
}

fn log_summary(summary: &ScanSummary) {
    debug_log::log(
        "PIPELINE",
        "SCANNED",
        &format!(
            "{} files, {} rows, {} skipped",
            summary.files.len(),
            summary.total_rows(),
            summary.total_skipped()
        ),
    );
}

#[cfg(test)]
mod tests;
