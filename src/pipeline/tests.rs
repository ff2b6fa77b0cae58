use std::fs::File;
use std::io::Write;
use std::path::Path;

use flate2::Compression;
use flate2::write::GzEncoder;
use tempfile::TempDir;

use super::*;
use crate::cache::{FileCacheRepository, MemoryCacheRepository};
use crate::types::Bucket;

// ==========================================================================
// TEST HELPERS
// ==========================================================================

// 2002-11-15, 2013-05-10, 2013-05-20, 2013-07-03, 2013-09-01, 2014-08-01
const NOV_2002: u64 = 1037318400;
const MAY_2013_A: u64 = 1368144000;
const MAY_2013_B: u64 = 1369008000;
const JUL_2013: u64 = 1372809600;
const SEP_2013: u64 = 1377993600;
const AUG_2014: u64 = 1406851200;

fn write_gz(dir: &Path, name: &str, lines: &[String]) {
    let mut encoder = GzEncoder::new(
        File::create(dir.join(name)).unwrap(),
        Compression::default(),
    );
    for line in lines {
        writeln!(encoder, "{line}").unwrap();
    }
    encoder.finish().unwrap();
}

fn review(user: &str, product: &str, time: u64) -> String {
    format!(r#"{{"reviewerID":"{user}","asin":"{product}","unixReviewTime":{time}}}"#)
}

/// Two small datasets:
///
/// - Grocery: P1 "organic" (first review 2002-11), P2 plain (2013-05),
///   P9 "vegan" but never reviewed.
/// - Sports: S1 in Cycling (2013-09), S2 in Golf (2014-08).
fn write_fixture(dir: &Path) {
    write_gz(
        dir,
        "meta_Grocery.json.gz",
        &[
            r#"{"asin":"P1","title":"Organic Honey"}"#.to_string(),
            r#"{"asin":"P2","title":"Milk Chocolate"}"#.to_string(),
            r#"{"asin":"P9","title":"Vegan Snack Bar"}"#.to_string(),
        ],
    );
    write_gz(
        dir,
        "reviews_Grocery.json.gz",
        &[
            review("A1", "P1", MAY_2013_A),
            review("A1", "P1", JUL_2013),
            review("A2", "P2", MAY_2013_B),
            review("A3", "P1", NOV_2002),
            "not json".to_string(),
        ],
    );
    write_gz(
        dir,
        "meta_Sports.json.gz",
        &[
            r#"{"asin":"S1","categories":[["Sports & Outdoors","Cycling"]]}"#.to_string(),
            r#"{"asin":"S2","categories":[["Sports & Outdoors","Golf"]]}"#.to_string(),
        ],
    );
    write_gz(
        dir,
        "reviews_Sports.json.gz",
        &[review("A2", "S1", SEP_2013), review("A4", "S2", AUG_2014)],
    );
}

fn config_for(data_dir: &Path) -> Config {
    let mut config = Config::default();
    config.data.dir = data_dir.to_path_buf();
    config.segments[0].dataset = "Grocery".to_string();
    config.segments[1].dataset = "Sports".to_string();
    config
}

fn pipeline(config: Config) -> Pipeline {
    Pipeline::new(config, Box::new(MemoryCacheRepository::new())).unwrap()
}

fn bucket(s: &str) -> Bucket {
    s.parse().unwrap()
}

fn row(series: &MaterializedSeries, at: &str) -> (u64, u64, u64) {
    let row = series.get(&bucket(at)).unwrap();
    (row.new, row.active, row.total)
}

fn ratio_at(trend: &TrendSeries, at: &str) -> Option<f64> {
    trend
        .rows
        .iter()
        .find(|r| r.bucket == bucket(at))
        .unwrap()
        .ratio
}

// ==========================================================================
// COUNT SERIES
// ==========================================================================

#[test]
fn reviews_growth_is_truncated_but_keeps_history() {
    let dir = TempDir::new().unwrap();
    write_fixture(dir.path());

    let series = pipeline(config_for(dir.path())).counts(&SeriesName::ReviewsGrowth).unwrap();

    assert_eq!(series.rows.first().unwrap().bucket, bucket("2003-01"));
    assert_eq!(series.rows.last().unwrap().bucket, bucket("2014-06"));
    assert_eq!(series.len(), 138);
    assert_eq!(row(&series, "2003-01"), (0, 0, 1));
    assert_eq!(row(&series, "2013-05"), (2, 2, 3));
    assert_eq!(row(&series, "2013-06"), (0, 0, 3));
    assert_eq!(row(&series, "2014-06"), (0, 0, 5));
}

#[test]
fn user_count_tracks_first_seen_and_active_users() {
    let dir = TempDir::new().unwrap();
    write_fixture(dir.path());

    let series = pipeline(config_for(dir.path())).counts(&SeriesName::UserCount).unwrap();

    assert_eq!(row(&series, "2013-05"), (2, 2, 3));
    assert_eq!(row(&series, "2013-07"), (0, 1, 3));
    // A2 already reviewed groceries in May.
    assert_eq!(row(&series, "2013-09"), (0, 1, 3));
}

#[test]
fn product_count_spans_every_reviews_file() {
    let dir = TempDir::new().unwrap();
    write_fixture(dir.path());

    let series = pipeline(config_for(dir.path())).counts(&SeriesName::ProductCount).unwrap();

    assert_eq!(row(&series, "2013-05"), (1, 2, 2));
    assert_eq!(row(&series, "2013-09"), (1, 1, 3));
}

#[test]
fn unreviewed_products_never_launch() {
    let dir = TempDir::new().unwrap();
    write_fixture(dir.path());

    let mut config = config_for(dir.path());
    config.window.from = "2000-01".to_string();
    config.window.to = "2020-01".to_string();
    let series = pipeline(config).counts(&SeriesName::ProductLaunch).unwrap();

    assert_eq!(row(&series, "2002-11"), (1, 1, 1));
    assert_eq!(row(&series, "2013-05"), (1, 2, 2));
    // Five products are known, P9 is never reviewed.
    assert_eq!(series.rows.last().unwrap().bucket, bucket("2014-08"));
    assert_eq!(series.rows.last().unwrap().total, 4);
}

#[test]
fn segment_launches_apply_the_segment_filter() {
    let dir = TempDir::new().unwrap();
    write_fixture(dir.path());
    let pipeline = pipeline(config_for(dir.path()));

    // Only P1 is both "healthy" and reviewed; P2 fails the filter.
    let food = pipeline.counts(&SeriesName::SegmentLaunch("food".to_string())).unwrap();
    assert_eq!(row(&food, "2013-05"), (0, 1, 1));
    assert_eq!(food.rows.last().unwrap().bucket, bucket("2013-07"));

    // S2 is not in a listed category.
    let sport = pipeline.counts(&SeriesName::SegmentLaunch("sport".to_string())).unwrap();
    assert_eq!(sport.len(), 1);
    assert_eq!(row(&sport, "2013-09"), (1, 1, 1));
}

// ==========================================================================
// RATIO SERIES
// ==========================================================================

#[test]
fn reviews_per_product_is_undefined_without_active_products() {
    let dir = TempDir::new().unwrap();
    write_fixture(dir.path());

    let trend = pipeline(config_for(dir.path()))
        .trend(&SeriesName::ReviewsPerProduct)
        .unwrap();

    assert_eq!(ratio_at(&trend, "2013-05"), Some(1.0));
    assert_eq!(ratio_at(&trend, "2013-06"), None);
    assert!(trend.rows.iter().all(|r| r.fitted.is_none()));
}

#[test]
fn comparison_is_fitted_over_defined_ratios_only() {
    let dir = TempDir::new().unwrap();
    write_fixture(dir.path());

    let pipeline = pipeline(config_for(dir.path()));
    let trend = pipeline.trend(&pipeline.comparison_name()).unwrap();

    // No sport product has launched before September 2013.
    assert_eq!(ratio_at(&trend, "2013-08"), None);
    assert_eq!(ratio_at(&trend, "2013-09"), Some(1.0));
    assert_eq!(ratio_at(&trend, "2014-06"), Some(1.0));
    assert_eq!(trend.rows.first().unwrap().bucket, bucket("2003-01"));
    for row in &trend.rows {
        let fitted = row.fitted.unwrap();
        assert!((fitted - 1.0).abs() < 1e-9, "{}: {fitted}", row.bucket);
    }
}

// ==========================================================================
// CACHING AND FAILURES
// ==========================================================================

#[test]
fn rescanning_is_idempotent() {
    let dir = TempDir::new().unwrap();
    write_fixture(dir.path());

    let first = pipeline(config_for(dir.path())).run_all().unwrap();
    let second = pipeline(config_for(dir.path())).run_all().unwrap();
    assert_eq!(first, second);
}

#[test]
fn cached_series_are_served_without_source_files() {
    let data = TempDir::new().unwrap();
    let cache_dir = TempDir::new().unwrap();
    write_fixture(data.path());

    let mut config = config_for(data.path());
    config.cache.dir = Some(cache_dir.path().to_path_buf());

    let repo = || Box::new(FileCacheRepository::new(config.cache_dir()));
    let fresh = Pipeline::new(config.clone(), repo())
        .unwrap()
        .run_all()
        .unwrap();

    // Any scan would now fail on the missing directory.
    std::fs::remove_dir_all(data.path()).unwrap();
    let cached = Pipeline::new(config.clone(), repo())
        .unwrap()
        .run_all()
        .unwrap();

    assert_eq!(fresh, cached);
    assert!(cache_dir.path().join("food-vs-sport.bin").exists());
    assert!(cache_dir.path().join("reviews-growth.bin").exists());
}

#[test]
fn unreadable_source_is_fatal() {
    let dir = TempDir::new().unwrap();
    let err = pipeline(config_for(&dir.path().join("missing")))
        .counts(&SeriesName::ReviewsGrowth)
        .unwrap_err();

    let msg = format!("{err:#}");
    assert!(msg.contains("Failed to compute reviews-growth"), "{msg}");
    assert!(msg.contains("cannot read source directory"), "{msg}");
}

// ==========================================================================
// NAMES AND REPORT
// ==========================================================================

#[test]
fn series_names_resolve_against_segments() {
    let config = Config::default();

    for name in [
        "reviews-growth",
        "user-count",
        "product-count",
        "product-launch",
        "reviews-per-product",
        "food-launch",
        "sport-vs-food",
    ] {
        let resolved = SeriesName::resolve(name, &config).unwrap();
        assert_eq!(resolved.to_string(), name);
    }

    assert_eq!(
        SeriesName::resolve("food-vs-sport", &config).unwrap(),
        SeriesName::Comparison {
            numerator: "food".to_string(),
            denominator: "sport".to_string(),
        }
    );
    assert!(SeriesName::resolve("tea-launch", &config).is_err());
    assert!(SeriesName::resolve("food-vs-tea", &config).is_err());
    assert!(SeriesName::resolve("everything", &config).is_err());
}

#[test]
fn report_lists_series_in_dependency_order() {
    let dir = TempDir::new().unwrap();
    write_fixture(dir.path());

    let report = pipeline(config_for(dir.path())).run_all().unwrap();
    let names: Vec<_> = report.series.iter().map(|s| s.name.as_str()).collect();
    assert_eq!(
        names,
        vec![
            "reviews-growth",
            "user-count",
            "product-count",
            "product-launch",
            "food-launch",
            "sport-launch",
            "reviews-per-product",
            "food-vs-sport",
        ]
    );

    let json = simd_json::to_string(&report).unwrap();
    assert!(json.contains(r#""window":{"from":"2003-01","to":"2014-07"}"#), "{json}");
    assert!(json.contains(r#""name":"food-vs-sport","kind":"trend""#), "{json}");
    assert!(json.contains(r#""kind":"counts""#), "{json}");
}
