//! Review counts per product category for a single dataset.

use std::collections::HashMap;

use anyhow::{Context, Result};
use serde::Serialize;

use crate::accumulator::{EntityId, EntityInterner};
use crate::record::{ProductRecord, ReviewRecord};
use crate::scan::{FileFamily, ScanDriver};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CategoryCount {
    pub category: String,
    pub reviews: u64,
}

/// Sum, per category label, the reviews of every product carrying it.
///
/// Reads `meta_<dataset>.json.gz` for product categories, then
/// `reviews_<dataset>.json.gz` for review counts. A label listed under
/// several category paths of one product counts once per path. Reviews of
/// products without metadata are ignored.
pub fn count_categories(driver: &ScanDriver, dataset: &str) -> Result<Vec<CategoryCount>> {
    let mut products = EntityInterner::new();
    let mut labels: HashMap<EntityId, Vec<String>> = HashMap::new();

    let meta = FileFamily::dataset("meta", dataset)?;
    driver
        .scan(&meta, |product: ProductRecord| {
            let Some(id) = product.product() else {
                return;
            };
            let key = products.intern(id);
            labels
                .entry(key)
                .or_default()
                .extend(product.categories().map(str::to_string));
        })
        .with_context(|| format!("Failed to scan metadata for {dataset}"))?;

    let mut reviews: HashMap<EntityId, u64> = HashMap::new();
    let review_family = FileFamily::dataset("reviews", dataset)?;
    driver
        .scan(&review_family, |review: ReviewRecord| {
            if let Some(key) = review.product().and_then(|id| products.get(id)) {
                *reviews.entry(key).or_insert(0) += 1;
            }
        })
        .with_context(|| format!("Failed to scan reviews for {dataset}"))?;

    let mut totals: HashMap<&str, u64> = HashMap::new();
    for (key, count) in &reviews {
        for label in labels.get(key).into_iter().flatten() {
            *totals.entry(label.as_str()).or_insert(0) += count;
        }
    }

    let mut counts: Vec<CategoryCount> = totals
        .into_iter()
        .map(|(category, reviews)| CategoryCount {
            category: category.to_string(),
            reviews,
        })
        .collect();
    counts.sort_by(|a, b| {
        b.reviews
            .cmp(&a.reviews)
            .then_with(|| a.category.cmp(&b.category))
    });
    Ok(counts)
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::Compression;
    use flate2::write::GzEncoder;
    use std::fs::File;
    use std::io::Write;
    use std::path::Path;
    use tempfile::TempDir;

    fn write_gz(dir: &Path, name: &str, lines: &[&str]) {
        let mut encoder = GzEncoder::new(
            File::create(dir.join(name)).unwrap(),
            Compression::default(),
        );
        for line in lines {
            writeln!(encoder, "{line}").unwrap();
        }
        encoder.finish().unwrap();
    }

    #[test]
    fn counts_reviews_per_category() {
        let dir = TempDir::new().unwrap();
        write_gz(
            dir.path(),
            "meta_Sports.json.gz",
            &[
                r#"{"asin":"P1","categories":[["Sports","Cycling"],["Sports","Running"]]}"#,
                r#"{"asin":"P2","categories":[["Sports","Running"]]}"#,
                r#"{"asin":"P3"}"#,
            ],
        );
        write_gz(
            dir.path(),
            "reviews_Sports.json.gz",
            &[
                r#"{"asin":"P1","unixReviewTime":1368000000}"#,
                r#"{"asin":"P1","unixReviewTime":1368000000}"#,
                r#"{"asin":"P2","unixReviewTime":1368000000}"#,
                r#"{"asin":"P3","unixReviewTime":1368000000}"#,
                r#"{"asin":"UNKNOWN","unixReviewTime":1368000000}"#,
            ],
        );

        let counts = count_categories(&ScanDriver::new(dir.path()), "Sports").unwrap();
        let pairs: Vec<_> = counts
            .iter()
            .map(|c| (c.category.as_str(), c.reviews))
            .collect();
        assert_eq!(
            pairs,
            vec![("Sports", 5), ("Running", 3), ("Cycling", 2)]
        );
    }

    #[test]
    fn other_datasets_are_not_read() {
        let dir = TempDir::new().unwrap();
        write_gz(
            dir.path(),
            "meta_Food.json.gz",
            &[r#"{"asin":"F1","categories":[["Grocery"]]}"#],
        );
        write_gz(
            dir.path(),
            "reviews_Food.json.gz",
            &[r#"{"asin":"F1","unixReviewTime":1368000000}"#],
        );
        write_gz(dir.path(), "meta_Sports.json.gz", &[]);
        write_gz(dir.path(), "reviews_Sports.json.gz", &[]);

        let counts = count_categories(&ScanDriver::new(dir.path()), "Sports").unwrap();
        assert!(counts.is_empty());
    }

    #[test]
    fn missing_directory_is_an_error() {
        let dir = TempDir::new().unwrap();
        let driver = ScanDriver::new(dir.path().join("absent"));
        assert!(count_categories(&driver, "Sports").is_err());
    }
}
