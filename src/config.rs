use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::cell::RefCell;
use std::fs;
use std::path::PathBuf;

use crate::pipeline::{LAUNCH_SUFFIX, PRODUCT_LAUNCH, VERSUS};
use crate::record::ProductRecord;
use crate::trend::PolynomialRidge;
use crate::types::{Bucket, ReportingWindow};
use crate::utils::NumberFormatOptions;

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct Config {
    pub data: DataConfig,
    pub cache: CacheConfig,
    pub window: WindowConfig,
    pub regression: RegressionConfig,
    pub comparison: ComparisonConfig,
    pub formatting: FormattingConfig,
    pub segments: Vec<SegmentConfig>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct DataConfig {
    pub dir: PathBuf,
    pub reviews_pattern: String,
    pub meta_pattern: String,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct CacheConfig {
    /// Persist series between runs. When off, the cache only lives for one run.
    pub enabled: bool,
    /// Defaults to the data directory.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dir: Option<PathBuf>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct WindowConfig {
    pub from: String,
    pub to: String,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct RegressionConfig {
    pub degree: usize,
    pub alpha: f64,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct ComparisonConfig {
    pub numerator: String,
    pub denominator: String,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct FormattingConfig {
    pub number_comma: bool,
    pub number_human: bool,
    pub locale: String,
    pub decimal_places: usize,
}

/// A slice of one dataset whose products pass `filter`.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct SegmentConfig {
    pub name: String,
    /// Suffix of `meta_<dataset>.json.gz` and `reviews_<dataset>.json.gz`.
    pub dataset: String,
    pub filter: SegmentFilter,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum SegmentFilter {
    /// Any keyword occurs in the lowercased title or description.
    TitleKeywords(Vec<String>),
    /// Any category label equals one of these.
    Categories(Vec<String>),
}

impl SegmentFilter {
    pub fn matches(&self, product: &ProductRecord) -> bool {
        match self {
            SegmentFilter::TitleKeywords(keywords) => {
                let title = product.title.as_deref().unwrap_or_default().to_lowercase();
                let description = product
                    .description
                    .as_deref()
                    .unwrap_or_default()
                    .to_lowercase();
                keywords.iter().any(|kw| {
                    let kw = kw.to_lowercase();
                    title.contains(&kw) || description.contains(&kw)
                })
            }
            SegmentFilter::Categories(wanted) => product
                .categories()
                .any(|label| wanted.iter().any(|w| w == label)),
        }
    }
}

fn strings(values: &[&str]) -> Vec<String> {
    values.iter().map(|s| s.to_string()).collect()
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("data"),
            reviews_pattern: "reviews*.json.gz".to_string(),
            meta_pattern: "meta*.json.gz".to_string(),
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            dir: None,
        }
    }
}

impl Default for WindowConfig {
    fn default() -> Self {
        let window = ReportingWindow::default();
        Self {
            from: window.from.to_string(),
            to: window.to.to_string(),
        }
    }
}

impl Default for RegressionConfig {
    fn default() -> Self {
        let ridge = PolynomialRidge::default();
        Self {
            degree: ridge.degree,
            alpha: ridge.alpha,
        }
    }
}

impl Default for ComparisonConfig {
    fn default() -> Self {
        Self {
            numerator: "food".to_string(),
            denominator: "sport".to_string(),
        }
    }
}

impl Default for FormattingConfig {
    fn default() -> Self {
        Self {
            number_comma: false,
            number_human: false,
            locale: "en".to_string(),
            decimal_places: 4,
        }
    }
}

fn default_segments() -> Vec<SegmentConfig> {
    vec![
        SegmentConfig {
            name: "food".to_string(),
            dataset: "Grocery_and_Gourmet_Food".to_string(),
            filter: SegmentFilter::TitleKeywords(strings(&[
                "organic",
                "natural",
                "sugar-free",
                "healthy",
                "vitamin",
                "supplement",
                "minerals",
                "diet",
                "vegan",
            ])),
        },
        SegmentConfig {
            name: "sport".to_string(),
            dataset: "Sports_and_Outdoors".to_string(),
            filter: SegmentFilter::Categories(strings(&[
                "Exercise & Fitness",
                "Cycling",
                "Sport Watches",
                "Team Sports",
                "Strength Training Equipment",
                "Action Sports",
                "Cardio Training",
                "Running",
            ])),
        },
    ]
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data: DataConfig::default(),
            cache: CacheConfig::default(),
            window: WindowConfig::default(),
            regression: RegressionConfig::default(),
            comparison: ComparisonConfig::default(),
            formatting: FormattingConfig::default(),
            segments: default_segments(),
        }
    }
}

thread_local! {
    static TEST_CONFIG_PATH: RefCell<Option<PathBuf>> = const { RefCell::new(None) };
}

#[cfg(test)]
pub fn set_test_config_path(path: PathBuf) {
    TEST_CONFIG_PATH.with(|p| *p.borrow_mut() = Some(path));
}

impl Config {
    pub fn config_path() -> Result<PathBuf> {
        #[cfg(test)]
        {
            if let Some(path) = TEST_CONFIG_PATH.with(|p| p.borrow().clone()) {
                return Ok(path);
            }
        }

        Ok(dirs::home_dir()
            .context("Could not find home directory")?
            .join(".reviewtrends.toml"))
    }

    pub fn load() -> Result<Option<Config>> {
        let config_path = Self::config_path()?;

        if !config_path.exists() {
            return Ok(None);
        }

        let content = fs::read_to_string(&config_path).context("Failed to read config file")?;

        let config: Config = toml::from_str(&content).context("Failed to parse config file")?;

        Ok(Some(config))
    }

    pub fn save(&self, silent: bool) -> Result<()> {
        let config_path = Self::config_path()?;
        let content = toml::to_string_pretty(self).context("Failed to serialize config")?;

        fs::write(&config_path, content).context("Failed to write config file")?;

        if !silent {
            println!("✅ Configuration saved to: {}", config_path.display());
        }

        Ok(())
    }

    pub fn reporting_window(&self) -> Result<ReportingWindow> {
        let from: Bucket = self
            .window
            .from
            .parse()
            .context("Invalid window.from")?;
        let to: Bucket = self.window.to.parse().context("Invalid window.to")?;
        if from >= to {
            anyhow::bail!("Empty reporting window: {from} is not before {to}");
        }
        Ok(ReportingWindow::new(from, to))
    }

    pub fn cache_dir(&self) -> PathBuf {
        self.cache
            .dir
            .clone()
            .unwrap_or_else(|| self.data.dir.clone())
    }

    pub fn curve_fitter(&self) -> PolynomialRidge {
        PolynomialRidge {
            degree: self.regression.degree,
            alpha: self.regression.alpha,
        }
    }

    pub fn segment(&self, name: &str) -> Option<&SegmentConfig> {
        self.segments.iter().find(|s| s.name == name)
    }

    pub fn number_format(&self) -> NumberFormatOptions {
        NumberFormatOptions {
            use_comma: self.formatting.number_comma,
            use_human: self.formatting.number_human,
            locale: self.formatting.locale.clone(),
            decimal_places: self.formatting.decimal_places,
        }
    }

    /// Reject settings that would only fail halfway through a run.
    pub fn validate(&self) -> Result<()> {
        self.reporting_window()?;
        if self.regression.degree == 0 {
            anyhow::bail!("regression.degree must be at least 1");
        }
        if !self.regression.alpha.is_finite() || self.regression.alpha < 0.0 {
            anyhow::bail!("regression.alpha must be a non-negative number");
        }
        for (i, segment) in self.segments.iter().enumerate() {
            if self.segments[..i].iter().any(|s| s.name == segment.name) {
                anyhow::bail!("Duplicate segment name: {}", segment.name);
            }
            // `<name>-launch` must resolve back to this segment.
            let launch = format!("{}{LAUNCH_SUFFIX}", segment.name);
            if segment.name.is_empty() || launch.contains(VERSUS) || launch == PRODUCT_LAUNCH {
                anyhow::bail!(
                    "Segment name '{}' clashes with series naming ({launch})",
                    segment.name
                );
            }
        }
        for name in [&self.comparison.numerator, &self.comparison.denominator] {
            if self.segment(name).is_none() {
                anyhow::bail!("Comparison refers to unknown segment: {name}");
            }
        }
        Ok(())
    }
}

// CLI helper functions
pub fn create_default_config(overwrite: bool) -> Result<()> {
    let config = Config::default();
    if !std::fs::exists(Config::config_path()?)? || overwrite {
        config.save(true)?;

        println!("📝 Created default configuration file.");
        println!("📍 Point it at your review dumps:");
        println!("   reviewtrends config set data-dir /path/to/data");
        println!("or");
        println!("   {}", Config::config_path()?.display());
    } else {
        println!("Configuration already exists.  Pass `--overwrite` to overwrite.");
    }

    Ok(())
}

pub fn show_config() -> Result<()> {
    match Config::load()? {
        Some(config) => {
            println!("🔧 Current configuration:");
            println!("   Data Directory: {}", config.data.dir.display());
            println!("   Reviews Pattern: {}", config.data.reviews_pattern);
            println!("   Metadata Pattern: {}", config.data.meta_pattern);
            println!("   Cache Enabled: {}", config.cache.enabled);
            println!("   Cache Directory: {}", config.cache_dir().display());
            println!(
                "   Window: [{}, {})",
                config.window.from, config.window.to
            );
            println!(
                "   Regression: degree {}, alpha {}",
                config.regression.degree, config.regression.alpha
            );
            println!(
                "   Comparison: {} vs {}",
                config.comparison.numerator, config.comparison.denominator
            );
            for segment in &config.segments {
                println!("   Segment {}: {}", segment.name, segment.dataset);
            }
            println!("   Number Comma: {}", config.formatting.number_comma);
            println!("   Number Human: {}", config.formatting.number_human);
            println!("   Locale: {}", config.formatting.locale);
            println!("   Decimal Places: {}", config.formatting.decimal_places);
        }
        None => {
            println!("❌ No configuration file found.");
            println!("   Run 'reviewtrends config init' to create one.");
        }
    }
    Ok(())
}

fn parse_bool(value: &str) -> Result<bool> {
    value
        .parse::<bool>()
        .context("Invalid boolean value. Use 'true' or 'false'")
}

pub fn set_config_value(key: &str, value: &str) -> Result<()> {
    let mut config = Config::load()?.unwrap_or_default();

    match key {
        "data-dir" => config.data.dir = PathBuf::from(value),
        "reviews-pattern" => config.data.reviews_pattern = value.to_string(),
        "meta-pattern" => config.data.meta_pattern = value.to_string(),
        "cache-dir" => config.cache.dir = Some(PathBuf::from(value)),
        "cache-enabled" => config.cache.enabled = parse_bool(value)?,
        "window-from" => {
            value.parse::<Bucket>().context("Invalid month, use YYYY-MM")?;
            config.window.from = value.to_string();
        }
        "window-to" => {
            value.parse::<Bucket>().context("Invalid month, use YYYY-MM")?;
            config.window.to = value.to_string();
        }
        "regression-degree" => {
            config.regression.degree = value.parse::<usize>().context("Invalid number value")?;
        }
        "regression-alpha" => {
            config.regression.alpha = value.parse::<f64>().context("Invalid number value")?;
        }
        "comparison-numerator" => config.comparison.numerator = value.to_string(),
        "comparison-denominator" => config.comparison.denominator = value.to_string(),
        "number-comma" => config.formatting.number_comma = parse_bool(value)?,
        "number-human" => config.formatting.number_human = parse_bool(value)?,
        "locale" => {
            config.formatting.locale = value.to_string();
        }
        "decimal-places" => {
            let places = value.parse::<usize>().context("Invalid number value")?;
            config.formatting.decimal_places = places;
        }
        _ => anyhow::bail!("Unknown config key: {}", key),
    }

    config.validate()?;
    config.save(false)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn setup_test_config() -> (TempDir, PathBuf) {
        let dir = TempDir::new().expect("tempdir");
        let config_path = dir.path().join(".reviewtrends.toml");
        set_test_config_path(config_path.clone());
        (dir, config_path)
    }

    fn product(title: &str, categories: &[&str]) -> ProductRecord {
        ProductRecord {
            product_id: Some("P1".to_string()),
            categories: vec![strings(categories)],
            title: Some(title.to_string()),
            description: None,
        }
    }

    #[test]
    fn default_config_round_trip() {
        let (_dir, _path) = setup_test_config();
        create_default_config(true).expect("create_default_config");

        let loaded = Config::load()
            .expect("load config")
            .expect("config should exist");

        assert_eq!(loaded, Config::default());
        assert_eq!(loaded.data.dir, PathBuf::from("data"));
        assert_eq!(loaded.reporting_window().unwrap(), ReportingWindow::default());
        assert_eq!(loaded.curve_fitter(), PolynomialRidge::default());
        assert_eq!(loaded.cache_dir(), PathBuf::from("data"));
        loaded.validate().expect("default config is valid");
    }

    #[test]
    fn partial_file_falls_back_to_defaults() {
        let (_dir, path) = setup_test_config();
        fs::write(&path, "[regression]\ndegree = 2\nalpha = 0.5\n").unwrap();

        let loaded = Config::load().unwrap().unwrap();
        assert_eq!(loaded.regression.degree, 2);
        assert_eq!(loaded.segments, Config::default().segments);
        assert_eq!(loaded.window.from, "2003-01");
    }

    #[test]
    fn segment_filters_from_toml() {
        let config: Config = toml::from_str(
            r#"
            [[segments]]
            name = "tea"
            dataset = "Grocery"
            filter = { title_keywords = ["Green Tea"] }

            [[segments]]
            name = "bikes"
            dataset = "Sports"
            filter = { categories = ["Cycling"] }
            "#,
        )
        .unwrap();

        let tea = config.segment("tea").unwrap();
        assert!(tea.filter.matches(&product("Organic green tea, 20 bags", &[])));
        assert!(!tea.filter.matches(&product("Coffee", &[])));

        let bikes = config.segment("bikes").unwrap();
        assert!(bikes.filter.matches(&product("", &["Sports", "Cycling"])));
        assert!(!bikes.filter.matches(&product("Cycling gloves", &["Sports"])));
    }

    #[test]
    fn keyword_filter_checks_description_and_tolerates_missing_text() {
        let filter = SegmentFilter::TitleKeywords(strings(&["vegan"]));
        let mut described = product("Cookies", &[]);
        described.description = Some("100% VEGAN recipe".to_string());
        assert!(filter.matches(&described));
        assert!(!filter.matches(&ProductRecord::default()));
    }

    #[test]
    fn validate_rejects_inconsistent_settings() {
        let mut config = Config::default();
        config.window.from = "2014-07".to_string();
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.comparison.numerator = "missing".to_string();
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.segments.push(config.segments[0].clone());
        assert!(config.validate().is_err());
    }

    #[test]
    fn validate_rejects_segment_names_that_shadow_series() {
        for name in ["product", "food-vs-sport", "tea-vs", ""] {
            let mut config = Config::default();
            let mut segment = config.segments[0].clone();
            segment.name = name.to_string();
            config.segments.push(segment);
            assert!(config.validate().is_err(), "accepted segment '{name}'");
        }

        let mut config = Config::default();
        let mut segment = config.segments[0].clone();
        segment.name = "green-tea".to_string();
        config.segments.push(segment);
        config.validate().expect("hyphenated segment names are fine");
    }

    #[test]
    fn partial_sections_keep_their_other_defaults() {
        let (_dir, path) = setup_test_config();
        fs::write(
            &path,
            "[data]\ndir = \"/srv/amazon\"\n\n[formatting]\nlocale = \"de\"\n",
        )
        .unwrap();

        let loaded = Config::load().unwrap().unwrap();
        assert_eq!(loaded.data.dir, PathBuf::from("/srv/amazon"));
        assert_eq!(loaded.data.reviews_pattern, "reviews*.json.gz");
        assert_eq!(loaded.data.meta_pattern, "meta*.json.gz");
        assert_eq!(loaded.formatting.locale, "de");
        assert_eq!(loaded.formatting.decimal_places, 4);
        loaded.validate().expect("partial config is valid");
    }

    #[test]
    fn set_config_value_behaviour() {
        let (_dir, _path) = setup_test_config();

        create_default_config(true).expect("create_default_config");

        set_config_value("data-dir", "/srv/amazon").expect("set data-dir");
        set_config_value("cache-dir", "/var/cache/reviewtrends").expect("set cache-dir");
        set_config_value("window-from", "2005-01").expect("set window-from");
        set_config_value("regression-alpha", "0.25").expect("set regression-alpha");
        set_config_value("number-comma", "true").expect("set number-comma");
        set_config_value("locale", "de").expect("set locale");
        set_config_value("decimal-places", "3").expect("set decimal-places");

        let cfg = Config::load()
            .expect("load config")
            .expect("config should exist");

        assert_eq!(cfg.data.dir, PathBuf::from("/srv/amazon"));
        assert_eq!(cfg.cache_dir(), PathBuf::from("/var/cache/reviewtrends"));
        assert_eq!(cfg.window.from, "2005-01");
        assert_eq!(cfg.regression.alpha, 0.25);
        assert!(cfg.formatting.number_comma);
        assert_eq!(cfg.formatting.locale, "de");
        assert_eq!(cfg.formatting.decimal_places, 3);

        let err = set_config_value("unknown-key", "value").unwrap_err();
        let msg = format!("{err}");
        assert!(
            msg.contains("Unknown config key"),
            "unexpected error message: {msg}"
        );
        let err = set_config_value("number-comma", "not-a-bool").unwrap_err();
        let msg = format!("{err}");
        assert!(
            msg.contains("Invalid boolean value"),
            "unexpected error message: {msg}"
        );
        assert!(set_config_value("window-to", "2004-13").is_err());
        assert!(set_config_value("comparison-numerator", "nope").is_err());
    }
}
