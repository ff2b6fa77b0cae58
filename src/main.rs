use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use std::io::IsTerminal;
use std::path::PathBuf;

use cache::{CacheRepository, FileCacheRepository, MemoryCacheRepository};
use pipeline::{NamedSeries, Pipeline, SeriesData, SeriesName};

mod accumulator;
mod cache;
mod categories;
mod config;
mod debug_log;
mod materialize;
mod pipeline;
mod record;
mod scan;
mod trend;
mod types;
mod utils;

#[cfg(feature = "mimalloc")]
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[derive(Parser)]
#[command(name = "reviewtrends")]
#[command(version)]
#[command(disable_help_subcommand = true)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Directory holding reviews_*.json.gz and meta_*.json.gz (overrides config)
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Hide scan progress bars
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Use comma-separated number formatting
    #[arg(long, global = true)]
    number_comma: bool,

    /// Use human-readable number formatting (k, m, b, t)
    #[arg(short = 'H', long, global = true)]
    number_human: bool,

    /// Locale for number formatting (en, de, fr, es, it, ja, ko, zh)
    #[arg(long, global = true)]
    locale: Option<String>,

    /// Number of decimal places for ratios and human-readable numbers
    #[arg(long, global = true)]
    decimal_places: Option<usize>,

    #[command(flatten)]
    output: OutputArgs,
}

#[derive(Subcommand)]
enum Commands {
    /// Compute every series (the default)
    Run,
    /// Compute a single series, e.g. user-count or food-vs-sport
    Series { name: String },
    /// Review counts per product category of one dataset
    Categories {
        /// Dataset suffix, e.g. Sports_and_Outdoors
        dataset: String,
        /// Show only the most reviewed categories
        #[arg(long)]
        limit: Option<usize>,
    },
    /// Manage cached series
    Cache(CacheArgs),
    /// Manage configuration
    Config(ConfigArgs),
}

#[derive(Args, Clone, Copy)]
struct OutputArgs {
    /// Output as JSON instead of tables
    #[arg(long, global = true, default_value_t = false)]
    json: bool,

    /// Pretty-print JSON instead of a single line
    #[arg(long, global = true, default_value_t = false)]
    pretty: bool,
}

#[derive(Args)]
struct CacheArgs {
    #[command(subcommand)]
    subcommand: CacheSubcommands,
}

#[derive(Subcommand)]
enum CacheSubcommands {
    /// Delete every cached series
    Clear,
}

#[derive(Args)]
struct ConfigArgs {
    #[command(subcommand)]
    subcommand: ConfigSubcommands,
}

#[derive(Subcommand)]
enum ConfigSubcommands {
    /// Create default configuration file
    Init {
        #[arg(long, default_value_t = false)]
        overwrite: bool,
    },
    /// Show current configuration
    Show,
    /// Set configuration value
    Set {
        /// Configuration key (data-dir, cache-dir, cache-enabled, window-from, window-to,
        /// regression-degree, regression-alpha, comparison-numerator, comparison-denominator,
        /// number-comma, number-human, locale, decimal-places)
        key: String,
        /// Configuration value
        value: String,
    },
}

fn main() {
    debug_log::init();
    let cli = Cli::parse();

    // Config subcommands must work even when the config file is broken.
    let result = match &cli.command {
        Some(Commands::Config(config_args)) => handle_config_subcommand(config_args),
        _ => load_config(&cli).and_then(|config| run_command(&cli, config)),
    };

    if let Err(e) = result {
        eprintln!("Error: {e:#}");
        std::process::exit(1);
    }
}

/// Config file defaults merged with CLI overrides.
fn load_config(cli: &Cli) -> Result<config::Config> {
    let mut config = config::Config::load()?.unwrap_or_default();

    if let Some(dir) = &cli.data_dir {
        config.data.dir = dir.clone();
    }
    config.formatting.number_comma |= cli.number_comma;
    config.formatting.number_human |= cli.number_human;
    if let Some(locale) = &cli.locale {
        config.formatting.locale = locale.clone();
    }
    if let Some(places) = cli.decimal_places {
        config.formatting.decimal_places = places;
    }

    Ok(config)
}

fn cache_repository(config: &config::Config) -> Box<dyn CacheRepository> {
    if config.cache.enabled {
        Box::new(FileCacheRepository::new(config.cache_dir()))
    } else {
        Box::new(MemoryCacheRepository::new())
    }
}

fn build_pipeline(cli: &Cli, config: config::Config) -> Result<Pipeline> {
    let show_progress = !cli.quiet && std::io::stderr().is_terminal();
    let repo = cache_repository(&config);
    Ok(Pipeline::new(config, repo)?.with_progress(show_progress))
}

fn run_command(cli: &Cli, config: config::Config) -> Result<()> {
    match &cli.command {
        None | Some(Commands::Run) => run_all(cli, config),
        Some(Commands::Series { name }) => run_series(cli, config, name),
        Some(Commands::Categories { dataset, limit }) => {
            run_categories(cli, config, dataset, *limit)
        }
        Some(Commands::Cache(cache_args)) => match cache_args.subcommand {
            CacheSubcommands::Clear => {
                let removed = cache_repository(&config).clear()?;
                println!(
                    "🧹 Removed {removed} cached series from {}",
                    config.cache_dir().display()
                );
                Ok(())
            }
        },
        Some(Commands::Config(config_args)) => handle_config_subcommand(config_args),
    }
}

fn print_json<T: serde::Serialize>(value: &T, pretty: bool) -> Result<()> {
    let json = if pretty {
        simd_json::to_string_pretty(value)?
    } else {
        simd_json::to_string(value)?
    };
    println!("{json}");
    Ok(())
}

fn print_series(series: &NamedSeries, options: &utils::NumberFormatOptions) {
    println!("📈 {}", series.name);
    let table = match &series.data {
        SeriesData::Counts(rows) => utils::render_counts_table(rows, options),
        SeriesData::Trend(rows) => utils::render_trend_table(rows, options),
    };
    println!("{table}");
}

fn run_all(cli: &Cli, config: config::Config) -> Result<()> {
    let output = cli.output;
    let options = config.number_format();
    let pipeline = build_pipeline(cli, config)?;
    let report = pipeline.run_all()?;

    if output.json {
        return print_json(&report, output.pretty);
    }
    println!(
        "Reporting window: [{}, {})\n",
        report.window.from, report.window.to
    );
    for series in &report.series {
        print_series(series, &options);
    }
    Ok(())
}

fn run_series(cli: &Cli, config: config::Config, name: &str) -> Result<()> {
    let output = cli.output;
    let options = config.number_format();
    let name = SeriesName::resolve(name, &config)?;
    let pipeline = build_pipeline(cli, config)?;
    let series = pipeline.series(&name)?;

    if output.json {
        return print_json(&series, output.pretty);
    }
    print_series(&series, &options);
    Ok(())
}

fn run_categories(
    cli: &Cli,
    config: config::Config,
    dataset: &str,
    limit: Option<usize>,
) -> Result<()> {
    let output = cli.output;
    let options = config.number_format();
    let pipeline = build_pipeline(cli, config)?;
    let mut counts = categories::count_categories(pipeline.driver(), dataset)
        .with_context(|| format!("Failed to count categories of {dataset}"))?;
    if let Some(limit) = limit {
        counts.truncate(limit);
    }

    if output.json {
        return print_json(&counts, output.pretty);
    }
    println!("{}", utils::render_categories_table(&counts, &options));
    Ok(())
}

fn handle_config_subcommand(config_args: &ConfigArgs) -> Result<()> {
    match &config_args.subcommand {
        ConfigSubcommands::Init { overwrite } => {
            config::create_default_config(*overwrite).context("Error creating config")
        }
        ConfigSubcommands::Show => config::show_config().context("Error showing config"),
        ConfigSubcommands::Set { key, value } => {
            config::set_config_value(key, value).context("Error setting config")
        }
    }
}
