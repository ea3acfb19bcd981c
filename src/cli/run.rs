//! Run command - analyze the history of one repository

use anyhow::{bail, Context, Result};
use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use lineage::cache::{default_redb_path, open_backend, CacheBackend, CacheKey};
use lineage::config::{load_config_file, load_project_config, ProjectConfig};
use lineage::core::{ConfigurationOption, Options, Pipeline, Registry};
use lineage::git::{load_commits, resolve_head, HistoryOptions, RepositoryHandle};
use lineage::reporters::{
    read_report, render_text, write_report, AnalysisReport, Metadata, OutputFormat,
};
use lineage::EngineError;
use std::collections::BTreeSet;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

pub(super) struct RunArgs {
    pub path: PathBuf,
    pub analyses: Vec<String>,
    pub all: bool,
    pub features: Vec<String>,
    pub set: Vec<String>,
    pub first_parent: bool,
    pub head: Option<String>,
    pub max_commits: Option<usize>,
    pub format: OutputFormat,
    pub output: Option<PathBuf>,
    pub config: Option<PathBuf>,
    pub no_cache: bool,
}

pub(super) fn run(args: RunArgs) -> Result<()> {
    let start = Instant::now();
    let registry = lineage::builtin_registry();

    let repository = RepositoryHandle::open(&args.path)?;
    let repo_root = PathBuf::from(repository.uri());
    let config = match &args.config {
        Some(path) => load_config_file(path)?,
        None => load_project_config(&repo_root),
    };

    let mut options = config.options.clone();
    options.merge_from(&parse_overrides(&registry, &args.set)?);
    let leaves = select_leaves(&registry, &args)?;
    let features = collect_features(&registry, &config, &args.features, &leaves);

    let history = HistoryOptions {
        head: args.head.clone().or_else(|| config.history.head.clone()),
        first_parent: args.first_parent || config.history.first_parent,
        max_commits: args.max_commits.or(config.history.max_commits),
    };
    let head = resolve_head(&repository, history.head.as_deref())?;

    let cache = if args.no_cache {
        None
    } else {
        let path = config
            .cache
            .path
            .clone()
            .unwrap_or_else(|| default_redb_path(repository.uri()));
        match open_backend(config.cache.backend, &path) {
            Ok(cache) => cache,
            Err(e) => {
                warn!("Result cache unavailable: {:#}", e);
                None
            }
        }
    };
    let cache_key = CacheKey::new()
        .part("repository", repository.uri())
        .part("head", head.as_str())
        .part("leaves", &leaves.join(","))
        .part("options", &serde_json::to_string(&options)?)
        .part("features", &features.iter().cloned().collect::<Vec<_>>().join(","))
        .part("first_parent", &history.first_parent.to_string())
        .part(
            "max_commits",
            &history.max_commits.map(|n| n.to_string()).unwrap_or_default(),
        )
        .finish();

    let cached = cache
        .as_deref()
        .and_then(|cache| lookup_cached(cache, &cache_key));
    let report = match cached {
        Some(report) => {
            info!("Using cached results for {}", head.short());
            report
        }
        None => {
            let report = analyze(&registry, repository, &history, &leaves, &features, &options)?;
            if let Some(cache) = cache.as_deref() {
                store_cached(cache, &cache_key, &report, config.cache.ttl_secs);
            }
            report
        }
    };

    write_output(&report, &registry, args.format, args.output.as_deref())?;
    eprintln!(
        "{} {} commits, {} analyses in {:.2}s",
        style("✓").green().bold(),
        report.header.commits,
        report.contents.len(),
        start.elapsed().as_secs_f64()
    );
    Ok(())
}

/// Walk the history once with every requested leaf deployed
fn analyze(
    registry: &Registry,
    repository: RepositoryHandle,
    history: &HistoryOptions,
    leaves: &[&'static str],
    features: &BTreeSet<String>,
    options: &Options,
) -> Result<AnalysisReport> {
    let spinner = ProgressBar::new_spinner();
    spinner.set_style(create_spinner_style());
    spinner.set_message("Loading commits...");
    spinner.enable_steady_tick(Duration::from_millis(100));
    let commits = load_commits(&repository, history)?;
    spinner.finish_and_clear();
    if commits.is_empty() {
        bail!("No commits to analyze in {}", repository.uri());
    }
    info!("Analyzing {} commits of {}", commits.len(), repository.uri());

    let uri = repository.uri().to_string();
    let mut pipeline = Pipeline::new(registry, repository);
    for feature in features {
        pipeline.set_feature(feature.clone());
    }
    pipeline.set_options(options);
    pipeline.set_first_parent(history.first_parent);
    for name in leaves {
        pipeline.deploy_by_name(name)?;
    }
    pipeline.initialize(&commits)?;

    let bar = ProgressBar::new(commits.len() as u64);
    bar.set_style(create_bar_style());
    bar.set_message("commits");
    let progress = bar.clone();
    pipeline.set_progress(Box::new(move |done, total| {
        progress.set_length(total as u64);
        progress.set_position(done as u64);
    }));
    let outcome = pipeline.run(&commits);
    bar.finish_and_clear();
    let results = outcome?;

    let mut report = AnalysisReport::new(Metadata::from_summary(&uri, &results.summary));
    for (name, result) in &results.results {
        let leaf = pipeline
            .leaf(name)
            .with_context(|| format!("No leaf named {} in the pipeline", name))?;
        let mut blob = Vec::new();
        leaf.serialize(result, true, &mut blob)
            .with_context(|| format!("Failed to serialize {}", name))?;
        report.contents.insert(name.clone(), blob);
    }
    report.seal();
    Ok(report)
}

/// Component names of the requested leaves, in registration order
fn select_leaves(registry: &Registry, args: &RunArgs) -> Result<Vec<&'static str>> {
    if args.all {
        return Ok(registry.leaves().iter().map(|r| r.name()).collect());
    }
    if args.analyses.is_empty() {
        bail!(
            "No analysis selected. Pass -a <flag> or --all; `lineage list` shows the available flags."
        );
    }
    let mut selected = BTreeSet::new();
    for flag in &args.analyses {
        let registration = registry
            .leaf_by_flag(flag)
            .ok_or_else(|| EngineError::UnknownComponent(flag.clone()))?;
        selected.insert((registration.ordinal, registration.name()));
    }
    Ok(selected.into_iter().map(|(_, name)| name).collect())
}

/// Features from the config, the command line and the selected leaves
fn collect_features(
    registry: &Registry,
    config: &ProjectConfig,
    requested: &[String],
    leaves: &[&'static str],
) -> BTreeSet<String> {
    let mut features: BTreeSet<String> = config
        .features
        .enabled
        .iter()
        .chain(requested)
        .cloned()
        .collect();
    for name in leaves {
        for registration in registry.lookup(name) {
            features.extend(registration.prototype().features().into_iter().map(String::from));
        }
    }
    debug!("Enabled features: {:?}", features);
    features
}

/// Parse `Name=value` pairs with the kind the owning component declares
pub(super) fn parse_overrides(registry: &Registry, pairs: &[String]) -> Result<Options> {
    let declared: Vec<ConfigurationOption> = registry
        .iter()
        .flat_map(|r| r.prototype().configuration_options())
        .collect();

    let mut options = Options::new();
    for pair in pairs {
        let (name, raw) = pair
            .split_once('=')
            .with_context(|| format!("Expected NAME=VALUE, got '{}'", pair))?;
        let name = name.trim();
        let option = declared
            .iter()
            .find(|o| o.name == name || o.flag == name)
            .ok_or_else(|| EngineError::InvalidOption {
                option: name.to_string(),
                reason: "no component declares this option".to_string(),
            })?;
        let value = option
            .kind
            .parse(raw)
            .map_err(|reason| EngineError::InvalidOption {
                option: option.name.to_string(),
                reason,
            })?;
        options.set(option.name, value);
    }
    Ok(options)
}

fn lookup_cached(cache: &dyn CacheBackend, key: &str) -> Option<AnalysisReport> {
    let bytes = match cache.get(key) {
        Ok(bytes) => bytes?,
        Err(e) => {
            warn!("Cache read failed ({}): {:#}", cache.name(), e);
            return None;
        }
    };
    match read_report(&mut bytes.as_slice()) {
        Ok(report) if report.verify() => Some(report),
        Ok(_) => {
            warn!("Cached report failed its content hash check, recomputing");
            None
        }
        Err(e) => {
            warn!("Cached report is unreadable, recomputing: {:#}", e);
            None
        }
    }
}

fn store_cached(cache: &dyn CacheBackend, key: &str, report: &AnalysisReport, ttl: Option<u64>) {
    let mut bytes = Vec::new();
    let stored = write_report(report, &mut bytes)
        .and_then(|_| cache.set(key, &bytes, ttl.map(Duration::from_secs)));
    match stored {
        Ok(()) => debug!("Stored {} bytes in the {} cache", bytes.len(), cache.name()),
        Err(e) => warn!("Failed to cache results: {:#}", e),
    }
}

/// Write `report` in `format` to `output`, or stdout
pub(super) fn write_output(
    report: &AnalysisReport,
    registry: &Registry,
    format: OutputFormat,
    output: Option<&Path>,
) -> Result<()> {
    let mut sink: Box<dyn Write> = match output {
        Some(path) => Box::new(BufWriter::new(
            File::create(path).with_context(|| format!("Failed to create {}", path.display()))?,
        )),
        None => Box::new(BufWriter::new(std::io::stdout().lock())),
    };
    match format {
        OutputFormat::Text => render_text(report, registry, sink.as_mut())?,
        OutputFormat::Binary => write_report(report, sink.as_mut())?,
    }
    sink.flush()?;
    if let Some(path) = output {
        eprintln!("Report written to {}", style(path.display()).cyan());
    }
    Ok(())
}

fn create_bar_style() -> ProgressStyle {
    ProgressStyle::default_bar()
        .template("{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} {msg}")
        .expect("valid template")
        .progress_chars("█▓▒░  ")
}

fn create_spinner_style() -> ProgressStyle {
    ProgressStyle::default_spinner()
        .tick_chars("⠁⠂⠄⡀⢀⠠⠐⠈ ")
        .template("{spinner:.green} {msg}")
        .expect("valid template")
}
