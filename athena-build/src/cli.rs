// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Command line interface and phase orchestration.

Drives the phases in order: acquire indices → build cache → resolve →
plan → fetch → build. Individual source failures are collected and
written to a failure list without affecting the exit code; configuration,
archive, and container errors are fatal.
*/

use {
    athena_packaging::{
        archive::{http::HttpArchiveClient, ArchiveClient, IndexStore},
        builder::PackageBuilder,
        cache::PackageCache,
        cancel::CancelFlag,
        container::DockerCommandDriver,
        error::AthenaError,
        fetcher::{FetchEvent, SourceFetcher},
        planner::{plan_sources, BuildPlan},
        repository::LocalRepository,
        resolver::{NonInteractivePrompter, Prompter, ResolutionSet, Resolver},
    },
    clap::{Arg, ArgMatches, Command},
    std::{
        io::Write,
        sync::{Arc, Mutex},
    },
    thiserror::Error,
};

use crate::config::{read_seed_list, BuildConfig};

#[derive(Debug, Error)]
pub enum ToolError {
    #[error("argument parsing error: {0:?}")]
    Clap(#[from] clap::Error),

    #[error("{0}")]
    Athena(#[from] AthenaError),

    #[error("I/O error: {0:?}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0:?}")]
    Json(#[from] serde_json::Error),

    #[error("configuration error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, ToolError>;

/// Prompter that asks on the controlling terminal.
struct ConsolePrompter;

impl Prompter for ConsolePrompter {
    fn choose(
        &self,
        question: &str,
        options: &[String],
    ) -> athena_packaging::error::Result<usize> {
        println!("{}", question);

        for (index, option) in options.iter().enumerate() {
            println!("  {}) {}", index + 1, option);
        }

        loop {
            print!("> ");
            std::io::stdout().flush()?;

            let mut line = String::new();

            if std::io::stdin().read_line(&mut line)? == 0 {
                return Err(AthenaError::PromptUnavailable(question.to_string()));
            }

            let line = line.trim();

            if let Ok(number) = line.parse::<usize>() {
                if number >= 1 && number <= options.len() {
                    return Ok(number - 1);
                }
            }

            if let Some(index) = options.iter().position(|o| o == line) {
                return Ok(index);
            }

            println!("pick one of 1..{}", options.len());
        }
    }
}

pub async fn run_cli() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let matches = Command::new("athena-build")
        .version("0.3")
        .about("Build a derivative distribution from an upstream archive")
        .arg(
            Arg::new("working-dir")
                .long("working-dir")
                .takes_value(true)
                .help("Working directory holding configuration and outputs"),
        )
        .arg(
            Arg::new("config-file")
                .long("config-file")
                .takes_value(true)
                .help("Path to build.conf (default: <working-dir>/config/build.conf)"),
        )
        .arg(
            Arg::new("pkg-list")
                .long("pkg-list")
                .takes_value(true)
                .help("Path to the seed package list (default: <working-dir>/config/pkg.list)"),
        )
        .arg(
            Arg::new("max-parallel-builds")
                .long("max-parallel-builds")
                .takes_value(true)
                .default_value("2")
                .help("Maximum number of concurrent source builds"),
        )
        .arg(
            Arg::new("max-parallel-downloads")
                .long("max-parallel-downloads")
                .takes_value(true)
                .default_value("4")
                .help("Maximum number of concurrent downloads"),
        )
        .arg(
            Arg::new("follow-recommends")
                .long("follow-recommends")
                .takes_value(false)
                .help("Include Recommends relations in the closure"),
        )
        .arg(
            Arg::new("non-interactive")
                .long("non-interactive")
                .takes_value(false)
                .help("Fail instead of prompting on ambiguous selections"),
        )
        .get_matches();

    run_build(&matches).await
}

async fn run_build(matches: &ArgMatches) -> Result<()> {
    let working_dir = match matches.value_of("working-dir") {
        Some(dir) => std::path::PathBuf::from(dir),
        None => std::env::current_dir()?,
    };

    let config_path = matches
        .value_of("config-file")
        .map(std::path::PathBuf::from)
        .unwrap_or_else(|| working_dir.join("config").join("build.conf"));

    let pkg_list_path = matches
        .value_of("pkg-list")
        .map(std::path::PathBuf::from)
        .unwrap_or_else(|| working_dir.join("config").join("pkg.list"));

    let max_builds = matches.value_of_t::<usize>("max-parallel-builds")?;
    let max_downloads = matches.value_of_t::<usize>("max-parallel-downloads")?;

    let config = BuildConfig::load(&working_dir, &config_path)?;
    let seeds = read_seed_list(&pkg_list_path)?;

    log::info!(
        "building {} {} from {} {}",
        config.build_codename,
        config.build_version,
        config.basecodename,
        config.baseversion,
    );

    let cancel = CancelFlag::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                log::warn!("interrupt received, cancelling");
                cancel.cancel();
            }
        });
    }

    // Phase 1: indices and cache.
    let client = HttpArchiveClient::new(config.archive_url())?;

    let store = IndexStore::new(
        Box::new(client),
        &config.dir_cache,
        &config.basecodename,
        &config.arch,
        vec!["main".to_string()],
    );

    let indices = store.acquire_indices().await?;
    let cache = PackageCache::from_indices(indices, &config.arch);

    // Phase 2: resolution. Seeds are the user list plus the required and
    // important priority harvests.
    let mut all_seeds = seeds;
    all_seeds.extend(cache.required_seeds().iter().cloned());
    all_seeds.extend(cache.important_seeds().iter().cloned());

    let console = ConsolePrompter;
    let non_interactive = NonInteractivePrompter;
    let prompter: &dyn Prompter = if matches.is_present("non-interactive") {
        &non_interactive
    } else {
        &console
    };

    let resolution = Resolver::new(&cache, prompter)
        .follow_recommends(matches.is_present("follow-recommends"))
        .resolve(all_seeds);

    report_resolution(&resolution);

    // Phase 3: planning.
    let plan = plan_sources(&cache, &resolution);
    report_plan(&config, &plan)?;

    // Phase 4: fetch.
    let client = HttpArchiveClient::new(config.archive_url())?;
    let fetch_report = fetch_plan(&config, &client, &plan, max_downloads, cancel.clone()).await?;

    // Phase 5: build.
    let driver = DockerCommandDriver::default();
    let repository = LocalRepository::new(&config.dir_repo)?;

    let builder = PackageBuilder::new(
        &driver,
        &repository,
        &config.dir_download,
        &config.dir_patch,
        &config.dir_build_log,
        &config.dir_config,
        &config.arch,
    )
    .skip_sources(config.skip_sources.iter().cloned().collect())
    .skip_tests(config.skip_tests.iter().cloned().collect())
    .concurrency(max_builds)
    .with_cancel(cancel);

    // Sources with missing files fail their pre-build check rather than
    // launching containers.
    let build_report = builder.build_all(plan.sources()).await?;

    log::info!(
        "build phase done: {} built, {} already built, {} skipped, {} failed",
        build_report.built.len(),
        build_report.already_built.len(),
        build_report.skipped.len(),
        build_report.failed.len(),
    );

    let mut failures = fetch_report
        .failed
        .iter()
        .map(|(name, reason)| format!("fetch {}: {}", name, reason))
        .collect::<Vec<_>>();

    failures.extend(
        build_report
            .failed
            .iter()
            .map(|(name, reason)| format!("build {}: {}", name, reason)),
    );

    let failure_list = config.dir_log.join("failed.list");
    std::fs::write(&failure_list, failures.join("\n"))?;

    if failures.is_empty() {
        log::info!("all sources fetched and built");
    } else {
        log::warn!(
            "{} failures recorded in {}",
            failures.len(),
            failure_list.display()
        );
    }

    if build_report.cancelled {
        log::warn!("run was cancelled before completing");
    }

    Ok(())
}

fn report_resolution(resolution: &ResolutionSet) {
    log::info!("selected {} packages", resolution.package_count());

    for name in resolution.unresolved() {
        log::warn!("dependency not resolved: {}", name);
    }

    for violation in resolution.verify_constraints() {
        log::warn!("constraint violation: {}", violation);
    }

    for (origin, dependency) in resolution.unsatisfied_alternatives() {
        log::warn!("dependency unresolved between {} (wanted by {})", dependency, origin);
    }

    for conflict in resolution.relation_conflicts() {
        log::warn!("relation conflict: {}", conflict);
    }
}

fn report_plan(config: &BuildConfig, plan: &BuildPlan) -> Result<()> {
    log::info!(
        "plan: {} sources, {} files, about {} MB",
        plan.sources().len(),
        plan.manifest().len(),
        plan.total_size() / (1024 * 1024),
    );

    for unresolved in plan.unresolved_sources() {
        log::warn!(
            "source not found for {} {} (available: {:?})",
            unresolved.name,
            unresolved.version,
            unresolved.alternates,
        );
    }

    // Persist the resolved manifest for inspection and tooling.
    let manifest_path = config.dir_log.join("manifest.json");
    let f = std::fs::File::create(&manifest_path)?;
    serde_json::to_writer_pretty(f, plan.manifest())?;

    log::info!("file manifest written to {}", manifest_path.display());

    Ok(())
}

async fn fetch_plan(
    config: &BuildConfig,
    client: &(impl ArchiveClient + Sync),
    plan: &BuildPlan,
    concurrency: usize,
    cancel: CancelFlag,
) -> Result<athena_packaging::fetcher::FetchReport> {
    let fetcher =
        SourceFetcher::new(client, &config.dir_download, concurrency).with_cancel(cancel);

    let progress: Arc<Mutex<Option<pbr::ProgressBar<std::io::Stdout>>>> =
        Arc::new(Mutex::new(None));

    let events = {
        let progress = progress.clone();

        move |event: FetchEvent| match event {
            FetchEvent::PlanBegin { total_bytes, .. } => {
                let mut bar = pbr::ProgressBar::new(total_bytes);
                bar.set_units(pbr::Units::Bytes);

                progress.lock().unwrap().replace(bar);
            }
            FetchEvent::Progress { bytes } => {
                if let Some(bar) = progress.lock().unwrap().as_mut() {
                    bar.add(bytes);
                }
            }
            FetchEvent::FileSkipped { size, .. } => {
                if let Some(bar) = progress.lock().unwrap().as_mut() {
                    bar.add(size);
                }
            }
            FetchEvent::FileFailed { filename, message } => {
                log::warn!("error downloading {}: {}", filename, message);
            }
            _ => {}
        }
    };

    let report = fetcher.fetch_manifest(plan.manifest(), Some(&events)).await?;

    if let Some(bar) = progress.lock().unwrap().as_mut() {
        bar.finish();
    }

    log::info!(
        "downloaded {} files, skipped {} files",
        report.downloaded.len(),
        report.skipped.len(),
    );

    Ok(report)
}
