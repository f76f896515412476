//! followgraph - follow lists and common-followings graphs
//!
//! Main entry point for the followgraph CLI.

use anyhow::{bail, Context};
use clap::Parser;
use followgraph::api::{HttpRelationApi, RelationClient, RelationItem, RelationPage};
use followgraph::cache::{CacheManager, KeyValueStore, MigrationCoordinator, MigrationStats};
use followgraph::commands::{CacheCommands, Cli, Commands, ConfigCommands, ListArgs};
use followgraph::config::{validate_config, validate_config_result, FollowGraphConfig};
use followgraph::graph::{self, prune_isolated, Uid};
use followgraph::pipeline::{
    AcquisitionPipeline, LoadingState, LoadingStatus, PipelineHandle, PipelineOptions,
    RelationMode,
};
use std::path::{Path, PathBuf};
use std::process;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

/// Everything a network-facing command needs
struct App {
    config: FollowGraphConfig,
    cache: Arc<CacheManager>,
    client: RelationClient,
}

impl App {
    fn open(config: FollowGraphConfig) -> anyhow::Result<Self> {
        validate_config_result(&config)?;

        let cache = Arc::new(CacheManager::open(&config.cache).context("Failed to open cache")?);
        let api = HttpRelationApi::from_config(&config.api)?;
        let client = RelationClient::new(Arc::new(api), cache.clone());

        Ok(Self {
            config,
            cache,
            client,
        })
    }

    /// Uid of the session owner, preferring the configured one
    async fn my_uid(&self) -> anyhow::Result<Uid> {
        if let Some(uid) = self.config.api.local_uid() {
            return Ok(uid);
        }
        Ok(self.client.current_uid_remote().await?)
    }

    /// Bring legacy cache entries over before the first lookup
    async fn migrate_once(&self) {
        let Some(sqlite) = self.cache.sqlite() else {
            return;
        };
        let coordinator = MigrationCoordinator::new(self.cache.local(), sqlite);
        if coordinator.is_completed() {
            return;
        }
        let stats = coordinator.migrate(false).await;
        if stats.total > 0 {
            tracing::info!(
                migrated = stats.migrated,
                failed = stats.failed,
                "Migrated legacy cache entries"
            );
        }
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if let Err(e) = followgraph::logging::init(cli.verbose) {
        eprintln!("Failed to initialize logging: {}", e);
    }

    if let Err(e) = run(cli).await {
        eprintln!("Error: {:#}", e);
        process::exit(1);
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    // Config management works without a valid config
    if let Commands::Config(ref cmd) = cli.command {
        return handle_config_command(cmd, cli.config.as_deref());
    }

    let config = load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Whoami { remote } => {
            let app = App::open(config)?;
            let local = if remote {
                None
            } else {
                app.config.api.local_uid()
            };
            match local {
                Some(uid) => println!("{} (from config)", uid),
                None => println!("{}", app.client.current_uid_remote().await?),
            }
        }

        Commands::Followings(args) => {
            let app = App::open(config)?;
            let uid = list_target(&app, &args).await?;
            let page = app
                .client
                .fetch_followings_page(uid, args.page_size, args.page)
                .await?;
            print_page(uid, "followings", args.page, &page);
        }

        Commands::Fans { list, offset } => {
            let app = App::open(config)?;
            let uid = list_target(&app, &list).await?;
            let page = app
                .client
                .fetch_fans_page(uid, list.page_size, list.page, offset.as_deref())
                .await?;
            print_page(uid, "fans", list.page, &page);
            if let Some(token) = page.offset_token {
                println!("Next page: --page {} --offset {}", list.page + 1, token);
            }
        }

        Commands::Common { uid, no_cache } => {
            let app = App::open(config)?;
            app.migrate_once().await;
            let common = app.client.fetch_common_followings(uid, !no_cache).await?;
            println!(
                "Common followings with {}: {}{}",
                uid,
                common.items.len(),
                if common.from_cache { " (cached)" } else { "" }
            );
            println!();
            for item in &common.items {
                print_item(item);
            }
        }

        Commands::Graph {
            output,
            prune,
            batched,
            no_cache,
            metrics,
        } => {
            let app = App::open(config)?;
            app.migrate_once().await;
            handle_graph(&app, output, prune, batched, no_cache).await?;
            if metrics {
                eprintln!("{}", followgraph::metrics::encode_metrics());
            }
        }

        Commands::Migrate { force, reset } => {
            let app = App::open(config)?;
            let sqlite = app
                .cache
                .sqlite()
                .context("SQLite cache is unavailable; nothing to migrate into")?;
            let coordinator = MigrationCoordinator::new(app.cache.local(), sqlite);

            if reset {
                coordinator.reset()?;
                println!("✓ Migration marker reset");
                return Ok(());
            }

            if !force && coordinator.is_completed() {
                println!("Migration already completed (use --force to run again)");
                return Ok(());
            }

            let stats = coordinator.migrate(force).await;
            print_migration(&stats);
            if stats.failed > 0 {
                bail!("{} entries failed to migrate", stats.failed);
            }
        }

        Commands::Cache(cmd) => {
            let app = App::open(config)?;
            handle_cache_command(&cmd, &app).await?;
        }

        Commands::Config(_) => unreachable!("handled above"),
    }

    Ok(())
}

fn load_config(path: Option<&Path>) -> anyhow::Result<FollowGraphConfig> {
    let config = match path {
        Some(path) => FollowGraphConfig::load(path)?,
        None => FollowGraphConfig::load_default()?,
    };
    Ok(config)
}

async fn list_target(app: &App, args: &ListArgs) -> anyhow::Result<Uid> {
    match args.uid {
        Some(uid) => Ok(uid),
        None => app.my_uid().await,
    }
}

async fn handle_graph(
    app: &App,
    output: Option<PathBuf>,
    prune: bool,
    batched: Option<usize>,
    no_cache: bool,
) -> anyhow::Result<()> {
    let mut options = PipelineOptions::from_config(&app.config);
    if let Some(concurrency) = batched {
        options = options.with_relation_mode(RelationMode::Batched {
            concurrency: concurrency.max(1),
            batch_delay: Duration::from_millis(app.config.pipeline.batch_delay_ms),
        });
    }
    if no_cache {
        options = options.with_use_cache(false);
    }

    let pipeline = Arc::new(AcquisitionPipeline::new(
        app.client.clone(),
        graph::shared(),
        options,
    ));
    let handle = pipeline.handle();

    let progress = tokio::spawn(report_progress(handle.subscribe()));
    let signals = tokio::spawn(forward_signals(handle.clone()));

    let task = pipeline.start().context("A run is already active")?;
    let state = handle.wait_finished().await;
    task.await.context("Pipeline task failed")?;
    signals.abort();
    progress.abort();

    match state.status {
        LoadingStatus::Done => {}
        LoadingStatus::Error => bail!(state.error.unwrap_or_else(|| "run failed".to_string())),
        _ => {
            eprintln!("Cancelled");
            return Ok(());
        }
    }

    let graph = pipeline.graph().read().await;
    let mutual = graph.mutual_pair_count();
    let mut dataset = graph.snapshot();
    drop(graph);

    let mut removed = 0;
    if prune {
        let pruned = prune_isolated(&dataset);
        removed = pruned.removed;
        dataset = pruned.dataset;
    }

    let json = serde_json::to_string_pretty(&dataset)?;
    match output {
        Some(ref path) => {
            std::fs::write(path, json)
                .with_context(|| format!("Failed to write {}", path.display()))?;
            eprintln!("✓ Wrote {}", path.display());
        }
        None => println!("{}", json),
    }

    eprintln!(
        "{} users, {} links ({} mutual pairs){}",
        dataset.nodes.len(),
        dataset.links.len(),
        mutual,
        if prune {
            format!(", {} isolated users pruned", removed)
        } else {
            String::new()
        }
    );
    Ok(())
}

/// Print phase changes and periodic progress to stderr
async fn report_progress(mut rx: watch::Receiver<LoadingState>) {
    let mut phase = LoadingStatus::Idle;
    while rx.changed().await.is_ok() {
        let state = rx.borrow_and_update().clone();
        if state.status != phase {
            phase = state.status;
            if phase.is_active() {
                eprintln!("{}...", phase.label());
            }
        }
        tracing::info!(
            status = state.status.label(),
            current = state.current,
            total = state.total,
            user = ?state.current_user,
            "Progress"
        );
    }
}

/// Ctrl-C cancels the run; SIGUSR1 toggles pause
#[cfg(unix)]
async fn forward_signals(handle: PipelineHandle) {
    use tokio::signal::unix::{signal, SignalKind};

    let mut usr1 = match signal(SignalKind::user_defined1()) {
        Ok(s) => s,
        Err(e) => {
            tracing::warn!(error = %e, "SIGUSR1 handler unavailable, pausing disabled");
            return cancel_on_ctrl_c(handle).await;
        }
    };

    loop {
        tokio::select! {
            result = tokio::signal::ctrl_c() => {
                if result.is_ok() {
                    eprintln!("Cancelling...");
                    handle.cancel();
                }
                break;
            }
            _ = usr1.recv() => {
                if handle.toggle_pause() {
                    eprintln!("Paused (send SIGUSR1 again to resume)");
                } else {
                    eprintln!("Resumed");
                }
            }
        }
    }
}

#[cfg(not(unix))]
async fn forward_signals(handle: PipelineHandle) {
    cancel_on_ctrl_c(handle).await
}

async fn cancel_on_ctrl_c(handle: PipelineHandle) {
    if tokio::signal::ctrl_c().await.is_ok() {
        eprintln!("Cancelling...");
        handle.cancel();
    }
}

async fn handle_cache_command(cmd: &CacheCommands, app: &App) -> anyhow::Result<()> {
    match cmd {
        CacheCommands::Stats => {
            let stats = app.cache.stats().await?;
            println!("Storage mode:   {:?}", stats.mode);
            match stats.sqlite_entries {
                Some(n) => println!("SQLite entries: {}", n),
                None => println!("SQLite entries: unavailable"),
            }
            println!("Local entries:  {}", stats.local_entries);
        }
        CacheCommands::Clear => {
            app.cache.clear().await?;
            println!("✓ Cache cleared");
        }
        CacheCommands::Purge => {
            let sqlite = app.cache.sqlite().context("SQLite cache is unavailable")?;
            let removed = sqlite.purge_expired().await?;
            println!("✓ Removed {} expired entries", removed);
        }
    }
    Ok(())
}

fn handle_config_command(cmd: &ConfigCommands, path: Option<&Path>) -> anyhow::Result<()> {
    let config_file = path
        .map(Path::to_path_buf)
        .unwrap_or_else(FollowGraphConfig::default_path);

    match cmd {
        ConfigCommands::Init { force } => {
            if config_file.exists() && !force {
                println!("Configuration already exists at {}", config_file.display());
                println!("Use --force to overwrite it.");
                return Ok(());
            }
            FollowGraphConfig::default().save(&config_file)?;
            println!("✓ Created configuration at {}", config_file.display());
            println!();
            println!("Next steps:");
            println!("  1. Set api.cookie to your session cookie");
            println!("  2. Check it works:  followgraph whoami");
            println!("  3. Build the graph: followgraph graph -o graph.json");
        }
        ConfigCommands::Show => {
            let mut config = FollowGraphConfig::load_or_default(&config_file)?;
            if config.api.cookie.is_some() {
                config.api.cookie = Some("<redacted>".to_string());
            }
            print!("{}", serde_yaml::to_string(&config)?);
        }
        ConfigCommands::Validate => {
            let config = FollowGraphConfig::load_or_default(&config_file)?;
            match validate_config(&config) {
                Ok(()) => println!("✓ Configuration is valid"),
                Err(errors) => {
                    for error in &errors {
                        println!("✗ {}", error);
                    }
                    bail!("{} configuration problem(s)", errors.len());
                }
            }
        }
    }
    Ok(())
}

fn print_page(uid: Uid, what: &str, page: u32, result: &RelationPage) {
    println!(
        "{} of {} (page {}): {} of {}",
        what,
        uid,
        page,
        result.items.len(),
        result.total_count
    );
    println!();
    for item in &result.items {
        print_item(item);
    }
}

fn print_item(item: &RelationItem) {
    let since = item
        .followed_at()
        .map(|t| t.format("%Y-%m-%d").to_string())
        .unwrap_or_default();
    println!(
        "{:>12}  {:<24} {:<14} {}",
        item.mid,
        item.uname,
        item.relation().label(),
        since
    );
    if !item.sign.is_empty() {
        println!("{:>12}  {}", "", item.sign);
    }
}

fn print_migration(stats: &MigrationStats) {
    println!("Migration finished:");
    println!("  total:    {}", stats.total);
    println!("  migrated: {}", stats.migrated);
    println!("  skipped:  {}", stats.skipped);
    println!("  failed:   {}", stats.failed);
    for error in &stats.errors {
        println!("  ✗ {}", error);
    }
}
