use clap::{Parser, Subcommand};
use log::error;
use simsforge::commands::{maintenance_command, mod_command, profile_command};
use simsforge::config;
use simsforge::content::fake_score::{FakeScoreReport, ScoringMeta};
use simsforge::disk::profiler::BenchmarkOptions;
use simsforge::error::{AppError, Result};
use simsforge::install::installer::{DecisionSink, InstallDecision, InstallHooks, InstallRequest};
use simsforge::integrations::catalog::CatalogClient;
use simsforge::integrations::fake_reports::ReportClient;
use simsforge::logging;
use simsforge::state::event_state::EventPayload;
use simsforge::state::State;
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Local mod manager for The Sims 4: content-addressed cache, profiles and
/// symlink activation.
#[derive(Parser, Debug)]
#[command(name = "simsforge", version, about)]
struct Cli {
    /// Override the application data root (default: platform data dir)
    #[arg(long, global = true, env = "SIMSFORGE_DATA_ROOT")]
    data_root: Option<PathBuf>,

    /// The game's Mods folder (default: the configured one)
    #[arg(long, global = true, env = "SIMSFORGE_MODS_FOLDER")]
    mods_folder: Option<PathBuf>,

    /// Verbose console output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Manage profiles
    Profile {
        #[command(subcommand)]
        cmd: ProfileCmd,
    },
    /// Install and manage mods in the active profile
    Mod {
        #[command(subcommand)]
        cmd: ModCmd,
    },
    /// Benchmark the Mods volume and derive the concurrency budget
    Benchmark,
    /// Cache maintenance
    Cache {
        #[command(subcommand)]
        cmd: CacheCmd,
    },
    /// Factory reset: profiles, cache, Mods folder directories
    Reset {
        /// Skip the confirmation prompt
        #[arg(long)]
        yes: bool,
    },
    /// Persist the game's Mods folder location
    SetModsFolder { path: PathBuf },
}

#[derive(Subcommand, Debug)]
enum ProfileCmd {
    /// Create a profile (the first one becomes active)
    Create { name: String },
    /// Delete a profile (must not be active)
    Delete { id: Uuid },
    /// List profiles
    List,
    /// Set the active profile, or deactivate with --none
    SetActive {
        id: Option<Uuid>,
        #[arg(long)]
        none: bool,
    },
}

#[derive(Subcommand, Debug)]
enum ModCmd {
    /// Download, score and install a mod into the active profile
    Install {
        remote_mod_id: i64,
        /// Specific catalog file id (default: latest)
        #[arg(long)]
        file_id: Option<i64>,
        /// Install suspicious mods without asking
        #[arg(long)]
        assume_install: bool,
    },
    /// Remove a mod from the active profile
    Remove { remote_mod_id: i64 },
    /// Enable a mod
    Enable { remote_mod_id: i64 },
    /// Disable a mod without removing it
    Disable { remote_mod_id: i64 },
    /// List mods with a newer file in the catalog
    Updates,
    /// Update one mod to its latest file
    Update { remote_mod_id: i64 },
    /// Update every outdated mod
    UpdateAll,
}

#[derive(Subcommand, Debug)]
enum CacheCmd {
    /// Remove orphaned cache entries and temp downloads
    Clear,
    /// Show cache statistics
    Stats,
}

/// Interactive stdin prompt for suspicious mods.
struct PromptDecisionSink;

#[async_trait::async_trait]
impl DecisionSink for PromptDecisionSink {
    async fn decide(&self, report: &FakeScoreReport, meta: &ScoringMeta) -> InstallDecision {
        println!(
            "\n'{}' looks suspicious (score {}/100):",
            meta.title, report.score
        );
        for reason in &report.reasons {
            println!("  - {}", reason);
        }
        println!("[i]nstall anyway / [c]ancel / [r]eport: ");

        let answer = tokio::task::spawn_blocking(|| {
            let mut line = String::new();
            std::io::stdin().read_line(&mut line).ok();
            line
        })
        .await
        .unwrap_or_default();

        match answer.trim().to_lowercase().as_str() {
            "i" | "install" => InstallDecision::Install,
            "r" | "report" => InstallDecision::Report,
            _ => InstallDecision::Cancel,
        }
    }
}

fn print_event(payload: &EventPayload) {
    match (&payload.error, payload.progress) {
        (Some(err), _) => eprintln!("error: {} ({})", payload.message, err),
        (None, Some(pct)) => println!("[{:>3.0}%] {}", pct, payload.message),
        (None, None) => println!("       {}", payload.message),
    }
}

async fn resolve_mods_folder(cli_flag: &Option<PathBuf>, state: &State) -> Option<PathBuf> {
    match cli_flag {
        Some(path) => Some(path.clone()),
        None => state.settings_manager.get().await.mods_folder,
    }
}

async fn run(cli: Cli) -> Result<()> {
    let state = State::new().await?;
    state
        .events
        .subscribe(Box::new(|payload| print_event(payload)))
        .await;

    let mods_folder = resolve_mods_folder(&cli.mods_folder, &state).await;
    let settings = state.settings_manager.get().await;
    let catalog = CatalogClient::new(
        settings.catalog_base_url.clone(),
        state.settings_manager.catalog_api_key().await,
    );
    let reports = ReportClient::new(settings.report_base_url.clone());

    match cli.command {
        Command::Profile { cmd } => match cmd {
            ProfileCmd::Create { name } => {
                let profile = profile_command::create_profile(&state, &name).await?;
                println!("Created profile '{}' ({})", profile.name, profile.id);
            }
            ProfileCmd::Delete { id } => {
                profile_command::delete_profile(&state, id).await?;
                println!("Deleted profile {}", id);
            }
            ProfileCmd::List => {
                let active = state.profile_manager.active_profile_id().await;
                for profile in profile_command::list_profiles(&state).await {
                    let marker = if Some(profile.id) == active { "*" } else { " " };
                    println!(
                        "{} {}  {}  ({} mods)",
                        marker,
                        profile.id,
                        profile.name,
                        profile.mods.len()
                    );
                }
            }
            ProfileCmd::SetActive { id, none } => {
                let target = if none { None } else { id };
                if target.is_none() && !none {
                    return Err(AppError::InvalidProfile(
                        "pass a profile id or --none".to_string(),
                    ));
                }
                profile_command::set_active_profile(&state, target, mods_folder.as_deref())
                    .await?;
                println!("Active profile is now {:?}", target);
            }
        },
        Command::Mod { cmd } => match cmd {
            ModCmd::Install {
                remote_mod_id,
                file_id,
                assume_install,
            } => {
                let prompt = PromptDecisionSink;
                let hooks = InstallHooks {
                    decision: if assume_install { None } else { Some(&prompt) },
                    reports: Some(&reports),
                    cancel: CancellationToken::new(),
                };
                let outcome = mod_command::install_mod(
                    &state,
                    &catalog,
                    InstallRequest {
                        remote_mod_id,
                        file_id,
                        mods_folder: mods_folder.clone(),
                    },
                    hooks,
                )
                .await?;
                println!(
                    "Installed '{}' (fingerprint {})",
                    outcome.archive_name,
                    &outcome.fingerprint[..12usize.min(outcome.fingerprint.len())]
                );
            }
            ModCmd::Remove { remote_mod_id } => {
                mod_command::remove_mod(&state, remote_mod_id, mods_folder.as_deref()).await?;
                println!("Removed mod {}", remote_mod_id);
            }
            ModCmd::Enable { remote_mod_id } => {
                mod_command::toggle_mod(&state, remote_mod_id, true, mods_folder.as_deref())
                    .await?;
                println!("Enabled mod {}", remote_mod_id);
            }
            ModCmd::Disable { remote_mod_id } => {
                mod_command::toggle_mod(&state, remote_mod_id, false, mods_folder.as_deref())
                    .await?;
                println!("Disabled mod {}", remote_mod_id);
            }
            ModCmd::Updates => {
                let candidates = mod_command::updates_available(&state, &catalog).await?;
                if candidates.is_empty() {
                    println!("Everything is up to date");
                }
                for candidate in candidates {
                    println!(
                        "{}  {}: {} -> {}",
                        candidate.remote_mod_id,
                        candidate.display_name,
                        candidate.installed_archive,
                        candidate.latest_archive
                    );
                }
            }
            ModCmd::Update { remote_mod_id } => {
                let outcome = mod_command::update_mod(
                    &state,
                    &catalog,
                    remote_mod_id,
                    mods_folder.as_deref(),
                    InstallHooks {
                        reports: Some(&reports),
                        ..InstallHooks::default()
                    },
                )
                .await?;
                println!("Updated to '{}'", outcome.archive_name);
            }
            ModCmd::UpdateAll => {
                let outcomes =
                    mod_command::update_all(&state, &catalog, mods_folder.as_deref()).await?;
                println!("Updated {} mods", outcomes.len());
            }
        },
        Command::Benchmark => {
            let folder = mods_folder.ok_or_else(|| {
                AppError::Config("no Mods folder configured; pass --mods-folder".to_string())
            })?;
            let config =
                maintenance_command::benchmark_disk(&state, &folder, BenchmarkOptions::default())
                    .await?;
            println!(
                "{:?} at {} MB/s -> pool size {} (symlinks supported: {})",
                config.disk_type,
                config.disk_speed_mbps,
                config.pool_size,
                config.symlinks_supported
            );
        }
        Command::Cache { cmd } => match cmd {
            CacheCmd::Clear => {
                let report = maintenance_command::clear_cache(&state).await?;
                println!(
                    "Removed {} entries, freed {} bytes",
                    report.removed, report.freed_bytes
                );
            }
            CacheCmd::Stats => {
                let stats = maintenance_command::cache_stats(&state).await;
                println!(
                    "{} entries, {} bytes, used by {} profiles",
                    stats.entries, stats.total_bytes, stats.distinct_profiles
                );
            }
        },
        Command::Reset { yes } => {
            if !yes {
                return Err(AppError::Config(
                    "reset deletes all profiles and the cache; re-run with --yes".to_string(),
                ));
            }
            let report =
                maintenance_command::reset_everything(&state, mods_folder.as_deref()).await?;
            println!(
                "Reset done: {} Mods folder directories removed, {} profiles deleted, {} cache entries freed",
                report.mods_dirs_removed, report.profiles_deleted, report.gc.removed
            );
        }
        Command::SetModsFolder { path } => {
            let mut settings = state.settings_manager.get().await;
            settings.mods_folder = Some(path.clone());
            state.settings_manager.set(settings).await?;
            println!("Mods folder set to {}", path.display());
        }
    }

    Ok(())
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    config::set_data_root(cli.data_root.clone());
    if let Err(e) = logging::setup_logging(cli.verbose).await {
        eprintln!("Failed to initialize logging: {}", e);
    }

    if let Err(e) = run(cli).await {
        error!("Command failed: {}", e);
        eprintln!("error: {}", e);
        std::process::exit(e.exit_code());
    }
}
