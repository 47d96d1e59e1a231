//! Subcommand handlers.

use std::path::Path;

use litreview_core::config::load_config;
use litreview_core::store::RunHistory;
use litreview_core::{DashboardConfig, PipelineApi, PipelineController};

use crate::render::{ProgressPrinter, history_line, results_summary};
use crate::{Commands, ConfigAction};

pub async fn handle_command(command: Commands, workspace: &Path) -> anyhow::Result<()> {
    match command {
        Commands::Config { action } => handle_config(action, workspace),
        Commands::Run {
            keywords,
            max_papers,
        } => {
            let config = load(workspace)?;
            handle_run(keywords, max_papers, &config).await
        }
        Commands::Status { session_id } => {
            let config = load(workspace)?;
            handle_status(&session_id, &config).await
        }
        Commands::History { clear } => {
            let config = load(workspace)?;
            handle_history(clear, &config)
        }
        Commands::Health => {
            let config = load(workspace)?;
            let api = api(&config)?;
            let health = api.health().await?;
            println!("{}", serde_json::to_string_pretty(&health)?);
            Ok(())
        }
    }
}

fn load(workspace: &Path) -> anyhow::Result<DashboardConfig> {
    load_config(Some(workspace), None).map_err(|e| anyhow::anyhow!("Configuration error: {}", e))
}

fn api(config: &DashboardConfig) -> anyhow::Result<PipelineApi> {
    Ok(PipelineApi::new(
        &config.backend.api_base_url,
        config.backend.request_timeout(),
    )?)
}

fn handle_config(action: ConfigAction, workspace: &Path) -> anyhow::Result<()> {
    match action {
        ConfigAction::Init => {
            let config_dir = workspace.join(".litreview");
            std::fs::create_dir_all(&config_dir)?;

            let config_path = config_dir.join("config.toml");
            if config_path.exists() {
                println!(
                    "Configuration file already exists at: {}",
                    config_path.display()
                );
                return Ok(());
            }

            let toml_str = toml::to_string_pretty(&DashboardConfig::default())?;
            std::fs::write(&config_path, &toml_str)?;
            println!(
                "Created default configuration at: {}",
                config_path.display()
            );
            Ok(())
        }
        ConfigAction::Show => {
            let config = load(workspace)?;
            let toml_str = toml::to_string_pretty(&config)?;
            println!("{}", toml_str);
            Ok(())
        }
    }
}

async fn handle_run(
    keywords: Vec<String>,
    max_papers: u32,
    config: &DashboardConfig,
) -> anyhow::Result<()> {
    let mut controller = PipelineController::from_config(config)?;
    let store = controller.store().clone();

    let started = controller.submit(&keywords, max_papers).await?;
    println!("Started run {} ({})", started.session_id, started.message);

    let mut revisions = store.subscribe();
    let mut states = controller.live().subscribe_state();
    let mut printer = ProgressPrinter::default();
    let mut interrupted = false;

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                interrupted = true;
                break;
            }
            changed = revisions.changed() => {
                if changed.is_err() {
                    break;
                }
                let settled = store.read(|s| {
                    for line in printer.changes(s) {
                        println!("{line}");
                    }
                    !s.is_running()
                });
                if settled {
                    break;
                }
            }
            changed = states.changed() => {
                if changed.is_err() {
                    break;
                }
                let state = *states.borrow_and_update();
                tracing::info!(state = %state, "Live connection");
            }
        }
    }

    controller.shutdown().await;
    if interrupted {
        println!("Interrupted. The backend keeps running session {}.", started.session_id);
        return Ok(());
    }

    println!();
    store.read(|s| {
        for line in results_summary(s) {
            println!("{line}");
        }
    });
    match store.read(|s| s.error().map(str::to_string)) {
        Some(error) => anyhow::bail!("Run failed: {}", error),
        None => Ok(()),
    }
}

async fn handle_status(session_id: &str, config: &DashboardConfig) -> anyhow::Result<()> {
    let status = api(config)?.pipeline_status(session_id).await?;
    println!("{}", serde_json::to_string_pretty(&status)?);
    Ok(())
}

fn handle_history(clear: bool, config: &DashboardConfig) -> anyhow::Result<()> {
    let Some(path) = config.history.resolved_path() else {
        anyhow::bail!("No data directory available for run history");
    };
    let mut history = RunHistory::load(path, config.history.max_history_size);
    if clear {
        history.clear();
        println!("Run history cleared.");
        return Ok(());
    }
    if history.is_empty() {
        println!("No runs recorded yet.");
        return Ok(());
    }
    println!("Recent runs ({}/{}):", history.len(), history.max_size());
    for (index, entry) in history.entries().enumerate() {
        println!("{}", history_line(index, entry));
    }
    Ok(())
}
