use std::sync::Arc;

use anyhow::{bail, Context};
use chrono::{Local, TimeZone};
use clap::Parser;
use tokio::signal;
use tokio::sync::watch as tokio_watch;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use mdvault::{route, AppContext, Command, Config, FileEntry, FileRef, NewVersion};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let config = Config::parse();
    let context = AppContext::from_config(&config)
        .await
        .context("failed to initialize storage")?;

    match config.command {
        Command::Ls { path, recursive } => {
            let file = resolve(&context, &path).await?;
            let entry = if file.is_dir {
                context.files.read_directory(&file, recursive).await?
            } else {
                context.files.stat(&file).await?
            };
            print_entry(&entry, 0);
        }
        Command::Cat { path } => {
            let text = context.files.read_text(&address(&path)?).await?;
            print!("{}", text);
        }
        Command::Cp { source, target } => {
            let source = resolve(&context, &source).await?;
            let target = address(&target)?;
            context.files.copy_across_storage(&source, &target).await?;
            info!("Copied {} to {}", source.path, target.path);
        }
        Command::Mv { source, target } => {
            let source = resolve(&context, &source).await?;
            let target = address(&target)?;
            context.files.move_across_storage(&source, &target).await?;
        }
        Command::Snapshot { path, message } => {
            let file = address(&path)?;
            let content = context.files.read_text(&file).await?;
            let version = context
                .history
                .create_version(NewVersion {
                    path: &file.path,
                    content: &content,
                    message,
                    max_num: context.settings().history.max_num,
                })
                .await?;
            println!("{}", version.id);
        }
        Command::History { path } => {
            let file = address(&path)?;
            for version in context.history.list_versions(&file.path).await? {
                let created = Local
                    .timestamp_millis_opt(version.created_at)
                    .single()
                    .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
                    .unwrap_or_else(|| version.created_at.to_string());
                println!(
                    "{}\t{}\t{}",
                    version.id,
                    created,
                    version.message.unwrap_or_default()
                );
            }
        }
        Command::Show { path, id } => {
            let file = address(&path)?;
            match context.history.get_version(&file.path, &id).await {
                Some(content) => print!("{}", content),
                None => bail!("version {} of {} not found", id, file.path),
            }
        }
        Command::Forget { path, id } => {
            let file = address(&path)?;
            let remaining = context.history.delete_version(&file.path, &id).await?;
            info!("{} versions left for {}", remaining.len(), file.path);
        }
        Command::Watch { path } => {
            let file = resolve(&context, &path).await?;
            let watched = file.path.clone();
            let callback = Arc::new(move || println!("changed: {}", watched));
            let Some(handle) = context.files.watch(&file, callback).await else {
                bail!("cannot watch {}", file.path);
            };
            info!("Watching {} (Ctrl+C to stop)", file.path);

            let mut shutdown_rx = create_shutdown_signal();
            let _ = shutdown_rx.wait_for(|&v| v).await;
            handle.stop();
        }
        Command::Open { path } => {
            let file = resolve(&context, &path).await?;
            if !context.workspace.open(&file).await? {
                info!("{} is already open", file.path);
            }
            for opened in context.tree.subtree_paths(&file.path) {
                println!("{}", opened);
            }
        }
        Command::Recent { pin, clear } => {
            if clear {
                context.recent.clear().await?;
            } else if let Some(path) = pin {
                let file = address(&path)?;
                match context.recent.toggle_pin(&file.path).await? {
                    Some(pinned) => info!("{} pinned: {}", file.path, pinned),
                    None => bail!("{} is not a recent file", file.path),
                }
            } else {
                for recent in context.recent.sorted().await? {
                    let opened = Local
                        .timestamp_millis_opt(recent.last_opened)
                        .single()
                        .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
                        .unwrap_or_else(|| recent.last_opened.to_string());
                    let mark = if recent.pinned { "*" } else { " " };
                    let suffix = if recent.is_dir { "/" } else { "" };
                    println!("{} {}\t{}{}", mark, opened, recent.path, suffix);
                }
            }
        }
    }

    Ok(())
}

/// Route a typed address, making local relative paths absolute.
fn address(input: &str) -> anyhow::Result<FileRef> {
    let file = route(input);
    if file.storage_location == mdvault::StorageLocation::Local {
        let absolute = std::path::absolute(input)
            .with_context(|| format!("invalid path {}", input))?;
        return Ok(FileRef::local(absolute.display().to_string()));
    }
    Ok(file)
}

/// Route an address and learn whether it is a directory.
async fn resolve(context: &AppContext, input: &str) -> anyhow::Result<FileRef> {
    let mut file = address(input)?;
    let stat = context
        .files
        .stat(&file)
        .await
        .with_context(|| format!("cannot access {}", file.path))?;
    file.is_dir = stat.is_dir;
    Ok(file)
}

fn print_entry(entry: &FileEntry, depth: usize) {
    let indent = "  ".repeat(depth);
    if entry.is_dir {
        println!("{}{}/", indent, entry.name);
        for child in entry.children() {
            print_entry(child, depth + 1);
        }
    } else {
        println!("{}{}\t{}", indent, entry.name, entry.size);
    }
}

/// Create a shutdown signal that triggers on Ctrl+C or SIGTERM.
fn create_shutdown_signal() -> tokio_watch::Receiver<bool> {
    let (tx, rx) = tokio_watch::channel(false);

    tokio::spawn(async move {
        let ctrl_c = async {
            match signal::ctrl_c().await {
                Ok(()) => info!("Received Ctrl+C, stopping"),
                Err(e) => {
                    warn!("Failed to install Ctrl+C handler: {}", e);
                    std::future::pending::<()>().await;
                }
            }
        };

        #[cfg(unix)]
        let terminate = async {
            match signal::unix::signal(signal::unix::SignalKind::terminate()) {
                Ok(mut sigterm) => {
                    sigterm.recv().await;
                    info!("Received SIGTERM, stopping");
                }
                Err(e) => {
                    warn!("Failed to install SIGTERM handler: {}", e);
                    std::future::pending::<()>().await;
                }
            }
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = ctrl_c => {},
            _ = terminate => {},
        }

        let _ = tx.send(true);
    });

    rx
}
