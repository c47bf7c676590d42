use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::sync::broadcast::error::RecvError;
use tracing::warn;
use tracing_subscriber::EnvFilter;

use workspace_files::cli::{Cli, Commands, OutputFormat, RootsAction};
use workspace_files::config::WorkspaceConfig;
use workspace_files::tree::{CacheServices, TreeNode};
use workspace_files::workspace::roots::normalize;
use workspace_files::workspace::{Workspace, WorkspaceOptions};
use workspace_files::{ops, output, search};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let workspace_dir = cli.workspace;

    match cli.command {
        Commands::Tree {
            path,
            depth,
            status,
            format,
        } => {
            let ws = open(&workspace_dir, false).await?;
            let tops: Vec<Arc<TreeNode>> = match path {
                Some(path) => vec![locate(&ws, &path).await?],
                None => ws.root_nodes().to_vec(),
            };
            for node in &tops {
                node.expand(depth).await;
            }
            if status {
                refresh_statuses(&tops, depth).await;
            }
            output::print_tree(&tops, depth, format);
        }

        Commands::Search {
            query,
            path,
            limit,
            format,
        } => {
            let ws = open(&workspace_dir, false).await?;
            let limit = limit.unwrap_or(ws.config().search_limit);
            let hits = match path {
                Some(path) => search::collect(vec![locate(&ws, &path).await?], &query, limit).await,
                None => ws.search(&query, limit).await,
            };
            output::print_search(&hits, format);
        }

        Commands::Status { path, format } => {
            let config = WorkspaceConfig::load(&workspace_dir);
            let services = CacheServices::new(&config);
            let path = normalize(&path);
            let status = services.status.get_status_async(&path).await;
            output::print_status(&path, status, format);
        }

        Commands::Roots { action } => {
            let ws = open(&workspace_dir, false).await?;
            match action {
                RootsAction::List { format } => output::print_roots(&ws.roots(), format),
                RootsAction::Add { dir } => {
                    if !ws.add_root(&dir).await? {
                        warn!(dir = %dir.display(), "already a root");
                    }
                    output::print_roots(&ws.roots(), OutputFormat::Compact);
                }
                RootsAction::Remove { dir } => {
                    if !ws.remove_root(&dir).await? {
                        anyhow::bail!("'{}' is not a configured root", dir.display());
                    }
                    output::print_roots(&ws.roots(), OutputFormat::Compact);
                }
            }
        }

        Commands::Watch {
            path,
            depth,
            max_events,
            format,
        } => {
            let ws = open(&workspace_dir, true).await?;
            let mut events = ws.subscribe();
            let scope = match path {
                Some(path) => {
                    let node = locate(&ws, &path).await?;
                    node.expand(depth).await;
                    eprintln!("watching {}, Ctrl-C to stop", node.path().display());
                    Some(node.path().to_path_buf())
                }
                None => {
                    ws.expand(depth).await;
                    eprintln!("watching {} root(s), Ctrl-C to stop", ws.root_nodes().len());
                    None
                }
            };

            let mut seen = 0usize;
            loop {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => break,
                    received = events.recv() => match received {
                        Ok(event) => {
                            if scope.as_ref().is_some_and(|scope| !event.path.starts_with(scope)) {
                                continue;
                            }
                            output::print_event(&event, format);
                            seen += 1;
                            if max_events.is_some_and(|max| seen >= max) {
                                break;
                            }
                        }
                        Err(RecvError::Lagged(skipped)) => {
                            warn!(skipped, "notifications dropped");
                        }
                        Err(RecvError::Closed) => break,
                    },
                }
            }
            ws.close().await;
        }

        Commands::NewFile { dir, name } => {
            let created = ops::create_file(&dir, &name)?;
            println!("{}", created.display());
        }

        Commands::NewFolder { dir, name } => {
            let created = ops::create_folder(&dir, &name)?;
            println!("{}", created.display());
        }

        Commands::Delete { path } => {
            let ws = open(&workspace_dir, false).await?;
            match ws.locate(&path).await {
                Some(node) => ops::delete(&node)?,
                None => ops::delete_path(&path)?,
            }
            println!("{}", path.display());
        }

        Commands::Rename { path, new_name } => {
            let ws = open(&workspace_dir, false).await?;
            let renamed = match ws.locate(&path).await {
                Some(node) => ops::rename(&node, &new_name)?,
                None => ops::rename_path(&path, &new_name)?,
            };
            println!("{}", renamed.display());
        }

        Commands::Move { dir, sources } => {
            let ws = open(&workspace_dir, false).await?;
            let mut nodes = Vec::with_capacity(sources.len());
            for source in &sources {
                nodes.extend(ws.locate(source).await);
            }
            let moved = match ws.locate(&dir).await {
                Some(target) if nodes.len() == sources.len() => {
                    ops::move_nodes(&target, &nodes)?
                }
                _ => ops::move_into(&dir, &sources)?,
            };
            for path in moved {
                println!("{}", path.display());
            }
        }
    }

    Ok(())
}

async fn open(dir: &Path, watch: bool) -> Result<Workspace> {
    let mut options = WorkspaceOptions::load(dir)?;
    options.watch = watch;
    Ok(Workspace::open_with(dir, options).await)
}

async fn locate(ws: &Workspace, path: &Path) -> Result<Arc<TreeNode>> {
    ws.locate(path)
        .await
        .with_context(|| format!("'{}' is not visible under any root", path.display()))
}

/// Refresh git status of every materialized node within `depth` levels.
async fn refresh_statuses(tops: &[Arc<TreeNode>], depth: usize) {
    let mut level = tops.to_vec();
    for remaining in (0..=depth).rev() {
        let mut next = Vec::new();
        for node in &level {
            node.refresh_status().await;
            if remaining > 0
                && let Some(children) = node.children_snapshot()
            {
                next.extend(children.iter().map(Arc::clone));
            }
        }
        level = next;
    }
}
