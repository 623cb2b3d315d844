//! Thin binary for locally exercising the engine against a real project
//! directory: runs an initial scan, then the watcher loop. Not the
//! agent-facing stdio driver (out of scope per the engine's own docs) —
//! just enough to watch logs while developing against this crate.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{error, info};
use tracing_subscriber::prelude::*;

use probe_engine::config::{self, EngineConfig};
use probe_engine::context::EngineContext;
use probe_engine::watcher::FileWatcher;

#[tokio::main]
async fn main() -> Result<()> {
    init_logging();
    install_panic_hook();

    let project_root = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| std::env::current_dir().expect("current dir"));
    let project_root = dunce::canonicalize(&project_root)
        .with_context(|| format!("resolving project root {}", project_root.display()))?;

    let engine_config = EngineConfig::from_env();
    let workspace = match config::load_workspace_config(&project_root) {
        Ok(ws) => ws,
        Err(_) => {
            info!(path = %project_root.display(), "no workspace config found, initializing");
            config::init_workspace(&project_root, engine_config.preset)?
        }
    };

    info!(
        workspace_id = %workspace.workspace_id,
        repo_id = %workspace.repo_id,
        preset = %workspace.preset.as_str(),
        qdrant_url = %engine_config.qdrant_url,
        tei_url = %engine_config.tei_url,
        "probe engine starting"
    );

    let ctx = EngineContext::open(project_root, workspace.clone(), &engine_config)?;
    ctx.vector_store.ensure_collection(workspace.preset).await?;

    let watcher = FileWatcher::new(ctx);

    tokio::select! {
        result = Arc::clone(&watcher).run() => {
            if let Err(e) = result {
                error!(error = %e, "watcher loop exited with error");
            }
        }
        _ = shutdown_signal() => {
            info!("shutdown signal received");
        }
    }

    info!("probe engine shutdown complete");
    Ok(())
}

fn init_logging() {
    let log_dir = std::env::var("PROBE_LOG_DIR").ok();

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "probe_engine=info".into());

    let stdout_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_file(true)
        .with_line_number(true)
        .compact();

    let registry = tracing_subscriber::registry().with(env_filter).with(stdout_layer);

    if let Some(dir) = log_dir {
        std::fs::create_dir_all(&dir).ok();
        let file_appender = tracing_appender::rolling::daily(&dir, "probe-engine.log");
        let (non_blocking_writer, guard) = tracing_appender::non_blocking(file_appender);
        // Leaked deliberately: the guard must outlive the process, and this
        // binary has no later point to hand it ownership to.
        std::mem::forget(guard);
        let file_layer = tracing_subscriber::fmt::layer()
            .with_ansi(false)
            .with_writer(non_blocking_writer)
            .compact();
        registry.with(file_layer).init();
    } else {
        registry.init();
    }
}

fn install_panic_hook() {
    let default_panic = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        let location = info
            .location()
            .map(|l| format!("{}:{}:{}", l.file(), l.line(), l.column()))
            .unwrap_or_default();
        let payload = if let Some(s) = info.payload().downcast_ref::<&str>() {
            s.to_string()
        } else if let Some(s) = info.payload().downcast_ref::<String>() {
            s.clone()
        } else {
            "unknown panic payload".to_string()
        };
        error!(target: "probe_engine::panic", location = %location, payload = %payload, "PANIC: thread panicked");
        default_panic(info);
    }));
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
