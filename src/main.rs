mod config;
mod core;
mod grader;
mod harness;
mod interpreter;
mod repository;
mod runner;
mod server;

use anyhow::{Context, Result};
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::info;

use crate::config::{GraderConfig, ProblemSource};
use crate::grader::GradingService;
use crate::runner::ProcessExecutor;
use crate::server::AppState;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive("grader=info".parse()?),
        )
        .init();

    dotenvy::dotenv().ok();

    let config = GraderConfig::from_env()?;
    info!(
        "Runner: {} {:?} (time limit {} ms, memory {} MB, policy {})",
        config.runner.run_command.program,
        config.runner.run_command.args,
        config.runner.time_limit.as_millis(),
        config.runner.memory_limit_mb,
        config.runner.case_policy
    );

    if let Some(root) = &config.workspace_root {
        tokio::fs::create_dir_all(root)
            .await
            .with_context(|| format!("Failed to create workspace root {:?}", root))?;
        info!("Workspaces under {:?}", root);
    }

    match &config.problem_source {
        ProblemSource::Directory { root } => info!("Problems from directory {:?}", root),
        ProblemSource::Redis { url, key } => info!("Problems from Redis {} (key {})", url, key),
    }
    let repository = repository::from_source(&config.problem_source).await?;

    let executor = ProcessExecutor::from_config(&config.runner, config.workspace_root.clone());
    let grader = GradingService::new(
        Arc::new(executor),
        config.runner.harness_options(),
        config.runner.time_limit,
    );

    let state = Arc::new(AppState {
        time_limit: grader.default_time_limit(),
        grader,
        repository,
    });
    let app = server::router(state);

    let listener = TcpListener::bind(&config.bind_addr)
        .await
        .with_context(|| format!("Failed to bind {}", config.bind_addr))?;
    info!("Grader listening on {}", config.bind_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("HTTP server error")?;

    info!("Grader stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
