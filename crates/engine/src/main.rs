use std::sync::Arc;

use anyhow::Context;
use axum::http::{HeaderValue, Method};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tracing_subscriber::EnvFilter;

use ciris_domain::config::{Config, ConfigSeverity};
use ciris_engine::bootstrap::build_engine;
use ciris_engine::cli::{Cli, Command, ConfigCommand};
use ciris_engine::{api, EngineState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        None | Some(Command::Serve) => {
            init_tracing();
            let config = ciris_engine::cli::load_config(&cli.config)?;
            run_server(Arc::new(config)).await
        }
        Some(Command::Config(ConfigCommand::Validate)) => {
            let config = ciris_engine::cli::load_config(&cli.config)?;
            let issues = config.validate();
            for issue in &issues {
                let tag = match issue.severity {
                    ConfigSeverity::Warning => "warning",
                    ConfigSeverity::Error => "error",
                };
                println!("{tag}: {issue}");
            }
            if issues.iter().any(|i| i.severity == ConfigSeverity::Error) {
                std::process::exit(1);
            }
            println!("configuration ok");
            Ok(())
        }
        Some(Command::Config(ConfigCommand::Show)) => {
            let config = ciris_engine::cli::load_config(&cli.config)?;
            println!("{}", toml::to_string_pretty(&config)?);
            Ok(())
        }
        Some(Command::Version) => {
            println!("ciris {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

/// Structured JSON tracing for the serve command.
fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,ciris_engine=debug")),
        )
        .json()
        .init();
}

async fn run_server(config: Arc<Config>) -> anyhow::Result<()> {
    tracing::info!(occurrence_id = %config.runtime.occurrence_id, "CIRIS starting");

    // ── Config validation ────────────────────────────────────────────
    let issues = config.validate();
    for issue in &issues {
        match issue.severity {
            ConfigSeverity::Warning => tracing::warn!("config: {issue}"),
            ConfigSeverity::Error => tracing::error!("config: {issue}"),
        }
    }
    if issues.iter().any(|i| i.severity == ConfigSeverity::Error) {
        anyhow::bail!(
            "config validation failed with {} error(s)",
            issues
                .iter()
                .filter(|i| i.severity == ConfigSeverity::Error)
                .count()
        );
    }

    // ── Engine wiring ────────────────────────────────────────────────
    // Concrete adapters (chat transports, LLM providers, wisdom
    // authorities) are external collaborators; they register their
    // providers through this seam when embedded.
    let cancel = CancellationToken::new();
    let engine = build_engine(config.clone(), cancel.clone(), |_registry| Ok(()))
        .await
        .context("engine bootstrap")?;
    let state = engine.state.clone();

    // ── Processor round loop ─────────────────────────────────────────
    let processor_handle = tokio::spawn(engine.processor.clone().run());

    // ── Maintenance loops ────────────────────────────────────────────
    spawn_maintenance(state.clone());

    // ── Ctrl-C → orderly shutdown ────────────────────────────────────
    {
        let state = state.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("interrupt received; shutting down");
                if let Err(e) = state.control.shutdown("interrupt").await {
                    tracing::warn!(error = %e, "shutdown via control bus failed");
                    state.cancel.cancel();
                }
            }
        });
    }

    // ── HTTP server ──────────────────────────────────────────────────
    let cors_layer = build_cors_layer(&config);
    let app = api::router(state.clone())
        .layer(cors_layer)
        .layer(tower::limit::ConcurrencyLimitLayer::new(256))
        .with_state(state.clone());

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("binding to {addr}"))?;
    tracing::info!(addr = %addr, "CIRIS listening");

    let cancel_for_server = state.cancel.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move { cancel_for_server.cancelled().await })
        .await
        .context("axum server error")?;

    // Let the processor finish draining before exit.
    let _ = processor_handle.await;
    tracing::info!("CIRIS stopped; state preserved");
    Ok(())
}

/// Periodic janitors: dedupe eviction, session expiry, consent decay.
fn spawn_maintenance(state: EngineState) {
    {
        let state = state.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(std::time::Duration::from_secs(3600));
            loop {
                interval.tick().await;
                state.dedupe.evict_expired();
                state.sessions.evict_expired();
            }
        });
    }
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(std::time::Duration::from_secs(6 * 3600));
        loop {
            interval.tick().await;
            match state.storage.sweep_decayed_consent().await {
                Ok(subjects) if !subjects.is_empty() => {
                    tracing::info!(count = subjects.len(), "consent decay completed for subjects");
                }
                Ok(_) => {}
                Err(e) => tracing::warn!(error = %e, "consent decay sweep failed"),
            }
        }
    });
}

/// Build a CORS layer from the configured allowed origins. A trailing
/// `:*` wildcards the port segment; a literal `"*"` allows all origins.
fn build_cors_layer(config: &Config) -> CorsLayer {
    use axum::http::header;

    let cors = &config.server.cors;
    if cors.allowed_origins.len() == 1 && cors.allowed_origins[0] == "*" {
        tracing::warn!("CORS configured with wildcard \"*\" — all origins allowed");
        return CorsLayer::new()
            .allow_origin(tower_http::cors::Any)
            .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
            .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION]);
    }

    let mut exact: Vec<HeaderValue> = Vec::new();
    let mut wildcard_prefixes: Vec<String> = Vec::new();
    for origin in &cors.allowed_origins {
        if origin.ends_with(":*") {
            wildcard_prefixes.push(origin.trim_end_matches('*').to_owned());
        } else if let Ok(value) = origin.parse::<HeaderValue>() {
            exact.push(value);
        } else {
            tracing::warn!(origin = %origin, "invalid CORS origin, skipping");
        }
    }

    let allow_origin = if wildcard_prefixes.is_empty() {
        AllowOrigin::list(exact)
    } else {
        AllowOrigin::predicate(move |origin, _| {
            if exact.iter().any(|e| e.as_bytes() == origin.as_bytes()) {
                return true;
            }
            let origin_str = origin.to_str().unwrap_or("");
            // The remainder after the prefix must be digits only, so a
            // crafted host cannot ride the wildcard.
            wildcard_prefixes.iter().any(|prefix| {
                origin_str
                    .strip_prefix(prefix.as_str())
                    .map(|port| !port.is_empty() && port.chars().all(|c| c.is_ascii_digit()))
                    .unwrap_or(false)
            })
        })
    };

    CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION])
}
