use super::output::{build_output, output_json, output_text};
use super::{ProgressReporter, Stats};
use crate::cancel::CancellationToken;
use crate::cli::{ConnectionArgs, Format, ScopeArgs};
use crate::config::{
    compile_exclude, normalize_host, parse_alias_specs, parse_languages, Concurrency, Connection, ServerKind, Settings,
};
use crate::error::StatError;
use crate::remote::{self, RetryPolicy};
use anyhow::Context;
use tracing::{info, warn};

pub fn exec(connection: ConnectionArgs, scope: ScopeArgs, format: Format, silent: bool) -> anyhow::Result<()> {
    let (connection, settings) = resolve(connection, scope)?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to start async runtime")?;

    runtime.block_on(run(connection, settings, format, silent))
}

/// Validates every option before any request is made.
fn resolve(connection: ConnectionArgs, scope: ScopeArgs) -> anyhow::Result<(Connection, Settings)> {
    let server: ServerKind = connection.server.parse()?;
    let aliases = parse_alias_specs(&scope.users).context("Failed to parse --user")?;
    let languages = parse_languages(&scope.langs).context("Failed to parse --lang")?;
    let exclude = compile_exclude(scope.exclude.as_deref()).context("Failed to parse --exclude")?;
    let host = normalize_host(connection.host.as_deref().unwrap_or_default())?;
    let token = connection
        .token
        .filter(|t| !t.is_empty())
        .ok_or_else(|| StatError::Config("missing token; pass --token or set GITLAB_TOKEN".to_string()))?;

    if languages.is_empty() {
        warn!("no languages configured (--lang), every file will be skipped");
    }

    let connection = Connection {
        server,
        host,
        token,
        rate_limit: connection.rate,
        retry: RetryPolicy {
            max_attempts: connection.retry,
            base_delay: connection.retry_delay,
            max_delay: connection.retry_max_delay,
        },
        timeout: connection.timeout,
    };
    let settings = Settings {
        aliases,
        languages,
        query: scope.query.filter(|q| !q.is_empty()),
        exclude,
        concurrency: Concurrency {
            repositories: scope.repo_concurrency,
            files: scope.concurrency,
        },
    };
    Ok((connection, settings))
}

async fn run(connection: Connection, settings: Settings, format: Format, silent: bool) -> anyhow::Result<()> {
    let cancel = CancellationToken::new();
    tokio::spawn({
        let cancel = cancel.clone();
        async move {
            shutdown_signal().await;
            warn!("interrupted, stopping");
            cancel.cancel();
        }
    });

    let service = remote::connect(&connection).context("Failed to create API client")?;
    let (progress, bar) = ProgressReporter::bar(!silent, cancel.clone());
    let stats = Stats::new(service, settings, cancel);
    let stats = stats.with_progress(progress);

    let per_user = stats.per_user().await;
    let output = build_output(
        connection.host.as_str(),
        stats.settings().query.as_deref(),
        stats.per_language().await,
        stats.total().await,
        per_user,
    );
    let error = stats.err().cloned();
    let summary = stats.summary().await;
    info!(?summary, "run complete");
    drop(stats);

    if let Some(bar) = bar {
        let _ = bar.await;
    }

    match error {
        Some(err) if err.is_cancelled() => {
            eprintln!("Interrupted, no statistics collected");
            return Ok(());
        }
        Some(err) => return Err(err).context("Failed to collect statistics"),
        None => {}
    }

    match format {
        Format::Json => output_json(&output)?,
        Format::Txt => output_text(&output)?,
    }

    Ok(())
}

/// Resolves on Ctrl-C, or on SIGTERM where available.
async fn shutdown_signal() {
    let interrupt = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!("cannot listen for Ctrl-C: {err}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                warn!("cannot listen for SIGTERM: {err}");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = interrupt => {}
        _ = terminate => {}
    }
}
