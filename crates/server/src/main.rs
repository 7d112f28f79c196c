use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use kalends_api::{AppState, config::Config};
use kalends_core::conf::Conf;
use kalends_core::log::TracingLog;
use kalends_core::{Mutation, Store};
use tokio::signal;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    // Optional key=value configuration file for log destination and
    // verbosity; a malformed file is fatal.
    let conf_path = std::env::var("KALENDS_CONFIG")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/etc/kalends.conf"));
    let conf = Conf::read(&conf_path)
        .with_context(|| format!("{}", conf_path.display()))?;

    // The guard must stay alive so file logs are flushed on exit.
    let _guard = init_tracing(&conf)?;

    let config = Config::from_env().map_err(|e| anyhow::anyhow!(e))?;
    tracing::info!("configuration loaded; calendars in {}", config.caldir.display());

    let mut store = Store::open(&config.caldir, false)
        .await
        .with_context(|| format!("{}", config.caldir.display()))?;
    store.set_log(Arc::new(TracingLog));

    // The database stays bound to the uid that created it.
    let uid = i64::from(nix::unistd::getuid().as_raw());
    match store.owner_check_or_set(uid).await? {
        Mutation::Done(()) => {}
        Mutation::Constraint => bail!("database is owned by another user"),
    }

    let state = AppState {
        store,
        realm: config.realm.clone(),
    };

    tokio::select! {
        result = kalends_api::run(state, &config) => {
            result.context("server exited")?;
        }
        () = wait_for_shutdown() => {
            tracing::info!("shutdown signal received");
        }
    }

    Ok(())
}

async fn wait_for_shutdown() {
    let ctrl_c = async {
        if signal::ctrl_c().await.is_err() {
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut term) => {
                term.recv().await;
            }
            Err(_) => std::future::pending::<()>().await,
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
}

fn init_tracing(conf: &Conf) -> Result<Option<tracing_appender::non_blocking::WorkerGuard>> {
    // The file's debug knob maps onto an EnvFilter default; RUST_LOG
    // still wins when set.
    let default = match conf.verbose {
        0 => "info,sqlx=warn",
        1 => "debug,sqlx=warn",
        _ => "trace",
    };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| default.into());

    let stderr_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(true);

    let registry = tracing_subscriber::registry()
        .with(env_filter)
        .with(stderr_layer);

    if let Some(logfile) = &conf.logfile {
        let path = PathBuf::from(logfile);
        let dir = path.parent().unwrap_or(std::path::Path::new("."));
        let name = path.file_name().unwrap_or(std::ffi::OsStr::new("kalends.log"));
        let file_appender = tracing_appender::rolling::never(dir, name);
        let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

        let file_layer = tracing_subscriber::fmt::layer()
            .with_ansi(false)
            .with_writer(non_blocking);

        registry.with(file_layer).init();
        Ok(Some(guard))
    } else {
        registry.init();
        Ok(None)
    }
}
