//! Sits between a retro MMO client and its login and game servers,
//! so their traffic can be watched.
mod config;

use ::std::io;
use ::std::path::Path;
use ::std::process::ExitCode;
use ::std::sync::Arc;

use ::anyhow::Context;
use ::clap::Parser;
use ::mitm::{sweep_loop, GameProxy, Listener, LoginProxy, MemoryCache, TicketCache};
use ::tokio::task::JoinSet;
use ::tokio_util::sync::CancellationToken;
use ::tracing_appender::non_blocking::WorkerGuard;
use ::tracing_subscriber::EnvFilter;

use config::Config;

/// Log to stderr, or to `--log-file` when given.
/// `RUST_LOG` overrides the level picked by `--debug`.
fn init_logging(config: &Config) -> ::anyhow::Result<Option<WorkerGuard>> {
    let default = if config.debug { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    let subscriber = ::tracing_subscriber::fmt().with_env_filter(filter);
    match &config.log_file {
        Some(path) => {
            let name = path.file_name().context("log file path has no file name")?;
            let dir = path
                .parent()
                .filter(|dir| !dir.as_os_str().is_empty())
                .unwrap_or_else(|| Path::new("."));
            let (writer, guard) = ::tracing_appender::non_blocking(::tracing_appender::rolling::never(dir, name));
            subscriber
                .with_writer(writer)
                .with_ansi(false)
                .try_init()
                .map_err(|e| ::anyhow::anyhow!(e))?;
            Ok(Some(guard))
        },
        None => {
            subscriber.try_init().map_err(|e| ::anyhow::anyhow!(e))?;
            Ok(None)
        },
    }
}

#[cfg(unix)]
async fn shutdown_signal() -> io::Result<&'static str> {
    use ::tokio::signal::unix::{signal, SignalKind};
    let mut interrupt = signal(SignalKind::interrupt())?;
    let mut terminate = signal(SignalKind::terminate())?;
    let mut hangup = signal(SignalKind::hangup())?;
    Ok(::tokio::select! {
        _ = interrupt.recv() => "SIGINT",
        _ = terminate.recv() => "SIGTERM",
        _ = hangup.recv() => "SIGHUP",
    })
}

#[cfg(not(unix))]
async fn shutdown_signal() -> io::Result<&'static str> {
    ::tokio::signal::ctrl_c().await?;
    Ok("ctrl-c")
}

async fn run(config: Config) -> ::anyhow::Result<()> {
    let cache: Arc<dyn TicketCache> = Arc::new(MemoryCache::new(config.ticket_ttl()));
    let cancel = CancellationToken::new();

    // Bind both before serving either, so a taken port fails fast.
    let login_proxy = LoginProxy::new(config.server.clone(), config.public.clone(), cache.clone());
    let login = Listener::bind(&config.login, login_proxy)
        .await
        .context("could not make login proxy")?;
    let game = Listener::bind(&config.game, GameProxy::new(cache.clone()))
        .await
        .context("could not make game proxy")?;
    ::tracing::info!(
        server = %config.server,
        public = %config.public,
        ticket_ttl = ?config.ticket_ttl(),
        "proxies ready",
    );

    let mut listeners = JoinSet::new();
    listeners.spawn({
        let cancel = cancel.clone();
        async move { login.serve(cancel).await.context("error while serving login proxy") }
    });
    listeners.spawn({
        let cancel = cancel.clone();
        async move { game.serve(cancel).await.context("error while serving game proxy") }
    });
    let sweeper = ::tokio::spawn(sweep_loop(cache, config.sweep_interval(), cancel.clone()));

    let result = ::tokio::select! {
        signal = shutdown_signal() => match signal {
            Ok(signal) => {
                ::tracing::info!(signal, "received signal");
                Ok(())
            },
            Err(e) => Err(e).context("could not listen for signals"),
        },
        Some(joined) = listeners.join_next() => match joined {
            Ok(served) => served,
            Err(e) => Err(e).context("proxy task failed"),
        },
    };

    cancel.cancel();
    while let Some(joined) = listeners.join_next().await {
        match joined {
            Ok(Ok(())) => (),
            Ok(Err(e)) => ::tracing::warn!("{:#}", e),
            Err(e) => ::tracing::warn!("proxy task failed: {}", e),
        }
    }
    sweeper.await.context("ticket sweep failed")?;
    result
}

#[::tokio::main]
async fn main() -> ExitCode {
    let config = Config::parse();
    if let Err(e) = config.validate() {
        eprintln!("{:#}", e);
        return ExitCode::from(2);
    }
    let _guard = match init_logging(&config) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("could not set up logging: {:#}", e);
            return ExitCode::FAILURE;
        },
    };
    match run(config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            ::tracing::error!("{:#}", e);
            ExitCode::FAILURE
        },
    }
}
