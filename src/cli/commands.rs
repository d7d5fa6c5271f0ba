//! CLI subcommands: serve, reset, status, config.

use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::server::{self, AppState};
use crate::whatsapp::{Exit, Session, SessionStore, Supervisor};

/// Run the supervisor and the HTTP server until either stops.
pub(crate) async fn cmd_serve(config: Config) -> Result<()> {
    let shutdown = CancellationToken::new();
    spawn_signal_handler(shutdown.clone());

    let (session, commands) = Session::new();
    let supervisor = Supervisor::open(&config, session.clone(), commands, shutdown.clone()).await?;
    let state = AppState::new(
        session,
        config.auth.token.clone(),
        config.session.exit_on_logout,
    );

    let (exit, served) = tokio::join!(
        async {
            let exit = supervisor.run().await;
            shutdown.cancel();
            exit
        },
        async {
            let served = server::serve(&config.server, state, shutdown.clone()).await;
            shutdown.cancel();
            served
        },
    );
    served?;

    match exit? {
        Exit::LoggedOut => tracing::info!("Session cleared, exiting so the service restarts"),
        Exit::Shutdown => tracing::info!("Shut down cleanly"),
    }
    Ok(())
}

fn spawn_signal_handler(token: CancellationToken) {
    tokio::spawn(async move {
        shutdown_signal().await;
        tracing::info!("Shutdown signal received");
        token.cancel();
    });
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!("Failed to listen for ctrl-c: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::warn!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}

/// Delete stored credentials
pub(crate) async fn cmd_reset(config: &Config) -> Result<()> {
    let auth_dir = config.session.auth_dir();
    SessionStore::remove_dir(&auth_dir)
        .with_context(|| format!("Failed to remove {}", auth_dir.display()))?;
    println!("Stored credentials removed: {}", auth_dir.display());
    println!("The next start will show a new QR code.");
    Ok(())
}

/// Report the stored pairing without connecting
pub(crate) async fn cmd_status(config: &Config) -> Result<()> {
    let path = config.session.store_path();
    if !path.exists() {
        println!("No stored session ({})", path.display());
        return Ok(());
    }

    let store = SessionStore::open(&path)
        .await
        .with_context(|| format!("Failed to open session store at {}", path.display()))?;

    match store.paired_user().await? {
        Some(user) => {
            println!("Paired as {}", user.id);
            if let Some(name) = user.name {
                println!("Name: {}", name);
            }
        }
        None if store.is_paired().await? => println!("Device registered, pairing not completed"),
        None => println!("No paired device"),
    }
    println!("Store: {}", path.display());
    Ok(())
}

/// Show configuration
pub(crate) fn cmd_config(config: &Config) -> Result<()> {
    print!("{}", config.to_toml()?);
    Ok(())
}
