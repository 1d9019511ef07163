use anyhow::Result;
use std::sync::Arc;
use tracing::{error, info};

use crate::operator;
use crate::server::rest::create_router;
use crate::shared::{AppState, Config};

pub async fn run_rest_server(config: Config) -> Result<()> {
    // Log startup banner
    info!(
        r#"
      _          _
 _ __| |__   ___| |_ ___  _ __
| '__| '_ \ / _ \ __/ _ \| '__|
| |  | | | |  __/ || (_) | |
|_|  |_| |_|\___|\__\___/|_|

Starting Rhetor provisioning service...
PID: {}
"#,
        std::process::id()
    );

    info!("Connecting to Docker...");
    let sessions = match operator::build(&config).await {
        Ok(sessions) => {
            info!("Connected to Docker successfully!");
            sessions
        }
        Err(e) => {
            error!("Failed to initialize session manager: {:#}", e);
            error!("Please ensure Docker is running and DOCKER_SOCKET is set correctly");
            return Err(e);
        }
    };

    if let Err(e) = tokio::fs::create_dir_all(sessions.workspaces().root()).await {
        error!(
            "Workspace root {} is not usable: {}",
            sessions.workspaces().root().display(),
            e
        );
        return Err(e.into());
    }

    let app_state = Arc::new(AppState::new(sessions.clone()));

    info!("Building REST API routes...");
    let app = create_router(app_state);

    let bind_addr = format!("{}:{}", config.server.host, config.server.port);
    info!("Binding to: {}", bind_addr);
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;

    info!("Server started successfully!");
    info!(
        "Port range: [{}, {}), app offset +{}",
        config.ports.min, config.ports.max, config.ports.app_offset
    );
    info!("OpenAPI JSON: http://{}/api-docs/openapi.json", bind_addr);
    info!("Ready to accept requests...");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Shutting down Rhetor server...");
    if config.drain_on_shutdown {
        let active = sessions.sessions().len();
        let drained = sessions.drain().await;
        if drained < active {
            error!("{} of {} sessions could not be drained", active - drained, active);
        } else {
            info!("Drained {} sessions", drained);
        }
    }

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!("Failed to listen for SIGTERM: {}", e);
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
}
