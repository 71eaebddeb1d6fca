use std::sync::Arc;
#[cfg(unix)]
use std::{fs, path::Path};

use actix_web::{middleware::Logger, web, App, HttpServer};
use thiserror::Error;
use tracing::info;
use xfer_bridge_domain::config::{ApiConfig, ConfigError};
use xfer_bridge_domain::services::telemetry::{init_telemetry, TelemetryConfig, TelemetryError};
use xfer_bridge_domain::storage::StorageError;
use xfer_bridge_monitor::ChannelNotifier;
use xfer_bridge_storage::SeaOrmStorage;

use crate::{
    handlers::{
        intent_status_handler, metrics_handler, register_intent_handler,
        requeue_settlement_handler,
    },
    state::AppState,
};

pub async fn run() -> Result<(), BootstrapError> {
    let config = ApiConfig::load_from_env()?;
    let telemetry = init_telemetry(&TelemetryConfig::from_env("API"))?;
    let storage = SeaOrmStorage::connect_with(config.database()).await?;
    let (notifier, _delivery) = ChannelNotifier::from_config(config.notifier());
    let state = AppState::new(
        storage,
        telemetry,
        Arc::new(notifier),
        config.default_intent_ttl(),
        config.asset_decimals().clone(),
    );

    // With a dedicated internal listener, operator routes move off the
    // public one.
    let internal_listener = config.has_internal_listener();

    let public_state = state.clone();
    let mut public_server = HttpServer::new(move || {
        let app = App::new()
            .app_data(web::Data::new(public_state.clone()))
            .wrap(Logger::default())
            .configure(public_routes);
        if internal_listener {
            app
        } else {
            app.configure(internal_routes)
        }
    });

    #[cfg(unix)]
    {
        if let Some(socket) = config.api_unix_socket() {
            cleanup_socket(socket)?;
            public_server = public_server.bind_uds(socket)?;
        } else {
            public_server = public_server.bind(config.api_bind_address())?;
        }
    }

    #[cfg(not(unix))]
    {
        if let Some(socket) = config.api_unix_socket() {
            return Err(BootstrapError::Io(std::io::Error::other(format!(
                "unix socket '{socket}' requested but this platform does not support it"
            ))));
        }
        public_server = public_server.bind(config.api_bind_address())?;
    }

    info!(
        bind = config.api_unix_socket().unwrap_or(config.api_bind_address()),
        internal_listener, "api listening"
    );
    let public_server = public_server.run();

    let internal_server = if internal_listener {
        let internal_state = state.clone();
        let mut internal_server = HttpServer::new(move || {
            App::new()
                .app_data(web::Data::new(internal_state.clone()))
                .wrap(Logger::default())
                .configure(internal_routes)
        });

        #[cfg(unix)]
        {
            if let Some(socket) = config.internal_unix_socket() {
                cleanup_socket(socket)?;
                internal_server = internal_server.bind_uds(socket)?;
            } else if let Some(addr) = config.internal_bind_address() {
                internal_server = internal_server.bind(addr)?;
            } else {
                return Err(BootstrapError::Io(std::io::Error::other(
                    "internal listener configured but no bind target provided",
                )));
            }
        }

        #[cfg(not(unix))]
        {
            if let Some(socket) = config.internal_unix_socket() {
                return Err(BootstrapError::Io(std::io::Error::other(format!(
                    "internal unix socket '{socket}' requested but this platform does not support it"
                ))));
            }
            if let Some(addr) = config.internal_bind_address() {
                internal_server = internal_server.bind(addr)?;
            } else {
                return Err(BootstrapError::Io(std::io::Error::other(
                    "internal listener configured but no bind target provided",
                )));
            }
        }

        Some(internal_server.run())
    } else {
        None
    };

    if let Some(internal) = internal_server {
        tokio::try_join!(public_server, internal)?;
    } else {
        public_server.await?;
    }

    Ok(())
}

/// Intent registration and lookup.
pub fn public_routes(cfg: &mut web::ServiceConfig) {
    cfg.route("/api/v1/intents", web::post().to(register_intent_handler))
        .route("/api/v1/intents/{id}", web::get().to(intent_status_handler));
}

/// Operator surface: metrics and manual settlement requeue.
pub fn internal_routes(cfg: &mut web::ServiceConfig) {
    cfg.route("/metrics", web::get().to(metrics_handler)).route(
        "/api/v1/intents/{id}/requeue",
        web::post().to(requeue_settlement_handler),
    );
}

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error("config error: {0}")]
    Config(#[from] ConfigError),
    #[error("telemetry error: {0}")]
    Telemetry(#[from] TelemetryError),
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// A socket file left behind by an unclean exit makes `bind_uds` fail.
#[cfg(unix)]
fn cleanup_socket(path: &str) -> std::io::Result<()> {
    let socket_path = Path::new(path);
    if socket_path.exists() {
        fs::remove_file(socket_path)?;
    }
    Ok(())
}
