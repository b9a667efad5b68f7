mod api;
mod config;
mod dates;
mod gate;
mod routes;
mod session;
mod urls;
mod web;

use config::{load as config_load, validate as config_validate};
use session::SharedSession;
use std::sync::{
    Arc, Mutex,
    atomic::{AtomicBool, Ordering},
};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = match config_load() {
        Ok(config) => config,
        Err(err) => {
            eprintln!("Configuration error: {err}");
            std::process::exit(1);
        }
    };

    if let Err(err) = config_validate(&config) {
        eprintln!("Configuration error: {err}");
        std::process::exit(1);
    }

    info!(
        api_config = ?config.api.sanitized_for_log(),
        session_path = %config.session.path,
        web_port = config.web.port,
        "Effective configuration loaded"
    );

    let urls = match urls::ApiUrls::from_config(&config.api) {
        Ok(urls) => urls,
        Err(err) => {
            error!(error = %err, "Invalid API host");
            std::process::exit(1);
        }
    };

    let directory = match api::DirectoryClient::new(&config.api, urls) {
        Ok(client) => client,
        Err(err) => {
            error!(error = %err, "Failed to create directory client");
            std::process::exit(1);
        }
    };

    let session: SharedSession = match session::SqliteSessionStore::open(&config.session.path) {
        Ok(store) => Arc::new(Mutex::new(store)),
        Err(err) => {
            error!(error = %err, "Failed to open session store");
            std::process::exit(1);
        }
    };

    let running = Arc::new(AtomicBool::new(true));
    let running_signal = Arc::clone(&running);

    if let Err(err) = ctrlc::set_handler(move || {
        info!("Ctrl-C received, shutting down gracefully");
        running_signal.store(false, Ordering::SeqCst);
    }) {
        error!(error = %err, "Error setting Ctrl-C handler");
        std::process::exit(1);
    }

    info!(api_host = %config.api.host(), "memberdir starting");

    let state = web::AppState::new(session, Arc::new(directory));
    if let Err(err) = web::start(state, config.web.port, running) {
        error!(error = %err, "Web server failed");
        std::process::exit(1);
    }

    info!("memberdir stopped");
}
