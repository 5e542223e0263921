// Copyright 2025 Fernando Borretti
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use std::path::PathBuf;
use std::sync::Arc;

use axum::Router;
use axum::http::HeaderName;
use axum::http::StatusCode;
use axum::http::header::CACHE_CONTROL;
use axum::http::header::CONTENT_TYPE;
use axum::response::Html;
use axum::routing::get;
use axum::routing::post;
use tokio::net::TcpListener;
use tokio::signal::ctrl_c;

use crate::cmd::serve::get::get_handler;
use crate::cmd::serve::post::auth_handler;
use crate::cmd::serve::post::post_handler;
use crate::cmd::serve::state::ServerState;
use crate::config::Config;
use crate::config::DATABASE_FILE;
use crate::error::ErrorReport;
use crate::error::Fallible;
use crate::error::fail;
use crate::remote::local::LocalBackend;

pub async fn start_server(directory: PathBuf, config: Config) -> Fallible<()> {
    if !directory.exists() {
        return fail("directory does not exist.");
    }
    let db_path = directory.join(DATABASE_FILE);
    let db_path = db_path
        .to_str()
        .ok_or_else(|| ErrorReport::new("invalid database path"))?;
    log::debug!("Opening database {db_path}");
    let backend = Arc::new(LocalBackend::open(db_path)?);

    let state = ServerState::new(backend.clone(), backend, &config);
    let status = state.monitor.wait_resolved().await;
    match &status.user {
        Some(user) => log::info!("Resuming session for {}", user.email),
        None => log::debug!("No session to resume"),
    }
    let follower = state.spawn_follower();
    let app = router(state.clone());

    let bind = config.bind_address();
    let listener = TcpListener::bind(&bind).await?;
    let url = format!("http://{bind}/");
    log::info!("Serving on {url}");
    if config.open_browser {
        // The listener is already bound, so the page will load.
        if let Err(e) = open::that(&url) {
            log::warn!("Could not open a browser: {e}");
        }
    }

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    log::info!("Shutting down");
    follower.abort();
    state.monitor.shutdown();
    state.sync.stop();
    Ok(())
}

pub fn router(state: ServerState) -> Router {
    let app = Router::new();
    let app = app.route("/", get(get_handler));
    let app = app.route("/", post(post_handler));
    let app = app.route("/auth", post(auth_handler));
    let app = app.route("/script.js", get(script));
    let app = app.route("/style.css", get(stylesheet));
    let app = app.fallback(not_found_handler);
    app.with_state(state)
}

async fn shutdown_signal() {
    if let Err(e) = ctrl_c().await {
        log::error!("Could not listen for shutdown: {e}");
    }
}

async fn script() -> (StatusCode, [(HeaderName, &'static str); 1], &'static str) {
    (
        StatusCode::OK,
        [(CONTENT_TYPE, "text/javascript")],
        include_str!("script.js"),
    )
}

async fn stylesheet() -> (StatusCode, [(HeaderName, &'static str); 2], &'static [u8]) {
    let bytes = include_bytes!("style.css");
    (
        StatusCode::OK,
        [
            (CONTENT_TYPE, "text/css"),
            (CACHE_CONTROL, "public, max-age=604800, immutable"),
        ],
        bytes,
    )
}

async fn not_found_handler() -> (StatusCode, Html<String>) {
    (StatusCode::NOT_FOUND, Html("Not Found".to_string()))
}
