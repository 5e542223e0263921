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

use axum::Form;
use axum::extract::State;
use axum::response::Redirect;
use rand::thread_rng;
use serde::Deserialize;

use crate::cmd::serve::state::ServerState;
use crate::gateway::LoginOutcome;
use crate::gateway::RegisterOutcome;

#[derive(Debug, Deserialize)]
enum Action {
    Flip,
    Next,
    Previous,
    Shuffle,
    Delete,
    Add,
    SignOut,
    ToggleDarkMode,
}

#[derive(Deserialize)]
pub struct FormData {
    action: Action,
    #[serde(default)]
    question: String,
    #[serde(default)]
    answer: String,
}

pub async fn post_handler(
    State(state): State<ServerState>,
    Form(form): Form<FormData>,
) -> Redirect {
    if !state.monitor.is_authenticated() {
        log::warn!("Ignoring {:?} without a session", form.action);
        return Redirect::to("/");
    }
    match form.action {
        Action::Flip => state.sync.with_deck(|deck| deck.flip()),
        Action::Next => state.sync.with_deck(|deck| deck.next()),
        Action::Previous => state.sync.with_deck(|deck| deck.prev()),
        Action::Shuffle => state
            .sync
            .with_deck(|deck| deck.shuffle(&mut thread_rng())),
        Action::Delete => {
            let cursor = state.sync.with_deck(|deck| deck.study().cursor());
            // The card leaves the list only once the store confirms, so wait
            // for that before rendering.
            if let Some(handle) = state.sync.delete(cursor) {
                if let Err(e) = handle.await {
                    log::error!("Delete task failed: {e}");
                }
            }
        }
        Action::Add => {
            // Shown right away. The store write continues in the background.
            let _ = state.sync.add(&form.question, &form.answer);
        }
        Action::SignOut => {
            state.gateway.sign_out().await;
            state.follow(&state.monitor.status());
        }
        Action::ToggleDarkMode => {
            let mut mutable = state.lock();
            mutable.dark_mode = !mutable.dark_mode;
        }
    }
    Redirect::to("/")
}

#[derive(Debug, Deserialize)]
enum AuthAction {
    Login,
    SignUp,
    ToggleMode,
}

#[derive(Deserialize)]
pub struct AuthFormData {
    action: AuthAction,
    #[serde(default)]
    email: String,
    #[serde(default)]
    password: String,
}

pub async fn auth_handler(
    State(state): State<ServerState>,
    Form(form): Form<AuthFormData>,
) -> Redirect {
    match form.action {
        AuthAction::Login => match state.gateway.login(&form.email, &form.password).await {
            LoginOutcome::Rejected => {}
            LoginOutcome::Accepted => {
                state.follow(&state.monitor.status());
            }
            LoginOutcome::Failed(message) => {
                state.lock().notice = Some(message);
            }
        },
        AuthAction::SignUp => match state.gateway.register(&form.email, &form.password).await {
            RegisterOutcome::Rejected => {}
            RegisterOutcome::Registered(message) => {
                let mut mutable = state.lock();
                mutable.notice = Some(message);
                mutable.sign_up_mode = false;
            }
            RegisterOutcome::Failed(message) => {
                state.lock().notice = Some(message);
            }
        },
        AuthAction::ToggleMode => {
            let mut mutable = state.lock();
            mutable.sign_up_mode = !mutable.sign_up_mode;
        }
    }
    Redirect::to("/")
}
