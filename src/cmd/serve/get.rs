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

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::Html;
use maud::Markup;
use maud::html;

use crate::cmd::serve::state::ServerState;
use crate::cmd::serve::template::page_template;
use crate::sync::Deck;
use crate::sync::LoadPhase;

pub const EMPTY_MESSAGE: &str = "No flashcards yet. Create one!";

pub async fn get_handler(State(state): State<ServerState>) -> (StatusCode, Html<String>) {
    state.follow(&state.monitor.status());
    (StatusCode::OK, Html(render(&state).into_string()))
}

/// The page for the current session. Only the session decides between the
/// auth and study views: cards still held by the sync are never shown to a
/// signed-out visitor.
fn render(state: &ServerState) -> Markup {
    let (dark_mode, sign_up_mode, notice) = {
        let mut mutable = state.lock();
        (mutable.dark_mode, mutable.sign_up_mode, mutable.notice.take())
    };
    let body = if state.monitor.is_resolving() {
        html! {
            div.root {
                p.loading { "Loading..." }
            }
        }
    } else if state.monitor.current_user().is_some() {
        state
            .sync
            .with_deck(|deck| study_view(deck, dark_mode, notice.as_deref()))
    } else {
        auth_view(sign_up_mode, notice.as_deref())
    };
    page_template(dark_mode, body)
}

fn notice_view(notice: Option<&str>) -> Markup {
    html! {
        @if let Some(notice) = notice {
            div.notice {
                (notice)
            }
        }
    }
}

fn auth_view(sign_up_mode: bool, notice: Option<&str>) -> Markup {
    html! {
        div.root {
            div.auth {
                h1 { "FLASHY" }
                (notice_view(notice))
                form action="/auth" method="post" {
                    input type="email" name="email" placeholder="Email";
                    input type="password" name="password" placeholder="Password";
                    @if sign_up_mode {
                        button id="submit" type="submit" name="action" value="SignUp" { "Sign Up" }
                    } @else {
                        button id="submit" type="submit" name="action" value="Login" { "Login" }
                    }
                }
                form action="/auth" method="post" {
                    button id="toggle-mode" type="submit" name="action" value="ToggleMode" {
                        @if sign_up_mode {
                            "Already have an account? Login"
                        } @else {
                            "Need an account? Sign Up"
                        }
                    }
                }
            }
        }
    }
}

fn study_view(deck: &Deck, dark_mode: bool, notice: Option<&str>) -> Markup {
    let study = deck.study();
    let card_view = match deck.current() {
        Some(card) => html! {
            div #card .card .pending[card.is_provisional()] {
                @if study.is_flipped() {
                    div .answer .rich-text {
                        (card.html_back())
                    }
                } @else {
                    div .question .rich-text {
                        (card.html_front())
                    }
                }
            }
            div.progress {
                (study.cursor() + 1) " / " (deck.cards().len())
            }
            div.controls {
                form action="/" method="post" {
                    button id="prev" type="submit" name="action" value="Previous" { "Previous" }
                    button id="flip" type="submit" name="action" value="Flip" { "Flip" }
                    button id="next" type="submit" name="action" value="Next" { "Next" }
                    div.spacer {}
                    button id="shuffle" type="submit" name="action" value="Shuffle" { "Shuffle" }
                    button id="delete" type="submit" name="action" value="Delete" disabled[card.is_provisional()] { "Delete" }
                }
            }
        },
        None => {
            let message = match deck.phase() {
                LoadPhase::Loading => "Loading flashcards...",
                _ => EMPTY_MESSAGE,
            };
            html! {
                p.empty { (message) }
            }
        }
    };
    html! {
        div.root {
            div.header {
                h1 { "FLASHY" }
                form action="/" method="post" {
                    button id="theme" type="submit" name="action" value="ToggleDarkMode" {
                        @if dark_mode { "Light Mode" } @else { "Dark Mode" }
                    }
                    button id="sign-out" type="submit" name="action" value="SignOut" { "Sign Out" }
                }
            }
            (notice_view(notice))
            form.add action="/" method="post" {
                input type="text" name="question" placeholder="Question";
                input type="text" name="answer" placeholder="Answer";
                button id="add" type="submit" name="action" value="Add" { "Add Flashcard" }
            }
            (card_view)
        }
    }
}
