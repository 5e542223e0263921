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

use std::fmt::Display;
use std::fmt::Formatter;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;

use maud::Markup;
use maud::PreEscaped;
use maud::html;
use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;

use crate::error::ErrorReport;
use crate::error::Fallible;
use crate::markdown::markdown_to_html;

/// The store-assigned key of a persisted card.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct CardId(String);

impl CardId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for CardId {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Client-side correlation key for a card that has not been confirmed by the
/// store yet. Unique for the life of the process.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct LocalKey(u64);

static NEXT_LOCAL_KEY: AtomicU64 = AtomicU64::new(1);

impl LocalKey {
    pub fn fresh() -> Self {
        Self(NEXT_LOCAL_KEY.fetch_add(1, Ordering::Relaxed))
    }
}

#[derive(Clone, PartialEq, Eq, Debug)]
pub struct Flashcard {
    /// `None` until the store confirms the create.
    pub id: Option<CardId>,
    /// Set while the create is in flight.
    pub local_key: Option<LocalKey>,
    pub question: String,
    pub answer: String,
}

/// The value stored for each card under the user's partition.
#[derive(Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub struct CardRecord {
    pub question: String,
    pub answer: String,
}

impl Flashcard {
    pub fn provisional(question: impl Into<String>, answer: impl Into<String>) -> Self {
        Self {
            id: None,
            local_key: Some(LocalKey::fresh()),
            question: question.into(),
            answer: answer.into(),
        }
    }

    /// Materialize a card from a store entry.
    pub fn from_entry(key: &str, value: &Value) -> Fallible<Self> {
        let record: CardRecord = serde_json::from_value(value.clone())
            .map_err(|e| ErrorReport::new(format!("malformed card {key}: {e}")))?;
        Ok(Self {
            id: Some(CardId::new(key)),
            local_key: None,
            question: record.question,
            answer: record.answer,
        })
    }

    pub fn is_provisional(&self) -> bool {
        self.id.is_none()
    }

    pub fn record(&self) -> CardRecord {
        CardRecord {
            question: self.question.clone(),
            answer: self.answer.clone(),
        }
    }

    pub fn html_front(&self) -> Markup {
        html! {
            (PreEscaped(markdown_to_html(&self.question)))
        }
    }

    pub fn html_back(&self) -> Markup {
        html! {
            (PreEscaped(markdown_to_html(&self.answer)))
        }
    }
}
