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

use std::collections::BTreeMap;
use std::error::Error;
use std::fmt::Display;
use std::fmt::Formatter;

use async_trait::async_trait;
use percent_encoding::AsciiSet;
use percent_encoding::CONTROLS;
use percent_encoding::percent_decode_str;
use percent_encoding::utf8_percent_encode;
use serde_json::Value;

use crate::types::user::UserId;

/// Characters escaped inside a path segment.
const SEGMENT: &AsciiSet = &CONTROLS
    .add(b'/')
    .add(b'%')
    .add(b' ')
    .add(b'#')
    .add(b'?')
    .add(b'.')
    .add(b'[')
    .add(b']')
    .add(b'$');

/// A location in the document store, as a list of unescaped segments.
#[derive(Clone, PartialEq, Eq, Hash, Debug)]
pub struct StorePath {
    segments: Vec<String>,
}

impl StorePath {
    pub fn parse(path: &str) -> Self {
        let segments = path
            .split('/')
            .filter(|s| !s.is_empty())
            .map(|s| percent_decode_str(s).decode_utf8_lossy().into_owned())
            .collect();
        Self { segments }
    }

    /// The partition holding a user's cards: `users/{uid}/flashcards`.
    pub fn user_flashcards(user: &UserId) -> Self {
        Self::parse("users")
            .child(user.as_str())
            .child("flashcards")
    }

    pub fn child(&self, segment: impl Into<String>) -> Self {
        let mut segments = self.segments.clone();
        segments.push(segment.into());
        Self { segments }
    }

    /// The last segment, or `None` for the root.
    pub fn key(&self) -> Option<&str> {
        self.segments.last().map(|s| s.as_str())
    }

    pub fn parent(&self) -> Option<StorePath> {
        if self.segments.is_empty() {
            None
        } else {
            Some(Self {
                segments: self.segments[..self.segments.len() - 1].to_vec(),
            })
        }
    }

    /// The escaped string form, with `/` between segments.
    pub fn encoded(&self) -> String {
        self.segments
            .iter()
            .map(|s| utf8_percent_encode(s, SEGMENT).to_string())
            .collect::<Vec<_>>()
            .join("/")
    }
}

impl Display for StorePath {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(f, "/{}", self.encoded())
    }
}

/// A reference to a single document. Produced by `push`, or by naming an
/// existing child.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct DocRef {
    path: StorePath,
}

impl DocRef {
    pub fn new(parent: &StorePath, key: impl Into<String>) -> Self {
        Self {
            path: parent.child(key),
        }
    }

    pub fn path(&self) -> &StorePath {
        &self.path
    }

    pub fn key(&self) -> &str {
        self.path.key().unwrap_or_default()
    }
}

/// The result of reading a path: its direct children, in key order.
#[derive(Clone, Debug, Default)]
pub struct Snapshot {
    entries: BTreeMap<String, Value>,
}

impl Snapshot {
    pub fn new(entries: BTreeMap<String, Value>) -> Self {
        Self { entries }
    }

    pub fn exists(&self) -> bool {
        !self.is_empty()
    }

    pub fn entries(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[derive(Clone, PartialEq, Eq, Debug)]
pub struct StoreError {
    message: String,
}

impl StoreError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl Display for StoreError {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(f, "store error: {}", self.message)
    }
}

impl Error for StoreError {}

impl From<rusqlite::Error> for StoreError {
    fn from(value: rusqlite::Error) -> Self {
        StoreError::new(value.to_string())
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(value: serde_json::Error) -> Self {
        StoreError::new(value.to_string())
    }
}

/// A keyed document store.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Read the direct children of `path`.
    async fn read(&self, path: &StorePath) -> Result<Snapshot, StoreError>;

    /// Allocate a fresh, unique child key under `path` without writing.
    async fn push(&self, path: &StorePath) -> Result<DocRef, StoreError>;

    /// Write `value` at `doc`, replacing what was there.
    async fn write(&self, doc: &DocRef, value: Value) -> Result<(), StoreError>;

    /// Delete `doc`. Deleting a missing document succeeds.
    async fn delete(&self, doc: &DocRef) -> Result<(), StoreError>;
}
