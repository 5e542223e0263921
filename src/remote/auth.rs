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

use std::error::Error;
use std::fmt::Display;
use std::fmt::Formatter;
use std::sync::Arc;
use std::sync::Mutex;

use async_trait::async_trait;
use serde::Deserialize;

use crate::types::user::User;

/// How long an established session survives.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Persistence {
    /// Survives process restarts.
    Local,
    /// Kept in memory for the life of the process.
    Session,
    /// Kept in memory only.
    None,
}

/// The provider's error vocabulary.
#[derive(Clone, PartialEq, Eq, Debug)]
pub enum AuthErrorCode {
    InvalidEmail,
    UserNotFound,
    WrongPassword,
    EmailAlreadyInUse,
    /// Sent instead of `UserNotFound` and `WrongPassword` by providers that
    /// don't reveal which accounts exist. The local backend never sends it.
    #[allow(dead_code)]
    InvalidCredential,
    WeakPassword,
    MissingPassword,
    Other(String),
}

impl AuthErrorCode {
    pub fn as_str(&self) -> &str {
        match self {
            AuthErrorCode::InvalidEmail => "auth/invalid-email",
            AuthErrorCode::UserNotFound => "auth/user-not-found",
            AuthErrorCode::WrongPassword => "auth/wrong-password",
            AuthErrorCode::EmailAlreadyInUse => "auth/email-already-in-use",
            AuthErrorCode::InvalidCredential => "auth/invalid-credential",
            AuthErrorCode::WeakPassword => "auth/weak-password",
            AuthErrorCode::MissingPassword => "auth/missing-password",
            AuthErrorCode::Other(code) => code,
        }
    }
}

#[derive(Clone, PartialEq, Eq, Debug)]
pub struct AuthError {
    pub code: AuthErrorCode,
    pub message: String,
}

impl AuthError {
    pub fn new(code: AuthErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl Display for AuthError {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(f, "{} ({})", self.message, self.code.as_str())
    }
}

impl Error for AuthError {}

/// Called with the signed-in user, or `None` after sign-out.
pub type SessionListener = Arc<dyn Fn(Option<&User>) + Send + Sync>;

#[async_trait]
pub trait AuthProvider: Send + Sync {
    async fn sign_in(&self, email: &str, password: &str) -> Result<User, AuthError>;

    /// Create an account. Does not establish a session.
    async fn sign_up(&self, email: &str, password: &str) -> Result<User, AuthError>;

    async fn sign_out(&self) -> Result<(), AuthError>;

    /// Applies to sessions established after the call.
    async fn set_persistence(&self, mode: Persistence) -> Result<(), AuthError>;

    /// Register a listener. The listener is invoked with the current session
    /// state before this returns, then on every change until the returned
    /// subscription is dropped.
    fn on_session_change(&self, listener: SessionListener) -> Subscription;
}

/// Handle to a registered listener. Dropping it unsubscribes.
pub struct Subscription {
    cancel: Option<Box<dyn FnOnce() + Send>>,
}

impl Subscription {
    pub fn new(cancel: impl FnOnce() + Send + 'static) -> Self {
        Self {
            cancel: Some(Box::new(cancel)),
        }
    }

    pub fn unsubscribe(mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

/// Listener bookkeeping shared by the provider implementations.
#[derive(Default)]
pub struct ListenerRegistry {
    inner: Mutex<RegistryInner>,
}

#[derive(Default)]
struct RegistryInner {
    next_id: u64,
    listeners: Vec<(u64, SessionListener)>,
}

impl ListenerRegistry {
    /// Register `listener`, call it once with `current`, and return the
    /// subscription that removes it again.
    pub fn subscribe(
        self: &Arc<Self>,
        listener: SessionListener,
        current: Option<&User>,
    ) -> Subscription {
        let subscription = self.register(listener.clone());
        listener(current);
        subscription
    }

    /// Register `listener` without calling it.
    pub fn register(self: &Arc<Self>, listener: SessionListener) -> Subscription {
        let id = {
            let mut inner = lock(&self.inner);
            let id = inner.next_id;
            inner.next_id += 1;
            inner.listeners.push((id, listener));
            id
        };
        let registry = Arc::downgrade(self);
        Subscription::new(move || {
            if let Some(registry) = registry.upgrade() {
                lock(&registry.inner).listeners.retain(|(lid, _)| *lid != id);
            }
        })
    }

    pub fn notify(&self, user: Option<&User>) {
        // Listeners run outside the lock so they may subscribe or unsubscribe.
        let listeners: Vec<SessionListener> = lock(&self.inner)
            .listeners
            .iter()
            .map(|(_, l)| l.clone())
            .collect();
        for listener in listeners {
            listener(user);
        }
    }

    pub fn listener_count(&self) -> usize {
        lock(&self.inner).listeners.len()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
