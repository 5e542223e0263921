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

use std::sync::Arc;
use std::sync::Mutex;
use std::sync::PoisonError;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;

use tokio::sync::watch;

use crate::remote::auth::AuthProvider;
use crate::remote::auth::SessionListener;
use crate::remote::auth::Subscription;
use crate::types::user::User;

#[derive(Clone, PartialEq, Eq, Debug)]
pub struct SessionStatus {
    /// True until the provider has reported the session state once.
    pub resolving: bool,
    pub user: Option<User>,
}

impl SessionStatus {
    fn pending() -> Self {
        Self {
            resolving: true,
            user: None,
        }
    }

    pub fn is_authenticated(&self) -> bool {
        self.user.is_some()
    }
}

/// Tracks the provider's session state for the life of the app.
pub struct SessionMonitor {
    status: Arc<watch::Sender<SessionStatus>>,
    active: Arc<AtomicBool>,
    subscription: Mutex<Option<Subscription>>,
}

impl SessionMonitor {
    /// Subscribe to `provider`'s session changes.
    pub fn start(provider: &dyn AuthProvider) -> Self {
        let (status, _) = watch::channel(SessionStatus::pending());
        let status = Arc::new(status);
        let active = Arc::new(AtomicBool::new(true));
        let listener: SessionListener = {
            let status = status.clone();
            let active = active.clone();
            Arc::new(move |user: Option<&User>| {
                if !active.load(Ordering::SeqCst) {
                    return;
                }
                let next = SessionStatus {
                    resolving: false,
                    user: user.cloned(),
                };
                status.send_if_modified(|current| {
                    if *current == next {
                        return false;
                    }
                    match &next.user {
                        Some(user) => log::info!("Session: signed in as {}", user.email),
                        None => log::info!("Session: signed out"),
                    }
                    *current = next;
                    true
                });
            })
        };
        let subscription = provider.on_session_change(listener);
        Self {
            status,
            active,
            subscription: Mutex::new(Some(subscription)),
        }
    }

    pub fn status(&self) -> SessionStatus {
        self.status.borrow().clone()
    }

    pub fn is_resolving(&self) -> bool {
        self.status.borrow().resolving
    }

    pub fn is_authenticated(&self) -> bool {
        self.status.borrow().is_authenticated()
    }

    pub fn current_user(&self) -> Option<User> {
        self.status.borrow().user.clone()
    }

    /// A receiver that observes every status change.
    pub fn changes(&self) -> watch::Receiver<SessionStatus> {
        self.status.subscribe()
    }

    /// Wait until the provider has reported the session state once.
    pub async fn wait_resolved(&self) -> SessionStatus {
        let mut rx = self.status.subscribe();
        match rx.wait_for(|status| !status.resolving).await {
            Ok(status) => status.clone(),
            Err(_) => self.status(),
        }
    }

    /// Unsubscribe from the provider. Later notifications are ignored.
    pub fn shutdown(&self) {
        self.active.store(false, Ordering::SeqCst);
        let subscription = self
            .subscription
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(subscription) = subscription {
            subscription.unsubscribe();
            log::debug!("Session monitor unsubscribed");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::time::timeout;

    use super::*;
    use crate::remote::memory::MemoryAuth;

    #[test]
    fn test_resolving_until_first_notification() {
        let auth = MemoryAuth::deferred();
        let monitor = SessionMonitor::start(auth.as_ref());
        assert!(monitor.is_resolving());
        assert!(!monitor.is_authenticated());
        auth.resolve();
        assert!(!monitor.is_resolving());
        assert!(!monitor.is_authenticated());
        // Idempotent after the first resolution.
        auth.resolve();
        assert!(!monitor.is_resolving());
    }

    #[tokio::test]
    async fn test_tracks_sign_in_and_sign_out() {
        let auth = MemoryAuth::new();
        let user = auth.add_account("a@b.com", "secret1");
        let monitor = SessionMonitor::start(auth.as_ref());
        assert!(!monitor.is_resolving());
        assert!(!monitor.is_authenticated());
        auth.sign_in("a@b.com", "secret1").await.unwrap();
        assert!(monitor.is_authenticated());
        assert_eq!(monitor.current_user(), Some(user));
        auth.sign_out().await.unwrap();
        assert!(!monitor.is_authenticated());
        assert_eq!(monitor.current_user(), None);
    }

    #[tokio::test]
    async fn test_wait_resolved() {
        let auth = MemoryAuth::deferred();
        let monitor = Arc::new(SessionMonitor::start(auth.as_ref()));
        let waiter = {
            let monitor = monitor.clone();
            tokio::spawn(async move { monitor.wait_resolved().await })
        };
        tokio::task::yield_now().await;
        assert!(!waiter.is_finished());
        auth.resolve();
        let status = timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
        assert!(!status.resolving);
        assert!(!status.is_authenticated());
    }

    #[tokio::test]
    async fn test_shutdown_unsubscribes() {
        let auth = MemoryAuth::new();
        auth.add_account("a@b.com", "secret1");
        let monitor = SessionMonitor::start(auth.as_ref());
        assert_eq!(auth.listener_count(), 1);
        monitor.shutdown();
        assert_eq!(auth.listener_count(), 0);
        auth.sign_in("a@b.com", "secret1").await.unwrap();
        assert!(!monitor.is_authenticated());
        // A second shutdown is harmless.
        monitor.shutdown();
    }
}
