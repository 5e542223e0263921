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

//! In-memory collaborators for tests. Both can be told to fail their next
//! call, and the store can be held so calls stay in flight until released.

use std::collections::BTreeMap;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::MutexGuard;
use std::sync::PoisonError;

use async_trait::async_trait;
use rand::SeedableRng;
use rand::rngs::StdRng;
use serde_json::Value;
use tokio::sync::watch;

use crate::remote::auth::AuthError;
use crate::remote::auth::AuthErrorCode;
use crate::remote::auth::AuthProvider;
use crate::remote::auth::ListenerRegistry;
use crate::remote::auth::Persistence;
use crate::remote::auth::SessionListener;
use crate::remote::auth::Subscription;
use crate::remote::push_key::PushKeyGenerator;
use crate::remote::store::DocRef;
use crate::remote::store::DocumentStore;
use crate::remote::store::Snapshot;
use crate::remote::store::StoreError;
use crate::remote::store::StorePath;
use crate::types::user::User;
use crate::types::user::UserId;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum StoreOp {
    Read,
    Push,
    Write,
    Delete,
}

pub struct MemoryStore {
    data: Mutex<BTreeMap<String, BTreeMap<String, Value>>>,
    failures: Mutex<HashMap<StoreOp, usize>>,
    calls: Mutex<HashMap<StoreOp, usize>>,
    held: watch::Sender<bool>,
    push_keys: Mutex<(PushKeyGenerator, StdRng, u64)>,
}

impl MemoryStore {
    pub fn new() -> Arc<Self> {
        let (held, _) = watch::channel(false);
        Arc::new(Self {
            data: Mutex::new(BTreeMap::new()),
            failures: Mutex::new(HashMap::new()),
            calls: Mutex::new(HashMap::new()),
            held,
            push_keys: Mutex::new((PushKeyGenerator::new(), StdRng::seed_from_u64(0), 0)),
        })
    }

    /// Make the next call of `op` fail.
    pub fn fail_next(&self, op: StoreOp) {
        *lock(&self.failures).entry(op).or_default() += 1;
    }

    /// Keep every call in flight until `release` is called. Calls are still
    /// counted when they start.
    pub fn hold(&self) {
        self.held.send_replace(true);
    }

    pub fn release(&self) {
        self.held.send_replace(false);
    }

    /// How many times `op` has been called.
    pub fn calls(&self, op: StoreOp) -> usize {
        lock(&self.calls).get(&op).copied().unwrap_or(0)
    }

    /// Write a value directly, bypassing holds and failures.
    pub fn insert(&self, path: &StorePath, key: &str, value: Value) {
        lock(&self.data)
            .entry(path.encoded())
            .or_default()
            .insert(key.to_string(), value);
    }

    pub fn children(&self, path: &StorePath) -> BTreeMap<String, Value> {
        lock(&self.data)
            .get(&path.encoded())
            .cloned()
            .unwrap_or_default()
    }

    async fn enter(&self, op: StoreOp) -> Result<(), StoreError> {
        *lock(&self.calls).entry(op).or_default() += 1;
        let mut rx = self.held.subscribe();
        // The sender lives as long as `self`.
        let _ = rx.wait_for(|held| !*held).await;
        let mut failures = lock(&self.failures);
        match failures.get_mut(&op) {
            Some(n) if *n > 0 => {
                *n -= 1;
                Err(StoreError::new(format!("injected {op:?} failure")))
            }
            _ => Ok(()),
        }
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn read(&self, path: &StorePath) -> Result<Snapshot, StoreError> {
        self.enter(StoreOp::Read).await?;
        Ok(Snapshot::new(self.children(path)))
    }

    async fn push(&self, path: &StorePath) -> Result<DocRef, StoreError> {
        self.enter(StoreOp::Push).await?;
        let mut guard = lock(&self.push_keys);
        let (generator, rng, clock) = &mut *guard;
        *clock += 1;
        let key = generator.next_key(*clock, rng);
        Ok(DocRef::new(path, key))
    }

    async fn write(&self, doc: &DocRef, value: Value) -> Result<(), StoreError> {
        self.enter(StoreOp::Write).await?;
        let parent = doc
            .path()
            .parent()
            .ok_or_else(|| StoreError::new("cannot address the root"))?;
        self.insert(&parent, doc.key(), value);
        Ok(())
    }

    async fn delete(&self, doc: &DocRef) -> Result<(), StoreError> {
        self.enter(StoreOp::Delete).await?;
        if let Some(parent) = doc.path().parent() {
            if let Some(children) = lock(&self.data).get_mut(&parent.encoded()) {
                children.remove(doc.key());
            }
        }
        Ok(())
    }
}

pub struct MemoryAuth {
    accounts: Mutex<HashMap<String, (String, User)>>,
    current: Mutex<Option<User>>,
    listeners: Arc<ListenerRegistry>,
    next_error: Mutex<Option<AuthError>>,
    sign_in_calls: Mutex<usize>,
    persistence: Mutex<Option<Persistence>>,
    defer_initial: bool,
}

impl MemoryAuth {
    pub fn new() -> Arc<Self> {
        Self::build(false)
    }

    /// A provider that does not report the initial session state until
    /// `resolve` is called.
    pub fn deferred() -> Arc<Self> {
        Self::build(true)
    }

    fn build(defer_initial: bool) -> Arc<Self> {
        Arc::new(Self {
            accounts: Mutex::new(HashMap::new()),
            current: Mutex::new(None),
            listeners: Arc::new(ListenerRegistry::default()),
            next_error: Mutex::new(None),
            sign_in_calls: Mutex::new(0),
            persistence: Mutex::new(None),
            defer_initial,
        })
    }

    /// Create an account directly.
    pub fn add_account(&self, email: &str, password: &str) -> User {
        let user = User {
            id: UserId::new(format!("uid-{email}")),
            email: email.to_string(),
        };
        lock(&self.accounts).insert(email.to_string(), (password.to_string(), user.clone()));
        user
    }

    /// Make the next sign-in or sign-up fail with `code`.
    pub fn fail_next(&self, code: AuthErrorCode, message: &str) {
        *lock(&self.next_error) = Some(AuthError::new(code, message));
    }

    /// Report the current session state to every listener.
    pub fn resolve(&self) {
        let current = lock(&self.current).clone();
        self.listeners.notify(current.as_ref());
    }

    pub fn sign_in_calls(&self) -> usize {
        *lock(&self.sign_in_calls)
    }

    pub fn persistence(&self) -> Option<Persistence> {
        *lock(&self.persistence)
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.listener_count()
    }

    fn take_error(&self) -> Result<(), AuthError> {
        match lock(&self.next_error).take() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl AuthProvider for MemoryAuth {
    async fn sign_in(&self, email: &str, password: &str) -> Result<User, AuthError> {
        *lock(&self.sign_in_calls) += 1;
        self.take_error()?;
        let user = match lock(&self.accounts).get(email) {
            Some((stored, user)) if stored == password => user.clone(),
            Some(_) => {
                return Err(AuthError::new(
                    AuthErrorCode::WrongPassword,
                    "wrong password",
                ));
            }
            None => {
                return Err(AuthError::new(
                    AuthErrorCode::InvalidCredential,
                    "invalid credential",
                ));
            }
        };
        *lock(&self.current) = Some(user.clone());
        self.listeners.notify(Some(&user));
        Ok(user)
    }

    async fn sign_up(&self, email: &str, password: &str) -> Result<User, AuthError> {
        self.take_error()?;
        if lock(&self.accounts).contains_key(email) {
            return Err(AuthError::new(
                AuthErrorCode::EmailAlreadyInUse,
                "email already in use",
            ));
        }
        Ok(self.add_account(email, password))
    }

    async fn sign_out(&self) -> Result<(), AuthError> {
        *lock(&self.current) = None;
        self.listeners.notify(None);
        Ok(())
    }

    async fn set_persistence(&self, mode: Persistence) -> Result<(), AuthError> {
        *lock(&self.persistence) = Some(mode);
        Ok(())
    }

    fn on_session_change(&self, listener: SessionListener) -> Subscription {
        if self.defer_initial {
            self.listeners.register(listener)
        } else {
            let current = lock(&self.current).clone();
            self.listeners.subscribe(listener, current.as_ref())
        }
    }
}
