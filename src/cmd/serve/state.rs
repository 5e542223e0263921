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
use std::sync::MutexGuard;
use std::sync::PoisonError;

use tokio::task::JoinHandle;

use crate::config::Config;
use crate::gateway::CredentialGateway;
use crate::remote::auth::AuthProvider;
use crate::remote::store::DocumentStore;
use crate::session::SessionMonitor;
use crate::session::SessionStatus;
use crate::sync::CardStoreSync;

#[derive(Clone)]
pub struct ServerState {
    pub monitor: Arc<SessionMonitor>,
    pub gateway: CredentialGateway,
    pub sync: CardStoreSync,
    pub mutable: Arc<Mutex<MutableState>>,
}

pub struct MutableState {
    pub dark_mode: bool,
    pub sign_up_mode: bool,
    /// Shown on the next render, then cleared.
    pub notice: Option<String>,
}

impl ServerState {
    pub fn new(
        auth: Arc<dyn AuthProvider>,
        store: Arc<dyn DocumentStore>,
        config: &Config,
    ) -> Self {
        let monitor = Arc::new(SessionMonitor::start(auth.as_ref()));
        Self {
            monitor,
            gateway: CredentialGateway::new(auth, config.persistence),
            sync: CardStoreSync::new(store),
            mutable: Arc::new(Mutex::new(MutableState {
                dark_mode: config.dark_mode,
                sign_up_mode: false,
                notice: None,
            })),
        }
    }

    pub fn lock(&self) -> MutexGuard<'_, MutableState> {
        self.mutable.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Start or stop the card sync so it matches the session.
    pub fn follow(&self, status: &SessionStatus) {
        match &status.user {
            Some(user) => {
                if self.sync.user().as_ref() != Some(user) {
                    log::debug!("Starting card sync for {}", user.email);
                    self.sync.start(user.clone());
                }
            }
            None => {
                if self.sync.user().is_some() {
                    log::debug!("Stopping card sync");
                    self.sync.stop();
                }
            }
        }
    }

    /// Follow every session change until the monitor goes away.
    pub fn spawn_follower(&self) -> JoinHandle<()> {
        let mut changes = self.monitor.changes();
        let this = self.clone();
        tokio::spawn(async move {
            loop {
                let status = changes.borrow_and_update().clone();
                this.follow(&status);
                if changes.changed().await.is_err() {
                    break;
                }
            }
        })
    }
}
