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

use crate::remote::auth::AuthError;
use crate::remote::auth::AuthErrorCode;
use crate::remote::auth::AuthProvider;
use crate::remote::auth::Persistence;

pub const REGISTERED_MESSAGE: &str = "Account created successfully! Please log in.";

#[derive(Debug, PartialEq, Eq)]
pub enum LoginOutcome {
    /// A field was empty; nothing was sent.
    Rejected,
    /// The provider accepted the credentials. The new session arrives through
    /// the session monitor.
    Accepted,
    Failed(String),
}

#[derive(Debug, PartialEq, Eq)]
pub enum RegisterOutcome {
    Rejected,
    Registered(String),
    Failed(String),
}

/// Submits credentials to the provider.
#[derive(Clone)]
pub struct CredentialGateway {
    provider: Arc<dyn AuthProvider>,
    persistence: Persistence,
}

impl CredentialGateway {
    pub fn new(provider: Arc<dyn AuthProvider>, persistence: Persistence) -> Self {
        Self {
            provider,
            persistence,
        }
    }

    pub async fn login(&self, email: &str, password: &str) -> LoginOutcome {
        if email.is_empty() || password.is_empty() {
            return LoginOutcome::Rejected;
        }
        if let Err(e) = self.provider.set_persistence(self.persistence).await {
            log::warn!("Error setting session persistence: {e}");
            return LoginOutcome::Failed(classify(&e));
        }
        match self.provider.sign_in(email, password).await {
            Ok(user) => {
                log::debug!("Login accepted for {}", user.email);
                LoginOutcome::Accepted
            }
            Err(e) => {
                log::warn!("Error logging in: {e}");
                LoginOutcome::Failed(classify(&e))
            }
        }
    }

    pub async fn register(&self, email: &str, password: &str) -> RegisterOutcome {
        if email.is_empty() || password.is_empty() {
            return RegisterOutcome::Rejected;
        }
        match self.provider.sign_up(email, password).await {
            Ok(user) => {
                log::info!("Registered {}", user.email);
                RegisterOutcome::Registered(REGISTERED_MESSAGE.to_string())
            }
            Err(e) => {
                log::warn!("Error signing up: {e}");
                RegisterOutcome::Failed(classify(&e))
            }
        }
    }

    pub async fn sign_out(&self) {
        if let Err(e) = self.provider.sign_out().await {
            log::error!("Error signing out: {e}");
        }
    }
}

/// The user-facing message for a provider error.
pub fn classify(err: &AuthError) -> String {
    match &err.code {
        AuthErrorCode::InvalidEmail => {
            "Invalid email format. Please enter a valid email.".to_string()
        }
        AuthErrorCode::EmailAlreadyInUse => {
            "This email is already registered. Please log in.".to_string()
        }
        AuthErrorCode::InvalidCredential => {
            "Invalid email or password. Please try again.".to_string()
        }
        AuthErrorCode::UserNotFound => "No user found with this email.".to_string(),
        AuthErrorCode::WrongPassword => "Incorrect password. Please try again.".to_string(),
        AuthErrorCode::WeakPassword => "Password should be at least 6 characters.".to_string(),
        AuthErrorCode::MissingPassword | AuthErrorCode::Other(_) => {
            format!("An error occurred: {}", err.message)
        }
    }
}
