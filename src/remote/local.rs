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

//! An SQLite-backed implementation of the authentication provider and the
//! document store, so the app runs against a single local file.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::MutexGuard;
use std::sync::PoisonError;

use async_trait::async_trait;
use rand::Rng;
use rand::distributions::Alphanumeric;
use rand::thread_rng;
use rusqlite::Connection;
use rusqlite::OptionalExtension;
use rusqlite::Transaction;
use rusqlite::config::DbConfig;
use serde_json::Value;

use crate::error::Fallible;
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
use crate::types::timestamp::Timestamp;
use crate::types::user::User;
use crate::types::user::UserId;

const PASSWORD_CONTEXT: &str = "flashy 2025-01-01 account password";
const MIN_PASSWORD_LEN: usize = 6;
const USER_ID_LEN: usize = 28;
const SALT_LEN: usize = 16;

pub struct LocalBackend {
    conn: Mutex<Connection>,
    session: Mutex<SessionState>,
    listeners: Arc<ListenerRegistry>,
    push_keys: Mutex<PushKeyGenerator>,
}

struct SessionState {
    current: Option<User>,
    persistence: Persistence,
}

struct AccountRow {
    user_id: UserId,
    email: String,
    password_salt: String,
    password_hash: String,
}

impl LocalBackend {
    /// Open (or create) the database, restoring a locally persisted session.
    pub fn open(database_path: &str) -> Fallible<Self> {
        let mut conn = Connection::open(database_path)?;
        conn.set_db_config(DbConfig::SQLITE_DBCONFIG_ENABLE_FKEY, true)?;
        {
            let tx = conn.transaction()?;
            if !schema_exists(&tx)? {
                log::debug!("Creating schema in {database_path}");
                tx.execute_batch(include_str!("schema.sql"))?;
                tx.commit()?;
            }
        }
        let current = restore_session(&conn)?;
        if let Some(user) = &current {
            log::info!("Restored session for {}", user.email);
        }
        Ok(Self {
            conn: Mutex::new(conn),
            session: Mutex::new(SessionState {
                current,
                persistence: Persistence::Local,
            }),
            listeners: Arc::new(ListenerRegistry::default()),
            push_keys: Mutex::new(PushKeyGenerator::new()),
        })
    }

    fn acquire(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn session(&self) -> MutexGuard<'_, SessionState> {
        self.session.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn find_account(&self, email: &str) -> Result<Option<AccountRow>, AuthError> {
        let conn = self.acquire();
        let sql = "select user_id, email, password_salt, password_hash from accounts where email = ?;";
        conn.query_row(sql, [email], |row| {
            Ok(AccountRow {
                user_id: row.get(0)?,
                email: row.get(1)?,
                password_salt: row.get(2)?,
                password_hash: row.get(3)?,
            })
        })
        .optional()
        .map_err(internal)
    }

    fn persist_session(&self, user: Option<&User>) -> Result<(), AuthError> {
        let conn = self.acquire();
        conn.execute("delete from persisted_session;", [])
            .map_err(internal)?;
        if let Some(user) = user {
            conn.execute(
                "insert into persisted_session (singleton, user_id) values (0, ?);",
                [&user.id],
            )
            .map_err(internal)?;
        }
        Ok(())
    }
}

#[async_trait]
impl AuthProvider for LocalBackend {
    async fn sign_in(&self, email: &str, password: &str) -> Result<User, AuthError> {
        let email = normalize_email(email);
        validate_email(&email)?;
        if password.is_empty() {
            return Err(AuthError::new(
                AuthErrorCode::MissingPassword,
                "A password is required.",
            ));
        }
        let account = match self.find_account(&email)? {
            Some(account) => account,
            None => {
                return Err(AuthError::new(
                    AuthErrorCode::UserNotFound,
                    "There is no account with this email.",
                ));
            }
        };
        let stored = blake3::Hash::from_hex(&account.password_hash).map_err(|e| {
            AuthError::new(
                AuthErrorCode::Other("auth/internal-error".to_string()),
                e.to_string(),
            )
        })?;
        // `Hash` equality is constant-time.
        if hash_password(&account.password_salt, password) != stored {
            return Err(AuthError::new(
                AuthErrorCode::WrongPassword,
                "The password is invalid.",
            ));
        }
        let user = User {
            id: account.user_id,
            email: account.email,
        };
        let persistence = {
            let mut session = self.session();
            session.current = Some(user.clone());
            session.persistence
        };
        if persistence == Persistence::Local {
            self.persist_session(Some(&user))?;
        } else {
            self.persist_session(None)?;
        }
        log::debug!("Signed in {}", user.id);
        self.listeners.notify(Some(&user));
        Ok(user)
    }

    async fn sign_up(&self, email: &str, password: &str) -> Result<User, AuthError> {
        let email = normalize_email(email);
        validate_email(&email)?;
        if password.is_empty() {
            return Err(AuthError::new(
                AuthErrorCode::MissingPassword,
                "A password is required.",
            ));
        }
        if password.chars().count() < MIN_PASSWORD_LEN {
            return Err(AuthError::new(
                AuthErrorCode::WeakPassword,
                "Password should be at least 6 characters.",
            ));
        }
        if self.find_account(&email)?.is_some() {
            return Err(AuthError::new(
                AuthErrorCode::EmailAlreadyInUse,
                "The email address is already in use by another account.",
            ));
        }
        let user_id = UserId::new(random_string(USER_ID_LEN));
        let salt = random_string(SALT_LEN);
        let hash = hash_password(&salt, password).to_hex().to_string();
        {
            let conn = self.acquire();
            let sql = "insert into accounts (user_id, email, password_salt, password_hash, created_at) values (?, ?, ?, ?, ?);";
            conn.execute(sql, (&user_id, &email, &salt, &hash, Timestamp::now()))
                .map_err(internal)?;
        }
        log::debug!("Created account {user_id}");
        Ok(User { id: user_id, email })
    }

    async fn sign_out(&self) -> Result<(), AuthError> {
        let previous = self.session().current.take();
        self.persist_session(None)?;
        if let Some(user) = previous {
            log::debug!("Signed out {}", user.id);
        }
        self.listeners.notify(None);
        Ok(())
    }

    async fn set_persistence(&self, mode: Persistence) -> Result<(), AuthError> {
        self.session().persistence = mode;
        if mode != Persistence::Local {
            self.persist_session(None)?;
        }
        Ok(())
    }

    fn on_session_change(&self, listener: SessionListener) -> Subscription {
        let current = self.session().current.clone();
        self.listeners.subscribe(listener, current.as_ref())
    }
}

#[async_trait]
impl DocumentStore for LocalBackend {
    async fn read(&self, path: &StorePath) -> Result<Snapshot, StoreError> {
        let conn = self.acquire();
        let mut stmt =
            conn.prepare("select key, value from documents where parent = ? order by key;")?;
        let mut rows = stmt.query([path.encoded()])?;
        let mut entries = BTreeMap::new();
        while let Some(row) = rows.next()? {
            let key: String = row.get(0)?;
            let value: String = row.get(1)?;
            let value: Value = serde_json::from_str(&value)?;
            entries.insert(key, value);
        }
        Ok(Snapshot::new(entries))
    }

    async fn push(&self, path: &StorePath) -> Result<DocRef, StoreError> {
        let key = self
            .push_keys
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .next_key(Timestamp::now().millis(), &mut thread_rng());
        Ok(DocRef::new(path, key))
    }

    async fn write(&self, doc: &DocRef, value: Value) -> Result<(), StoreError> {
        let parent = parent_of(doc)?;
        let value = serde_json::to_string(&value)?;
        let conn = self.acquire();
        let sql = "insert into documents (parent, key, value, updated_at) values (?, ?, ?, ?) on conflict (parent, key) do update set value = excluded.value, updated_at = excluded.updated_at;";
        conn.execute(sql, (parent.encoded(), doc.key(), value, Timestamp::now()))?;
        Ok(())
    }

    async fn delete(&self, doc: &DocRef) -> Result<(), StoreError> {
        let parent = parent_of(doc)?;
        let conn = self.acquire();
        conn.execute(
            "delete from documents where parent = ? and key = ?;",
            (parent.encoded(), doc.key()),
        )?;
        Ok(())
    }
}

fn parent_of(doc: &DocRef) -> Result<StorePath, StoreError> {
    doc.path()
        .parent()
        .ok_or_else(|| StoreError::new("cannot address the root"))
}

fn restore_session(conn: &Connection) -> Fallible<Option<User>> {
    let sql = "select a.user_id, a.email from persisted_session s join accounts a on a.user_id = s.user_id;";
    let user = conn
        .query_row(sql, [], |row| {
            Ok(User {
                id: row.get(0)?,
                email: row.get(1)?,
            })
        })
        .optional()?;
    Ok(user)
}

fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

fn validate_email(email: &str) -> Result<(), AuthError> {
    let valid = match email.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty()
                && !domain.contains('@')
                && !email.contains(char::is_whitespace)
                && domain
                    .split_once('.')
                    .is_some_and(|(host, tld)| !host.is_empty() && !tld.is_empty())
        }
        None => false,
    };
    if valid {
        Ok(())
    } else {
        Err(AuthError::new(
            AuthErrorCode::InvalidEmail,
            "The email address is badly formatted.",
        ))
    }
}

fn hash_password(salt: &str, password: &str) -> blake3::Hash {
    let mut hasher = blake3::Hasher::new_derive_key(PASSWORD_CONTEXT);
    hasher.update(salt.as_bytes());
    hasher.update(password.as_bytes());
    hasher.finalize()
}

fn random_string(len: usize) -> String {
    thread_rng()
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(char::from)
        .collect()
}

fn internal(e: rusqlite::Error) -> AuthError {
    log::error!("Account database error: {e}");
    AuthError::new(AuthErrorCode::Other("auth/internal-error".to_string()), e.to_string())
}

fn schema_exists(tx: &Transaction) -> Fallible<bool> {
    let sql = "select count(*) from sqlite_master where type='table' AND name=?;";
    let count: i64 = tx.query_row(sql, ["accounts"], |row| row.get(0))?;
    Ok(count > 0)
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;
    use std::sync::atomic::Ordering;

    use serde_json::json;
    use tempfile::TempDir;
    use tempfile::tempdir;

    use super::*;

    fn open_temp() -> Fallible<(TempDir, String, LocalBackend)> {
        let dir = tempdir()?;
        let path = dir.path().join("flashy.db").display().to_string();
        let backend = LocalBackend::open(&path)?;
        Ok((dir, path, backend))
    }

    #[tokio::test]
    async fn test_sign_up_then_sign_in() -> Fallible<()> {
        let (_dir, _path, backend) = open_temp()?;
        let created = backend.sign_up("Alice@Example.com ", "hunter22").await.unwrap();
        assert_eq!(created.email, "alice@example.com");
        assert_eq!(created.id.as_str().len(), USER_ID_LEN);
        let user = backend.sign_in("alice@example.com", "hunter22").await.unwrap();
        assert_eq!(user, created);
        Ok(())
    }

    #[tokio::test]
    async fn test_sign_up_does_not_establish_session() -> Fallible<()> {
        let (_dir, _path, backend) = open_temp()?;
        let seen = Arc::new(Mutex::new(Vec::new()));
        let log = seen.clone();
        let _subscription = backend.on_session_change(Arc::new(move |user: Option<&User>| {
            log.lock().unwrap().push(user.is_some());
        }));
        backend.sign_up("a@b.com", "hunter22").await.unwrap();
        assert_eq!(*seen.lock().unwrap(), vec![false]);
        Ok(())
    }

    #[tokio::test]
    async fn test_sign_up_errors() -> Fallible<()> {
        let (_dir, _path, backend) = open_temp()?;
        let err = backend.sign_up("not-an-email", "hunter22").await.unwrap_err();
        assert_eq!(err.code, AuthErrorCode::InvalidEmail);
        let err = backend.sign_up("a@b.com", "").await.unwrap_err();
        assert_eq!(err.code, AuthErrorCode::MissingPassword);
        let err = backend.sign_up("a@b.com", "abc").await.unwrap_err();
        assert_eq!(err.code, AuthErrorCode::WeakPassword);
        backend.sign_up("a@b.com", "hunter22").await.unwrap();
        let err = backend.sign_up("A@B.com", "hunter22").await.unwrap_err();
        assert_eq!(err.code, AuthErrorCode::EmailAlreadyInUse);
        Ok(())
    }

    #[tokio::test]
    async fn test_sign_in_errors() -> Fallible<()> {
        let (_dir, _path, backend) = open_temp()?;
        backend.sign_up("a@b.com", "hunter22").await.unwrap();
        let err = backend.sign_in("a@b", "hunter22").await.unwrap_err();
        assert_eq!(err.code, AuthErrorCode::InvalidEmail);
        let err = backend.sign_in("nobody@b.com", "hunter22").await.unwrap_err();
        assert_eq!(err.code, AuthErrorCode::UserNotFound);
        let err = backend.sign_in("a@b.com", "hunter23").await.unwrap_err();
        assert_eq!(err.code, AuthErrorCode::WrongPassword);
        Ok(())
    }

    #[tokio::test]
    async fn test_listeners_see_sign_in_and_sign_out() -> Fallible<()> {
        let (_dir, _path, backend) = open_temp()?;
        backend.sign_up("a@b.com", "hunter22").await.unwrap();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let subscription = backend.on_session_change(Arc::new(move |_: Option<&User>| {
            counter.fetch_add(1, Ordering::SeqCst);
        }));
        backend.sign_in("a@b.com", "hunter22").await.unwrap();
        backend.sign_out().await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        drop(subscription);
        backend.sign_in("a@b.com", "hunter22").await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        Ok(())
    }

    #[tokio::test]
    async fn test_local_persistence_survives_reopen() -> Fallible<()> {
        let (_dir, path, backend) = open_temp()?;
        backend.sign_up("a@b.com", "hunter22").await.unwrap();
        backend.set_persistence(Persistence::Local).await.unwrap();
        let user = backend.sign_in("a@b.com", "hunter22").await.unwrap();
        drop(backend);

        let reopened = LocalBackend::open(&path)?;
        let restored = Arc::new(Mutex::new(None));
        let slot = restored.clone();
        let _subscription = reopened.on_session_change(Arc::new(move |user: Option<&User>| {
            *slot.lock().unwrap() = user.cloned();
        }));
        assert_eq!(*restored.lock().unwrap(), Some(user));
        Ok(())
    }

    #[tokio::test]
    async fn test_session_persistence_does_not_survive_reopen() -> Fallible<()> {
        let (_dir, path, backend) = open_temp()?;
        backend.sign_up("a@b.com", "hunter22").await.unwrap();
        backend.set_persistence(Persistence::Session).await.unwrap();
        backend.sign_in("a@b.com", "hunter22").await.unwrap();
        drop(backend);

        let reopened = LocalBackend::open(&path)?;
        let restored = Arc::new(Mutex::new(None));
        let slot = restored.clone();
        let _subscription = reopened.on_session_change(Arc::new(move |user: Option<&User>| {
            *slot.lock().unwrap() = user.cloned();
        }));
        assert_eq!(*restored.lock().unwrap(), None);
        Ok(())
    }

    #[tokio::test]
    async fn test_sign_out_clears_persisted_session() -> Fallible<()> {
        let (_dir, path, backend) = open_temp()?;
        backend.sign_up("a@b.com", "hunter22").await.unwrap();
        backend.sign_in("a@b.com", "hunter22").await.unwrap();
        backend.sign_out().await.unwrap();
        drop(backend);
        let reopened = LocalBackend::open(&path)?;
        assert!(reopened.session().current.is_none());
        Ok(())
    }

    #[tokio::test]
    async fn test_documents() -> Fallible<()> {
        let (_dir, _path, backend) = open_temp()?;
        let cards = StorePath::user_flashcards(&UserId::new("u1"));
        assert!(!backend.read(&cards).await.unwrap().exists());

        let first = backend.push(&cards).await.unwrap();
        let second = backend.push(&cards).await.unwrap();
        // Pushing allocates a key but writes nothing.
        assert!(!backend.read(&cards).await.unwrap().exists());

        backend
            .write(&second, json!({"question": "Q2", "answer": "A2"}))
            .await
            .unwrap();
        backend
            .write(&first, json!({"question": "Q1", "answer": "A1"}))
            .await
            .unwrap();
        let snapshot = backend.read(&cards).await.unwrap();
        let keys: Vec<&String> = snapshot.entries().map(|(k, _)| k).collect();
        assert_eq!(keys, vec![first.key(), second.key()]);

        backend.delete(&first).await.unwrap();
        let snapshot = backend.read(&cards).await.unwrap();
        assert_eq!(snapshot.len(), 1);

        // Other users' partitions are separate.
        let other = StorePath::user_flashcards(&UserId::new("u2"));
        assert!(!backend.read(&other).await.unwrap().exists());
        Ok(())
    }

    #[tokio::test]
    async fn test_write_replaces_value() -> Fallible<()> {
        let (_dir, _path, backend) = open_temp()?;
        let cards = StorePath::user_flashcards(&UserId::new("u1"));
        let doc = backend.push(&cards).await.unwrap();
        backend.write(&doc, json!({"question": "Q", "answer": "A"})).await.unwrap();
        backend.write(&doc, json!({"question": "Q", "answer": "B"})).await.unwrap();
        let snapshot = backend.read(&cards).await.unwrap();
        let values: Vec<&Value> = snapshot.entries().map(|(_, v)| v).collect();
        assert_eq!(values, vec![&json!({"question": "Q", "answer": "B"})]);
        Ok(())
    }

    #[test]
    fn test_validate_email() {
        assert!(validate_email("a@b.com").is_ok());
        assert!(validate_email("a@b").is_err());
        assert!(validate_email("@b.com").is_err());
        assert!(validate_email("a@.com").is_err());
        assert!(validate_email("a b@c.com").is_err());
        assert!(validate_email("a@b@c.com").is_err());
    }

    #[test]
    fn test_hash_password_is_salted() {
        assert_ne!(hash_password("s1", "pw"), hash_password("s2", "pw"));
        assert_eq!(hash_password("s1", "pw"), hash_password("s1", "pw"));
    }

    #[test]
    fn test_stored_hash_parses_back() {
        let hash = hash_password("s1", "pw");
        let stored = hash.to_hex().to_string();
        assert_eq!(blake3::Hash::from_hex(&stored).unwrap(), hash);
        assert_ne!(blake3::Hash::from_hex(&stored).unwrap(), hash_password("s1", "pw2"));
    }
}
