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

use rand::Rng;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::remote::store::DocRef;
use crate::remote::store::DocumentStore;
use crate::remote::store::Snapshot;
use crate::remote::store::StoreError;
use crate::remote::store::StorePath;
use crate::study::StudySession;
use crate::types::flashcard::CardId;
use crate::types::flashcard::Flashcard;
use crate::types::flashcard::LocalKey;
use crate::types::user::User;

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum LoadPhase {
    /// No user.
    Idle,
    /// The initial read is in flight.
    Loading,
    Loaded,
    /// The initial read failed. The list was not materialized.
    Failed,
}

/// The in-memory card list and the study cursor over it.
pub struct Deck {
    cards: Vec<Flashcard>,
    study: StudySession,
    phase: LoadPhase,
    /// Bumped on every start and stop. Results tagged with an older epoch
    /// are dropped.
    epoch: u64,
    user: Option<User>,
}

impl Deck {
    fn new() -> Self {
        Self {
            cards: Vec::new(),
            study: StudySession::new(),
            phase: LoadPhase::Idle,
            epoch: 0,
            user: None,
        }
    }

    pub fn cards(&self) -> &[Flashcard] {
        &self.cards
    }

    pub fn phase(&self) -> LoadPhase {
        self.phase
    }

    pub fn study(&self) -> &StudySession {
        &self.study
    }

    pub fn current(&self) -> Option<&Flashcard> {
        self.cards.get(self.study.cursor())
    }

    pub fn flip(&mut self) {
        self.study.flip();
    }

    pub fn next(&mut self) {
        self.study.next(self.cards.len());
    }

    pub fn prev(&mut self) {
        self.study.prev(self.cards.len());
    }

    pub fn shuffle(&mut self, rng: &mut impl Rng) {
        self.study.shuffle(&mut self.cards, rng);
    }

    fn remove_at(&mut self, index: usize) {
        self.cards.remove(index);
        self.study.on_removed(self.cards.len());
    }

    fn position_of_key(&self, key: LocalKey) -> Option<usize> {
        self.cards.iter().position(|c| c.local_key == Some(key))
    }

    fn position_of_id(&self, id: &CardId) -> Option<usize> {
        self.cards.iter().position(|c| c.id.as_ref() == Some(id))
    }
}

/// Owns the card list of the signed-in user and writes every change through
/// to the document store.
#[derive(Clone)]
pub struct CardStoreSync {
    store: Arc<dyn DocumentStore>,
    deck: Arc<Mutex<Deck>>,
    /// True while the initial read is in flight. Remote writes wait for it.
    loading: Arc<watch::Sender<bool>>,
}

impl CardStoreSync {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        let (loading, _) = watch::channel(false);
        Self {
            store,
            deck: Arc::new(Mutex::new(Deck::new())),
            loading: Arc::new(loading),
        }
    }

    fn acquire(&self) -> MutexGuard<'_, Deck> {
        self.deck.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Run `f` with the deck locked. `f` must not block.
    pub fn with_deck<R>(&self, f: impl FnOnce(&mut Deck) -> R) -> R {
        let mut deck = self.acquire();
        f(&mut deck)
    }

    /// The user whose cards are loaded, if any.
    pub fn user(&self) -> Option<User> {
        self.acquire().user.clone()
    }

    /// Begin a session for `user`: clear the list and load theirs.
    pub fn start(&self, user: User) -> JoinHandle<()> {
        let path = StorePath::user_flashcards(&user.id);
        let epoch = {
            let mut deck = self.acquire();
            deck.epoch += 1;
            deck.cards.clear();
            deck.study.reset();
            deck.phase = LoadPhase::Loading;
            deck.user = Some(user);
            self.loading.send_replace(true);
            deck.epoch
        };
        log::debug!("Loading flashcards from {path}");
        let this = self.clone();
        tokio::spawn(async move {
            let result = this.store.read(&path).await;
            this.finish_load(epoch, result);
        })
    }

    fn finish_load(&self, epoch: u64, result: Result<Snapshot, StoreError>) {
        let mut deck = self.acquire();
        if deck.epoch != epoch {
            log::debug!("Discarding load result from an ended session");
            return;
        }
        match result {
            Ok(snapshot) => {
                let mut cards = Vec::with_capacity(snapshot.len());
                for (key, value) in snapshot.entries() {
                    match Flashcard::from_entry(key, value) {
                        Ok(card) => cards.push(card),
                        Err(e) => log::error!("Skipping flashcard: {e}"),
                    }
                }
                if !snapshot.exists() {
                    log::debug!("No flashcards found.");
                }
                // Cards added while loading have not been written yet, so
                // they are not in the snapshot.
                let pending = deck.cards.drain(..).filter(|c| c.is_provisional());
                cards.extend(pending);
                log::debug!("Loaded {} flashcards", cards.len());
                deck.cards = cards;
                deck.phase = LoadPhase::Loaded;
            }
            Err(e) => {
                log::error!("Error fetching flashcards: {e}");
                deck.phase = LoadPhase::Failed;
            }
        }
        // Cleared under the lock, so a newer start cannot be overwritten.
        self.loading.send_replace(false);
    }

    /// End the session. In-flight results are ignored when they arrive.
    pub fn stop(&self) {
        let mut deck = self.acquire();
        deck.epoch += 1;
        deck.cards.clear();
        deck.study.reset();
        deck.phase = LoadPhase::Idle;
        deck.user = None;
        self.loading.send_replace(false);
    }

    async fn wait_for_load(&self) {
        let mut rx = self.loading.subscribe();
        // The sender lives as long as `self`.
        let _ = rx.wait_for(|loading| !*loading).await;
    }

    /// Append a card immediately, then create it remotely. The card gets its
    /// id when the create succeeds, and is removed again if it fails.
    ///
    /// Returns `None`, changing nothing, if either field is blank or no user
    /// is signed in.
    pub fn add(&self, question: &str, answer: &str) -> Option<JoinHandle<()>> {
        if question.trim().is_empty() || answer.trim().is_empty() {
            return None;
        }
        let card = Flashcard::provisional(question, answer);
        let key = card.local_key?;
        let (epoch, user) = {
            let mut deck = self.acquire();
            let user = deck.user.clone()?;
            deck.cards.push(card.clone());
            (deck.epoch, user)
        };
        let this = self.clone();
        Some(tokio::spawn(async move {
            this.create_remote(epoch, user, key, card).await;
        }))
    }

    async fn create_remote(&self, epoch: u64, user: User, key: LocalKey, card: Flashcard) {
        self.wait_for_load().await;
        let path = StorePath::user_flashcards(&user.id);
        let result: Result<DocRef, StoreError> = async {
            let doc = self.store.push(&path).await?;
            let value = serde_json::to_value(card.record())?;
            self.store.write(&doc, value).await?;
            Ok(doc)
        }
        .await;

        let mut deck = self.acquire();
        if deck.epoch != epoch {
            log::debug!("Discarding create result from an ended session");
            return;
        }
        match result {
            Ok(doc) => {
                log::debug!("Flashcard saved as {}", doc.path());
                if let Some(index) = deck.position_of_key(key) {
                    let entry = &mut deck.cards[index];
                    entry.id = Some(CardId::new(doc.key()));
                    entry.local_key = None;
                }
            }
            Err(e) => {
                log::error!("Error saving flashcard: {e}");
                if let Some(index) = deck.position_of_key(key) {
                    deck.remove_at(index);
                }
            }
        }
    }

    /// Delete the card at `index` remotely, and only once that succeeds,
    /// locally.
    ///
    /// Returns `None`, changing nothing, if there is no such card or it has
    /// not been assigned an id.
    pub fn delete(&self, index: usize) -> Option<JoinHandle<()>> {
        let (epoch, user, id) = {
            let deck = self.acquire();
            let id = deck.cards.get(index)?.id.clone()?;
            (deck.epoch, deck.user.clone()?, id)
        };
        let this = self.clone();
        Some(tokio::spawn(async move {
            this.delete_remote(epoch, user, id).await;
        }))
    }

    async fn delete_remote(&self, epoch: u64, user: User, id: CardId) {
        let doc = DocRef::new(&StorePath::user_flashcards(&user.id), id.as_str());
        let result = self.store.delete(&doc).await;

        let mut deck = self.acquire();
        if deck.epoch != epoch {
            log::debug!("Discarding delete result from an ended session");
            return;
        }
        match result {
            Ok(()) => {
                log::debug!("Flashcard {id} deleted");
                // Looked up by id: the list may have been shuffled meanwhile.
                if let Some(index) = deck.position_of_id(&id) {
                    deck.remove_at(index);
                }
            }
            Err(e) => {
                log::error!("Error deleting flashcard {id}: {e}");
            }
        }
    }
}
