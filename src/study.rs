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

use rand::Rng;
use rand::seq::SliceRandom;

/// Which card is shown and which side is up. A view over a card list owned
/// elsewhere: every operation takes the list length, or the list itself.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
pub struct StudySession {
    cursor: usize,
    flipped: bool,
}

impl StudySession {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn is_flipped(&self) -> bool {
        self.flipped
    }

    pub fn flip(&mut self) {
        self.flipped = !self.flipped;
    }

    pub fn next(&mut self, len: usize) {
        if len == 0 {
            return;
        }
        self.cursor = (self.cursor + 1) % len;
    }

    pub fn prev(&mut self, len: usize) {
        if len == 0 {
            return;
        }
        self.cursor = if self.cursor == 0 {
            len - 1
        } else {
            self.cursor - 1
        };
    }

    /// Uniform shuffle. The cursor and flip flag are left alone, so they may
    /// now refer to a different card.
    pub fn shuffle<T>(&self, cards: &mut [T], rng: &mut impl Rng) {
        cards.shuffle(rng);
    }

    /// Clamp after the list shrank to `new_len`: a cursor that pointed at the
    /// old last card moves to the new last card.
    pub fn on_removed(&mut self, new_len: usize) {
        if self.cursor >= new_len {
            self.cursor = new_len.saturating_sub(1);
        }
    }

    /// Restart from the first card, question side up.
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}
