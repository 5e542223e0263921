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

/// Ordered by ASCII value, so key order matches creation order.
const PUSH_CHARS: &[u8; 64] = b"-0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZ_abcdefghijklmnopqrstuvwxyz";

const TIME_LEN: usize = 8;
const RANDOM_LEN: usize = 12;

/// Generates 20-character push keys: 8 characters of millisecond timestamp
/// followed by 12 random characters. Keys made within the same millisecond
/// reuse the previous random part plus one, so they still sort after it.
#[derive(Default)]
pub struct PushKeyGenerator {
    last_millis: u64,
    last_random: [u8; RANDOM_LEN],
}

impl PushKeyGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next_key(&mut self, millis: u64, rng: &mut impl Rng) -> String {
        if millis == self.last_millis {
            increment(&mut self.last_random);
        } else {
            self.last_millis = millis;
            for digit in self.last_random.iter_mut() {
                *digit = rng.gen_range(0..64);
            }
        }
        let mut key = String::with_capacity(TIME_LEN + RANDOM_LEN);
        let mut time_chars = [0u8; TIME_LEN];
        let mut now = millis;
        for slot in time_chars.iter_mut().rev() {
            *slot = PUSH_CHARS[(now % 64) as usize];
            now /= 64;
        }
        key.extend(time_chars.iter().map(|b| *b as char));
        key.extend(self.last_random.iter().map(|d| PUSH_CHARS[*d as usize] as char));
        key
    }
}

fn increment(digits: &mut [u8; RANDOM_LEN]) {
    for digit in digits.iter_mut().rev() {
        if *digit == 63 {
            *digit = 0;
        } else {
            *digit += 1;
            return;
        }
    }
}
