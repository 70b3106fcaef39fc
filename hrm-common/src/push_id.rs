//! Chronological push ids
//!
//! Ids are 20 characters: 8 characters of millisecond timestamp followed by
//! 12 random characters, drawn from an alphabet whose ASCII order matches its
//! digit order. Ids therefore sort lexicographically by creation time. When
//! several ids are minted within one millisecond the random suffix is
//! incremented instead of redrawn, so ids from one generator never collide
//! and stay strictly increasing.

use once_cell::sync::Lazy;
use rand::Rng;
use std::sync::Mutex;

use crate::time::now_millis;

const PUSH_CHARS: &[u8; 64] = b"-0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZ_abcdefghijklmnopqrstuvwxyz";

const TIME_LEN: usize = 8;
const RANDOM_LEN: usize = 12;

/// Length of every generated id
pub const PUSH_ID_LEN: usize = TIME_LEN + RANDOM_LEN;

/// Stateful id generator
#[derive(Debug, Default)]
pub struct PushIdGenerator {
    last_time: u64,
    last_random: [u8; RANDOM_LEN],
}

impl PushIdGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mint an id for the current wall-clock time
    pub fn next_id(&mut self) -> String {
        self.next_at(now_millis())
    }

    /// Mint an id for an explicit time in milliseconds
    ///
    /// A clock that steps backwards is treated as "same millisecond" so ids
    /// remain increasing.
    pub fn next_at(&mut self, millis: u64) -> String {
        let millis = millis.max(self.last_time);
        if millis == self.last_time && self.last_time != 0 {
            self.increment_random();
        } else {
            let mut rng = rand::thread_rng();
            for slot in self.last_random.iter_mut() {
                *slot = rng.gen_range(0..64);
            }
        }
        self.last_time = millis;

        let mut id = [0u8; PUSH_ID_LEN];
        let mut now = millis;
        for slot in id[..TIME_LEN].iter_mut().rev() {
            *slot = PUSH_CHARS[(now % 64) as usize];
            now /= 64;
        }
        for (slot, digit) in id[TIME_LEN..].iter_mut().zip(self.last_random.iter()) {
            *slot = PUSH_CHARS[*digit as usize];
        }

        // Every byte comes from the ASCII alphabet above
        id.iter().map(|b| *b as char).collect()
    }

    fn increment_random(&mut self) {
        for digit in self.last_random.iter_mut().rev() {
            if *digit == 63 {
                *digit = 0;
            } else {
                *digit += 1;
                return;
            }
        }
    }
}

static GLOBAL: Lazy<Mutex<PushIdGenerator>> = Lazy::new(|| Mutex::new(PushIdGenerator::new()));

/// Mint an id from the process-wide generator
pub fn generate() -> String {
    match GLOBAL.lock() {
        Ok(mut generator) => generator.next_id(),
        // A panic while holding the lock cannot leave the state invalid
        Err(poisoned) => poisoned.into_inner().next_id(),
    }
}
