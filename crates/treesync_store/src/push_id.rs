//! Chronologically ordered push-id generation.

use parking_lot::Mutex;
use rand::Rng;
use std::time::{SystemTime, UNIX_EPOCH};

/// Alphabet of push-ids, in ascending ASCII order so ids sort
/// lexicographically by creation time.
const PUSH_CHARS: &[u8; 64] = b"-0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZ_abcdefghijklmnopqrstuvwxyz";

/// Length of a push-id: 8 timestamp characters and 12 random characters.
pub const PUSH_ID_LEN: usize = 20;

#[derive(Debug, Default)]
struct PushIdState {
    last_millis: u64,
    last_random: [u8; 12],
}

/// Generates 20-character keys that sort in creation order.
///
/// The first 8 characters encode the millisecond timestamp. The remaining
/// 12 are random; ids generated within the same millisecond (or while the
/// clock runs backwards) increment the previous random part instead, so
/// ordering holds even for bursts.
#[derive(Debug, Default)]
pub struct PushIdGenerator {
    state: Mutex<PushIdState>,
}

impl PushIdGenerator {
    /// Creates a generator.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Generates an id for the current time.
    pub fn next_id(&self) -> String {
        let millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or_default();
        self.next_id_at(millis)
    }

    /// Generates an id as if the clock read `millis`.
    pub fn next_id_at(&self, millis: u64) -> String {
        let mut state = self.state.lock();
        let millis = if millis <= state.last_millis && state.last_millis != 0 {
            increment(&mut state.last_random);
            state.last_millis
        } else {
            let mut rng = rand::thread_rng();
            for slot in state.last_random.iter_mut() {
                *slot = rng.gen_range(0..64);
            }
            state.last_millis = millis;
            millis
        };

        let mut id = [0u8; PUSH_ID_LEN];
        let mut remaining = millis;
        for slot in id[..8].iter_mut().rev() {
            *slot = PUSH_CHARS[(remaining % 64) as usize];
            remaining /= 64;
        }
        for (slot, digit) in id[8..].iter_mut().zip(state.last_random.iter()) {
            *slot = PUSH_CHARS[*digit as usize];
        }
        id.iter().map(|&b| b as char).collect()
    }
}

/// Adds one to a base-64 digit string, carrying leftwards.
fn increment(digits: &mut [u8; 12]) {
    for digit in digits.iter_mut().rev() {
        if *digit == 63 {
            *digit = 0;
        } else {
            *digit += 1;
            return;
        }
    }
}
