//! Synthetic credential event generation.
//!
//! [`EventGenerator::generate`] is restartable and keeps no state between
//! calls: every call allocates fresh identifiers and stamps the current time
//! from the injected clock. Sequence numbers restart at zero for each batch.

use credflow_core::environment::{Clock, SystemClock};
use credflow_core::event::CredentialEvent;
use rand::Rng;
use rand::distributions::Alphanumeric;
use rand::seq::SliceRandom;
use std::sync::Arc;
use uuid::Uuid;

const ADJECTIVES: &[&str] = &[
    "brave", "calm", "eager", "fuzzy", "gentle", "happy", "jolly", "kind", "lucky", "mighty",
    "nimble", "proud", "quiet", "rapid", "silly", "swift", "tidy", "witty", "zany", "bold",
];

const NOUNS: &[&str] = &[
    "badger", "comet", "dingo", "falcon", "gecko", "heron", "ibis", "jaguar", "koala", "lemur",
    "marmot", "narwhal", "otter", "panda", "quokka", "raven", "salmon", "tapir", "walrus", "yak",
];

const SYMBOLS: &[u8] = b"!@#$%^&*-_+=?";

const PASSWORD_LEN: usize = 12;

/// Produces batches of [`CredentialEvent`]s.
#[derive(Clone)]
pub struct EventGenerator {
    clock: Arc<dyn Clock>,
}

impl EventGenerator {
    /// Create a generator stamping events with `clock`.
    #[must_use]
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self { clock }
    }

    /// Generate `count` events with unique ids and sequences `0..count`.
    ///
    /// A `count` of zero or less yields an empty batch.
    #[must_use]
    pub fn generate(&self, count: i64) -> Vec<CredentialEvent> {
        if count <= 0 {
            return Vec::new();
        }

        let mut rng = rand::thread_rng();
        (0..count)
            .map(|sequence| {
                CredentialEvent::new(
                    Uuid::new_v4().to_string(),
                    fake_username(&mut rng),
                    fake_password(&mut rng),
                    self.clock.now_millis(),
                    sequence,
                )
            })
            .collect()
    }
}

impl Default for EventGenerator {
    fn default() -> Self {
        Self::new(Arc::new(SystemClock))
    }
}

/// Generate `count` events stamped with the system clock.
#[must_use]
pub fn generate(count: i64) -> Vec<CredentialEvent> {
    EventGenerator::default().generate(count)
}

fn fake_username(rng: &mut impl Rng) -> String {
    let adjective = ADJECTIVES.choose(rng).copied().unwrap_or("anon");
    let noun = NOUNS.choose(rng).copied().unwrap_or("user");
    format!("{adjective}_{noun}{}", rng.gen_range(0..10_000))
}

fn fake_password(rng: &mut impl Rng) -> String {
    let mut password: Vec<u8> = rng.sample_iter(&Alphanumeric).take(PASSWORD_LEN - 1).collect();
    let symbol = SYMBOLS[rng.gen_range(0..SYMBOLS.len())];
    let position = rng.gen_range(0..=password.len());
    password.insert(position, symbol);
    String::from_utf8_lossy(&password).into_owned()
}
