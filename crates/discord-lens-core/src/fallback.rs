//! Deterministic fallback identities.
//!
//! When every upstream source fails, the resolver still has to show
//! *something*. [`generate`] maps an id to stable synthetic display data:
//! same id, same output, on every run. There is no randomness and no clock.
//!
//! The seed is the last eight characters of the id read as hexadecimal
//! (decimal digits are valid hex, so this never fails for a snowflake).
//! A zero seed is bumped to one.
//!
//! No image is synthesized. `image_ref: None` tells the consumer to derive
//! a default avatar.

use crate::models::{EntityKind, EntityRecord};
use crate::snowflake::Snowflake;

const ADJECTIVES: [&str; 8] = ["Cool", "Epic", "Swift", "Bright", "Bold", "Quick", "Smart", "Wild"];
const NOUNS: [&str; 8] = ["Gamer", "Coder", "Artist", "Ninja", "Wizard", "Hunter", "Knight", "Sage"];

const SEED_WIDTH: usize = 8;

/// Integer seed derived from a fixed-width suffix of the id.
pub fn seed(id: &Snowflake) -> u64 {
    let s = id.as_str();
    let suffix = &s[s.len().saturating_sub(SEED_WIDTH)..];
    match u64::from_str_radix(suffix, 16) {
        Ok(0) | Err(_) => 1,
        Ok(n) => n,
    }
}

/// Build a synthetic record for `id`.
pub fn generate(kind: EntityKind, id: &Snowflake) -> EntityRecord {
    let (display_name, secondary_name) = match kind {
        EntityKind::User => {
            let seed = seed(id);
            let adjective = ADJECTIVES[(seed % ADJECTIVES.len() as u64) as usize];
            let noun = NOUNS[((seed >> 3) % NOUNS.len() as u64) as usize];
            let number = seed % 10_000;
            (
                format!("{} {}", adjective, noun),
                Some(format!("{}{}{:04}", adjective, noun, number)),
            )
        }
        EntityKind::Guild => (format!("Server {}", last_four(id)), None),
        EntityKind::Channel => (format!("channel-{}", last_four(id)), None),
    };

    EntityRecord {
        id: id.clone(),
        kind,
        display_name,
        secondary_name,
        image_ref: None,
        discriminator: match kind {
            EntityKind::User => Some("0".to_string()),
            _ => None,
        },
        synthetic: true,
    }
}

fn last_four(id: &Snowflake) -> &str {
    let s = id.as_str();
    &s[s.len() - 4..]
}
