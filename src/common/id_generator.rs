// src/common/id_generator.rs
//! Crockford Base32 ID Generator
//!
//! Generates prefixed IDs using Crockford Base32 encoding.
//! Format: PREFIX_XXXXXXXXXXXX (e.g., N_K7NP3XQ2M8ZD for notifications)
//!
//! Broadcasts create one notification row per endpoint, so IDs carry 12
//! random characters (32^12 combinations per entity type).

use rand::Rng;

/// Crockford Base32 alphabet (excludes I, L, O, U to avoid confusion)
const CROCKFORD_ALPHABET: &[u8; 32] = b"0123456789ABCDEFGHJKMNPQRSTVWXYZ";

/// Number of random characters after the prefix
const ID_LENGTH: usize = 12;

/// Entity type prefixes for ID generation
#[derive(Debug, Clone, Copy)]
pub enum EntityPrefix {
    /// User (U_)
    User,
    /// Device endpoint (D_)
    Device,
    /// Notification (N_)
    Notification,
    /// Dead-lettered push request (Q_)
    DeadLetter,
}

impl EntityPrefix {
    /// Get the string prefix for this entity type
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityPrefix::User => "U",
            EntityPrefix::Device => "D",
            EntityPrefix::Notification => "N",
            EntityPrefix::DeadLetter => "Q",
        }
    }
}

/// Generate a random Crockford Base32 string of specified length
fn generate_crockford_string(length: usize) -> String {
    let mut rng = rand::thread_rng();
    (0..length)
        .map(|_| {
            let idx = rng.gen_range(0..32);
            CROCKFORD_ALPHABET[idx] as char
        })
        .collect()
}

/// Generate a prefixed ID, e.g. `generate_id(EntityPrefix::Device)` -> "D_8MWQT2K7NP3X"
pub fn generate_id(prefix: EntityPrefix) -> String {
    format!("{}_{}", prefix.as_str(), generate_crockford_string(ID_LENGTH))
}

pub fn generate_user_id() -> String {
    generate_id(EntityPrefix::User)
}

pub fn generate_device_id() -> String {
    generate_id(EntityPrefix::Device)
}

pub fn generate_notification_id() -> String {
    generate_id(EntityPrefix::Notification)
}

pub fn generate_dead_letter_id() -> String {
    generate_id(EntityPrefix::DeadLetter)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_generate_id_format() {
        let id = generate_notification_id();
        assert!(id.starts_with("N_"));
        assert_eq!(id.len(), 2 + ID_LENGTH);
    }

    #[test]
    fn test_crockford_alphabet_only() {
        let id = generate_device_id();
        let random_part = &id[2..];

        for c in random_part.chars() {
            assert!(
                CROCKFORD_ALPHABET.contains(&(c as u8)),
                "Character '{}' not in Crockford alphabet",
                c
            );
        }
    }

    #[test]
    fn test_uniqueness() {
        let mut ids = HashSet::new();
        for _ in 0..10_000 {
            assert!(ids.insert(generate_notification_id()), "Duplicate ID generated");
        }
    }

    #[test]
    fn test_all_prefixes() {
        assert!(generate_user_id().starts_with("U_"));
        assert!(generate_device_id().starts_with("D_"));
        assert!(generate_notification_id().starts_with("N_"));
        assert!(generate_dead_letter_id().starts_with("Q_"));
    }
}
