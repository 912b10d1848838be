use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

#[must_use]
pub fn hash64<T: Hash>(value: &T) -> u64 {
    let mut hasher = DefaultHasher::new();
    value.hash(&mut hasher);
    hasher.finish()
}

#[must_use]
pub fn short_id<T: Hash>(value: &T) -> String {
    format!("{:016x}", hash64(value))
}

#[cfg(test)]
mod tests {
    use super::{hash64, short_id};

    #[test]
    fn hash_is_stable_for_same_input() {
        let value = ("decomposer", "missing_join");
        assert_eq!(hash64(&value), hash64(&value));
    }

    #[test]
    fn short_id_is_fixed_width_hex() {
        let id = short_id(&"use STRFTIME for dates");
        assert_eq!(id.len(), 16);
        assert!(id.chars().all(|ch| ch.is_ascii_hexdigit()));
        assert_ne!(id, short_id(&"use IIF for conditionals"));
    }
}
