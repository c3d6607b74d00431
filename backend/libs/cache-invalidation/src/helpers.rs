//! Cache key format shared by publishers and caches: `<entity>:<id>`

use crate::EntityType;

/// ```
/// use cache_invalidation::{build_cache_key, EntityType};
///
/// assert_eq!(build_cache_key(&EntityType::User, "42"), "user:42");
/// assert_eq!(build_cache_key(&EntityType::Profile, "42"), "profile:42");
/// ```
pub fn build_cache_key(entity_type: &EntityType, entity_id: &str) -> String {
    format!("{}:{}", entity_type, entity_id)
}

/// Whether `key` matches a glob made of literal text and `*` wildcards
pub fn matches_pattern(pattern: &str, key: &str) -> bool {
    let mut parts = pattern.split('*');
    let Some(first) = parts.next() else {
        return key.is_empty();
    };
    let Some(mut rest) = key.strip_prefix(first) else {
        return false;
    };

    let remaining: Vec<&str> = parts.collect();
    if remaining.is_empty() {
        return rest.is_empty();
    }

    for (i, part) in remaining.iter().enumerate() {
        let last = i + 1 == remaining.len();
        if last {
            return rest.ends_with(part);
        }
        match rest.find(part) {
            Some(pos) => rest = &rest[pos + part.len()..],
            None => return false,
        }
    }
    true
}
