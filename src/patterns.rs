//! Wildcard Pattern Matching
//!
//! Glob matching used throughout the repository for advice binding,
//! permission resource columns and cache eviction:
//! - `*` matches any run of characters, `?` matches exactly one
//! - Matching is case-insensitive, like cube naming
//! - Compiled patterns are cached process-wide; compiled regexes are
//!   immutable and shared across threads without locking

use dashmap::DashMap;
use once_cell::sync::Lazy;
use regex::Regex;
use std::sync::Arc;

static COMPILED: Lazy<DashMap<String, Option<Arc<Regex>>>> = Lazy::new(DashMap::new);

/// Test `text` against a `*`/`?` glob pattern.
pub fn matches(pattern: &str, text: &str) -> bool {
    if !pattern.contains('*') && !pattern.contains('?') {
        return pattern.eq_ignore_ascii_case(text);
    }
    match compiled(pattern) {
        Some(regex) => regex.is_match(text),
        None => pattern.eq_ignore_ascii_case(text),
    }
}

/// True when the pattern contains glob metacharacters.
pub fn is_glob(pattern: &str) -> bool {
    pattern.contains('*') || pattern.contains('?')
}

fn compiled(pattern: &str) -> Option<Arc<Regex>> {
    if let Some(entry) = COMPILED.get(pattern) {
        return entry.clone();
    }
    // Losing this race just compiles the same pattern twice; both results
    // are identical and the second insert wins harmlessly.
    let built = build(pattern);
    COMPILED.insert(pattern.to_string(), built.clone());
    built
}

fn build(pattern: &str) -> Option<Arc<Regex>> {
    let mut source = String::with_capacity(pattern.len() + 8);
    source.push_str("(?i)^");
    for ch in pattern.chars() {
        match ch {
            '*' => source.push_str(".*"),
            '?' => source.push('.'),
            other => source.push_str(&regex::escape(other.encode_utf8(&mut [0u8; 4]))),
        }
    }
    source.push('$');

    match Regex::new(&source) {
        Ok(regex) => Some(Arc::new(regex)),
        Err(e) => {
            log::warn!("Unable to compile wildcard pattern '{}': {}", pattern, e);
            None
        }
    }
}
