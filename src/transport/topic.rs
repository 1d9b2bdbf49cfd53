// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! MQTT topic-filter matching for the per-topic delivery route table.

/// Returns true when `topic` matches the subscription `filter`.
///
/// Implements the standard MQTT wildcard rules: `+` matches exactly one
/// level, `#` matches the remaining levels (including zero, so `a/#`
/// matches `a`).
#[must_use]
pub fn filter_matches(filter: &str, topic: &str) -> bool {
    let mut filter_levels = filter.split('/');
    let mut topic_levels = topic.split('/');

    loop {
        match (filter_levels.next(), topic_levels.next()) {
            (Some("#"), _) => return true,
            (Some("+"), Some(_)) => {}
            (Some(f), Some(t)) if f == t => {}
            (None, None) => return true,
            _ => return false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exact_match() {
        assert!(filter_matches("a/b/c", "a/b/c"));
        assert!(!filter_matches("a/b/c", "a/b"));
        assert!(!filter_matches("a/b", "a/b/c"));
        assert!(!filter_matches("a/b/c", "a/b/x"));
    }

    #[test]
    fn single_level_wildcard() {
        assert!(filter_matches("a/+/c", "a/b/c"));
        assert!(filter_matches("+/b/c", "a/b/c"));
        assert!(!filter_matches("a/+", "a/b/c"));
        assert!(!filter_matches("a/+/c", "a/c"));
    }

    #[test]
    fn multi_level_wildcard() {
        assert!(filter_matches("#", "a/b/c"));
        assert!(filter_matches("a/#", "a/b/c"));
        assert!(filter_matches("a/#", "a"));
        assert!(!filter_matches("a/#", "b/a"));
    }

    #[test]
    fn wildcards_combined() {
        assert!(filter_matches("a/+/#", "a/b"));
        assert!(filter_matches("a/+/#", "a/b/c/d"));
        assert!(!filter_matches("a/+/#", "a"));
    }

    #[test]
    fn empty_levels_are_significant() {
        assert!(filter_matches("a//c", "a//c"));
        assert!(filter_matches("a/+/c", "a//c"));
        assert!(!filter_matches("a//c", "a/b/c"));
    }
}
