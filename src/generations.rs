//! Maps sample identifiers to generation labels.
//!
//! Two specification forms are accepted. The explicit form keys labels to
//! regex patterns: `/<label>/<regex>/<label>/<regex>/.../`. The implicit form
//! is a comma-separated allow-list of labels; each sample's label is the token
//! after the last occurrence of the separator in its name (`F2_0012_3` with
//! separator `_` belongs to generation `3`).

use crate::error::{RelFitError, Result};
use crate::types::GenerationPair;
use regex::Regex;
use std::collections::BTreeMap;

/// Resolve the generation specification against the full sample list.
///
/// Returns label -> matching sample ids, preserving header sample order
/// within each label. A requested label that matches no sample is a
/// configuration error; labels not requested are dropped silently.
pub fn resolve_generations(
    samples: &[String],
    spec: &str,
    separator: &str,
) -> Result<BTreeMap<String, Vec<String>>> {
    let map = if spec.starts_with('/') {
        resolve_explicit(samples, spec)?
    } else {
        resolve_implicit(samples, spec, separator)?
    };

    for (label, members) in &map {
        if members.is_empty() {
            return Err(RelFitError::config(format!(
                "generation '{}' matched no samples",
                label
            )));
        }
    }

    Ok(map)
}

fn resolve_explicit(samples: &[String], spec: &str) -> Result<BTreeMap<String, Vec<String>>> {
    if !spec.starts_with('/') || !spec.ends_with('/') {
        return Err(RelFitError::config(
            "generations must be formatted as /<id>/<regex>/<id>/<regex>/...",
        ));
    }

    let parts: Vec<&str> = spec.trim_matches('/').split('/').collect();
    if parts.is_empty() || parts.len() % 2 != 0 {
        return Err(RelFitError::config(
            "invalid generation format: must be /<id>/<regex>/<id>/<regex>/...",
        ));
    }

    let mut map = BTreeMap::new();
    for chunk in parts.chunks(2) {
        let label = chunk[0];
        let pattern = Regex::new(chunk[1]).map_err(|e| {
            RelFitError::config(format!("invalid generation pattern '{}': {}", chunk[1], e))
        })?;

        let matching: Vec<String> = samples
            .iter()
            .filter(|s| pattern.is_match(s))
            .cloned()
            .collect();
        map.insert(label.to_string(), matching);
    }

    Ok(map)
}

fn resolve_implicit(
    samples: &[String],
    allow_list: &str,
    separator: &str,
) -> Result<BTreeMap<String, Vec<String>>> {
    if separator.is_empty() {
        return Err(RelFitError::config("generation separator must not be empty"));
    }

    let labels: Vec<&str> = allow_list
        .split(',')
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .collect();
    if labels.is_empty() {
        return Err(RelFitError::config("generation allow-list is empty"));
    }

    let mut map: BTreeMap<String, Vec<String>> =
        labels.iter().map(|l| (l.to_string(), Vec::new())).collect();

    for sample in samples {
        let Some((_, token)) = sample.rsplit_once(separator) else {
            continue;
        };
        if let Some(members) = map.get_mut(token) {
            members.push(sample.clone());
        }
    }

    Ok(map)
}

/// Parse pair ids like `1_3` and check both labels resolved to samples.
pub fn parse_pairs(
    pair_specs: &[String],
    generations: &BTreeMap<String, Vec<String>>,
) -> Result<Vec<GenerationPair>> {
    let mut pairs = Vec::with_capacity(pair_specs.len());

    for spec in pair_specs {
        let Some((first, second)) = spec.split_once('_') else {
            return Err(RelFitError::config(format!(
                "invalid generation pair '{}': expected <id>_<id>",
                spec
            )));
        };
        for label in [first, second] {
            if !generations.contains_key(label) {
                return Err(RelFitError::config(format!(
                    "generation pair '{}' references unknown generation '{}'",
                    spec, label
                )));
            }
        }
        pairs.push(GenerationPair {
            first: first.to_string(),
            second: second.to_string(),
        });
    }

    Ok(pairs)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn samples(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_explicit_spec() {
        let samples = samples(&["P0_a", "P0_b", "F3_a", "F3_b", "F5_a"]);
        let map = resolve_generations(&samples, "/1/^P0/3/^F3/", "_").unwrap();
        assert_eq!(map["1"], vec!["P0_a", "P0_b"]);
        assert_eq!(map["3"], vec!["F3_a", "F3_b"]);
        // F5 was not requested and is dropped
        assert_eq!(map.len(), 2);
    }

    #[test]
    fn test_explicit_regex_is_search_not_anchor() {
        let samples = samples(&["popA_gen1", "popB_gen1", "popA_gen2"]);
        let map = resolve_generations(&samples, "/1/gen1/2/gen2/", "_").unwrap();
        assert_eq!(map["1"].len(), 2);
        assert_eq!(map["2"], vec!["popA_gen2"]);
    }

    #[test]
    fn test_explicit_missing_slashes() {
        let samples = samples(&["a"]);
        // leading slash selects the explicit form, trailing slash is missing
        let err = resolve_generations(&samples, "/1/a", "_").unwrap_err();
        assert!(err.to_string().contains("configuration"));
    }

    #[test]
    fn test_explicit_unbalanced() {
        let samples = samples(&["a"]);
        assert!(resolve_generations(&samples, "/1/a/2/", "_").is_err());
    }

    #[test]
    fn test_explicit_bad_pattern() {
        let samples = samples(&["a"]);
        assert!(resolve_generations(&samples, "/1/[/", "_").is_err());
    }

    #[test]
    fn test_zero_match_is_error() {
        let samples = samples(&["F3_a"]);
        let err = resolve_generations(&samples, "/9/^P9/", "_").unwrap_err();
        assert!(err.to_string().contains("matched no samples"));
    }

    #[test]
    fn test_implicit_suffix_tokens() {
        let samples = samples(&["ind01_1", "ind02_1", "ind03_3", "ind04_5"]);
        let map = resolve_generations(&samples, "1,3", "_").unwrap();
        assert_eq!(map["1"], vec!["ind01_1", "ind02_1"]);
        assert_eq!(map["3"], vec!["ind03_3"]);
        // token 5 is not on the allow-list
        assert_eq!(map.len(), 2);
    }

    #[test]
    fn test_implicit_uses_last_separator() {
        let samples = samples(&["line_a_2", "line_b_2"]);
        let map = resolve_generations(&samples, "2", "_").unwrap();
        assert_eq!(map["2"].len(), 2);
    }

    #[test]
    fn test_implicit_zero_match_is_error() {
        let samples = samples(&["ind01_1"]);
        assert!(resolve_generations(&samples, "1,7", "_").is_err());
    }

    #[test]
    fn test_parse_pairs() {
        let samples = samples(&["a_1", "b_2", "c_3"]);
        let map = resolve_generations(&samples, "1,2,3", "_").unwrap();
        let pairs = parse_pairs(&["1_3".to_string(), "2_3".to_string()], &map).unwrap();
        assert_eq!(pairs.len(), 2);
        assert_eq!(pairs[0].id(), "1_3");
    }

    #[test]
    fn test_parse_pairs_unknown_label() {
        let samples = samples(&["a_1"]);
        let map = resolve_generations(&samples, "1", "_").unwrap();
        assert!(parse_pairs(&["1_9".to_string()], &map).is_err());
    }

    #[test]
    fn test_parse_pairs_malformed() {
        let samples = samples(&["a_1"]);
        let map = resolve_generations(&samples, "1", "_").unwrap();
        assert!(parse_pairs(&["13".to_string()], &map).is_err());
    }
}
