// Copyright 2026-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0
#![deny(missing_docs)]
#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

//! Evaluates an ordered list of rules against a crash's annotations and
//! produces a verdict. Rule sets are data, not code: a small serde-deserializable
//! predicate DSL (equality, regex, set-membership, AND) is loaded from a TOML
//! file at startup, or a compiled-in default is used. A throttler never fails
//! to produce a verdict — rule-set *loading* can fail, evaluation cannot.
//!
//! A rule's verdict is usually fixed, but `sampled_accept` lets a rule accept
//! only a fraction of matching crashes — useful for canarying a new product
//! without ingesting its full volume. The resulting decision always carries
//! the sample percentage that was applied, whichever way the roll went.

use bpcollector_types::{ThrottleDecision, ThrottleVerdict};
use std::collections::BTreeMap;
use std::path::Path;
use thiserror::Error;

/// Errors loading or compiling a rule set. Evaluating an already-loaded
/// throttler is infallible.
#[derive(Debug, Error)]
pub enum ThrottleError {
    /// The rule file could not be read from disk.
    #[error("failed to read rule file {path}: {source}")]
    Io {
        /// Path that failed to read.
        path: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
    /// The rule file's TOML did not parse as a list of rules.
    #[error("failed to parse rule file {path}: {source}")]
    Parse {
        /// Path that failed to parse.
        path: String,
        /// Underlying parse error.
        #[source]
        source: toml::de::Error,
    },
    /// A rule's regex predicate did not compile.
    #[error("rule '{rule}' has an invalid regex pattern: {source}")]
    BadRegex {
        /// Name of the offending rule.
        rule: String,
        /// Underlying regex compile error.
        #[source]
        source: regex::Error,
    },
}

/// A predicate over a crash's annotations, as written in a rule file.
#[derive(Debug, Clone, serde::Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RawPredicate {
    /// The named annotation equals a fixed value.
    Eq {
        /// Annotation name to inspect.
        field: String,
        /// Value it must equal.
        value: String,
    },
    /// The named annotation matches a regular expression.
    Regex {
        /// Annotation name to inspect.
        field: String,
        /// Pattern the value must match anywhere within.
        pattern: String,
    },
    /// The named annotation is one of a fixed set of values.
    In {
        /// Annotation name to inspect.
        field: String,
        /// Set of acceptable values.
        values: Vec<String>,
    },
    /// All sub-predicates must hold.
    And(Vec<RawPredicate>),
}

#[derive(Debug)]
enum Predicate {
    Eq { field: String, value: String },
    Regex { field: String, pattern: regex::Regex },
    In { field: String, values: Vec<String> },
    And(Vec<Predicate>),
}

impl Predicate {
    fn compile(raw: RawPredicate, rule_name: &str) -> Result<Self, ThrottleError> {
        Ok(match raw {
            RawPredicate::Eq { field, value } => Predicate::Eq { field, value },
            RawPredicate::Regex { field, pattern } => {
                let compiled =
                    regex::Regex::new(&pattern).map_err(|source| ThrottleError::BadRegex {
                        rule: rule_name.to_owned(),
                        source,
                    })?;
                Predicate::Regex {
                    field,
                    pattern: compiled,
                }
            }
            RawPredicate::In { field, values } => Predicate::In { field, values },
            RawPredicate::And(subs) => Predicate::And(
                subs.into_iter()
                    .map(|p| Predicate::compile(p, rule_name))
                    .collect::<Result<Vec<_>, _>>()?,
            ),
        })
    }

    fn matches(&self, annotations: &BTreeMap<String, String>) -> bool {
        match self {
            Predicate::Eq { field, value } => {
                annotations.get(field).is_some_and(|v| v == value)
            }
            Predicate::Regex { field, pattern } => {
                annotations.get(field).is_some_and(|v| pattern.is_match(v))
            }
            Predicate::In { field, values } => annotations
                .get(field)
                .is_some_and(|v| values.iter().any(|candidate| candidate == v)),
            Predicate::And(subs) => subs.iter().all(|p| p.matches(annotations)),
        }
    }
}

/// A verdict as written in a rule file, including the "keep evaluating"
/// pseudo-verdict that lets a rule narrow a later one without deciding.
#[derive(Debug, Clone, Copy, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RawVerdict {
    /// Save and publish.
    Accept,
    /// Save only.
    Defer,
    /// Respond as accepted, then drop.
    FakeAccept,
    /// Refuse the crash.
    Reject,
    /// Accept with probability `percent / 100`, reject otherwise. Either way
    /// the decision records `percent` so downstream consumers can see the
    /// sampling rate that was applied.
    SampledAccept {
        /// Accept probability, 0-100.
        percent: u8,
    },
    /// Do not decide; continue to the next rule.
    Continue,
}

/// One entry in a rule set, as loaded from TOML/JSON.
#[derive(Debug, Clone, serde::Deserialize)]
pub struct RawRule {
    /// Rule name, surfaced in metrics and logs.
    pub name: String,
    /// Predicate the annotations must satisfy.
    pub predicate: RawPredicate,
    /// Verdict to assign when the predicate matches.
    pub verdict: RawVerdict,
}

struct Rule {
    name: String,
    predicate: Predicate,
    verdict: RawVerdict,
}

/// An ordered, compiled rule set that can evaluate crash annotations without
/// further allocation or I/O.
pub struct Throttler {
    rules: Vec<Rule>,
}

impl Throttler {
    /// Compile a throttler from an ordered list of raw rules.
    pub fn from_rules(raw_rules: Vec<RawRule>) -> Result<Self, ThrottleError> {
        let rules = raw_rules
            .into_iter()
            .map(|r| {
                let predicate = Predicate::compile(r.predicate, &r.name)?;
                Ok(Rule {
                    name: r.name,
                    predicate,
                    verdict: r.verdict,
                })
            })
            .collect::<Result<Vec<_>, ThrottleError>>()?;
        Ok(Self { rules })
    }

    /// Load a rule set from a TOML file of the shape `[[rule]] name = ... predicate = { kind = ... } verdict = ...`.
    pub fn load_from_file(path: &Path) -> Result<Self, ThrottleError> {
        let text = std::fs::read_to_string(path).map_err(|source| ThrottleError::Io {
            path: path.display().to_string(),
            source,
        })?;
        #[derive(serde::Deserialize)]
        struct RuleFile {
            rule: Vec<RawRule>,
        }
        let parsed: RuleFile = toml::from_str(&text).map_err(|source| ThrottleError::Parse {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_rules(parsed.rule)
    }

    /// The compiled-in default rule set: accept any crash whose `ProductName`
    /// is in `allowed_products`, reject everything else.
    pub fn default_rules(allowed_products: &[String]) -> Vec<RawRule> {
        vec![RawRule {
            name: "known_product".to_owned(),
            predicate: RawPredicate::In {
                field: "ProductName".to_owned(),
                values: allowed_products.to_vec(),
            },
            verdict: RawVerdict::Accept,
        }]
    }

    /// Evaluate the rule set against a crash's annotations. Always produces a
    /// decision: the special `Throttleable=0` bypass is checked first, then
    /// rules are walked in order, then an implicit reject if nothing matched.
    pub fn decide(&self, annotations: &BTreeMap<String, String>) -> ThrottleDecision {
        if annotations.get("Throttleable").map(String::as_str) == Some("0") {
            return ThrottleDecision {
                verdict: ThrottleVerdict::Accept,
                rule_name: "has_throttleable_0".to_owned(),
                sample_percent: None,
            };
        }

        for rule in &self.rules {
            if !rule.predicate.matches(annotations) {
                continue;
            }
            match rule.verdict {
                RawVerdict::Continue => continue,
                RawVerdict::Accept => {
                    return ThrottleDecision {
                        verdict: ThrottleVerdict::Accept,
                        rule_name: rule.name.clone(),
                        sample_percent: None,
                    }
                }
                RawVerdict::Defer => {
                    return ThrottleDecision {
                        verdict: ThrottleVerdict::Defer,
                        rule_name: rule.name.clone(),
                        sample_percent: None,
                    }
                }
                RawVerdict::FakeAccept => {
                    return ThrottleDecision {
                        verdict: ThrottleVerdict::FakeAccept,
                        rule_name: rule.name.clone(),
                        sample_percent: None,
                    }
                }
                RawVerdict::Reject => {
                    return ThrottleDecision {
                        verdict: ThrottleVerdict::Reject,
                        rule_name: rule.name.clone(),
                        sample_percent: None,
                    }
                }
                RawVerdict::SampledAccept { percent } => {
                    let verdict = if rand::random::<u8>() % 100 < percent.min(100) {
                        ThrottleVerdict::Accept
                    } else {
                        ThrottleVerdict::Reject
                    };
                    return ThrottleDecision {
                        verdict,
                        rule_name: rule.name.clone(),
                        sample_percent: Some(percent),
                    }
                }
            }
        }

        ThrottleDecision {
            verdict: ThrottleVerdict::Reject,
            rule_name: "default_reject".to_owned(),
            sample_percent: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn annotations(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn throttleable_zero_bypasses_everything() {
        let throttler = Throttler::from_rules(vec![RawRule {
            name: "reject_all".into(),
            predicate: RawPredicate::Eq {
                field: "ProductName".into(),
                value: "Nonexistent".into(),
            },
            verdict: RawVerdict::Reject,
        }])
        .unwrap();

        let decision = throttler.decide(&annotations(&[
            ("ProductName", "Firefox"),
            ("Throttleable", "0"),
        ]));
        assert_eq!(decision.verdict, ThrottleVerdict::Accept);
        assert_eq!(decision.rule_name, "has_throttleable_0");
    }

    #[test]
    fn default_rules_accept_known_product() {
        let products = vec!["Firefox".to_string(), "Thunderbird".to_string()];
        let throttler = Throttler::from_rules(Throttler::default_rules(&products)).unwrap();

        let accepted = throttler.decide(&annotations(&[("ProductName", "Firefox")]));
        assert_eq!(accepted.verdict, ThrottleVerdict::Accept);

        let rejected = throttler.decide(&annotations(&[("ProductName", "Other")]));
        assert_eq!(rejected.verdict, ThrottleVerdict::Reject);
        assert_eq!(rejected.rule_name, "default_reject");
    }

    #[test]
    fn continue_falls_through_to_next_rule() {
        let rules = vec![
            RawRule {
                name: "skip_nightly".into(),
                predicate: RawPredicate::Eq {
                    field: "Version".into(),
                    value: "Nightly".into(),
                },
                verdict: RawVerdict::Continue,
            },
            RawRule {
                name: "accept_any".into(),
                predicate: RawPredicate::And(vec![]),
                verdict: RawVerdict::Accept,
            },
        ];
        let throttler = Throttler::from_rules(rules).unwrap();
        let decision = throttler.decide(&annotations(&[("Version", "Nightly")]));
        assert_eq!(decision.verdict, ThrottleVerdict::Accept);
        assert_eq!(decision.rule_name, "accept_any");
    }

    #[test]
    fn and_predicate_requires_all_subpredicates() {
        let rule = RawRule {
            name: "defer_firefox_nightly".into(),
            predicate: RawPredicate::And(vec![
                RawPredicate::Eq {
                    field: "ProductName".into(),
                    value: "Firefox".into(),
                },
                RawPredicate::Eq {
                    field: "Version".into(),
                    value: "Nightly".into(),
                },
            ]),
            verdict: RawVerdict::Defer,
        };
        let throttler = Throttler::from_rules(vec![rule]).unwrap();

        let both = throttler.decide(&annotations(&[
            ("ProductName", "Firefox"),
            ("Version", "Nightly"),
        ]));
        assert_eq!(both.verdict, ThrottleVerdict::Defer);

        let only_one = throttler.decide(&annotations(&[("ProductName", "Firefox")]));
        assert_eq!(only_one.verdict, ThrottleVerdict::Reject);
    }

    #[test]
    fn regex_predicate_matches_substring() {
        let rule = RawRule {
            name: "beta_channel".into(),
            predicate: RawPredicate::Regex {
                field: "ReleaseChannel".into(),
                pattern: "^beta".into(),
            },
            verdict: RawVerdict::Accept,
        };
        let throttler = Throttler::from_rules(vec![rule]).unwrap();
        let decision = throttler.decide(&annotations(&[("ReleaseChannel", "beta-2")]));
        assert_eq!(decision.verdict, ThrottleVerdict::Accept);
    }

    #[test]
    fn sampled_accept_always_accepts_at_100_percent() {
        let rule = RawRule {
            name: "canary".into(),
            predicate: RawPredicate::Eq {
                field: "ProductName".into(),
                value: "Firefox".into(),
            },
            verdict: RawVerdict::SampledAccept { percent: 100 },
        };
        let throttler = Throttler::from_rules(vec![rule]).unwrap();
        let decision = throttler.decide(&annotations(&[("ProductName", "Firefox")]));
        assert_eq!(decision.verdict, ThrottleVerdict::Accept);
        assert_eq!(decision.sample_percent, Some(100));
    }

    #[test]
    fn sampled_accept_always_rejects_at_0_percent() {
        let rule = RawRule {
            name: "canary".into(),
            predicate: RawPredicate::Eq {
                field: "ProductName".into(),
                value: "Firefox".into(),
            },
            verdict: RawVerdict::SampledAccept { percent: 0 },
        };
        let throttler = Throttler::from_rules(vec![rule]).unwrap();
        let decision = throttler.decide(&annotations(&[("ProductName", "Firefox")]));
        assert_eq!(decision.verdict, ThrottleVerdict::Reject);
        assert_eq!(decision.sample_percent, Some(0));
    }

    #[test]
    fn bad_regex_fails_to_compile() {
        let rule = RawRule {
            name: "broken".into(),
            predicate: RawPredicate::Regex {
                field: "x".into(),
                pattern: "(".into(),
            },
            verdict: RawVerdict::Accept,
        };
        assert!(Throttler::from_rules(vec![rule]).is_err());
    }

    #[test]
    fn load_from_toml_file() {
        let dir = tempfile_dir();
        let path = dir.join("rules.toml");
        std::fs::write(
            &path,
            r#"
            [[rule]]
            name = "known_product"
            verdict = "accept"
            [rule.predicate]
            kind = "in"
            field = "ProductName"
            values = ["Firefox"]
            "#,
        )
        .unwrap();
        let throttler = Throttler::load_from_file(&path).unwrap();
        let decision = throttler.decide(&annotations(&[("ProductName", "Firefox")]));
        assert_eq!(decision.verdict, ThrottleVerdict::Accept);
        std::fs::remove_dir_all(&dir).ok();
    }

    fn tempfile_dir() -> std::path::PathBuf {
        let dir = std::env::temp_dir().join(format!(
            "bpcollector-throttle-test-{:x}",
            std::process::id()
        ));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    proptest! {
        #[test]
        fn unknown_product_never_accepted_by_default(name in "[A-Za-z]{1,12}") {
            let products = vec!["Firefox".to_string()];
            let throttler = Throttler::from_rules(Throttler::default_rules(&products)).unwrap();
            let decision = throttler.decide(&annotations(&[("ProductName", &name)]));
            if name != "Firefox" {
                prop_assert_eq!(decision.verdict, ThrottleVerdict::Reject);
            }
        }
    }
}
