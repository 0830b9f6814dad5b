//! Reference normalization
//!
//! Turns raw input references (URLs pasted by a user, fields of playlist entries) into
//! [`NormalizedReference`]s with a canonical key. Recognized shapes come from a
//! [`ReferenceRule`] table, so the normalizer itself knows nothing about any particular site.

use regex::Regex;
use url::Url;

use crate::config::{Extraction, NormalizerConfig, ReferenceRule};
use crate::error::{Error, Result};
use crate::types::NormalizedReference;

struct CompiledRule {
    rule: ReferenceRule,
    regex: Regex,
}

/// Pure, deterministic reference normalizer driven by a rule table
pub struct ReferenceNormalizer {
    rules: Vec<CompiledRule>,
}

impl std::fmt::Debug for ReferenceNormalizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReferenceNormalizer")
            .field(
                "rules",
                &self.rules.iter().map(|r| &r.rule.name).collect::<Vec<_>>(),
            )
            .finish()
    }
}

impl ReferenceNormalizer {
    /// Compile a rule table
    ///
    /// Fails with [`Error::Config`] when the table is empty or a pattern is not a valid regex.
    pub fn new(rules: &[ReferenceRule]) -> Result<Self> {
        if rules.is_empty() {
            return Err(Error::config(
                "normalizer.rules",
                "at least one reference rule is required",
            ));
        }

        let rules = rules
            .iter()
            .map(|rule| {
                let regex = Regex::new(&rule.pattern).map_err(|e| {
                    Error::config(
                        "normalizer.rules",
                        format!("rule '{}' has an invalid pattern: {}", rule.name, e),
                    )
                })?;
                Ok(CompiledRule {
                    rule: rule.clone(),
                    regex,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self { rules })
    }

    /// Compile the rules from configuration
    pub fn from_config(config: &NormalizerConfig) -> Result<Self> {
        Self::new(&config.rules)
    }

    /// Normalizer mapping every non-empty reference to itself
    #[allow(clippy::expect_used)]
    pub fn identity() -> Self {
        let rule = ReferenceRule::identity();
        let regex = Regex::new(&rule.pattern).expect("identity pattern is a valid regex");
        Self {
            rules: vec![CompiledRule { rule, regex }],
        }
    }

    /// Normalize one raw reference
    ///
    /// Rules are tried in order; a rule applies when its pattern matches and its extraction
    /// yields a non-empty value. Fails with [`Error::InvalidReference`] when no rule applies.
    pub fn normalize(&self, raw: &str) -> Result<NormalizedReference> {
        let reference = raw.trim();
        if reference.is_empty() {
            return Err(Error::InvalidReference {
                reference: raw.to_string(),
                reason: "reference is empty".to_string(),
            });
        }

        for compiled in &self.rules {
            let Some(value) = extract(compiled, reference) else {
                continue;
            };
            let key = compiled.rule.key_template.replace("{id}", &value);
            tracing::trace!(rule = %compiled.rule.name, reference, key, "reference recognized");
            return NormalizedReference::new(reference, key, compiled.rule.kind);
        }

        Err(Error::InvalidReference {
            reference: reference.to_string(),
            reason: "no reference rule matched".to_string(),
        })
    }

    /// Names of the compiled rules, in evaluation order
    pub fn rule_names(&self) -> Vec<&str> {
        self.rules.iter().map(|r| r.rule.name.as_str()).collect()
    }
}

fn extract(compiled: &CompiledRule, reference: &str) -> Option<String> {
    let captures = compiled.regex.captures(reference)?;

    let value = match &compiled.rule.extract {
        Extraction::Capture { group } => match group.parse::<usize>() {
            Ok(index) => captures.get(index),
            Err(_) => captures.name(group),
        }
        .map(|m| m.as_str().to_string()),
        Extraction::QueryParam { name } => Url::parse(reference)
            .ok()?
            .query_pairs()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.into_owned()),
        Extraction::PathSegment { index } => {
            let url = Url::parse(reference).ok()?;
            let segment = url
                .path_segments()?
                .filter(|s| !s.is_empty())
                .nth(*index)
                .map(str::to_string);
            segment
        }
        Extraction::Whole => Some(reference.to_string()),
    };

    value.filter(|v| !v.trim().is_empty())
}
