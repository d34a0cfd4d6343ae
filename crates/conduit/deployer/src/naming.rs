//! Platform resource naming
//!
//! Turns arbitrary endpoint names into identifiers the platform accepts.
//! Each resource kind has its own length bounds and character set; the
//! rules live in one table instead of being repeated at every call site.

use conduit_types::EndpointId;
use std::fmt;
use thiserror::Error;

/// Kind of platform resource being named
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NameKind {
    Service,
    ScalingPolicy,
    Secret,
}

impl NameKind {
    /// Naming rule for this kind
    pub fn rule(self) -> &'static NameRule {
        match self {
            NameKind::Service => &NAME_RULES[0],
            NameKind::ScalingPolicy => &NAME_RULES[1],
            NameKind::Secret => &NAME_RULES[2],
        }
    }
}

impl fmt::Display for NameKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NameKind::Service => write!(f, "service"),
            NameKind::ScalingPolicy => write!(f, "scaling policy"),
            NameKind::Secret => write!(f, "secret"),
        }
    }
}

/// Naming constraints of one resource kind
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NameRule {
    pub kind: NameKind,
    pub min_len: usize,
    pub max_len: usize,
    /// Allowed characters besides ASCII letters and digits
    pub punctuation: &'static [char],
    /// Substitute for disallowed characters
    pub replacement: char,
    /// Separator between the body and the uniqueness suffix
    pub joiner: char,
}

impl NameRule {
    pub fn allows(&self, c: char) -> bool {
        c.is_ascii_alphanumeric() || self.punctuation.contains(&c)
    }
}

const NAME_RULES: [NameRule; 3] = [
    NameRule {
        kind: NameKind::Service,
        min_len: 4,
        max_len: 40,
        punctuation: &['-'],
        replacement: '-',
        joiner: '-',
    },
    NameRule {
        kind: NameKind::ScalingPolicy,
        min_len: 4,
        max_len: 32,
        punctuation: &['-'],
        replacement: '-',
        joiner: '-',
    },
    NameRule {
        kind: NameKind::Secret,
        min_len: 1,
        max_len: 512,
        punctuation: &['-', '_', '.', '/'],
        replacement: '_',
        joiner: '_',
    },
];

/// A name that cannot be made legal
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Invalid {kind} name '{raw}': {reason}")]
pub struct InvalidNameError {
    pub kind: NameKind,
    pub raw: String,
    pub reason: String,
}

impl InvalidNameError {
    fn new(kind: NameKind, raw: &str, reason: impl Into<String>) -> Self {
        Self {
            kind,
            raw: raw.to_string(),
            reason: reason.into(),
        }
    }
}

fn is_alnum(c: char) -> bool {
    c.is_ascii_alphanumeric()
}

/// Sanitize `raw` and append `suffix` under the rule of `kind`.
pub fn sanitize(raw: &str, suffix: &str, kind: NameKind) -> Result<String, InvalidNameError> {
    sanitize_with(raw, suffix, kind.rule())
}

/// Sanitize against an explicit rule.
pub fn sanitize_with(raw: &str, suffix: &str, rule: &NameRule) -> Result<String, InvalidNameError> {
    validate_suffix(suffix, rule).map_err(|reason| InvalidNameError::new(rule.kind, raw, reason))?;

    // Replace, then collapse runs of punctuation to their first character.
    let mut collapsed = String::with_capacity(raw.len());
    let mut previous_punct = false;
    for c in raw.chars() {
        let c = if rule.allows(c) { c } else { rule.replacement };
        let punct = !is_alnum(c);
        if punct && previous_punct {
            continue;
        }
        collapsed.push(c);
        previous_punct = punct;
    }

    let body = collapsed.trim_matches(|c: char| !is_alnum(c));
    if body.is_empty() {
        return Err(InvalidNameError::new(
            rule.kind,
            raw,
            "no letters or digits remain",
        ));
    }

    let reserved = if suffix.is_empty() { 0 } else { suffix.len() + 1 };
    if reserved >= rule.max_len {
        return Err(InvalidNameError::new(
            rule.kind,
            raw,
            format!("suffix '{}' leaves no room within {} characters", suffix, rule.max_len),
        ));
    }
    let budget = rule.max_len - reserved;

    // Everything left is ASCII, so byte slicing is char slicing.
    let body = if body.len() > budget { &body[..budget] } else { body };
    let body = body.trim_end_matches(|c: char| !is_alnum(c));

    match (body.chars().next(), body.chars().last()) {
        (Some(first), Some(last)) if is_alnum(first) && is_alnum(last) => {}
        _ => {
            return Err(InvalidNameError::new(
                rule.kind,
                raw,
                "must start and end with a letter or digit",
            ))
        }
    }

    let name = if suffix.is_empty() {
        body.to_string()
    } else {
        format!("{}{}{}", body, rule.joiner, suffix)
    };

    if name.len() < rule.min_len || name.len() > rule.max_len {
        return Err(InvalidNameError::new(
            rule.kind,
            raw,
            format!(
                "'{}' must be between {} and {} characters",
                name, rule.min_len, rule.max_len
            ),
        ));
    }

    Ok(name)
}

fn validate_suffix(suffix: &str, rule: &NameRule) -> Result<(), String> {
    if suffix.is_empty() {
        return Ok(());
    }
    if !suffix.chars().all(|c| rule.allows(c)) {
        return Err(format!("suffix '{}' contains disallowed characters", suffix));
    }
    let starts_ok = suffix.chars().next().is_some_and(is_alnum);
    let ends_ok = suffix.chars().last().is_some_and(is_alnum);
    if !starts_ok || !ends_ok {
        return Err(format!("suffix '{}' must start and end with a letter or digit", suffix));
    }
    Ok(())
}

/// Name of a platform resource owned by an endpoint: `{prefix}{name}` plus
/// the endpoint's short id as uniqueness suffix.
pub fn resource_name(
    kind: NameKind,
    prefix: &str,
    endpoint_name: &str,
    endpoint_id: &EndpointId,
) -> Result<String, InvalidNameError> {
    sanitize(&format!("{}{}", prefix, endpoint_name), &endpoint_id.short(), kind)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_punctuation_collapses_to_single_hyphen() {
        let name = sanitize("My Service!!", "a1b2c3d4", NameKind::Service).unwrap();
        assert_eq!(name, "My-Service-a1b2c3d4");
    }

    #[test]
    fn test_leading_and_trailing_separators_stripped() {
        let name = sanitize("--__weather agent__--", "abc", NameKind::Service).unwrap();
        assert_eq!(name, "weather-agent-abc");
    }

    #[test]
    fn test_no_alphanumerics_is_rejected() {
        let err = sanitize("!!! ???", "a1b2c3d4", NameKind::Service).unwrap_err();
        assert_eq!(err.kind, NameKind::Service);

        assert!(sanitize("", "a1b2c3d4", NameKind::Secret).is_err());
        assert!(sanitize("日本語", "a1b2c3d4", NameKind::ScalingPolicy).is_err());
    }

    #[test]
    fn test_truncation_respects_max_length_and_retrims() {
        // 30 chars then a hyphen right at the cut point
        let raw = format!("{}-{}", "a".repeat(30), "b".repeat(20));
        let name = sanitize(&raw, "a1b2c3d4", NameKind::Service).unwrap();
        assert!(name.len() <= 40);
        assert_eq!(name, format!("{}-a1b2c3d4", "a".repeat(30)));
    }

    #[test]
    fn test_scaling_policy_limit_is_32() {
        let name = sanitize(&"x".repeat(100), "a1b2c3d4", NameKind::ScalingPolicy).unwrap();
        assert_eq!(name.len(), 32);
        assert!(name.ends_with("-a1b2c3d4"));
    }

    #[test]
    fn test_secret_names_keep_path_separators() {
        let name = sanitize("conduit/weather agent//prod", "a1b2c3d4", NameKind::Secret).unwrap();
        assert_eq!(name, "conduit/weather_agent/prod_a1b2c3d4");
    }

    #[test]
    fn test_invalid_suffix_is_rejected() {
        assert!(sanitize("weather", "a1!", NameKind::Service).is_err());
        assert!(sanitize("weather", "-abc", NameKind::Service).is_err());
        assert!(sanitize("weather", &"a".repeat(40), NameKind::Service).is_err());
    }

    #[test]
    fn test_resource_name_uses_short_id() {
        let id = EndpointId::from_uuid(
            uuid::Uuid::parse_str("a1b2c3d4-0000-4000-8000-000000000000").unwrap(),
        );
        let name = resource_name(NameKind::Service, "conduit-", "weather", &id).unwrap();
        assert_eq!(name, "conduit-weather-a1b2c3d4");
    }

    proptest! {
        #[test]
        fn prop_sanitized_names_are_legal(
            raw in "\\PC{0,80}",
            suffix in "[a-z0-9]{8}",
            kind in prop_oneof![
                Just(NameKind::Service),
                Just(NameKind::ScalingPolicy),
                Just(NameKind::Secret),
            ],
        ) {
            let rule = kind.rule();
            match sanitize(&raw, &suffix, kind) {
                Ok(name) => {
                    prop_assert!(name.chars().all(|c| rule.allows(c)));
                    prop_assert!(name.chars().next().is_some_and(is_alnum));
                    prop_assert!(name.chars().last().is_some_and(is_alnum));
                    prop_assert!(name.len() >= rule.min_len && name.len() <= rule.max_len);
                    prop_assert!(name.ends_with(&suffix));
                }
                Err(_) => {
                    prop_assert!(!raw.chars().any(is_alnum));
                }
            }
        }
    }
}
