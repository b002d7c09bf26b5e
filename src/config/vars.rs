//! Environment variable interpolation for config files.
//!
//! Syntax:
//! - `$VAR` or `${VAR}`: value of VAR, error if unset
//! - `${VAR:-fallback}`: fallback if VAR is unset or empty
//! - `${VAR-fallback}`: fallback only if VAR is unset
//! - `$$`: a literal `$`

use regex::{Captures, Regex};
use std::env;
use std::sync::LazyLock;

static PLACEHOLDER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?x)
        (?P<escape>\$\$)
        |
        \$\{ (?P<braced>[A-Za-z_][A-Za-z0-9_]*) (?: (?P<op>:?-) (?P<fallback>[^}]*) )? \}
        |
        \$(?P<bare>[A-Za-z_][A-Za-z0-9_]*)
        ",
    )
    .expect("placeholder pattern is valid")
});

/// Interpolated text plus every problem found along the way.
#[derive(Debug)]
pub struct Interpolated {
    pub text: String,
    pub errors: Vec<String>,
}

/// Substitute environment variables in `input`.
///
/// Errors are collected rather than returned early so a config with several
/// missing variables reports all of them at once.
pub fn interpolate(input: &str) -> Interpolated {
    let mut errors = Vec::new();
    let text = PLACEHOLDER
        .replace_all(input, |caps: &Captures| resolve(caps, &mut errors))
        .into_owned();
    Interpolated { text, errors }
}

fn resolve(caps: &Captures, errors: &mut Vec<String>) -> String {
    let original = &caps[0];
    if caps.name("escape").is_some() {
        return "$".to_string();
    }

    let Some(name) = caps.name("braced").or_else(|| caps.name("bare")) else {
        return original.to_string();
    };
    let name = name.as_str();
    let empty_counts_as_unset = caps.name("op").is_some_and(|op| op.as_str() == ":-");
    let fallback = caps.name("fallback").map(|m| m.as_str());

    match env::var(name) {
        Ok(value) if value.contains(['\n', '\r']) => {
            errors.push(format!(
                "environment variable '{name}' contains newlines, which is not allowed"
            ));
            original.to_string()
        }
        Ok(value) if value.is_empty() && empty_counts_as_unset => {
            fallback.unwrap_or_default().to_string()
        }
        Ok(value) => value,
        Err(_) => match fallback {
            Some(fallback) => fallback.to_string(),
            None => {
                errors.push(format!("environment variable '{name}' is not set"));
                original.to_string()
            }
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn with_env<R>(vars: &[(&str, Option<&str>)], f: impl FnOnce() -> R) -> R {
        let saved: Vec<_> = vars.iter().map(|(k, _)| (*k, env::var(k).ok())).collect();
        // SAFETY: each test uses unique variable names and restores them afterwards
        for (key, value) in vars {
            match value {
                Some(v) => unsafe { env::set_var(key, v) },
                None => unsafe { env::remove_var(key) },
            }
        }
        let result = f();
        for (key, value) in saved {
            match value {
                Some(v) => unsafe { env::set_var(key, v) },
                None => unsafe { env::remove_var(key) },
            }
        }
        result
    }

    #[test]
    fn test_bare_and_braced() {
        with_env(
            &[("SLUICE_T_A", Some("one")), ("SLUICE_T_B", Some("two"))],
            || {
                let out = interpolate("$SLUICE_T_A/${SLUICE_T_B}");
                assert!(out.errors.is_empty());
                assert_eq!(out.text, "one/two");
            },
        );
    }

    #[test]
    fn test_all_missing_variables_reported() {
        with_env(
            &[("SLUICE_T_MISS1", None), ("SLUICE_T_MISS2", None)],
            || {
                let out = interpolate("a: $SLUICE_T_MISS1, b: ${SLUICE_T_MISS2}");
                assert_eq!(out.errors.len(), 2);
                assert!(out.errors[0].contains("not set"));
            },
        );
    }

    #[test]
    fn test_fallback_operators() {
        with_env(
            &[("SLUICE_T_EMPTY", Some("")), ("SLUICE_T_UNSET", None)],
            || {
                assert_eq!(interpolate("${SLUICE_T_UNSET:-x}").text, "x");
                assert_eq!(interpolate("${SLUICE_T_UNSET-x}").text, "x");
                assert_eq!(interpolate("${SLUICE_T_EMPTY:-x}").text, "x");
                assert_eq!(interpolate("${SLUICE_T_EMPTY-x}").text, "");
            },
        );
    }

    #[test]
    fn test_escape_and_newline_rejection() {
        assert_eq!(interpolate("cost: $$5").text, "cost: $5");
        with_env(&[("SLUICE_T_NL", Some("a\nb"))], || {
            let out = interpolate("v: $SLUICE_T_NL");
            assert!(out.errors[0].contains("newlines"));
        });
    }

    #[test]
    fn test_sink_path_from_env() {
        with_env(&[("SLUICE_T_SINK", Some("/data/out"))], || {
            let out = interpolate("sink:\n  path: ${SLUICE_T_SINK}\n");
            assert!(out.errors.is_empty());
            assert!(out.text.contains("path: /data/out"));
        });
    }
}
