//! `${VAR}` and `${VAR:-default}` expansion for string settings.

use crate::ConfigError;

/// Expand `${VAR}` references in `value`.
///
/// An unset variable without a default is an error naming `field`.
/// Strings without `${` are returned as is.
pub(crate) fn expand_env(value: &str, field: &str) -> Result<String, ConfigError> {
    if !value.contains("${") {
        return Ok(value.to_owned());
    }

    shellexpand::env_with_context(value, |var| -> Result<Option<String>, UnsetVar> {
        std::env::var(var)
            .map(Some)
            .map_err(|_| UnsetVar(var.to_owned()))
    })
    .map(std::borrow::Cow::into_owned)
    .map_err(|e| ConfigError::EnvVar {
        field: field.to_owned(),
        message: format!("${{{}}} not set", e.cause.0),
    })
}

struct UnsetVar(String);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_used_when_unset() {
        // SAFETY: the variable name is unique to this test
        unsafe {
            std::env::remove_var("DIAGEX_TEST_UNSET_URL");
        }
        let url = expand_env("${DIAGEX_TEST_UNSET_URL:-https://kroki.io}", "renderer.kroki_url");
        assert_eq!(url.unwrap(), "https://kroki.io");
    }

    #[test]
    fn test_value_wins_over_default() {
        // SAFETY: the variable name is unique to this test
        unsafe {
            std::env::set_var("DIAGEX_TEST_SET_URL", "http://localhost:8000");
        }
        let url = expand_env("${DIAGEX_TEST_SET_URL:-https://kroki.io}", "renderer.kroki_url");
        assert_eq!(url.unwrap(), "http://localhost:8000");
        unsafe {
            std::env::remove_var("DIAGEX_TEST_SET_URL");
        }
    }

    #[test]
    fn test_embedded_reference() {
        // SAFETY: the variable name is unique to this test
        unsafe {
            std::env::set_var("DIAGEX_TEST_OUT_ROOT", "/srv/site");
        }
        let dir = expand_env("${DIAGEX_TEST_OUT_ROOT}/diagrams", "export.output_dir");
        assert_eq!(dir.unwrap(), "/srv/site/diagrams");
        unsafe {
            std::env::remove_var("DIAGEX_TEST_OUT_ROOT");
        }
    }

    #[test]
    fn test_missing_variable_names_field() {
        // SAFETY: the variable name is unique to this test
        unsafe {
            std::env::remove_var("DIAGEX_TEST_MISSING");
        }
        let err = expand_env("${DIAGEX_TEST_MISSING}", "renderer.command").unwrap_err();
        assert!(matches!(err, ConfigError::EnvVar { .. }));
        let message = err.to_string();
        assert!(message.contains("DIAGEX_TEST_MISSING"));
        assert!(message.contains("renderer.command"));
    }

    #[test]
    fn test_plain_strings_untouched() {
        assert_eq!(expand_env("mmdc --quiet", "renderer.command").unwrap(), "mmdc --quiet");
    }
}
