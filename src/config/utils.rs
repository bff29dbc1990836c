use std::env;
use std::str::FromStr;

/// Parse a boolean value from a string, supporting multiple formats
///
/// Accepts: "true", "false", "1", "0", "yes", "no" (case insensitive)
pub fn parse_bool(s: &str) -> Option<bool> {
    match s.to_lowercase().as_str() {
        "true" | "1" | "yes" => Some(true),
        "false" | "0" | "no" => Some(false),
        _ => None,
    }
}

/// Read and parse an environment variable.
///
/// Unset or blank yields `Ok(None)`; a value that does not parse is an error
/// naming the variable.
pub fn env_parse<T>(name: &str) -> Result<Option<T>, String>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(name) {
        Ok(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|e| format!("Invalid {name} environment variable '{raw}': {e}")),
        _ => Ok(None),
    }
}

/// Read a boolean environment variable using [`parse_bool`].
pub fn env_bool(name: &str) -> Result<Option<bool>, String> {
    match env::var(name) {
        Ok(raw) if !raw.trim().is_empty() => parse_bool(raw.trim())
            .map(Some)
            .ok_or_else(|| format!("Invalid {name} environment variable '{raw}': expected a boolean")),
        _ => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    fn test_parse_bool_true_variants() {
        assert_eq!(parse_bool("true"), Some(true));
        assert_eq!(parse_bool("TRUE"), Some(true));
        assert_eq!(parse_bool("1"), Some(true));
        assert_eq!(parse_bool("yes"), Some(true));
        assert_eq!(parse_bool("Yes"), Some(true));
    }

    #[test]
    fn test_parse_bool_false_variants() {
        assert_eq!(parse_bool("false"), Some(false));
        assert_eq!(parse_bool("0"), Some(false));
        assert_eq!(parse_bool("NO"), Some(false));
    }

    #[test]
    fn test_parse_bool_invalid() {
        assert_eq!(parse_bool("invalid"), None);
        assert_eq!(parse_bool("2"), None);
        assert_eq!(parse_bool(""), None);
    }

    #[test]
    #[serial]
    fn test_env_parse() {
        unsafe {
            env::set_var("MINIMAX_TEST_PARSE", " 42 ");
        }
        assert_eq!(env_parse::<u32>("MINIMAX_TEST_PARSE"), Ok(Some(42)));

        unsafe {
            env::set_var("MINIMAX_TEST_PARSE", "forty-two");
        }
        let err = env_parse::<u32>("MINIMAX_TEST_PARSE").unwrap_err();
        assert!(err.contains("MINIMAX_TEST_PARSE"));

        unsafe {
            env::set_var("MINIMAX_TEST_PARSE", "");
        }
        assert_eq!(env_parse::<u32>("MINIMAX_TEST_PARSE"), Ok(None));

        unsafe {
            env::remove_var("MINIMAX_TEST_PARSE");
        }
        assert_eq!(env_parse::<u32>("MINIMAX_TEST_PARSE"), Ok(None));
    }

    #[test]
    #[serial]
    fn test_env_bool() {
        unsafe {
            env::set_var("MINIMAX_TEST_BOOL", "yes");
        }
        assert_eq!(env_bool("MINIMAX_TEST_BOOL"), Ok(Some(true)));

        unsafe {
            env::set_var("MINIMAX_TEST_BOOL", "sometimes");
        }
        assert!(env_bool("MINIMAX_TEST_BOOL").is_err());

        unsafe {
            env::remove_var("MINIMAX_TEST_BOOL");
        }
        assert_eq!(env_bool("MINIMAX_TEST_BOOL"), Ok(None));
    }
}
