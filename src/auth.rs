use crate::config::AppConfig;
use crate::error::GatewayError;
use http::header::AUTHORIZATION;
use rustc_hash::FxHashSet;

/// Compact key index used in hot-path authentication.
pub enum AllowedClientKeys {
    /// No keys configured: the check is disabled.
    Disabled,
    Single(Box<str>),
    Multiple(FxHashSet<String>),
}

/// Extract the bearer token from `Authorization: Bearer <key>`.
///
/// The scheme is matched case-insensitively.
///
/// # Errors
///
/// Returns `GatewayError::Auth` when the header is missing, is not valid
/// UTF-8, or does not use the bearer scheme.
pub fn extract_bearer_token(headers: &http::HeaderMap) -> Result<&str, GatewayError> {
    let value = headers
        .get(AUTHORIZATION)
        .ok_or_else(|| GatewayError::Auth("Missing API key".to_string()))?;
    let value = value
        .to_str()
        .map_err(|_| GatewayError::Auth("Invalid API key".to_string()))?;
    match value.split_once(' ') {
        Some((scheme, token)) if scheme.eq_ignore_ascii_case("bearer") => Ok(token.trim()),
        _ => Err(GatewayError::Auth("Invalid API key".to_string())),
    }
}

/// Authenticate an incoming request against pre-indexed `allowed_keys`.
///
/// # Errors
///
/// Returns `GatewayError::Auth` when the API key is missing or invalid.
pub fn authenticate(
    headers: &http::HeaderMap,
    allowed_keys: &AllowedClientKeys,
) -> Result<(), GatewayError> {
    match allowed_keys {
        AllowedClientKeys::Disabled => Ok(()),
        AllowedClientKeys::Single(expected) => {
            if extract_bearer_token(headers)? == expected.as_ref() {
                Ok(())
            } else {
                Err(GatewayError::Auth("Invalid API key".to_string()))
            }
        }
        AllowedClientKeys::Multiple(allowed_set) => {
            if allowed_set.contains(extract_bearer_token(headers)?) {
                Ok(())
            } else {
                Err(GatewayError::Auth("Invalid API key".to_string()))
            }
        }
    }
}

/// Build a hash-set index for allowed client keys.
#[must_use]
pub fn build_allowed_key_set(config: &AppConfig) -> AllowedClientKeys {
    let mut allowed_set: FxHashSet<String> = config
        .client_authentication
        .allowed_keys
        .iter()
        .cloned()
        .collect();

    match allowed_set.len() {
        0 => AllowedClientKeys::Disabled,
        1 => match allowed_set.drain().next() {
            Some(single_key) => AllowedClientKeys::Single(single_key.into_boxed_str()),
            None => AllowedClientKeys::Disabled,
        },
        _ => AllowedClientKeys::Multiple(allowed_set),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AppConfig, ClientAuthConfig};

    fn make_config(allowed_keys: Vec<String>) -> AppConfig {
        AppConfig {
            client_authentication: ClientAuthConfig { allowed_keys },
            ..AppConfig::default()
        }
    }

    #[test]
    fn test_extract_bearer() {
        let mut headers = http::HeaderMap::new();
        headers.insert("authorization", "Bearer sk-test123".parse().unwrap());
        assert_eq!(extract_bearer_token(&headers).unwrap(), "sk-test123");
    }

    #[test]
    fn test_extract_bearer_scheme_case_insensitive() {
        let mut headers = http::HeaderMap::new();
        headers.insert("authorization", "bearer sk-lower".parse().unwrap());
        assert_eq!(extract_bearer_token(&headers).unwrap(), "sk-lower");
    }

    #[test]
    fn test_extract_rejects_other_scheme() {
        let mut headers = http::HeaderMap::new();
        headers.insert("authorization", "Basic dXNlcjpwYXNz".parse().unwrap());
        let err = extract_bearer_token(&headers).unwrap_err();
        assert!(matches!(err, GatewayError::Auth(_)));
    }

    #[test]
    fn test_extract_missing_key() {
        let headers = http::HeaderMap::new();
        let err = extract_bearer_token(&headers).unwrap_err();
        assert_eq!(err.to_string(), "Auth error: Missing API key");
    }

    #[test]
    fn test_authenticate_valid_key() {
        let key_index = build_allowed_key_set(&make_config(vec!["valid-key".to_string()]));
        let mut headers = http::HeaderMap::new();
        headers.insert("authorization", "Bearer valid-key".parse().unwrap());
        assert!(authenticate(&headers, &key_index).is_ok());
    }

    #[test]
    fn test_authenticate_invalid_key() {
        let key_index = build_allowed_key_set(&make_config(vec!["valid-key".to_string()]));
        let mut headers = http::HeaderMap::new();
        headers.insert("authorization", "Bearer wrong-key".parse().unwrap());
        let err = authenticate(&headers, &key_index).unwrap_err();
        assert!(matches!(err, GatewayError::Auth(_)));
    }

    #[test]
    fn test_authenticate_disabled_accepts_anything() {
        let key_index = build_allowed_key_set(&make_config(vec![]));
        assert!(authenticate(&http::HeaderMap::new(), &key_index).is_ok());
    }

    #[test]
    fn test_build_allowed_key_set_multiple() {
        let index = build_allowed_key_set(&make_config(vec![
            "a".to_string(),
            "b".to_string(),
            "a".to_string(),
        ]));
        match index {
            AllowedClientKeys::Multiple(set) => {
                assert!(set.contains("a"));
                assert!(set.contains("b"));
                assert_eq!(set.len(), 2);
            }
            _ => panic!("expected multiple-key index"),
        }
    }

    #[test]
    fn test_build_allowed_key_set_single() {
        let index = build_allowed_key_set(&make_config(vec![
            "single".to_string(),
            "single".to_string(),
        ]));
        match index {
            AllowedClientKeys::Single(raw) => assert_eq!(raw.as_ref(), "single"),
            _ => panic!("expected single-key index"),
        }
    }
}
