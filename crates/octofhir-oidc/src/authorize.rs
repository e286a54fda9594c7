//! Authorization response parsing.
//!
//! Accepts whatever the redirect delivered: a full callback URL, a bare
//! query string, a fragment, or a form-post body. Nothing in it is trusted.

use std::collections::BTreeMap;

/// Parsed authorization response.
///
/// Empty parameter values are treated as absent. When a parameter repeats,
/// the first occurrence wins.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AuthorizeResponse {
    /// The input as received.
    pub raw: String,
    pub state: Option<String>,
    pub code: Option<String>,
    pub error: Option<String>,
    pub error_description: Option<String>,
    /// Every parameter of the response.
    pub values: BTreeMap<String, String>,
}

impl AuthorizeResponse {
    /// Parses a raw authorization response. Never fails.
    ///
    /// Parameters are taken from the fragment when it carries any, otherwise
    /// from the query. Input without `?` or `#` is read as a form body.
    #[must_use]
    pub fn parse(raw: &str) -> Self {
        let params = parameter_part(raw);

        let mut values = BTreeMap::new();
        for (key, value) in url::form_urlencoded::parse(params.as_bytes()) {
            if value.is_empty() {
                continue;
            }
            values
                .entry(key.into_owned())
                .or_insert_with(|| value.into_owned());
        }

        Self {
            raw: raw.to_string(),
            state: values.get("state").cloned(),
            code: values.get("code").cloned(),
            error: values.get("error").cloned(),
            error_description: values.get("error_description").cloned(),
            values,
        }
    }

    /// Returns `true` if the authorization server reported an error.
    #[must_use]
    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }

    /// Returns a parameter by name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&str> {
        self.values.get(name).map(String::as_str)
    }
}

fn parameter_part(raw: &str) -> &str {
    let raw = raw.trim();

    if let Some((_, fragment)) = raw.split_once('#') {
        if fragment.contains('=') {
            return fragment;
        }
    }

    let without_fragment = raw.split_once('#').map_or(raw, |(before, _)| before);

    match without_fragment.split_once('?') {
        Some((_, query)) => query,
        None if without_fragment.contains('=') => without_fragment,
        None => "",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_callback_url() {
        let response =
            AuthorizeResponse::parse("https://app.example.com/callback?state=s1&nonce=n1&code=bar");

        assert_eq!(response.state.as_deref(), Some("s1"));
        assert_eq!(response.code.as_deref(), Some("bar"));
        assert_eq!(response.get("nonce"), Some("n1"));
        assert!(!response.is_error());
    }

    #[test]
    fn test_parse_bare_query() {
        let response = AuthorizeResponse::parse("?state=s1&code=bar");
        assert_eq!(response.state.as_deref(), Some("s1"));
        assert_eq!(response.code.as_deref(), Some("bar"));
    }

    #[test]
    fn test_parse_form_body() {
        let response = AuthorizeResponse::parse("code=a%2Bb&state=x+y");
        assert_eq!(response.code.as_deref(), Some("a+b"));
        assert_eq!(response.state.as_deref(), Some("x y"));
    }

    #[test]
    fn test_fragment_takes_precedence() {
        let response =
            AuthorizeResponse::parse("https://app.example.com/cb?state=query#state=frag&code=c");
        assert_eq!(response.state.as_deref(), Some("frag"));
        assert_eq!(response.code.as_deref(), Some("c"));
    }

    #[test]
    fn test_empty_fragment_falls_back_to_query() {
        let response = AuthorizeResponse::parse("https://app.example.com/cb?state=s&code=c#");
        assert_eq!(response.state.as_deref(), Some("s"));
    }

    #[test]
    fn test_error_response() {
        let response = AuthorizeResponse::parse(
            "?error=access_denied&error_description=User%20cancelled&state=s1",
        );
        assert!(response.is_error());
        assert_eq!(response.error.as_deref(), Some("access_denied"));
        assert_eq!(response.error_description.as_deref(), Some("User cancelled"));
        assert!(response.code.is_none());
    }

    #[test]
    fn test_duplicate_parameters_first_wins() {
        let response = AuthorizeResponse::parse("?state=first&state=second");
        assert_eq!(response.state.as_deref(), Some("first"));
    }

    #[test]
    fn test_empty_values_are_absent() {
        let response = AuthorizeResponse::parse("?state=&code=");
        assert!(response.state.is_none());
        assert!(response.code.is_none());
    }

    #[test]
    fn test_malformed_input_does_not_fail() {
        for raw in ["", "garbage", "%%%", "?", "#", "?&&=&", "https://x/?a=%ZZ"] {
            let response = AuthorizeResponse::parse(raw);
            assert!(response.state.is_none());
            assert!(response.code.is_none());
            assert_eq!(response.raw, raw);
        }
    }
}
