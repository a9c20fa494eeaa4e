//! Normalization and grammar checks for user-supplied metadata tokens.
//!
//! The store accepts `type`, `charset`, `encoding`, and `language` values
//! from callers. Each is normalized (case folding, legacy aliases) and then
//! checked against a small grammar. In strict mode a reject is an error; in
//! lax mode the token is silently dropped.

use crate::error::{TypeError, TypeResult};

/// Which token grammar applies.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TokenKind {
    MediaType,
    Charset,
    Encoding,
    Language,
}

impl TokenKind {
    const fn name(&self) -> &'static str {
        match self {
            TokenKind::MediaType => "media type",
            TokenKind::Charset => "charset",
            TokenKind::Encoding => "encoding",
            TokenKind::Language => "language",
        }
    }
}

/// Legacy aliases folded during normalization.
const ALIASES: &[(&str, &str)] = &[
    ("x-gzip", "gzip"),
    ("x-compress", "compress"),
    ("utf8", "utf-8"),
    ("usascii", "us-ascii"),
    ("us_ascii", "us-ascii"),
];

/// Normalize a raw token: trim, lowercase, fold aliases. Language tags
/// additionally map `_` to `-` and shed trailing separators. Returns `None`
/// when nothing is left.
pub fn normalize(kind: TokenKind, raw: &str) -> Option<String> {
    let mut token = raw.trim().to_ascii_lowercase();
    if kind == TokenKind::Language {
        token = token.replace('_', "-");
        while token.ends_with('-') {
            token.pop();
        }
    }
    for (alias, canonical) in ALIASES {
        if token == *alias {
            token = (*canonical).to_string();
            break;
        }
    }
    if token.is_empty() {
        None
    } else {
        Some(token)
    }
}

/// Whether a normalized token matches its grammar.
pub fn validate(kind: TokenKind, token: &str) -> bool {
    match kind {
        TokenKind::MediaType => validate_media_type(token),
        TokenKind::Charset | TokenKind::Encoding => validate_simple_token(token),
        TokenKind::Language => validate_language(token),
    }
}

/// Normalize and validate in one step.
///
/// Strict mode turns a grammar reject into [`TypeError::InvalidToken`];
/// otherwise the token is dropped and `Ok(None)` returned.
pub fn clean(kind: TokenKind, raw: &str, strict: bool) -> TypeResult<Option<String>> {
    let Some(token) = normalize(kind, raw) else {
        return Ok(None);
    };
    if validate(kind, &token) {
        Ok(Some(token))
    } else if strict {
        Err(TypeError::InvalidToken {
            kind: kind.name(),
            value: raw.to_string(),
        })
    } else {
        Ok(None)
    }
}

/// RFC6838 restricted-name characters.
fn is_restricted_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '!' | '#' | '$' | '&' | '^' | '_' | '.' | '+' | '-')
}

fn validate_restricted_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphanumeric() => {}
        _ => return false,
    }
    name.len() <= 127 && chars.all(is_restricted_char)
}

fn validate_media_type(token: &str) -> bool {
    match token.split_once('/') {
        Some((ty, subty)) => validate_restricted_name(ty) && validate_restricted_name(subty),
        None => false,
    }
}

fn validate_simple_token(token: &str) -> bool {
    validate_restricted_name(token)
}

/// RFC5646 shape check: alphanumeric subtags of 1-8 characters separated by
/// `-`, with an alphabetic primary subtag of 2-8 characters. Registry
/// membership is not checked.
fn validate_language(token: &str) -> bool {
    let mut subtags = token.split('-');
    match subtags.next() {
        Some(primary)
            if (2..=8).contains(&primary.len())
                && primary.chars().all(|c| c.is_ascii_alphabetic()) => {}
        _ => return false,
    }
    subtags.all(|s| (1..=8).contains(&s.len()) && s.chars().all(|c| c.is_ascii_alphanumeric()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn media_type_accepted() {
        assert_eq!(
            clean(TokenKind::MediaType, " Text/Plain ", true).unwrap(),
            Some("text/plain".to_string())
        );
    }

    #[test]
    fn media_type_without_slash_rejected_strict() {
        let err = clean(TokenKind::MediaType, "textplain", true).unwrap_err();
        assert!(matches!(err, TypeError::InvalidToken { .. }));
    }

    #[test]
    fn media_type_without_slash_dropped_lax() {
        assert_eq!(clean(TokenKind::MediaType, "textplain", false).unwrap(), None);
    }

    #[test]
    fn charset_alias_folded() {
        assert_eq!(
            clean(TokenKind::Charset, "UTF8", true).unwrap(),
            Some("utf-8".to_string())
        );
    }

    #[test]
    fn encoding_alias_folded() {
        assert_eq!(
            clean(TokenKind::Encoding, "x-gzip", true).unwrap(),
            Some("gzip".to_string())
        );
        assert_eq!(
            clean(TokenKind::Encoding, "x-compress", true).unwrap(),
            Some("compress".to_string())
        );
    }

    #[test]
    fn language_underscores_and_trailing_separators() {
        assert_eq!(
            clean(TokenKind::Language, "en_US-", true).unwrap(),
            Some("en-us".to_string())
        );
    }

    #[test]
    fn language_bad_primary_rejected() {
        assert!(clean(TokenKind::Language, "e", true).is_err());
        assert!(clean(TokenKind::Language, "123", true).is_err());
    }

    #[test]
    fn language_long_subtag_rejected() {
        assert!(clean(TokenKind::Language, "en-abcdefghi", true).is_err());
    }

    #[test]
    fn empty_input_is_none_even_strict() {
        assert_eq!(clean(TokenKind::Charset, "   ", true).unwrap(), None);
    }

    #[test]
    fn control_characters_rejected() {
        assert!(clean(TokenKind::Charset, "utf\u{7}8", false).unwrap().is_none());
    }
}
