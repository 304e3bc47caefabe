use regex::Regex;
use std::sync::OnceLock;

static TOKEN_SHAPE_REGEX: OnceLock<Regex> = OnceLock::new();

fn token_shape_regex() -> &'static Regex {
    TOKEN_SHAPE_REGEX.get_or_init(|| {
        Regex::new(r"^[A-Za-z0-9_-]+\.[A-Za-z0-9_-]+\.[A-Za-z0-9_-]*$")
            .expect("static regex pattern is valid")
    })
}

/// Structural check for a compact three-segment token.
///
/// The first two segments must be non-empty URL-safe base64; the signature
/// segment may be empty. No signature is verified.
pub fn is_valid_token_shape(token: &str) -> bool {
    token_shape_regex().is_match(token)
}
