//! Repeating-key XOR obfuscation for request and response bodies.
//!
//! This is a scraping deterrent, not encryption. Anyone holding the shared
//! key (which ships inside the client) can reverse it.

use base64::{engine::general_purpose::STANDARD, Engine};
use std::borrow::Cow;

/// XOR `input` with `key` repeated to the input length.
///
/// An empty key leaves the input unchanged.
pub fn xor_with_key(input: &[u8], key: &[u8]) -> Vec<u8> {
    if key.is_empty() {
        return input.to_vec();
    }
    input
        .iter()
        .zip(key.iter().cycle())
        .map(|(b, k)| b ^ k)
        .collect()
}

/// Obfuscate plaintext into base64 text.
pub fn obfuscate(plaintext: &[u8], key: &[u8]) -> String {
    STANDARD.encode(xor_with_key(plaintext, key))
}

/// Reverse [`obfuscate`].
///
/// Returns `None` when the input is not base64 or the recovered bytes are
/// not UTF-8. Never panics.
pub fn deobfuscate(ciphertext: &str, key: &[u8]) -> Option<String> {
    let bytes = STANDARD.decode(ciphertext.trim()).ok()?;
    String::from_utf8(xor_with_key(&bytes, key)).ok()
}

/// Whether a request body should be tried as obfuscated.
///
/// Plain bodies are JSON objects, so anything that does not open with `{`
/// is a candidate. Leading whitespace is skipped first, so an indented plain
/// body is parsed directly instead of going through a base64 attempt that
/// would fail anyway. Either path ends in the same JSON parse.
pub fn looks_obfuscated(body: &str) -> bool {
    let trimmed = body.trim_start();
    !trimmed.is_empty() && !trimmed.starts_with('{')
}

/// Recover the JSON text of a request body.
///
/// Falls back to the body as received whenever decoding does not apply or
/// does not succeed.
pub fn decode_request_body<'a>(body: &'a str, key: &[u8]) -> Cow<'a, str> {
    if looks_obfuscated(body) {
        if let Some(decoded) = deobfuscate(body, key) {
            return Cow::Owned(decoded);
        }
        tracing::debug!("request body is not obfuscated JSON, parsing as-is");
    }
    Cow::Borrowed(body)
}
