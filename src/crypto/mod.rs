//! Cryptographic primitives for tokens and request bodies.

pub mod expiry;
pub mod mac;
pub mod obfuscate;
