//! Obfuscation Layer and Identifier Codec for Wavry.
//!
//! This crate is deliberately not a cryptography crate: the
//! Obfuscation Layer (§4.2) is a fixed, keyless-in-the-negotiation-sense
//! byte transform, and the Identifier Codec (§4.3) is a human-typeable
//! token format built on top of it. Neither makes an authenticity or
//! confidentiality claim; see each module's doc comment for what they
//! actually protect against (accidental disclosure to a casual packet
//! inspector, not a motivated attacker).

#![forbid(unsafe_code)]

pub mod identifier;
pub mod obfuscation;

pub use identifier::{decode as decode_identifier, encode as encode_identifier, IdentifierError};
