//! Identifier Codec (IC), §4.3.
//!
//! Packs an IPv4 address and port into a short, typeable token: four
//! address bytes, a big-endian port, an XOR checksum byte, and a fixed
//! marker byte, obfuscated with the [OL](crate::obfuscation) transform
//! and base32-encoded with a alphabet that omits the glyphs people
//! misread (`I`, `O`, `0`, `1`).

use std::net::Ipv4Addr;

use thiserror::Error;

use crate::obfuscation;

const ALPHABET: &[u8; 32] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";
const MARKER_BYTE: u8 = 0x2a;
const PLAIN_LEN: usize = 8;
const MIN_TOKEN_LEN: usize = 10;
const MAX_TOKEN_LEN: usize = 16;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum IdentifierError {
    #[error("identifier token length {0} outside the {MIN_TOKEN_LEN}-{MAX_TOKEN_LEN} range")]
    BadLength(usize),
    #[error("identifier token contains a character outside the codec alphabet: {0:?}")]
    BadCharacter(char),
    #[error("identifier checksum mismatch: token was edited or mistyped")]
    ChecksumMismatch,
    #[error("identifier marker byte mismatch: not a valid token")]
    BadMarker,
}

fn alphabet_index(c: char) -> Option<u8> {
    let upper = c.to_ascii_uppercase() as u8;
    ALPHABET.iter().position(|&a| a == upper).map(|p| p as u8)
}

fn base32_encode(data: &[u8]) -> String {
    let total_bits = data.len() * 8;
    let nsyms = (total_bits + 4) / 5;
    let mut out = String::with_capacity(nsyms);
    for sym_idx in 0..nsyms {
        let bit_start = sym_idx * 5;
        let mut value: u16 = 0;
        for b in 0..5 {
            let bit_pos = bit_start + b;
            let bit = if bit_pos < total_bits {
                let byte = data[bit_pos / 8];
                (byte >> (7 - (bit_pos % 8))) & 1
            } else {
                0
            };
            value = (value << 1) | u16::from(bit);
        }
        out.push(ALPHABET[value as usize] as char);
    }
    out
}

fn base32_decode(symbols: &str, out_len: usize) -> Result<Vec<u8>, IdentifierError> {
    let mut bits: Vec<u8> = Vec::with_capacity(symbols.len() * 5);
    for c in symbols.chars() {
        let idx = alphabet_index(c).ok_or(IdentifierError::BadCharacter(c))?;
        for b in (0..5).rev() {
            bits.push((idx >> b) & 1);
        }
    }
    let mut out = vec![0u8; out_len];
    for (i, chunk) in bits.chunks(8).enumerate() {
        if i >= out_len {
            break;
        }
        let mut byte = 0u8;
        for (b, &bit) in chunk.iter().enumerate() {
            if b >= 8 {
                break;
            }
            byte = (byte << 1) | bit;
        }
        if chunk.len() < 8 {
            byte <<= 8 - chunk.len();
        }
        out[i] = byte;
    }
    Ok(out)
}

/// Group a flat base32 string into dash-separated runs of 4, matching
/// the tokens users are expected to type (§6 External Interfaces).
fn group_with_dashes(flat: &str) -> String {
    flat.as_bytes()
        .chunks(4)
        .map(|c| std::str::from_utf8(c).unwrap())
        .collect::<Vec<_>>()
        .join("-")
}

/// Encode an IPv4 address and port as a human-typeable identifier
/// token.
pub fn encode(addr: Ipv4Addr, port: u16) -> String {
    let octets = addr.octets();
    let port_bytes = port.to_be_bytes();
    let mut plain = [0u8; PLAIN_LEN];
    plain[0..4].copy_from_slice(&octets);
    plain[4..6].copy_from_slice(&port_bytes);
    plain[6] = plain[0] ^ plain[1] ^ plain[2] ^ plain[3] ^ plain[4] ^ plain[5];
    plain[7] = MARKER_BYTE;

    let obfuscated = obfuscation::encrypt(&plain);
    let flat = base32_encode(&obfuscated);
    group_with_dashes(&flat)
}

/// Decode a token back into an IPv4 address and port, rejecting
/// malformed input and single-character typos (§8 property: "editing
/// a single character of a valid token is rejected").
pub fn decode(token: &str) -> Result<(Ipv4Addr, u16), IdentifierError> {
    let stripped: String = token.chars().filter(|&c| c != '-').collect();
    if stripped.len() < MIN_TOKEN_LEN || stripped.len() > MAX_TOKEN_LEN {
        return Err(IdentifierError::BadLength(stripped.len()));
    }

    let obfuscated = base32_decode(&stripped, PLAIN_LEN)?;
    let plain = obfuscation::decrypt(&obfuscated);

    if plain[7] != MARKER_BYTE {
        return Err(IdentifierError::BadMarker);
    }
    let expected_checksum = plain[0] ^ plain[1] ^ plain[2] ^ plain[3] ^ plain[4] ^ plain[5];
    if plain[6] != expected_checksum {
        return Err(IdentifierError::ChecksumMismatch);
    }

    let addr = Ipv4Addr::new(plain[0], plain[1], plain[2], plain[3]);
    let port = u16::from_be_bytes([plain[4], plain[5]]);
    Ok((addr, port))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips() {
        let addr = Ipv4Addr::new(203, 0, 113, 42);
        let port = 45678;
        let token = encode(addr, port);
        assert_eq!(decode(&token).unwrap(), (addr, port));
    }

    #[test]
    fn token_is_grouped_in_fours() {
        let token = encode(Ipv4Addr::new(10, 0, 0, 1), 9999);
        for group in token.split('-') {
            assert!(group.len() <= 4);
        }
    }

    #[test]
    fn single_character_edit_is_rejected() {
        let token = encode(Ipv4Addr::new(192, 168, 1, 1), 12345);
        let mut chars: Vec<char> = token.chars().collect();
        let edit_pos = chars.iter().position(|&c| c != '-').unwrap();
        let original = chars[edit_pos];
        for &replacement in ALPHABET {
            let replacement = replacement as char;
            if replacement == original.to_ascii_uppercase() {
                continue;
            }
            chars[edit_pos] = replacement;
            let mutated: String = chars.iter().collect();
            assert!(
                decode(&mutated).is_err(),
                "mutated token {mutated} was accepted"
            );
            chars[edit_pos] = original;
            break;
        }
    }

    #[test]
    fn rejects_out_of_range_length() {
        assert_eq!(decode("AB"), Err(IdentifierError::BadLength(2)));
        assert!(matches!(
            decode(&"A".repeat(20)),
            Err(IdentifierError::BadLength(_))
        ));
    }

    #[test]
    fn rejects_character_outside_alphabet() {
        let mut token = encode(Ipv4Addr::new(1, 2, 3, 4), 80);
        token.replace_range(0..1, "I"); // I is deliberately excluded from the alphabet
        assert!(matches!(decode(&token), Err(IdentifierError::BadCharacter(_))));
    }

    #[test]
    fn fuzz_random_addresses_round_trip() {
        use rand::Rng;
        let mut rng = rand::thread_rng();
        for _ in 0..500 {
            let addr = Ipv4Addr::new(
                rng.gen(),
                rng.gen(),
                rng.gen(),
                rng.gen(),
            );
            let port: u16 = rng.gen();
            let token = encode(addr, port);
            assert_eq!(decode(&token).unwrap(), (addr, port));
        }
    }
}
