//! Host-facing address parsing (§3 `Endpoint`, §4.3 Identifier Codec).
//!
//! A host-facing field — the relay address, the direct-connect
//! target — accepts either an identifier token or a literal
//! `host:port`. §4.3's parsing rule: if the string contains `:`
//! followed by a valid port number it is literal; otherwise token
//! validation is applied.

use wavry_common::CoreError;

/// Parsed `(host, port)`. `host` is whatever the caller gave us verbatim
/// for the literal case (a DNS name or an IPv4 literal), or the decoded
/// IPv4 address rendered as a string for the token case.
pub fn parse_endpoint(input: &str) -> Result<(String, u16), CoreError> {
    if let Some((host, port_str)) = input.rsplit_once(':') {
        if let Ok(port) = port_str.parse::<u16>() {
            if port != 0 {
                return Ok((host.to_string(), port));
            }
        }
    }
    let (ipv4, port) = rift_crypto::decode_identifier(input)
        .map_err(|e| CoreError::protocol(format!("not a literal host:port or a valid token: {e}")))?;
    Ok((ipv4.to_string(), port))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn literal_host_port_parses_without_touching_the_codec() {
        let (host, port) = parse_endpoint("example.com:7979").unwrap();
        assert_eq!(host, "example.com");
        assert_eq!(port, 7979);
    }

    #[test]
    fn literal_ipv4_port_parses() {
        let (host, port) = parse_endpoint("10.0.0.5:4000").unwrap();
        assert_eq!(host, "10.0.0.5");
        assert_eq!(port, 4000);
    }

    #[test]
    fn token_decodes_through_the_identifier_codec() {
        let token = rift_crypto::encode_identifier(std::net::Ipv4Addr::new(203, 0, 113, 9), 4242);
        let (host, port) = parse_endpoint(&token).unwrap();
        assert_eq!(host, "203.0.113.9");
        assert_eq!(port, 4242);
    }

    #[test]
    fn garbage_is_rejected() {
        assert!(parse_endpoint("not-a-token-or-address").is_err());
    }
}
