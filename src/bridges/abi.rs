//! Minimal ABI call encoding for bridge contract calls. Covers the static
//! word types and dynamic `bytes` that the supported bridge entrypoints use.

use ethereum_types::{H160, U256};

use super::BridgeError;

#[derive(Debug, Clone)]
pub enum AbiToken {
    Address(H160),
    Uint(U256),
    Bytes(Vec<u8>),
}

impl AbiToken {
    fn is_dynamic(&self) -> bool {
        matches!(self, AbiToken::Bytes(_))
    }
}

fn uint_word(value: U256) -> [u8; 32] {
    let mut word = [0u8; 32];
    value.to_big_endian(&mut word);
    word
}

fn address_word(value: H160) -> [u8; 32] {
    let mut word = [0u8; 32];
    word[12..].copy_from_slice(value.as_bytes());
    word
}

/// Encodes `selector(signature) ++ abi_encode(tokens)`.
///
/// The signature must be canonical (no spaces, no argument names), e.g.
/// `sendToL2(uint256,address,uint256,uint256,uint256,address,uint256)`.
pub fn encode_call(signature: &str, tokens: &[AbiToken]) -> Vec<u8> {
    let hash = keccak_hash::keccak(signature.as_bytes());
    let mut out = hash.as_bytes()[..4].to_vec();

    let head_size = tokens.len() * 32;
    let mut head: Vec<[u8; 32]> = Vec::with_capacity(tokens.len());
    let mut tail: Vec<u8> = Vec::new();

    for token in tokens {
        match token {
            AbiToken::Address(a) => head.push(address_word(*a)),
            AbiToken::Uint(u) => head.push(uint_word(*u)),
            AbiToken::Bytes(bytes) => {
                head.push(uint_word(U256::from(head_size + tail.len())));
                tail.extend_from_slice(&uint_word(U256::from(bytes.len())));
                tail.extend_from_slice(bytes);
                let padding = (32 - bytes.len() % 32) % 32;
                tail.extend(std::iter::repeat(0u8).take(padding));
            }
        }
    }

    for word in head {
        out.extend_from_slice(&word);
    }
    out.extend_from_slice(&tail);
    out
}

/// Encodes a call and renders it as a 0x-prefixed hex payload.
pub fn encode_call_hex(signature: &str, tokens: &[AbiToken]) -> String {
    format!("0x{}", hex::encode(encode_call(signature, tokens)))
}

/// Parses a 0x-prefixed 20-byte address.
pub fn parse_address(address: &str) -> Result<H160, BridgeError> {
    let stripped = address.strip_prefix("0x").unwrap_or(address);
    let bytes = hex::decode(stripped)
        .map_err(|e| BridgeError::InvalidParameters(format!("bad address {}: {}", address, e)))?;
    if bytes.len() != 20 {
        return Err(BridgeError::InvalidParameters(format!(
            "bad address length for {}",
            address
        )));
    }
    Ok(H160::from_slice(&bytes))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn static_args_encode_as_padded_words() {
        let addr = parse_address("0x1111111111111111111111111111111111111111").unwrap();
        let encoded = encode_call(
            "transfer(address,uint256)",
            &[AbiToken::Address(addr), AbiToken::Uint(U256::from(7u64))],
        );
        assert_eq!(encoded.len(), 4 + 2 * 32);
        // Address is right-aligned in its word
        assert_eq!(&encoded[4..16], &[0u8; 12]);
        assert_eq!(&encoded[16..36], addr.as_bytes());
        // Uint is big-endian in the last word
        assert_eq!(encoded[4 + 2 * 32 - 1], 7);
    }

    #[test]
    fn dynamic_bytes_get_offset_length_and_padding() {
        let encoded = encode_call(
            "foo(uint256,bytes)",
            &[
                AbiToken::Uint(U256::from(1u64)),
                AbiToken::Bytes(vec![0xab, 0xcd, 0xef]),
            ],
        );
        // selector + 2 head words + length word + 1 padded data word
        assert_eq!(encoded.len(), 4 + 2 * 32 + 32 + 32);
        // Offset points past the two head words
        assert_eq!(encoded[4 + 32 + 31], 64);
        // Length word
        assert_eq!(encoded[4 + 2 * 32 + 31], 3);
        // Data, zero-padded to the word boundary
        assert_eq!(&encoded[4 + 3 * 32..4 + 3 * 32 + 3], &[0xab, 0xcd, 0xef]);
        assert!(encoded[4 + 3 * 32 + 3..].iter().all(|b| *b == 0));
    }

    #[test]
    fn empty_bytes_encode_as_length_zero() {
        let encoded = encode_call("foo(bytes)", &[AbiToken::Bytes(Vec::new())]);
        assert_eq!(encoded.len(), 4 + 32 + 32);
        assert_eq!(encoded[4 + 31], 32); // offset
        assert_eq!(encoded[4 + 32 + 31], 0); // length
    }

    #[test]
    fn rejects_malformed_addresses() {
        assert!(parse_address("0x1234").is_err());
        assert!(parse_address("not-hex").is_err());
    }
}
