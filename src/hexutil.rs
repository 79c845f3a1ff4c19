//! Hex codec helpers shared by the framer and the job builder.

use crate::error::{Error, Result};

/// Decodes a lowercase (or mixed-case) hex string into bytes.
pub fn hex_to_bytes(s: &str) -> Result<Vec<u8>> {
    hex::decode(s).map_err(Error::from)
}

/// Encodes bytes as lowercase hex.
pub fn bytes_to_hex(bytes: &[u8]) -> String {
    hex::encode(bytes)
}

/// Reverses the byte-pair order of a hex string (not the character order).
///
/// `hex_reverse("00000001") == "01000000"`. The input length must be even;
/// an odd-length input is a programmer error, not a runtime one, since every
/// caller in this crate only ever feeds it pool-supplied fields already
/// validated to be of fixed, even length.
pub fn hex_reverse(s: &str) -> String {
    assert!(
        s.len() % 2 == 0,
        "hex_reverse requires an even-length string, got {:?}",
        s
    );
    let mut bytes = hex::decode(s).expect("hex_reverse requires valid hex input");
    bytes.reverse();
    hex::encode(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_is_identity() {
        let original = "deadbeef0123";
        let bytes = hex_to_bytes(original).unwrap();
        assert_eq!(bytes_to_hex(&bytes), original);
    }

    #[test]
    fn reverse_swaps_byte_pairs_not_characters() {
        assert_eq!(hex_reverse("00000001"), "01000000");
        assert_eq!(hex_reverse("1a44b9f2"), "f2b9441a");
    }

    #[test]
    fn reverse_is_involutive() {
        let x = "4dd7f5c7";
        assert_eq!(hex_reverse(&hex_reverse(x)), x);
    }

    #[test]
    #[should_panic]
    fn reverse_panics_on_odd_length() {
        hex_reverse("abc");
    }
}
