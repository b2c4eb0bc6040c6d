//! Signed overpunch numeric codec.
//!
//! The upstream host encodes signed integers in fixed-width ASCII fields
//! where the sign rides in the final digit position: `'J'..='R'` stand for a
//! negative last digit `1..=9` and `'}'` for a negative `0`; a bare digit
//! leaves the value positive. Text fields are right-padded with spaces.

use thiserror::Error;

/// Errors from decoding a fixed-width field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum DecodeError {
    /// A byte outside `0-9`, `J-R`, `}` and field padding was encountered.
    #[error("invalid byte {byte:#04x} in numeric field")]
    Invalid {
        /// The offending byte.
        byte: u8,
    },
    /// The magnitude does not fit in an `i64`.
    #[error("numeric field overflows i64")]
    Overflow,
    /// A text field was not valid UTF-8 after trimming.
    #[error("text field is not valid UTF-8")]
    Utf8,
}

/// Overpunch character for a negative final digit of zero.
const OVERPUNCH_ZERO: u8 = b'}';
/// `'J'` is negative 1, so digits offset from the byte before it.
const OVERPUNCH_OFFSET: u8 = b'I';

/// Decodes a signed overpunch numeric field.
///
/// Field padding (leading and trailing ASCII whitespace) is ignored; an
/// empty field decodes to zero. Whitespace between digits and any byte
/// outside the overpunch alphabet are rejected, as is anything following
/// the overpunch character, which is only valid in the final position.
pub fn decode_overpunch(field: &[u8]) -> Result<i64, DecodeError> {
    let s = trim_ascii(field);
    if s.is_empty() {
        return Ok(0);
    }

    let mut magnitude: i64 = 0;
    let mut negative = false;
    for (i, &b) in s.iter().enumerate() {
        let digit = match b {
            b'0'..=b'9' => i64::from(b - b'0'),
            b'J'..=b'R' => {
                negative = true;
                i64::from(b - OVERPUNCH_OFFSET)
            }
            OVERPUNCH_ZERO => {
                negative = true;
                0
            }
            _ => return Err(DecodeError::Invalid { byte: b }),
        };
        magnitude = magnitude
            .checked_mul(10)
            .and_then(|m| m.checked_add(digit))
            .ok_or(DecodeError::Overflow)?;
        if negative {
            if i + 1 != s.len() {
                return Err(DecodeError::Invalid { byte: s[i + 1] });
            }
            break;
        }
    }

    Ok(if negative { -magnitude } else { magnitude })
}

/// Encodes `value` into the canonical zero-padded overpunch form of `width`
/// bytes. The inverse of [`decode_overpunch`] for canonical inputs.
///
/// Fails with [`DecodeError::Overflow`] when the magnitude needs more than
/// `width` digits.
pub fn encode_overpunch(value: i64, width: usize) -> Result<Vec<u8>, DecodeError> {
    let digits = value.unsigned_abs().to_string();
    if digits.len() > width {
        return Err(DecodeError::Overflow);
    }

    let mut out = vec![b'0'; width];
    out[width - digits.len()..].copy_from_slice(digits.as_bytes());
    if value < 0 {
        let last = out[width - 1];
        out[width - 1] = if last == b'0' {
            OVERPUNCH_ZERO
        } else {
            last - b'0' + OVERPUNCH_OFFSET
        };
    }
    Ok(out)
}

/// Strips trailing ASCII whitespace and interprets the rest as UTF-8.
///
/// Used for the host's right-space-padded text fields (identifiers are ASCII
/// in practice; anything else is rejected).
pub fn trim_right(field: &[u8]) -> Result<&str, DecodeError> {
    let mut end = field.len();
    while end > 0 && field[end - 1].is_ascii_whitespace() {
        end -= 1;
    }
    std::str::from_utf8(&field[..end]).map_err(|_| DecodeError::Utf8)
}

fn trim_ascii(field: &[u8]) -> &[u8] {
    let mut end = field.len();
    while end > 0 && field[end - 1].is_ascii_whitespace() {
        end -= 1;
    }
    let mut start = 0;
    while start < end && field[start].is_ascii_whitespace() {
        start += 1;
    }
    &field[start..end]
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_positive_plain_digits() {
        assert_eq!(decode_overpunch(b"00042"), Ok(42));
        assert_eq!(decode_overpunch(b"0"), Ok(0));
        assert_eq!(decode_overpunch(b"999999"), Ok(999_999));
    }

    #[test]
    fn test_negative_overpunch_terminator() {
        // J..R carry the final digit 1..9 and flip the sign.
        assert_eq!(decode_overpunch(b"0000000010J"), Ok(-101));
        assert_eq!(decode_overpunch(b"12K"), Ok(-122));
        assert_eq!(decode_overpunch(b"1R"), Ok(-19));
        // '}' is a negative zero in the last position.
        assert_eq!(decode_overpunch(b"000000000}"), Ok(0));
        assert_eq!(decode_overpunch(b"12}"), Ok(-120));
    }

    #[test]
    fn test_field_padding() {
        assert_eq!(decode_overpunch(b"    42  "), Ok(42));
        assert_eq!(decode_overpunch(b"        "), Ok(0));
        assert_eq!(decode_overpunch(b""), Ok(0));
    }

    #[test]
    fn test_rejects_foreign_bytes() {
        assert_eq!(
            decode_overpunch(b"1A2"),
            Err(DecodeError::Invalid { byte: b'A' })
        );
        assert_eq!(
            decode_overpunch(b"1 2"),
            Err(DecodeError::Invalid { byte: b' ' })
        );
        // Overpunch must terminate the field.
        assert_eq!(
            decode_overpunch(b"1J2"),
            Err(DecodeError::Invalid { byte: b'2' })
        );
    }

    #[test]
    fn test_overflow() {
        // 20 nines cannot fit in an i64.
        assert_eq!(
            decode_overpunch(b"99999999999999999999"),
            Err(DecodeError::Overflow)
        );
    }

    #[test]
    fn test_encode_canonical_forms() {
        assert_eq!(encode_overpunch(101, 11).unwrap(), b"00000000101".to_vec());
        assert_eq!(encode_overpunch(-101, 11).unwrap(), b"0000000010J".to_vec());
        assert_eq!(encode_overpunch(0, 10).unwrap(), b"0000000000".to_vec());
        assert_eq!(encode_overpunch(-120, 6).unwrap(), b"00012}".to_vec());
        assert_eq!(encode_overpunch(1_000_000_000_000, 6), Err(DecodeError::Overflow));
    }

    #[test]
    fn test_trim_right() {
        assert_eq!(trim_right(b"A01     "), Ok("A01"));
        assert_eq!(trim_right(b"2330  "), Ok("2330"));
        assert_eq!(trim_right(b"      "), Ok(""));
        assert_eq!(trim_right(&[0xFF, 0xFE, b' ']), Err(DecodeError::Utf8));
    }

    proptest! {
        /// Canonical encode followed by decode returns the original value for
        /// any magnitude that fits the width, either sign.
        #[test]
        fn prop_round_trip(magnitude in 0i64..1_000_000_000, negate in any::<bool>(), width in 10usize..16) {
            let value = if negate { -magnitude } else { magnitude };
            let encoded = encode_overpunch(value, width).unwrap();
            prop_assert_eq!(encoded.len(), width);
            let decoded = decode_overpunch(&encoded).unwrap();
            // Canonical -0 decodes to 0.
            prop_assert_eq!(decoded, if value == 0 { 0 } else { value });
        }

        /// Any byte outside the overpunch alphabet poisons the field.
        #[test]
        fn prop_foreign_byte_rejected(
            prefix in proptest::collection::vec(b'0'..=b'9', 0..6),
            byte in any::<u8>(),
            suffix in proptest::collection::vec(b'0'..=b'9', 1..4),
        ) {
            prop_assume!(!byte.is_ascii_digit());
            prop_assume!(!(b'J'..=b'R').contains(&byte));
            prop_assume!(byte != b'}');
            prop_assume!(!byte.is_ascii_whitespace());

            let mut field = prefix;
            field.push(byte);
            field.extend_from_slice(&suffix);
            prop_assert!(decode_overpunch(&field).is_err());
        }
    }
}
