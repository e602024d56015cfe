//! Fixed-width binary encoding of [`MaybeRelocatable`] values
//!
//! ```text
//!  top bit clear:  | 0 | value (little-endian, 8*n-1 bits)                  |
//!  top bit set:    | 1 | ... | segment_index (16 bits) | offset (47 bits)   |
//!                   8n-1       62..47                     46..0
//! ```
//!
//! Addresses use 8 bytes; values use the field width (32 bytes in practice).

use crate::error::ValueError;
use crate::field::{Felt, PRIME};
use crate::relocatable::{MaybeRelocatable, Relocatable};
use crate::{OFFSET_BITS, SEGMENT_BITS};
use num_bigint::BigUint;
use num_traits::{One, ToPrimitive};

/// Encode a value into exactly `n_bytes` little-endian bytes
pub fn to_bytes(value: &MaybeRelocatable, n_bytes: usize) -> Result<Vec<u8>, ValueError> {
    match value {
        MaybeRelocatable::Int(felt) => {
            if felt.bits() >= (n_bytes as u64) * 8 {
                return Err(ValueError::ValueTooLarge { value: felt.to_string(), n_bytes });
            }
            felt.to_bytes_le(n_bytes)
                .ok_or_else(|| ValueError::ValueTooLarge { value: felt.to_string(), n_bytes })
        }
        MaybeRelocatable::RelocatableValue(rel) => encode_relocatable(rel, n_bytes),
    }
}

fn encode_relocatable(rel: &Relocatable, n_bytes: usize) -> Result<Vec<u8>, ValueError> {
    if (n_bytes as u32) * 8 <= SEGMENT_BITS + OFFSET_BITS {
        return Err(ValueError::EncodingWidthTooSmall(n_bytes));
    }
    if rel.segment_index >= (1 << SEGMENT_BITS) {
        return Err(ValueError::SegmentIndexTooLarge(rel.segment_index));
    }
    if rel.offset < 0 || rel.offset >= (1i64 << OFFSET_BITS) {
        return Err(ValueError::OffsetOutOfRange(rel.offset));
    }

    let num = (BigUint::one() << (n_bytes * 8 - 1))
        + (BigUint::from(rel.segment_index) << OFFSET_BITS)
        + BigUint::from(rel.offset as u64);
    let mut bytes = num.to_bytes_le();
    bytes.resize(n_bytes, 0);
    Ok(bytes)
}

/// Decode a value from its fixed-width little-endian form. Integers must be
/// canonical field elements; relocatables may only set the top bit and the
/// segment and offset fields.
pub fn from_bytes(bytes: &[u8]) -> Result<MaybeRelocatable, ValueError> {
    let n_bytes = bytes.len();
    if n_bytes == 0 {
        return Ok(MaybeRelocatable::Int(Felt::zero()));
    }

    let top_bit_set = bytes[n_bytes - 1] & 0x80 != 0;
    let num = BigUint::from_bytes_le(bytes);
    if !top_bit_set {
        if num >= *PRIME {
            return Err(ValueError::NotAFieldElement(num.to_string()));
        }
        return Ok(MaybeRelocatable::Int(Felt::new(num)));
    }
    if (n_bytes as u32) * 8 <= SEGMENT_BITS + OFFSET_BITS {
        return Err(ValueError::EncodingWidthTooSmall(n_bytes));
    }

    let payload = num - (BigUint::one() << (n_bytes * 8 - 1));
    if payload.bits() > (SEGMENT_BITS + OFFSET_BITS) as u64 {
        return Err(ValueError::NonCanonicalRelocatable(format!("{payload:#x}")));
    }
    let offset_mask = (BigUint::one() << OFFSET_BITS) - 1u32;
    let offset = (&payload & offset_mask).to_i64().unwrap_or_default();
    let segment_index = (&payload >> OFFSET_BITS).to_u32().unwrap_or_default();
    Ok(MaybeRelocatable::RelocatableValue(Relocatable::new(segment_index, offset)))
}

/// Encode an address into the 8-byte address form
pub fn address_to_bytes(address: &MaybeRelocatable) -> Result<Vec<u8>, ValueError> {
    to_bytes(address, crate::ADDR_SIZE_IN_BYTES)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_int_encoding() {
        let value = MaybeRelocatable::from(0x0201u64);
        assert_eq!(to_bytes(&value, 3).unwrap(), vec![0x01, 0x02, 0x00]);
        assert_eq!(from_bytes(&[0x01, 0x02, 0x00]).unwrap(), value);
    }

    #[test]
    fn test_int_top_bit_must_be_clear() {
        let value = MaybeRelocatable::from(0x80u64);
        assert!(matches!(to_bytes(&value, 1), Err(ValueError::ValueTooLarge { .. })));
        assert!(to_bytes(&value, 2).is_ok());
    }

    #[test]
    fn test_relocatable_encoding_layout() {
        let rel = MaybeRelocatable::from(Relocatable::new(3, 5));
        let bytes = to_bytes(&rel, 8).unwrap();
        let word = u64::from_le_bytes(bytes.clone().try_into().unwrap());
        assert_eq!(word, (1u64 << 63) | (3u64 << 47) | 5);
        assert_eq!(from_bytes(&bytes).unwrap(), rel);
    }

    #[test]
    fn test_relocatable_wide_encoding() {
        let rel = MaybeRelocatable::from(Relocatable::new(7, 1 << 40));
        let bytes = to_bytes(&rel, 32).unwrap();
        assert_eq!(bytes.len(), 32);
        assert_eq!(bytes[31], 0x80);
        assert_eq!(from_bytes(&bytes).unwrap(), rel);
    }

    #[test]
    fn test_relocatable_encoding_errors() {
        let negative = MaybeRelocatable::from(Relocatable::new(0, -1));
        assert_eq!(to_bytes(&negative, 8), Err(ValueError::OffsetOutOfRange(-1)));

        let big_segment = MaybeRelocatable::from(Relocatable::new(1 << 16, 0));
        assert_eq!(to_bytes(&big_segment, 8), Err(ValueError::SegmentIndexTooLarge(1 << 16)));

        let narrow = MaybeRelocatable::from(Relocatable::new(0, 0));
        assert_eq!(to_bytes(&narrow, 4), Err(ValueError::EncodingWidthTooSmall(4)));
    }

    #[test]
    fn test_integer_at_prime_rejected() {
        let mut bytes = PRIME.to_bytes_le();
        bytes.resize(32, 0);
        assert!(matches!(from_bytes(&bytes), Err(ValueError::NotAFieldElement(_))));

        let below = &*PRIME - 1u32;
        let mut bytes = below.to_bytes_le();
        bytes.resize(32, 0);
        assert_eq!(from_bytes(&bytes).unwrap(), MaybeRelocatable::Int(Felt::new(below)));
    }

    #[test]
    fn test_relocatable_stray_bits_rejected() {
        let mut bytes = to_bytes(&MaybeRelocatable::from(Relocatable::new(1, 2)), 32).unwrap();
        bytes[20] = 0x01;
        assert!(matches!(from_bytes(&bytes), Err(ValueError::NonCanonicalRelocatable(_))));
    }
}
