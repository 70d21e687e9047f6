//! Two-bit ternary packing of network-coding coefficients.
//!
//! Each coefficient takes two bits, least significant pair first within a
//! byte: `00 → 0`, `01 → +1`, `10 → −1`. The code `11` is reserved and is
//! rejected on decode. Unused trailing bits of the last byte are zero.

use crate::error::{CsError, Result};

const CODE_ZERO: u8 = 0b00;
const CODE_PLUS: u8 = 0b01;
const CODE_MINUS: u8 = 0b10;

/// Bytes needed for `count` packed coefficients.
pub fn packed_len(count: usize) -> usize {
    (count + 3) / 4
}

/// Packs `values` (each exactly 0, +1 or −1).
pub fn pack_ternary(values: &[f64]) -> Result<Vec<u8>> {
    let mut out = vec![0u8; packed_len(values.len())];
    for (i, &v) in values.iter().enumerate() {
        let code = if v == 0.0 {
            CODE_ZERO
        } else if v == 1.0 {
            CODE_PLUS
        } else if v == -1.0 {
            CODE_MINUS
        } else {
            return Err(CsError::Wire(format!(
                "coefficient {} at index {} is not ternary",
                v, i
            )));
        };
        out[i / 4] |= code << ((i % 4) * 2);
    }
    Ok(out)
}

/// Unpacks `count` coefficients from `bytes`.
pub fn unpack_ternary(bytes: &[u8], count: usize) -> Result<Vec<f64>> {
    let needed = packed_len(count);
    if bytes.len() < needed {
        return Err(CsError::Wire(format!(
            "packed coefficients truncated: need {} bytes, have {}",
            needed,
            bytes.len()
        )));
    }
    let mut out = Vec::with_capacity(count);
    for i in 0..count {
        let bits = (bytes[i / 4] >> ((i % 4) * 2)) & 0b11;
        let v = match bits {
            CODE_ZERO => 0.0,
            CODE_PLUS => 1.0,
            CODE_MINUS => -1.0,
            _ => return Err(CsError::InvalidCoefficient { index: i, bits }),
        };
        out.push(v);
    }
    Ok(out)
}

/// Lower-case hex rendering used by the `pack` debug command.
pub fn to_hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lsb_first_layout() {
        // +1, -1, 0, +1 -> 01 | 10<<2 | 00<<4 | 01<<6
        let packed = pack_ternary(&[1.0, -1.0, 0.0, 1.0]).unwrap();
        assert_eq!(packed, vec![0b0100_1001]);
    }

    #[test]
    fn trailing_bits_are_zero() {
        let packed = pack_ternary(&[-1.0, -1.0, -1.0, -1.0, -1.0]).unwrap();
        assert_eq!(packed, vec![0b1010_1010, 0b0000_0010]);
    }

    #[test]
    fn reserved_code_is_rejected() {
        let err = unpack_ternary(&[0b0000_1100], 2).unwrap_err();
        match err {
            CsError::InvalidCoefficient { index, bits } => {
                assert_eq!(index, 1);
                assert_eq!(bits, 0b11);
            }
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[test]
    fn non_ternary_values_fail() {
        assert!(pack_ternary(&[0.5]).is_err());
        assert!(unpack_ternary(&[], 1).is_err());
    }
}
