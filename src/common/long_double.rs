//! x87 80-bit extended precision encoding.
//!
//! On x86-64, `long double` occupies a 16-byte slot of which only the low
//! 10 bytes are meaningful. Constant values are computed at `f64` precision
//! and widened to the x87 format when emitted: 1 sign bit, 15-bit exponent
//! (bias 16383), and a 64-bit mantissa with an explicit integer bit.

/// Encode an `f64` as x87 80-bit extended precision, returned as the two
/// little-endian halves (low 8 bytes, high 2 bytes) the emitter needs.
pub fn f64_to_x87(v: f64) -> (u64, u16) {
    let bits = v.to_bits();
    let sign = ((bits >> 63) & 1) as u16;
    let exp = ((bits >> 52) & 0x7ff) as i32;
    let frac = bits & 0xf_ffff_ffff_ffff;

    if exp == 0x7ff {
        // Infinity and NaN keep their payload, shifted into the wider mantissa.
        let mantissa = (1u64 << 63) | (frac << 11);
        return (mantissa, (sign << 15) | 0x7fff);
    }
    if exp == 0 {
        if frac == 0 {
            return (0, sign << 15);
        }
        // Subnormal f64: normalize into the explicit-integer-bit format.
        let shift = frac.leading_zeros() as i32 - 11;
        let mantissa = frac << (shift + 11);
        let e = 1 - 1023 - shift + 16383;
        return (mantissa, (sign << 15) | (e as u16));
    }

    let mantissa = (1u64 << 63) | (frac << 11);
    let e = (exp - 1023 + 16383) as u16;
    (mantissa, (sign << 15) | e)
}

/// Encode into the 16-byte memory image used by `.data` emission
/// (10 significant bytes followed by 6 bytes of zero padding).
pub fn f64_to_x87_bytes(v: f64) -> [u8; 16] {
    let (lo, hi) = f64_to_x87(v);
    let mut out = [0u8; 16];
    out[..8].copy_from_slice(&lo.to_le_bytes());
    out[8..10].copy_from_slice(&hi.to_le_bytes());
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_and_sign() {
        assert_eq!(f64_to_x87(0.0), (0, 0));
        assert_eq!(f64_to_x87(-0.0), (0, 0x8000));
    }

    #[test]
    fn one() {
        // 1.0 = mantissa 0x8000000000000000, exponent 16383.
        assert_eq!(f64_to_x87(1.0), (0x8000_0000_0000_0000, 0x3fff));
    }

    #[test]
    fn two_and_half() {
        let (m, e) = f64_to_x87(2.5);
        assert_eq!(e, 0x4000); // exponent 1
        assert_eq!(m, 0xa000_0000_0000_0000); // 1.01 binary
    }

    #[test]
    fn infinity() {
        let (m, e) = f64_to_x87(f64::INFINITY);
        assert_eq!(e, 0x7fff);
        assert_eq!(m, 0x8000_0000_0000_0000);
    }
}
