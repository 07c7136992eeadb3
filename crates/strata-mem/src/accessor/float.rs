//! Float encodings without a native Rust type: binary16, x87 extended
//! precision (80 bits) and binary128. All of them convert to and from `f64`.

use super::int::{field, field_mut};
use crate::{AccessError, ByteOrder};

const F16: Format = Format { exp_bits: 5, frac_bits: 10 };
const F128: Format = Format { exp_bits: 15, frac_bits: 112 };
const F80_BIAS: i32 = 16383;
const F80_MAX_EXP: u128 = 0x7fff;

/// An IEEE 754 interchange format with an implicit integer bit.
#[derive(Debug, Clone, Copy)]
struct Format {
    exp_bits: u32,
    frac_bits: u32,
}

impl Format {
    fn bias(self) -> i32 {
        (1 << (self.exp_bits - 1)) - 1
    }

    fn max_exp(self) -> u128 {
        (1u128 << self.exp_bits) - 1
    }

    fn decode(self, bits: u128) -> f64 {
        let frac = bits & ((1u128 << self.frac_bits) - 1);
        let exp = (bits >> self.frac_bits) & self.max_exp();
        let negative = (bits >> (self.exp_bits + self.frac_bits)) & 1 == 1;
        let magnitude = if exp == self.max_exp() {
            if frac != 0 {
                return f64::NAN;
            }
            f64::INFINITY
        } else if exp == 0 {
            ldexp(frac as f64, 1 - self.bias() - self.frac_bits as i32)
        } else {
            let mantissa = frac | (1u128 << self.frac_bits);
            ldexp(mantissa as f64, exp as i32 - self.bias() - self.frac_bits as i32)
        };
        if negative {
            -magnitude
        } else {
            magnitude
        }
    }

    fn encode(self, value: f64) -> u128 {
        let sign = (value.is_sign_negative() as u128) << (self.exp_bits + self.frac_bits);
        if value.is_nan() {
            return (self.max_exp() << self.frac_bits) | (1u128 << (self.frac_bits - 1));
        }
        let infinity = sign | (self.max_exp() << self.frac_bits);
        if value.is_infinite() {
            return infinity;
        }
        if value == 0.0 {
            return sign;
        }
        let (mantissa, exponent) = decompose(value.abs());
        let frac_bits = self.frac_bits as i32;
        let mut biased = exponent + self.bias();
        if biased as i64 >= self.max_exp() as i64 {
            return infinity;
        }
        if biased >= 1 {
            let frac = if frac_bits >= 52 {
                ((mantissa as u128) << (frac_bits - 52)) & ((1u128 << frac_bits) - 1)
            } else {
                let mut rounded = round_shift(mantissa, (52 - frac_bits) as u32);
                if rounded >> (frac_bits + 1) != 0 {
                    rounded >>= 1;
                    biased += 1;
                    if biased as i64 >= self.max_exp() as i64 {
                        return infinity;
                    }
                }
                rounded as u128 & ((1u128 << frac_bits) - 1)
            };
            return sign | ((biased as u128) << self.frac_bits) | frac;
        }
        // subnormal; a rounding carry lands on the smallest normal encoding
        let shift = (52 - frac_bits) + (1 - biased);
        let frac = if shift <= 0 {
            (mantissa as u128) << (-shift) as u32
        } else {
            round_shift(mantissa, shift as u32) as u128
        };
        sign | frac
    }
}

/// Splits a positive finite `f64` into a 53-bit mantissa (bit 52 set) and an
/// unbiased exponent, so that `value == mantissa * 2^(exponent - 52)`.
fn decompose(value: f64) -> (u64, i32) {
    let bits = value.to_bits();
    let raw_exp = ((bits >> 52) & 0x7ff) as i32;
    let frac = bits & ((1u64 << 52) - 1);
    if raw_exp != 0 {
        return (frac | (1u64 << 52), raw_exp - 1023);
    }
    let mut mantissa = frac;
    let mut exponent = -1022;
    while mantissa & (1u64 << 52) == 0 {
        mantissa <<= 1;
        exponent -= 1;
    }
    (mantissa, exponent)
}

/// Shifts right, rounding half to even.
fn round_shift(value: u64, shift: u32) -> u64 {
    if shift == 0 {
        return value;
    }
    if shift >= 64 {
        return 0;
    }
    let kept = value >> shift;
    let dropped = value & ((1u64 << shift) - 1);
    let half = 1u64 << (shift - 1);
    if dropped > half || (dropped == half && kept & 1 == 1) {
        kept + 1
    } else {
        kept
    }
}

/// Computes `value * 2^exp` without intermediate overflow of the power.
fn ldexp(mut value: f64, mut exp: i32) -> f64 {
    while exp > 1023 {
        value *= f64::from_bits(0x7fe0_0000_0000_0000); // 2^1023
        exp -= 1023;
    }
    while exp < -1022 {
        value *= f64::from_bits(0x0010_0000_0000_0000); // 2^-1022
        exp += 1022;
    }
    value * f64::from_bits(((exp + 1023) as u64) << 52)
}

pub fn f16_to_f64(bits: u16) -> f64 {
    F16.decode(bits as u128)
}

pub fn f64_to_f16(value: f64) -> u16 {
    F16.encode(value) as u16
}

pub fn f128_to_f64(bits: u128) -> f64 {
    F128.decode(bits)
}

pub fn f64_to_f128(value: f64) -> u128 {
    F128.encode(value)
}

/// Decodes the low 80 bits of `bits` as an x87 extended-precision float,
/// which stores its integer bit explicitly.
pub fn f80_to_f64(bits: u128) -> f64 {
    let mantissa = bits as u64;
    let exp = (bits >> 64) & F80_MAX_EXP;
    let negative = (bits >> 79) & 1 == 1;
    let magnitude = if exp == F80_MAX_EXP {
        if mantissa << 1 != 0 {
            return f64::NAN;
        }
        f64::INFINITY
    } else if exp == 0 {
        ldexp(mantissa as f64, 1 - F80_BIAS - 63)
    } else {
        ldexp(mantissa as f64, exp as i32 - F80_BIAS - 63)
    };
    if negative {
        -magnitude
    } else {
        magnitude
    }
}

pub fn f64_to_f80(value: f64) -> u128 {
    let sign = (value.is_sign_negative() as u128) << 79;
    if value.is_nan() {
        return (F80_MAX_EXP << 64) | 0xc000_0000_0000_0000;
    }
    if value.is_infinite() {
        return sign | (F80_MAX_EXP << 64) | 0x8000_0000_0000_0000;
    }
    if value == 0.0 {
        return sign;
    }
    let (mantissa, exponent) = decompose(value.abs());
    let biased = (exponent + F80_BIAS) as u128;
    sign | (biased << 64) | ((mantissa as u128) << 11)
}

/// Number of bytes a float of `bits` bits occupies in memory.
pub fn float_bytes(bits: usize) -> Option<usize> {
    match bits {
        16 | 32 | 64 | 128 => Some(bits / 8),
        80 => Some(10),
        _ => None,
    }
}

fn unsupported(bits: usize) -> AccessError {
    AccessError::TypeMismatch {
        expected: "float of 16, 32, 64, 80 or 128 bits",
        found: format!("{}-bit float", bits),
    }
}

/// Reads up to 16 bytes as an unsigned integer in the given byte order.
fn read_word(field: &[u8], order: ByteOrder) -> u128 {
    let mut buf = [0u8; 16];
    match order {
        ByteOrder::Little => buf[..field.len()].copy_from_slice(field),
        ByteOrder::Big => {
            for (dst, src) in buf.iter_mut().zip(field.iter().rev()) {
                *dst = *src;
            }
        }
    }
    u128::from_le_bytes(buf)
}

fn write_word(field: &mut [u8], order: ByteOrder, word: u128) {
    let bytes = word.to_le_bytes();
    let len = field.len();
    match order {
        ByteOrder::Little => field.copy_from_slice(&bytes[..len]),
        ByteOrder::Big => {
            for (dst, src) in field.iter_mut().zip(bytes[..len].iter().rev()) {
                *dst = *src;
            }
        }
    }
}

pub fn read_float(bytes: &[u8], offset: usize, bits: usize, order: ByteOrder) -> Result<f64, AccessError> {
    let len = float_bytes(bits).ok_or_else(|| unsupported(bits))?;
    let field = field(bytes, offset, len)?;
    Ok(match bits {
        32 => {
            let mut buf = [0u8; 4];
            buf.copy_from_slice(field);
            match order {
                ByteOrder::Little => f32::from_le_bytes(buf) as f64,
                ByteOrder::Big => f32::from_be_bytes(buf) as f64,
            }
        }
        64 => {
            let mut buf = [0u8; 8];
            buf.copy_from_slice(field);
            match order {
                ByteOrder::Little => f64::from_le_bytes(buf),
                ByteOrder::Big => f64::from_be_bytes(buf),
            }
        }
        16 => f16_to_f64(read_word(field, order) as u16),
        80 => f80_to_f64(read_word(field, order)),
        _ => f128_to_f64(read_word(field, order)),
    })
}

pub fn write_float(bytes: &mut [u8], offset: usize, bits: usize, order: ByteOrder, value: f64) -> Result<(), AccessError> {
    let len = float_bytes(bits).ok_or_else(|| unsupported(bits))?;
    let field = field_mut(bytes, offset, len)?;
    match bits {
        32 => {
            let value = value as f32;
            field.copy_from_slice(&match order {
                ByteOrder::Little => value.to_le_bytes(),
                ByteOrder::Big => value.to_be_bytes(),
            });
        }
        64 => field.copy_from_slice(&match order {
            ByteOrder::Little => value.to_le_bytes(),
            ByteOrder::Big => value.to_be_bytes(),
        }),
        16 => write_word(field, order, f64_to_f16(value) as u128),
        80 => write_word(field, order, f64_to_f80(value)),
        _ => write_word(field, order, f64_to_f128(value)),
    }
    Ok(())
}
