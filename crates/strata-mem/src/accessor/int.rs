//! Integer codecs: native widths, sub-byte fields and the 64-bit chunked
//! path used for every other width.

use super::wide::WideInt;
use super::Scalar;
use crate::{AccessError, ByteOrder};

pub fn field(bytes: &[u8], offset: usize, len: usize) -> Result<&[u8], AccessError> {
    let available = bytes.len();
    offset
        .checked_add(len)
        .and_then(|end| bytes.get(offset..end))
        .ok_or(AccessError::Range { offset, len, available })
}

pub fn field_mut(bytes: &mut [u8], offset: usize, len: usize) -> Result<&mut [u8], AccessError> {
    let available = bytes.len();
    offset
        .checked_add(len)
        .and_then(|end| bytes.get_mut(offset..end))
        .ok_or(AccessError::Range { offset, len, available })
}

/// Widths read and written with a single native primitive.
pub fn is_native_width(bits: usize) -> bool {
    matches!(bits, 8 | 16 | 32 | 64)
}

macro_rules! read_native {
    ($ty:ty, $field:expr, $order:expr) => {{
        let mut buf = [0u8; std::mem::size_of::<$ty>()];
        buf.copy_from_slice($field);
        match $order {
            ByteOrder::Little => <$ty>::from_le_bytes(buf),
            ByteOrder::Big => <$ty>::from_be_bytes(buf),
        }
    }};
}

macro_rules! write_native {
    ($ty:ty, $value:expr, $field:expr, $order:expr) => {{
        let value = $value as $ty;
        $field.copy_from_slice(&match $order {
            ByteOrder::Little => value.to_le_bytes(),
            ByteOrder::Big => value.to_be_bytes(),
        });
    }};
}

pub fn read_native(bytes: &[u8], offset: usize, bits: usize, signed: bool, order: ByteOrder) -> Result<Scalar, AccessError> {
    let field = field(bytes, offset, bits / 8)?;
    Ok(match (bits, signed) {
        (8, true) => Scalar::Int(read_native!(i8, field, order) as i128),
        (8, false) => Scalar::UInt(read_native!(u8, field, order) as u128),
        (16, true) => Scalar::Int(read_native!(i16, field, order) as i128),
        (16, false) => Scalar::UInt(read_native!(u16, field, order) as u128),
        (32, true) => Scalar::Int(read_native!(i32, field, order) as i128),
        (32, false) => Scalar::UInt(read_native!(u32, field, order) as u128),
        (64, true) => Scalar::Int(read_native!(i64, field, order) as i128),
        (64, false) => Scalar::UInt(read_native!(u64, field, order) as u128),
        _ => return read_chunked(bytes, offset, bits, signed, order),
    })
}

pub fn write_native(bytes: &mut [u8], offset: usize, bits: usize, order: ByteOrder, value: &WideInt) -> Result<(), AccessError> {
    if !is_native_width(bits) {
        return write_chunked(bytes, offset, bits, order, value);
    }
    let field = field_mut(bytes, offset, bits / 8)?;
    // two's complement truncation makes the signedness irrelevant here
    let low = value.limbs()[0];
    match bits {
        8 => write_native!(u8, low, field, order),
        16 => write_native!(u16, low, field, order),
        32 => write_native!(u32, low, field, order),
        _ => write_native!(u64, low, field, order),
    }
    Ok(())
}

/// Reads a field confined to one byte, `shift` bits from its low end.
pub fn read_sub_byte(bytes: &[u8], offset: usize, shift: usize, bits: usize, signed: bool) -> Result<Scalar, AccessError> {
    let byte = field(bytes, offset, 1)?[0];
    let mask = ((1u16 << bits) - 1) as u8;
    let raw = (byte >> shift) & mask;
    if signed && bits > 0 {
        let sign_mask = 1u8 << (bits - 1);
        let value_mask = sign_mask - 1;
        Ok(Scalar::Int((raw & value_mask) as i128 - (raw & sign_mask) as i128))
    } else {
        Ok(Scalar::UInt(raw as u128))
    }
}

pub fn write_sub_byte(
    bytes: &mut [u8],
    offset: usize,
    shift: usize,
    bits: usize,
    signed: bool,
    value: &WideInt,
) -> Result<(), AccessError> {
    let byte = &mut field_mut(bytes, offset, 1)?[0];
    let mask = ((1u16 << bits) - 1) as u8;
    let low = value.limbs()[0] as u8;
    let raw = if signed && bits > 0 && value.is_negative() {
        let sign_mask = 1u8 << (bits - 1);
        sign_mask | (low & (sign_mask - 1))
    } else {
        low & mask
    };
    *byte = (*byte & !(mask << shift)) | (raw << shift);
    Ok(())
}

/// Reads `bits` bits starting at byte `offset` as little-endian 64-bit
/// chunks. The field bytes are normalized to little-endian first and bits
/// above `bits` are masked off.
pub fn read_chunks(bytes: &[u8], offset: usize, bits: usize, order: ByteOrder) -> Result<Vec<u64>, AccessError> {
    let len = bits.div_ceil(8);
    let field = field(bytes, offset, len)?;
    let normalized: Vec<u8> = match order {
        ByteOrder::Little => field.to_vec(),
        ByteOrder::Big => field.iter().rev().copied().collect(),
    };
    let mut chunks: Vec<u64> = normalized
        .chunks(8)
        .map(|chunk| {
            let mut buf = [0u8; 8];
            buf[..chunk.len()].copy_from_slice(chunk);
            u64::from_le_bytes(buf)
        })
        .collect();
    let rem = bits % 64;
    if rem != 0 {
        if let Some(last) = chunks.last_mut() {
            *last &= (1u64 << rem) - 1;
        }
    }
    Ok(chunks)
}

/// Writes the low `bits` bits of `chunks`. Padding bits in the final byte of
/// the field keep their previous value.
pub fn write_chunks(bytes: &mut [u8], offset: usize, bits: usize, order: ByteOrder, chunks: &[u64]) -> Result<(), AccessError> {
    let len = bits.div_ceil(8);
    let field = field_mut(bytes, offset, len)?;
    let mut normalized: Vec<u8> = chunks.iter().flat_map(|chunk| chunk.to_le_bytes()).take(len).collect();
    normalized.resize(len, 0);
    let rem = bits % 8;
    if rem != 0 && len > 0 {
        let keep = !((1u8 << rem) - 1);
        let last = match order {
            ByteOrder::Little => len - 1,
            ByteOrder::Big => 0,
        };
        normalized[len - 1] = (normalized[len - 1] & !keep) | (field[last] & keep);
    }
    match order {
        ByteOrder::Little => field.copy_from_slice(&normalized),
        ByteOrder::Big => {
            for (dst, src) in field.iter_mut().zip(normalized.iter().rev()) {
                *dst = *src;
            }
        }
    }
    Ok(())
}

/// Turns chunks read from memory into a scalar: 128 bits and below become
/// `Int`/`UInt`, anything wider a `WideInt`.
pub fn scalar_from_chunks(chunks: Vec<u64>, bits: usize, signed: bool) -> Scalar {
    if bits > 128 {
        return Scalar::Wide(WideInt::from_chunks(chunks, bits, signed));
    }
    let low = chunks.first().copied().unwrap_or(0) as u128;
    let high = chunks.get(1).copied().unwrap_or(0) as u128;
    let raw = (high << 64) | low;
    if !signed || bits == 0 {
        return Scalar::UInt(raw);
    }
    if bits < 128 && (raw >> (bits - 1)) & 1 == 1 {
        Scalar::Int((raw | !((1u128 << bits) - 1)) as i128)
    } else {
        Scalar::Int(raw as i128)
    }
}

pub fn read_chunked(bytes: &[u8], offset: usize, bits: usize, signed: bool, order: ByteOrder) -> Result<Scalar, AccessError> {
    let chunks = read_chunks(bytes, offset, bits, order)?;
    Ok(scalar_from_chunks(chunks, bits, signed))
}

pub fn write_chunked(bytes: &mut [u8], offset: usize, bits: usize, order: ByteOrder, value: &WideInt) -> Result<(), AccessError> {
    write_chunks(bytes, offset, bits, order, &value.to_chunks(bits))
}

/// Converts a scalar into an integer operand for a `bits`-wide field,
/// rejecting out-of-range values when `runtime_safety` is on.
pub fn int_operand(value: &Scalar, bits: usize, signed: bool, runtime_safety: bool) -> Result<WideInt, AccessError> {
    let wide = match value {
        Scalar::Int(v) => WideInt::from_i128(*v),
        Scalar::UInt(v) => WideInt::from_u128(*v),
        Scalar::Wide(v) => v.clone(),
        Scalar::Bool(b) => WideInt::from_i128(*b as i128),
        Scalar::Float(f) if f.fract() == 0.0 && f.abs() < 2f64.powi(127) => WideInt::from_i128(*f as i128),
        Scalar::Float(f) => {
            return Err(AccessError::TypeMismatch {
                expected: "integer",
                found: f.to_string(),
            })
        }
    };
    if runtime_safety && !wide.fits(bits, signed) {
        return Err(AccessError::Overflow {
            value: wide.to_string(),
            bits,
            signed,
        });
    }
    Ok(wide)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sub_byte_signed_decomposition() {
        // 3-bit signed field at bit 2 holding -3 (0b101)
        let bytes = [0b101 << 2];
        assert_eq!(read_sub_byte(&bytes, 0, 2, 3, true).unwrap(), Scalar::Int(-3));
        assert_eq!(read_sub_byte(&bytes, 0, 2, 3, false).unwrap(), Scalar::UInt(5));
    }

    #[test]
    fn test_sub_byte_write_keeps_other_bits() {
        let mut bytes = [0xffu8];
        write_sub_byte(&mut bytes, 0, 3, 2, false, &WideInt::from_i128(0)).unwrap();
        assert_eq!(bytes[0], 0b1110_0111);
    }

    #[test]
    fn test_chunked_big_endian_24_bits() {
        let bytes = [0x12, 0x34, 0x56];
        assert_eq!(read_chunked(&bytes, 0, 24, false, ByteOrder::Big).unwrap(), Scalar::UInt(0x123456));
        assert_eq!(read_chunked(&bytes, 0, 24, false, ByteOrder::Little).unwrap(), Scalar::UInt(0x563412));
    }

    #[test]
    fn test_chunked_padding_bits_preserved() {
        let mut bytes = [0u8, 0xf0];
        write_chunked(&mut bytes, 0, 12, ByteOrder::Little, &WideInt::from_i128(-1)).unwrap();
        assert_eq!(bytes, [0xff, 0xff]);
        write_chunked(&mut bytes, 0, 12, ByteOrder::Little, &WideInt::from_i128(0)).unwrap();
        assert_eq!(bytes, [0x00, 0xf0]);
    }

    #[test]
    fn test_operand_range() {
        assert!(int_operand(&Scalar::Int(128), 8, true, true).is_err());
        assert!(int_operand(&Scalar::Int(128), 8, true, false).is_ok());
        assert!(int_operand(&Scalar::Float(1.5), 8, true, false).is_err());
        assert_eq!(int_operand(&Scalar::Float(-4.0), 8, true, true).unwrap(), WideInt::from_i128(-4));
    }

    #[test]
    fn test_range_error() {
        let bytes = [0u8; 3];
        assert_eq!(
            read_native(&bytes, 0, 32, false, ByteOrder::Little).unwrap_err(),
            AccessError::Range { offset: 0, len: 4, available: 3 }
        );
    }
}
