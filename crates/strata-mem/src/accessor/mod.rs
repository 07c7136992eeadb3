//! Getter and setter functions for scalars stored at arbitrary bit offsets.
//!
//! An accessor is picked once per [`AccessorSignature`] and cached, so every
//! member sharing a signature shares the same function object.

pub mod bits;
pub mod float;
mod int;
mod wide;

use crate::{AccessError, ByteOrder};
use rustc_hash::FxHashMap;
use std::rc::Rc;

pub use wide::WideInt;

/// Reads a scalar at a byte offset of a byte region.
pub type Getter = Rc<dyn Fn(&[u8], usize) -> Result<Scalar, AccessError>>;
/// Writes a scalar at a byte offset of a byte region.
pub type Setter = Rc<dyn Fn(&mut [u8], usize, &Scalar) -> Result<(), AccessError>>;

/// A scalar value moving in or out of memory.
#[derive(Debug, Clone, PartialEq)]
pub enum Scalar {
    Bool(bool),
    Int(i128),
    UInt(u128),
    /// Integers wider than 128 bits.
    Wide(WideInt),
    Float(f64),
}

impl Scalar {
    pub fn as_i128(&self) -> Option<i128> {
        match self {
            Scalar::Bool(b) => Some(*b as i128),
            Scalar::Int(v) => Some(*v),
            Scalar::UInt(v) => i128::try_from(*v).ok(),
            Scalar::Wide(v) => v.to_i128(),
            Scalar::Float(_) => None,
        }
    }

    pub fn as_u128(&self) -> Option<u128> {
        match self {
            Scalar::Bool(b) => Some(*b as u128),
            Scalar::Int(v) => u128::try_from(*v).ok(),
            Scalar::UInt(v) => Some(*v),
            Scalar::Wide(v) => v.to_u128(),
            Scalar::Float(_) => None,
        }
    }

    pub fn as_f64(&self) -> f64 {
        match self {
            Scalar::Bool(b) => *b as u8 as f64,
            Scalar::Int(v) => *v as f64,
            Scalar::UInt(v) => *v as f64,
            Scalar::Wide(v) => v.to_f64(),
            Scalar::Float(v) => *v,
        }
    }

    /// Truthiness of a raw scalar: any non-zero value is `true`.
    pub fn as_bool(&self) -> bool {
        match self {
            Scalar::Bool(b) => *b,
            Scalar::Int(v) => *v != 0,
            Scalar::UInt(v) => *v != 0,
            Scalar::Wide(v) => !v.is_zero(),
            Scalar::Float(v) => *v != 0.0,
        }
    }
}

/// How the bits of a scalar are interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScalarKind {
    Bool,
    Int,
    Float,
}

/// The exact shape of a scalar field. `bit_offset` is the position inside
/// the field's first byte; the byte offset is supplied at access time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AccessorSignature {
    pub kind: ScalarKind,
    pub bit_size: usize,
    pub bit_offset: usize,
    pub signed: bool,
}

impl AccessorSignature {
    pub fn new(kind: ScalarKind, bit_size: usize, bit_offset: usize, signed: bool) -> Self {
        AccessorSignature {
            kind,
            bit_size,
            bit_offset: bit_offset & 7,
            signed: signed && kind == ScalarKind::Int,
        }
    }

    pub fn int(bit_size: usize, bit_offset: usize, signed: bool) -> Self {
        Self::new(ScalarKind::Int, bit_size, bit_offset, signed)
    }

    pub fn float(bit_size: usize, bit_offset: usize) -> Self {
        Self::new(ScalarKind::Float, bit_size, bit_offset, true)
    }

    pub fn boolean(bit_size: usize, bit_offset: usize) -> Self {
        Self::new(ScalarKind::Bool, bit_size, bit_offset, false)
    }
}

/// The access path chosen for a signature.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    /// Byte-aligned native integer width or supported float width.
    Native,
    /// Field confined to a single byte.
    SubByte,
    /// Byte-aligned integer of any other width.
    Chunked,
    /// Multi-byte field starting mid-byte, accessed through a scratch copy.
    Misaligned,
}

impl Strategy {
    pub fn select(sig: &AccessorSignature) -> Strategy {
        let native = match sig.kind {
            ScalarKind::Float => float::float_bytes(sig.bit_size).is_some(),
            ScalarKind::Int | ScalarKind::Bool => int::is_native_width(sig.bit_size),
        };
        if sig.bit_offset == 0 && native {
            Strategy::Native
        } else if sig.kind != ScalarKind::Float && sig.bit_offset + sig.bit_size <= 8 {
            Strategy::SubByte
        } else if sig.bit_offset == 0 {
            Strategy::Chunked
        } else {
            Strategy::Misaligned
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Codec {
    sig: AccessorSignature,
    strategy: Strategy,
    order: ByteOrder,
    runtime_safety: bool,
}

impl Codec {
    fn read(&self, bytes: &[u8], offset: usize) -> Result<Scalar, AccessError> {
        let AccessorSignature { bit_size, bit_offset, .. } = self.sig;
        match self.strategy {
            Strategy::SubByte => {
                let raw = int::read_sub_byte(bytes, offset, bit_offset, bit_size, self.sig.signed)?;
                Ok(self.finish_read(raw))
            }
            Strategy::Misaligned => {
                let span = int::field(bytes, offset, bits::span_bytes(bit_offset, bit_size))?;
                let mut scratch = vec![0u8; bit_size.div_ceil(8)];
                bits::extract_bits(span, bit_offset, bit_size, &mut scratch);
                self.read_aligned(&scratch, 0)
            }
            Strategy::Native | Strategy::Chunked => self.read_aligned(bytes, offset),
        }
    }

    fn read_aligned(&self, bytes: &[u8], offset: usize) -> Result<Scalar, AccessError> {
        let AccessorSignature { kind, bit_size, signed, .. } = self.sig;
        if kind == ScalarKind::Float {
            return float::read_float(bytes, offset, bit_size, self.order).map(Scalar::Float);
        }
        let raw = if int::is_native_width(bit_size) {
            int::read_native(bytes, offset, bit_size, signed, self.order)?
        } else {
            int::read_chunked(bytes, offset, bit_size, signed, self.order)?
        };
        Ok(self.finish_read(raw))
    }

    fn finish_read(&self, raw: Scalar) -> Scalar {
        match self.sig.kind {
            ScalarKind::Bool => Scalar::Bool(raw.as_bool()),
            _ => raw,
        }
    }

    fn write(&self, bytes: &mut [u8], offset: usize, value: &Scalar) -> Result<(), AccessError> {
        let AccessorSignature { bit_size, bit_offset, .. } = self.sig;
        match self.strategy {
            Strategy::SubByte => {
                let operand = self.operand(value)?;
                int::write_sub_byte(bytes, offset, bit_offset, bit_size, self.sig.signed, &operand)
            }
            Strategy::Misaligned => {
                // validate before touching the destination
                let span_len = bits::span_bytes(bit_offset, bit_size);
                int::field(bytes, offset, span_len)?;
                let mut scratch = vec![0u8; bit_size.div_ceil(8)];
                self.write_aligned(&mut scratch, 0, value)?;
                let span = int::field_mut(bytes, offset, span_len)?;
                bits::insert_bits(span, bit_offset, bit_size, &scratch);
                Ok(())
            }
            Strategy::Native | Strategy::Chunked => self.write_aligned(bytes, offset, value),
        }
    }

    fn write_aligned(&self, bytes: &mut [u8], offset: usize, value: &Scalar) -> Result<(), AccessError> {
        let bit_size = self.sig.bit_size;
        if self.sig.kind == ScalarKind::Float {
            let value = match value {
                Scalar::Float(v) => *v,
                Scalar::Int(_) | Scalar::UInt(_) | Scalar::Wide(_) => value.as_f64(),
                Scalar::Bool(_) => {
                    return Err(AccessError::TypeMismatch {
                        expected: "float",
                        found: format!("{:?}", value),
                    })
                }
            };
            return float::write_float(bytes, offset, bit_size, self.order, value);
        }
        let operand = self.operand(value)?;
        int::write_native(bytes, offset, bit_size, self.order, &operand)
    }

    fn operand(&self, value: &Scalar) -> Result<WideInt, AccessError> {
        if self.sig.kind == ScalarKind::Bool {
            return match value {
                Scalar::Bool(b) => Ok(WideInt::from_i128(*b as i128)),
                other => match other.as_i128() {
                    Some(v @ (0 | 1)) => Ok(WideInt::from_i128(v)),
                    _ => Err(AccessError::TypeMismatch {
                        expected: "bool",
                        found: format!("{:?}", other),
                    }),
                },
            };
        }
        int::int_operand(value, self.sig.bit_size, self.sig.signed, self.runtime_safety)
    }
}

/// Builds and memoizes accessors for one loaded module.
pub struct AccessorFactory {
    byte_order: ByteOrder,
    runtime_safety: bool,
    getters: FxHashMap<AccessorSignature, Getter>,
    setters: FxHashMap<AccessorSignature, Setter>,
}

impl AccessorFactory {
    pub fn new(byte_order: ByteOrder, runtime_safety: bool) -> Self {
        AccessorFactory {
            byte_order,
            runtime_safety,
            getters: FxHashMap::default(),
            setters: FxHashMap::default(),
        }
    }

    pub fn byte_order(&self) -> ByteOrder {
        self.byte_order
    }

    pub fn runtime_safety(&self) -> bool {
        self.runtime_safety
    }

    fn codec(&self, sig: AccessorSignature) -> Codec {
        let strategy = Strategy::select(&sig);
        log::trace!("accessor for {:?} uses {:?}", sig, strategy);
        Codec {
            sig,
            strategy,
            order: self.byte_order,
            runtime_safety: self.runtime_safety,
        }
    }

    /// Gets the reader for `sig`, building it on first request.
    pub fn getter(&mut self, sig: AccessorSignature) -> Getter {
        if let Some(getter) = self.getters.get(&sig) {
            return getter.clone();
        }
        let codec = self.codec(sig);
        let getter: Getter = Rc::new(move |bytes: &[u8], offset: usize| codec.read(bytes, offset));
        self.getters.insert(sig, getter.clone());
        getter
    }

    /// Gets the writer for `sig`, building it on first request.
    pub fn setter(&mut self, sig: AccessorSignature) -> Setter {
        if let Some(setter) = self.setters.get(&sig) {
            return setter.clone();
        }
        let codec = self.codec(sig);
        let setter: Setter =
            Rc::new(move |bytes: &mut [u8], offset: usize, value: &Scalar| codec.write(bytes, offset, value));
        self.setters.insert(sig, setter.clone());
        setter
    }

    /// Number of distinct accessors built so far.
    pub fn len(&self) -> usize {
        self.getters.len() + self.setters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for AccessorFactory {
    fn default() -> Self {
        Self::new(ByteOrder::Little, true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accessors_are_memoized() {
        let mut factory = AccessorFactory::default();
        let a = factory.getter(AccessorSignature::int(32, 0, true));
        let b = factory.getter(AccessorSignature::int(32, 8, true));
        assert!(Rc::ptr_eq(&a, &b), "byte offsets do not change the signature");
        let c = factory.getter(AccessorSignature::int(32, 0, false));
        assert!(!Rc::ptr_eq(&a, &c));
        assert_eq!(factory.len(), 2);
    }

    #[test]
    fn test_strategy_selection() {
        assert_eq!(Strategy::select(&AccessorSignature::int(16, 0, true)), Strategy::Native);
        assert_eq!(Strategy::select(&AccessorSignature::int(3, 4, true)), Strategy::SubByte);
        assert_eq!(Strategy::select(&AccessorSignature::int(24, 0, false)), Strategy::Chunked);
        assert_eq!(Strategy::select(&AccessorSignature::int(128, 0, false)), Strategy::Chunked);
        assert_eq!(Strategy::select(&AccessorSignature::int(16, 3, false)), Strategy::Misaligned);
        assert_eq!(Strategy::select(&AccessorSignature::float(16, 0)), Strategy::Native);
        assert_eq!(Strategy::select(&AccessorSignature::float(32, 1)), Strategy::Misaligned);
        assert_eq!(Strategy::select(&AccessorSignature::boolean(1, 7)), Strategy::SubByte);
    }

    #[test]
    fn test_bool_rejects_other_numbers() {
        let mut factory = AccessorFactory::default();
        let set = factory.setter(AccessorSignature::boolean(1, 0));
        let mut bytes = [0u8];
        set(&mut bytes, 0, &Scalar::Int(1)).unwrap();
        assert_eq!(bytes[0], 1);
        assert!(matches!(set(&mut bytes, 0, &Scalar::Int(2)), Err(AccessError::TypeMismatch { .. })));
    }
}
