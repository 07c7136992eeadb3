mod common;

use common::{factory, init_logger, round_trip, samples};
use std::rc::Rc;
use strata_mem::{AccessError, AccessorFactory, AccessorSignature, ByteOrder, Scalar, WideInt};

#[test]
fn test_int_round_trips_preserve_neighbours() {
    init_logger();
    let mut factory = factory();
    let widths = [1, 2, 3, 5, 7, 8, 9, 12, 16, 17, 24, 31, 32, 33, 48, 63, 64, 65, 72, 100, 127, 128];
    for &bits in &widths {
        for bit_offset in [0, 1, 3, 7] {
            for signed in [false, true] {
                let sig = AccessorSignature::int(bits, bit_offset, signed);
                for value in samples(bits, signed) {
                    let scalar = if signed { Scalar::Int(value) } else { Scalar::UInt(value as u128) };
                    let back = round_trip(&mut factory, sig, 2, scalar);
                    assert_eq!(back.as_i128(), Some(value), "{:?} with {}", sig, value);
                }
            }
        }
    }
}

#[test]
fn test_unsigned_128_extremes() {
    let mut factory = factory();
    let sig = AccessorSignature::int(128, 0, false);
    assert_eq!(round_trip(&mut factory, sig, 0, Scalar::UInt(u128::MAX)), Scalar::UInt(u128::MAX));
    let sig = AccessorSignature::int(128, 5, true);
    assert_eq!(round_trip(&mut factory, sig, 1, Scalar::Int(i128::MIN)), Scalar::Int(i128::MIN));
}

#[test]
fn test_wide_integers_above_128_bits() {
    let mut factory = factory();
    for (bits, bit_offset) in [(129, 0), (200, 0), (256, 0), (200, 3)] {
        let sig = AccessorSignature::int(bits, bit_offset, true);
        let negative = WideInt::from_i128(-123_456_789);
        assert_eq!(
            round_trip(&mut factory, sig, 1, Scalar::Wide(negative.clone())).as_i128(),
            Some(-123_456_789)
        );
        let mut limbs = vec![u64::MAX; bits.div_ceil(64)];
        let rem = bits % 64;
        // largest positive value: every bit but the sign
        let last = limbs.len() - 1;
        limbs[last] = if rem == 0 { u64::MAX >> 1 } else { (1u64 << (rem - 1)) - 1 };
        let max = WideInt::from_limbs(limbs);
        assert!(max.fits(bits, true));
        assert_eq!(round_trip(&mut factory, sig, 1, Scalar::Wide(max.clone())), Scalar::Wide(max));
    }
}

#[test]
fn test_overflow_rejected_with_runtime_safety() {
    let mut factory = factory();
    let mut bytes = [0u8; 4];
    let set = factory.setter(AccessorSignature::int(8, 0, true));
    assert!(matches!(
        set(&mut bytes, 0, &Scalar::Int(128)),
        Err(AccessError::Overflow { bits: 8, signed: true, .. })
    ));
    let set = factory.setter(AccessorSignature::int(4, 2, false));
    assert!(matches!(set(&mut bytes, 1, &Scalar::Int(16)), Err(AccessError::Overflow { .. })));
    assert!(matches!(set(&mut bytes, 1, &Scalar::Int(-1)), Err(AccessError::Overflow { .. })));
    assert_eq!(bytes, [0; 4], "rejected writes leave memory untouched");
}

#[test]
fn test_overflow_wraps_without_runtime_safety() {
    let mut factory = AccessorFactory::new(ByteOrder::Little, false);
    let mut bytes = [0u8; 2];
    let set = factory.setter(AccessorSignature::int(8, 0, true));
    let get = factory.getter(AccessorSignature::int(8, 0, true));
    set(&mut bytes, 0, &Scalar::Int(200)).unwrap();
    assert_eq!(get(&bytes, 0).unwrap(), Scalar::Int(-56));

    let set = factory.setter(AccessorSignature::int(3, 0, false));
    let get = factory.getter(AccessorSignature::int(3, 0, false));
    set(&mut bytes, 1, &Scalar::Int(9)).unwrap();
    assert_eq!(get(&bytes, 1).unwrap(), Scalar::UInt(1));
}

#[test]
fn test_out_of_range_access() {
    let mut factory = factory();
    let get = factory.getter(AccessorSignature::int(32, 0, false));
    assert!(matches!(get(&[0u8; 6], 4), Err(AccessError::Range { offset: 4, len: 4, available: 6 })));
    let set = factory.setter(AccessorSignature::int(12, 6, false));
    assert!(matches!(set(&mut [0u8; 2], 1, &Scalar::UInt(1)), Err(AccessError::Range { .. })));
}

#[test]
fn test_big_endian_layout() {
    let mut factory = AccessorFactory::new(ByteOrder::Big, true);
    let mut bytes = [0u8; 8];
    factory.setter(AccessorSignature::int(32, 0, false))(&mut bytes, 0, &Scalar::UInt(0x0102_0304)).unwrap();
    assert_eq!(&bytes[..4], &[1, 2, 3, 4]);
    factory.setter(AccessorSignature::int(24, 0, true))(&mut bytes, 4, &Scalar::Int(-2)).unwrap();
    assert_eq!(&bytes[4..7], &[0xff, 0xff, 0xfe]);
    assert_eq!(factory.getter(AccessorSignature::int(24, 0, true))(&bytes, 4).unwrap(), Scalar::Int(-2));
}

#[test]
fn test_bool_fields() {
    let mut factory = factory();
    for bit_offset in 0..8 {
        let sig = AccessorSignature::boolean(1, bit_offset);
        assert_eq!(round_trip(&mut factory, sig, 1, Scalar::Bool(true)), Scalar::Bool(true));
        assert_eq!(round_trip(&mut factory, sig, 1, Scalar::Bool(false)), Scalar::Bool(false));
    }
    let get = factory.getter(AccessorSignature::boolean(8, 0));
    assert_eq!(get(&[2], 0).unwrap(), Scalar::Bool(true));
}

fn same_float(a: &Scalar, b: f64) -> bool {
    match a {
        Scalar::Float(a) => (a.is_nan() && b.is_nan()) || (*a == b && a.is_sign_negative() == b.is_sign_negative()),
        _ => false,
    }
}

#[test]
fn test_float_special_values() {
    let mut factory = factory();
    for bits in [16, 32, 64, 80, 128] {
        for bit_offset in [0, 3] {
            let sig = AccessorSignature::float(bits, bit_offset);
            for value in [0.0, -0.0, f64::INFINITY, f64::NEG_INFINITY, f64::NAN] {
                let back = round_trip(&mut factory, sig, 1, Scalar::Float(value));
                assert!(same_float(&back, value), "{}-bit float at bit {}: {:?} -> {:?}", bits, bit_offset, value, back);
            }
        }
    }
}

#[test]
fn test_float_precision() {
    let mut factory = factory();
    for bits in [16, 32] {
        let sig = AccessorSignature::float(bits, 0);
        for value in [0.1, -2.5, 1234.5678, 0.000123, 65000.0] {
            let back = round_trip(&mut factory, sig, 0, Scalar::Float(value)).as_f64();
            assert!(((back - value) / value).abs() < 0.001, "{}-bit: {} -> {}", bits, value, back);
        }
    }
    for bits in [64, 80, 128] {
        let sig = AccessorSignature::float(bits, 0);
        for value in [0.1, -2.5e-300, 1.7976931348623157e308, std::f64::consts::E] {
            assert_eq!(round_trip(&mut factory, sig, 0, Scalar::Float(value)).as_f64(), value);
        }
    }
}

#[test]
fn test_f16_overflow_to_infinity() {
    let mut factory = factory();
    let back = round_trip(&mut factory, AccessorSignature::float(16, 0), 0, Scalar::Float(1.0e9));
    assert_eq!(back, Scalar::Float(f64::INFINITY));
    let back = round_trip(&mut factory, AccessorSignature::float(16, 0), 0, Scalar::Float(-1.0e9));
    assert_eq!(back, Scalar::Float(f64::NEG_INFINITY));
}

#[test]
fn test_f80_uses_ten_bytes() {
    let mut factory = factory();
    let mut bytes = [0xeeu8; 16];
    factory.setter(AccessorSignature::float(80, 0))(&mut bytes, 0, &Scalar::Float(1.0)).unwrap();
    assert_eq!(&bytes[..10], &[0, 0, 0, 0, 0, 0, 0, 0x80, 0xff, 0x3f]);
    assert_eq!(&bytes[10..], &[0xee; 6]);
}

#[test]
fn test_same_signature_same_function() {
    let mut factory = factory();
    let a = factory.setter(AccessorSignature::int(12, 3, true));
    let b = factory.setter(AccessorSignature::int(12, 11, true));
    assert!(Rc::ptr_eq(&a, &b));
    let c = factory.getter(AccessorSignature::float(64, 0));
    let d = factory.getter(AccessorSignature::float(64, 0));
    assert!(Rc::ptr_eq(&c, &d));
}
