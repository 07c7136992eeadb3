// Shared helpers for accessor and registry integration tests

#![allow(dead_code)]

use strata_mem::{AccessorFactory, AccessorSignature, ByteOrder, Scalar};

pub const GUARD: u8 = 0x5a;

pub fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

pub fn factory() -> AccessorFactory {
    AccessorFactory::new(ByteOrder::Little, true)
}

/// Writes `value` into a buffer pre-filled with guard bytes, reads it back
/// and checks that every bit outside the field still holds the guard
/// pattern.
pub fn round_trip(factory: &mut AccessorFactory, sig: AccessorSignature, byte_offset: usize, value: Scalar) -> Scalar {
    let len = byte_offset + (sig.bit_offset + sig.bit_size).div_ceil(8) + 2;
    let mut bytes = vec![GUARD; len];
    let setter = factory.setter(sig);
    let getter = factory.getter(sig);
    setter(&mut bytes, byte_offset, &value).expect("write in range");
    let first = byte_offset * 8 + sig.bit_offset;
    let last = first + sig.bit_size;
    for bit in 0..len * 8 {
        if bit >= first && bit < last {
            continue;
        }
        let expected = (GUARD >> (bit % 8)) & 1;
        let actual = (bytes[bit / 8] >> (bit % 8)) & 1;
        assert_eq!(actual, expected, "bit {} outside the field was modified for {:?}", bit, sig);
    }
    getter(&bytes, byte_offset).expect("read in range")
}

/// Boundary samples for an integer of the given shape.
pub fn samples(bits: usize, signed: bool) -> Vec<i128> {
    if bits == 0 {
        return vec![0];
    }
    let (min, max): (i128, i128) = if signed {
        (-(1i128 << (bits.min(127) - 1)), (1i128 << (bits.min(127) - 1)) - 1)
    } else {
        (0, if bits >= 127 { i128::MAX } else { (1i128 << bits) - 1 })
    };
    let mut values = vec![min, max, 0, min / 2, max / 2, max / 3];
    if max > 0 {
        values.push(1);
    }
    if min < 0 {
        values.push(-1);
    }
    values
}
