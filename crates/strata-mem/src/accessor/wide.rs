use std::fmt;

/// Arbitrary-width integer in two's complement, stored as little-endian
/// 64-bit limbs. The top bit of the last limb is the sign.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct WideInt {
    limbs: Vec<u64>,
}

impl WideInt {
    /// Takes limbs that are already in two's complement form.
    pub fn from_limbs(mut limbs: Vec<u64>) -> Self {
        if limbs.is_empty() {
            limbs.push(0);
        }
        WideInt { limbs }
    }

    /// Takes limbs of an unsigned magnitude, adding a zero limb when the top
    /// bit would otherwise read as a sign.
    pub fn from_unsigned_limbs(mut limbs: Vec<u64>) -> Self {
        if limbs.last().map_or(true, |top| top >> 63 != 0) {
            limbs.push(0);
        }
        WideInt { limbs }
    }

    /// Builds a value from `bit_size` bits held in `chunks`, sign-extending
    /// from bit `bit_size - 1` when `signed`.
    pub fn from_chunks(mut chunks: Vec<u64>, bit_size: usize, signed: bool) -> Self {
        if chunks.is_empty() || bit_size == 0 {
            return WideInt { limbs: vec![0] };
        }
        let rem = bit_size % 64;
        if !signed {
            return Self::from_unsigned_limbs(chunks);
        }
        if rem != 0 {
            let last = chunks.len() - 1;
            if (chunks[last] >> (rem - 1)) & 1 == 1 {
                chunks[last] |= !((1u64 << rem) - 1);
            }
        }
        WideInt { limbs: chunks }
    }

    pub fn from_i128(value: i128) -> Self {
        WideInt {
            limbs: vec![value as u64, (value >> 64) as u64],
        }
    }

    pub fn from_u128(value: u128) -> Self {
        Self::from_unsigned_limbs(vec![value as u64, (value >> 64) as u64])
    }

    pub fn limbs(&self) -> &[u64] {
        &self.limbs
    }

    pub fn is_negative(&self) -> bool {
        self.limbs.last().map_or(false, |top| top >> 63 != 0)
    }

    pub fn is_zero(&self) -> bool {
        self.limbs.iter().all(|&limb| limb == 0)
    }

    /// Gets bit `index`, extending the sign past the stored limbs.
    pub fn bit(&self, index: usize) -> bool {
        match self.limbs.get(index / 64) {
            Some(limb) => (limb >> (index % 64)) & 1 == 1,
            None => self.is_negative(),
        }
    }

    /// Checks that the value is representable in `bits` bits.
    pub fn fits(&self, bits: usize, signed: bool) -> bool {
        let width = self.limbs.len() * 64;
        if signed {
            if bits == 0 {
                return self.is_zero();
            }
            let sign = self.is_negative();
            (bits - 1..width).all(|i| self.bit(i) == sign)
        } else {
            !self.is_negative() && (bits..width).all(|i| !self.bit(i))
        }
    }

    /// Truncates (or sign-extends) to `bits` bits, returned as 64-bit chunks
    /// with the final partial chunk masked.
    pub fn to_chunks(&self, bits: usize) -> Vec<u64> {
        let count = bits.div_ceil(64);
        let fill = if self.is_negative() { u64::MAX } else { 0 };
        let mut chunks: Vec<u64> = (0..count).map(|i| self.limbs.get(i).copied().unwrap_or(fill)).collect();
        let rem = bits % 64;
        if rem != 0 {
            if let Some(last) = chunks.last_mut() {
                *last &= (1u64 << rem) - 1;
            }
        }
        chunks
    }

    pub fn to_i128(&self) -> Option<i128> {
        if !self.fits(128, true) {
            return None;
        }
        let low = self.limbs[0] as u128;
        let high = self.limbs.get(1).copied().unwrap_or(if self.is_negative() { u64::MAX } else { 0 }) as u128;
        Some(((high << 64) | low) as i128)
    }

    pub fn to_u128(&self) -> Option<u128> {
        if !self.fits(128, false) {
            return None;
        }
        let low = self.limbs[0] as u128;
        let high = self.limbs.get(1).copied().unwrap_or(0) as u128;
        Some((high << 64) | low)
    }

    /// Approximate value as a float, for display and float conversion.
    pub fn to_f64(&self) -> f64 {
        let negative = self.is_negative();
        let magnitude: Vec<u64> = if negative { negate(&self.limbs) } else { self.limbs.clone() };
        let value = magnitude.iter().rev().fold(0.0f64, |acc, &limb| acc * 18446744073709551616.0 + limb as f64);
        if negative {
            -value
        } else {
            value
        }
    }
}

fn negate(limbs: &[u64]) -> Vec<u64> {
    let mut out = Vec::with_capacity(limbs.len());
    let mut carry = true;
    for &limb in limbs {
        let (sum, overflow) = (!limb).overflowing_add(carry as u64);
        out.push(sum);
        carry = overflow;
    }
    out
}

impl From<i128> for WideInt {
    fn from(value: i128) -> Self {
        WideInt::from_i128(value)
    }
}

impl From<u128> for WideInt {
    fn from(value: u128) -> Self {
        WideInt::from_u128(value)
    }
}

impl fmt::Debug for WideInt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "WideInt({})", self)
    }
}

impl fmt::Display for WideInt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(value) = self.to_i128() {
            return write!(f, "{}", value);
        }
        if let Some(value) = self.to_u128() {
            return write!(f, "{}", value);
        }
        // beyond 128 bits print the raw two's complement limbs
        f.write_str("0x")?;
        for limb in self.limbs.iter().rev() {
            write!(f, "{:016x}", limb)?;
        }
        Ok(())
    }
}
