//! Bit copying between a misaligned field and a byte-aligned scratch buffer.

/// Number of bytes a field of `bit_size` bits starting at `bit_offset`
/// (within its first byte) touches.
pub fn span_bytes(bit_offset: usize, bit_size: usize) -> usize {
    (bit_offset + bit_size).div_ceil(8)
}

/// Copies `bit_count` bits starting at bit `src_bit` of `src` into the low
/// bits of `dest`, which must hold at least `bit_count.div_ceil(8)` bytes.
/// Unused high bits of the final destination byte are cleared.
pub fn extract_bits(src: &[u8], src_bit: usize, bit_count: usize, dest: &mut [u8]) {
    let mut src_index = src_bit / 8;
    let shift = src_bit % 8;
    let mut carry: u32 = 0;
    let mut carried: usize = 0;
    let mut remaining = bit_count;
    let mut dest_index = 0;

    if shift != 0 {
        carry = (src[src_index] >> shift) as u32;
        carried = 8 - shift;
        src_index += 1;
    }
    while remaining > 0 {
        while carried < 8 && carried < remaining {
            carry |= (src[src_index] as u32) << carried;
            carried += 8;
            src_index += 1;
        }
        let take = remaining.min(8);
        let mask = if take == 8 { 0xff } else { (1u32 << take) - 1 };
        dest[dest_index] = (carry & mask) as u8;
        dest_index += 1;
        carry >>= 8;
        carried = carried.saturating_sub(8);
        remaining -= take;
    }
}

/// Writes the low `bit_count` bits of `src` into `dest` starting at bit
/// `dest_bit`. Bits of `dest` outside that range keep their value.
pub fn insert_bits(dest: &mut [u8], dest_bit: usize, bit_count: usize, src: &[u8]) {
    let mut dest_index = dest_bit / 8;
    let mut shift = dest_bit % 8;
    let mut remaining = bit_count;
    let mut src_index = 0;
    let mut carry: u32 = 0;
    let mut carried: usize = 0;

    while remaining > 0 {
        if carried < 8 && src_index < src.len() {
            carry |= (src[src_index] as u32) << carried;
            carried += 8;
            src_index += 1;
        }
        let room = 8 - shift;
        let take = remaining.min(room);
        let field_mask = (((1u32 << take) - 1) << shift) as u8;
        let bits = ((carry << shift) as u8) & field_mask;
        dest[dest_index] = (dest[dest_index] & !field_mask) | bits;
        carry >>= take;
        carried = carried.saturating_sub(take);
        remaining -= take;
        shift = 0;
        dest_index += 1;
    }
}
