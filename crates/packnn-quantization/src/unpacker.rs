//! Bit-stream unpacker
//!
//! Decodes a stream of little-endian containers into sign-extended items,
//! first item in the least significant bits. Items never straddle two
//! containers: when fewer than `bits_per_item` bits remain, the residue is
//! dropped and the next container is loaded.

use std::marker::PhantomData;

use crate::container::{sign_extend, Container, ItemWidth};

/// Streaming decode state over one packed value region.
#[derive(Debug, Clone)]
pub struct WeightUnpacker<'a, C: Container, W: ItemWidth> {
    values: &'a [u8],
    width: W,
    current: u32,
    bits_in_container: u32,
    next: usize,
    _container: PhantomData<C>,
}

impl<'a, C: Container, W: ItemWidth> WeightUnpacker<'a, C, W> {
    pub fn new(values: &'a [u8], width: W) -> Self {
        debug_assert!(width.bits() >= 1 && width.bits() <= C::BITS);
        Self { values, width, current: 0, bits_in_container: 0, next: 0, _container: PhantomData }
    }

    /// Decode the next item.
    #[inline(always)]
    pub fn unpack(&mut self) -> i32 {
        let bits = self.width.bits();
        if bits == C::BITS {
            // One item per container: no masking needed.
            let raw = C::read_le(&self.values[self.next..]);
            self.next += C::BYTES;
            return sign_extend(raw, bits);
        }

        if self.bits_in_container < bits {
            self.current = C::read_le(&self.values[self.next..]);
            self.next += C::BYTES;
            self.bits_in_container = C::BITS;
        }
        let raw = self.current & ((1u32 << bits) - 1);
        self.current >>= bits;
        self.bits_in_container -= bits;
        sign_extend(raw, bits)
    }

    /// Drop the residual bits so the next item comes from a fresh container.
    #[inline]
    pub fn skip_to_next_container(&mut self) {
        self.bits_in_container = 0;
    }

    /// Bytes of the value region consumed so far.
    pub fn bytes_consumed(&self) -> usize {
        self.next
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container::{Dynamic, Fixed};

    #[test]
    fn nibbles_lsb_first() {
        let bytes = [0xD5, 0xF2, 0x07];
        let mut unpacker = WeightUnpacker::<u8, Fixed<4>>::new(&bytes, Fixed);
        let got: Vec<i32> = (0..5).map(|_| unpacker.unpack()).collect();
        assert_eq!(got, vec![5, -3, 2, -1, 7]);
        assert_eq!(unpacker.bytes_consumed(), 3);
    }

    #[test]
    fn residual_bits_are_skipped() {
        // Three 5-bit items per u16, the top bit is padding.
        let word: u16 = 1 | (2 << 5) | (0b11111 << 10) | (1 << 15);
        let next: u16 = 0b10000;
        let mut bytes = word.to_le_bytes().to_vec();
        bytes.extend_from_slice(&next.to_le_bytes());
        let mut unpacker = WeightUnpacker::<u16, Fixed<5>>::new(&bytes, Fixed);
        assert_eq!(unpacker.unpack(), 1);
        assert_eq!(unpacker.unpack(), 2);
        assert_eq!(unpacker.unpack(), -1);
        assert_eq!(unpacker.unpack(), -16);
    }

    #[test]
    fn full_width_items_read_directly() {
        let bytes = [0x80, 0x7F, 0xFF];
        let mut unpacker = WeightUnpacker::<u8, Fixed<8>>::new(&bytes, Fixed);
        assert_eq!(unpacker.unpack(), -128);
        assert_eq!(unpacker.unpack(), 127);
        assert_eq!(unpacker.unpack(), -1);
    }

    #[test]
    fn skip_to_next_container_discards_residue() {
        let bytes = [0x21, 0x43];
        let mut unpacker = WeightUnpacker::<u8, Dynamic>::new(&bytes, Dynamic(4));
        assert_eq!(unpacker.unpack(), 1);
        unpacker.skip_to_next_container();
        assert_eq!(unpacker.unpack(), 3);
        assert_eq!(unpacker.unpack(), 4);
    }

    #[test]
    fn six_bit_in_u32() {
        let items = [-32i32, 31, 0, -1, 5];
        let mut word = 0u32;
        for (i, v) in items.iter().enumerate() {
            word |= ((*v as u32) & 0x3F) << (6 * i);
        }
        let bytes = word.to_le_bytes();
        let mut unpacker = WeightUnpacker::<u32, Fixed<6>>::new(&bytes, Fixed);
        for v in items {
            assert_eq!(unpacker.unpack(), v);
        }
    }
}
