//! Container word types and item widths used to monomorphize the decoder.

/// Unsigned storage word the packed stream is read in.
pub trait Container: Copy + 'static {
    const BITS: u32;
    const BYTES: usize;

    /// Read one little-endian container from the front of `bytes`.
    fn read_le(bytes: &[u8]) -> u32;
}

impl Container for u8 {
    const BITS: u32 = 8;
    const BYTES: usize = 1;

    #[inline(always)]
    fn read_le(bytes: &[u8]) -> u32 {
        u32::from(bytes[0])
    }
}

impl Container for u16 {
    const BITS: u32 = 16;
    const BYTES: usize = 2;

    #[inline(always)]
    fn read_le(bytes: &[u8]) -> u32 {
        u32::from(u16::from_le_bytes([bytes[0], bytes[1]]))
    }
}

impl Container for u32 {
    const BITS: u32 = 32;
    const BYTES: usize = 4;

    #[inline(always)]
    fn read_le(bytes: &[u8]) -> u32 {
        u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
    }
}

/// Bits per packed item, either fixed at compile time or carried at runtime.
pub trait ItemWidth: Copy {
    /// Width for a descriptor's `bits_per_item`.
    fn for_bits(bits: u32) -> Self;

    fn bits(&self) -> u32;
}

/// Compile-time item width for the specialised fast paths.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Fixed<const BITS: u32>;

impl<const BITS: u32> ItemWidth for Fixed<BITS> {
    fn for_bits(bits: u32) -> Self {
        debug_assert_eq!(bits, BITS);
        Fixed
    }

    #[inline(always)]
    fn bits(&self) -> u32 {
        BITS
    }
}

/// Runtime item width for the generic slow path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Dynamic(pub u32);

impl ItemWidth for Dynamic {
    fn for_bits(bits: u32) -> Self {
        Dynamic(bits)
    }

    #[inline(always)]
    fn bits(&self) -> u32 {
        self.0
    }
}

/// Sign-extend the low `bits` of `raw` to a full `i32`.
#[inline(always)]
pub fn sign_extend(raw: u32, bits: u32) -> i32 {
    let shift = 32 - bits;
    ((raw << shift) as i32) >> shift
}
