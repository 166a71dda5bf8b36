//! Sparsity-map decoding
//!
//! Answers, once per logical weight position, whether that position is a
//! structural zero. Bit 0 of byte 0 is position 0, a set bit means the value
//! is stored. The policy is a type parameter so the dense case costs
//! nothing.

/// Zero-skipping policy for a [`PackedWeightUnpacker`](crate::PackedWeightUnpacker).
pub trait SparsityMap<'a>: Sized {
    /// False only for policies that can never report a zero.
    const SPARSE: bool;

    fn open(bitmap: Option<&'a [u8]>) -> Self;

    /// Consume one position, returning true for a structural zero.
    fn next_is_zero(&mut self) -> bool;

    /// Continue from the first bit of the next bitmap byte.
    fn skip_to_next_bitmap(&mut self);
}

/// Dense tensors: never a skipped zero.
#[derive(Debug, Clone, Copy, Default)]
pub struct NeverSparse;

impl<'a> SparsityMap<'a> for NeverSparse {
    const SPARSE: bool = false;

    fn open(_bitmap: Option<&'a [u8]>) -> Self {
        NeverSparse
    }

    #[inline(always)]
    fn next_is_zero(&mut self) -> bool {
        false
    }

    #[inline(always)]
    fn skip_to_next_bitmap(&mut self) {}
}

#[derive(Debug, Clone)]
struct BitmapReader<'a> {
    bitmap: &'a [u8],
    current: u8,
    mask: u8,
    next: usize,
}

impl<'a> BitmapReader<'a> {
    fn new(bitmap: &'a [u8]) -> Self {
        Self { bitmap, current: 0, mask: 0, next: 0 }
    }

    #[inline(always)]
    fn next_is_zero(&mut self) -> bool {
        if self.mask == 0 {
            self.current = self.bitmap[self.next];
            self.next += 1;
            self.mask = 1;
        }
        let zero = self.current & self.mask == 0;
        self.mask <<= 1;
        zero
    }
}

/// Tensors that always carry a bitmap.
#[derive(Debug, Clone)]
pub struct AlwaysSparse<'a>(BitmapReader<'a>);

impl<'a> SparsityMap<'a> for AlwaysSparse<'a> {
    const SPARSE: bool = true;

    fn open(bitmap: Option<&'a [u8]>) -> Self {
        debug_assert!(bitmap.is_some(), "always-sparse policy opened without a bitmap");
        AlwaysSparse(BitmapReader::new(bitmap.unwrap_or_default()))
    }

    #[inline(always)]
    fn next_is_zero(&mut self) -> bool {
        self.0.next_is_zero()
    }

    #[inline(always)]
    fn skip_to_next_bitmap(&mut self) {
        self.0.mask = 0;
    }
}

/// Tensors whose bitmap presence is only known at runtime.
#[derive(Debug, Clone)]
pub struct SometimesSparse<'a>(Option<BitmapReader<'a>>);

impl<'a> SparsityMap<'a> for SometimesSparse<'a> {
    const SPARSE: bool = true;

    fn open(bitmap: Option<&'a [u8]>) -> Self {
        SometimesSparse(bitmap.map(BitmapReader::new))
    }

    #[inline(always)]
    fn next_is_zero(&mut self) -> bool {
        match &mut self.0 {
            Some(reader) => reader.next_is_zero(),
            None => false,
        }
    }

    #[inline(always)]
    fn skip_to_next_bitmap(&mut self) {
        if let Some(reader) = &mut self.0 {
            reader.mask = 0;
        }
    }
}
