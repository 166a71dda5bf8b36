//! Compile-time specialisation of the streaming decoder
//!
//! Prepare resolves a [`WidthPath`] from the packing descriptor. Eval turns
//! it back into concrete container, item-width and sparsity types with a
//! single `match`, then runs a kernel monomorphised for that combination.

use packnn_quantization::{
    AlwaysSparse, Container, Dynamic, Fixed, ItemWidth, NeverSparse, PackingFormat, SparsityMap,
};

/// Sparsity policy as a type, so visitors can name the map for any borrow.
pub(crate) trait Sparsity {
    type Map<'a>: SparsityMap<'a>;
}

pub(crate) struct Sparse;

impl Sparsity for Sparse {
    type Map<'a> = AlwaysSparse<'a>;
}

pub(crate) struct Dense;

impl Sparsity for Dense {
    type Map<'a> = NeverSparse;
}

/// Kernel body run once the decoder types are known.
pub(crate) trait PackedVisitor {
    type Output;

    fn visit<C: Container, W: ItemWidth, Z: Sparsity>(self) -> Self::Output;
}

/// Decoder specialisation selected at Prepare.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WidthPath {
    /// 4-bit items in 8-bit containers
    U8x4,
    /// 5-bit items in 16-bit containers
    U16x5,
    /// 6-bit items in 32-bit containers
    U32x6,
    /// 8-bit items in 8-bit containers
    U8x8,
    /// Any other width; the item width is carried at runtime.
    Generic { container_bits: u32, bits_per_item: u32 },
}

impl WidthPath {
    pub fn select(format: &PackingFormat) -> Self {
        match (format.container_bits, format.bits_per_item) {
            (8, 4) => Self::U8x4,
            (16, 5) => Self::U16x5,
            (32, 6) => Self::U32x6,
            (8, 8) => Self::U8x8,
            (container_bits, bits_per_item) => Self::Generic { container_bits, bits_per_item },
        }
    }

    pub fn is_specialized(&self) -> bool {
        !matches!(self, Self::Generic { .. })
    }

    pub(crate) fn dispatch<V: PackedVisitor>(self, sparse: bool, visitor: V) -> V::Output {
        if sparse {
            self.with_width::<Sparse, V>(visitor)
        } else {
            self.with_width::<Dense, V>(visitor)
        }
    }

    fn with_width<Z: Sparsity, V: PackedVisitor>(self, visitor: V) -> V::Output {
        match self {
            Self::U8x4 => visitor.visit::<u8, Fixed<4>, Z>(),
            Self::U16x5 => visitor.visit::<u16, Fixed<5>, Z>(),
            Self::U32x6 => visitor.visit::<u32, Fixed<6>, Z>(),
            Self::U8x8 => visitor.visit::<u8, Fixed<8>, Z>(),
            Self::Generic { container_bits: 8, .. } => visitor.visit::<u8, Dynamic, Z>(),
            Self::Generic { container_bits: 16, .. } => visitor.visit::<u16, Dynamic, Z>(),
            Self::Generic { .. } => visitor.visit::<u32, Dynamic, Z>(),
        }
    }
}

impl std::fmt::Display for WidthPath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::U8x4 => write!(f, "4-bit/u8"),
            Self::U16x5 => write!(f, "5-bit/u16"),
            Self::U32x6 => write!(f, "6-bit/u32"),
            Self::U8x8 => write!(f, "8-bit/u8"),
            Self::Generic { container_bits, bits_per_item } => {
                write!(f, "{bits_per_item}-bit/u{container_bits} (generic)")
            }
        }
    }
}
