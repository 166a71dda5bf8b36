//! Weight-path selection shared by the packed operators
//!
//! Prepare decides, once per operator, how Eval will obtain its weights:
//! straight from an int8 tensor, decoded on the fly, or unpacked into a
//! scratch region at the start of every Eval. Everything that can fail is
//! checked here so the Eval paths have nothing left to validate.

use std::borrow::Cow;

use packnn_common::{
    warn_once_fn, KernelConfig, KernelError, PackNnError, Result, TensorType, TensorView,
    UnpackingHint,
};
use packnn_quantization::{unpack_tensor, OneFilterPerKernel, PackedLayout, PackingFormat};

use super::dispatch::WidthPath;
use crate::context::{KernelContext, ScratchIndex};

/// Eval strategy an operator settled on during Prepare.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EvalVariant {
    /// Plain int8 weights, no packing descriptor.
    DenseInt8,
    /// Weights decoded inside the accumulation loop (minimum memory).
    PackedStreaming,
    /// Whole tensor unpacked into scratch, then the dense kernel (maximum speed).
    PackedUnpacked,
    /// Conv weights stored one filter per kernel, unpacked into scratch.
    OneFilterPerKernel,
}

impl EvalVariant {
    pub fn name(&self) -> &'static str {
        match self {
            Self::DenseInt8 => "dense_int8",
            Self::PackedStreaming => "packed_streaming",
            Self::PackedUnpacked => "packed_unpacked",
            Self::OneFilterPerKernel => "one_filter_per_kernel",
        }
    }
}

impl std::fmt::Display for EvalVariant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, Copy)]
pub(crate) enum WeightPath {
    Dense,
    Streaming { layout: PackedLayout, width: WidthPath },
    /// Weights land in `scratch` after `offset` bytes owned by the operator.
    Unpacked { layout: PackedLayout, scratch: ScratchIndex, offset: usize },
    OneFilterPerKernel { ofpk: OneFilterPerKernel, scratch: ScratchIndex, offset: usize },
}

impl WeightPath {
    pub(crate) fn variant(&self) -> EvalVariant {
        match self {
            Self::Dense => EvalVariant::DenseInt8,
            Self::Streaming { .. } => EvalVariant::PackedStreaming,
            Self::Unpacked { .. } => EvalVariant::PackedUnpacked,
            Self::OneFilterPerKernel { .. } => EvalVariant::OneFilterPerKernel,
        }
    }

    pub(crate) fn format(&self) -> Option<&PackingFormat> {
        match self {
            Self::Dense => None,
            Self::Streaming { layout, .. } | Self::Unpacked { layout, .. } => Some(&layout.format),
            Self::OneFilterPerKernel { ofpk, .. } => Some(&ofpk.layout().format),
        }
    }

    /// Scratch region holding the operator's own prefix, when one was reserved.
    pub(crate) fn scratch(&self) -> Option<ScratchIndex> {
        match self {
            Self::Unpacked { scratch, .. } | Self::OneFilterPerKernel { scratch, .. } => {
                Some(*scratch)
            }
            _ => None,
        }
    }
}

/// What an operator asks of [`plan_weights`].
pub(crate) struct WeightRequest<'r, 't> {
    pub op: &'static str,
    pub filter: &'r TensorView<'t>,
    pub packing: Option<&'r PackingFormat>,
    /// Packing runs: output channels for FC and conv, taps for depthwise.
    pub num_filters: usize,
    /// Scratch bytes the operator needs ahead of any unpacked weights.
    pub scratch_prefix: usize,
}

pub(crate) fn plan_weights(
    ctx: &mut dyn KernelContext,
    config: &KernelConfig,
    req: &WeightRequest<'_, '_>,
) -> Result<WeightPath> {
    let num_weights = req.filter.shape.flat_size();
    expect_int8_filter(req.filter)?;

    let Some(format) = req.packing else {
        if req.filter.data.len() != num_weights {
            return Err(shape_error(format!(
                "{}: filter holds {} bytes for {num_weights} weights",
                req.op,
                req.filter.data.len()
            )));
        }
        return Ok(WeightPath::Dense);
    };

    let layout = PackedLayout::new(num_weights, req.num_filters, format)?;
    layout.check_buffer(req.filter.data)?;

    let width = WidthPath::select(format);
    if !width.is_specialized() {
        if !config.allow_generic_widths {
            return Err(KernelError::UnsupportedType {
                type_name: format!("{width} packed weights"),
            }
            .into());
        }
        packnn_common::warn_once!(
            &format!("{}:generic_width:{width}", req.op),
            "{}: no specialised decoder for {width}, using the generic path",
            req.op
        );
    }

    if config.resolve_hint(format.unpacking_hint) == UnpackingHint::MaxSpeed {
        if let Some((scratch, offset)) = reserve_unpack_scratch(ctx, config, req, num_weights) {
            return Ok(WeightPath::Unpacked { layout, scratch, offset });
        }
    }
    Ok(WeightPath::Streaming { layout, width })
}

/// Conv weights stored one filter per kernel. There is no streaming
/// fallback for this layout, so a refused scratch request fails Prepare.
pub(crate) fn plan_one_filter_per_kernel(
    ctx: &mut dyn KernelContext,
    config: &KernelConfig,
    req: &WeightRequest<'_, '_>,
    sparse: bool,
) -> Result<WeightPath> {
    let num_weights = req.filter.shape.flat_size();
    expect_int8_filter(req.filter)?;
    let ofpk = OneFilterPerKernel::new(num_weights, req.num_filters, sparse)?;
    ofpk.layout().check_buffer(req.filter.data)?;

    let bytes = req.scratch_prefix + num_weights;
    if !config.scratch_allowed(bytes) {
        return Err(KernelError::ScratchExhausted {
            requested: bytes,
            available: config.max_scratch_bytes as usize,
        }
        .into());
    }
    let scratch = ctx.request_scratch_buffer(bytes)?;
    Ok(WeightPath::OneFilterPerKernel { ofpk, scratch, offset: req.scratch_prefix })
}

fn reserve_unpack_scratch(
    ctx: &mut dyn KernelContext,
    config: &KernelConfig,
    req: &WeightRequest<'_, '_>,
    num_weights: usize,
) -> Option<(ScratchIndex, usize)> {
    let bytes = req.scratch_prefix + num_weights;
    if !config.scratch_allowed(bytes) {
        warn_once_fn(
            &format!("{}:scratch_cap", req.op),
            &format!(
                "{}: unpacking needs {bytes} scratch bytes, over the {} byte cap; \
                 decoding on the fly",
                req.op, config.max_scratch_bytes
            ),
        );
        return None;
    }
    match ctx.request_scratch_buffer(bytes) {
        Ok(scratch) => Some((scratch, req.scratch_prefix)),
        Err(err) => {
            warn_once_fn(
                &format!("{}:scratch_refused", req.op),
                &format!("{}: scratch request refused ({err}); decoding on the fly", req.op),
            );
            None
        }
    }
}

/// Plain int8 weights for Prepare-time folding. Borrowed when the tensor is
/// already dense, decoded into a temporary otherwise.
pub(crate) fn plain_weights<'t>(
    filter: &TensorView<'t>,
    path: &WeightPath,
) -> Result<Cow<'t, [i8]>> {
    match path {
        WeightPath::Dense => Ok(Cow::Borrowed(filter.as_i8()?)),
        WeightPath::Streaming { layout, .. } | WeightPath::Unpacked { layout, .. } => {
            let mut out = vec![0i8; layout.num_weights];
            unpack_tensor(filter.data, layout, &mut out)?;
            Ok(Cow::Owned(out))
        }
        WeightPath::OneFilterPerKernel { ofpk, .. } => {
            let mut out = vec![0i8; ofpk.layout().num_weights];
            ofpk.unpack(filter.data, &mut out)?;
            Ok(Cow::Owned(out))
        }
    }
}

/// Unpack the weights into their scratch region. Returns the operator's
/// prefix bytes and the unpacked weights.
pub(crate) fn unpack_into_scratch<'c>(
    ctx: &'c mut dyn KernelContext,
    packed: &[u8],
    path: &WeightPath,
) -> Result<(&'c mut [u8], &'c [i8])> {
    match path {
        WeightPath::Unpacked { layout, scratch, offset } => {
            let (prefix, weights) =
                split_region(ctx.scratch_buffer(*scratch)?, *offset, layout.num_weights)?;
            unpack_tensor(packed, layout, weights)?;
            Ok((prefix, weights))
        }
        WeightPath::OneFilterPerKernel { ofpk, scratch, offset } => {
            let (prefix, weights) =
                split_region(ctx.scratch_buffer(*scratch)?, *offset, ofpk.layout().num_weights)?;
            ofpk.unpack(packed, weights)?;
            Ok((prefix, weights))
        }
        WeightPath::Dense | WeightPath::Streaming { .. } => Err(KernelError::ExecutionFailed {
            reason: format!("{} weights have no scratch region", path.variant()),
        }
        .into()),
    }
}

fn split_region(
    region: &mut [u8],
    offset: usize,
    num_weights: usize,
) -> Result<(&mut [u8], &mut [i8])> {
    if region.len() < offset + num_weights {
        return Err(KernelError::ExecutionFailed {
            reason: format!(
                "scratch region of {} bytes cannot hold {offset} + {num_weights} bytes",
                region.len()
            ),
        }
        .into());
    }
    let (prefix, rest) = region.split_at_mut(offset);
    Ok((prefix, bytemuck::cast_slice_mut(&mut rest[..num_weights])))
}

fn expect_int8_filter(filter: &TensorView<'_>) -> Result<()> {
    if filter.dtype != TensorType::Int8 {
        return Err(KernelError::UnsupportedType {
            type_name: format!("{} filter", filter.dtype.name()),
        }
        .into());
    }
    Ok(())
}

pub(crate) fn shape_error(reason: String) -> PackNnError {
    KernelError::ShapeMismatch { reason }.into()
}
