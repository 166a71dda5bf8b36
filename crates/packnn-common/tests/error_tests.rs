//! Error taxonomy tests for packnn-common

use packnn_common::*;
use proptest::prelude::*;

#[test]
fn test_packnn_error_variants() {
    let config_error = PackNnError::Config("bad hint".to_string());
    assert_eq!(format!("{}", config_error), "Configuration error: bad hint");

    let validation_error = PackNnError::Validation("rank too high".to_string());
    assert_eq!(format!("{}", validation_error), "Validation error: rank too high");

    let packing_error: PackNnError =
        PackingError::Overflow { packed_bytes: 17, capacity: 16 }.into();
    assert!(matches!(packing_error, PackNnError::Packing(_)));
    assert_eq!(
        format!("{}", packing_error),
        "Packing error: Packing overflow: 17 packed bytes exceed the 16 bytes reserved"
    );

    let kernel_error: PackNnError =
        KernelError::UnsupportedType { type_name: "FLOAT32".to_string() }.into();
    assert!(matches!(kernel_error, PackNnError::Kernel(_)));
    assert_eq!(
        format!("{}", kernel_error),
        "Kernel error: Type FLOAT32 not supported by packed kernels"
    );
}

#[test]
fn test_packing_error_variants() {
    let width = PackingError::InvalidBitWidth { bits_per_item: 9, container_bits: 8 };
    assert_eq!(format!("{}", width), "Invalid bit width: 9 bits per item in 8-bit containers");

    let range = PackingError::ValueOutOfRange { index: 3, value: 8, bits_per_item: 4 };
    assert_eq!(format!("{}", range), "Value 8 at index 3 does not fit in 4 signed bits");

    let filters = PackingError::FilterCountMismatch { num_weights: 10, num_filters: 3 };
    assert_eq!(format!("{}", filters), "10 weights cannot be split into 3 equal filters");

    let runs = PackingError::RunLengthOverflow { filter: 1, stored: 70000 };
    assert_eq!(
        format!("{}", runs),
        "Run-length overflow: filter 1 has 70000 non-zero weights, over u16::MAX"
    );

    let format = PackingError::UnsupportedFormat { format: "GR_ENCODING".to_string() };
    assert!(format!("{}", format).contains("GR_ENCODING"));
}

#[test]
fn test_kernel_error_variants() {
    let scratch = KernelError::ScratchUnavailable { index: 2 };
    assert_eq!(format!("{}", scratch), "Scratch buffer 2 unavailable");

    let exhausted = KernelError::ScratchExhausted { requested: 64, available: 32 };
    assert_eq!(
        format!("{}", exhausted),
        "Scratch arena exhausted: requested 64 bytes, 32 available"
    );

    let failed = KernelError::ExecutionFailed { reason: "not prepared".to_string() };
    assert_eq!(format!("{}", failed), "Kernel execution failed: not prepared");
}

#[test]
fn test_config_error_converts_to_config_variant() {
    let err = KernelConfigError::Validation("cap too large".to_string());
    let top: PackNnError = err.into();
    assert!(matches!(top, PackNnError::Config(ref s) if s.contains("cap too large")));
}

proptest! {
    #[test]
    fn prop_shape_reason_is_preserved(reason in "[a-z ]{1,40}") {
        let err: PackNnError = KernelError::ShapeMismatch { reason: reason.clone() }.into();
        prop_assert!(err.to_string().ends_with(&reason));
    }

    #[test]
    fn prop_overflow_reports_both_sizes(packed in 1usize..1 << 20, capacity in 0usize..1 << 20) {
        let msg = PackingError::Overflow { packed_bytes: packed, capacity }.to_string();
        let packed_str = packed.to_string();
        let capacity_str = capacity.to_string();
        prop_assert!(msg.contains(&packed_str));
        prop_assert!(msg.contains(&capacity_str));
    }
}
