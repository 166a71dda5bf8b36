//! Status codes returned to the graph runtime

use packnn_common::Result;

/// Outcome of an operator entry point. `Error` aborts the inference.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KernelStatus {
    Ok,
    Error,
}

impl KernelStatus {
    /// Collapse `result` to a status, logging the diagnostic on failure.
    pub fn from_result<T>(op_name: &str, result: Result<T>) -> Self {
        match result {
            Ok(_) => KernelStatus::Ok,
            Err(e) => {
                tracing::error!(op = op_name, error = %e, "packed kernel failed");
                KernelStatus::Error
            }
        }
    }

    pub fn is_ok(&self) -> bool {
        matches!(self, KernelStatus::Ok)
    }
}
