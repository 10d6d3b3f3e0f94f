// Context and recorder configuration
//
// Both types double as `[context]` / `[recorder]` sections of the TOML config,
// which is why every field has a serde default.

use serde::Deserialize;

/// Options controlling Context creation and submission behavior.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ContextOptions {
    /// Reject recordings inserted out of snap order (per recorder).
    pub require_ordered_recordings: bool,
    /// In-flight submissions above which an asynchronous `submit` warns that
    /// the caller is not polling. Never blocks. Zero is rejected at context
    /// creation.
    pub max_in_flight_submissions: u32,
}

impl Default for ContextOptions {
    fn default() -> Self {
        Self {
            require_ordered_recordings: false,
            max_in_flight_submissions: 8,
        }
    }
}

impl ContextOptions {
    pub(crate) fn validate(&self) -> crate::Result<()> {
        if self.max_in_flight_submissions == 0 {
            return Err(crate::Error::invalid(
                "max_in_flight_submissions must be at least 1",
            ));
        }
        Ok(())
    }
}

/// Options controlling Recorder creation.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct RecorderOptions {
    /// Bytes of render targets this recorder may keep alive at once.
    pub gpu_budget_bytes: u64,
    /// Overrides `ContextOptions::require_ordered_recordings` for this recorder.
    pub require_ordered_recordings: Option<bool>,
}

pub const DEFAULT_GPU_BUDGET_BYTES: u64 = 256 * 1024 * 1024;

impl Default for RecorderOptions {
    fn default() -> Self {
        Self {
            gpu_budget_bytes: DEFAULT_GPU_BUDGET_BYTES,
            require_ordered_recordings: None,
        }
    }
}
