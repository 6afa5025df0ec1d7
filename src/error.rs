// Errors - failure conditions of the frame core
//
// Out-of-date and suboptimal swapchains are not errors: they come back as
// `AcquireOutcome` / `PresentOutcome` variants.

use ash::vk;
use thiserror::Error;

/// Errors raised by the frame-lifecycle core.
#[derive(Error, Debug)]
pub enum RenderError {
    /// A Vulkan call failed with an unexpected result.
    #[error("Vulkan error: {0}")]
    Vulkan(vk::Result),

    /// The logical device was lost; nothing but teardown is possible.
    #[error("GPU device lost")]
    DeviceLost,

    /// A fence wait with a finite timeout expired.
    #[error("timed out after {timeout_ns}ns waiting for a fence")]
    FenceTimeout { timeout_ns: u64 },

    /// A descriptor set could not be allocated even from a fresh pool.
    #[error("descriptor allocation failed twice, fresh pool held {capacity} sets")]
    DescriptorExhausted { capacity: u32 },

    /// GPU memory allocator failure.
    #[error("allocation error: {0}")]
    Allocation(String),

    /// A frame slot or subsystem was driven out of order.
    #[error("invalid state: {0}")]
    InvalidState(String),
}

impl RenderError {
    /// True for conditions after which the device can only be torn down.
    pub fn is_device_lost(&self) -> bool {
        matches!(self, Self::DeviceLost)
    }
}

impl From<vk::Result> for RenderError {
    fn from(result: vk::Result) -> Self {
        match result {
            vk::Result::ERROR_DEVICE_LOST => Self::DeviceLost,
            other => Self::Vulkan(other),
        }
    }
}

impl From<gpu_allocator::AllocationError> for RenderError {
    fn from(err: gpu_allocator::AllocationError) -> Self {
        Self::Allocation(err.to_string())
    }
}

/// Result type alias for core operations.
pub type RenderResult<T> = std::result::Result<T, RenderError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn device_lost_result_maps_to_dedicated_variant() {
        let err: RenderError = vk::Result::ERROR_DEVICE_LOST.into();
        assert!(err.is_device_lost());

        let err: RenderError = vk::Result::ERROR_OUT_OF_HOST_MEMORY.into();
        assert!(matches!(err, RenderError::Vulkan(vk::Result::ERROR_OUT_OF_HOST_MEMORY)));
        assert!(!err.is_device_lost());
    }

    #[test]
    fn display_mentions_capacity() {
        let err = RenderError::DescriptorExhausted { capacity: 1500 };
        assert!(err.to_string().contains("1500"));
    }
}
