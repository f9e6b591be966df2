use thiserror::Error;
use vulkan::ash::vk;

/// Renderer-level failure classification. Swapchain staleness is the only
/// kind the frame loop recovers from; everything else propagates.
#[derive(Debug, Error)]
pub enum RenderError {
    #[error("swapchain is out of date and must be recreated")]
    SwapchainOutOfDate,

    #[error("device lost")]
    DeviceLost,

    #[error("surface lost")]
    SurfaceLost,

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl RenderError {
    pub fn from_vk(result: vk::Result) -> Self {
        match result {
            vk::Result::ERROR_OUT_OF_DATE_KHR => Self::SwapchainOutOfDate,
            vk::Result::ERROR_DEVICE_LOST => Self::DeviceLost,
            vk::Result::ERROR_SURFACE_LOST_KHR => Self::SurfaceLost,
            other => Self::Other(anyhow::anyhow!("vulkan error: {other:?}")),
        }
    }

    /// Classifies an `anyhow` error that may wrap a raw `vk::Result`.
    pub fn classify(err: anyhow::Error) -> Self {
        match err.downcast_ref::<vk::Result>() {
            Some(&result) => Self::from_vk(result),
            None => Self::Other(err),
        }
    }

    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::SwapchainOutOfDate)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn out_of_date_is_recoverable() {
        assert!(RenderError::from_vk(vk::Result::ERROR_OUT_OF_DATE_KHR).is_recoverable());
        assert!(!RenderError::from_vk(vk::Result::ERROR_DEVICE_LOST).is_recoverable());
    }

    #[test]
    fn classify_unwraps_vk_results() {
        let err = anyhow::Error::new(vk::Result::ERROR_OUT_OF_DATE_KHR);
        assert!(RenderError::classify(err).is_recoverable());
    }
}
