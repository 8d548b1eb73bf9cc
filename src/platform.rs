/*!
 * Platform Capability Queries
 *
 * Shared-texture encoding exists only where the graphics API can export
 * cross-subsystem texture handles. "Unsupported" is a normal configuration
 * outcome for callers, not an error.
 */

use std::sync::Arc;

use crate::graphics::GpuDevice;
use crate::pipeline::PipelineError;

/// Get platform name
pub fn get_platform_name() -> &'static str {
    #[cfg(target_os = "windows")]
    return "windows";

    #[cfg(target_os = "macos")]
    return "macos";

    #[cfg(target_os = "linux")]
    return "linux";

    #[cfg(not(any(target_os = "windows", target_os = "macos", target_os = "linux")))]
    return "unknown";
}

/// Whether this platform can export shared GPU textures for encoding.
///
/// Query this before building a pipeline; where it is `false`, GPU encoding
/// is simply not configured and the caller falls back to its CPU path.
pub fn shared_texture_support() -> bool {
    cfg!(windows)
}

/// Create the default graphics device for this platform.
///
/// Returns `PipelineError::Unsupported` where shared textures are
/// unavailable.
pub fn default_device() -> Result<Arc<dyn GpuDevice>, PipelineError> {
    #[cfg(windows)]
    {
        let device = crate::graphics::d3d11::D3d11Device::new().map_err(PipelineError::Graphics)?;
        Ok(Arc::new(device))
    }

    #[cfg(not(windows))]
    {
        Err(PipelineError::Unsupported)
    }
}
