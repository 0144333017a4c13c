// Fatal startup diagnostics
//
// Everything here ends the process. The one recoverable condition, a stale
// presentation surface, is not an error at all: see `lifecycle::Acquire` and
// `lifecycle::Present`.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum InitError {
    #[error("No Vulkan-capable GPU found")]
    NoAdapters,

    #[error("No suitable GPU found ({checked} adapter(s) checked)")]
    NoSuitableAdapter { checked: usize },

    #[error("Failed to find suitable memory type")]
    NoMemoryType,

    #[error("Failed to find supported format among {candidates:?}")]
    NoSupportedFormat { candidates: Vec<ash::vk::Format> },

    #[error("Shader file not found: {path:?}")]
    ShaderMissing { path: PathBuf },

    #[error("Shader file is not valid SPIR-V: {path:?}")]
    ShaderInvalid { path: PathBuf },

    #[error("Unsupported layout transition {from:?} -> {to:?}")]
    UnsupportedTransition {
        from: ash::vk::ImageLayout,
        to: ash::vk::ImageLayout,
    },

    #[error("Cubemap face {face} is {actual:?}, expected {expected:?}")]
    CubemapFaceMismatch {
        face: usize,
        expected: (u32, u32),
        actual: (u32, u32),
    },
}
