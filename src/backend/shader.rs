// Shader module loading and management
//
// Vulkan uses SPIR-V bytecode for shaders. All bytecode is read and checked
// at startup, before any pipeline exists, and kept in memory so pipelines
// can be rebuilt on swapchain recreation without touching the disk again.

use anyhow::{Context, Result};
use ash::vk;
use std::io::Cursor;
use std::path::{Path, PathBuf};

use super::VulkanDevice;
use crate::error::InitError;

const SPIRV_MAGIC: u32 = 0x0723_0203;

/// Validated SPIR-V words for one shader stage
#[derive(Debug, Clone)]
pub struct SpirV {
    pub path: PathBuf,
    pub words: Vec<u32>,
}

impl SpirV {
    pub fn load(path: &Path) -> Result<Self, InitError> {
        let bytes = std::fs::read(path).map_err(|_| InitError::ShaderMissing {
            path: path.to_path_buf(),
        })?;

        let invalid = || InitError::ShaderInvalid {
            path: path.to_path_buf(),
        };
        // read_spv checks alignment and fixes endianness from the magic word
        let words = ash::util::read_spv(&mut Cursor::new(bytes)).map_err(|_| invalid())?;
        if words.first() != Some(&SPIRV_MAGIC) {
            return Err(invalid());
        }

        log::debug!("Loaded shader {:?} ({} words)", path, words.len());
        Ok(Self {
            path: path.to_path_buf(),
            words,
        })
    }
}

/// Every shader the renderer uses
#[derive(Debug, Clone)]
pub struct ShaderSet {
    pub scene_vert: SpirV,
    pub scene_frag: SpirV,
    pub skybox_vert: SpirV,
    pub skybox_frag: SpirV,
}

impl ShaderSet {
    pub const FILES: [&'static str; 4] = ["vert.spv", "frag.spv", "skyVert.spv", "skyFrag.spv"];

    /// Load all four stages from `dir`. Fails on the first missing or
    /// malformed file.
    pub fn load(dir: &Path) -> Result<Self, InitError> {
        let [scene_vert, scene_frag, skybox_vert, skybox_frag] =
            Self::FILES.map(|file| dir.join(file));

        Ok(Self {
            scene_vert: SpirV::load(&scene_vert)?,
            scene_frag: SpirV::load(&scene_frag)?,
            skybox_vert: SpirV::load(&skybox_vert)?,
            skybox_frag: SpirV::load(&skybox_frag)?,
        })
    }
}

/// Create a shader module from validated bytecode
pub fn create_shader_module(device: &VulkanDevice, code: &SpirV) -> Result<vk::ShaderModule> {
    let create_info = vk::ShaderModuleCreateInfo::builder().code(&code.words);

    unsafe { device.device.create_shader_module(&create_info, None) }
        .with_context(|| format!("Failed to create shader module from {:?}", code.path))
}
