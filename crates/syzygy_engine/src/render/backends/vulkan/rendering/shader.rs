//! Shader binaries, reflection and modules
//!
//! A [`ShaderLibrary`] turns a shader name into a [`ShaderBinary`]: SPIR-V words plus the
//! reflected push-constant block. [`ShaderModule`] owns the device object created from it.

use ash::vk;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use super::reflection::ReflectedType;
use crate::render::backends::vulkan::device::GpuDevice;
use crate::render::backends::vulkan::error::{VulkanError, VulkanResult};

const SPIRV_MAGIC: u32 = 0x0723_0203;

/// SPIR-V code with its reflected push-constant layout
#[derive(Debug, Clone)]
pub struct ShaderBinary {
    name: String,
    words: Vec<u32>,
    push_constant: Option<ReflectedType>,
}

impl ShaderBinary {
    /// Assemble a binary from already reflected parts
    pub fn new(name: impl Into<String>, words: Vec<u32>, push_constant: Option<ReflectedType>) -> Self {
        Self {
            name: name.into(),
            words,
            push_constant,
        }
    }

    /// Parse and reflect SPIR-V bytes
    pub fn from_bytes(name: impl Into<String>, bytes: &[u8]) -> VulkanResult<Self> {
        let name = name.into();
        if bytes.len() % 4 != 0 || bytes.len() < 20 {
            return Err(VulkanError::ShaderReflection(format!(
                "{name}: {} bytes is not a SPIR-V module",
                bytes.len()
            )));
        }
        let words: Vec<u32> = bytes
            .chunks_exact(4)
            .map(|chunk| u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
            .collect();
        if words[0] != SPIRV_MAGIC {
            return Err(VulkanError::ShaderReflection(format!(
                "{name}: bad SPIR-V magic {:#010x}",
                words[0]
            )));
        }

        let push_constant = reflect_push_constant(&name, &words)?;
        log::debug!(
            "Loaded shader {name}: {} words, push constants {} bytes",
            words.len(),
            push_constant.as_ref().map_or(0, ReflectedType::size)
        );
        Ok(Self {
            name,
            words,
            push_constant,
        })
    }

    /// Name the binary was loaded under
    pub fn name(&self) -> &str {
        &self.name
    }

    /// SPIR-V words
    pub fn words(&self) -> &[u32] {
        &self.words
    }

    /// Reflected push-constant block, if the shader declares one
    pub fn push_constant(&self) -> Option<&ReflectedType> {
        self.push_constant.as_ref()
    }

    /// Size of the push-constant block in bytes, 0 if none
    pub fn push_constant_size(&self) -> u32 {
        self.push_constant.as_ref().map_or(0, ReflectedType::size)
    }
}

fn reflect_push_constant(name: &str, words: &[u32]) -> VulkanResult<Option<ReflectedType>> {
    let entry_points = spirq::ReflectConfig::new()
        .spv(words)
        .ref_all_rscs(true)
        .reflect()
        .map_err(|e| VulkanError::ShaderReflection(format!("{name}: {e:?}")))?;

    let block = entry_points
        .iter()
        .flat_map(|entry_point| entry_point.vars.iter())
        .find_map(|var| match var {
            spirq::var::Variable::PushConstant { ty, .. } => Some(ReflectedType::from_spirq(ty)),
            _ => None,
        });
    Ok(block)
}

/// Source of shader binaries by name
pub trait ShaderLibrary {
    /// Load and reflect the shader called `name`
    fn load(&self, name: &str) -> VulkanResult<ShaderBinary>;
}

/// Reads `<dir>/<name>.spv`
#[derive(Debug, Clone)]
pub struct FileShaderLibrary {
    dir: PathBuf,
}

impl FileShaderLibrary {
    /// Library rooted at `dir`
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
        }
    }

    /// Path a shader name resolves to
    pub fn path_of(&self, name: &str) -> PathBuf {
        self.dir.join(format!("{name}.spv"))
    }
}

impl ShaderLibrary for FileShaderLibrary {
    fn load(&self, name: &str) -> VulkanResult<ShaderBinary> {
        let path = self.path_of(name);
        let bytes = std::fs::read(&path).map_err(|source| VulkanError::Io { path, source })?;
        ShaderBinary::from_bytes(name, &bytes)
    }
}

/// Shader module with automatic cleanup
pub struct ShaderModule {
    device: Arc<dyn GpuDevice>,
    module: vk::ShaderModule,
}

impl ShaderModule {
    /// Create a module from a loaded binary
    pub fn new(device: &Arc<dyn GpuDevice>, binary: &ShaderBinary) -> VulkanResult<Self> {
        let module = device.create_shader_module(binary.words())?;
        Ok(Self {
            device: Arc::clone(device),
            module,
        })
    }

    /// Module handle
    pub fn handle(&self) -> vk::ShaderModule {
        self.module
    }
}

impl Drop for ShaderModule {
    fn drop(&mut self) {
        self.device.destroy_shader_module(self.module);
    }
}
