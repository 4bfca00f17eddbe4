//! SPIR-V shader module loading (spec §6 "Shader binary format").

use std::sync::Arc;

use anyhow::Result;
use ash::vk;

use super::DeviceShared;

/// Which pipeline stage a shader module is bound to. Only the two stages the render pipelines
/// (spec §4.B) actually use are modeled; geometry/tessellation/compute are out of scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShaderStage {
    Vertex,
    Fragment,
}

impl ShaderStage {
    pub(crate) fn to_vulkan_shader_stage_flag(self) -> vk::ShaderStageFlags {
        match self {
            ShaderStage::Vertex => vk::ShaderStageFlags::VERTEX,
            ShaderStage::Fragment => vk::ShaderStageFlags::FRAGMENT,
        }
    }
}

pub struct ShaderModuleDescriptor<'a> {
    pub stage: ShaderStage,
    /// Raw SPIR-V bytes, little-endian, length a multiple of 4 (spec §6).
    pub spirv: &'a [u8],
}

impl<'a> ShaderModuleDescriptor<'a> {
    pub fn new(stage: ShaderStage, spirv: &'a [u8]) -> Self {
        Self { stage, spirv }
    }
}

pub struct ShaderModule {
    pub(crate) raw: vk::ShaderModule,
    pub(crate) stage: ShaderStage,
    device: Arc<DeviceShared>,
}

impl ShaderModule {
    pub(crate) fn new(device: Arc<DeviceShared>, desc: ShaderModuleDescriptor) -> Result<Self> {
        let code = ash::util::read_spv(&mut std::io::Cursor::new(desc.spirv))?;
        let create_info = vk::ShaderModuleCreateInfo::default().code(&code);
        let raw = unsafe { device.raw.create_shader_module(&create_info, None)? };

        Ok(Self {
            raw,
            stage: desc.stage,
            device,
        })
    }

    pub fn stage(&self) -> ShaderStage {
        self.stage
    }
}

impl Drop for ShaderModule {
    fn drop(&mut self) {
        unsafe { self.device.raw.destroy_shader_module(self.raw, None) };
    }
}
