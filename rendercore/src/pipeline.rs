//! Pipeline catalog (spec §4.B). Builds/caches graphics pipelines keyed by
//! `(dimension, pipeline-mode)`; the stencil/blend/depth table is fixed and exactly matches the
//! table in spec §4.B.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use bitflags::bitflags;

use crate::dim::Dimension;
use crate::vulkan::{
    device::Device,
    resource::{DescriptorSetLayout, Pipeline, PipelineDescriptor},
    shader::{ShaderModuleDescriptor, ShaderStage},
    types::{PipelineDepthStencilState, PipelineRasterizationState},
    vk,
};

/// One of the four fixed pipeline-state combinations spec §4.B's stencil table names. Order
/// matters: it is also the fixed render-pass order spec §4.E requires.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PipelineMode {
    NoStencilWriteDoFill,
    DoStencilWriteDoFill,
    DoStencilWriteNoFill,
    DoStencilTestNoFill,
}

impl PipelineMode {
    /// The fixed render order spec §4.E prescribes.
    pub const RENDER_ORDER: [PipelineMode; 4] = [
        PipelineMode::NoStencilWriteDoFill,
        PipelineMode::DoStencilWriteDoFill,
        PipelineMode::DoStencilWriteNoFill,
        PipelineMode::DoStencilTestNoFill,
    ];

    /// Whether this pass uses the fill-instance layout (true) or the outline-instance layout
    /// (false) — only [`PipelineMode::DoStencilTestNoFill`] draws outline-scaled geometry.
    pub fn uses_fill_instance(self) -> bool {
        !matches!(self, PipelineMode::DoStencilTestNoFill)
    }

    fn stencil_state(self) -> (vk::StencilOp, vk::StencilOp, vk::StencilOp, vk::CompareOp, u32, u32) {
        match self {
            PipelineMode::NoStencilWriteDoFill => (
                vk::StencilOp::KEEP,
                vk::StencilOp::KEEP,
                vk::StencilOp::KEEP,
                vk::CompareOp::ALWAYS,
                0,
                0,
            ),
            PipelineMode::DoStencilWriteDoFill | PipelineMode::DoStencilWriteNoFill => (
                vk::StencilOp::REPLACE,
                vk::StencilOp::REPLACE,
                vk::StencilOp::REPLACE,
                vk::CompareOp::ALWAYS,
                0xFF,
                1,
            ),
            PipelineMode::DoStencilTestNoFill => (
                vk::StencilOp::KEEP,
                vk::StencilOp::REPLACE,
                vk::StencilOp::KEEP,
                vk::CompareOp::NOT_EQUAL,
                0,
                1,
            ),
        }
    }

    fn stencil_test_enabled(self) -> bool {
        !matches!(self, PipelineMode::NoStencilWriteDoFill)
    }

    fn color_write_mask(self) -> vk::ColorComponentFlags {
        match self {
            PipelineMode::DoStencilWriteNoFill => vk::ColorComponentFlags::empty(),
            _ => vk::ColorComponentFlags::RGBA,
        }
    }
}

bitflags! {
    /// Per-draw selection of which pipeline-mode passes to emit (spec §4.G step 2): computed
    /// from `Flags{Fill, Outline}` and `OutlineWidth`.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct PipelineModeMask: u8 {
        const NO_STENCIL_WRITE_DO_FILL = 0b0001;
        const DO_STENCIL_WRITE_DO_FILL = 0b0010;
        const DO_STENCIL_WRITE_NO_FILL = 0b0100;
        const DO_STENCIL_TEST_NO_FILL  = 0b1000;
    }
}

impl PipelineModeMask {
    pub fn contains_mode(self, mode: PipelineMode) -> bool {
        self.contains(Self::from_mode(mode))
    }

    pub fn from_mode(mode: PipelineMode) -> Self {
        match mode {
            PipelineMode::NoStencilWriteDoFill => Self::NO_STENCIL_WRITE_DO_FILL,
            PipelineMode::DoStencilWriteDoFill => Self::DO_STENCIL_WRITE_DO_FILL,
            PipelineMode::DoStencilWriteNoFill => Self::DO_STENCIL_WRITE_NO_FILL,
            PipelineMode::DoStencilTestNoFill => Self::DO_STENCIL_TEST_NO_FILL,
        }
    }
}

/// Per-pass camera/material push constants (spec §6 "push-constant range sized for the per-pass
/// camera data"). Shared by the unlit (2D) and lit (3D) pipeline layouts; 3D-only fields are
/// zeroed in 2D.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct CameraPushConstants {
    pub projection_view: [[f32; 4]; 4],
    pub view_position: [f32; 4],
    pub ambient_color: [f32; 4],
    pub directional_light_count: u32,
    pub point_light_count: u32,
    pub _pad: [u32; 2],
}

fn build_shader_modules(
    device: &Arc<Device>,
    vertex_spirv: &[u8],
    fragment_spirv: &[u8],
) -> Result<Vec<crate::vulkan::shader::ShaderModule>> {
    Ok(vec![
        device.create_shader_module(ShaderModuleDescriptor::new(ShaderStage::Vertex, vertex_spirv))?,
        device.create_shader_module(ShaderModuleDescriptor::new(
            ShaderStage::Fragment,
            fragment_spirv,
        ))?,
    ])
}

/// SPIR-V bytes for one pipeline's vertex+fragment stages; an external collaborator (spec §1
/// "shader compilation and file loading" out of scope) supplies these, keyed by dimension.
pub struct ShaderSet {
    pub vertex_2d: &'static [u8],
    pub fragment_2d: &'static [u8],
    pub vertex_3d: &'static [u8],
    pub fragment_3d: &'static [u8],
}

/// Which storage-buffer binding scheme a pipeline's set 0 uses (spec §4.C "Polygon variant
/// only" adds the dynamic vertex/index storage buffers the fixed-catalog draws don't need).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum GeometrySource {
    /// Bound vertex/index buffer from [`crate::catalog::PrimitiveCatalog`]; set 0 is the
    /// single-binding instance layout.
    FixedCatalog,
    /// Non-indexed vertex-pulling draw from [`crate::polygon::PolygonBatch`]'s shared pool; set
    /// 0 is the three-binding polygon layout and there is no vertex input state at all.
    Polygon,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct PipelineKey {
    mode: PipelineMode,
    is_3d: bool,
    source: GeometrySource,
}

/// Creates/caches graphics pipelines keyed by `(dimension, pipeline-mode, geometry source)`
/// (spec §4.B). Built lazily on first request and reused for the engine's lifetime. Set 1 (3D
/// fill passes only) binds the light manager's two-binding layout (spec §4.D); the outline pass
/// is unlit and gets no light descriptor set.
pub struct PipelineCatalog {
    device: Arc<Device>,
    shaders: ShaderSet,
    /// Format of [`crate::vulkan::swapchain::IntermediateColorImage`], the actual render target
    /// every scene pipeline built here writes into (spec §4.F: the scene renders to an
    /// intermediate image, not the swap chain image directly). Supplied at construction rather
    /// than hardcoded, since the negotiated surface format isn't known until the swap chain is
    /// created (spec §6 "surface/swapchain format ... requirements").
    color_attachment_format: vk::Format,
    pipelines: HashMap<PipelineKey, Arc<Pipeline>>,
}

impl PipelineCatalog {
    pub fn new(device: Arc<Device>, shaders: ShaderSet, color_attachment_format: vk::Format) -> Self {
        Self {
            device,
            shaders,
            color_attachment_format,
            pipelines: HashMap::new(),
        }
    }

    pub fn get_2d(&mut self, mode: PipelineMode) -> Result<Arc<Pipeline>> {
        self.get(mode, false, GeometrySource::FixedCatalog)
    }

    pub fn get_3d(&mut self, mode: PipelineMode) -> Result<Arc<Pipeline>> {
        self.get(mode, true, GeometrySource::FixedCatalog)
    }

    pub fn get_2d_polygon(&mut self, mode: PipelineMode) -> Result<Arc<Pipeline>> {
        self.get(mode, false, GeometrySource::Polygon)
    }

    pub fn get_3d_polygon(&mut self, mode: PipelineMode) -> Result<Arc<Pipeline>> {
        self.get(mode, true, GeometrySource::Polygon)
    }

    fn get(&mut self, mode: PipelineMode, is_3d: bool, source: GeometrySource) -> Result<Arc<Pipeline>> {
        let key = PipelineKey { mode, is_3d, source };
        if let Some(pipeline) = self.pipelines.get(&key) {
            return Ok(pipeline.clone());
        }
        let pipeline = Arc::new(self.build_pipeline(mode, is_3d, source)?);
        self.pipelines.insert(key, pipeline.clone());
        Ok(pipeline)
    }

    fn build_pipeline(&self, mode: PipelineMode, is_3d: bool, source: GeometrySource) -> Result<Pipeline> {
        let (vertex_spirv, fragment_spirv) = if is_3d {
            (self.shaders.vertex_3d, self.shaders.fragment_3d)
        } else {
            (self.shaders.vertex_2d, self.shaders.fragment_2d)
        };
        let shader_modules = build_shader_modules(&self.device, vertex_spirv, fragment_spirv)?;

        // Dynamic viewport/scissor (spec §4.B): the create-time extent here is a placeholder,
        // overwritten every frame by `CommandBuffer::set_viewport`/`set_scissor`.
        let extent = vk::Extent2D {
            width: 1,
            height: 1,
        };

        // Blend enabled for fills, disabled for outline passes and when D=3 (spec §4.B).
        let blend_enabled = !is_3d
            && matches!(
                mode,
                PipelineMode::NoStencilWriteDoFill | PipelineMode::DoStencilWriteDoFill
            );
        let color_blend_attachment = vk::PipelineColorBlendAttachmentState::default()
            .blend_enable(blend_enabled)
            .src_color_blend_factor(vk::BlendFactor::SRC_ALPHA)
            .dst_color_blend_factor(vk::BlendFactor::ONE_MINUS_SRC_ALPHA)
            .color_blend_op(vk::BlendOp::ADD)
            .src_alpha_blend_factor(vk::BlendFactor::ONE)
            .dst_alpha_blend_factor(vk::BlendFactor::ONE_MINUS_SRC_ALPHA)
            .alpha_blend_op(vk::BlendOp::ADD)
            .color_write_mask(mode.color_write_mask());

        let depth_enabled = is_3d && mode != PipelineMode::DoStencilTestNoFill;
        let (stencil_fail, stencil_pass, stencil_depth_fail, stencil_compare, write_mask, reference) =
            mode.stencil_state();
        let stencil_op_state = vk::StencilOpState::default()
            .fail_op(stencil_fail)
            .pass_op(stencil_pass)
            .depth_fail_op(stencil_depth_fail)
            .compare_op(stencil_compare)
            .compare_mask(0xFF)
            .write_mask(write_mask)
            .reference(reference);

        let depth_stencil_state = PipelineDepthStencilState::new()
            .depth_test_enable(depth_enabled)
            .depth_write_enable(depth_enabled)
            .depth_compare_op(vk::CompareOp::LESS_OR_EQUAL)
            .stencil_test_enable(mode.stencil_test_enabled())
            .front(stencil_op_state)
            .back(stencil_op_state)
            .min_depth_bounds(0.0)
            .max_depth_bounds(1.0);

        let rasterization_state = PipelineRasterizationState::new()
            .polygon_mode(vk::PolygonMode::FILL)
            .cull_mode(if is_3d {
                vk::CullModeFlags::BACK
            } else {
                vk::CullModeFlags::NONE
            })
            .front_face(vk::FrontFace::COUNTER_CLOCKWISE);

        // Polygon draws pull vertex position (and index) manually from storage buffers via
        // `gl_VertexIndex`/`gl_InstanceIndex` (spec §4.C); no vertex input state is bound.
        let (vertex_input_attributes, vertex_input_bindings) = match (source, is_3d) {
            (GeometrySource::Polygon, _) => (Vec::new(), Vec::new()),
            (GeometrySource::FixedCatalog, true) => (
                vec![
                    vk::VertexInputAttributeDescription::default()
                        .location(0)
                        .binding(0)
                        .format(vk::Format::R32G32B32_SFLOAT)
                        .offset(0),
                    vk::VertexInputAttributeDescription::default()
                        .location(1)
                        .binding(0)
                        .format(vk::Format::R32G32B32_SFLOAT)
                        .offset(12),
                ],
                vec![vk::VertexInputBindingDescription::default()
                    .binding(0)
                    .stride(24)
                    .input_rate(vk::VertexInputRate::VERTEX)],
            ),
            (GeometrySource::FixedCatalog, false) => (
                vec![vk::VertexInputAttributeDescription::default()
                    .location(0)
                    .binding(0)
                    .format(vk::Format::R32G32_SFLOAT)
                    .offset(0)],
                vec![vk::VertexInputBindingDescription::default()
                    .binding(0)
                    .stride(8)
                    .input_rate(vk::VertexInputRate::VERTEX)],
            ),
        };

        let push_constant_ranges = vec![vk::PushConstantRange::default()
            .stage_flags(vk::ShaderStageFlags::VERTEX | vk::ShaderStageFlags::FRAGMENT)
            .offset(0)
            .size(std::mem::size_of::<CameraPushConstants>() as u32)];

        let set0: Arc<DescriptorSetLayout> = match source {
            GeometrySource::FixedCatalog => self.device.instance_storage_layout.clone(),
            GeometrySource::Polygon => self.device.polygon_storage_layout.clone(),
        };
        let mut descriptor_set_layouts = vec![set0];
        // Only fill passes in 3D bind the light manager's set; the outline pass is unlit.
        if is_3d && mode.uses_fill_instance() {
            descriptor_set_layouts.push(self.device.light_storage_layout.clone());
        }

        let descriptor = PipelineDescriptor {
            descriptor_set_layouts,
            push_constant_ranges,
            shader_modules,
            vertex_input_attributes,
            vertex_input_bindings,
            primitive_topology: vk::PrimitiveTopology::TRIANGLE_LIST,
            viewport_scissor_extent: extent,
            color_blend_attachments: vec![color_blend_attachment],
            depth_stencil_state,
            rasterization_state,
            color_attachment_formats: vec![self.color_attachment_format],
            depth_attachment_format: vk::Format::D32_SFLOAT_S8_UINT,
        };

        self.device.create_pipeline(descriptor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fill_and_outline_mask_union_covers_fill_plus_outline() {
        let mask = PipelineModeMask::DO_STENCIL_WRITE_DO_FILL | PipelineModeMask::DO_STENCIL_TEST_NO_FILL;
        assert!(mask.contains_mode(PipelineMode::DoStencilWriteDoFill));
        assert!(mask.contains_mode(PipelineMode::DoStencilTestNoFill));
        assert!(!mask.contains_mode(PipelineMode::NoStencilWriteDoFill));
    }

    #[test]
    fn render_order_matches_spec_table() {
        assert_eq!(
            PipelineMode::RENDER_ORDER,
            [
                PipelineMode::NoStencilWriteDoFill,
                PipelineMode::DoStencilWriteDoFill,
                PipelineMode::DoStencilWriteNoFill,
                PipelineMode::DoStencilTestNoFill,
            ]
        );
    }

    #[test]
    fn only_test_pass_uses_outline_instance_layout() {
        for mode in PipelineMode::RENDER_ORDER {
            assert_eq!(
                mode.uses_fill_instance(),
                mode != PipelineMode::DoStencilTestNoFill
            );
        }
    }
}
