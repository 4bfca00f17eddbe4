//! Renderer (spec §4.E). Orchestrates the per-primitive-kind batchers (mesh, circle, polygon) and
//! the light manager for one scene, generic over [`Dimension`] so 2D and 3D share this file
//! entirely (spec §9 "Multiple dimensions via type parameter").

use std::sync::Arc;

use anyhow::{anyhow, Result as AnyResult};

use crate::batch::{CopyBarriers, ModeBatches, PerPrimitiveBatch};
use crate::camera::CameraInfo;
use crate::catalog::{CatalogVertex, PrimitiveCatalog};
use crate::dim::Dimension;
use crate::instance::{InstancePacking, PolygonInstancePacking};
use crate::light::{DirectionalLight, LightSupport, LightsHandle, PointLight};
use crate::pipeline::{CameraPushConstants, PipelineCatalog, PipelineMode};
use crate::polygon::PolygonBatch;
use crate::vulkan::{command::CommandBuffer, device::Device, vk};

/// One drawable kind's mode-keyed batches (spec §2 "static mesh / circle / polygon"). Spec §4.C's
/// batcher state is keyed per `(primitive kind, mode, frame)` — `mesh` holds one [`ModeBatches`]
/// per fixed-catalog primitive *other than* the dedicated circle mesh (so a square's instances
/// never end up drawn against a triangle's index range), indexed by the same `primitive_index`
/// [`crate::catalog::PrimitiveCatalog`] uses. `circle` needs no such indexing: it is always the
/// catalog's one dedicated circle mesh.
struct MeshCircleBatches<D: Dimension + InstancePacking> {
    mesh: Vec<ModeBatches<D::FillInstance, D::OutlineInstance>>,
    circle: ModeBatches<D::FillInstance, D::OutlineInstance>,
}

/// Orchestrates C (batchers) and D (light manager) for one scene (spec §4.E). `D` selects
/// `Dim2`/`Dim3`; in 2D `D::Lights = ()` so every light-manager call below is a no-op forwarded
/// through [`LightsHandle`] rather than a branch on `D::IS_3D`.
pub struct Renderer<D: Dimension + CatalogVertex + InstancePacking + PolygonInstancePacking + LightSupport> {
    device: Arc<Device>,
    batches: MeshCircleBatches<D>,
    polygon: PolygonBatch<D>,
    lights: D::Lights,
}

impl<D> Renderer<D>
where
    D: Dimension + CatalogVertex + InstancePacking + PolygonInstancePacking + LightSupport,
{
    /// `catalog` supplies the fixed-catalog primitive count this dimension builds (spec §4.A);
    /// the circle mesh is always the catalog's last entry (see [`CatalogVertex::shapes`]), so
    /// every other entry gets its own per-kind [`ModeBatches`].
    pub fn new(device: Arc<Device>, catalog: &PrimitiveCatalog<D>) -> Self {
        let frames_in_flight = device.frames_in_flight();
        let instance_layout = device.instance_storage_layout.clone();
        let polygon_layout = device.polygon_storage_layout.clone();
        let lights = D::new_lights(frames_in_flight, &device);

        let mesh_kind_count = catalog.layout_count().saturating_sub(1) as usize;
        let mesh = (0..mesh_kind_count)
            .map(|_| ModeBatches::new(frames_in_flight, instance_layout.clone()))
            .collect();

        Self {
            batches: MeshCircleBatches {
                mesh,
                circle: ModeBatches::new(frames_in_flight, instance_layout),
            },
            polygon: PolygonBatch::new(frames_in_flight, polygon_layout),
            lights,
            device,
        }
    }

    pub fn mesh_fill_batch(&mut self, primitive_index: u32, mode: PipelineMode) -> Option<&mut PerPrimitiveBatch<D::FillInstance>> {
        self.batches.mesh.get_mut(primitive_index as usize)?.fill_batch(mode)
    }

    pub fn mesh_outline_batch(&mut self, primitive_index: u32, mode: PipelineMode) -> Option<&mut PerPrimitiveBatch<D::OutlineInstance>> {
        self.batches.mesh.get_mut(primitive_index as usize)?.outline_batch(mode)
    }

    pub fn circle_fill_batch(&mut self, mode: PipelineMode) -> Option<&mut PerPrimitiveBatch<D::FillInstance>> {
        self.batches.circle.fill_batch(mode)
    }

    pub fn circle_outline_batch(&mut self, mode: PipelineMode) -> Option<&mut PerPrimitiveBatch<D::OutlineInstance>> {
        self.batches.circle.outline_batch(mode)
    }

    pub fn polygon_batch(&mut self) -> &mut PolygonBatch<D> {
        &mut self.polygon
    }
}

impl<D> Renderer<D>
where
    D: Dimension + CatalogVertex + InstancePacking + PolygonInstancePacking + LightSupport,
{
    /// 1. `flush()` (spec §4.E) — clears every batcher's host data plus the light vectors.
    pub fn flush(&mut self) {
        for mode_batches in &mut self.batches.mesh {
            mode_batches.flush();
        }
        self.batches.circle.flush();
        self.polygon.flush();
        self.lights.flush();
    }

    /// 2. `grow_to_fit(frame)` (spec §4.E) — cascades to every batcher, and in 3D the light
    /// manager. Idempotent for already-sufficient capacities (each callee is itself idempotent).
    pub fn grow_to_fit(&mut self, frame: usize) -> AnyResult<()> {
        for mode_batches in &mut self.batches.mesh {
            mode_batches.grow_to_fit(frame, &self.device)?;
        }
        self.batches.circle.grow_to_fit(frame, &self.device)?;
        self.polygon.grow_to_fit(frame, &self.device)?;
        self.lights.grow_to_fit(frame, &self.device)?;
        Ok(())
    }

    /// 3. `send_to_device(frame)` (spec §4.E) — fans out one `std::thread::scope` task per
    /// non-empty batch (spec §5 "a bounded number of tasks ... one per non-empty batch"), joins
    /// before returning.
    pub fn send_to_device(&self, frame: usize) -> AnyResult<()> {
        let results: Vec<AnyResult<()>> = std::thread::scope(|scope| {
            let mut handles = Vec::new();

            macro_rules! spawn_mode_batches {
                ($batches:expr) => {
                    $batches.for_each_non_empty_fill(|batch| {
                        handles.push(scope.spawn(move || batch.send_to_device(frame)));
                    });
                    if !$batches.do_stencil_test_no_fill.is_empty() {
                        let outline_batch = &$batches.do_stencil_test_no_fill;
                        handles.push(scope.spawn(move || outline_batch.send_to_device(frame)));
                    }
                };
            }

            for mode_batches in &self.batches.mesh {
                spawn_mode_batches!(mode_batches);
            }
            spawn_mode_batches!(self.batches.circle);

            if !self.polygon.is_empty() {
                let polygon = &self.polygon;
                handles.push(scope.spawn(move || polygon.send_to_device(frame)));
            }
            if self.lights.directional_count() > 0 || self.lights.point_count() > 0 {
                let lights = &self.lights;
                handles.push(scope.spawn(move || lights.send_to_device(frame)));
            }

            handles.into_iter().map(|h| h.join().unwrap_or_else(|_| Err(anyhow!("send_to_device worker panicked")))).collect()
        });

        for result in results {
            result?;
        }
        Ok(())
    }

    /// 4. `record_copy_commands(frame, gfx_cmd, xfer_cmd) -> stage_mask` (spec §4.E). Collects
    /// every batcher's (and the light manager's) acquire/release barriers; applies the release
    /// barrier (if any — only present under `TransferMode::SeparateQueueFamily`) on `xfer_cmd`
    /// and the acquire barrier on `gfx_cmd`.
    pub fn record_copy_commands(
        &self,
        frame: usize,
        gfx_cmd: &CommandBuffer,
        xfer_cmd: &CommandBuffer,
    ) -> AnyResult<vk::PipelineStageFlags> {
        let graphics_family = self.device.graphics_queue_family();
        let transfer_family = self.device.transfer_queue_family();

        let mut all_barriers: Vec<CopyBarriers> = Vec::new();

        macro_rules! collect_mode_batches {
            ($batches:expr, $field:ident) => {
                for batch in [
                    &$batches.no_stencil_write_do_fill,
                    &$batches.do_stencil_write_do_fill,
                    &$batches.do_stencil_write_no_fill,
                ] {
                    if let Some(b) = batch.record_copy_commands(frame, xfer_cmd, graphics_family, transfer_family)? {
                        all_barriers.push(b);
                    }
                }
                if let Some(b) = $batches
                    .do_stencil_test_no_fill
                    .record_copy_commands(frame, xfer_cmd, graphics_family, transfer_family)?
                {
                    all_barriers.push(b);
                }
                let _ = stringify!($field);
            };
        }

        for mode_batches in &self.batches.mesh {
            collect_mode_batches!(mode_batches, mesh);
        }
        collect_mode_batches!(self.batches.circle, circle);

        all_barriers.extend(self.polygon.record_copy_commands(frame, xfer_cmd, graphics_family, transfer_family)?);
        all_barriers.extend(self.lights.record_copy_commands(frame, xfer_cmd, graphics_family, transfer_family)?);

        if all_barriers.is_empty() {
            return Ok(vk::PipelineStageFlags::empty());
        }

        let release_barriers: Vec<_> = all_barriers.iter().filter_map(|b| b.release).collect();
        if !release_barriers.is_empty() {
            xfer_cmd.pipeline_buffer_barrier(&release_barriers);
        }

        let acquire_barriers: Vec<_> = all_barriers.iter().map(|b| b.acquire).collect();
        gfx_cmd.pipeline_buffer_barrier(&acquire_barriers);

        // Vertex-shader reads for fixed-catalog draws, plus vertex-input for the polygon batcher's
        // vertex-pulling draws (spec §5 "a pipeline barrier with VERTEX_SHADER_BIT and (for user
        // polygon geometry) VERTEX_INPUT_BIT"). Translated to the legacy stage-mask flavor here
        // since `FrameScheduler::submit_graphics_queue` submits with the classic `vkQueueSubmit`.
        Ok(vk::PipelineStageFlags::VERTEX_SHADER | vk::PipelineStageFlags::VERTEX_INPUT)
    }

    /// 5. `render(frame, gfx_cmd, cameras)` (spec §4.E): per camera, optional clear, dynamic
    /// viewport/scissor, then the four render-order passes across mesh/circle/polygon batches.
    pub fn render(
        &self,
        frame: usize,
        gfx_cmd: &CommandBuffer,
        pipelines: &mut PipelineCatalog,
        catalog: &PrimitiveCatalog<D>,
        cameras: &[CameraInfo],
    ) -> AnyResult<()> {
        for camera in cameras {
            self.render_camera(frame, gfx_cmd, pipelines, catalog, camera)?;
        }
        Ok(())
    }

    fn render_camera(
        &self,
        frame: usize,
        gfx_cmd: &CommandBuffer,
        pipelines: &mut PipelineCatalog,
        catalog: &PrimitiveCatalog<D>,
        camera: &CameraInfo,
    ) -> AnyResult<()> {
        let viewport_rect = vk::Rect2D {
            offset: vk::Offset2D {
                x: camera.viewport.x as i32,
                y: camera.viewport.y as i32,
            },
            extent: vk::Extent2D {
                width: camera.viewport.width as u32,
                height: camera.viewport.height as u32,
            },
        };

        if !camera.transparent {
            let [r, g, b, a] = {
                let c = camera.background_color.channels();
                [c[0] as f32 / 255.0, c[1] as f32 / 255.0, c[2] as f32 / 255.0, c[3] as f32 / 255.0]
            };
            gfx_cmd.clear_color_attachment([r, g, b, a], viewport_rect);
            if D::IS_3D {
                gfx_cmd.clear_depth_stencil_attachment(1.0, 0, viewport_rect);
            }
        }

        gfx_cmd.set_viewport(vk::Viewport {
            x: camera.viewport.x,
            y: camera.viewport.y,
            width: camera.viewport.width,
            height: camera.viewport.height,
            min_depth: 0.0,
            max_depth: 1.0,
        });
        gfx_cmd.set_scissor(vk::Rect2D {
            offset: vk::Offset2D {
                x: camera.scissor.x as i32,
                y: camera.scissor.y as i32,
            },
            extent: vk::Extent2D {
                width: camera.scissor.width as u32,
                height: camera.scissor.height as u32,
            },
        });

        let push_constants = CameraPushConstants {
            projection_view: camera.projection_view.into(),
            view_position: [camera.view_position.x, camera.view_position.y, camera.view_position.z, 0.0],
            ambient_color: [0.1, 0.1, 0.1, 1.0],
            directional_light_count: self.lights.directional_count(),
            point_light_count: self.lights.point_count(),
            _pad: [0; 2],
        };

        for mode in PipelineMode::RENDER_ORDER {
            self.render_pass(frame, gfx_cmd, pipelines, catalog, mode, &push_constants)?;
        }

        Ok(())
    }

    fn render_pass(
        &self,
        frame: usize,
        gfx_cmd: &CommandBuffer,
        pipelines: &mut PipelineCatalog,
        catalog: &PrimitiveCatalog<D>,
        mode: PipelineMode,
        push_constants: &CameraPushConstants,
    ) -> AnyResult<()> {
        let pipeline = if D::IS_3D {
            pipelines.get_3d(mode)?
        } else {
            pipelines.get_2d(mode)?
        };
        let polygon_pipeline = if D::IS_3D {
            pipelines.get_3d_polygon(mode)?
        } else {
            pipelines.get_2d_polygon(mode)?
        };

        let mut first_instance = 0u32;

        gfx_cmd.bind_pipeline_graphics(&pipeline);
        gfx_cmd.push_constants(
            &pipeline,
            vk::ShaderStageFlags::VERTEX | vk::ShaderStageFlags::FRAGMENT,
            0,
            push_constants,
        );
        // Pipelines only carry a set-1 light layout for 3D fill passes (`build_pipeline`'s
        // `is_3d && mode.uses_fill_instance()` condition); binding it elsewhere would reference a
        // set index outside the bound pipeline layout.
        if mode.uses_fill_instance() {
            if let Some(light_set) = self.lights.descriptor_set(frame) {
                gfx_cmd.bind_descriptor_sets_graphics(1, &[light_set], &pipeline);
            }
        }
        gfx_cmd.bind_vertex_buffers(0, &[catalog.get_vertex_buffer()], &[0]);
        gfx_cmd.bind_index_buffer(catalog.get_index_buffer(), 0);

        first_instance = self.record_mesh_circle_pass(frame, gfx_cmd, &pipeline, catalog, mode, first_instance)?;

        gfx_cmd.bind_pipeline_graphics(&polygon_pipeline);
        gfx_cmd.push_constants(
            &polygon_pipeline,
            vk::ShaderStageFlags::VERTEX | vk::ShaderStageFlags::FRAGMENT,
            0,
            push_constants,
        );
        if mode.uses_fill_instance() {
            if let Some(light_set) = self.lights.descriptor_set(frame) {
                gfx_cmd.bind_descriptor_sets_graphics(1, &[light_set], &polygon_pipeline);
            }
        }

        if mode == PipelineMode::DoStencilTestNoFill {
            self.polygon.record_outline_draw(frame, gfx_cmd, &polygon_pipeline, first_instance)?;
        } else if !self.polygon.is_fill_empty(mode) {
            self.polygon.record_fill_draw(mode, frame, gfx_cmd, &polygon_pipeline, first_instance)?;
        }

        Ok(())
    }

    fn record_mesh_circle_pass(
        &self,
        frame: usize,
        gfx_cmd: &CommandBuffer,
        pipeline: &crate::vulkan::resource::Pipeline,
        catalog: &PrimitiveCatalog<D>,
        mode: PipelineMode,
        mut first_instance: u32,
    ) -> AnyResult<u32> {
        // Draws are ordered by primitive kind, matching `shapes()`'s catalog-index order (spec
        // §5): every fixed-catalog mesh kind gets its own [`ModeBatches`] so its instances are
        // never drawn against another kind's index range; the circle mesh is always the last
        // catalog entry and has its own dedicated, unindexed batch.
        let circle_index = catalog.layout_count().saturating_sub(1);

        for primitive_index in 0..catalog.layout_count() {
            let layout = catalog.get_layout(primitive_index);

            let mode_batches = if primitive_index == circle_index {
                &self.batches.circle
            } else {
                &self.batches.mesh[primitive_index as usize]
            };

            if mode.uses_fill_instance() {
                if let Some(batch) = fill_batch_ref::<D>(mode_batches, mode) {
                    first_instance = batch.record_draw(frame, gfx_cmd, pipeline, layout, first_instance)?;
                }
            } else if let Some(batch) = outline_batch_ref::<D>(mode_batches, mode) {
                first_instance = batch.record_draw(frame, gfx_cmd, pipeline, layout, first_instance)?;
            }
        }
        Ok(first_instance)
    }
}

fn fill_batch_ref<D: Dimension + InstancePacking>(
    mode_batches: &ModeBatches<D::FillInstance, D::OutlineInstance>,
    mode: PipelineMode,
) -> Option<&PerPrimitiveBatch<D::FillInstance>> {
    match mode {
        PipelineMode::NoStencilWriteDoFill => Some(&mode_batches.no_stencil_write_do_fill),
        PipelineMode::DoStencilWriteDoFill => Some(&mode_batches.do_stencil_write_do_fill),
        PipelineMode::DoStencilWriteNoFill => Some(&mode_batches.do_stencil_write_no_fill),
        PipelineMode::DoStencilTestNoFill => None,
    }
}

fn outline_batch_ref<D: Dimension + InstancePacking>(
    mode_batches: &ModeBatches<D::FillInstance, D::OutlineInstance>,
    mode: PipelineMode,
) -> Option<&PerPrimitiveBatch<D::OutlineInstance>> {
    match mode {
        PipelineMode::DoStencilTestNoFill => Some(&mode_batches.do_stencil_test_no_fill),
        _ => None,
    }
}

impl<D> Renderer<D>
where
    D: Dimension + CatalogVertex + InstancePacking + PolygonInstancePacking + LightSupport,
{
    pub fn add_directional_light_typed(&mut self, light: DirectionalLight)
    where
        D::Lights: LightAdd<DirectionalLight>,
    {
        self.lights.add(light);
    }

    pub fn add_point_light_typed(&mut self, light: PointLight)
    where
        D::Lights: LightAdd<PointLight>,
    {
        self.lights.add(light);
    }
}

/// Typed add surface for 3D-only lights, kept separate from [`LightsHandle`] since `()` (the 2D
/// `Lights` type) has no meaningful "add a light" operation.
pub trait LightAdd<L> {
    fn add(&mut self, light: L);
}

impl LightAdd<DirectionalLight> for crate::light::LightManager {
    fn add(&mut self, light: DirectionalLight) {
        self.add_directional_light(light);
    }
}

impl LightAdd<PointLight> for crate::light::LightManager {
    fn add(&mut self, light: PointLight) {
        self.add_point_light(light);
    }
}
