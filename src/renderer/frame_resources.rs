// Frame resource group - everything that depends on the swapchain
//
// Built as one unit and torn down as one unit. A resize never leaves the
// group half old and half new.
//
// CREATION ORDER:
// ┌──────────────────────────────────────────────────────────────────────┐
// │  swapchain + views ─> depth ─> render pass ─> pipeline layout        │
// │    ─> pipelines ─> framebuffers ─> command buffers (recorded)        │
// └──────────────────────────────────────────────────────────────────────┘
// Destruction runs the other way round.

use anyhow::{Context, Result};
use ash::vk;
use std::sync::Arc;

use super::static_resources::StaticResources;
use crate::backend::image::{self as gpu_image, Image};
use crate::backend::pipeline::{self, PipelineKind};
use crate::backend::shader::ShaderSet;
use crate::backend::{command, Swapchain, VulkanDevice};
use crate::scene::DrawItem;

/// One step of tearing a group down
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Teardown {
    Framebuffers,
    CommandBuffers,
    Pipelines,
    PipelineLayout,
    RenderPass,
    /// Image views first, then the swapchain itself
    Swapchain,
    Depth,
}

/// Reverse of creation, except that framebuffers and command buffers lead
pub const TEARDOWN_ORDER: [Teardown; 7] = [
    Teardown::Framebuffers,
    Teardown::CommandBuffers,
    Teardown::Pipelines,
    Teardown::PipelineLayout,
    Teardown::RenderPass,
    Teardown::Swapchain,
    Teardown::Depth,
];

/// Everything `FrameResources::new` reads but does not own
pub struct FrameInputs<'a> {
    pub device: &'a Arc<VulkanDevice>,
    pub command_pool: vk::CommandPool,
    pub shaders: &'a ShaderSet,
    pub statics: &'a StaticResources,
    pub draws: &'a [DrawItem],
    pub clear_color: [f32; 4],
}

pub struct FrameResources {
    pub swapchain: Swapchain,
    pub depth: Image,
    pub render_pass: vk::RenderPass,
    pub pipeline_layout: vk::PipelineLayout,
    /// Indexed by `PipelineKind::index`
    pub pipelines: Vec<vk::Pipeline>,
    pub framebuffers: Vec<vk::Framebuffer>,
    /// One pre-recorded buffer per swapchain image
    pub command_buffers: Vec<vk::CommandBuffer>,
}

impl FrameResources {
    pub fn new(inputs: &FrameInputs, width: u32, height: u32) -> Result<Self> {
        let device = inputs.device;

        // ─────────────────────────────────────────────────────────────────────
        // STEP 1: Swapchain and its image views
        // ─────────────────────────────────────────────────────────────────────
        let swapchain = Swapchain::new(device.clone(), width, height)?;
        let extent = swapchain.extent;

        // ─────────────────────────────────────────────────────────────────────
        // STEP 2: Depth buffer at the new extent
        // ─────────────────────────────────────────────────────────────────────
        let depth_format = gpu_image::find_depth_format(device)?;
        let depth = gpu_image::create_depth_buffer(device, inputs.command_pool, depth_format, extent)?;

        let mut group = Self {
            swapchain,
            depth,
            render_pass: vk::RenderPass::null(),
            pipeline_layout: vk::PipelineLayout::null(),
            pipelines: Vec::with_capacity(PipelineKind::ALL.len()),
            framebuffers: Vec::new(),
            command_buffers: Vec::new(),
        };

        match group.build(inputs, depth_format) {
            Ok(()) => {
                log::info!(
                    "Frame resources ready: {}x{}, {} images",
                    extent.width,
                    extent.height,
                    group.swapchain.images.len()
                );
                Ok(group)
            }
            Err(e) => {
                group.destroy(device, inputs.command_pool);
                Err(e)
            }
        }
    }

    fn build(&mut self, inputs: &FrameInputs, depth_format: vk::Format) -> Result<()> {
        let device = inputs.device;
        let extent = self.swapchain.extent;

        // ─────────────────────────────────────────────────────────────────────
        // STEP 3: Render pass, layout and both pipelines
        // ─────────────────────────────────────────────────────────────────────
        self.render_pass = pipeline::create_render_pass(device, self.swapchain.format, depth_format)?;
        self.pipeline_layout =
            pipeline::create_pipeline_layout(device, inputs.statics.descriptor_set_layout)?;

        for kind in PipelineKind::ALL {
            let (vert, frag) = match kind {
                PipelineKind::Scene => (&inputs.shaders.scene_vert, &inputs.shaders.scene_frag),
                PipelineKind::Skybox => (&inputs.shaders.skybox_vert, &inputs.shaders.skybox_frag),
            };
            let pipeline = pipeline::create_graphics_pipeline(
                device,
                kind,
                self.render_pass,
                self.pipeline_layout,
                extent,
                vert,
                frag,
            )
            .with_context(|| format!("Failed to build {:?} pipeline", kind))?;
            self.pipelines.push(pipeline);
        }

        // ─────────────────────────────────────────────────────────────────────
        // STEP 4: Framebuffers, one per swapchain image
        // ─────────────────────────────────────────────────────────────────────
        self.framebuffers = pipeline::create_framebuffers(
            device,
            &self.swapchain.image_views,
            self.depth.view,
            self.render_pass,
            extent,
        )?;

        // ─────────────────────────────────────────────────────────────────────
        // STEP 5: Pre-record the draw list for every image
        // ─────────────────────────────────────────────────────────────────────
        self.command_buffers = command::allocate_command_buffers(
            device,
            inputs.command_pool,
            self.framebuffers.len() as u32,
        )?;
        for (&cmd, &framebuffer) in self.command_buffers.iter().zip(&self.framebuffers) {
            self.record(&device.device, cmd, framebuffer, inputs)?;
        }

        Ok(())
    }

    /// Record one full pass: clear, then every draw item in order
    fn record(
        &self,
        device: &ash::Device,
        cmd: vk::CommandBuffer,
        framebuffer: vk::Framebuffer,
        inputs: &FrameInputs,
    ) -> Result<()> {
        let clear_values = [
            vk::ClearValue {
                color: vk::ClearColorValue {
                    float32: inputs.clear_color,
                },
            },
            vk::ClearValue {
                depth_stencil: vk::ClearDepthStencilValue {
                    depth: 1.0,
                    stencil: 0,
                },
            },
        ];

        // Resubmitted every frame the image comes round again
        let begin_info =
            vk::CommandBufferBeginInfo::builder().flags(vk::CommandBufferUsageFlags::SIMULTANEOUS_USE);

        let render_pass_info = vk::RenderPassBeginInfo::builder()
            .render_pass(self.render_pass)
            .framebuffer(framebuffer)
            .render_area(vk::Rect2D {
                offset: vk::Offset2D { x: 0, y: 0 },
                extent: self.swapchain.extent,
            })
            .clear_values(&clear_values);

        unsafe {
            device
                .begin_command_buffer(cmd, &begin_info)
                .context("Failed to begin command buffer")?;
            device.cmd_begin_render_pass(cmd, &render_pass_info, vk::SubpassContents::INLINE);

            let mut bound: Option<PipelineKind> = None;
            for draw in inputs.draws {
                if bound != Some(draw.pipeline) {
                    device.cmd_bind_pipeline(
                        cmd,
                        vk::PipelineBindPoint::GRAPHICS,
                        self.pipelines[draw.pipeline.index()],
                    );
                    bound = Some(draw.pipeline);
                }

                let mesh = &inputs.statics.meshes[draw.mesh];
                device.cmd_bind_vertex_buffers(cmd, 0, &[mesh.vertices.buffer], &[0]);
                device.cmd_bind_index_buffer(cmd, mesh.indices.buffer, 0, vk::IndexType::UINT32);
                device.cmd_bind_descriptor_sets(
                    cmd,
                    vk::PipelineBindPoint::GRAPHICS,
                    self.pipeline_layout,
                    0,
                    &[inputs.statics.descriptor_set(draw.material)],
                    &[],
                );
                device.cmd_draw_indexed(cmd, mesh.index_count, 1, 0, 0, 0);
            }

            device.cmd_end_render_pass(cmd);
            device
                .end_command_buffer(cmd)
                .context("Failed to record command buffer")?;
        }

        Ok(())
    }

    pub fn extent(&self) -> vk::Extent2D {
        self.swapchain.extent
    }

    /// Tear the group down in `TEARDOWN_ORDER`. The device must be idle.
    pub fn destroy(self, device: &VulkanDevice, command_pool: vk::CommandPool) {
        let Self {
            swapchain,
            depth,
            render_pass,
            pipeline_layout,
            pipelines,
            framebuffers,
            command_buffers,
        } = self;
        let mut swapchain = Some(swapchain);
        let mut depth = Some(depth);

        for step in TEARDOWN_ORDER {
            log::trace!("Frame resources teardown: {:?}", step);
            match step {
                Teardown::Framebuffers => unsafe {
                    for &framebuffer in &framebuffers {
                        device.device.destroy_framebuffer(framebuffer, None);
                    }
                },
                Teardown::CommandBuffers => {
                    if !command_buffers.is_empty() {
                        unsafe { device.device.free_command_buffers(command_pool, &command_buffers) };
                    }
                }
                Teardown::Pipelines => unsafe {
                    for &pipeline in &pipelines {
                        device.device.destroy_pipeline(pipeline, None);
                    }
                },
                Teardown::PipelineLayout => unsafe {
                    device.device.destroy_pipeline_layout(pipeline_layout, None);
                },
                Teardown::RenderPass => unsafe {
                    device.device.destroy_render_pass(render_pass, None);
                },
                Teardown::Swapchain => drop(swapchain.take()),
                Teardown::Depth => {
                    if let Some(depth) = depth.take() {
                        depth.destroy(&device.device);
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn position(step: Teardown) -> usize {
        TEARDOWN_ORDER.iter().position(|&s| s == step).unwrap()
    }

    #[test]
    fn every_object_is_torn_down_once() {
        for step in TEARDOWN_ORDER {
            assert_eq!(TEARDOWN_ORDER.iter().filter(|&&s| s == step).count(), 1);
        }
    }

    #[test]
    fn users_go_before_what_they_reference() {
        // Framebuffers hold the image views, the depth view and the render pass
        assert!(position(Teardown::Framebuffers) < position(Teardown::Swapchain));
        assert!(position(Teardown::Framebuffers) < position(Teardown::Depth));
        assert!(position(Teardown::Framebuffers) < position(Teardown::RenderPass));
        // Pipelines were built against the layout and the render pass
        assert!(position(Teardown::Pipelines) < position(Teardown::PipelineLayout));
        assert!(position(Teardown::Pipelines) < position(Teardown::RenderPass));
        assert_eq!(TEARDOWN_ORDER[0], Teardown::Framebuffers);
        assert_eq!(TEARDOWN_ORDER[1], Teardown::CommandBuffers);
        assert_eq!(TEARDOWN_ORDER[6], Teardown::Depth);
    }
}
