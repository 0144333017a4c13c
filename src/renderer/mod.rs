// Renderer - the Vulkan side of the frame loop
//
// ARCHITECTURE:
// ┌─────────────────────────────────────────────────────────────────┐
// │  Renderer                                                       │
// │    ├── FrameLoop (Valid / Invalidated / Recreating)             │
// │    └── RenderContext: FrameTarget                               │
// │          ├── VulkanDevice (instance, surface, queues)           │
// │          ├── StaticResources (meshes, textures, descriptors)    │
// │          └── FrameResources (swapchain-dependent, rebuildable)  │
// └─────────────────────────────────────────────────────────────────┘

pub mod frame_resources;
pub mod static_resources;

use anyhow::{Context, Result};
use ash::vk;
use std::sync::Arc;
use winit::window::Window;

use crate::backend::buffer;
use crate::backend::command;
use crate::backend::shader::ShaderSet;
use crate::backend::sync::FrameSync;
use crate::backend::VulkanDevice;
use crate::config::Config;
use crate::lifecycle::{Acquire, FrameLoop, FrameOutcome, FrameTarget, Invalidation, Present};
use crate::scene::{DrawItem, FrameUniforms, Scene, UniformSlot};
use frame_resources::{FrameInputs, FrameResources};
use static_resources::StaticResources;

/// Owns every Vulkan object. Field order matters: `device` must outlive
/// everything built from it and go before `window`.
pub struct RenderContext {
    statics: StaticResources,
    frame: Option<FrameResources>,
    sync: FrameSync,
    command_pool: vk::CommandPool,
    shaders: ShaderSet,
    draws: Vec<DrawItem>,
    clear_color: [f32; 4],
    device: Arc<VulkanDevice>,
    window: Arc<Window>,
}

impl RenderContext {
    /// Build the device, the static resources and the first frame group.
    ///
    /// Shaders are read before any Vulkan object exists, so a missing or
    /// corrupt shader fails fast.
    pub fn new(window: Arc<Window>, config: &Config) -> Result<Self> {
        log::info!("Initializing Vulkan...");

        // ─────────────────────────────────────────────────────────────────────
        // STEP 1: Shaders
        // ─────────────────────────────────────────────────────────────────────
        let shaders = ShaderSet::load(&config.assets.shader_path())?;

        // ─────────────────────────────────────────────────────────────────────
        // STEP 2: Device, surface and queues
        // ─────────────────────────────────────────────────────────────────────
        let device = VulkanDevice::new(&config.window.title, &window, config.validation_enabled())?;

        // ─────────────────────────────────────────────────────────────────────
        // STEP 3: Command pool and the semaphore pair
        // ─────────────────────────────────────────────────────────────────────
        let command_pool = command::create_command_pool(&device)?;
        let sync = match FrameSync::new(&device) {
            Ok(sync) => sync,
            Err(e) => {
                unsafe { device.device.destroy_command_pool(command_pool, None) };
                return Err(e);
            }
        };

        // ─────────────────────────────────────────────────────────────────────
        // STEP 4: Static resources
        // ─────────────────────────────────────────────────────────────────────
        let scene = Scene::fixed();
        let statics = match StaticResources::new(&device, command_pool, &scene, &config.assets) {
            Ok(statics) => statics,
            Err(e) => {
                sync.destroy(&device.device);
                unsafe { device.device.destroy_command_pool(command_pool, None) };
                return Err(e);
            }
        };

        // From here on Drop cleans up
        let mut context = Self {
            statics,
            frame: None,
            sync,
            command_pool,
            shaders,
            draws: scene.draws,
            clear_color: config.graphics.clear_color,
            device,
            window,
        };

        // ─────────────────────────────────────────────────────────────────────
        // STEP 5: First frame resource group
        // ─────────────────────────────────────────────────────────────────────
        context.create_frame_resources()?;

        log::info!("Vulkan initialized successfully!");
        Ok(context)
    }

    fn frame(&self) -> Result<&FrameResources> {
        self.frame.as_ref().context("Frame resources are not built")
    }

    pub fn extent(&self) -> Option<vk::Extent2D> {
        self.frame.as_ref().map(FrameResources::extent)
    }
}

impl FrameTarget for RenderContext {
    fn has_drawable_area(&self) -> bool {
        let size = self.window.inner_size();
        size.width > 0 && size.height > 0
    }

    fn acquire(&mut self) -> Result<Acquire> {
        self.frame()?
            .swapchain
            .acquire_next_image(self.sync.image_available)
    }

    fn update_uniforms(&mut self, uniforms: &FrameUniforms) -> Result<()> {
        for slot in UniformSlot::ALL {
            buffer::write_buffer(
                &self.device.device,
                self.statics.uniform_buffer(slot),
                &[slot.uniforms(uniforms)],
            )?;
        }
        Ok(())
    }

    fn submit(&mut self, image_index: u32) -> Result<()> {
        let frame = self.frame()?;
        let cmd = *frame
            .command_buffers
            .get(image_index as usize)
            .with_context(|| format!("No command buffer for image {}", image_index))?;

        let wait_semaphores = [self.sync.image_available];
        let wait_stages = [vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT];
        let command_buffers = [cmd];
        let signal_semaphores = [self.sync.render_finished];

        let submit_info = vk::SubmitInfo::builder()
            .wait_semaphores(&wait_semaphores)
            .wait_dst_stage_mask(&wait_stages)
            .command_buffers(&command_buffers)
            .signal_semaphores(&signal_semaphores);

        unsafe {
            self.device.device.queue_submit(
                self.device.graphics_queue,
                &[submit_info.build()],
                vk::Fence::null(),
            )
        }
        .context("Failed to submit draw command buffer")
    }

    fn present(&mut self, image_index: u32) -> Result<Present> {
        self.frame()?.swapchain.present(
            self.device.present_queue,
            image_index,
            &[self.sync.render_finished],
        )
    }

    fn wait_present_idle(&mut self) -> Result<()> {
        unsafe { self.device.device.queue_wait_idle(self.device.present_queue) }
            .context("Failed to wait for present queue")
    }

    fn wait_device_idle(&mut self) -> Result<()> {
        self.device.wait_idle()
    }

    fn destroy_frame_resources(&mut self) {
        if let Some(frame) = self.frame.take() {
            frame.destroy(&self.device, self.command_pool);
        }
    }

    fn create_frame_resources(&mut self) -> Result<()> {
        let size = self.window.inner_size();
        let inputs = FrameInputs {
            device: &self.device,
            command_pool: self.command_pool,
            shaders: &self.shaders,
            statics: &self.statics,
            draws: &self.draws,
            clear_color: self.clear_color,
        };
        let frame = FrameResources::new(&inputs, size.width, size.height)?;
        self.frame = Some(frame);
        Ok(())
    }
}

impl Drop for RenderContext {
    fn drop(&mut self) {
        log::info!("Cleaning up Vulkan resources...");

        // Wait for GPU to finish before destroying anything
        if let Err(e) = self.device.wait_idle() {
            log::warn!("Device did not go idle before cleanup: {:#}", e);
        }

        // Destroy in reverse order of creation
        self.destroy_frame_resources();
        self.statics.destroy(&self.device.device);
        self.sync.destroy(&self.device.device);
        unsafe {
            self.device.device.destroy_command_pool(self.command_pool, None);
        }

        log::info!("Cleanup complete");
    }
}

/// The frame loop bound to its Vulkan target
pub struct Renderer {
    frame_loop: FrameLoop,
    context: RenderContext,
}

impl Renderer {
    pub fn new(window: Arc<Window>, config: &Config) -> Result<Self> {
        Ok(Self {
            frame_loop: FrameLoop::new(),
            context: RenderContext::new(window, config)?,
        })
    }

    /// Mark the frame group stale; it is rebuilt at the start of the next frame
    pub fn notify_resized(&mut self) {
        self.frame_loop.invalidate(Invalidation::Resized);
    }

    /// Render one frame. While the window has no area nothing is drawn and
    /// the group stays invalidated until it does.
    pub fn draw_frame(&mut self, uniforms: &FrameUniforms) -> Result<FrameOutcome> {
        self.frame_loop.draw_frame(&mut self.context, uniforms)
    }

    /// Changes whenever the swapchain was rebuilt
    pub fn generation(&self) -> u64 {
        self.frame_loop.generation()
    }

    /// Width over height of the current swapchain
    pub fn aspect_ratio(&self) -> Option<f32> {
        self.context
            .extent()
            .filter(|extent| extent.height > 0)
            .map(|extent| extent.width as f32 / extent.height as f32)
    }
}
