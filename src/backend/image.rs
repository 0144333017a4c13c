// Images, views, samplers and layout transitions
//
// Textures and the skybox cubemap are uploaded once through a staging buffer.
// The depth buffer belongs to the frame resource group and follows the
// swapchain extent.

use anyhow::{Context, Result};
use ash::vk;
use image::RgbaImage;

use super::buffer::{allocate_memory, create_staging_buffer};
use super::command::submit_one_shot;
use super::VulkanDevice;
use crate::error::InitError;

pub const TEXTURE_FORMAT: vk::Format = vk::Format::R8G8B8A8_UNORM;

const DEPTH_CANDIDATES: [vk::Format; 3] = [
    vk::Format::D32_SFLOAT,
    vk::Format::D32_SFLOAT_S8_UINT,
    vk::Format::D24_UNORM_S8_UINT,
];

const MAX_ANISOTROPY: f32 = 16.0;

/// An image, its memory and a view over all of its layers
#[derive(Debug, Clone, Copy)]
pub struct Image {
    pub image: vk::Image,
    pub memory: vk::DeviceMemory,
    pub view: vk::ImageView,
}

impl Image {
    pub fn destroy(&self, device: &ash::Device) {
        unsafe {
            device.destroy_image_view(self.view, None);
            device.destroy_image(self.image, None);
            device.free_memory(self.memory, None);
        }
    }
}

pub fn has_stencil_component(format: vk::Format) -> bool {
    format == vk::Format::D32_SFLOAT_S8_UINT || format == vk::Format::D24_UNORM_S8_UINT
}

/// First candidate whose features for `tiling` include `features`
pub fn pick_supported_format<F>(
    candidates: &[vk::Format],
    tiling: vk::ImageTiling,
    features: vk::FormatFeatureFlags,
    properties_of: F,
) -> Result<vk::Format, InitError>
where
    F: Fn(vk::Format) -> vk::FormatProperties,
{
    candidates
        .iter()
        .copied()
        .find(|&format| {
            let props = properties_of(format);
            match tiling {
                vk::ImageTiling::LINEAR => props.linear_tiling_features.contains(features),
                vk::ImageTiling::OPTIMAL => props.optimal_tiling_features.contains(features),
                _ => false,
            }
        })
        .ok_or_else(|| InitError::NoSupportedFormat {
            candidates: candidates.to_vec(),
        })
}

pub fn find_depth_format(device: &VulkanDevice) -> Result<vk::Format, InitError> {
    pick_supported_format(
        &DEPTH_CANDIDATES,
        vk::ImageTiling::OPTIMAL,
        vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT,
        |format| device.format_properties(format),
    )
}

/// Access masks and pipeline stages for one of the supported layout changes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransitionMasks {
    pub src_access: vk::AccessFlags,
    pub dst_access: vk::AccessFlags,
    pub src_stage: vk::PipelineStageFlags,
    pub dst_stage: vk::PipelineStageFlags,
}

pub fn transition_masks(
    from: vk::ImageLayout,
    to: vk::ImageLayout,
) -> Result<TransitionMasks, InitError> {
    use vk::ImageLayout as L;

    match (from, to) {
        (L::UNDEFINED, L::TRANSFER_DST_OPTIMAL) => Ok(TransitionMasks {
            src_access: vk::AccessFlags::empty(),
            dst_access: vk::AccessFlags::TRANSFER_WRITE,
            src_stage: vk::PipelineStageFlags::TOP_OF_PIPE,
            dst_stage: vk::PipelineStageFlags::TRANSFER,
        }),
        (L::TRANSFER_DST_OPTIMAL, L::SHADER_READ_ONLY_OPTIMAL) => Ok(TransitionMasks {
            src_access: vk::AccessFlags::TRANSFER_WRITE,
            dst_access: vk::AccessFlags::SHADER_READ,
            src_stage: vk::PipelineStageFlags::TRANSFER,
            dst_stage: vk::PipelineStageFlags::FRAGMENT_SHADER,
        }),
        (L::UNDEFINED, L::DEPTH_STENCIL_ATTACHMENT_OPTIMAL) => Ok(TransitionMasks {
            src_access: vk::AccessFlags::empty(),
            dst_access: vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_READ
                | vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE,
            src_stage: vk::PipelineStageFlags::TOP_OF_PIPE,
            dst_stage: vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS,
        }),
        (from, to) => Err(InitError::UnsupportedTransition { from, to }),
    }
}

/// All six faces must share one size; returns it
pub fn check_cubemap_faces(sizes: &[(u32, u32); 6]) -> Result<(u32, u32), InitError> {
    let expected = sizes[0];
    match sizes.iter().position(|&size| size != expected) {
        Some(face) => Err(InitError::CubemapFaceMismatch {
            face,
            expected,
            actual: sizes[face],
        }),
        None => Ok(expected),
    }
}

/// 2D view over a single-layer image
pub fn create_image_view(
    device: &ash::Device,
    image: vk::Image,
    format: vk::Format,
    aspect_mask: vk::ImageAspectFlags,
) -> Result<vk::ImageView> {
    create_view(device, image, vk::ImageViewType::TYPE_2D, format, aspect_mask, 1)
}

fn create_view(
    device: &ash::Device,
    image: vk::Image,
    view_type: vk::ImageViewType,
    format: vk::Format,
    aspect_mask: vk::ImageAspectFlags,
    layer_count: u32,
) -> Result<vk::ImageView> {
    let create_info = vk::ImageViewCreateInfo::builder()
        .image(image)
        .view_type(view_type)
        .format(format)
        .components(vk::ComponentMapping {
            r: vk::ComponentSwizzle::IDENTITY,
            g: vk::ComponentSwizzle::IDENTITY,
            b: vk::ComponentSwizzle::IDENTITY,
            a: vk::ComponentSwizzle::IDENTITY,
        })
        .subresource_range(vk::ImageSubresourceRange {
            aspect_mask,
            base_mip_level: 0,
            level_count: 1,
            base_array_layer: 0,
            layer_count,
        });

    unsafe { device.create_image_view(&create_info, None) }.context("Failed to create image view")
}

struct ImageDesc {
    extent: vk::Extent2D,
    layers: u32,
    flags: vk::ImageCreateFlags,
    format: vk::Format,
    usage: vk::ImageUsageFlags,
}

fn create_image(device: &VulkanDevice, desc: &ImageDesc) -> Result<(vk::Image, vk::DeviceMemory)> {
    let image_info = vk::ImageCreateInfo::builder()
        .flags(desc.flags)
        .image_type(vk::ImageType::TYPE_2D)
        .extent(vk::Extent3D {
            width: desc.extent.width,
            height: desc.extent.height,
            depth: 1,
        })
        .mip_levels(1)
        .array_layers(desc.layers)
        .format(desc.format)
        .tiling(vk::ImageTiling::OPTIMAL)
        .initial_layout(vk::ImageLayout::UNDEFINED)
        .usage(desc.usage)
        .samples(vk::SampleCountFlags::TYPE_1)
        .sharing_mode(vk::SharingMode::EXCLUSIVE);

    let image = unsafe { device.device.create_image(&image_info, None) }
        .context("Failed to create image")?;

    let requirements = unsafe { device.device.get_image_memory_requirements(image) };
    let memory = allocate_memory(device, requirements, vk::MemoryPropertyFlags::DEVICE_LOCAL)?;

    unsafe { device.device.bind_image_memory(image, memory, 0) }
        .context("Failed to bind image memory")?;

    Ok((image, memory))
}

#[allow(clippy::too_many_arguments)]
fn record_transition(
    device: &ash::Device,
    cmd: vk::CommandBuffer,
    image: vk::Image,
    format: vk::Format,
    layers: u32,
    from: vk::ImageLayout,
    to: vk::ImageLayout,
    masks: TransitionMasks,
) {
    let aspect_mask = if to == vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL {
        if has_stencil_component(format) {
            vk::ImageAspectFlags::DEPTH | vk::ImageAspectFlags::STENCIL
        } else {
            vk::ImageAspectFlags::DEPTH
        }
    } else {
        vk::ImageAspectFlags::COLOR
    };

    let barrier = vk::ImageMemoryBarrier::builder()
        .src_access_mask(masks.src_access)
        .dst_access_mask(masks.dst_access)
        .old_layout(from)
        .new_layout(to)
        .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .image(image)
        .subresource_range(vk::ImageSubresourceRange {
            aspect_mask,
            base_mip_level: 0,
            level_count: 1,
            base_array_layer: 0,
            layer_count: layers,
        })
        .build();

    unsafe {
        device.cmd_pipeline_barrier(
            cmd,
            masks.src_stage,
            masks.dst_stage,
            vk::DependencyFlags::empty(),
            &[],
            &[],
            &[barrier],
        );
    }
}

/// Move every layer of `image` from `from` to `to` in a one-shot submission
pub fn transition_image_layout(
    device: &VulkanDevice,
    pool: vk::CommandPool,
    image: vk::Image,
    format: vk::Format,
    layers: u32,
    from: vk::ImageLayout,
    to: vk::ImageLayout,
) -> Result<()> {
    let masks = transition_masks(from, to)?;
    submit_one_shot(device, pool, |dev, cmd| {
        record_transition(dev, cmd, image, format, layers, from, to, masks)
    })
}

/// Upload tightly packed RGBA8 layers, one after another in `pixels`, and
/// leave the image ready for sampling.
fn upload_layers(
    device: &VulkanDevice,
    pool: vk::CommandPool,
    image: vk::Image,
    extent: vk::Extent2D,
    layers: u32,
    pixels: &[u8],
) -> Result<()> {
    let staging = create_staging_buffer(device, pixels)?;
    let layer_size = (extent.width * extent.height * 4) as vk::DeviceSize;

    let uploaded = (|| -> Result<()> {
        transition_image_layout(
            device,
            pool,
            image,
            TEXTURE_FORMAT,
            layers,
            vk::ImageLayout::UNDEFINED,
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
        )?;

        submit_one_shot(device, pool, |dev, cmd| {
            let regions: Vec<vk::BufferImageCopy> = (0..layers)
                .map(|layer| vk::BufferImageCopy {
                    buffer_offset: layer as vk::DeviceSize * layer_size,
                    buffer_row_length: 0,
                    buffer_image_height: 0,
                    image_subresource: vk::ImageSubresourceLayers {
                        aspect_mask: vk::ImageAspectFlags::COLOR,
                        mip_level: 0,
                        base_array_layer: layer,
                        layer_count: 1,
                    },
                    image_offset: vk::Offset3D { x: 0, y: 0, z: 0 },
                    image_extent: vk::Extent3D {
                        width: extent.width,
                        height: extent.height,
                        depth: 1,
                    },
                })
                .collect();

            unsafe {
                dev.cmd_copy_buffer_to_image(
                    cmd,
                    staging.buffer,
                    image,
                    vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                    &regions,
                );
            }
        })?;

        transition_image_layout(
            device,
            pool,
            image,
            TEXTURE_FORMAT,
            layers,
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        )
    })();

    staging.destroy(&device.device);
    uploaded
}

/// Sampled 2D texture from decoded RGBA8 pixels
pub fn create_texture(device: &VulkanDevice, pool: vk::CommandPool, pixels: &RgbaImage) -> Result<Image> {
    let extent = vk::Extent2D {
        width: pixels.width(),
        height: pixels.height(),
    };
    let (image, memory) = create_image(
        device,
        &ImageDesc {
            extent,
            layers: 1,
            flags: vk::ImageCreateFlags::empty(),
            format: TEXTURE_FORMAT,
            usage: vk::ImageUsageFlags::TRANSFER_DST | vk::ImageUsageFlags::SAMPLED,
        },
    )?;

    upload_layers(device, pool, image, extent, 1, pixels.as_raw())?;
    let view = create_image_view(&device.device, image, TEXTURE_FORMAT, vk::ImageAspectFlags::COLOR)?;

    Ok(Image { image, memory, view })
}

/// Six-layer cube-compatible image, faces in +X, -X, +Y, -Y, +Z, -Z order
pub fn create_cubemap(
    device: &VulkanDevice,
    pool: vk::CommandPool,
    faces: &[RgbaImage; 6],
) -> Result<Image> {
    let sizes = faces.each_ref().map(|face| face.dimensions());
    let (width, height) = check_cubemap_faces(&sizes)?;
    let extent = vk::Extent2D { width, height };

    let (image, memory) = create_image(
        device,
        &ImageDesc {
            extent,
            layers: 6,
            flags: vk::ImageCreateFlags::CUBE_COMPATIBLE,
            format: TEXTURE_FORMAT,
            usage: vk::ImageUsageFlags::TRANSFER_DST | vk::ImageUsageFlags::SAMPLED,
        },
    )?;

    let pixels: Vec<u8> = faces.iter().flat_map(|face| face.as_raw().iter().copied()).collect();
    upload_layers(device, pool, image, extent, 6, &pixels)?;

    let view = create_view(
        &device.device,
        image,
        vk::ImageViewType::CUBE,
        TEXTURE_FORMAT,
        vk::ImageAspectFlags::COLOR,
        6,
    )?;

    log::info!("Created {}x{} cubemap", width, height);
    Ok(Image { image, memory, view })
}

/// Depth attachment for the current extent, already in attachment layout
pub fn create_depth_buffer(
    device: &VulkanDevice,
    pool: vk::CommandPool,
    format: vk::Format,
    extent: vk::Extent2D,
) -> Result<Image> {
    let (image, memory) = create_image(
        device,
        &ImageDesc {
            extent,
            layers: 1,
            flags: vk::ImageCreateFlags::empty(),
            format,
            usage: vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT,
        },
    )?;

    let view = create_image_view(&device.device, image, format, vk::ImageAspectFlags::DEPTH)?;

    transition_image_layout(
        device,
        pool,
        image,
        format,
        1,
        vk::ImageLayout::UNDEFINED,
        vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
    )?;

    Ok(Image { image, memory, view })
}

/// Linear filtering, repeat addressing, anisotropy up to what the GPU allows
pub fn create_texture_sampler(device: &VulkanDevice) -> Result<vk::Sampler> {
    let max_anisotropy = MAX_ANISOTROPY.min(device.properties.limits.max_sampler_anisotropy);

    let sampler_info = vk::SamplerCreateInfo::builder()
        .mag_filter(vk::Filter::LINEAR)
        .min_filter(vk::Filter::LINEAR)
        .address_mode_u(vk::SamplerAddressMode::REPEAT)
        .address_mode_v(vk::SamplerAddressMode::REPEAT)
        .address_mode_w(vk::SamplerAddressMode::REPEAT)
        .anisotropy_enable(true)
        .max_anisotropy(max_anisotropy)
        .border_color(vk::BorderColor::INT_OPAQUE_BLACK)
        .unnormalized_coordinates(false)
        .compare_enable(false)
        .compare_op(vk::CompareOp::ALWAYS)
        .mipmap_mode(vk::SamplerMipmapMode::LINEAR);

    unsafe { device.device.create_sampler(&sampler_info, None) }
        .context("Failed to create texture sampler")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn optimal(features: vk::FormatFeatureFlags) -> vk::FormatProperties {
        vk::FormatProperties {
            optimal_tiling_features: features,
            ..Default::default()
        }
    }

    #[test]
    fn first_supported_depth_format_wins() {
        let chosen = pick_supported_format(
            &DEPTH_CANDIDATES,
            vk::ImageTiling::OPTIMAL,
            vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT,
            |format| {
                if format == vk::Format::D32_SFLOAT {
                    optimal(vk::FormatFeatureFlags::SAMPLED_IMAGE)
                } else {
                    optimal(vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT)
                }
            },
        )
        .unwrap();

        assert_eq!(chosen, vk::Format::D32_SFLOAT_S8_UINT);
        assert!(has_stencil_component(chosen));
    }

    #[test]
    fn linear_tiling_checks_linear_features() {
        let result = pick_supported_format(
            &[vk::Format::D32_SFLOAT],
            vk::ImageTiling::LINEAR,
            vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT,
            |_| optimal(vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT),
        );
        assert!(result.is_err());
    }

    #[test]
    fn no_supported_depth_format_is_fatal() {
        let err = pick_supported_format(
            &DEPTH_CANDIDATES,
            vk::ImageTiling::OPTIMAL,
            vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT,
            |_| vk::FormatProperties::default(),
        )
        .unwrap_err();

        match err {
            InitError::NoSupportedFormat { candidates } => assert_eq!(candidates.len(), 3),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn texture_upload_transitions_are_supported() {
        let to_transfer = transition_masks(
            vk::ImageLayout::UNDEFINED,
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
        )
        .unwrap();
        assert_eq!(to_transfer.dst_access, vk::AccessFlags::TRANSFER_WRITE);
        assert_eq!(to_transfer.dst_stage, vk::PipelineStageFlags::TRANSFER);

        let to_shader = transition_masks(
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        )
        .unwrap();
        assert_eq!(to_shader.src_access, vk::AccessFlags::TRANSFER_WRITE);
        assert_eq!(to_shader.dst_stage, vk::PipelineStageFlags::FRAGMENT_SHADER);
    }

    #[test]
    fn depth_transition_targets_early_fragment_tests() {
        let masks = transition_masks(
            vk::ImageLayout::UNDEFINED,
            vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
        )
        .unwrap();
        assert_eq!(masks.dst_stage, vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS);
        assert!(masks
            .dst_access
            .contains(vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE));
    }

    #[test]
    fn other_transitions_are_rejected() {
        let err = transition_masks(
            vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
        )
        .unwrap_err();
        assert!(matches!(err, InitError::UnsupportedTransition { .. }));
    }

    #[test]
    fn cubemap_faces_must_match() {
        let mut sizes = [(512, 512); 6];
        assert_eq!(check_cubemap_faces(&sizes).unwrap(), (512, 512));

        sizes[4] = (256, 512);
        match check_cubemap_faces(&sizes).unwrap_err() {
            InitError::CubemapFaceMismatch {
                face,
                expected,
                actual,
            } => {
                assert_eq!(face, 4);
                assert_eq!(expected, (512, 512));
                assert_eq!(actual, (256, 512));
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
