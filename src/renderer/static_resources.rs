// Static resources - everything built once at startup and kept until exit
//
// Meshes, textures, the sampler, uniform buffers and descriptor sets do not
// depend on the swapchain, so recreation never touches them.

use anyhow::{Context, Result};
use ash::vk;
use image::RgbaImage;

use crate::assets::{self, MeshData};
use crate::backend::buffer::{self, Buffer};
use crate::backend::descriptor;
use crate::backend::image::{self as gpu_image, Image};
use crate::backend::VulkanDevice;
use crate::config::AssetConfig;
use crate::scene::{self, Geometry, Material, Scene, UniformBufferObject, UniformSlot, SKYBOX_FACES};

/// Device-local vertex and index buffers for one mesh
#[derive(Debug, Clone, Copy)]
pub struct GpuMesh {
    pub vertices: Buffer,
    pub indices: Buffer,
    pub index_count: u32,
}

impl GpuMesh {
    fn upload(device: &VulkanDevice, pool: vk::CommandPool, data: &MeshData) -> Result<Self> {
        let vertices = buffer::create_device_local_buffer(
            device,
            pool,
            vk::BufferUsageFlags::VERTEX_BUFFER,
            &data.vertices,
        )?;
        let indices = match buffer::create_device_local_buffer(
            device,
            pool,
            vk::BufferUsageFlags::INDEX_BUFFER,
            &data.indices,
        ) {
            Ok(indices) => indices,
            Err(e) => {
                vertices.destroy(&device.device);
                return Err(e);
            }
        };

        Ok(Self {
            vertices,
            indices,
            index_count: data.indices.len() as u32,
        })
    }

    fn destroy(&self, device: &ash::Device) {
        self.indices.destroy(device);
        self.vertices.destroy(device);
    }
}

/// CPU-side asset data, fully decoded before any GPU object exists
struct LoadedAssets {
    meshes: Vec<MeshData>,
    /// Indexed by `Material::index`; `None` for the skybox
    textures: Vec<Option<RgbaImage>>,
    skybox: [RgbaImage; 6],
}

impl LoadedAssets {
    fn load(scene: &Scene, assets: &AssetConfig) -> Result<Self> {
        let meshes = scene
            .meshes
            .iter()
            .map(|source| match &source.geometry {
                Geometry::Inline { vertices, indices } => Ok(MeshData {
                    vertices: vertices.clone(),
                    indices: indices.clone(),
                }),
                Geometry::Obj(path) => assets::load_obj(&assets.resolve(path))
                    .with_context(|| format!("Failed to load mesh '{}'", source.name)),
            })
            .collect::<Result<Vec<_>>>()?;

        let textures = Material::ALL
            .iter()
            .map(|&material| {
                scene::texture_path(material)
                    .map(|path| assets::load_rgba(&assets.resolve(path)))
                    .transpose()
            })
            .collect::<Result<Vec<_>>>()?;

        let faces = SKYBOX_FACES
            .iter()
            .map(|face| assets::load_rgba(&assets.resolve(face)))
            .collect::<Result<Vec<_>>>()?;
        let skybox: [RgbaImage; 6] = faces
            .try_into()
            .map_err(|_| anyhow::anyhow!("Skybox needs exactly six faces"))?;

        Ok(Self {
            meshes,
            textures,
            skybox,
        })
    }
}

pub struct StaticResources {
    pub meshes: Vec<GpuMesh>,
    /// Indexed by `UniformSlot::index`
    pub uniform_buffers: Vec<Buffer>,
    /// Indexed by `Material::index`; the skybox entry is the cubemap
    pub textures: Vec<Image>,
    pub sampler: vk::Sampler,
    pub descriptor_set_layout: vk::DescriptorSetLayout,
    pub descriptor_pool: vk::DescriptorPool,
    /// Indexed by `Material::index`
    pub descriptor_sets: Vec<vk::DescriptorSet>,
}

impl StaticResources {
    /// Load every asset from disk and upload it.
    ///
    /// Objects created before a failure are released again before the error
    /// is returned.
    pub fn new(
        device: &VulkanDevice,
        pool: vk::CommandPool,
        scene: &Scene,
        assets: &AssetConfig,
    ) -> Result<Self> {
        let loaded = LoadedAssets::load(scene, assets)?;

        let mut resources = Self {
            meshes: Vec::with_capacity(loaded.meshes.len()),
            uniform_buffers: Vec::with_capacity(UniformSlot::ALL.len()),
            textures: Vec::with_capacity(Material::ALL.len()),
            sampler: vk::Sampler::null(),
            descriptor_set_layout: vk::DescriptorSetLayout::null(),
            descriptor_pool: vk::DescriptorPool::null(),
            descriptor_sets: Vec::new(),
        };

        match resources.upload(device, pool, &loaded) {
            Ok(()) => Ok(resources),
            Err(e) => {
                resources.destroy(&device.device);
                Err(e)
            }
        }
    }

    fn upload(&mut self, device: &VulkanDevice, pool: vk::CommandPool, loaded: &LoadedAssets) -> Result<()> {
        // ─────────────────────────────────────────────────────────────────────
        // STEP 1: Geometry
        // ─────────────────────────────────────────────────────────────────────
        for data in &loaded.meshes {
            self.meshes.push(GpuMesh::upload(device, pool, data)?);
        }

        // ─────────────────────────────────────────────────────────────────────
        // STEP 2: Uniform buffers, rewritten every frame
        // ─────────────────────────────────────────────────────────────────────
        for _ in UniformSlot::ALL {
            self.uniform_buffers
                .push(buffer::create_uniform_buffer::<UniformBufferObject>(device)?);
        }

        // ─────────────────────────────────────────────────────────────────────
        // STEP 3: Textures and the skybox cubemap
        // ─────────────────────────────────────────────────────────────────────
        for (material, pixels) in Material::ALL.iter().zip(&loaded.textures) {
            let texture = match pixels {
                Some(pixels) => gpu_image::create_texture(device, pool, pixels),
                None => gpu_image::create_cubemap(device, pool, &loaded.skybox),
            }
            .with_context(|| format!("Failed to upload {:?} texture", material))?;
            self.textures.push(texture);
        }
        self.sampler = gpu_image::create_texture_sampler(device)?;

        // ─────────────────────────────────────────────────────────────────────
        // STEP 4: One descriptor set per material
        // ─────────────────────────────────────────────────────────────────────
        self.descriptor_set_layout = descriptor::create_descriptor_set_layout(device)?;
        self.descriptor_pool = descriptor::create_descriptor_pool(device, Material::ALL.len() as u32)?;
        for material in Material::ALL {
            let set = descriptor::create_descriptor_set(
                device,
                self.descriptor_pool,
                self.descriptor_set_layout,
                &self.uniform_buffers[material.uniform_slot().index()],
                self.textures[material.index()].view,
                self.sampler,
            )?;
            self.descriptor_sets.push(set);
        }

        log::info!(
            "Uploaded {} meshes, {} textures, {} descriptor sets",
            self.meshes.len(),
            self.textures.len(),
            self.descriptor_sets.len()
        );
        Ok(())
    }

    pub fn uniform_buffer(&self, slot: UniformSlot) -> &Buffer {
        &self.uniform_buffers[slot.index()]
    }

    pub fn descriptor_set(&self, material: Material) -> vk::DescriptorSet {
        self.descriptor_sets[material.index()]
    }

    /// Release everything in reverse creation order. Null handles are skipped
    /// by the driver, so a partially built set is fine.
    pub fn destroy(&mut self, device: &ash::Device) {
        unsafe {
            // Sets go with the pool
            device.destroy_descriptor_pool(self.descriptor_pool, None);
            device.destroy_descriptor_set_layout(self.descriptor_set_layout, None);
            device.destroy_sampler(self.sampler, None);
        }
        self.descriptor_sets.clear();
        self.descriptor_pool = vk::DescriptorPool::null();
        self.descriptor_set_layout = vk::DescriptorSetLayout::null();
        self.sampler = vk::Sampler::null();

        for texture in self.textures.drain(..).rev() {
            texture.destroy(device);
        }
        for uniform in self.uniform_buffers.drain(..).rev() {
            uniform.destroy(device);
        }
        for mesh in self.meshes.drain(..).rev() {
            mesh.destroy(device);
        }
    }
}
