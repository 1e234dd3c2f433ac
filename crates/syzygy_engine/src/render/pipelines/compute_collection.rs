//! Swappable compute backgrounds
//!
//! A collection of compute shaders that all write the draw image. Their push-constant blocks
//! differ, so each variant keeps a byte buffer sized from reflection and edited through the
//! reflected field list. One variant is selected at a time, and a variant's shader can be
//! reloaded while frames are in flight.

use ash::vk;
use std::sync::Arc;

use crate::render::backends::vulkan::state::DeletionQueue;
use crate::render::backends::vulkan::{
    CommandRecorder, DescriptorSetLayout, GpuDevice, Pipeline, PipelineLayout, ReflectedField, ReflectedType,
    ScalarKind, ShaderBinary, ShaderLibrary, ShaderModule, VulkanResult,
};

/// Two-colour vertical gradient
pub const GRADIENT_SHADER: &str = "gradient.comp";
/// Ground grid over a flat background
pub const GRID_SHADER: &str = "grid.comp";

/// Variants loaded by default
pub const DEFAULT_VARIANTS: [&str; 2] = [GRADIENT_SHADER, GRID_SHADER];

/// One shader of the collection with its push-constant bytes
pub struct ComputeVariant {
    name: String,
    pipeline: Pipeline,
    layout: PipelineLayout,
    push_type: Option<ReflectedType>,
    push_bytes: Vec<u8>,
}

impl ComputeVariant {
    fn build(
        device: &Arc<dyn GpuDevice>,
        binary: &ShaderBinary,
        draw_image_layout: &DescriptorSetLayout,
    ) -> VulkanResult<Self> {
        let module = ShaderModule::new(device, binary)?;
        let push_size = binary.push_constant_size();
        let layout = PipelineLayout::new(
            device,
            &[draw_image_layout.handle()],
            vk::ShaderStageFlags::COMPUTE,
            push_size,
        )?;
        let pipeline = Pipeline::compute(device, &layout, &module)?;
        Ok(Self {
            name: binary.name().to_string(),
            pipeline,
            layout,
            push_type: binary.push_constant().cloned(),
            push_bytes: vec![0; push_size as usize],
        })
    }

    /// Shader name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Flattened push-constant fields
    pub fn fields(&self) -> Vec<ReflectedField> {
        self.push_type.as_ref().map(ReflectedType::fields).unwrap_or_default()
    }

    /// Raw push-constant bytes
    pub fn push_bytes(&self) -> &[u8] {
        &self.push_bytes
    }

    /// Raw push-constant bytes, for editors that write fields themselves
    pub fn push_bytes_mut(&mut self) -> &mut [u8] {
        &mut self.push_bytes
    }

    /// Write float components into the field at `path`
    ///
    /// Returns false if the field does not exist, is not 32-bit float, or has fewer
    /// components than `values`.
    pub fn set_floats(&mut self, path: &str, values: &[f32]) -> bool {
        let Some(field) = self.fields().into_iter().find(|f| f.path == path) else {
            log::warn!("{} has no push constant field '{path}'", self.name);
            return false;
        };
        let components = match field.kind {
            ReflectedType::Scalar(ScalarKind::Float { bits: 32 }) => 1,
            ReflectedType::Vector { scalar: ScalarKind::Float { bits: 32 }, count } => count as usize,
            ref other => {
                log::warn!("{}: field '{path}' is {other:?}, not f32", self.name);
                return false;
            }
        };
        if values.len() > components {
            log::warn!(
                "{}: field '{path}' has {components} components, got {}",
                self.name,
                values.len()
            );
            return false;
        }
        let start = field.offset as usize;
        let bytes: &[u8] = bytemuck::cast_slice(values);
        self.push_bytes[start..start + bytes.len()].copy_from_slice(bytes);
        true
    }

    /// Read float components of the field at `path`
    pub fn floats(&self, path: &str) -> Option<Vec<f32>> {
        let field = self.fields().into_iter().find(|f| f.path == path)?;
        let count = match field.kind {
            ReflectedType::Scalar(ScalarKind::Float { bits: 32 }) => 1,
            ReflectedType::Vector { scalar: ScalarKind::Float { bits: 32 }, count } => count as usize,
            _ => return None,
        };
        let start = field.offset as usize;
        let bytes = self.push_bytes.get(start..start + count * 4)?;
        Some(
            bytes
                .chunks_exact(4)
                .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
                .collect(),
        )
    }
}

/// Compute variants sharing the draw image layout, with a selector
pub struct ComputeCollectionPipeline {
    variants: Vec<ComputeVariant>,
    selected: usize,
}

impl ComputeCollectionPipeline {
    /// Load every shader in `names` against the draw image layout
    pub fn new(
        device: &Arc<dyn GpuDevice>,
        shaders: &dyn ShaderLibrary,
        draw_image_layout: &DescriptorSetLayout,
        names: &[&str],
    ) -> VulkanResult<Self> {
        let variants = names
            .iter()
            .map(|name| ComputeVariant::build(device, &shaders.load(name)?, draw_image_layout))
            .collect::<VulkanResult<Vec<_>>>()?;
        log::debug!("Loaded {} compute background variants", variants.len());
        Ok(Self { variants, selected: 0 })
    }

    /// All variants
    pub fn variants(&self) -> &[ComputeVariant] {
        &self.variants
    }

    /// Index of the variant that records
    pub fn selected(&self) -> usize {
        self.selected
    }

    /// Select variant `index`; out-of-range requests are ignored
    pub fn select(&mut self, index: usize) -> bool {
        if index < self.variants.len() {
            self.selected = index;
            true
        } else {
            log::warn!(
                "Compute variant {index} out of range ({} variants), keeping {}",
                self.variants.len(),
                self.selected
            );
            false
        }
    }

    /// Variant `index`, mutably
    pub fn variant_mut(&mut self, index: usize) -> Option<&mut ComputeVariant> {
        self.variants.get_mut(index)
    }

    /// Selected variant, mutably
    pub fn selected_mut(&mut self) -> Option<&mut ComputeVariant> {
        self.variants.get_mut(self.selected)
    }

    /// Rebuild variant `index` from `shader`, keeping as many push bytes as still fit
    ///
    /// The replaced pipeline may still be referenced by frames in flight, so it is parked in
    /// `retired` instead of being destroyed here.
    pub fn swap_shader(
        &mut self,
        device: &Arc<dyn GpuDevice>,
        index: usize,
        shader: &ShaderBinary,
        draw_image_layout: &DescriptorSetLayout,
        retired: &mut DeletionQueue,
    ) -> VulkanResult<bool> {
        if index >= self.variants.len() {
            log::warn!("Cannot swap shader of compute variant {index}: out of range");
            return Ok(false);
        }
        let mut replacement = ComputeVariant::build(device, shader, draw_image_layout)?;
        let previous = &self.variants[index];
        let keep = previous.push_bytes.len().min(replacement.push_bytes.len());
        replacement.push_bytes[..keep].copy_from_slice(&previous.push_bytes[..keep]);

        log::info!("Compute variant {index}: {} -> {}", previous.name, replacement.name);
        let old = std::mem::replace(&mut self.variants[index], replacement);
        retired.defer_drop(old);
        Ok(true)
    }

    /// Dispatch the selected variant over `extent`; the draw image must be in `GENERAL`
    pub fn record_draw_commands(
        &self,
        recorder: &mut CommandRecorder<'_>,
        draw_image_set: vk::DescriptorSet,
        extent: vk::Extent2D,
    ) {
        let Some(variant) = self.variants.get(self.selected) else {
            return;
        };
        recorder.bind_pipeline(vk::PipelineBindPoint::COMPUTE, variant.pipeline.handle());
        recorder.bind_descriptor_sets(vk::PipelineBindPoint::COMPUTE, variant.layout.handle(), 0, &[draw_image_set]);
        recorder.push_constant_bytes(variant.layout.handle(), vk::ShaderStageFlags::COMPUTE, &variant.push_bytes);
        recorder.dispatch_2d(extent);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::backends::vulkan::testing::{Command, MockGpu};
    use crate::render::backends::vulkan::DescriptorLayoutBuilder;
    use crate::render::pipelines::test_support::shader_library;

    fn collection(gpu: &MockGpu) -> (ComputeCollectionPipeline, DescriptorSetLayout) {
        let layout = DescriptorLayoutBuilder::new()
            .add_binding(0, vk::DescriptorType::STORAGE_IMAGE, vk::ShaderStageFlags::COMPUTE)
            .build(&gpu.device, vk::DescriptorSetLayoutCreateFlags::empty())
            .unwrap();
        let pipeline = ComputeCollectionPipeline::new(&gpu.device, &shader_library(), &layout, &DEFAULT_VARIANTS).unwrap();
        (pipeline, layout)
    }

    #[test]
    fn test_push_buffers_sized_per_variant() {
        let gpu = MockGpu::new();
        let (pipeline, _layout) = collection(&gpu);
        assert_eq!(pipeline.variants()[0].push_bytes().len(), 64);
        assert_eq!(pipeline.variants()[1].push_bytes().len(), 36);
    }

    #[test]
    fn test_out_of_range_selection_keeps_current() {
        let gpu = MockGpu::new();
        let (mut pipeline, _layout) = collection(&gpu);
        assert!(pipeline.select(1));
        assert!(!pipeline.select(2));
        assert_eq!(pipeline.selected(), 1);
    }

    #[test]
    fn test_field_edits_land_at_reflected_offsets() {
        let gpu = MockGpu::new();
        let (mut pipeline, _layout) = collection(&gpu);
        let grid = pipeline.variant_mut(1).unwrap();

        assert!(grid.set_floats("spacing", &[2.5]));
        assert!(grid.set_floats("background", &[0.1, 0.2, 0.3, 1.0]));
        assert!(!grid.set_floats("spacing", &[1.0, 2.0]));
        assert!(!grid.set_floats("missing", &[1.0]));

        assert_eq!(grid.floats("spacing"), Some(vec![2.5]));
        assert_eq!(&grid.push_bytes()[32..36], &2.5f32.to_le_bytes());
        assert_eq!(grid.floats("background"), Some(vec![0.1, 0.2, 0.3, 1.0]));
    }

    #[test]
    fn test_selected_variant_pushes_its_bytes() {
        let gpu = MockGpu::new();
        let (mut pipeline, _layout) = collection(&gpu);
        pipeline.select(1);
        pipeline.selected_mut().unwrap().set_floats("spacing", &[4.0]);

        let cmd = gpu.begin_commands();
        let mut recorder = CommandRecorder::new(gpu.device.as_ref(), cmd);
        pipeline.record_draw_commands(&mut recorder, vk::DescriptorSet::null(), vk::Extent2D { width: 64, height: 32 });

        let commands = gpu.mock.recorded(cmd);
        let pushed = commands.iter().find_map(|c| match c {
            Command::PushConstants(bytes) => Some(bytes.clone()),
            _ => None,
        });
        assert_eq!(pushed.map(|b| b.len()), Some(36));
        assert_eq!(commands.last(), Some(&Command::Dispatch(4, 2, 1)));
    }

    #[test]
    fn test_swap_defers_old_pipeline_until_flush() {
        let gpu = MockGpu::new();
        let (mut pipeline, layout) = collection(&gpu);
        pipeline.variant_mut(0).unwrap().set_floats("top", &[1.0, 0.0, 0.0, 1.0]);
        let mut retired = DeletionQueue::new();
        let replacement = shader_library().load(GRADIENT_SHADER).unwrap();

        assert!(pipeline.swap_shader(&gpu.device, 0, &replacement, &layout, &mut retired).unwrap());
        assert_eq!(gpu.mock.live("pipeline"), 3);
        assert_eq!(pipeline.variants()[0].floats("top"), Some(vec![1.0, 0.0, 0.0, 1.0]));

        retired.flush();
        assert_eq!(gpu.mock.live("pipeline"), 2);
        assert!(!pipeline.swap_shader(&gpu.device, 5, &replacement, &layout, &mut retired).unwrap());
    }
}
