use std::path::Path;

use ash::vk;

use crate::renderer::error::RenderResult;

const SHADERS_DIR: &str = "shaders-built";

/// SPIR-V for one pipeline stage, registered before the first display
/// build. Modules are created from this bytecode when a pipeline is
/// constructed and destroyed as soon as the pipeline exists.
pub struct ShaderStage {
    pub code: Vec<u32>,
    pub stage: vk::ShaderStageFlags,
}

/// Reads `<file_name>.spv` from the build-time shader directory.
pub fn load_stage_code(file_name: &str) -> std::io::Result<Vec<u32>> {
    let bytes = std::fs::read(Path::new(SHADERS_DIR).join(format!("{file_name}.spv")))?;
    ash::util::read_spv(&mut std::io::Cursor::new(bytes))
}

/// Shader modules alive only for the duration of a pipeline build.
pub(crate) struct ShaderModules<'a> {
    modules: Vec<(vk::ShaderModule, vk::ShaderStageFlags)>,
    device: &'a ash::Device,
}

impl<'a> ShaderModules<'a> {
    pub fn create(device: &'a ash::Device, stages: &[ShaderStage]) -> RenderResult<Self> {
        let mut this = Self {
            modules: Vec::with_capacity(stages.len()),
            device,
        };
        for stage in stages {
            let info = vk::ShaderModuleCreateInfo::default().code(&stage.code);
            let module = unsafe { device.create_shader_module(&info, None)? };
            this.modules.push((module, stage.stage));
        }
        Ok(this)
    }

    pub fn stage_infos(&self) -> Vec<vk::PipelineShaderStageCreateInfo<'_>> {
        self.modules
            .iter()
            .map(|(module, stage)| {
                vk::PipelineShaderStageCreateInfo::default()
                    .stage(*stage)
                    .module(*module)
                    .name(c"main")
            })
            .collect()
    }
}

impl Drop for ShaderModules<'_> {
    fn drop(&mut self) {
        for (module, _) in self.modules.drain(..) {
            unsafe {
                self.device.destroy_shader_module(module, None);
            }
        }
    }
}
