use std::sync::Arc;

use ash::vk;

use crate::renderer::bindings::BindingRegistry;
use crate::renderer::context::RenderContext;
use crate::renderer::error::{RenderError, RenderResult};
use crate::renderer::geometry::GeometryBuffers;
use crate::renderer::resources::image::{self, Image};
use crate::renderer::resources::upload::TransferContext;
use crate::renderer::scene::Vertex;
use crate::renderer::shader::{ShaderModules, ShaderStage};
use crate::renderer::swapchain::Swapchain;

/// Everything tied to one swapchain generation: render pass, depth
/// attachment, framebuffers, the graphics pipeline, and the command
/// buffers recorded against them. Torn down and rebuilt as a single unit.
pub struct PipelineBundle {
    render_pass: vk::RenderPass,
    framebuffers: Vec<vk::Framebuffer>,
    pipeline_layout: vk::PipelineLayout,
    pipeline: vk::Pipeline,
    command_pool: vk::CommandPool,
    command_buffers: Vec<vk::CommandBuffer>,
    extent: vk::Extent2D,
    depth: Image,
    device: Arc<ash::Device>,
}

impl PipelineBundle {
    pub fn new(
        ctx: &RenderContext,
        swapchain: &Swapchain,
        descriptor_layout: vk::DescriptorSetLayout,
        stages: &[ShaderStage],
        upload: &TransferContext,
    ) -> RenderResult<Self> {
        let device = Arc::clone(&ctx.device);
        let extent = swapchain.extent;

        let depth_format = image::find_depth_format(ctx)?;
        let render_pass = create_render_pass(&device, swapchain.format, depth_format)?;
        let depth = Image::new_depth(ctx, upload, extent)?;

        let mut framebuffers = Vec::with_capacity(swapchain.views.len());
        for view in &swapchain.views {
            let attachments = [*view, depth.view];
            let info = vk::FramebufferCreateInfo::default()
                .render_pass(render_pass)
                .attachments(&attachments)
                .width(extent.width)
                .height(extent.height)
                .layers(1);
            framebuffers.push(unsafe { device.create_framebuffer(&info, None)? });
        }

        let pipeline_layout = {
            let set_layouts = [descriptor_layout];
            let info = vk::PipelineLayoutCreateInfo::default().set_layouts(&set_layouts);
            unsafe { device.create_pipeline_layout(&info, None)? }
        };
        let pipeline = create_graphics_pipeline(&device, render_pass, pipeline_layout, extent, stages)?;

        let command_pool = {
            let info = vk::CommandPoolCreateInfo::default()
                .queue_family_index(ctx.queue_families.graphics);
            unsafe { device.create_command_pool(&info, None)? }
        };
        let command_buffers = {
            let info = vk::CommandBufferAllocateInfo::default()
                .command_pool(command_pool)
                .level(vk::CommandBufferLevel::PRIMARY)
                .command_buffer_count(framebuffers.len() as u32);
            unsafe { device.allocate_command_buffers(&info)? }
        };

        Ok(Self {
            render_pass,
            framebuffers,
            pipeline_layout,
            pipeline,
            command_pool,
            command_buffers,
            extent,
            depth,
            device,
        })
    }

    /// Records the per-image draw commands. Runs exactly once per bundle,
    /// after the geometry buffers and descriptor sets for this generation
    /// exist.
    pub fn record_commands(
        &mut self,
        geometry: &GeometryBuffers,
        registry: &BindingRegistry,
    ) -> RenderResult<()> {
        let clear_values = [
            vk::ClearValue {
                color: vk::ClearColorValue {
                    float32: [0.0, 0.0, 0.0, 1.0],
                },
            },
            vk::ClearValue {
                depth_stencil: vk::ClearDepthStencilValue {
                    depth: 1.0,
                    stencil: 0,
                },
            },
        ];

        for (image_index, (cmd, framebuffer)) in self
            .command_buffers
            .iter()
            .zip(&self.framebuffers)
            .enumerate()
        {
            let begin_info = vk::CommandBufferBeginInfo::default();
            let pass_info = vk::RenderPassBeginInfo::default()
                .render_pass(self.render_pass)
                .framebuffer(*framebuffer)
                .render_area(vk::Rect2D {
                    offset: vk::Offset2D::default(),
                    extent: self.extent,
                })
                .clear_values(&clear_values);

            unsafe {
                self.device.begin_command_buffer(*cmd, &begin_info)?;
                self.device
                    .cmd_begin_render_pass(*cmd, &pass_info, vk::SubpassContents::INLINE);
                self.device
                    .cmd_bind_pipeline(*cmd, vk::PipelineBindPoint::GRAPHICS, self.pipeline);

                if let (Some(vertex_buffer), Some(index_buffer)) =
                    (geometry.vertex_buffer(), geometry.index_buffer())
                {
                    self.device
                        .cmd_bind_vertex_buffers(*cmd, 0, &[vertex_buffer], &[0]);
                    self.device.cmd_bind_index_buffer(
                        *cmd,
                        index_buffer,
                        0,
                        vk::IndexType::UINT32,
                    );
                    if let Some(set) = registry.set_for_image(image_index as u32) {
                        self.device.cmd_bind_descriptor_sets(
                            *cmd,
                            vk::PipelineBindPoint::GRAPHICS,
                            self.pipeline_layout,
                            0,
                            &[set],
                            &[],
                        );
                    }
                    self.device
                        .cmd_draw_indexed(*cmd, geometry.index_count(), 1, 0, 0, 0);
                }

                self.device.cmd_end_render_pass(*cmd);
                self.device.end_command_buffer(*cmd)?;
            }
        }

        Ok(())
    }

    pub fn command_buffer(&self, image_index: u32) -> Option<vk::CommandBuffer> {
        self.command_buffers.get(image_index as usize).copied()
    }
}

impl Drop for PipelineBundle {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_command_pool(self.command_pool, None);
            self.device.destroy_pipeline(self.pipeline, None);
            self.device
                .destroy_pipeline_layout(self.pipeline_layout, None);
            for framebuffer in self.framebuffers.drain(..) {
                self.device.destroy_framebuffer(framebuffer, None);
            }
            self.device.destroy_render_pass(self.render_pass, None);
        }
        // The depth image drops itself after the framebuffers are gone.
    }
}

fn create_render_pass(
    device: &ash::Device,
    color_format: vk::Format,
    depth_format: vk::Format,
) -> RenderResult<vk::RenderPass> {
    let attachments = [
        vk::AttachmentDescription::default()
            .format(color_format)
            .samples(vk::SampleCountFlags::TYPE_1)
            .load_op(vk::AttachmentLoadOp::CLEAR)
            .store_op(vk::AttachmentStoreOp::STORE)
            .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
            .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
            .initial_layout(vk::ImageLayout::UNDEFINED)
            .final_layout(vk::ImageLayout::PRESENT_SRC_KHR),
        vk::AttachmentDescription::default()
            .format(depth_format)
            .samples(vk::SampleCountFlags::TYPE_1)
            .load_op(vk::AttachmentLoadOp::CLEAR)
            .store_op(vk::AttachmentStoreOp::DONT_CARE)
            .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
            .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
            .initial_layout(vk::ImageLayout::UNDEFINED)
            .final_layout(vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL),
    ];

    let color_refs = [vk::AttachmentReference {
        attachment: 0,
        layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
    }];
    let depth_ref = vk::AttachmentReference {
        attachment: 1,
        layout: vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
    };
    let subpasses = [vk::SubpassDescription::default()
        .pipeline_bind_point(vk::PipelineBindPoint::GRAPHICS)
        .color_attachments(&color_refs)
        .depth_stencil_attachment(&depth_ref)];

    // The color and depth writes of the previous frame on this image must
    // finish before this frame's clears begin.
    let dependencies = [vk::SubpassDependency::default()
        .src_subpass(vk::SUBPASS_EXTERNAL)
        .dst_subpass(0)
        .src_stage_mask(
            vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT
                | vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS,
        )
        .src_access_mask(vk::AccessFlags::empty())
        .dst_stage_mask(
            vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT
                | vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS,
        )
        .dst_access_mask(
            vk::AccessFlags::COLOR_ATTACHMENT_WRITE
                | vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE,
        )];

    let info = vk::RenderPassCreateInfo::default()
        .attachments(&attachments)
        .subpasses(&subpasses)
        .dependencies(&dependencies);
    Ok(unsafe { device.create_render_pass(&info, None)? })
}

fn create_graphics_pipeline(
    device: &ash::Device,
    render_pass: vk::RenderPass,
    pipeline_layout: vk::PipelineLayout,
    extent: vk::Extent2D,
    stages: &[ShaderStage],
) -> RenderResult<vk::Pipeline> {
    // Modules only need to outlive pipeline creation.
    let modules = ShaderModules::create(device, stages)?;
    let stage_infos = modules.stage_infos();

    let binding_descriptions = [Vertex::binding_description()];
    let attribute_descriptions = Vertex::attribute_descriptions();
    let vertex_input = vk::PipelineVertexInputStateCreateInfo::default()
        .vertex_binding_descriptions(&binding_descriptions)
        .vertex_attribute_descriptions(&attribute_descriptions);

    let input_assembly = vk::PipelineInputAssemblyStateCreateInfo::default()
        .topology(vk::PrimitiveTopology::TRIANGLE_LIST);

    let viewports = [vk::Viewport {
        x: 0.0,
        y: 0.0,
        width: extent.width as f32,
        height: extent.height as f32,
        min_depth: 0.0,
        max_depth: 1.0,
    }];
    let scissors = [vk::Rect2D {
        offset: vk::Offset2D::default(),
        extent,
    }];
    let viewport_state = vk::PipelineViewportStateCreateInfo::default()
        .viewports(&viewports)
        .scissors(&scissors);

    let rasterization = vk::PipelineRasterizationStateCreateInfo::default()
        .polygon_mode(vk::PolygonMode::FILL)
        .cull_mode(vk::CullModeFlags::NONE)
        .front_face(vk::FrontFace::COUNTER_CLOCKWISE)
        .line_width(1.0);

    let multisample = vk::PipelineMultisampleStateCreateInfo::default()
        .rasterization_samples(vk::SampleCountFlags::TYPE_1);

    let depth_stencil = vk::PipelineDepthStencilStateCreateInfo::default()
        .depth_test_enable(true)
        .depth_write_enable(true)
        .depth_compare_op(vk::CompareOp::LESS);

    let blend_attachments =
        [vk::PipelineColorBlendAttachmentState::default().color_write_mask(vk::ColorComponentFlags::RGBA)];
    let color_blend =
        vk::PipelineColorBlendStateCreateInfo::default().attachments(&blend_attachments);

    let info = vk::GraphicsPipelineCreateInfo::default()
        .stages(&stage_infos)
        .vertex_input_state(&vertex_input)
        .input_assembly_state(&input_assembly)
        .viewport_state(&viewport_state)
        .rasterization_state(&rasterization)
        .multisample_state(&multisample)
        .depth_stencil_state(&depth_stencil)
        .color_blend_state(&color_blend)
        .layout(pipeline_layout)
        .render_pass(render_pass)
        .subpass(0);

    let pipelines = unsafe {
        device
            .create_graphics_pipelines(vk::PipelineCache::null(), &[info], None)
            .map_err(|(_, err)| RenderError::from(err))?
    };
    Ok(pipelines[0])
}
