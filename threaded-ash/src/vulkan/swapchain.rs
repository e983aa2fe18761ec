//! Per-window presentation state: surface format, render pass, swapchain and
//! frame synchronisation.

use std::sync::Arc;

use ash::{Device, khr::swapchain as khr_swapchain, vk};
use tracing::{debug, trace, warn};

use super::{
    REQUESTED_COLOR_SPACE, REQUESTED_SURFACE_FORMATS, SharedVulkan, select_extent,
    select_image_count, select_present_mode, select_surface_format,
};
use crate::config::PresentPolicy;
use crate::error::{AppError, AppResult};

/// Frames recorded ahead of the GPU per window.
pub const FRAMES_IN_FLIGHT: usize = 2;

struct FrameSync {
    image_available: vk::Semaphore,
    render_finished: vk::Semaphore,
    fence: vk::Fence,
    command_buffer: vk::CommandBuffer,
}

struct Swapchain {
    handle: vk::SwapchainKHR,
    extent: vk::Extent2D,
    image_views: Vec<vk::ImageView>,
    framebuffers: Vec<vk::Framebuffer>,
}

/// An acquired swapchain image ready to be recorded into.
#[derive(Clone, Copy, Debug)]
pub struct AcquiredImage {
    pub image_index: u32,
    frame: usize,
}

/// Everything one window needs to present with the shared device.
///
/// Owned by the window's thread. The surface itself is created and destroyed by
/// the event-loop thread, so this type never destroys it.
pub struct WindowTarget {
    vulkan: Arc<SharedVulkan>,
    loader: khr_swapchain::Device,
    surface: vk::SurfaceKHR,
    surface_format: vk::SurfaceFormatKHR,
    present_mode: vk::PresentModeKHR,
    render_pass: vk::RenderPass,
    command_pool: vk::CommandPool,
    swapchain: Option<Swapchain>,
    frames: Vec<FrameSync>,
    images_in_flight: Vec<vk::Fence>,
    frame_index: usize,
    dirty: bool,
}

impl WindowTarget {
    /// Picks a format and present mode for `surface` and builds the first
    /// swapchain at `width` x `height` (deferred while either is zero).
    pub fn new(
        vulkan: Arc<SharedVulkan>,
        surface: vk::SurfaceKHR,
        present: PresentPolicy,
        width: u32,
        height: u32,
    ) -> AppResult<Self> {
        if !vulkan.supports_present(surface)? {
            return Err(AppError::NoPresentSupport);
        }

        let (formats, modes) = unsafe {
            let loader = vulkan.surface_loader();
            (
                loader.get_physical_device_surface_formats(vulkan.physical_device(), surface)?,
                loader
                    .get_physical_device_surface_present_modes(vulkan.physical_device(), surface)?,
            )
        };
        let surface_format =
            select_surface_format(&formats, &REQUESTED_SURFACE_FORMATS, REQUESTED_COLOR_SPACE)
                .ok_or(AppError::Vulkan(vk::Result::ERROR_FORMAT_NOT_SUPPORTED))?;
        let present_mode = select_present_mode(&modes, present.requested_modes());
        debug!(format = ?surface_format.format, ?present_mode, "Selected surface format");

        let device = vulkan.device();
        let loader = khr_swapchain::Device::new(vulkan.instance(), device);
        let render_pass = create_render_pass(device, surface_format.format)?;
        let command_pool = unsafe {
            device.create_command_pool(
                &vk::CommandPoolCreateInfo::default()
                    .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER)
                    .queue_family_index(vulkan.queue_family_index()),
                None,
            )?
        };

        let mut target = Self {
            vulkan,
            loader,
            surface,
            surface_format,
            present_mode,
            render_pass,
            command_pool,
            swapchain: None,
            frames: Vec::with_capacity(FRAMES_IN_FLIGHT),
            images_in_flight: Vec::new(),
            frame_index: 0,
            dirty: true,
        };
        // On failure `target` drops here and releases what was created so far.
        for _ in 0..FRAMES_IN_FLIGHT {
            let frame = create_frame_sync(target.vulkan.device(), command_pool)?;
            target.frames.push(frame);
        }
        target.rebuild(width, height)?;
        Ok(target)
    }

    pub fn surface_format(&self) -> vk::SurfaceFormatKHR {
        self.surface_format
    }

    pub fn present_mode(&self) -> vk::PresentModeKHR {
        self.present_mode
    }

    pub fn render_pass(&self) -> vk::RenderPass {
        self.render_pass
    }

    pub fn command_pool(&self) -> vk::CommandPool {
        self.command_pool
    }

    pub fn image_count(&self) -> usize {
        self.swapchain
            .as_ref()
            .map(|s| s.framebuffers.len())
            .unwrap_or(0)
    }

    /// Whether the swapchain must be rebuilt before the next frame.
    pub fn needs_rebuild(&self) -> bool {
        self.dirty || self.swapchain.is_none()
    }

    pub fn mark_dirty(&mut self) {
        self.dirty = true;
    }

    /// Recreates the swapchain for a framebuffer of `width` x `height`.
    ///
    /// Returns `false` and stays dirty while the framebuffer is zero-sized.
    pub fn rebuild(&mut self, width: u32, height: u32) -> AppResult<bool> {
        if width == 0 || height == 0 {
            self.dirty = true;
            return Ok(false);
        }

        self.vulkan.wait_idle()?;

        let device = self.vulkan.device();
        let caps = unsafe {
            self.vulkan
                .surface_loader()
                .get_physical_device_surface_capabilities(
                    self.vulkan.physical_device(),
                    self.surface,
                )?
        };
        let extent = select_extent(&caps, width, height);
        if extent.width == 0 || extent.height == 0 {
            self.dirty = true;
            return Ok(false);
        }
        let image_count = select_image_count(&caps, self.vulkan.min_image_count());

        let composite_alpha = [
            vk::CompositeAlphaFlagsKHR::OPAQUE,
            vk::CompositeAlphaFlagsKHR::INHERIT,
            vk::CompositeAlphaFlagsKHR::PRE_MULTIPLIED,
            vk::CompositeAlphaFlagsKHR::POST_MULTIPLIED,
        ]
        .into_iter()
        .find(|c| caps.supported_composite_alpha.contains(*c))
        .unwrap_or(vk::CompositeAlphaFlagsKHR::OPAQUE);

        let old = self.swapchain.take();
        let create_info = vk::SwapchainCreateInfoKHR::default()
            .surface(self.surface)
            .min_image_count(image_count)
            .image_format(self.surface_format.format)
            .image_color_space(self.surface_format.color_space)
            .image_extent(extent)
            .image_array_layers(1)
            .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT)
            .image_sharing_mode(vk::SharingMode::EXCLUSIVE)
            .pre_transform(caps.current_transform)
            .composite_alpha(composite_alpha)
            .present_mode(self.present_mode)
            .clipped(true)
            .old_swapchain(old.as_ref().map(|s| s.handle).unwrap_or_default());

        let created = unsafe { self.loader.create_swapchain(&create_info, None) };
        if let Some(old) = old {
            destroy_swapchain(device, &self.loader, old);
        }
        let handle = created?;

        let mut swapchain = Swapchain {
            handle,
            extent,
            image_views: Vec::new(),
            framebuffers: Vec::new(),
        };
        let built = (|| -> AppResult<()> {
            let images = unsafe { self.loader.get_swapchain_images(handle)? };
            swapchain.image_views =
                create_image_views(device, &images, self.surface_format.format)?;
            swapchain.framebuffers =
                create_framebuffers(device, self.render_pass, extent, &swapchain.image_views)?;
            Ok(())
        })();
        if let Err(e) = built {
            destroy_swapchain(device, &self.loader, swapchain);
            return Err(e);
        }

        debug!(
            width = extent.width,
            height = extent.height,
            images = swapchain.framebuffers.len(),
            "Swapchain rebuilt"
        );
        self.images_in_flight = vec![vk::Fence::null(); swapchain.framebuffers.len()];
        self.swapchain = Some(swapchain);
        self.frame_index = 0;
        self.dirty = false;
        Ok(true)
    }

    /// Waits for the next frame slot and acquires a swapchain image.
    ///
    /// `None` means the swapchain went out of date; it is marked dirty.
    pub fn acquire(&mut self) -> AppResult<Option<AcquiredImage>> {
        let Some(swapchain) = self.swapchain.as_ref() else {
            self.dirty = true;
            return Ok(None);
        };
        let device = self.vulkan.device();
        let frame = &self.frames[self.frame_index];

        unsafe { device.wait_for_fences(&[frame.fence], true, u64::MAX)? };

        let acquired = unsafe {
            self.loader.acquire_next_image(
                swapchain.handle,
                u64::MAX,
                frame.image_available,
                vk::Fence::null(),
            )
        };
        let image_index = match acquired {
            Ok((index, suboptimal)) => {
                if suboptimal {
                    self.dirty = true;
                }
                index
            }
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => {
                self.dirty = true;
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        };

        let in_flight = self.images_in_flight[image_index as usize];
        if in_flight != vk::Fence::null() && in_flight != frame.fence {
            unsafe { device.wait_for_fences(&[in_flight], true, u64::MAX)? };
        }
        self.images_in_flight[image_index as usize] = frame.fence;

        unsafe {
            device.reset_command_buffer(
                frame.command_buffer,
                vk::CommandBufferResetFlags::empty(),
            )?
        };

        trace!(image_index, frame = self.frame_index, "Acquired swapchain image");
        Ok(Some(AcquiredImage {
            image_index,
            frame: self.frame_index,
        }))
    }

    /// Records the render pass for `image`, clearing to `clear_color`
    /// (straight alpha) and letting `record_draws` fill it.
    pub fn record<F>(
        &self,
        image: AcquiredImage,
        clear_color: [f32; 4],
        record_draws: F,
    ) -> AppResult<()>
    where
        F: FnOnce(vk::CommandBuffer) -> AppResult<()>,
    {
        let swapchain = self
            .swapchain
            .as_ref()
            .ok_or(AppError::Vulkan(vk::Result::ERROR_OUT_OF_DATE_KHR))?;
        record_command_buffer(
            self.vulkan.device(),
            self.frames[image.frame].command_buffer,
            self.render_pass,
            swapchain.framebuffers[image.image_index as usize],
            swapchain.extent,
            super::premultiplied_clear(clear_color),
            record_draws,
        )
    }

    /// Submits the recorded frame and presents it, holding the queue lock.
    pub fn submit_and_present(&mut self, image: AcquiredImage) -> AppResult<()> {
        let Some(swapchain) = self.swapchain.as_ref() else {
            return Ok(());
        };
        let device = self.vulkan.device();
        let frame = &self.frames[image.frame];

        let wait_stages = [vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT];
        let submit_info = vk::SubmitInfo::default()
            .wait_semaphores(std::slice::from_ref(&frame.image_available))
            .wait_dst_stage_mask(&wait_stages)
            .command_buffers(std::slice::from_ref(&frame.command_buffer))
            .signal_semaphores(std::slice::from_ref(&frame.render_finished));
        let present_info = vk::PresentInfoKHR::default()
            .wait_semaphores(std::slice::from_ref(&frame.render_finished))
            .swapchains(std::slice::from_ref(&swapchain.handle))
            .image_indices(std::slice::from_ref(&image.image_index));

        let present = {
            let queue = self.vulkan.lock_queue();
            unsafe {
                device.reset_fences(&[frame.fence])?;
                device.queue_submit(*queue, std::slice::from_ref(&submit_info), frame.fence)?;
                self.loader.queue_present(*queue, &present_info)
            }
        };
        match present {
            Ok(false) => {}
            Ok(true) | Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => self.dirty = true,
            Err(e) => return Err(e.into()),
        }

        self.frame_index = (self.frame_index + 1) % self.frames.len();
        Ok(())
    }
}

impl Drop for WindowTarget {
    fn drop(&mut self) {
        if let Err(e) = self.vulkan.wait_idle() {
            warn!("wait idle before swapchain teardown failed: {e}");
        }
        let device = self.vulkan.device();
        if let Some(swapchain) = self.swapchain.take() {
            destroy_swapchain(device, &self.loader, swapchain);
        }
        unsafe {
            for f in self.frames.drain(..) {
                device.destroy_semaphore(f.image_available, None);
                device.destroy_semaphore(f.render_finished, None);
                device.destroy_fence(f.fence, None);
            }
            // Frees the frame command buffers with it.
            device.destroy_command_pool(self.command_pool, None);
            device.destroy_render_pass(self.render_pass, None);
        }
    }
}

fn destroy_swapchain(device: &Device, loader: &khr_swapchain::Device, swapchain: Swapchain) {
    unsafe {
        for fb in swapchain.framebuffers {
            device.destroy_framebuffer(fb, None);
        }
        for view in swapchain.image_views {
            device.destroy_image_view(view, None);
        }
        loader.destroy_swapchain(swapchain.handle, None);
    }
}

fn create_image_views(
    device: &Device,
    images: &[vk::Image],
    format: vk::Format,
) -> AppResult<Vec<vk::ImageView>> {
    let mut views = Vec::with_capacity(images.len());
    for &image in images {
        let created = unsafe {
            device.create_image_view(
                &vk::ImageViewCreateInfo::default()
                    .image(image)
                    .view_type(vk::ImageViewType::TYPE_2D)
                    .format(format)
                    .subresource_range(vk::ImageSubresourceRange {
                        aspect_mask: vk::ImageAspectFlags::COLOR,
                        base_mip_level: 0,
                        level_count: 1,
                        base_array_layer: 0,
                        layer_count: 1,
                    }),
                None,
            )
        };
        match created {
            Ok(view) => views.push(view),
            Err(e) => {
                for view in views {
                    unsafe { device.destroy_image_view(view, None) };
                }
                return Err(e.into());
            }
        }
    }
    Ok(views)
}

fn create_render_pass(device: &Device, format: vk::Format) -> AppResult<vk::RenderPass> {
    let attachments = [vk::AttachmentDescription::default()
        .format(format)
        .samples(vk::SampleCountFlags::TYPE_1)
        .load_op(vk::AttachmentLoadOp::CLEAR)
        .store_op(vk::AttachmentStoreOp::STORE)
        .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
        .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
        .initial_layout(vk::ImageLayout::UNDEFINED)
        .final_layout(vk::ImageLayout::PRESENT_SRC_KHR)];

    let color_attachment_refs = [vk::AttachmentReference::default()
        .attachment(0)
        .layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)];

    let subpass = [vk::SubpassDescription::default()
        .pipeline_bind_point(vk::PipelineBindPoint::GRAPHICS)
        .color_attachments(&color_attachment_refs)];

    let dependencies = [vk::SubpassDependency::default()
        .src_subpass(vk::SUBPASS_EXTERNAL)
        .dst_subpass(0)
        .src_stage_mask(vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT)
        .dst_stage_mask(vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT)
        .dst_access_mask(vk::AccessFlags::COLOR_ATTACHMENT_WRITE)];

    let render_pass = unsafe {
        device.create_render_pass(
            &vk::RenderPassCreateInfo::default()
                .attachments(&attachments)
                .subpasses(&subpass)
                .dependencies(&dependencies),
            None,
        )?
    };
    Ok(render_pass)
}

fn create_framebuffers(
    device: &Device,
    render_pass: vk::RenderPass,
    extent: vk::Extent2D,
    image_views: &[vk::ImageView],
) -> AppResult<Vec<vk::Framebuffer>> {
    let mut framebuffers = Vec::with_capacity(image_views.len());
    for &view in image_views {
        let created = unsafe {
            device.create_framebuffer(
                &vk::FramebufferCreateInfo::default()
                    .render_pass(render_pass)
                    .attachments(std::slice::from_ref(&view))
                    .width(extent.width)
                    .height(extent.height)
                    .layers(1),
                None,
            )
        };
        match created {
            Ok(fb) => framebuffers.push(fb),
            Err(e) => {
                for fb in framebuffers {
                    unsafe { device.destroy_framebuffer(fb, None) };
                }
                return Err(e.into());
            }
        }
    }
    Ok(framebuffers)
}

fn create_frame_sync(device: &Device, command_pool: vk::CommandPool) -> AppResult<FrameSync> {
    let semaphore_info = vk::SemaphoreCreateInfo::default();
    let fence_info = vk::FenceCreateInfo::default().flags(vk::FenceCreateFlags::SIGNALED);

    unsafe {
        let image_available = device.create_semaphore(&semaphore_info, None)?;
        let render_finished = device.create_semaphore(&semaphore_info, None)?;
        let fence = device.create_fence(&fence_info, None)?;
        let command_buffer = device.allocate_command_buffers(
            &vk::CommandBufferAllocateInfo::default()
                .command_pool(command_pool)
                .level(vk::CommandBufferLevel::PRIMARY)
                .command_buffer_count(1),
        )?[0];

        Ok(FrameSync {
            image_available,
            render_finished,
            fence,
            command_buffer,
        })
    }
}

fn record_command_buffer<F>(
    device: &Device,
    cmd: vk::CommandBuffer,
    render_pass: vk::RenderPass,
    framebuffer: vk::Framebuffer,
    extent: vk::Extent2D,
    clear_color: [f32; 4],
    record_draws: F,
) -> AppResult<()>
where
    F: FnOnce(vk::CommandBuffer) -> AppResult<()>,
{
    unsafe {
        device.begin_command_buffer(
            cmd,
            &vk::CommandBufferBeginInfo::default()
                .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT),
        )?;

        let clear_values = [vk::ClearValue {
            color: vk::ClearColorValue {
                float32: clear_color,
            },
        }];

        device.cmd_begin_render_pass(
            cmd,
            &vk::RenderPassBeginInfo::default()
                .render_pass(render_pass)
                .framebuffer(framebuffer)
                .render_area(vk::Rect2D {
                    offset: vk::Offset2D { x: 0, y: 0 },
                    extent,
                })
                .clear_values(&clear_values),
            vk::SubpassContents::INLINE,
        );

        let drawn = record_draws(cmd);

        device.cmd_end_render_pass(cmd);
        device.end_command_buffer(cmd)?;
        drawn
    }
}
