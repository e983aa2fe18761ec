//! Pure selection rules for devices, extensions, formats and swapchain sizing.

use std::ffi::CStr;

use ash::vk;

/// Surface formats requested for every window, in preference order.
pub const REQUESTED_SURFACE_FORMATS: [vk::Format; 4] = [
    vk::Format::B8G8R8A8_UNORM,
    vk::Format::R8G8B8A8_UNORM,
    vk::Format::B8G8R8_UNORM,
    vk::Format::R8G8B8_UNORM,
];

pub const REQUESTED_COLOR_SPACE: vk::ColorSpaceKHR = vk::ColorSpaceKHR::SRGB_NONLINEAR;

/// Index of the preferred device: the first discrete GPU, else the first one.
pub fn preferred_device_index(types: &[vk::PhysicalDeviceType]) -> Option<usize> {
    types
        .iter()
        .position(|t| *t == vk::PhysicalDeviceType::DISCRETE_GPU)
        .or(if types.is_empty() { None } else { Some(0) })
}

/// First queue family with graphics support.
pub fn graphics_queue_family(families: &[vk::QueueFamilyProperties]) -> Option<u32> {
    families
        .iter()
        .position(|f| f.queue_flags.contains(vk::QueueFlags::GRAPHICS))
        .map(|i| i as u32)
}

pub fn contains_name<'a>(available: impl IntoIterator<Item = &'a CStr>, wanted: &CStr) -> bool {
    available.into_iter().any(|name| name == wanted)
}

/// Picks the surface format.
///
/// A single `UNDEFINED` entry means the surface accepts anything, so the first
/// requested format is used. Otherwise the first requested format available in
/// `color_space` wins, falling back to the first available format.
pub fn select_surface_format(
    available: &[vk::SurfaceFormatKHR],
    requested: &[vk::Format],
    color_space: vk::ColorSpaceKHR,
) -> Option<vk::SurfaceFormatKHR> {
    if available.len() == 1 && available[0].format == vk::Format::UNDEFINED {
        return requested.first().map(|&format| vk::SurfaceFormatKHR {
            format,
            color_space,
        });
    }

    requested
        .iter()
        .find_map(|&want| {
            available
                .iter()
                .find(|f| f.format == want && f.color_space == color_space)
                .copied()
        })
        .or_else(|| available.first().copied())
}

/// First requested mode the surface supports; FIFO is mandatory and the fallback.
pub fn select_present_mode(
    available: &[vk::PresentModeKHR],
    requested: &[vk::PresentModeKHR],
) -> vk::PresentModeKHR {
    requested
        .iter()
        .copied()
        .find(|m| available.contains(m))
        .unwrap_or(vk::PresentModeKHR::FIFO)
}

/// Swapchain extent for a framebuffer of `width` x `height` pixels.
pub fn select_extent(caps: &vk::SurfaceCapabilitiesKHR, width: u32, height: u32) -> vk::Extent2D {
    if caps.current_extent.width != u32::MAX && caps.current_extent.height != u32::MAX {
        return caps.current_extent;
    }
    vk::Extent2D {
        width: width.clamp(caps.min_image_extent.width, caps.max_image_extent.width),
        height: height.clamp(caps.min_image_extent.height, caps.max_image_extent.height),
    }
}

/// Swapchain image count honouring `requested` and the surface limits.
/// `max_image_count == 0` means no upper limit.
pub fn select_image_count(caps: &vk::SurfaceCapabilitiesKHR, requested: u32) -> u32 {
    let count = requested.max(caps.min_image_count);
    if caps.max_image_count > 0 {
        count.min(caps.max_image_count)
    } else {
        count
    }
}

/// Clear value for a straight-alpha color: RGB premultiplied by alpha.
pub fn premultiplied_clear(color: [f32; 4]) -> [f32; 4] {
    let [r, g, b, a] = color;
    [r * a, g * a, b * a, a]
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn fmt(format: vk::Format) -> vk::SurfaceFormatKHR {
        vk::SurfaceFormatKHR {
            format,
            color_space: REQUESTED_COLOR_SPACE,
        }
    }

    #[test]
    fn discrete_gpu_is_preferred() {
        use vk::PhysicalDeviceType as T;
        assert_eq!(
            preferred_device_index(&[T::INTEGRATED_GPU, T::DISCRETE_GPU, T::CPU]),
            Some(1)
        );
        assert_eq!(
            preferred_device_index(&[T::INTEGRATED_GPU, T::VIRTUAL_GPU]),
            Some(0)
        );
        assert_eq!(preferred_device_index(&[]), None);
    }

    #[test]
    fn first_graphics_family_wins() {
        let family = |flags| vk::QueueFamilyProperties {
            queue_flags: flags,
            queue_count: 1,
            ..Default::default()
        };
        let families = [
            family(vk::QueueFlags::TRANSFER),
            family(vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE),
            family(vk::QueueFlags::GRAPHICS),
        ];
        assert_eq!(graphics_queue_family(&families), Some(1));
        assert_eq!(graphics_queue_family(&families[..1]), None);
    }

    #[test]
    fn extension_lookup_is_exact() {
        let available = [c"VK_KHR_surface", c"VK_KHR_swapchain"];
        assert!(contains_name(available, c"VK_KHR_swapchain"));
        assert!(!contains_name(available, c"VK_KHR_swap"));
    }

    #[test]
    fn undefined_surface_format_means_any() {
        let chosen = select_surface_format(
            &[fmt(vk::Format::UNDEFINED)],
            &REQUESTED_SURFACE_FORMATS,
            REQUESTED_COLOR_SPACE,
        );
        assert_eq!(chosen.map(|f| f.format), Some(vk::Format::B8G8R8A8_UNORM));
    }

    #[test]
    fn surface_format_follows_request_order() {
        let available = [
            fmt(vk::Format::B8G8R8A8_SRGB),
            fmt(vk::Format::R8G8B8A8_UNORM),
            fmt(vk::Format::B8G8R8A8_UNORM),
        ];
        let chosen =
            select_surface_format(&available, &REQUESTED_SURFACE_FORMATS, REQUESTED_COLOR_SPACE);
        assert_eq!(chosen.map(|f| f.format), Some(vk::Format::B8G8R8A8_UNORM));
    }

    #[test]
    fn surface_format_falls_back_to_first_available() {
        let available = [
            fmt(vk::Format::A2B10G10R10_UNORM_PACK32),
            vk::SurfaceFormatKHR {
                format: vk::Format::B8G8R8A8_UNORM,
                color_space: vk::ColorSpaceKHR::DISPLAY_P3_NONLINEAR_EXT,
            },
        ];
        let chosen =
            select_surface_format(&available, &REQUESTED_SURFACE_FORMATS, REQUESTED_COLOR_SPACE);
        assert_eq!(
            chosen.map(|f| f.format),
            Some(vk::Format::A2B10G10R10_UNORM_PACK32)
        );
        assert!(
            select_surface_format(&[], &REQUESTED_SURFACE_FORMATS, REQUESTED_COLOR_SPACE).is_none()
        );
    }

    #[test]
    fn present_mode_falls_back_to_fifo() {
        use vk::PresentModeKHR as M;
        let requested = [M::MAILBOX, M::IMMEDIATE, M::FIFO];
        assert_eq!(
            select_present_mode(&[M::FIFO, M::IMMEDIATE], &requested),
            M::IMMEDIATE
        );
        assert_eq!(select_present_mode(&[M::FIFO], &[M::MAILBOX]), M::FIFO);
    }

    #[test]
    fn extent_uses_current_or_clamps() {
        let mut caps = vk::SurfaceCapabilitiesKHR {
            current_extent: vk::Extent2D {
                width: 800,
                height: 600,
            },
            min_image_extent: vk::Extent2D {
                width: 1,
                height: 1,
            },
            max_image_extent: vk::Extent2D {
                width: 1024,
                height: 1024,
            },
            ..Default::default()
        };
        assert_eq!(select_extent(&caps, 10, 10), caps.current_extent);

        caps.current_extent = vk::Extent2D {
            width: u32::MAX,
            height: u32::MAX,
        };
        assert_eq!(
            select_extent(&caps, 4096, 0),
            vk::Extent2D {
                width: 1024,
                height: 1
            }
        );
    }

    #[test]
    fn image_count_respects_surface_limits() {
        let caps = |min, max| vk::SurfaceCapabilitiesKHR {
            min_image_count: min,
            max_image_count: max,
            ..Default::default()
        };
        assert_eq!(select_image_count(&caps(2, 0), 2), 2);
        assert_eq!(select_image_count(&caps(3, 8), 2), 3);
        assert_eq!(select_image_count(&caps(1, 2), 4), 2);
    }

    #[test]
    fn clear_color_is_premultiplied() {
        assert_eq!(
            premultiplied_clear([0.5, 1.0, 0.25, 0.5]),
            [0.25, 0.5, 0.125, 0.5]
        );
        assert_eq!(premultiplied_clear([0.45, 0.55, 0.6, 1.0]), [0.45, 0.55, 0.6, 1.0]);
    }
}
