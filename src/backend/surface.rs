// Platform surface - connects a winit window to Vulkan
//
// ash-window is not used; each platform's surface is created directly from
// the raw handles so the raw-window-handle version stays in step with winit.

use anyhow::{Context, Result};
use ash::extensions::khr;
use ash::vk;
use raw_window_handle::{HasDisplayHandle, HasWindowHandle, RawDisplayHandle, RawWindowHandle};
use std::ffi::CStr;
use winit::window::Window;

/// Instance extensions needed to present to `display`
pub fn required_extensions(display: RawDisplayHandle) -> Result<Vec<&'static CStr>> {
    let platform = match display {
        RawDisplayHandle::Windows(_) => khr::Win32Surface::name(),
        RawDisplayHandle::Xlib(_) => khr::XlibSurface::name(),
        RawDisplayHandle::Xcb(_) => khr::XcbSurface::name(),
        RawDisplayHandle::Wayland(_) => khr::WaylandSurface::name(),
        other => anyhow::bail!("Unsupported display handle: {:?}", other),
    };
    Ok(vec![khr::Surface::name(), platform])
}

/// Display handle of the window, for picking instance extensions
pub fn display_handle(window: &Window) -> Result<RawDisplayHandle> {
    Ok(window
        .display_handle()
        .context("Failed to get display handle")?
        .as_raw())
}

/// Create a `VkSurfaceKHR` for `window`.
///
/// # Safety
/// The surface must be destroyed before `instance`, and `window` must outlive it.
pub unsafe fn create_surface(
    entry: &ash::Entry,
    instance: &ash::Instance,
    window: &Window,
) -> Result<vk::SurfaceKHR> {
    let window_handle = window
        .window_handle()
        .context("Failed to get window handle")?
        .as_raw();
    let display_handle = display_handle(window)?;

    let surface = match (display_handle, window_handle) {
        (RawDisplayHandle::Windows(_), RawWindowHandle::Win32(handle)) => {
            let hinstance =
                handle.hinstance.map(|h| h.get()).unwrap_or(0) as *const std::ffi::c_void;
            let hwnd = handle.hwnd.get() as *const std::ffi::c_void;
            let create_info = vk::Win32SurfaceCreateInfoKHR::builder()
                .hinstance(hinstance)
                .hwnd(hwnd);
            khr::Win32Surface::new(entry, instance).create_win32_surface(&create_info, None)?
        }
        (RawDisplayHandle::Xlib(display), RawWindowHandle::Xlib(handle)) => {
            let dpy = display
                .display
                .context("Xlib display handle has no display pointer")?;
            let create_info = vk::XlibSurfaceCreateInfoKHR::builder()
                .dpy(dpy.as_ptr() as *mut _)
                .window(handle.window);
            khr::XlibSurface::new(entry, instance).create_xlib_surface(&create_info, None)?
        }
        (RawDisplayHandle::Xcb(display), RawWindowHandle::Xcb(handle)) => {
            let connection = display
                .connection
                .context("XCB display handle has no connection")?;
            let create_info = vk::XcbSurfaceCreateInfoKHR::builder()
                .connection(connection.as_ptr())
                .window(handle.window.get());
            khr::XcbSurface::new(entry, instance).create_xcb_surface(&create_info, None)?
        }
        (RawDisplayHandle::Wayland(display), RawWindowHandle::Wayland(handle)) => {
            let create_info = vk::WaylandSurfaceCreateInfoKHR::builder()
                .display(display.display.as_ptr())
                .surface(handle.surface.as_ptr());
            khr::WaylandSurface::new(entry, instance)
                .create_wayland_surface(&create_info, None)?
        }
        _ => anyhow::bail!("Unsupported window handle type"),
    };

    Ok(surface)
}

#[cfg(test)]
mod tests {
    use super::*;
    use raw_window_handle::{WaylandDisplayHandle, WindowsDisplayHandle};
    use std::ptr::NonNull;

    #[test]
    fn surface_extension_always_comes_first() {
        let display = RawDisplayHandle::Windows(WindowsDisplayHandle::new());
        let extensions = required_extensions(display).unwrap();
        assert_eq!(extensions, vec![khr::Surface::name(), khr::Win32Surface::name()]);
    }

    #[test]
    fn wayland_needs_wayland_surface() {
        let display =
            RawDisplayHandle::Wayland(WaylandDisplayHandle::new(NonNull::dangling()));
        let extensions = required_extensions(display).unwrap();
        assert!(extensions.contains(&khr::WaylandSurface::name()));
    }
}
