//! OS-specific DRM constants.

#[cfg(target_os = "dragonfly")]
pub const DRM_MAJOR: u32 = 145;

#[cfg(target_os = "netbsd")]
pub const DRM_MAJOR: u32 = 180;

#[cfg(all(target_os = "openbsd", target_arch = "x86"))]
pub const DRM_MAJOR: u32 = 88;

#[cfg(all(target_os = "openbsd", not(target_arch = "x86")))]
pub const DRM_MAJOR: u32 = 87;

#[cfg(not(any(target_os = "dragonfly", target_os = "netbsd", target_os = "openbsd")))]
#[allow(dead_code)]
pub const DRM_MAJOR: u32 = 226;

pub const PRIMARY_NAME: &str = "card";
pub const CONTROL_NAME: &str = "controlD";
pub const RENDER_NAME: &str = "renderD";
