//! Runtime configuration (`hwc.drm.*` properties).

use std::path::{Path, PathBuf};

/// The three runtime-configurable properties of the compositor core.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// `hwc.drm.device` — path to the DRM render node.
    pub device: PathBuf,
    /// `hwc.drm.use_overlay_planes` — whether the planner may use overlay planes.
    pub use_overlay_planes: bool,
    /// `hwc.drm.use_framebuffer_cache` — whether imported framebuffers are cached.
    pub use_framebuffer_cache: bool,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            device: PathBuf::from("/dev/dri/card0"),
            use_overlay_planes: true,
            use_framebuffer_cache: true,
        }
    }
}

impl Config {
    /// Builds a config pointing at a specific device path, otherwise defaulted.
    pub fn for_device(path: impl AsRef<Path>) -> Self {
        Config {
            device: path.as_ref().to_path_buf(),
            ..Config::default()
        }
    }

    /// Reads the three properties from environment variables, falling back to
    /// [`Config::default`] for anything unset or unparsable.
    ///
    /// `HWC_DRM_DEVICE`, `HWC_DRM_USE_OVERLAY_PLANES`,
    /// `HWC_DRM_USE_FRAMEBUFFER_CACHE` (each `"0"`/`"1"`), mirroring the
    /// `SMITHAY_USE_LEGACY`-style environment overrides the DRM backend itself
    /// honors.
    pub fn from_env() -> Self {
        let mut config = Config::default();

        if let Ok(device) = std::env::var("HWC_DRM_DEVICE") {
            config.device = PathBuf::from(device);
        }
        if let Some(v) = read_bool_env("HWC_DRM_USE_OVERLAY_PLANES") {
            config.use_overlay_planes = v;
        }
        if let Some(v) = read_bool_env("HWC_DRM_USE_FRAMEBUFFER_CACHE") {
            config.use_framebuffer_cache = v;
        }

        config
    }
}

fn read_bool_env(key: &str) -> Option<bool> {
    match std::env::var(key).ok()?.as_str() {
        "0" => Some(false),
        "1" => Some(true),
        _ => None,
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn defaults_match_spec() {
        let config = Config::default();
        assert_eq!(config.device, PathBuf::from("/dev/dri/card0"));
        assert!(config.use_overlay_planes);
        assert!(config.use_framebuffer_cache);
    }

    #[test]
    fn unparsable_bool_env_is_ignored() {
        assert_eq!(read_bool_env("HWC_DRM_CONFIG_TEST_BOGUS_KEY"), None);
    }
}
