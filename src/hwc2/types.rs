//! HWC2 ABI-facing enums (spec.md §6 "HWC2 ABI surface", §4.9).
//!
//! These are the stable, bit-exact-preserved types the facade exchanges with
//! its caller; everything internal to the core (device topology, layer
//! transforms, plane assignments) lives in its own module and is translated
//! at the boundary implemented here.

use crate::error::ErrorKind;

/// `HWC2::Error`, mapped from the internal [`crate::error::ErrorKind`] taxonomy
/// (spec.md §7 "the facade maps them to the HWC2 error enum").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Hwc2Error {
    None,
    BadDisplay,
    BadConfig,
    BadLayer,
    BadParameter,
    NoResources,
    HasChanges,
    Unsupported,
}

impl From<ErrorKind> for Hwc2Error {
    fn from(kind: ErrorKind) -> Self {
        match kind {
            ErrorKind::NoDevice | ErrorKind::NoResources => Hwc2Error::NoResources,
            ErrorKind::BadConfig | ErrorKind::Timeout | ErrorKind::Interrupted => Hwc2Error::BadConfig,
            ErrorKind::BadDisplay => Hwc2Error::BadDisplay,
            ErrorKind::BadLayer => Hwc2Error::BadLayer,
            ErrorKind::BadParameter => Hwc2Error::BadParameter,
            ErrorKind::Unsupported => Hwc2Error::Unsupported,
        }
    }
}

impl From<crate::error::Error> for Hwc2Error {
    fn from(err: crate::error::Error) -> Self {
        Hwc2Error::from(err.kind())
    }
}

/// `HWC2::Composition`, the per-layer composition type reported by `Validate`
/// and set by the client via `SetLayerCompositionType`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CompositionType {
    #[default]
    Invalid,
    Client,
    Device,
    SolidColor,
    Cursor,
    Sideband,
}

/// `HWC2::Callback`, the three callback descriptors a client registers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallbackDescriptor {
    Hotplug,
    Vsync,
    Refresh,
}

/// `HWC2::Connection`, reported through the `Hotplug` callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Connection {
    Connected,
    Disconnected,
}

/// `HWC2::Attribute`, the four queryable per-config display attributes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisplayAttribute {
    Width,
    Height,
    VsyncPeriod,
    DpiX,
    DpiY,
}

/// `HWC2::DisplayType`; only physical displays are produced by this core
/// (spec.md §1 "virtual-display ... export" is out of scope).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisplayType {
    Physical,
    Virtual,
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn import_failed_maps_to_bad_layer() {
        let err = crate::error::Error::ImportFailed("x".into());
        assert_eq!(Hwc2Error::from(err), Hwc2Error::BadLayer);
    }

    #[test]
    fn unsupported_maps_through() {
        assert_eq!(Hwc2Error::from(ErrorKind::Unsupported), Hwc2Error::Unsupported);
    }
}
