//! Error taxonomy shared by the whole crate.
//!
//! Low-level variants mirror the ones raised by Smithay's atomic DRM backend
//! (`Access`, `UnknownProperty`, ...); the high-level kinds are the taxonomy of
//! the HWC2 facade, onto which every other variant maps via [`Error::kind`].

use std::path::PathBuf;

/// The stable error taxonomy surfaced across the facade boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Failed to open the render node or enumerate its resources.
    NoDevice,
    /// Out of memory, fd quota, or no usable plane for a mandated layer.
    NoResources,
    /// Unknown mode id or unsupported power mode.
    BadConfig,
    /// Display id does not exist.
    BadDisplay,
    /// Layer id does not exist, or its buffer failed to import.
    BadLayer,
    /// Malformed input.
    BadParameter,
    /// An acquire fence did not signal within its wait budget, or a commit failed.
    Timeout,
    /// A worker shut down mid-operation.
    Interrupted,
    /// The operation is not implemented by this core (e.g. virtual displays).
    Unsupported,
}

/// Crate-wide error type.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A DRM ioctl failed.
    #[error("{errmsg} on device {dev:?}")]
    Access {
        errmsg: &'static str,
        dev: Option<PathBuf>,
        #[source]
        source: std::io::Error,
    },

    /// A property with this name was not found on the given object.
    #[error("unknown property `{name}` on object {handle}")]
    UnknownProperty { handle: u32, name: &'static str },

    /// Referenced a connector id the device topology does not know about.
    #[error("unknown connector {0}")]
    UnknownConnector(u32),

    /// Referenced a crtc id the device topology does not know about.
    #[error("unknown crtc {0}")]
    UnknownCrtc(u32),

    /// Referenced a plane id the device topology does not know about.
    #[error("unknown plane {0}")]
    UnknownPlane(u32),

    /// No display with this id exists.
    #[error("unknown display {0}")]
    UnknownDisplay(usize),

    /// No layer with this id exists on the display it was addressed to.
    #[error("unknown layer {0}")]
    UnknownLayer(u64),

    /// A composition was asked to transition out of its current lifecycle state.
    #[error("invalid composition state transition")]
    InvalidState,

    /// No crtc/encoder pair could be bound to a connector.
    #[error("no free display pipe for connector {0}")]
    NoPipe(u32),

    /// No plane on the crtc satisfied a layer's requirements.
    #[error("no usable plane for crtc {0}")]
    NoUsablePlane(u32),

    /// Buffer import failed.
    #[error("failed to import buffer: {0}")]
    ImportFailed(String),

    /// An acquire fence did not signal before the wait budget expired.
    #[error("acquire fence wait timed out")]
    FenceTimeout,

    /// A bounded queue operation timed out.
    #[error("operation timed out")]
    Timeout,

    /// A worker was asked to exit while an operation was pending.
    #[error("interrupted by shutdown")]
    Interrupted,

    /// A malformed argument was supplied.
    #[error("bad parameter: {0}")]
    BadParameter(String),

    /// Requested a power mode other than Off/On.
    #[error("unsupported power mode")]
    UnsupportedPowerMode,

    /// Requested functionality this core declares out of scope.
    #[error("unsupported: {0}")]
    Unsupported(&'static str),

    /// Wraps a lower-level I/O error without further context.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Maps any internal error onto the stable HWC2-facing taxonomy.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Access { .. } | Error::Io(_) => ErrorKind::NoDevice,
            Error::NoUsablePlane(_) => ErrorKind::NoResources,
            Error::UnknownProperty { .. } | Error::InvalidState | Error::NoPipe(_) => {
                ErrorKind::BadConfig
            }
            Error::UnknownConnector(_) | Error::UnknownCrtc(_) | Error::UnknownPlane(_) => {
                ErrorKind::BadDisplay
            }
            Error::UnknownDisplay(_) => ErrorKind::BadDisplay,
            Error::UnknownLayer(_) | Error::ImportFailed(_) => ErrorKind::BadLayer,
            Error::BadParameter(_) => ErrorKind::BadParameter,
            Error::FenceTimeout | Error::Timeout => ErrorKind::Timeout,
            Error::Interrupted => ErrorKind::Interrupted,
            Error::UnsupportedPowerMode => ErrorKind::BadConfig,
            Error::Unsupported(_) => ErrorKind::Unsupported,
        }
    }
}

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn import_failure_maps_to_bad_layer() {
        let err = Error::ImportFailed("prime fd import failed".into());
        assert_eq!(err.kind(), ErrorKind::BadLayer);
    }

    #[test]
    fn unsupported_feature_maps_to_unsupported() {
        let err = Error::Unsupported("virtual displays");
        assert_eq!(err.kind(), ErrorKind::Unsupported);
    }
}
