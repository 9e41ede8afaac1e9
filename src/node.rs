//! DRM device node identification (primary / control / render).

mod constants;

use constants::*;

use std::{
    fmt::{self, Display, Formatter},
    io,
    os::unix::io::AsFd,
    path::{Path, PathBuf},
};

use rustix::fs::{fstat, major, minor, stat, Dev as dev_t, Stat};

/// A node referring to a DRM device, distinguished by its minor number range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DrmNode {
    dev: dev_t,
    ty: NodeType,
}

impl DrmNode {
    /// Creates a DRM node from an open drm device. Does not take ownership of the fd.
    pub fn from_file<A: AsFd>(file: A) -> Result<DrmNode, CreateDrmNodeError> {
        let stat = fstat(file).map_err(Into::<io::Error>::into)?;
        DrmNode::from_stat(stat)
    }

    /// Creates a DRM node from a path.
    pub fn from_path<A: AsRef<Path>>(path: A) -> Result<DrmNode, CreateDrmNodeError> {
        let stat = stat(path.as_ref()).map_err(Into::<io::Error>::into)?;
        DrmNode::from_stat(stat)
    }

    /// Creates a DRM node from a file stat.
    pub fn from_stat(stat: Stat) -> Result<DrmNode, CreateDrmNodeError> {
        DrmNode::from_dev_id(stat.st_rdev)
    }

    /// Creates a DRM node from a dev_t.
    ///
    /// The node type is determined by the minor number range: 0-63 primary,
    /// 64-127 control, 128-255 render.
    pub fn from_dev_id(dev: dev_t) -> Result<DrmNode, CreateDrmNodeError> {
        if !is_device_drm(dev) {
            return Err(CreateDrmNodeError::NotDrmNode);
        }

        let ty = match minor(dev) >> 6 {
            0 => NodeType::Primary,
            1 => NodeType::Control,
            2 => NodeType::Render,
            _ => return Err(CreateDrmNodeError::NotDrmNode),
        };

        Ok(DrmNode { dev, ty })
    }

    /// Returns the type of the DRM node.
    pub fn ty(&self) -> NodeType {
        self.ty
    }

    /// Returns the device_id of the underlying DRM node.
    pub fn dev_id(&self) -> dev_t {
        self.dev
    }

    /// Returns the path of the open device if possible.
    pub fn dev_path(&self) -> Option<PathBuf> {
        node_path(self, self.ty).ok()
    }

    /// Returns the path of the specified node type matching the device, if available.
    pub fn dev_path_with_type(&self, ty: NodeType) -> Option<PathBuf> {
        node_path(self, ty).ok()
    }

    /// Returns a new node of the specified node type matching the device, if available.
    pub fn node_with_type(&self, ty: NodeType) -> Option<Result<DrmNode, CreateDrmNodeError>> {
        self.dev_path_with_type(ty).map(DrmNode::from_path)
    }

    /// Returns the major device number.
    pub fn major(&self) -> u32 {
        major(self.dev_id())
    }

    /// Returns the minor device number.
    pub fn minor(&self) -> u32 {
        minor(self.dev_id())
    }

    /// Returns whether a render node exists for the device behind this node.
    pub fn has_render(&self) -> bool {
        node_path(self, NodeType::Render).is_ok()
    }
}

impl Display for DrmNode {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.ty.minor_name_prefix(), minor(self.dev_id()))
    }
}

/// Which of the three node types a DRM device path refers to.
#[derive(Debug, Clone, Copy, Hash, PartialEq, Eq)]
pub enum NodeType {
    /// Can allocate buffers and, absent any other node, mode-set.
    Primary,
    /// Mode-setting only node. Essentially unused in practice.
    Control,
    /// Buffer allocation only, no mode-setting.
    Render,
}

impl NodeType {
    /// The `/dev/dri` filename prefix for this node type (`card`, `controlD`, `renderD`).
    pub fn minor_name_prefix(&self) -> &str {
        match self {
            NodeType::Primary => PRIMARY_NAME,
            NodeType::Control => CONTROL_NAME,
            NodeType::Render => RENDER_NAME,
        }
    }
}

impl Display for NodeType {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}",
            match self {
                NodeType::Primary => "Primary",
                NodeType::Control => "Control",
                NodeType::Render => "Render",
            }
        )
    }
}

/// An error produced while turning a file descriptor or path into a [`DrmNode`].
#[derive(Debug, thiserror::Error)]
pub enum CreateDrmNodeError {
    /// An IO error occurred while stat-ing the candidate node.
    #[error("{0}")]
    Io(io::Error),
    /// The given path/fd does not refer to a DRM device.
    #[error("the provided file descriptor does not refer to a DRM node")]
    NotDrmNode,
}

impl From<io::Error> for CreateDrmNodeError {
    fn from(err: io::Error) -> Self {
        CreateDrmNodeError::Io(err)
    }
}

/// Returns whether the given major:minor pair is a DRM device.
pub fn is_device_drm(dev: dev_t) -> bool {
    let path = format!("/sys/dev/char/{}:{}/device/drm", major(dev), minor(dev));
    stat(path.as_str()).is_ok()
}

/// Returns the path of a specific node type sharing the same underlying DRM device.
pub fn path_to_type<P: AsRef<Path>>(path: P, ty: NodeType) -> io::Result<PathBuf> {
    let stat = stat(path.as_ref()).map_err(Into::<io::Error>::into)?;
    dev_path(stat.st_rdev, ty)
}

/// Returns the path of a specific node type from the same device as an existing node.
pub fn node_path(node: &DrmNode, ty: NodeType) -> io::Result<PathBuf> {
    dev_path(node.dev, ty)
}

/// Returns the path of a specific node type from a major:minor device id.
pub fn dev_path(dev: dev_t, ty: NodeType) -> io::Result<PathBuf> {
    use std::fs;
    use std::io::ErrorKind;

    if !is_device_drm(dev) {
        return Err(io::Error::new(
            ErrorKind::NotFound,
            format!("{}:{} is no DRM device", major(dev), minor(dev)),
        ));
    }

    let read = fs::read_dir(format!("/sys/dev/char/{}:{}/device/drm", major(dev), minor(dev)))?;

    for entry in read.flatten() {
        let name = entry.file_name();
        let name = name.to_string_lossy();

        // Only one primary, control and render node can exist simultaneously.
        if name.starts_with(ty.minor_name_prefix()) {
            let path = [r"/", "dev", "dri", &name].iter().collect::<PathBuf>();
            if path.exists() {
                return Ok(path);
            }
        }
    }

    Err(io::Error::new(
        ErrorKind::NotFound,
        format!(
            "could not find node of type {} from DRM device {}:{}",
            ty,
            major(dev),
            minor(dev)
        ),
    ))
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn node_type_prefixes() {
        assert_eq!(NodeType::Primary.minor_name_prefix(), "card");
        assert_eq!(NodeType::Render.minor_name_prefix(), "renderD");
    }

    #[test]
    fn display_formats_as_prefix_plus_minor() {
        let node = DrmNode {
            dev: rustix::fs::makedev(226, 1),
            ty: NodeType::Control,
        };
        assert_eq!(format!("{node}"), "controlD1");
    }
}
