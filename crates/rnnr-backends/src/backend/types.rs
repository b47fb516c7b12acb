//! Handles and launch geometry shared by every backend

use std::fmt;

use crate::error::{BackendError, Result};

/// Handle to a device buffer
///
/// Buffers are opaque handles issued by the backend that allocated them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BufferHandle(pub u64);

impl BufferHandle {
    pub const fn new(id: u64) -> Self {
        BufferHandle(id)
    }

    pub const fn id(self) -> u64 {
        self.0
    }
}

impl fmt::Display for BufferHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "buf{}", self.0)
    }
}

/// Handle to a compiled kernel entry point
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct KernelHandle(pub u64);

impl KernelHandle {
    pub const fn new(id: u64) -> Self {
        KernelHandle(id)
    }

    pub const fn id(self) -> u64 {
        self.0
    }
}

impl fmt::Display for KernelHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "kernel{}", self.0)
    }
}

/// Three-dimensional extent of an index space
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WorkSize {
    pub x: u64,
    pub y: u64,
    pub z: u64,
}

impl WorkSize {
    pub const fn new(x: u64, y: u64, z: u64) -> Self {
        Self { x, y, z }
    }

    /// 1D extent
    pub const fn linear(x: u64) -> Self {
        Self { x, y: 1, z: 1 }
    }

    /// Build from up to three dimensions, padding missing trailing ones with 1.
    ///
    /// Returns `None` for more than three dimensions.
    pub fn from_dims(dims: &[u64]) -> Option<Self> {
        if dims.len() > 3 {
            return None;
        }
        let dim = |i: usize| dims.get(i).copied().unwrap_or(1);
        Some(Self::new(dim(0), dim(1), dim(2)))
    }

    pub const fn as_array(&self) -> [u64; 3] {
        [self.x, self.y, self.z]
    }

    /// Total number of items, saturating on overflow.
    pub const fn total(&self) -> u64 {
        self.x.saturating_mul(self.y).saturating_mul(self.z)
    }
}

impl Default for WorkSize {
    fn default() -> Self {
        Self { x: 1, y: 1, z: 1 }
    }
}

impl fmt::Display for WorkSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {}, {})", self.x, self.y, self.z)
    }
}

/// Launch geometry for one kernel dispatch
///
/// `global` counts work items, not work groups. Each dimension of `local`
/// must evenly divide the matching dimension of `global`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LaunchConfig {
    /// Total work items per dimension
    pub global: WorkSize,
    /// Work items per group per dimension
    pub local: WorkSize,
}

impl LaunchConfig {
    pub const fn new(global: WorkSize, local: WorkSize) -> Self {
        Self { global, local }
    }

    /// 1D launch of `items` work items in groups of `group_size`.
    pub const fn linear(items: u64, group_size: u64) -> Self {
        Self {
            global: WorkSize::linear(items),
            local: WorkSize::linear(group_size),
        }
    }

    /// Check that every local dimension is non-zero and divides its global dimension.
    pub fn validate(&self) -> Result<()> {
        let global = self.global.as_array();
        let local = self.local.as_array();
        for dim in 0..3 {
            if local[dim] == 0 || global[dim] % local[dim] != 0 {
                return Err(BackendError::InvalidWorkSize {
                    dim,
                    global: global[dim],
                    local: local[dim],
                });
            }
        }
        Ok(())
    }

    /// Number of work groups per dimension. Only meaningful after [`Self::validate`].
    pub fn groups(&self) -> WorkSize {
        WorkSize::new(
            self.global.x / self.local.x.max(1),
            self.global.y / self.local.y.max(1),
            self.global.z / self.local.z.max(1),
        )
    }

    pub const fn total_work_items(&self) -> u64 {
        self.global.total()
    }
}

impl fmt::Display for LaunchConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "global={}, local={}", self.global, self.local)
    }
}

/// Coordinates of a single work item inside a launch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkItem {
    pub group: [u64; 3],
    pub local: [u64; 3],
    pub local_size: [u64; 3],
}

impl WorkItem {
    pub const fn new(group: [u64; 3], local: [u64; 3], local_size: [u64; 3]) -> Self {
        Self {
            group,
            local,
            local_size,
        }
    }

    /// Index of this item across the whole launch in `dim` (`get_global_id`).
    ///
    /// Dimensions above 2 report 0, like OpenCL does.
    #[inline]
    pub fn global_id(&self, dim: usize) -> usize {
        if dim > 2 {
            return 0;
        }
        (self.group[dim] * self.local_size[dim] + self.local[dim]) as usize
    }

    #[inline]
    pub fn local_id(&self, dim: usize) -> usize {
        self.local.get(dim).copied().unwrap_or(0) as usize
    }

    #[inline]
    pub fn group_id(&self, dim: usize) -> usize {
        self.group.get(dim).copied().unwrap_or(0) as usize
    }
}
