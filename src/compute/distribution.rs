//! Compute Work-Item Distribution
//!
//! Partitions a logical workload of `total_items` into a 1-3 dimensional grid
//! whose global size is an exact multiple of the local group shape in every
//! dimension and whose group count stays within the device limits.
//!
//! The split is deterministic and never backtracks:
//!
//! ```text
//! suffix[d]   = local[d+1] × … × local[n-1]
//! candidate   = remaining / suffix[d]          (everything left goes into d)
//! groups[d]   = candidate / local[d], halved while > limit[d]
//! remaining  /= groups[d] × local[d]
//! ```
//!
//! Halving assumes power-of-two friendly limits. A workload that is not a
//! multiple of the group size is rejected; callers pad it first with
//! [`pad_to_local`].

use thiserror::Error;

/// Device-imposed compute limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ComputeLimits {
    /// Maximum local group size per dimension.
    pub max_group_size: [u32; 3],
    /// Maximum number of groups per dimension in one dispatch.
    pub max_group_count: [u32; 3],
    /// Maximum invocations in one local group.
    pub max_invocations: u32,
}

impl ComputeLimits {
    /// Limits that only bound the group count.
    #[must_use]
    pub const fn with_group_count(max_group_count: [u32; 3]) -> Self {
        Self {
            max_group_size: [u32::MAX; 3],
            max_group_count,
            max_invocations: u32::MAX,
        }
    }
}

impl Default for ComputeLimits {
    /// The WebGPU baseline.
    fn default() -> Self {
        Self {
            max_group_size: [256, 256, 64],
            max_group_count: [65535; 3],
            max_invocations: 256,
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DistributionError {
    #[error("local shape must have 1 to 3 dimensions, got {0}")]
    InvalidShape(usize),

    #[error("local shape dimension {0} is zero")]
    ZeroLocalSize(usize),

    #[error("local shape {shape:?} exceeds the device group size limits")]
    LocalShapeTooLarge { shape: [u32; 3] },

    #[error("workload is empty")]
    EmptyWorkload,

    #[error("{total} items are not a multiple of the {group_items}-item local group")]
    NotDivisible { total: u64, group_items: u64 },

    #[error("dimension {dimension} needs {groups} groups, limit is {limit}")]
    ExceedsLimits {
        dimension: usize,
        groups: u64,
        limit: u32,
    },
}

/// Result of [`distribute`]. Unused dimensions hold 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkGrid {
    /// Global size in items per dimension.
    pub global: [u64; 3],
    /// Local group shape per dimension.
    pub local: [u32; 3],
    /// Number of meaningful dimensions.
    pub dimensions: usize,
}

impl WorkGrid {
    /// Group count per dimension, the argument of a dispatch.
    #[must_use]
    pub fn groups(&self) -> [u32; 3] {
        [0, 1, 2].map(|d| (self.global[d] / u64::from(self.local[d])) as u32)
    }

    /// Items covered by the grid.
    #[must_use]
    pub fn total_items(&self) -> u64 {
        self.global.iter().product()
    }
}

/// Splits `total_items` over `local_shape` within `limits`.
pub fn distribute(
    total_items: u64,
    local_shape: &[u32],
    limits: &ComputeLimits,
) -> Result<WorkGrid, DistributionError> {
    let dimensions = local_shape.len();
    if dimensions == 0 || dimensions > 3 {
        return Err(DistributionError::InvalidShape(dimensions));
    }

    let mut local = [1u32; 3];
    for (d, &size) in local_shape.iter().enumerate() {
        if size == 0 {
            return Err(DistributionError::ZeroLocalSize(d));
        }
        local[d] = size;
    }

    let invocations: u64 = local.iter().map(|&l| u64::from(l)).product();
    if local
        .iter()
        .zip(limits.max_group_size)
        .any(|(&l, max)| l > max)
        || invocations > u64::from(limits.max_invocations)
    {
        return Err(DistributionError::LocalShapeTooLarge { shape: local });
    }

    if total_items == 0 {
        return Err(DistributionError::EmptyWorkload);
    }
    if !total_items.is_multiple_of(invocations) {
        return Err(DistributionError::NotDivisible {
            total: total_items,
            group_items: invocations,
        });
    }

    // suffix[d] = product of local[d+1..dimensions]
    let mut suffix = [1u64; 3];
    for d in (0..dimensions.saturating_sub(1)).rev() {
        suffix[d] = suffix[d + 1] * u64::from(local[d + 1]);
    }

    let mut global = [1u64; 3];
    let mut remaining = total_items;
    for d in 0..dimensions {
        let local_d = u64::from(local[d]);
        let limit = limits.max_group_count[d];
        let mut groups = remaining / suffix[d] / local_d;

        let last = d + 1 == dimensions;
        while groups > u64::from(limit) && !last && groups.is_multiple_of(2) {
            groups /= 2;
        }
        if groups > u64::from(limit) {
            return Err(DistributionError::ExceedsLimits {
                dimension: d,
                groups,
                limit,
            });
        }

        global[d] = groups * local_d;
        remaining /= global[d];
    }

    debug_assert_eq!(remaining, 1);
    Ok(WorkGrid {
        global,
        local,
        dimensions,
    })
}

/// Rounds `total_items` up to the next multiple of the local group size.
#[must_use]
pub fn pad_to_local(total_items: u64, local_shape: &[u32]) -> u64 {
    let group: u64 = local_shape.iter().map(|&l| u64::from(l.max(1))).product();
    total_items.div_ceil(group) * group
}
