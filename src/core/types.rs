/*!
 * Core Types
 * Identifier aliases and the LDB/DIR classification shared across the crate
 */

use serde::{Deserialize, Serialize};
use std::fmt;

/// Device identifier (registry key)
pub type DeviceId = u32;

/// Scheduling domain identifier
pub type DomainId = u32;

/// Port identifier (device-global within its type)
pub type PortId = u32;

/// Queue identifier (device-global within its type)
pub type QueueId = u32;

/// Credit pool index within a domain
pub type PoolId = u32;

/// Load-balanced vs. directed classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PortType {
    /// Events distributed by hardware policy across linked consumers
    Ldb,
    /// Events pinned 1:1 to a queue/port pair
    Dir,
}

impl PortType {
    pub const ALL: [PortType; 2] = [PortType::Ldb, PortType::Dir];

    /// Index into per-type `[T; 2]` arrays
    #[inline(always)]
    pub const fn index(self) -> usize {
        match self {
            PortType::Ldb => 0,
            PortType::Dir => 1,
        }
    }

    pub const fn is_ldb(self) -> bool {
        matches!(self, PortType::Ldb)
    }
}

impl fmt::Display for PortType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PortType::Ldb => write!(f, "LDB"),
            PortType::Dir => write!(f, "DIR"),
        }
    }
}

/// Per-type pair of values, indexed by [`PortType`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PerType<T> {
    pub ldb: T,
    pub dir: T,
}

impl<T> PerType<T> {
    pub const fn new(ldb: T, dir: T) -> Self {
        Self { ldb, dir }
    }

    pub fn get(&self, ty: PortType) -> &T {
        match ty {
            PortType::Ldb => &self.ldb,
            PortType::Dir => &self.dir,
        }
    }

    pub fn get_mut(&mut self, ty: PortType) -> &mut T {
        match ty {
            PortType::Ldb => &mut self.ldb,
            PortType::Dir => &mut self.dir,
        }
    }
}
