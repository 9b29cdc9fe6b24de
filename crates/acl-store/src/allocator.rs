//! ACL table id allocator.
//!
//! Table ids are small integers from a closed range (by default
//! `ACL_TABLE_ID_MIN..=ACL_TABLE_ID_MAX`). In-use slots are tracked in a
//! 64-bit map and the lowest free id is always handed out first, so ids
//! released by destroyed tables are reused before fresh ones.

use crate::error::{AclError, AclResult};
use crate::types::{AclTableIndex, ACL_INVALID_TABLE_ID, ACL_TABLE_ID_MAX, ACL_TABLE_ID_MIN};

/// Largest number of ids one allocator can track.
pub const MAX_ALLOCATOR_SLOTS: u32 = u64::BITS;

/// Lowest-free allocator over a closed id range.
#[derive(Debug, Clone)]
pub struct TableIdAllocator {
    min: AclTableIndex,
    max: AclTableIndex,
    in_use: u64,
}

impl Default for TableIdAllocator {
    fn default() -> Self {
        Self {
            min: ACL_TABLE_ID_MIN,
            max: ACL_TABLE_ID_MAX,
            in_use: 0,
        }
    }
}

impl TableIdAllocator {
    /// Creates an allocator over `min..=max`.
    ///
    /// The invalid id (0) can never be part of the range.
    pub fn new(min: AclTableIndex, max: AclTableIndex) -> AclResult<Self> {
        if min == ACL_INVALID_TABLE_ID || min > max {
            return Err(AclError::InvalidAttribute(format!(
                "Invalid ACL table id range {}..={}",
                min, max
            )));
        }
        if max - min >= MAX_ALLOCATOR_SLOTS {
            return Err(AclError::InvalidAttribute(format!(
                "ACL table id range {}..={} exceeds {} ids",
                min, max, MAX_ALLOCATOR_SLOTS
            )));
        }
        Ok(Self { min, max, in_use: 0 })
    }

    /// Allocates the lowest free id.
    pub fn allocate(&mut self) -> AclResult<AclTableIndex> {
        let free = !self.in_use & self.range_mask();
        if free == 0 {
            return Err(AclError::AllocatorExhausted {
                min: self.min,
                max: self.max,
            });
        }
        let slot = free.trailing_zeros();
        self.in_use |= 1 << slot;
        Ok(self.min + slot)
    }

    /// Returns an id to the free pool.
    ///
    /// Out-of-range ids and ids that are not allocated are rejected.
    pub fn release(&mut self, id: AclTableIndex) -> AclResult<()> {
        let bit = self.slot_bit(id).ok_or(AclError::InvalidId(id))?;
        if self.in_use & bit == 0 {
            return Err(AclError::InvalidId(id));
        }
        self.in_use &= !bit;
        Ok(())
    }

    /// Returns true if `id` is currently handed out.
    pub fn is_allocated(&self, id: AclTableIndex) -> bool {
        self.slot_bit(id)
            .map(|bit| self.in_use & bit != 0)
            .unwrap_or(false)
    }

    /// Number of free ids.
    pub fn available(&self) -> u32 {
        self.capacity() - self.in_use.count_ones()
    }

    /// Number of ids in the range.
    pub fn capacity(&self) -> u32 {
        self.max - self.min + 1
    }

    pub fn min(&self) -> AclTableIndex {
        self.min
    }

    pub fn max(&self) -> AclTableIndex {
        self.max
    }

    fn slot_bit(&self, id: AclTableIndex) -> Option<u64> {
        if id < self.min || id > self.max {
            None
        } else {
            Some(1 << (id - self.min))
        }
    }

    fn range_mask(&self) -> u64 {
        let capacity = self.capacity();
        if capacity == MAX_ALLOCATOR_SLOTS {
            u64::MAX
        } else {
            (1 << capacity) - 1
        }
    }
}
