//! Bounded list of unicast priv addresses.

use alloc::vec::Vec;

use magma_core::{Error, Result};

/// Unicast addresses produced by expanding one priv address
///
/// Capacity is fixed at creation; pushing past it fails instead of growing,
/// so callers size the table from the GPC/TPC/SM population up front.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrivAddrTable {
    entries: Vec<u32>,
    capacity: usize,
}

impl PrivAddrTable {
    /// Empty table holding at most `capacity` entries
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: Vec::with_capacity(capacity),
            capacity,
        }
    }

    /// Append an address
    pub fn push(&mut self, addr: u32) -> Result<()> {
        if self.entries.len() >= self.capacity {
            log::error!(
                "pri: address table full ({} entries), dropping 0x{:08x}",
                self.capacity,
                addr
            );
            return Err(Error::ResourceExhausted);
        }
        self.entries.push(addr);
        Ok(())
    }

    /// Number of addresses
    #[inline]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the table is empty
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Maximum number of addresses
    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Addresses in expansion order
    #[inline]
    pub fn as_slice(&self) -> &[u32] {
        &self.entries
    }

    /// Iterate over the addresses
    pub fn iter(&self) -> core::slice::Iter<'_, u32> {
        self.entries.iter()
    }

    /// Drop every entry, keep the capacity
    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

impl<'a> IntoIterator for &'a PrivAddrTable {
    type Item = &'a u32;
    type IntoIter = core::slice::Iter<'a, u32>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_push_respects_capacity() {
        let mut table = PrivAddrTable::with_capacity(2);
        table.push(0x10).unwrap();
        table.push(0x20).unwrap();
        assert_eq!(table.push(0x30), Err(Error::ResourceExhausted));
        assert_eq!(table.as_slice(), &[0x10, 0x20]);

        table.clear();
        assert!(table.is_empty());
        assert_eq!(table.capacity(), 2);
    }
}
