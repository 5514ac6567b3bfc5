//! Instruction breakpoints

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// A single instruction breakpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Breakpoint {
    pub address: u32,
    /// Removed the first time it is hit
    pub temporary: bool,
    pub enabled: bool,
    /// Number of times execution stopped here
    pub hit_count: u64,
}

impl Breakpoint {
    pub fn new(address: u32, temporary: bool) -> Self {
        Self {
            address,
            temporary,
            enabled: true,
            hit_count: 0,
        }
    }
}

/// Address-keyed breakpoint set
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BreakPoints {
    breakpoints: BTreeMap<u32, Breakpoint>,
}

impl BreakPoints {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a breakpoint, replacing any existing one at `address`
    pub fn add(&mut self, address: u32, temporary: bool) {
        self.breakpoints
            .insert(address, Breakpoint::new(address, temporary));
        tracing::debug!(
            "Added {} breakpoint at 0x{:08x}",
            if temporary { "temporary" } else { "permanent" },
            address
        );
    }

    pub fn remove(&mut self, address: u32) -> Option<Breakpoint> {
        let removed = self.breakpoints.remove(&address);
        if removed.is_some() {
            tracing::debug!("Removed breakpoint at 0x{:08x}", address);
        }
        removed
    }

    pub fn clear(&mut self) {
        self.breakpoints.clear();
    }

    /// Remove every temporary breakpoint
    pub fn clear_temporary(&mut self) {
        self.breakpoints.retain(|_, bp| !bp.temporary);
    }

    /// Enable or disable a breakpoint. Returns false if none exists at `address`.
    pub fn set_enabled(&mut self, address: u32, enabled: bool) -> bool {
        match self.breakpoints.get_mut(&address) {
            Some(bp) => {
                bp.enabled = enabled;
                true
            }
            None => false,
        }
    }

    /// True when an enabled breakpoint sits at `address`
    #[inline]
    pub fn is_address_breakpoint(&self, address: u32) -> bool {
        self.breakpoints
            .get(&address)
            .map_or(false, |bp| bp.enabled)
    }

    pub fn is_temporary(&self, address: u32) -> bool {
        self.breakpoints
            .get(&address)
            .map_or(false, |bp| bp.temporary)
    }

    pub fn get(&self, address: u32) -> Option<&Breakpoint> {
        self.breakpoints.get(&address)
    }

    /// Count a hit at `address`, dropping the breakpoint if temporary
    pub fn record_hit(&mut self, address: u32) {
        let temporary = match self.breakpoints.get_mut(&address) {
            Some(bp) => {
                bp.hit_count += 1;
                bp.temporary
            }
            None => return,
        };
        if temporary {
            self.breakpoints.remove(&address);
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &Breakpoint> {
        self.breakpoints.values()
    }

    pub fn len(&self) -> usize {
        self.breakpoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.breakpoints.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_and_query() {
        let mut bps = BreakPoints::new();
        bps.add(0x8000_3100, false);
        bps.add(0x8000_3200, true);

        assert!(bps.is_address_breakpoint(0x8000_3100));
        assert!(!bps.is_address_breakpoint(0x8000_3104));
        assert!(bps.is_temporary(0x8000_3200));
        assert!(!bps.is_temporary(0x8000_3100));
        assert_eq!(bps.len(), 2);
    }

    #[test]
    fn test_disabled_breakpoint_does_not_match() {
        let mut bps = BreakPoints::new();
        bps.add(0x100, false);
        assert!(bps.set_enabled(0x100, false));
        assert!(!bps.is_address_breakpoint(0x100));
        assert!(!bps.set_enabled(0x200, true));
    }

    #[test]
    fn test_clear_temporary_keeps_permanent() {
        let mut bps = BreakPoints::new();
        bps.add(0x100, false);
        bps.add(0x200, true);
        bps.clear_temporary();
        assert!(bps.is_address_breakpoint(0x100));
        assert!(!bps.is_address_breakpoint(0x200));
    }

    #[test]
    fn test_temporary_removed_on_hit() {
        let mut bps = BreakPoints::new();
        bps.add(0x100, false);
        bps.add(0x200, true);
        bps.record_hit(0x100);
        bps.record_hit(0x200);
        assert_eq!(bps.get(0x100).unwrap().hit_count, 1);
        assert!(bps.get(0x200).is_none());
    }

    #[test]
    fn test_iter_is_address_ordered() {
        let mut bps = BreakPoints::new();
        bps.add(0x300, false);
        bps.add(0x100, false);
        bps.add(0x200, false);
        let addrs: Vec<u32> = bps.iter().map(|bp| bp.address).collect();
        assert_eq!(addrs, vec![0x100, 0x200, 0x300]);
        bps.clear();
        assert!(bps.is_empty());
    }
}
