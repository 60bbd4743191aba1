//! Solid Registry
//!
//! Per-container ordered solid list with a dirty-id set. Removal leaves a hole
//! until the next rescan, which compacts the list so ids are contiguous again
//! and marks everything dirty.
//!
//! Ids at or beyond `max_solids` never enter the registry: the add is refused
//! and a warning is kept so the host can show it.

use std::collections::BTreeSet;

use super::types::{Solid, SolidId};

/// What a container has to re-upload after an edit.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DirtySolids {
    /// Nothing changed
    None,
    /// These ids changed (ascending)
    Some(Vec<SolidId>),
    /// Topology changed; every solid must be uploaded and every chunk refiltered
    All,
}

impl DirtySolids {
    pub fn is_none(&self) -> bool {
        matches!(self, DirtySolids::None)
    }
}

/// Ordered solids of one container.
pub struct SolidRegistry {
    /// Slot = id; `None` marks a removed solid awaiting compaction
    slots: Vec<Option<Solid>>,
    dirty: BTreeSet<SolidId>,
    all_dirty: bool,
    needs_rescan: bool,
    max_solids: u32,
    warning: Option<String>,
}

impl SolidRegistry {
    pub fn new(max_solids: u32) -> Self {
        Self {
            slots: Vec::new(),
            dirty: BTreeSet::new(),
            all_dirty: true,
            needs_rescan: false,
            max_solids,
            warning: None,
        }
    }

    /// Number of slots, including holes left by removals.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn max_solids(&self) -> u32 {
        self.max_solids
    }

    /// Warning raised by the last capacity violation, if any.
    pub fn warning(&self) -> Option<&str> {
        self.warning.as_deref()
    }

    pub fn clear_warning(&mut self) {
        self.warning = None;
    }

    pub fn needs_rescan(&self) -> bool {
        self.needs_rescan
    }

    pub fn get(&self, id: SolidId) -> Option<&Solid> {
        self.slots.get(id as usize).and_then(|s| s.as_ref())
    }

    /// Append a solid. Returns `None` (and sets the warning) when the registry is full.
    pub fn add_solid(&mut self, solid: Solid) -> Option<SolidId> {
        let id = self.slots.len() as u32;
        if id >= self.max_solids {
            self.set_warning(format!(
                "too many solids: limit is {}, increase max solids in the global limits",
                self.max_solids
            ));
            return None;
        }
        self.slots.push(Some(solid));
        self.dirty.insert(id);
        // A new solid changes every chunk's filtered list
        self.all_dirty = true;
        Some(id)
    }

    /// Remove a solid. The id stays reserved until the next rescan.
    pub fn remove_solid(&mut self, id: SolidId) -> bool {
        match self.slots.get_mut(id as usize) {
            Some(slot @ Some(_)) => {
                *slot = None;
                self.needs_rescan = true;
                true
            }
            _ => false,
        }
    }

    /// Mutate a solid in place and mark it dirty.
    pub fn update_solid(&mut self, id: SolidId, update: impl FnOnce(&mut Solid)) -> bool {
        match self.slots.get_mut(id as usize) {
            Some(Some(solid)) => {
                update(solid);
                self.mark_dirty(id);
                true
            }
            _ => false,
        }
    }

    /// Mark a solid dirty. Idempotent.
    ///
    /// Ids at or beyond the cap are ignored with a warning; ids beyond the current
    /// solid count (stale after an out-of-band change) request a full rescan.
    pub fn mark_dirty(&mut self, id: SolidId) {
        if id >= self.max_solids {
            self.set_warning(format!(
                "solid {} is beyond the solid limit {} and is not uploaded",
                id, self.max_solids
            ));
            return;
        }
        if (id as usize) >= self.slots.len() || self.slots[id as usize].is_none() {
            self.needs_rescan = true;
            return;
        }
        self.dirty.insert(id);
    }

    /// Mark every solid dirty.
    pub fn mark_all_dirty(&mut self) {
        self.all_dirty = true;
    }

    /// Compact the registry: drop holes, reassign contiguous ids in stable order
    /// and mark everything dirty. Returns the old-id → new-id remap.
    pub fn rescan(&mut self) -> Vec<Option<SolidId>> {
        let mut remap = Vec::with_capacity(self.slots.len());
        let mut next = 0u32;
        for slot in &self.slots {
            if slot.is_some() && next < self.max_solids {
                remap.push(Some(next));
                next += 1;
            } else {
                remap.push(None);
            }
        }
        let compacted: Vec<Option<Solid>> = self
            .slots
            .drain(..)
            .flatten()
            .take(self.max_solids as usize)
            .map(Some)
            .collect();
        self.slots = compacted;
        self.dirty.clear();
        self.all_dirty = true;
        self.needs_rescan = false;
        if self.slots.len() < self.max_solids as usize {
            self.warning = None;
        }
        log::debug!("[Registry] rescan compacted to {} solids", self.slots.len());
        remap
    }

    /// Take the pending dirty state, rescanning first if a stale id was seen.
    pub fn take_dirty(&mut self) -> DirtySolids {
        if self.needs_rescan {
            self.rescan();
        }
        if self.all_dirty {
            self.all_dirty = false;
            self.dirty.clear();
            return DirtySolids::All;
        }
        if self.dirty.is_empty() {
            return DirtySolids::None;
        }
        let ids = std::mem::take(&mut self.dirty).into_iter().collect();
        DirtySolids::Some(ids)
    }

    /// True if anything is waiting to be uploaded.
    pub fn has_pending(&self) -> bool {
        self.all_dirty || self.needs_rescan || !self.dirty.is_empty()
    }

    /// Change the cap. Solids beyond a lowered cap are dropped with a warning.
    pub fn set_max_solids(&mut self, max_solids: u32) {
        if max_solids == self.max_solids {
            return;
        }
        self.max_solids = max_solids;
        if self.slots.len() > max_solids as usize {
            self.slots.truncate(max_solids as usize);
            self.set_warning(format!(
                "solid limit lowered to {}, extra solids were dropped",
                max_solids
            ));
        }
        self.all_dirty = true;
    }

    /// Solids in id order. Holes (pending removals) are skipped.
    pub fn iter(&self) -> impl Iterator<Item = (SolidId, &Solid)> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(i, s)| s.as_ref().map(|s| (i as SolidId, s)))
    }

    /// Dense copy of the solid list. Only meaningful right after a rescan
    /// (no holes), which `take_dirty` guarantees.
    pub fn solids(&self) -> Vec<Solid> {
        self.slots.iter().flatten().copied().collect()
    }

    fn set_warning(&mut self, message: String) {
        if self.warning.as_deref() != Some(message.as_str()) {
            log::warn!("[Registry] {}", message);
        }
        self.warning = Some(message);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Vec3;

    fn solid_at(x: f32) -> Solid {
        Solid::new(1).with_position(Vec3::new(x, 0.0, 0.0))
    }

    #[test]
    fn test_add_assigns_sequential_ids() {
        let mut reg = SolidRegistry::new(64);
        assert_eq!(reg.add_solid(solid_at(0.0)), Some(0));
        assert_eq!(reg.add_solid(solid_at(1.0)), Some(1));
        assert_eq!(reg.len(), 2);
        assert_eq!(reg.take_dirty(), DirtySolids::All);
        assert_eq!(reg.take_dirty(), DirtySolids::None);
    }

    #[test]
    fn test_mark_dirty_is_idempotent() {
        let mut reg = SolidRegistry::new(64);
        reg.add_solid(solid_at(0.0));
        reg.add_solid(solid_at(1.0));
        reg.take_dirty();

        reg.mark_dirty(1);
        reg.mark_dirty(1);
        reg.mark_dirty(0);
        assert_eq!(reg.take_dirty(), DirtySolids::Some(vec![0, 1]));
    }

    #[test]
    fn test_add_beyond_cap_is_refused() {
        let mut reg = SolidRegistry::new(64);
        for i in 0..64 {
            assert!(reg.add_solid(solid_at(i as f32)).is_some());
        }
        assert!(reg.warning().is_none());
        assert_eq!(reg.add_solid(solid_at(99.0)), None);
        assert_eq!(reg.len(), 64);
        assert!(reg.warning().unwrap().contains("too many solids"));
    }

    #[test]
    fn test_cap_warning_clears_once_back_under_cap() {
        let mut reg = SolidRegistry::new(64);
        for i in 0..64 {
            reg.add_solid(solid_at(i as f32));
        }
        assert_eq!(reg.add_solid(solid_at(99.0)), None);
        assert!(reg.warning().is_some());

        // Still full: the warning survives a rescan
        reg.rescan();
        assert!(reg.warning().is_some());

        assert!(reg.remove_solid(0));
        assert_eq!(reg.take_dirty(), DirtySolids::All);
        assert_eq!(reg.len(), 63);
        assert!(reg.warning().is_none());
    }

    #[test]
    fn test_mark_dirty_beyond_cap_warns() {
        let mut reg = SolidRegistry::new(64);
        reg.add_solid(solid_at(0.0));
        reg.take_dirty();
        reg.mark_dirty(64);
        assert!(reg.warning().is_some());
        assert!(!reg.needs_rescan());
        assert_eq!(reg.take_dirty(), DirtySolids::None);
    }

    #[test]
    fn test_stale_dirty_id_requests_rescan() {
        let mut reg = SolidRegistry::new(64);
        reg.add_solid(solid_at(0.0));
        reg.take_dirty();
        reg.mark_dirty(5);
        assert!(reg.needs_rescan());
        assert_eq!(reg.take_dirty(), DirtySolids::All);
        assert!(!reg.needs_rescan());
    }

    #[test]
    fn test_rescan_compacts_in_stable_order() {
        let mut reg = SolidRegistry::new(64);
        for i in 0..5 {
            reg.add_solid(solid_at(i as f32));
        }
        assert!(reg.remove_solid(1));
        assert!(reg.remove_solid(3));
        assert!(!reg.remove_solid(3));

        let remap = reg.rescan();
        assert_eq!(remap, vec![Some(0), None, Some(1), None, Some(2)]);
        let ids: Vec<SolidId> = reg.iter().map(|(id, _)| id).collect();
        assert_eq!(ids, vec![0, 1, 2]);
        let xs: Vec<f32> = reg.iter().map(|(_, s)| s.position.x).collect();
        assert_eq!(xs, vec![0.0, 2.0, 4.0]);
        assert_eq!(reg.take_dirty(), DirtySolids::All);
    }

    #[test]
    fn test_update_marks_dirty() {
        let mut reg = SolidRegistry::new(64);
        reg.add_solid(solid_at(0.0));
        reg.take_dirty();
        assert!(reg.update_solid(0, |s| s.blend = 5.0));
        assert!(!reg.update_solid(9, |s| s.blend = 5.0));
        assert_eq!(reg.get(0).unwrap().blend, 5.0);
        assert_eq!(reg.take_dirty(), DirtySolids::Some(vec![0]));
    }

    #[test]
    fn test_lowering_cap_truncates() {
        let mut reg = SolidRegistry::new(128);
        for i in 0..100 {
            reg.add_solid(solid_at(i as f32));
        }
        reg.set_max_solids(64);
        assert_eq!(reg.len(), 64);
        assert!(reg.warning().is_some());
    }
}
