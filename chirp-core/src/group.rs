//! Hierarchical mix groups.
//!
//! A group scales the volume of every task routed to it and can pause them
//! all at once. Groups nest: a task's effective gain is the product of its
//! group chain up to the master volume.

use crate::error::{ChirpError, Result};
use slotmap::SlotMap;

slotmap::new_key_type! {
    /// Handle to a mix group.
    pub struct GroupId;
}

#[derive(Debug, Clone)]
pub struct MixGroup {
    name: String,
    volume: f32,
    paused: bool,
    parent: Option<GroupId>,
}

impl MixGroup {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn volume(&self) -> f32 {
        self.volume
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    pub fn parent(&self) -> Option<GroupId> {
        self.parent
    }
}

/// Combined effect of a group chain on one task.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GroupGain {
    pub volume: f32,
    pub paused: bool,
}

#[derive(Debug)]
pub struct MixGroups {
    groups: SlotMap<GroupId, MixGroup>,
    master_volume: f32,
}

impl Default for MixGroups {
    fn default() -> Self {
        Self::new()
    }
}

impl MixGroups {
    pub fn new() -> Self {
        Self {
            groups: SlotMap::with_key(),
            master_volume: 1.0,
        }
    }

    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    pub fn get(&self, id: GroupId) -> Option<&MixGroup> {
        self.groups.get(id)
    }

    pub fn master_volume(&self) -> f32 {
        self.master_volume
    }

    pub fn set_master_volume(&mut self, volume: f32) {
        self.master_volume = volume.max(0.0);
    }

    /// Creates a group, optionally nested under `parent`.
    pub fn create(&mut self, name: impl Into<String>, parent: Option<GroupId>) -> Result<GroupId> {
        if let Some(parent) = parent {
            self.check(parent)?;
        }
        Ok(self.groups.insert(MixGroup {
            name: name.into(),
            volume: 1.0,
            paused: false,
            parent,
        }))
    }

    /// Removes a group. Its children move up to its parent; tasks routed to it
    /// play as if ungrouped.
    pub fn remove(&mut self, id: GroupId) -> Result<()> {
        let removed = self
            .groups
            .remove(id)
            .ok_or_else(|| unknown_group(id))?;
        for group in self.groups.values_mut() {
            if group.parent == Some(id) {
                group.parent = removed.parent;
            }
        }
        log::debug!("Removed mix group '{}'", removed.name);
        Ok(())
    }

    pub fn set_volume(&mut self, id: GroupId, volume: f32) -> Result<()> {
        self.group_mut(id)?.volume = volume.max(0.0);
        Ok(())
    }

    pub fn set_paused(&mut self, id: GroupId, paused: bool) -> Result<()> {
        self.group_mut(id)?.paused = paused;
        Ok(())
    }

    /// Moves `id` under `parent`. Refuses moves that would form a cycle.
    pub fn set_parent(&mut self, id: GroupId, parent: Option<GroupId>) -> Result<()> {
        self.check(id)?;
        if let Some(parent) = parent {
            self.check(parent)?;
            let mut cursor = Some(parent);
            while let Some(current) = cursor {
                if current == id {
                    return Err(ChirpError::InvalidState(
                        "Mix group cannot be nested inside itself".to_string(),
                    ));
                }
                cursor = self.groups.get(current).and_then(|g| g.parent);
            }
        }
        self.group_mut(id)?.parent = parent;
        Ok(())
    }

    /// Walks the chain from `group` to the root.
    pub fn effective(&self, group: Option<GroupId>) -> GroupGain {
        let mut gain = GroupGain {
            volume: self.master_volume,
            paused: false,
        };
        let mut cursor = group;
        // At most one step per group.
        let mut depth = self.groups.len();
        while let Some(id) = cursor {
            let Some(g) = self.groups.get(id) else { break };
            gain.volume *= g.volume;
            gain.paused |= g.paused;
            cursor = g.parent;
            if depth == 0 {
                break;
            }
            depth -= 1;
        }
        gain
    }

    fn check(&self, id: GroupId) -> Result<()> {
        if self.groups.contains_key(id) {
            Ok(())
        } else {
            Err(unknown_group(id))
        }
    }

    fn group_mut(&mut self, id: GroupId) -> Result<&mut MixGroup> {
        self.groups.get_mut(id).ok_or_else(|| unknown_group(id))
    }
}

fn unknown_group(id: GroupId) -> ChirpError {
    ChirpError::InvalidState(format!("Unknown mix group {:?}", id))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gain_multiplies_down_the_chain() {
        let mut groups = MixGroups::new();
        let music = groups.create("music", None).unwrap();
        let drums = groups.create("drums", Some(music)).unwrap();
        groups.set_volume(music, 0.5).unwrap();
        groups.set_volume(drums, 0.5).unwrap();
        groups.set_master_volume(0.8);

        let gain = groups.effective(Some(drums));
        assert!((gain.volume - 0.2).abs() < 1e-6);
        assert!(!gain.paused);
        assert_eq!(groups.effective(None).volume, 0.8);
    }

    #[test]
    fn pause_propagates_to_children() {
        let mut groups = MixGroups::new();
        let sfx = groups.create("sfx", None).unwrap();
        let ui = groups.create("ui", Some(sfx)).unwrap();
        groups.set_paused(sfx, true).unwrap();
        assert!(groups.effective(Some(ui)).paused);
    }

    #[test]
    fn rejects_cycles() {
        let mut groups = MixGroups::new();
        let a = groups.create("a", None).unwrap();
        let b = groups.create("b", Some(a)).unwrap();
        assert!(groups.set_parent(a, Some(b)).is_err());
        assert!(groups.set_parent(a, Some(a)).is_err());
    }

    #[test]
    fn removal_reparents_children() {
        let mut groups = MixGroups::new();
        let a = groups.create("a", None).unwrap();
        let b = groups.create("b", Some(a)).unwrap();
        let c = groups.create("c", Some(b)).unwrap();
        groups.remove(b).unwrap();

        assert_eq!(groups.get(c).unwrap().parent(), Some(a));
        assert_eq!(groups.effective(Some(b)).volume, 1.0);
        assert!(groups.remove(b).is_err());
    }
}
