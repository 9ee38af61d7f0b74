use std::collections::{BTreeMap, BTreeSet};

use crate::{
    config::EntryRewardMode,
    substrate::{ZoneId, ZoneRef},
};

/// A change in zone membership produced by [`ZoneTracker::sync`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ZoneTransition {
    /// First instance of `tag` entered.
    Entered(ZoneRef),
    /// Last instance of `tag` left.
    Exited(ZoneRef),
}

/// Membership of one tag: which concrete volumes currently overlap the agent,
/// and which of them is the active one.
#[derive(Debug, Clone, Default)]
struct TagState {
    overlaps: BTreeSet<ZoneId>,
    active: Option<ZoneId>,
}

/// Per-agent zone occupancy keyed by tag.
///
/// `inside(tag)` is true exactly when the agent overlaps at least one volume
/// carrying that tag.
#[derive(Debug, Clone, Default)]
pub struct ZoneTracker {
    tags: BTreeMap<String, TagState>,
}

impl ZoneTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inside(&self, tag: &str) -> bool {
        self.tags.get(tag).is_some_and(|s| !s.overlaps.is_empty())
    }

    /// The most recently entered volume of `tag` that the agent has not left
    /// yet.
    pub fn active_zone(&self, tag: &str) -> Option<ZoneId> {
        self.tags.get(tag).and_then(|s| s.active)
    }

    pub fn clear(&mut self) {
        self.tags.clear();
    }

    /// Records entry into one volume. Returns `true` when this is the first
    /// overlapping volume of its tag.
    pub fn enter(&mut self, zone: &ZoneRef) -> bool {
        let state = self.tags.entry(zone.tag.clone()).or_default();
        let was_inside = !state.overlaps.is_empty();
        let added = state.overlaps.insert(zone.id);
        if added {
            state.active = Some(zone.id);
        }
        added && !was_inside
    }

    /// Records exit from one volume. Returns `true` when no volume of the tag
    /// remains.
    pub fn exit(&mut self, zone: &ZoneRef) -> bool {
        let Some(state) = self.tags.get_mut(&zone.tag) else {
            return false;
        };
        if !state.overlaps.remove(&zone.id) {
            return false;
        }
        if state.active == Some(zone.id) {
            state.active = None;
        }
        state.overlaps.is_empty()
    }

    /// Reconciles membership with the substrate's current overlap set and
    /// returns tag-level transitions, exits first.
    pub fn sync(&mut self, current: &[ZoneRef]) -> Vec<ZoneTransition> {
        let mut transitions = Vec::new();

        let stale: Vec<ZoneRef> = self
            .tags
            .iter()
            .flat_map(|(tag, state)| {
                state.overlaps.iter().filter_map(move |id| {
                    let still_there = current.iter().any(|z| z.id == *id && &z.tag == tag);
                    (!still_there).then(|| ZoneRef {
                        id: *id,
                        tag: tag.clone(),
                    })
                })
            })
            .collect();
        for zone in stale {
            if self.exit(&zone) {
                transitions.push(ZoneTransition::Exited(zone));
            }
        }

        for zone in current {
            if self.enter(zone) {
                transitions.push(ZoneTransition::Entered(zone.clone()));
            }
        }

        transitions
    }
}

/// One-shot reward latch for a zone-entry bonus.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntryLatch {
    armed: bool,
}

impl Default for EntryLatch {
    fn default() -> Self {
        EntryLatch { armed: true }
    }
}

impl EntryLatch {
    /// Fires (returns `true`) if armed and disarms.
    pub fn fire(&mut self) -> bool {
        std::mem::replace(&mut self.armed, false)
    }

    pub fn rearm(&mut self) {
        self.armed = true;
    }

    pub fn is_armed(&self) -> bool {
        self.armed
    }

    /// Whether a qualifying entry pays under `mode`. Latching modes disarm on
    /// payment.
    pub fn try_pay(&mut self, mode: EntryRewardMode, eligible: bool) -> bool {
        if !eligible {
            return false;
        }
        match mode {
            EntryRewardMode::EveryEntry => true,
            EntryRewardMode::OncePerOccupancy | EntryRewardMode::OncePerCarryCycle => self.fire(),
        }
    }

    pub fn zone_left(&mut self, mode: EntryRewardMode) {
        if mode == EntryRewardMode::OncePerOccupancy {
            self.rearm();
        }
    }

    pub fn cycle_restarted(&mut self, mode: EntryRewardMode) {
        if mode == EntryRewardMode::OncePerCarryCycle {
            self.rearm();
        }
    }
}
