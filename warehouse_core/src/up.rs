//! The Up agent: grabs boxes off the conveyor pickup zone and loads them into
//! the truck matching their size.
//!
//! Interaction branch: `0 none, 1 grab from conveyor, 2 load truck`.

use rand::Rng;
use tracing::{debug, info, warn};

use crate::{
    EntityId, ItemHandle, ItemKind, Role,
    action::{ActionMask, ActionVector, BRANCH_INTERACT, Interact},
    config::UpAgentConfig,
    controller::{AgentController, AgentCore, BodyPhase, Observation},
    episode::{EpisodeState, RewardKind, StepReport, TerminalReason},
    substrate::{Simulation, ZoneRef, retire_item},
    zone::{EntryLatch, ZoneTracker, ZoneTransition},
};

/// Observation layout of the Up agent.
pub mod obs {
    pub const POS_X: usize = 0;
    pub const POS_Y: usize = 1;
    pub const POS_Z: usize = 2;
    pub const IN_PICKUP: usize = 3;
    pub const IN_SMALL_TRUCK: usize = 4;
    pub const IN_LARGE_TRUCK: usize = 5;
    pub const HOLDING: usize = 6;
    pub const HELD_SMALL: usize = 7;
    pub const HELD_LARGE: usize = 8;
    /// Delivered count over the quota.
    pub const PROGRESS: usize = 9;
    pub const LEN: usize = 10;
}

#[derive(Debug)]
pub struct UpAgentController {
    core: AgentCore,
    config: UpAgentConfig,
    pickup_entry: EntryLatch,
    /// Shared by both truck zones.
    truck_entry: EntryLatch,
}

impl UpAgentController {
    pub fn new(id: EntityId, config: UpAgentConfig, seed: u64) -> Self {
        UpAgentController {
            core: AgentCore::new(id, Role::Up, config.movement.clone(), config.spawn.clone(), seed),
            config,
            pickup_entry: EntryLatch::default(),
            truck_entry: EntryLatch::default(),
        }
    }

    pub fn config(&self) -> &UpAgentConfig {
        &self.config
    }

    pub fn zones(&self) -> &ZoneTracker {
        &self.core.zones
    }

    pub fn quota_reached(&self) -> bool {
        self.core.episode.boxes_delivered >= self.config.boxes_per_episode
    }

    fn in_pickup_zone(&self) -> bool {
        self.core.zones.inside(&self.config.zones.conveyor_pickup)
    }

    fn in_small_truck_zone(&self) -> bool {
        self.core.zones.inside(&self.config.zones.small_truck)
    }

    fn in_large_truck_zone(&self) -> bool {
        self.core.zones.inside(&self.config.zones.large_truck)
    }

    fn in_any_truck_zone(&self) -> bool {
        self.in_small_truck_zone() || self.in_large_truck_zone()
    }

    fn can_grab(&self) -> bool {
        self.core.held.is_empty()
            && self.in_pickup_zone()
            && self
                .core
                .zones
                .active_zone(&self.config.zones.conveyor_pickup)
                .is_some()
    }

    fn invalid_action(&mut self, why: &'static str) {
        debug!(agent = self.core.id, why, "invalid action");
        self.core
            .reward(RewardKind::InvalidAction, self.config.rewards.invalid_action);
    }

    /// Destroys the held item and every loose item inside the cleanup scope.
    /// Boxes other agents are carrying belong to their slots and are left
    /// alone.
    fn clear_scope(&mut self, world: &mut dyn Simulation) {
        self.core.held.consume(world);
        let Some(scope) = self.config.cleanup_scope else {
            return;
        };
        let doomed: Vec<ItemHandle> = world
            .all_items()
            .into_iter()
            .filter(|h| {
                world
                    .item_pose(h.id)
                    .is_some_and(|pose| pose.carrier.is_none() && scope.contains(pose.position))
            })
            .collect();
        for handle in &doomed {
            retire_item(world, handle.id);
        }
        if !doomed.is_empty() {
            debug!(agent = self.core.id, cleared = doomed.len(), "cleared items in scope");
        }
    }

    fn end_episode(&mut self, world: &mut dyn Simulation, reason: TerminalReason) {
        self.clear_scope(world);
        self.core.terminate(reason);
    }

    fn grab_from_conveyor(&mut self, world: &mut dyn Simulation) {
        if !self.in_pickup_zone() {
            return self.invalid_action("grab outside pickup zone");
        }
        if !self.core.held.is_empty() {
            return self.invalid_action("grab while holding");
        }
        let Some(offset) = self.config.carry_offset else {
            warn!(agent = self.core.id, "no carry point configured");
            return self.invalid_action("no carry point");
        };
        let Some(active) = self
            .core
            .zones
            .active_zone(&self.config.zones.conveyor_pickup)
        else {
            return self.invalid_action("no active pickup zone");
        };
        let Some(bounds) = world.zone_bounds(active) else {
            warn!(agent = self.core.id, zone = active, "pickup zone has no bounds");
            return self.invalid_action("unknown pickup zone");
        };

        let candidates: Vec<ItemHandle> = world
            .items_overlapping(&bounds)
            .into_iter()
            .filter(|h| {
                world
                    .item_pose(h.id)
                    .is_some_and(|pose| pose.carrier.is_none())
            })
            .collect();
        if candidates.is_empty() {
            return self.invalid_action("nothing to grab");
        }

        let handle = candidates[self.core.rng.random_range(0..candidates.len())];
        self.core.held.pick_up(world, self.core.id, handle, offset);
        self.core.episode.boxes_taken += 1;
        self.truck_entry.cycle_restarted(self.config.entry_reward_mode);
        self.core.reward(RewardKind::GrabBox, self.config.rewards.grab_box);
        debug!(agent = self.core.id, item = handle.id, kind = ?handle.kind, "grabbed box");
    }

    fn load_truck(&mut self, world: &mut dyn Simulation) {
        let Some(held_kind) = self.core.held.kind() else {
            return self.invalid_action("load with empty hands");
        };
        if !self.in_any_truck_zone() {
            return self.invalid_action("load outside truck zones");
        }

        let target = if self.in_small_truck_zone() {
            ItemKind::Small
        } else {
            ItemKind::Large
        };
        if held_kind == target {
            self.core
                .reward(RewardKind::CorrectTruck, self.config.rewards.correct_truck);
        } else {
            self.core
                .reward(RewardKind::WrongTruck, self.config.rewards.wrong_truck);
        }

        let loaded = self.core.held.consume(world);
        self.core.episode.boxes_delivered += 1;
        let mode = self.config.entry_reward_mode;
        self.pickup_entry.cycle_restarted(mode);
        self.truck_entry.cycle_restarted(mode);
        debug!(
            agent = self.core.id,
            item = ?loaded.map(|h| h.id),
            ?held_kind,
            ?target,
            delivered = self.core.episode.boxes_delivered,
            "loaded truck"
        );

        if self.quota_reached() {
            self.core.episode.has_completed_required_delivery = true;
            info!(agent = self.core.id, quota = self.config.boxes_per_episode, "delivery quota reached");
            self.end_episode(world, TerminalReason::Success);
        }
    }

    /// Returns `true` when the entry ended the episode.
    fn zone_entered(&mut self, world: &mut dyn Simulation, zone: &ZoneRef) -> bool {
        let mode = self.config.entry_reward_mode;
        let holding = !self.core.held.is_empty();
        let tags = &self.config.zones;
        if zone.tag == tags.conveyor_pickup {
            if self.pickup_entry.try_pay(mode, !holding) {
                self.core
                    .reward(RewardKind::EnterPickupZone, self.config.rewards.enter_pickup_zone);
            }
        } else if zone.tag == tags.small_truck || zone.tag == tags.large_truck {
            if self.truck_entry.try_pay(mode, holding) {
                self.core.reward(
                    RewardKind::EnterTruckZoneWithBox,
                    self.config.rewards.enter_truck_zone_with_box,
                );
            }
        } else if let Some(restricted) = self
            .config
            .restricted_zone
            .as_ref()
            .filter(|r| r.tag == zone.tag)
        {
            if self.core.restricted_entry(restricted) {
                self.clear_scope(world);
                return true;
            }
        }
        false
    }

    fn zone_exited(&mut self, zone: &ZoneRef) {
        let mode = self.config.entry_reward_mode;
        let tags = &self.config.zones;
        if zone.tag == tags.conveyor_pickup {
            self.pickup_entry.zone_left(mode);
        } else if zone.tag == tags.small_truck || zone.tag == tags.large_truck {
            self.truck_entry.zone_left(mode);
        }
        self.core
            .idle_zone_exited(self.config.idle_timeout.as_ref(), &zone.tag);
    }
}

impl AgentController for UpAgentController {
    fn id(&self) -> EntityId {
        self.core.id
    }

    fn role(&self) -> Role {
        Role::Up
    }

    fn begin_episode(&mut self, world: &mut dyn Simulation) {
        self.core.reset(world);
        self.clear_scope(world);
        self.pickup_entry = EntryLatch::default();
        self.truck_entry = EntryLatch::default();
    }

    fn observe(&self, world: &dyn Simulation) -> Observation {
        let [x, y, z] = self.core.observed_position(world);
        let flag = |b: bool| if b { 1.0 } else { 0.0 };
        let held = self.core.held.kind();
        let quota = self.config.boxes_per_episode.max(1) as f32;
        Observation {
            role: Role::Up,
            values: vec![
                x,
                y,
                z,
                flag(self.in_pickup_zone()),
                flag(self.in_small_truck_zone()),
                flag(self.in_large_truck_zone()),
                flag(held.is_some()),
                flag(held == Some(ItemKind::Small)),
                flag(held == Some(ItemKind::Large)),
                self.core.episode.boxes_delivered as f32 / quota,
            ],
        }
    }

    fn action_mask(&self) -> ActionMask {
        let mut mask = ActionMask::default();
        if self.core.held.is_empty() {
            mask.set_enabled(BRANCH_INTERACT, Interact::Secondary.index(), false);
            if !self.can_grab() {
                mask.set_enabled(BRANCH_INTERACT, Interact::Primary.index(), false);
            }
        } else {
            mask.set_enabled(BRANCH_INTERACT, Interact::Primary.index(), false);
            if !self.in_any_truck_zone() {
                mask.set_enabled(BRANCH_INTERACT, Interact::Secondary.index(), false);
            }
        }
        mask
    }

    fn step(&mut self, world: &mut dyn Simulation, action: ActionVector) -> StepReport {
        if !self.core.episode.is_running() {
            self.begin_episode(world);
        }
        self.core.episode.steps += 1;
        if let Some(lost) = self.core.held.forget_missing(world) {
            warn!(agent = self.core.id, item = lost.id, "held item no longer exists");
        }

        match self.core.advance_body(world, &action) {
            BodyPhase::OutOfBounds => {
                self.core
                    .reward(RewardKind::OutOfBounds, self.config.rewards.out_of_map);
                self.end_episode(world, TerminalReason::OutOfBounds);
                return self.core.finish_step();
            }
            BodyPhase::Settled {
                transitions,
                contacts,
            } => {
                for transition in transitions {
                    match transition {
                        ZoneTransition::Exited(zone) => self.zone_exited(&zone),
                        ZoneTransition::Entered(zone) => {
                            if self.zone_entered(world, &zone) {
                                return self.core.finish_step();
                            }
                        }
                    }
                }
                self.core
                    .hazard_contacts(self.config.hazard.as_ref(), &contacts);
                self.core
                    .restricted_linger(self.config.restricted_zone.as_ref());
            }
        }

        match action.interact {
            Interact::Primary => self.grab_from_conveyor(world),
            Interact::Secondary => self.load_truck(world),
            Interact::None => {}
        }

        self.core.reward(RewardKind::Step, self.config.rewards.step);
        if !self.core.episode.is_running() {
            return self.core.finish_step();
        }

        if self.core.idle_in_zone(self.config.idle_timeout.as_ref()) {
            self.clear_scope(world);
            return self.core.finish_step();
        }

        if self.core.episode.at_budget_end(self.config.max_steps) {
            if !self.quota_reached() && !self.core.episode.shortfall_applied {
                self.core.episode.shortfall_applied = true;
                self.core
                    .reward(RewardKind::Shortfall, self.config.rewards.no_delivery);
            }
            self.end_episode(world, TerminalReason::StepBudget);
        }

        self.core.finish_step()
    }

    fn interrupt(&mut self) {
        self.core.terminate(TerminalReason::Interrupted);
    }

    fn episode(&self) -> &EpisodeState {
        &self.core.episode
    }

    fn max_steps(&self) -> u32 {
        self.config.max_steps
    }

    fn held_item(&self) -> Option<ItemHandle> {
        self.core.held.item()
    }
}
