//! The Down agent: takes boxes off the truck-load zone and drops them on the
//! conveyor.
//!
//! Interaction branch: `0 none, 1 take from truck, 2 place on conveyor`.

use rand::Rng;
use tracing::{debug, warn};

use crate::{
    EntityId, ItemHandle, ItemKind, Role,
    action::{ActionMask, ActionVector, BRANCH_INTERACT, Interact},
    config::DownAgentConfig,
    controller::{AgentController, AgentCore, BodyPhase, Observation},
    episode::{EpisodeState, RewardKind, StepReport, TerminalReason},
    substrate::{Simulation, ZoneRef},
    zone::{EntryLatch, ZoneTracker, ZoneTransition},
};

/// Observation layout of the Down agent.
pub mod obs {
    pub const POS_X: usize = 0;
    pub const POS_Y: usize = 1;
    pub const POS_Z: usize = 2;
    pub const IN_TRUCK_LOAD: usize = 3;
    pub const IN_CONVEYOR_INPUT: usize = 4;
    pub const HOLDING: usize = 5;
    pub const LEN: usize = 6;
}

#[derive(Debug)]
pub struct DownAgentController {
    core: AgentCore,
    config: DownAgentConfig,
    truck_entry: EntryLatch,
    conveyor_entry: EntryLatch,
}

impl DownAgentController {
    pub fn new(id: EntityId, config: DownAgentConfig, seed: u64) -> Self {
        DownAgentController {
            core: AgentCore::new(id, Role::Down, config.movement.clone(), config.spawn.clone(), seed),
            config,
            truck_entry: EntryLatch::default(),
            conveyor_entry: EntryLatch::default(),
        }
    }

    pub fn config(&self) -> &DownAgentConfig {
        &self.config
    }

    pub fn zones(&self) -> &ZoneTracker {
        &self.core.zones
    }

    pub fn has_placed(&self) -> bool {
        self.core.episode.has_completed_required_delivery
    }

    /// Once the spawn cap is used up and nothing is held, there is nothing
    /// left to take or place this episode.
    pub fn interaction_locked(&self) -> bool {
        self.core.episode.boxes_taken >= self.config.max_boxes_per_episode && self.core.held.is_empty()
    }

    fn in_truck_load_zone(&self) -> bool {
        self.core.zones.inside(&self.config.zones.truck_load)
    }

    fn in_conveyor_input_zone(&self) -> bool {
        self.core.zones.inside(&self.config.zones.conveyor_input)
    }

    fn invalid_action(&mut self, why: &'static str) {
        debug!(agent = self.core.id, why, "invalid action");
        self.core
            .reward(RewardKind::InvalidAction, self.config.rewards.invalid_action);
    }

    fn take_from_truck(&mut self, world: &mut dyn Simulation) {
        if !self.in_truck_load_zone() {
            return self.invalid_action("take outside truck-load zone");
        }
        if !self.core.held.is_empty() {
            return self.invalid_action("take while holding");
        }
        if self.core.episode.boxes_taken >= self.config.max_boxes_per_episode {
            return self.invalid_action("spawn cap reached");
        }

        let kind = if self.core.rng.random_bool(0.5) {
            ItemKind::Small
        } else {
            ItemKind::Large
        };
        let Some(offset) = self.config.carry_offset else {
            warn!(agent = self.core.id, "no carry point configured");
            return self.invalid_action("no carry point");
        };
        if !self.config.spawnable_kinds.contains(&kind) {
            warn!(agent = self.core.id, ?kind, "box kind has no prefab");
            return self.invalid_action("kind not spawnable");
        }

        let carry_point = world.body_position(self.core.id) + offset;
        let handle = world.spawn_item(kind, carry_point);
        self.core.held.pick_up(world, self.core.id, handle, offset);
        self.core.episode.boxes_taken += 1;
        self.core.episode.idle_steps = 0;
        self.conveyor_entry.cycle_restarted(self.config.entry_reward_mode);
        self.core
            .reward(RewardKind::LoadFromTruck, self.config.rewards.load_from_truck);
        debug!(agent = self.core.id, item = handle.id, ?kind, "took box from truck");
    }

    fn place_on_conveyor(&mut self, world: &mut dyn Simulation) {
        let Some(drop_point) = self.config.conveyor_drop_point else {
            warn!(agent = self.core.id, "no conveyor drop point configured");
            return self.invalid_action("no drop point");
        };
        if self.core.held.is_empty() {
            return self.invalid_action("place with empty hands");
        }
        if self.config.place_requires_conveyor_zone && !self.in_conveyor_input_zone() {
            return self.invalid_action("place outside conveyor input zone");
        }

        let placed = self.core.held.release_at(world, drop_point);
        self.core.episode.boxes_delivered += 1;
        self.core.episode.has_completed_required_delivery = true;
        self.truck_entry.cycle_restarted(self.config.entry_reward_mode);
        self.core
            .reward(RewardKind::PlaceOnConveyor, self.config.rewards.place_on_conveyor);
        debug!(agent = self.core.id, item = ?placed.map(|h| h.id), "placed box on conveyor");
    }

    /// Returns `true` when the entry ended the episode.
    fn zone_entered(&mut self, zone: &ZoneRef) -> bool {
        let mode = self.config.entry_reward_mode;
        let holding = !self.core.held.is_empty();
        if zone.tag == self.config.zones.truck_load {
            if self.truck_entry.try_pay(mode, !holding) {
                self.core
                    .reward(RewardKind::EnterTruckLoadZone, self.config.rewards.enter_truck_zone);
            }
        } else if zone.tag == self.config.zones.conveyor_input {
            if self.conveyor_entry.try_pay(mode, holding) {
                self.core.reward(
                    RewardKind::EnterConveyorZoneWithBox,
                    self.config.rewards.enter_conveyor_zone_with_box,
                );
            }
        } else if let Some(restricted) = self
            .config
            .restricted_zone
            .as_ref()
            .filter(|r| r.tag == zone.tag)
        {
            return self.core.restricted_entry(restricted);
        }
        false
    }

    fn zone_exited(&mut self, zone: &ZoneRef) {
        let mode = self.config.entry_reward_mode;
        if zone.tag == self.config.zones.truck_load {
            self.truck_entry.zone_left(mode);
        } else if zone.tag == self.config.zones.conveyor_input {
            self.conveyor_entry.zone_left(mode);
        }
        self.core
            .idle_zone_exited(self.config.idle_timeout.as_ref(), &zone.tag);
    }
}

impl AgentController for DownAgentController {
    fn id(&self) -> EntityId {
        self.core.id
    }

    fn role(&self) -> Role {
        Role::Down
    }

    fn begin_episode(&mut self, world: &mut dyn Simulation) {
        self.core.reset(world);
        self.truck_entry = EntryLatch::default();
        self.conveyor_entry = EntryLatch::default();
    }

    fn observe(&self, world: &dyn Simulation) -> Observation {
        let [x, y, z] = self.core.observed_position(world);
        let flag = |b: bool| if b { 1.0 } else { 0.0 };
        Observation {
            role: Role::Down,
            values: vec![
                x,
                y,
                z,
                flag(self.in_truck_load_zone()),
                flag(self.in_conveyor_input_zone()),
                flag(!self.core.held.is_empty()),
            ],
        }
    }

    fn action_mask(&self) -> ActionMask {
        let mut mask = ActionMask::default();
        if self.interaction_locked() {
            mask.set_enabled(BRANCH_INTERACT, Interact::Primary.index(), false);
            mask.set_enabled(BRANCH_INTERACT, Interact::Secondary.index(), false);
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

        let action = if self.interaction_locked() {
            action.with_interact(Interact::None)
        } else {
            action
        };

        match self.core.advance_body(world, &action) {
            BodyPhase::OutOfBounds => {
                self.core
                    .reward(RewardKind::OutOfBounds, self.config.rewards.out_of_map);
                self.core.terminate(TerminalReason::OutOfBounds);
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
                            if self.zone_entered(&zone) {
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
            Interact::Primary => self.take_from_truck(world),
            Interact::Secondary => self.place_on_conveyor(world),
            Interact::None => {}
        }

        self.core.reward(RewardKind::Step, self.config.rewards.step);

        if self.core.idle_in_zone(self.config.idle_timeout.as_ref()) {
            return self.core.finish_step();
        }

        // The environment ends the episode on this step; only the shortfall
        // is reported here.
        let episode = &self.core.episode;
        if episode.at_budget_end(self.config.max_steps)
            && !episode.has_completed_required_delivery
            && !episode.shortfall_applied
        {
            self.core.episode.shortfall_applied = true;
            self.core.reward(
                RewardKind::Shortfall,
                self.config.rewards.no_conveyor_placement,
            );
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
