//! The contract both role controllers implement, and the body/zone/episode
//! plumbing they share.

use rand::{SeedableRng, rngs::StdRng};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::{
    EntityId, ItemHandle, Role,
    action::{ActionMask, ActionVector},
    config::{
        HazardConfig, IdleTimeoutConfig, MovementConfig, RestrictedZoneConfig, RestrictedZonePolicy,
        SpawnPose,
    },
    episode::{EpisodeState, RewardKind, RewardLedger, StepReport, TerminalReason},
    held::HeldSlot,
    movement::{self, normalized_position},
    substrate::Simulation,
    zone::{ZoneTracker, ZoneTransition},
};

/// Ordered observation vector handed to a policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    pub role: Role,
    pub values: Vec<f32>,
}

impl Observation {
    /// Reads a 0/1 flag; anything above one half counts as set.
    pub fn flag(&self, index: usize) -> bool {
        self.values.get(index).is_some_and(|v| *v > 0.5)
    }

    pub fn value(&self, index: usize) -> f32 {
        self.values.get(index).copied().unwrap_or(0.0)
    }
}

/// Trait defining one agent's decision/reward state machine.
///
/// The environment calls [`observe`](Self::observe) and
/// [`action_mask`](Self::action_mask) before asking a policy for an action,
/// then feeds that action to [`step`](Self::step).
pub trait AgentController {
    /// Body this controller drives.
    fn id(&self) -> EntityId;

    fn role(&self) -> Role;

    /// Clears zones, held item and counters, and returns the body to its
    /// spawn pose.
    fn begin_episode(&mut self, world: &mut dyn Simulation);

    fn observe(&self, world: &dyn Simulation) -> Observation;

    fn action_mask(&self) -> ActionMask;

    /// Applies one decision step. A step on a finished episode first begins
    /// a new one.
    fn step(&mut self, world: &mut dyn Simulation, action: ActionVector) -> StepReport;

    /// Ends a running episode from outside (step budget exhausted).
    fn interrupt(&mut self);

    fn episode(&self) -> &EpisodeState;

    /// Step budget per episode; 0 means unlimited.
    fn max_steps(&self) -> u32;

    fn held_item(&self) -> Option<ItemHandle>;
}

/// Result of the movement phase of a step.
pub(crate) enum BodyPhase {
    /// The body fell below the floor; the step stops here.
    OutOfBounds,
    Settled {
        transitions: Vec<ZoneTransition>,
        contacts: Vec<String>,
    },
}

/// State every controller carries regardless of role.
#[derive(Debug)]
pub(crate) struct AgentCore {
    pub id: EntityId,
    pub role: Role,
    pub movement: MovementConfig,
    pub spawn: SpawnPose,
    pub plane_y: f32,
    pub zones: ZoneTracker,
    pub held: HeldSlot,
    pub episode: EpisodeState,
    pub ledger: RewardLedger,
    pub rng: StdRng,
}

impl AgentCore {
    pub fn new(id: EntityId, role: Role, movement: MovementConfig, spawn: SpawnPose, seed: u64) -> Self {
        AgentCore {
            id,
            role,
            plane_y: spawn.position.y,
            movement,
            spawn,
            zones: ZoneTracker::new(),
            held: HeldSlot::new(),
            episode: EpisodeState::default(),
            ledger: RewardLedger::default(),
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// Held item, zone flags and counters are dropped; the body goes back to
    /// the spawn pose and the plane height is re-recorded.
    pub fn reset(&mut self, world: &mut dyn Simulation) {
        self.held.consume(world);
        self.zones.clear();
        self.ledger.take();
        self.episode.restart();

        world.teleport(self.id, self.spawn.position, self.spawn.heading);
        self.plane_y = self.spawn.position.y;
        if self.movement.planar_physics {
            world.configure_planar(self.id);
        }
        info!(agent = self.id, role = ?self.role, episode = self.episode.index, "episode begins");
    }

    pub fn maintain_planar(&self, world: &mut dyn Simulation) {
        if self.movement.planar_physics {
            movement::maintain_planar(world, self.id, self.plane_y);
        }
    }

    pub fn below_floor(&self, world: &dyn Simulation) -> bool {
        world.body_position(self.id).y < self.movement.min_allowed_y
    }

    /// Planar maintenance, bounds checks around the move, then zone sync and
    /// contact collection.
    pub fn advance_body(&mut self, world: &mut dyn Simulation, action: &ActionVector) -> BodyPhase {
        self.maintain_planar(world);
        if self.below_floor(world) {
            return BodyPhase::OutOfBounds;
        }

        movement::apply_move(world, self.id, action, &self.movement);

        if self.below_floor(world) {
            return BodyPhase::OutOfBounds;
        }
        self.maintain_planar(world);

        let overlapping = world.overlapping_zones(self.id);
        let transitions = self.zones.sync(&overlapping);
        let contacts = world.drain_contacts(self.id);
        BodyPhase::Settled {
            transitions,
            contacts,
        }
    }

    pub fn observed_position(&self, world: &dyn Simulation) -> [f32; 3] {
        normalized_position(world.local_position(self.id), self.movement.observation_scale)
    }

    pub fn reward(&mut self, kind: RewardKind, value: f32) {
        self.ledger.add(kind, value);
    }

    pub fn terminate(&mut self, reason: TerminalReason) {
        if self.episode.is_running() {
            self.episode.terminate(reason);
            info!(
                agent = self.id,
                role = ?self.role,
                episode = self.episode.index,
                steps = self.episode.steps,
                delivered = self.episode.boxes_delivered,
                reward = self.episode.cumulative_reward + self.ledger.total(),
                ?reason,
                "episode ends"
            );
        }
    }

    /// Entering a restricted zone: always penalised; returns `true` when the
    /// policy ends the episode.
    pub fn restricted_entry(&mut self, config: &RestrictedZoneConfig) -> bool {
        self.reward(RewardKind::RestrictedEntry, config.entry_penalty);
        debug!(agent = self.id, tag = %config.tag, "entered restricted zone");
        if config.policy == RestrictedZonePolicy::Terminate {
            self.terminate(TerminalReason::Violation);
            return true;
        }
        false
    }

    /// Per-step cost of standing in a restricted zone under the lingering
    /// policy.
    pub fn restricted_linger(&mut self, config: Option<&RestrictedZoneConfig>) {
        let Some(config) = config else { return };
        if let RestrictedZonePolicy::Linger { per_step_penalty } = config.policy {
            if self.zones.inside(&config.tag) {
                self.reward(RewardKind::RestrictedLinger, per_step_penalty);
            }
        }
    }

    pub fn hazard_contacts(&mut self, config: Option<&HazardConfig>, contacts: &[String]) {
        let Some(config) = config else { return };
        for tag in contacts.iter().filter(|t| **t == config.tag) {
            debug!(agent = self.id, %tag, "hazard contact");
            self.reward(RewardKind::HazardContact, config.contact_penalty);
        }
    }

    /// Idle accounting for standing empty-handed in the configured zone.
    /// Returns `true` when the idle limit ended the episode.
    pub fn idle_in_zone(&mut self, config: Option<&IdleTimeoutConfig>) -> bool {
        let Some(config) = config else { return false };
        if self.zones.inside(&config.zone_tag) && self.held.is_empty() {
            self.reward(RewardKind::IdleInZone, config.per_step_penalty);
            self.episode.idle_steps += 1;
            if self.episode.idle_steps >= config.step_limit {
                self.reward(RewardKind::IdleTimeout, config.timeout_penalty);
                self.terminate(TerminalReason::Timeout);
                return true;
            }
        } else {
            self.episode.idle_steps = 0;
        }
        false
    }

    /// Resets the idle counter when leaving the idle-tracked zone.
    pub fn idle_zone_exited(&mut self, config: Option<&IdleTimeoutConfig>, tag: &str) {
        if config.is_some_and(|c| c.zone_tag == tag) {
            self.episode.idle_steps = 0;
        }
    }

    /// Drains the ledger into a report and folds the reward into the episode
    /// total.
    pub fn finish_step(&mut self) -> StepReport {
        let events = self.ledger.take();
        let reward: f32 = events.iter().map(|e| e.value).sum();
        self.episode.cumulative_reward += reward;
        StepReport {
            reward,
            events,
            status: self.episode.status,
        }
    }
}
