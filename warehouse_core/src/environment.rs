use serde::Serialize;
use tracing::debug;

use crate::{
    EntityId, Role,
    action::ActionVector,
    config::WarehouseConfig,
    controller::AgentController,
    down::DownAgentController,
    episode::{EpisodeStatus, StepReport},
    policy::Policy,
    up::UpAgentController,
    world::WarehouseWorld,
};

/// Finished-episode counters for one agent.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct EpisodeTally {
    pub completed: u64,
    pub successful: u64,
    /// Cumulative reward of the most recently finished episode.
    pub last_reward: f32,
}

/// What one agent did during a turn.
#[derive(Debug, Clone, PartialEq)]
pub struct AgentTurn {
    pub agent: EntityId,
    pub role: Role,
    pub episode: u64,
    pub step: u32,
    pub action: ActionVector,
    pub report: StepReport,
    /// The environment cut the episode off at its step budget.
    pub interrupted: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TurnSummary {
    pub turn: u64,
    pub agents: Vec<AgentTurn>,
}

/// A controller, the policy driving it and its running statistics.
pub struct AgentSlot {
    controller: Box<dyn AgentController>,
    policy: Box<dyn Policy>,
    tally: EpisodeTally,
    last_turn: Option<AgentTurn>,
}

impl AgentSlot {
    pub fn controller(&self) -> &dyn AgentController {
        self.controller.as_ref()
    }

    pub fn tally(&self) -> EpisodeTally {
        self.tally
    }

    pub fn last_turn(&self) -> Option<&AgentTurn> {
        self.last_turn.as_ref()
    }

    fn record_end(&mut self) {
        let episode = self.controller.episode();
        self.tally.completed += 1;
        if episode.has_completed_required_delivery {
            self.tally.successful += 1;
        }
        self.tally.last_reward = episode.cumulative_reward;
    }
}

/// Owns the world and every agent, and runs them in lockstep.
pub struct Environment {
    world: WarehouseWorld,
    agents: Vec<AgentSlot>,
    fixed_delta_time: f32,
    turn: u64,
}

impl Environment {
    /// Creates an environment with no agents.
    pub fn new(world: WarehouseWorld, fixed_delta_time: f32) -> Self {
        Environment {
            world,
            agents: Vec::new(),
            fixed_delta_time,
            turn: 0,
        }
    }

    /// Creates one Down and one Up agent from `config`.
    ///
    /// Spawn poses come from the map's spawn markers, and the map's drop point
    /// fills in a missing conveyor drop point. `policy_for` picks the policy
    /// driving each role.
    pub fn from_config<F>(world: WarehouseWorld, config: &WarehouseConfig, mut policy_for: F) -> Self
    where
        F: FnMut(Role, &WarehouseWorld) -> Box<dyn Policy>,
    {
        // `validate` keeps both roles on the same step length.
        let mut env = Environment::new(world, config.down.movement.fixed_delta_time);

        let mut down = config.down.clone();
        down.spawn = env.world.down_spawn();
        if down.conveyor_drop_point.is_none() {
            down.conveyor_drop_point = env.world.drop_point();
        }
        let down_id = env.world.add_agent(&down.spawn);
        let policy = policy_for(Role::Down, &env.world);
        env.add_agent(Box::new(DownAgentController::new(down_id, down, config.seed)), policy);

        let mut up = config.up.clone();
        up.spawn = env.world.up_spawn();
        let up_id = env.world.add_agent(&up.spawn);
        let policy = policy_for(Role::Up, &env.world);
        env.add_agent(
            Box::new(UpAgentController::new(up_id, up, config.seed.wrapping_add(1))),
            policy,
        );

        env
    }

    /// Registers a controller and begins its first episode.
    pub fn add_agent(&mut self, mut controller: Box<dyn AgentController>, policy: Box<dyn Policy>) {
        controller.begin_episode(&mut self.world);
        self.agents.push(AgentSlot {
            controller,
            policy,
            tally: EpisodeTally::default(),
            last_turn: None,
        });
    }

    pub fn world(&self) -> &WarehouseWorld {
        &self.world
    }

    pub fn world_mut(&mut self) -> &mut WarehouseWorld {
        &mut self.world
    }

    pub fn agents(&self) -> &[AgentSlot] {
        &self.agents
    }

    pub fn turn(&self) -> u64 {
        self.turn
    }

    /// Processes one decision step for every agent, then advances the world.
    pub fn step(&mut self) -> TurnSummary {
        let mut turns = Vec::with_capacity(self.agents.len());

        for slot in &mut self.agents {
            if !slot.controller.episode().is_running() {
                slot.controller.begin_episode(&mut self.world);
            }

            let observation = slot.controller.observe(&self.world);
            let mask = slot.controller.action_mask();
            let action = slot.policy.act(&observation, &mask);
            let mut report = slot.controller.step(&mut self.world, action);

            let mut interrupted = false;
            let episode = slot.controller.episode();
            let max_steps = slot.controller.max_steps();
            if episode.is_running() && max_steps > 0 && episode.steps >= max_steps {
                slot.controller.interrupt();
                report.status = slot.controller.episode().status;
                interrupted = true;
            }

            if report.status != EpisodeStatus::Running {
                slot.record_end();
            }

            let episode = slot.controller.episode();
            let turn = AgentTurn {
                agent: slot.controller.id(),
                role: slot.controller.role(),
                episode: episode.index,
                step: episode.steps,
                action,
                report,
                interrupted,
            };
            slot.last_turn = Some(turn.clone());
            turns.push(turn);
        }

        self.world.advance(self.fixed_delta_time);
        self.turn += 1;
        debug!(turn = self.turn, "turn processed");

        TurnSummary {
            turn: self.turn,
            agents: turns,
        }
    }

    /// Runs `turns` steps and returns the final tallies, one per agent.
    pub fn run(&mut self, turns: u64) -> Vec<EpisodeTally> {
        for _ in 0..turns {
            self.step();
        }
        self.agents.iter().map(AgentSlot::tally).collect()
    }
}
