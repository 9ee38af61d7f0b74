use warehouse_core::{
    Vec3,
    action::{ActionVector, BRANCH_INTERACT, Interact, MoveAxis},
    config::{DownAgentConfig, EntryRewardMode, IdleTimeoutConfig, RestrictedZonePolicy, WorldConfig},
    controller::AgentController,
    down::{DownAgentController, obs},
    episode::{EpisodeStatus, RewardKind, StepReport, TerminalReason},
    map::{Cell, REST_HEIGHT},
    substrate::{ItemRegistry, MotionSubstrate},
    world::WarehouseWorld,
};

// Row r spans z ∈ [5 - r, 6 - r].
const MAP: &str = "
    WL WL WL WL WL WL WL
    WL TL BL DS BL US WL
    WL BL BL BL BL BL WL
    WL CI PT BL BL BL WL
    WL CI DP BE BE CP WL
    WL WL WL WL WL WL WL
";

const TRUCK_LOAD: Cell = Cell::new(1, 1);
const CONVEYOR_INPUT: Cell = Cell::new(1, 3);
const UP_AREA: Cell = Cell::new(5, 1);
const PIT: Cell = Cell::new(2, 3);
const OPEN_FLOOR: Cell = Cell::new(3, 2);

const TAKE: ActionVector = ActionVector {
    move_x: MoveAxis::Stay,
    move_z: MoveAxis::Stay,
    interact: Interact::Primary,
};
const PLACE: ActionVector = ActionVector {
    move_x: MoveAxis::Stay,
    move_z: MoveAxis::Stay,
    interact: Interact::Secondary,
};

struct Rig {
    world: WarehouseWorld,
    agent: DownAgentController,
}

impl Rig {
    fn new(tweak: impl FnOnce(&mut DownAgentConfig)) -> Self {
        let mut world = WarehouseWorld::from_map_str(MAP, WorldConfig::default()).unwrap();
        let mut config = DownAgentConfig {
            spawn: world.down_spawn(),
            conveyor_drop_point: world.drop_point(),
            ..DownAgentConfig::default()
        };
        tweak(&mut config);
        let id = world.add_agent(&config.spawn);
        let mut agent = DownAgentController::new(id, config, 11);
        agent.begin_episode(&mut world);
        Rig { world, agent }
    }

    fn place_body(&mut self, cell: Cell) {
        let position = self.world.plan().cell_center(cell, REST_HEIGHT);
        self.world.teleport(self.agent.id(), position, 0.0);
    }

    fn step(&mut self, action: ActionVector) -> StepReport {
        let report = self.agent.step(&mut self.world, action);
        self.world.advance(0.02);
        report
    }

    fn idle(&mut self) -> StepReport {
        self.step(ActionVector::IDLE)
    }
}

fn approx(a: f32, b: f32) -> bool {
    (a - b).abs() < 1e-5
}

#[test]
fn full_delivery_cycle_pays_every_shaping_reward() {
    let mut rig = Rig::new(|c| c.max_steps = 8);
    let rewards = rig.agent.config().rewards.clone();

    let report = rig.idle();
    assert_eq!(report.events.len(), 1);
    assert!(approx(report.reward, rewards.step));

    rig.place_body(TRUCK_LOAD);
    let report = rig.idle();
    assert!(approx(report.reward_for(RewardKind::EnterTruckLoadZone), rewards.enter_truck_zone));

    let report = rig.step(TAKE);
    assert!(approx(report.reward_for(RewardKind::LoadFromTruck), rewards.load_from_truck));
    let held = rig.agent.held_item().expect("holding after take");
    let pose = rig.world.item_pose(held.id).unwrap();
    assert!(pose.kinematic);
    assert_eq!(
        pose.position,
        rig.world.body_position(rig.agent.id()) + Vec3::new(0.0, 0.6, 0.0)
    );
    assert_eq!(rig.agent.episode().boxes_taken, 1);

    rig.place_body(CONVEYOR_INPUT);
    let report = rig.idle();
    assert!(approx(
        report.reward_for(RewardKind::EnterConveyorZoneWithBox),
        rewards.enter_conveyor_zone_with_box
    ));
    assert!(!report.has(RewardKind::IdleInZone));

    let report = rig.step(PLACE);
    assert!(approx(report.reward_for(RewardKind::PlaceOnConveyor), rewards.place_on_conveyor));
    assert!(rig.agent.held_item().is_none());
    assert!(rig.agent.has_placed());
    let pose = rig.world.item_pose(held.id).unwrap();
    assert!(!pose.kinematic);
    assert_eq!(pose.carrier, None);
    assert!(rig.world.is_tracked(held.id));

    rig.place_body(OPEN_FLOOR);
    for _ in 0..3 {
        let report = rig.idle();
        assert!(!report.has(RewardKind::Shortfall));
    }
    assert_eq!(rig.agent.episode().steps, 8);
    assert_eq!(rig.agent.episode().status, EpisodeStatus::Running);
}

#[test]
fn budget_end_without_a_placement_costs_the_shortfall_once() {
    let mut rig = Rig::new(|c| c.max_steps = 3);
    let penalty = rig.agent.config().rewards.no_conveyor_placement;

    assert!(!rig.idle().has(RewardKind::Shortfall));
    assert!(!rig.idle().has(RewardKind::Shortfall));
    let report = rig.idle();
    assert!(approx(report.reward_for(RewardKind::Shortfall), penalty));
    // Ending the episode is left to the environment.
    assert!(!report.is_terminal());
    assert!(!rig.idle().has(RewardKind::Shortfall));
}

#[test]
fn take_while_holding_only_costs_the_invalid_penalty() {
    let mut rig = Rig::new(|_| {});
    let rewards = rig.agent.config().rewards.clone();
    rig.place_body(TRUCK_LOAD);
    rig.idle();
    rig.step(TAKE);
    let held = rig.agent.held_item();

    let report = rig.step(TAKE);
    assert!(approx(report.reward_for(RewardKind::InvalidAction), rewards.invalid_action));
    assert!(!report.has(RewardKind::LoadFromTruck));
    assert!(approx(report.reward, rewards.invalid_action + rewards.step));
    assert_eq!(rig.agent.held_item(), held);
    assert_eq!(rig.agent.episode().boxes_taken, 1);
    assert_eq!(rig.world.item_count(), 1);
}

#[test]
fn take_outside_truck_zone_and_place_empty_handed_are_invalid() {
    let mut rig = Rig::new(|_| {});
    let report = rig.step(TAKE);
    assert!(report.has(RewardKind::InvalidAction));
    let report = rig.step(PLACE);
    assert!(report.has(RewardKind::InvalidAction));
    assert_eq!(rig.world.item_count(), 0);
}

#[test]
fn missing_drop_point_turns_place_into_an_invalid_action() {
    let mut rig = Rig::new(|c| c.conveyor_drop_point = None);
    rig.place_body(TRUCK_LOAD);
    rig.step(TAKE);
    let report = rig.step(PLACE);
    assert!(report.has(RewardKind::InvalidAction));
    assert!(rig.agent.held_item().is_some());
}

#[test]
fn placing_can_require_the_conveyor_zone() {
    let mut rig = Rig::new(|c| c.place_requires_conveyor_zone = true);
    rig.place_body(TRUCK_LOAD);
    rig.step(TAKE);
    assert!(rig.step(PLACE).has(RewardKind::InvalidAction));

    rig.place_body(CONVEYOR_INPUT);
    rig.idle();
    assert!(rig.step(PLACE).has(RewardKind::PlaceOnConveyor));
}

#[test]
fn spawn_cap_locks_interaction() {
    let mut rig = Rig::new(|c| c.max_boxes_per_episode = 1);
    rig.place_body(TRUCK_LOAD);
    rig.step(TAKE);
    assert!(rig.agent.action_mask().interact_enabled(Interact::Secondary));
    rig.step(PLACE);

    assert!(rig.agent.interaction_locked());
    let mask = rig.agent.action_mask();
    assert!(!mask.is_enabled(BRANCH_INTERACT, 1));
    assert!(!mask.is_enabled(BRANCH_INTERACT, 2));

    // The lock also applies to actions that ignore the mask.
    let report = rig.step(TAKE);
    assert!(!report.has(RewardKind::InvalidAction));
    assert!(!report.has(RewardKind::LoadFromTruck));
    assert!(rig.agent.held_item().is_none());
}

#[test]
fn restricted_zone_terminates_and_next_step_starts_fresh() {
    let mut rig = Rig::new(|_| {});
    rig.place_body(UP_AREA);
    let report = rig.idle();
    assert!(approx(report.reward_for(RewardKind::RestrictedEntry), -1.0));
    assert_eq!(report.status, EpisodeStatus::Terminal(TerminalReason::Violation));
    assert!(!report.has(RewardKind::Step));

    let index = rig.agent.episode().index;
    let report = rig.idle();
    assert!(!report.is_terminal());
    assert_eq!(rig.agent.episode().index, index + 1);
    assert_eq!(rig.agent.episode().steps, 1);
    assert_eq!(
        rig.world.body_position(rig.agent.id()),
        rig.agent.config().spawn.position
    );
}

#[test]
fn lingering_policy_charges_every_step_inside() {
    let mut rig = Rig::new(|c| {
        if let Some(restricted) = c.restricted_zone.as_mut() {
            restricted.policy = RestrictedZonePolicy::Linger {
                per_step_penalty: -0.01,
            };
        }
    });
    rig.place_body(UP_AREA);
    let report = rig.idle();
    assert!(report.has(RewardKind::RestrictedEntry));
    assert!(approx(report.reward_for(RewardKind::RestrictedLinger), -0.01));
    assert!(!report.is_terminal());

    let report = rig.idle();
    assert!(!report.has(RewardKind::RestrictedEntry));
    assert!(approx(report.reward_for(RewardKind::RestrictedLinger), -0.01));
}

#[test]
fn idling_empty_handed_in_the_conveyor_zone_times_out() {
    let mut rig = Rig::new(|c| {
        c.idle_timeout = Some(IdleTimeoutConfig {
            step_limit: 3,
            ..IdleTimeoutConfig::default()
        });
    });
    rig.place_body(CONVEYOR_INPUT);
    assert!(rig.idle().has(RewardKind::IdleInZone));
    assert!(rig.idle().has(RewardKind::IdleInZone));
    let report = rig.idle();
    assert!(approx(report.reward_for(RewardKind::IdleTimeout), -0.5));
    assert_eq!(report.status, EpisodeStatus::Terminal(TerminalReason::Timeout));
}

#[test]
fn leaving_the_idle_zone_resets_the_counter() {
    let mut rig = Rig::new(|c| {
        c.idle_timeout = Some(IdleTimeoutConfig {
            step_limit: 3,
            ..IdleTimeoutConfig::default()
        });
    });
    rig.place_body(CONVEYOR_INPUT);
    rig.idle();
    rig.idle();
    rig.place_body(OPEN_FLOOR);
    rig.idle();
    assert_eq!(rig.agent.episode().idle_steps, 0);
    rig.place_body(CONVEYOR_INPUT);
    rig.idle();
    assert!(!rig.idle().is_terminal());
}

#[test]
fn falling_below_the_floor_ends_the_episode() {
    let mut rig = Rig::new(|c| c.movement.planar_physics = false);
    rig.place_body(PIT);
    for _ in 0..30 {
        rig.world.advance(0.1);
    }
    let report = rig.idle();
    assert!(approx(report.reward_for(RewardKind::OutOfBounds), -1.0));
    assert_eq!(report.status, EpisodeStatus::Terminal(TerminalReason::OutOfBounds));
    assert_eq!(report.events.len(), 1);
}

#[test]
fn bumping_a_belt_is_one_hazard_contact() {
    let mut rig = Rig::new(|_| {});
    rig.place_body(Cell::new(3, 3));
    let toward_belt = ActionVector::new(MoveAxis::Stay, MoveAxis::Negative, Interact::None);
    let contacts: usize = (0..6)
        .map(|_| {
            rig.step(toward_belt)
                .events
                .iter()
                .filter(|e| e.kind == RewardKind::HazardContact)
                .count()
        })
        .sum();
    assert_eq!(contacts, 1);
    // Stopped short of the belt face at z = 2.0.
    let z = rig.world.body_position(rig.agent.id()).z;
    assert!(z - 0.3 >= 2.0 - 1e-4);
}

#[test]
fn entry_reward_modes_rearm_differently() {
    let mut every = Rig::new(|c| c.entry_reward_mode = EntryRewardMode::EveryEntry);
    let mut cycle = Rig::new(|c| c.entry_reward_mode = EntryRewardMode::OncePerCarryCycle);
    let mut occupancy = Rig::new(|c| c.entry_reward_mode = EntryRewardMode::OncePerOccupancy);

    for rig in [&mut every, &mut cycle, &mut occupancy] {
        rig.place_body(TRUCK_LOAD);
        assert!(rig.idle().has(RewardKind::EnterTruckLoadZone));
        rig.place_body(OPEN_FLOOR);
        rig.idle();
        rig.place_body(TRUCK_LOAD);
    }
    assert!(every.idle().has(RewardKind::EnterTruckLoadZone));
    assert!(!cycle.idle().has(RewardKind::EnterTruckLoadZone));
    assert!(occupancy.idle().has(RewardKind::EnterTruckLoadZone));

    // A finished carry cycle re-arms the truck bonus.
    cycle.step(TAKE);
    cycle.place_body(CONVEYOR_INPUT);
    cycle.idle();
    cycle.step(PLACE);
    cycle.place_body(TRUCK_LOAD);
    assert!(cycle.idle().has(RewardKind::EnterTruckLoadZone));
}

#[test]
fn entering_truck_zone_while_holding_pays_nothing() {
    let mut rig = Rig::new(|_| {});
    rig.place_body(TRUCK_LOAD);
    rig.idle();
    rig.step(TAKE);
    rig.place_body(OPEN_FLOOR);
    rig.idle();
    rig.place_body(TRUCK_LOAD);
    assert!(!rig.idle().has(RewardKind::EnterTruckLoadZone));
}

#[test]
fn back_to_back_resets_observe_identically() {
    let mut rig = Rig::new(|_| {});
    rig.place_body(TRUCK_LOAD);
    rig.idle();
    rig.step(TAKE);

    rig.agent.begin_episode(&mut rig.world);
    let first = rig.agent.observe(&rig.world);
    rig.agent.begin_episode(&mut rig.world);
    let second = rig.agent.observe(&rig.world);
    assert_eq!(first, second);
    assert_eq!(first.values.len(), obs::LEN);
    assert!(!first.flag(obs::HOLDING));
    assert!(!first.flag(obs::IN_TRUCK_LOAD));
    assert_eq!(rig.world.item_count(), 0);
}

#[test]
fn observation_reports_zone_and_holding_flags() {
    let mut rig = Rig::new(|_| {});
    rig.place_body(TRUCK_LOAD);
    rig.idle();
    rig.step(TAKE);
    let observation = rig.agent.observe(&rig.world);
    assert!(observation.flag(obs::IN_TRUCK_LOAD));
    assert!(!observation.flag(obs::IN_CONVEYOR_INPUT));
    assert!(observation.flag(obs::HOLDING));
    assert!(approx(observation.value(obs::POS_X), 1.5 / 20.0));
    assert!(approx(observation.value(obs::POS_Y), 0.5 / 5.0));
    assert!(approx(observation.value(obs::POS_Z), 4.5 / 20.0));
}

const EAST: ActionVector = ActionVector {
    move_x: MoveAxis::Positive,
    move_z: MoveAxis::Stay,
    interact: Interact::None,
};

#[test]
fn carried_box_tracks_the_carry_point_within_the_step() {
    let mut rig = Rig::new(|_| {});
    rig.place_body(TRUCK_LOAD);
    rig.idle();
    rig.step(TAKE);
    let held = rig.agent.held_item().unwrap();
    let start = rig.world.body_position(rig.agent.id());

    // No world tick between the move and the check.
    rig.agent.step(&mut rig.world, EAST);
    let body = rig.world.body_position(rig.agent.id());
    assert!(body.x > start.x);
    let pose = rig.world.item_pose(held.id).unwrap();
    assert_eq!(pose.position, body + Vec3::new(0.0, 0.6, 0.0));
}

#[test]
fn planar_mode_pins_height_to_the_episode_start() {
    let mut rig = Rig::new(|_| {});
    let id = rig.agent.id();
    rig.place_body(OPEN_FLOOR);
    let lifted = rig.world.body_position(id).with_y(0.9);
    rig.world.set_body_position(id, lifted);
    rig.world.set_body_velocity(id, Vec3::new(0.0, 2.0, 0.0));

    rig.agent.step(&mut rig.world, EAST);
    assert_eq!(rig.world.body_position(id).y, REST_HEIGHT);
    assert_eq!(rig.world.body_velocity(id).y, 0.0);
}

#[test]
fn heading_turns_at_most_turn_speed_per_step() {
    let mut rig = Rig::new(|_| {});
    let id = rig.agent.id();
    let movement = rig.agent.config().movement.clone();
    let max_turn = movement.turn_speed * movement.fixed_delta_time;
    rig.place_body(OPEN_FLOOR);
    assert_eq!(rig.world.heading(id), 0.0);

    // Moving along +X faces -90 degrees.
    rig.step(EAST);
    assert!((rig.world.heading(id) + max_turn).abs() < 1e-3);
    rig.step(EAST);
    assert!((rig.world.heading(id) + 2.0 * max_turn).abs() < 1e-3);

    for _ in 0..20 {
        rig.step(EAST);
    }
    assert!((rig.world.heading(id) + 90.0).abs() < 1e-3);
}
