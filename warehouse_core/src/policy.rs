use std::{
    cell::Cell as SharedCell,
    cmp::Ordering,
    collections::{BinaryHeap, HashMap},
    rc::Rc,
};

use rand::{Rng, SeedableRng, rngs::StdRng};

use crate::{
    Role, Vec3,
    action::{ActionMask, ActionVector, Interact, KeyState, MoveAxis},
    controller::Observation,
    down, up,
    map::{Cell, FloorPlan, ZoneKind},
};

/// Picks an action from what the controller exposes: its observation and the
/// current action mask.
pub trait Policy {
    /// `&mut self` lets a policy keep internal state (random streams, plans).
    fn act(&mut self, observation: &Observation, mask: &ActionMask) -> ActionVector;
}

/// Moves uniformly at random and picks a random enabled interaction.
#[derive(Debug)]
pub struct RandomPolicy {
    rng: StdRng,
}

impl RandomPolicy {
    pub fn new(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
        }
    }

    fn axis(&mut self) -> MoveAxis {
        match self.rng.random_range(0..3) {
            1 => MoveAxis::Negative,
            2 => MoveAxis::Positive,
            _ => MoveAxis::Stay,
        }
    }
}

impl Policy for RandomPolicy {
    fn act(&mut self, _observation: &Observation, mask: &ActionMask) -> ActionVector {
        let move_x = self.axis();
        let move_z = self.axis();
        let enabled: Vec<Interact> = [Interact::None, Interact::Primary, Interact::Secondary]
            .into_iter()
            .filter(|i| mask.interact_enabled(*i))
            .collect();
        let interact = if enabled.is_empty() {
            Interact::None
        } else {
            enabled[self.rng.random_range(0..enabled.len())]
        };
        ActionVector::new(move_x, move_z, interact)
    }
}

/// Shared keyboard state the front end writes and a [`HeuristicPolicy`]
/// reads.
pub type SharedKeys = Rc<SharedCell<KeyState>>;

/// Manual control: maps the current key state straight to an action.
#[derive(Debug, Clone)]
pub struct HeuristicPolicy {
    keys: SharedKeys,
}

impl HeuristicPolicy {
    pub fn new(keys: SharedKeys) -> Self {
        Self { keys }
    }
}

impl Policy for HeuristicPolicy {
    fn act(&mut self, _observation: &Observation, _mask: &ActionMask) -> ActionVector {
        self.keys.get().to_action()
    }
}

/// Walks to the zone its role needs next with A* over the floor plan and
/// interacts once the observation says it has arrived.
#[derive(Debug)]
pub struct PlanningPolicy {
    role: Role,
    plan: FloorPlan,
    observation_scale: Vec3,
}

/// Offset from a cell centre tolerated before correcting sideways.
const CENTERING_TOLERANCE: f32 = 0.08;

impl PlanningPolicy {
    pub fn new(role: Role, plan: FloorPlan, observation_scale: Vec3) -> Self {
        Self {
            role,
            plan,
            observation_scale,
        }
    }

    /// Undoes the observation scaling. Exact as long as the map fits inside
    /// the scale.
    fn position(&self, observation: &Observation, x: usize, z: usize) -> Vec3 {
        Vec3::new(
            observation.value(x) * self.observation_scale.x.abs().max(1e-4),
            0.0,
            observation.value(z) * self.observation_scale.z.abs().max(1e-4),
        )
    }

    /// Zone to head for and the interaction to issue once inside it.
    fn goal(&self, observation: &Observation) -> (ZoneKind, bool, Interact) {
        match self.role {
            Role::Down => {
                if observation.flag(down::obs::HOLDING) {
                    (
                        ZoneKind::ConveyorInput,
                        observation.flag(down::obs::IN_CONVEYOR_INPUT),
                        Interact::Secondary,
                    )
                } else {
                    (
                        ZoneKind::TruckLoad,
                        observation.flag(down::obs::IN_TRUCK_LOAD),
                        Interact::Primary,
                    )
                }
            }
            Role::Up => {
                if !observation.flag(up::obs::HOLDING) {
                    (
                        ZoneKind::ConveyorPickup,
                        observation.flag(up::obs::IN_PICKUP),
                        Interact::Primary,
                    )
                } else if observation.flag(up::obs::HELD_SMALL) {
                    (
                        ZoneKind::SmallTruck,
                        observation.flag(up::obs::IN_SMALL_TRUCK),
                        Interact::Secondary,
                    )
                } else {
                    (
                        ZoneKind::LargeTruck,
                        observation.flag(up::obs::IN_LARGE_TRUCK),
                        Interact::Secondary,
                    )
                }
            }
        }
    }

    fn walkable(&self, cell: Cell) -> bool {
        self.plan.tile(cell).is_some_and(|t| t.is_walkable())
    }

    /// A* from `start` to the nearest of `goals`.
    fn a_star_path(&self, start: Cell, goals: &[Cell]) -> Option<Vec<Cell>> {
        #[derive(Clone, Eq, PartialEq)]
        struct PrioritizedCell {
            priority: usize,
            cell: Cell,
        }

        impl Ord for PrioritizedCell {
            fn cmp(&self, other: &Self) -> Ordering {
                // Reverse ordering for min-heap behavior
                other
                    .priority
                    .cmp(&self.priority)
                    .then_with(|| other.cell.cmp(&self.cell))
            }
        }

        impl PartialOrd for PrioritizedCell {
            fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
                Some(self.cmp(other))
            }
        }

        let heuristic = |cell: &Cell| {
            goals
                .iter()
                .map(|g| cell.manhattan(g))
                .min()
                .unwrap_or(0)
        };

        let mut frontier = BinaryHeap::new();
        let mut came_from: HashMap<Cell, Cell> = HashMap::new();
        let mut cost_so_far: HashMap<Cell, usize> = HashMap::new();

        frontier.push(PrioritizedCell {
            priority: heuristic(&start),
            cell: start,
        });
        cost_so_far.insert(start, 0);

        let mut reached = None;
        while let Some(PrioritizedCell { cell: current, .. }) = frontier.pop() {
            if goals.contains(&current) {
                reached = Some(current);
                break;
            }
            let current_cost = cost_so_far.get(&current).copied().unwrap_or(usize::MAX);
            for neighbor in current.neighbors().filter(|c| self.walkable(*c)) {
                let new_cost = current_cost.saturating_add(1);
                if cost_so_far.get(&neighbor).is_none_or(|c| new_cost < *c) {
                    cost_so_far.insert(neighbor, new_cost);
                    frontier.push(PrioritizedCell {
                        priority: new_cost + heuristic(&neighbor),
                        cell: neighbor,
                    });
                    came_from.insert(neighbor, current);
                }
            }
        }

        let mut current = reached?;
        let mut path = vec![current];
        while current != start {
            current = *came_from.get(&current)?;
            path.push(current);
        }
        path.reverse();
        Some(path)
    }

    /// Movement toward the centre of `next`. Path steps are orthogonal, so the
    /// cross axis only moves to cancel drift from the cell centre.
    fn steer(&self, position: Vec3, next: Cell) -> (MoveAxis, MoveAxis) {
        let target = self.plan.cell_center(next, position.y);
        let axis = |delta: f32| {
            if delta > CENTERING_TOLERANCE {
                MoveAxis::Positive
            } else if delta < -CENTERING_TOLERANCE {
                MoveAxis::Negative
            } else {
                MoveAxis::Stay
            }
        };
        (axis(target.x - position.x), axis(target.z - position.z))
    }
}

impl Policy for PlanningPolicy {
    fn act(&mut self, observation: &Observation, mask: &ActionMask) -> ActionVector {
        let (zone, arrived, interact) = self.goal(observation);
        if arrived {
            let interact = if mask.interact_enabled(interact) {
                interact
            } else {
                Interact::None
            };
            return ActionVector::IDLE.with_interact(interact);
        }

        let (x, z) = match self.role {
            Role::Down => (down::obs::POS_X, down::obs::POS_Z),
            Role::Up => (up::obs::POS_X, up::obs::POS_Z),
        };
        let position = self.position(observation, x, z);
        let Some(start) = self.plan.cell_at(position) else {
            return ActionVector::IDLE;
        };
        let goals = self.plan.cells_of(zone);
        match self.a_star_path(start, &goals) {
            Some(path) if path.len() > 1 => {
                let (move_x, move_z) = self.steer(position, path[1]);
                ActionVector::new(move_x, move_z, Interact::None)
            }
            _ => ActionVector::IDLE,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::BRANCH_INTERACT;

    const MAP: &str = "
        WL WL WL WL WL
        WL TL BL BL WL
        WL WL WL BL WL
        WL DS BL BL WL
        WL CI US DP WL
        WL WL WL WL WL
    ";

    fn down_observation(position: Vec3, flags: [bool; 3]) -> Observation {
        let scale = 20.0;
        let f = |b: bool| if b { 1.0 } else { 0.0 };
        Observation {
            role: Role::Down,
            values: vec![
                position.x / scale,
                position.y / 5.0,
                position.z / scale,
                f(flags[0]),
                f(flags[1]),
                f(flags[2]),
            ],
        }
    }

    #[test]
    fn random_policy_only_picks_enabled_interactions() {
        let mut policy = RandomPolicy::new(3);
        let mut mask = ActionMask::default();
        mask.set_enabled(BRANCH_INTERACT, 1, false);
        mask.set_enabled(BRANCH_INTERACT, 2, false);
        let obs = down_observation(Vec3::ZERO, [false; 3]);
        for _ in 0..50 {
            assert_eq!(policy.act(&obs, &mask).interact, Interact::None);
        }
    }

    #[test]
    fn heuristic_policy_reads_shared_keys() {
        let keys = SharedKeys::default();
        let mut policy = HeuristicPolicy::new(keys.clone());
        let obs = down_observation(Vec3::ZERO, [false; 3]);
        keys.set(KeyState {
            d: true,
            one: true,
            ..KeyState::default()
        });
        let action = policy.act(&obs, &ActionMask::default());
        assert_eq!(action.move_x, MoveAxis::Positive);
        assert_eq!(action.interact, Interact::Primary);
    }

    #[test]
    fn planner_routes_around_walls() {
        let plan = FloorPlan::parse(MAP).unwrap();
        let policy = PlanningPolicy::new(Role::Down, plan.clone(), Vec3::new(20.0, 5.0, 20.0));
        let path = policy
            .a_star_path(plan.down_spawn(), &plan.cells_of(ZoneKind::TruckLoad))
            .unwrap();
        assert_eq!(path.first(), Some(&Cell::new(1, 3)));
        assert_eq!(path.last(), Some(&Cell::new(1, 1)));
        // Around the wall row through column 3.
        assert!(path.contains(&Cell::new(3, 2)));
        assert_eq!(path.len(), 7);
    }

    #[test]
    fn planner_interacts_on_arrival_and_moves_otherwise() {
        let plan = FloorPlan::parse(MAP).unwrap();
        let spawn = plan.cell_center(plan.down_spawn(), 0.5);
        let mut policy = PlanningPolicy::new(Role::Down, plan, Vec3::new(20.0, 5.0, 20.0));
        let mask = ActionMask::default();

        let arrived = down_observation(spawn, [true, false, false]);
        assert_eq!(policy.act(&arrived, &mask), ActionVector::IDLE.with_interact(Interact::Primary));

        let away = down_observation(spawn, [false, false, false]);
        let action = policy.act(&away, &mask);
        // First step from the spawn heads east along the row.
        assert_eq!(action.move_x, MoveAxis::Positive);
        assert_eq!(action.move_z, MoveAxis::Stay);
        assert_eq!(action.interact, Interact::None);
    }
}
