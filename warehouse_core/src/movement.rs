use crate::{
    EntityId, Vec3,
    action::ActionVector,
    config::MovementConfig,
    geometry::{heading_for, move_towards_angle},
    substrate::{Simulation, SweepHit},
};

/// Below this squared length a move command means "stay".
pub const MOVE_INTENT_EPSILON: f32 = 1e-4;

/// What the movement phase of a step did.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MoveOutcome {
    pub requested: f32,
    pub applied: f32,
    pub heading: f32,
}

impl MoveOutcome {
    pub fn moved(&self) -> bool {
        self.applied > 0.0
    }
}

/// Distance the body may travel given the sweep result: a blocking hit clamps
/// to `max(0, hit - skin_width)`, anything else leaves `requested` untouched.
pub fn allowed_distance(requested: f32, hit: Option<&SweepHit>, skin_width: f32, block_mask: u32) -> f32 {
    if requested <= 0.0 {
        return 0.0;
    }
    match hit {
        Some(hit) if hit.blocked_by(block_mask) => (hit.distance - skin_width).max(0.0),
        _ => requested,
    }
}

/// Applies the movement part of `action` to `agent`'s body.
///
/// Returns `None` when the command carries no intent to move; the body is not
/// touched at all in that case.
pub fn apply_move(
    world: &mut dyn Simulation,
    agent: EntityId,
    action: &ActionVector,
    config: &MovementConfig,
) -> Option<MoveOutcome> {
    let raw = action.move_direction();
    if raw.sqr_magnitude() <= MOVE_INTENT_EPSILON {
        return None;
    }
    let direction = raw.normalized();
    let requested = config.move_speed * config.fixed_delta_time;

    let hit = world.sweep(agent, direction, requested + config.skin_width);
    let applied = allowed_distance(requested, hit.as_ref(), config.skin_width, config.block_mask);
    if applied > 0.0 {
        world.move_body(agent, direction * applied);
    }

    let target = heading_for(direction);
    let max_turn = config.turn_speed * config.fixed_delta_time;
    let heading = move_towards_angle(world.heading(agent), target, max_turn);
    world.rotate_body(agent, heading);

    Some(MoveOutcome {
        requested,
        applied,
        heading,
    })
}

/// Pins a planar body back onto its plane: vertical velocity zeroed, height
/// reset to `plane_y`.
pub fn maintain_planar(world: &mut dyn Simulation, agent: EntityId, plane_y: f32) {
    let velocity = world.body_velocity(agent);
    world.set_body_velocity(agent, Vec3 { y: 0.0, ..velocity });
    let position = world.body_position(agent);
    world.set_body_position(agent, position.with_y(plane_y));
}

/// Observation components for a local position: each axis divided by its
/// scale (at least 1e-4 in magnitude) and clamped to [-1, 1].
pub fn normalized_position(local: Vec3, scale: Vec3) -> [f32; 3] {
    let norm = |v: f32, s: f32| (v / s.abs().max(1e-4)).clamp(-1.0, 1.0);
    [
        norm(local.x, scale.x),
        norm(local.y, scale.y),
        norm(local.z, scale.z),
    ]
}
