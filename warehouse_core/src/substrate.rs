//! Interfaces to everything the controllers do not own: the motion
//! substrate that moves agent bodies, the item registry, the spawn/destroy
//! service and the conveyor transport that tracks item bodies.
//!
//! A controller never holds on to world state between calls. Each decision
//! step receives `&mut dyn Simulation` and performs every ownership transfer
//! of an item (world → held, held → world, held → destroyed) through a single
//! call, so no intermediate state is observable from outside the step.

use crate::{Aabb, EntityId, ItemHandle, ItemId, Vec3};

/// Identifier of one concrete trigger volume.
pub type ZoneId = usize;

/// A trigger volume the agent currently overlaps.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ZoneRef {
    pub id: ZoneId,
    pub tag: String,
}

/// First blocking surface found by a directional sweep.
#[derive(Debug, Clone, PartialEq)]
pub struct SweepHit {
    pub distance: f32,
    /// Collider layer index (0..32) of the surface that was hit.
    pub layer: u8,
    pub tag: Option<String>,
}

impl SweepHit {
    pub fn blocked_by(&self, mask: u32) -> bool {
        self.layer < 32 && mask & (1u32 << self.layer) != 0
    }
}

/// Pose and physics flags of one item as the registry sees it.
#[derive(Debug, Clone, PartialEq)]
pub struct ItemPose {
    pub handle: ItemHandle,
    pub position: Vec3,
    pub velocity: Vec3,
    /// Collision volume; items without one are matched by position.
    pub bounds: Option<Aabb>,
    pub kinematic: bool,
    /// Agent whose carry point the item is parented to.
    pub carrier: Option<EntityId>,
}

/// Moves an agent's physical body.
pub trait MotionSubstrate {
    fn body_position(&self, agent: EntityId) -> Vec3;
    /// Position relative to the agent's arena, fed to observations.
    fn local_position(&self, agent: EntityId) -> Vec3;
    fn body_velocity(&self, agent: EntityId) -> Vec3;
    fn set_body_velocity(&mut self, agent: EntityId, velocity: Vec3);
    fn heading(&self, agent: EntityId) -> f32;

    /// Requests a kinematic translation; the substrate resolves collisions.
    fn move_body(&mut self, agent: EntityId, delta: Vec3);
    fn rotate_body(&mut self, agent: EntityId, heading: f32);
    /// Places the body directly, discarding velocity and pending contacts.
    fn teleport(&mut self, agent: EntityId, position: Vec3, heading: f32);
    /// Overwrites the position without any collision handling.
    fn set_body_position(&mut self, agent: EntityId, position: Vec3);

    /// Casts the body along unit `direction` and reports the nearest
    /// non-trigger surface within `max_distance`.
    fn sweep(&self, agent: EntityId, direction: Vec3, max_distance: f32) -> Option<SweepHit>;

    /// Continuous collision detection, interpolation and frozen vertical /
    /// tilt axes for bodies that live on a fixed plane.
    fn configure_planar(&mut self, agent: EntityId);

    /// Trigger volumes the body currently overlaps.
    fn overlapping_zones(&self, agent: EntityId) -> Vec<ZoneRef>;
    fn zone_bounds(&self, zone: ZoneId) -> Option<Aabb>;

    /// Tags of solid objects the body has touched since the last call.
    fn drain_contacts(&mut self, agent: EntityId) -> Vec<String>;
}

/// Query side of the item registry.
pub trait ItemRegistry {
    fn all_items(&self) -> Vec<ItemHandle>;
    fn item_pose(&self, item: ItemId) -> Option<ItemPose>;

    /// Items whose collision volume intersects `volume`, or whose position it
    /// contains when the item has no collision volume.
    fn items_overlapping(&self, volume: &Aabb) -> Vec<ItemHandle> {
        self.all_items()
            .into_iter()
            .filter(|handle| {
                self.item_pose(handle.id).is_some_and(|pose| match pose.bounds {
                    Some(bounds) => volume.intersects(&bounds),
                    None => volume.contains(pose.position),
                })
            })
            .collect()
    }
}

/// Creates, parents, releases and destroys items. Always succeeds from the
/// controller's point of view.
pub trait SpawnService {
    fn spawn_item(&mut self, kind: crate::ItemKind, position: Vec3) -> ItemHandle;
    fn destroy_item(&mut self, item: ItemId);
    /// Makes the item kinematic and pins it to `carrier`'s body at `offset`.
    fn attach_item(&mut self, item: ItemId, carrier: EntityId, offset: Vec3);
    /// Unparents the item at `position`, clears the kinematic flag and zeroes
    /// its velocity.
    fn release_item(&mut self, item: ItemId, position: Vec3);
}

/// Background conveyor transport that may hold on to item bodies.
pub trait ConveyorTracking {
    /// Stops every conveyor from moving `item`. Must be called before an item
    /// leaves play.
    fn untrack_item(&mut self, item: ItemId);
}

/// Everything a controller needs from the world in one object.
pub trait Simulation: MotionSubstrate + ItemRegistry + SpawnService + ConveyorTracking {}

impl<T> Simulation for T where T: MotionSubstrate + ItemRegistry + SpawnService + ConveyorTracking {}

/// Untracks and destroys an item in one go.
pub fn retire_item(world: &mut dyn Simulation, item: ItemId) {
    world.untrack_item(item);
    world.destroy_item(item);
}
