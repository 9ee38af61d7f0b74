//! Reference kinematic world: a tile floor plan, box-shaped agent bodies,
//! loose and carried items, and conveyor belts.
//!
//! It implements every collaborator trait the controllers need so the whole
//! loop can run headless or behind the TUI.

use std::collections::{BTreeMap, BTreeSet};

use tracing::{debug, trace};

use crate::{
    Aabb, EntityId, ItemHandle, ItemId, ItemKind, Vec3,
    config::{SpawnPose, WorldConfig},
    map::{Cell, FloorPlan, MapError, REST_HEIGHT, Tile},
    substrate::{
        ConveyorTracking, ItemPose, ItemRegistry, MotionSubstrate, SpawnService, SweepHit, ZoneId,
        ZoneRef,
    },
};

/// Half extent of an agent body on every axis.
pub const AGENT_HALF_EXTENT: f32 = 0.3;
/// Half extent of a box on every axis.
pub const ITEM_HALF_EXTENT: f32 = 0.25;
/// Touching distance that still counts as a contact.
const CONTACT_MARGIN: f32 = 0.05;
/// Loose items that fall this far are removed from play.
const ITEM_KILL_HEIGHT: f32 = -50.0;

#[derive(Debug, Clone)]
pub struct Zone {
    pub id: ZoneId,
    pub tag: String,
    pub bounds: Aabb,
}

#[derive(Debug, Clone)]
struct Body {
    position: Vec3,
    velocity: Vec3,
    heading: f32,
    planar: bool,
    /// Solid cells the body was touching after its last move.
    touching: BTreeSet<Cell>,
    contacts: Vec<String>,
}

impl Body {
    fn bounds_at(position: Vec3) -> Aabb {
        Aabb::from_center(position, Vec3::new(AGENT_HALF_EXTENT, AGENT_HALF_EXTENT, AGENT_HALF_EXTENT))
    }

    fn bounds(&self) -> Aabb {
        Self::bounds_at(self.position)
    }
}

#[derive(Debug, Clone)]
struct ItemBody {
    handle: ItemHandle,
    position: Vec3,
    velocity: Vec3,
    kinematic: bool,
    carrier: Option<(EntityId, Vec3)>,
}

impl ItemBody {
    fn bounds(&self) -> Aabb {
        Aabb::from_center(
            self.position,
            Vec3::new(ITEM_HALF_EXTENT, ITEM_HALF_EXTENT, ITEM_HALF_EXTENT),
        )
    }
}

/// Snapshot of an agent body for rendering and tests.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BodyView {
    pub id: EntityId,
    pub position: Vec3,
    pub heading: f32,
}

pub struct WarehouseWorld {
    plan: FloorPlan,
    config: WorldConfig,
    zones: Vec<Zone>,
    bodies: BTreeMap<EntityId, Body>,
    items: BTreeMap<ItemId, ItemBody>,
    /// Items the conveyors are currently moving.
    tracked: BTreeSet<ItemId>,
    next_entity_id: EntityId,
    next_item_id: ItemId,
}

impl WarehouseWorld {
    pub fn new(plan: FloorPlan, config: WorldConfig) -> Self {
        let zones = plan
            .zone_regions()
            .into_iter()
            .enumerate()
            .filter_map(|(id, (kind, cells))| {
                let bounds = cells
                    .iter()
                    .map(|c| plan.cell_bounds(*c))
                    .reduce(|a, b| a.union(&b))?;
                Some(Zone {
                    id,
                    tag: kind.tag().to_string(),
                    bounds,
                })
            })
            .collect();

        WarehouseWorld {
            plan,
            config,
            zones,
            bodies: BTreeMap::new(),
            items: BTreeMap::new(),
            tracked: BTreeSet::new(),
            next_entity_id: 0,
            next_item_id: 1,
        }
    }

    /// Parses a floor plan and builds a world around it.
    pub fn from_map_str(text: &str, config: WorldConfig) -> Result<Self, MapError> {
        Ok(Self::new(FloorPlan::parse(text)?, config))
    }

    pub fn plan(&self) -> &FloorPlan {
        &self.plan
    }

    pub fn zones(&self) -> &[Zone] {
        &self.zones
    }

    /// Spawn pose on the centre of the Down spawn tile.
    pub fn down_spawn(&self) -> SpawnPose {
        SpawnPose {
            position: self.plan.cell_center(self.plan.down_spawn(), REST_HEIGHT),
            heading: 0.0,
        }
    }

    /// Spawn pose on the centre of the Up spawn tile.
    pub fn up_spawn(&self) -> SpawnPose {
        SpawnPose {
            position: self.plan.cell_center(self.plan.up_spawn(), REST_HEIGHT),
            heading: 180.0,
        }
    }

    /// Where boxes are dropped onto the conveyor, if the map marks one.
    pub fn drop_point(&self) -> Option<Vec3> {
        self.plan
            .drop_point()
            .map(|c| self.plan.cell_center(c, REST_HEIGHT))
    }

    /// Adds an agent body and returns its id.
    pub fn add_agent(&mut self, pose: &SpawnPose) -> EntityId {
        let id = self.next_entity_id;
        self.next_entity_id += 1;
        self.bodies.insert(
            id,
            Body {
                position: pose.position,
                velocity: Vec3::ZERO,
                heading: pose.heading,
                planar: false,
                touching: BTreeSet::new(),
                contacts: Vec::new(),
            },
        );
        debug!(agent = id, position = ?pose.position, "agent body added");
        id
    }

    pub fn bodies(&self) -> impl Iterator<Item = BodyView> + '_ {
        self.bodies.iter().map(|(id, b)| BodyView {
            id: *id,
            position: b.position,
            heading: b.heading,
        })
    }

    pub fn is_tracked(&self, item: ItemId) -> bool {
        self.tracked.contains(&item)
    }

    pub fn item_count(&self) -> usize {
        self.items.len()
    }

    /// Advances everything that moves on its own by `dt` seconds: gravity
    /// over pits, belt transport, and carried items following their carrier.
    pub fn advance(&mut self, dt: f32) {
        let gravity = self.config.gravity;

        for body in self.bodies.values_mut() {
            if body.planar || self.plan.has_floor_at(body.position) {
                continue;
            }
            body.velocity.y -= gravity * dt;
            body.position.y += body.velocity.y * dt;
        }

        let mut lost = Vec::new();
        for item in self.items.values_mut() {
            if let Some((carrier, offset)) = item.carrier {
                if let Some(body) = self.bodies.get(&carrier) {
                    item.position = body.position + offset;
                }
                continue;
            }
            if item.kinematic {
                continue;
            }

            if !self.plan.has_floor_at(item.position) {
                item.velocity.y -= gravity * dt;
                item.position.y += item.velocity.y * dt;
                if item.position.y < ITEM_KILL_HEIGHT {
                    lost.push(item.handle.id);
                }
                continue;
            }

            if self.tracked.contains(&item.handle.id) {
                item.position = belt_step(&self.plan, item.position, self.config.conveyor_speed * dt);
            }
        }

        for id in lost {
            trace!(item = id, "item fell out of the world");
            self.tracked.remove(&id);
            self.items.remove(&id);
        }
    }

    fn solid_cells_near(&self, volume: &Aabb) -> impl Iterator<Item = (Cell, Tile)> + '_ {
        let col_lo = volume.min.x.floor().max(0.0) as usize;
        let col_hi = volume.max.x.ceil().max(0.0) as usize;
        let z_lo = volume.min.z.floor().max(0.0) as usize;
        let z_hi = volume.max.z.ceil().max(0.0) as usize;
        let height = self.plan.height();
        (col_lo..=col_hi)
            .flat_map(move |col| (z_lo..=z_hi).map(move |zi| (col, zi)))
            .filter_map(move |(col, zi)| {
                let row = height.checked_sub(1 + zi)?;
                let cell = Cell { col, row };
                let tile = self.plan.tile(cell)?;
                tile.is_solid().then_some((cell, tile))
            })
    }

    fn blocked(&self, agent: EntityId, bounds: &Aabb) -> bool {
        self.solid_cells_near(bounds)
            .any(|(cell, _)| self.plan.cell_bounds(cell).overlaps(bounds))
            || self
                .bodies
                .iter()
                .any(|(id, other)| *id != agent && other.bounds().overlaps(bounds))
    }

    /// Snaps everything `agent` carries to its carry point.
    fn carry_along(&mut self, agent: EntityId) {
        let Some(position) = self.bodies.get(&agent).map(|b| b.position) else {
            return;
        };
        for item in self.items.values_mut() {
            if let Some((carrier, offset)) = item.carrier {
                if carrier == agent {
                    item.position = position + offset;
                }
            }
        }
    }

    fn touching_cells(&self, bounds: &Aabb) -> BTreeSet<Cell> {
        let footprint = Aabb::new(
            bounds.min - Vec3::new(CONTACT_MARGIN, 0.0, CONTACT_MARGIN),
            bounds.max + Vec3::new(CONTACT_MARGIN, 0.0, CONTACT_MARGIN),
        );
        self.solid_cells_near(&footprint)
            .filter(|(cell, _)| self.plan.cell_bounds(*cell).overlaps(&footprint))
            .map(|(cell, _)| cell)
            .collect()
    }
}

/// Moves a belt-borne position `distance` along the belt under it, stopping
/// with the centre on the far edge of the last belt tile.
fn belt_step(plan: &FloorPlan, position: Vec3, distance: f32) -> Vec3 {
    let Some(cell) = plan.cell_at(position) else {
        return position;
    };
    let Some(Tile::Belt(direction)) = plan.tile(cell) else {
        return position;
    };
    let next = position + direction.vector() * distance;
    if plan
        .cell_at(next)
        .and_then(|c| plan.tile(c))
        .is_some_and(|t| matches!(t, Tile::Belt(_)))
    {
        return next;
    }
    let edge = plan.cell_bounds(cell);
    let dir = direction.vector();
    Vec3 {
        x: if dir.x > 0.0 {
            next.x.min(edge.max.x)
        } else if dir.x < 0.0 {
            next.x.max(edge.min.x)
        } else {
            next.x
        },
        y: next.y,
        z: if dir.z > 0.0 {
            next.z.min(edge.max.z)
        } else if dir.z < 0.0 {
            next.z.max(edge.min.z)
        } else {
            next.z
        },
    }
}

impl MotionSubstrate for WarehouseWorld {
    fn body_position(&self, agent: EntityId) -> Vec3 {
        self.bodies.get(&agent).map_or(Vec3::ZERO, |b| b.position)
    }

    fn local_position(&self, agent: EntityId) -> Vec3 {
        self.body_position(agent)
    }

    fn body_velocity(&self, agent: EntityId) -> Vec3 {
        self.bodies.get(&agent).map_or(Vec3::ZERO, |b| b.velocity)
    }

    fn set_body_velocity(&mut self, agent: EntityId, velocity: Vec3) {
        if let Some(body) = self.bodies.get_mut(&agent) {
            body.velocity = velocity;
        }
    }

    fn heading(&self, agent: EntityId) -> f32 {
        self.bodies.get(&agent).map_or(0.0, |b| b.heading)
    }

    fn move_body(&mut self, agent: EntityId, delta: Vec3) {
        let Some(start) = self.bodies.get(&agent).map(|b| b.position) else {
            return;
        };
        let target = start + delta;
        let resolved = if !self.blocked(agent, &Body::bounds_at(target)) {
            target
        } else {
            // Slide along whichever axis is still free.
            let along_x = Vec3 { z: start.z, ..target };
            let along_z = Vec3 { x: start.x, ..target };
            if !self.blocked(agent, &Body::bounds_at(along_x)) {
                along_x
            } else if !self.blocked(agent, &Body::bounds_at(along_z)) {
                along_z
            } else {
                start
            }
        };

        let touching = self.touching_cells(&Body::bounds_at(resolved));
        let Some(body) = self.bodies.get_mut(&agent) else {
            return;
        };
        for cell in touching.difference(&body.touching) {
            if let Some(tag) = self.plan.tile(*cell).and_then(Tile::tag) {
                body.contacts.push(tag.to_string());
            }
        }
        body.touching = touching;
        body.position = resolved;
        self.carry_along(agent);
    }

    fn rotate_body(&mut self, agent: EntityId, heading: f32) {
        if let Some(body) = self.bodies.get_mut(&agent) {
            body.heading = heading;
        }
    }

    fn teleport(&mut self, agent: EntityId, position: Vec3, heading: f32) {
        if let Some(body) = self.bodies.get_mut(&agent) {
            body.position = position;
            body.heading = heading;
            body.velocity = Vec3::ZERO;
            body.touching.clear();
            body.contacts.clear();
        }
        self.carry_along(agent);
    }

    fn set_body_position(&mut self, agent: EntityId, position: Vec3) {
        if let Some(body) = self.bodies.get_mut(&agent) {
            body.position = position;
        }
        self.carry_along(agent);
    }

    fn sweep(&self, agent: EntityId, direction: Vec3, max_distance: f32) -> Option<SweepHit> {
        let body = self.bodies.get(&agent)?;
        let bounds = body.bounds();
        let reach = Aabb::from_center(
            bounds.center(),
            bounds.half_extent() + Vec3::new(max_distance, 0.0, max_distance),
        );

        let tiles = self.solid_cells_near(&reach).filter_map(|(cell, tile)| {
            let distance = bounds.sweep(direction, max_distance, &self.plan.cell_bounds(cell))?;
            Some(SweepHit {
                distance,
                layer: tile.layer(),
                tag: tile.tag().map(str::to_string),
            })
        });
        let agents = self
            .bodies
            .iter()
            .filter(|(id, _)| **id != agent)
            .filter_map(|(_, other)| {
                let distance = bounds.sweep(direction, max_distance, &other.bounds())?;
                Some(SweepHit {
                    distance,
                    layer: 0,
                    tag: None,
                })
            });

        tiles
            .chain(agents)
            .min_by(|a, b| a.distance.total_cmp(&b.distance))
    }

    fn configure_planar(&mut self, agent: EntityId) {
        if let Some(body) = self.bodies.get_mut(&agent) {
            body.planar = true;
            body.velocity.y = 0.0;
        }
    }

    fn overlapping_zones(&self, agent: EntityId) -> Vec<ZoneRef> {
        let Some(body) = self.bodies.get(&agent) else {
            return Vec::new();
        };
        let bounds = body.bounds();
        self.zones
            .iter()
            .filter(|z| z.bounds.overlaps(&bounds))
            .map(|z| ZoneRef {
                id: z.id,
                tag: z.tag.clone(),
            })
            .collect()
    }

    fn zone_bounds(&self, zone: ZoneId) -> Option<Aabb> {
        self.zones.iter().find(|z| z.id == zone).map(|z| z.bounds)
    }

    fn drain_contacts(&mut self, agent: EntityId) -> Vec<String> {
        self.bodies
            .get_mut(&agent)
            .map(|b| std::mem::take(&mut b.contacts))
            .unwrap_or_default()
    }
}

impl ItemRegistry for WarehouseWorld {
    fn all_items(&self) -> Vec<ItemHandle> {
        self.items.values().map(|i| i.handle).collect()
    }

    fn item_pose(&self, item: ItemId) -> Option<ItemPose> {
        let body = self.items.get(&item)?;
        Some(ItemPose {
            handle: body.handle,
            position: body.position,
            velocity: body.velocity,
            bounds: Some(body.bounds()),
            kinematic: body.kinematic,
            carrier: body.carrier.map(|(c, _)| c),
        })
    }
}

impl SpawnService for WarehouseWorld {
    fn spawn_item(&mut self, kind: ItemKind, position: Vec3) -> ItemHandle {
        let handle = ItemHandle {
            id: self.next_item_id,
            kind,
        };
        self.next_item_id += 1;
        self.items.insert(
            handle.id,
            ItemBody {
                handle,
                position,
                velocity: Vec3::ZERO,
                kinematic: false,
                carrier: None,
            },
        );
        trace!(item = handle.id, ?kind, "item spawned");
        handle
    }

    fn destroy_item(&mut self, item: ItemId) {
        self.tracked.remove(&item);
        if self.items.remove(&item).is_some() {
            trace!(item, "item destroyed");
        }
    }

    fn attach_item(&mut self, item: ItemId, carrier: EntityId, offset: Vec3) {
        let carrier_position = self.body_position(carrier);
        self.tracked.remove(&item);
        if let Some(body) = self.items.get_mut(&item) {
            body.kinematic = true;
            body.velocity = Vec3::ZERO;
            body.carrier = Some((carrier, offset));
            body.position = carrier_position + offset;
        }
    }

    fn release_item(&mut self, item: ItemId, position: Vec3) {
        let on_belt = self
            .plan
            .cell_at(position)
            .and_then(|c| self.plan.tile(c))
            .is_some_and(|t| matches!(t, Tile::Belt(_)));
        if let Some(body) = self.items.get_mut(&item) {
            body.carrier = None;
            body.kinematic = false;
            body.velocity = Vec3::ZERO;
            body.position = position;
            if on_belt {
                self.tracked.insert(item);
            }
        }
    }
}

impl ConveyorTracking for WarehouseWorld {
    fn untrack_item(&mut self, item: ItemId) {
        self.tracked.remove(&item);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::substrate::Simulation;

    const MAP: &str = "
        WL WL WL WL WL WL
        WL TL BL BL BL WL
        WL DS BL US BL WL
        WL BL PT BL BL WL
        WL DP BE BE CP WL
        WL WL WL WL WL WL
    ";

    fn world() -> WarehouseWorld {
        WarehouseWorld::from_map_str(MAP, WorldConfig::default()).unwrap()
    }

    #[test]
    fn zones_become_trigger_volumes() {
        let world = world();
        let tags: Vec<&str> = world.zones().iter().map(|z| z.tag.as_str()).collect();
        assert!(tags.contains(&"TruckLoadZone"));
        assert!(tags.contains(&"ConveyorPickupZone"));
        assert!(tags.contains(&"UpArea"));
    }

    #[test]
    fn walls_stop_bodies_and_report_contacts() {
        let mut world = world();
        let agent = world.add_agent(&world.down_spawn());
        // Spawn is (1.5, 0.5, 3.5); the wall face is at x = 1.0.
        world.move_body(agent, Vec3::new(-0.5, 0.0, 0.0));
        assert_eq!(world.body_position(agent).x, 1.5);
        assert_eq!(world.drain_contacts(agent), Vec::<String>::new());

        world.move_body(agent, Vec3::new(-0.18, 0.0, 0.0));
        assert!((world.body_position(agent).x - 1.32).abs() < 1e-5);
        assert_eq!(world.drain_contacts(agent), vec!["Wall".to_string()]);
        // Staying in touch is not a new contact.
        world.move_body(agent, Vec3::new(0.0, 0.0, 0.01));
        assert!(world.drain_contacts(agent).is_empty());
    }

    #[test]
    fn sweep_reports_distance_and_layer() {
        let mut world = world();
        let agent = world.add_agent(&SpawnPose {
            position: Vec3::new(2.5, 0.5, 2.5),
            heading: 0.0,
        });
        // Belt row spans z ∈ [1, 2]; the body's lower face is at z = 2.2.
        let hit = world
            .sweep(agent, Vec3::new(0.0, 0.0, -1.0), 0.5)
            .unwrap();
        assert!((hit.distance - 0.2).abs() < 1e-5);
        assert_eq!(hit.layer, 1);
        assert_eq!(hit.tag.as_deref(), Some("ConveyorSurface"));
        assert!(world.sweep(agent, Vec3::new(0.0, 0.0, -1.0), 0.1).is_none());
    }

    #[test]
    fn belts_carry_released_items_to_the_end() {
        let mut world = world();
        let drop = world.drop_point().unwrap();
        let item = world.spawn_item(ItemKind::Small, Vec3::ZERO);
        world.release_item(item.id, drop);
        assert!(world.is_tracked(item.id));

        for _ in 0..200 {
            world.advance(0.02);
        }
        let pose = world.item_pose(item.id).unwrap();
        // Stops with its centre on the east edge of the last belt tile.
        assert!((pose.position.x - 4.0).abs() < 1e-4);
        let pickup = world
            .zones()
            .iter()
            .find(|z| z.tag == "ConveyorPickupZone")
            .unwrap();
        assert_eq!(world.items_overlapping(&pickup.bounds), vec![item]);
    }

    #[test]
    fn carried_items_follow_and_untracked_items_stay() {
        let mut world = world();
        let agent = world.add_agent(&world.down_spawn());
        let item = world.spawn_item(ItemKind::Large, Vec3::ZERO);
        world.attach_item(item.id, agent, Vec3::new(0.0, 0.6, 0.0));
        world.move_body(agent, Vec3::new(0.1, 0.0, 0.0));
        world.advance(0.02);
        let pose = world.item_pose(item.id).unwrap();
        assert!(pose.kinematic);
        assert_eq!(pose.carrier, Some(agent));
        assert_eq!(pose.position, world.body_position(agent) + Vec3::new(0.0, 0.6, 0.0));

        // Moving the body drags the item along without waiting for a tick.
        world.move_body(agent, Vec3::new(0.0, 0.0, 0.1));
        let expected = world.body_position(agent) + Vec3::new(0.0, 0.6, 0.0);
        assert_eq!(world.item_pose(item.id).unwrap().position, expected);
        world.teleport(agent, Vec3::new(3.5, 0.5, 4.5), 90.0);
        assert_eq!(
            world.item_pose(item.id).unwrap().position,
            Vec3::new(3.5, 0.5, 4.5) + Vec3::new(0.0, 0.6, 0.0)
        );
        world.set_body_position(agent, Vec3::new(3.5, 0.5, 3.9));
        assert_eq!(
            world.item_pose(item.id).unwrap().position,
            Vec3::new(3.5, 0.5, 3.9) + Vec3::new(0.0, 0.6, 0.0)
        );

        let sim: &mut dyn Simulation = &mut world;
        sim.untrack_item(item.id);
        sim.destroy_item(item.id);
        assert!(world.item_pose(item.id).is_none());
    }

    #[test]
    fn loose_bodies_fall_into_pits() {
        let mut world = world();
        let agent = world.add_agent(&SpawnPose {
            position: Vec3::new(2.5, 0.5, 2.5),
            heading: 0.0,
        });
        world.advance(0.1);
        assert!(world.body_position(agent).y < 0.5);

        world.configure_planar(agent);
        let y = world.body_position(agent).y;
        world.advance(0.1);
        assert_eq!(world.body_position(agent).y, y);
    }
}
