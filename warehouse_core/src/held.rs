use crate::{
    EntityId, ItemHandle, ItemKind, Vec3,
    substrate::{Simulation, retire_item},
};

/// The single carry slot of an agent.
///
/// While occupied, the item is kinematic and parented to the agent's carry
/// point. Emptying the slot always either releases the item into the world or
/// destroys it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HeldSlot {
    item: Option<ItemHandle>,
}

impl HeldSlot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.item.is_none()
    }

    pub fn item(&self) -> Option<ItemHandle> {
        self.item
    }

    pub fn kind(&self) -> Option<ItemKind> {
        self.item.map(|h| h.kind)
    }

    /// Parents `handle` to `carrier` at `offset`. Refuses (returning `false`)
    /// when something is already held.
    pub fn pick_up(
        &mut self,
        world: &mut dyn Simulation,
        carrier: EntityId,
        handle: ItemHandle,
        offset: Vec3,
    ) -> bool {
        if self.item.is_some() {
            return false;
        }
        world.attach_item(handle.id, carrier, offset);
        self.item = Some(handle);
        true
    }

    /// Hands the held item back to the world at `position`.
    pub fn release_at(&mut self, world: &mut dyn Simulation, position: Vec3) -> Option<ItemHandle> {
        let handle = self.item.take()?;
        world.release_item(handle.id, position);
        Some(handle)
    }

    /// Drops the reference when its item no longer exists in the world and
    /// returns the forgotten handle.
    pub fn forget_missing(&mut self, world: &dyn Simulation) -> Option<ItemHandle> {
        let handle = self.item?;
        if world.item_pose(handle.id).is_some() {
            return None;
        }
        self.item = None;
        Some(handle)
    }

    /// Removes the held item from play: conveyors drop it, then it is
    /// destroyed.
    pub fn consume(&mut self, world: &mut dyn Simulation) -> Option<ItemHandle> {
        let handle = self.item.take()?;
        retire_item(world, handle.id);
        Some(handle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::{SpawnPose, WorldConfig},
        substrate::{ItemRegistry, MotionSubstrate, SpawnService},
        world::WarehouseWorld,
    };

    const MAP: &str = "
        WL WL WL WL WL
        WL TL DS US WL
        WL CI DP CP WL
        WL WL WL WL WL
    ";

    fn setup() -> (WarehouseWorld, EntityId) {
        let mut world = WarehouseWorld::from_map_str(MAP, WorldConfig::default()).unwrap();
        let agent = world.add_agent(&SpawnPose {
            position: Vec3::new(2.5, 0.5, 2.5),
            heading: 0.0,
        });
        (world, agent)
    }

    #[test]
    fn second_pick_up_is_refused() {
        let (mut world, agent) = setup();
        let first = world.spawn_item(ItemKind::Small, Vec3::ZERO);
        let second = world.spawn_item(ItemKind::Large, Vec3::ZERO);
        let mut slot = HeldSlot::new();
        let offset = Vec3::new(0.0, 0.6, 0.0);

        assert!(slot.pick_up(&mut world, agent, first, offset));
        assert!(!slot.pick_up(&mut world, agent, second, offset));
        assert_eq!(slot.item(), Some(first));
        assert_eq!(slot.kind(), Some(ItemKind::Small));
        assert_eq!(world.item_pose(second.id).unwrap().carrier, None);
        assert_eq!(
            world.item_pose(first.id).unwrap().position,
            world.body_position(agent) + offset
        );
    }

    #[test]
    fn release_hands_the_item_back() {
        let (mut world, agent) = setup();
        let item = world.spawn_item(ItemKind::Large, Vec3::ZERO);
        let mut slot = HeldSlot::new();
        slot.pick_up(&mut world, agent, item, Vec3::ZERO);

        let drop = world.drop_point().unwrap();
        assert_eq!(slot.release_at(&mut world, drop), Some(item));
        assert!(slot.is_empty());
        let pose = world.item_pose(item.id).unwrap();
        assert!(!pose.kinematic);
        assert_eq!(pose.carrier, None);
        assert!(world.is_tracked(item.id));
        assert_eq!(slot.release_at(&mut world, drop), None);
    }

    #[test]
    fn vanished_items_are_forgotten() {
        let (mut world, agent) = setup();
        let item = world.spawn_item(ItemKind::Small, Vec3::ZERO);
        let mut slot = HeldSlot::new();
        slot.pick_up(&mut world, agent, item, Vec3::ZERO);

        assert_eq!(slot.forget_missing(&world), None);
        assert_eq!(slot.item(), Some(item));

        world.destroy_item(item.id);
        assert_eq!(slot.forget_missing(&world), Some(item));
        assert!(slot.is_empty());
    }

    #[test]
    fn consume_destroys_the_item() {
        let (mut world, agent) = setup();
        let item = world.spawn_item(ItemKind::Small, Vec3::ZERO);
        let mut slot = HeldSlot::new();
        slot.pick_up(&mut world, agent, item, Vec3::ZERO);

        assert_eq!(slot.consume(&mut world), Some(item));
        assert!(world.item_pose(item.id).is_none());
        assert_eq!(slot.consume(&mut world), None);
    }
}
