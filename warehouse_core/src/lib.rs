use serde::{Deserialize, Serialize};

pub mod action;
pub mod config;
pub mod controller;
pub mod down;
pub mod environment;
pub mod episode;
pub mod geometry;
pub mod held;
pub mod map;
pub mod movement;
pub mod policy;
pub mod substrate;
pub mod up;
pub mod world;
pub mod zone;

pub use geometry::{Aabb, Vec3};

/// Unique identifier for agent bodies.
pub type EntityId = usize;

/// Unique identifier for spawned items.
pub type ItemId = u64;

/// Immutable category of a box, deciding which truck it belongs in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemKind {
    Small,
    Large,
}

/// Typed reference to a spawned item. The kind travels with the body id so
/// nothing has to ask the world what an item is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ItemHandle {
    pub id: ItemId,
    pub kind: ItemKind,
}

/// Which side of the conveyor an agent works.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// Truck-load zone → conveyor.
    Down,
    /// Conveyor → typed truck zones.
    Up,
}
