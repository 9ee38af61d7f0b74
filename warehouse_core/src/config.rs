//! Tuning and wiring for both controllers, loaded from TOML.
//!
//! Every field has a default matching the reference tuning, so a config file
//! only needs the values it changes. [`WarehouseConfig::validate`] runs after
//! loading and rejects values the controllers cannot work with.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::{Aabb, ItemKind, Vec3};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config TOML: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// How zone-entry shaping rewards are re-armed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryRewardMode {
    /// Every qualifying entry pays.
    #[default]
    EveryEntry,
    /// Pays once, re-armed when the agent leaves the zone.
    OncePerOccupancy,
    /// Pays once, re-armed when the carry cycle restarts (a new box is picked
    /// up or the current one is handed off).
    OncePerCarryCycle,
}

/// What happens while an agent stands in a zone it must not enter.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum RestrictedZonePolicy {
    /// Entry ends the episode.
    Terminate,
    /// Entry is penalised once, and every step spent inside costs
    /// `per_step_penalty`.
    Linger { per_step_penalty: f32 },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RestrictedZoneConfig {
    pub tag: String,
    pub entry_penalty: f32,
    pub policy: RestrictedZonePolicy,
}

impl Default for RestrictedZoneConfig {
    fn default() -> Self {
        RestrictedZoneConfig {
            tag: "UpArea".to_string(),
            entry_penalty: -1.0,
            policy: RestrictedZonePolicy::Terminate,
        }
    }
}

/// Penalises standing empty-handed in a zone, ending the episode once the
/// agent has idled there for `step_limit` consecutive steps.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IdleTimeoutConfig {
    pub zone_tag: String,
    pub per_step_penalty: f32,
    pub step_limit: u32,
    pub timeout_penalty: f32,
}

impl Default for IdleTimeoutConfig {
    fn default() -> Self {
        IdleTimeoutConfig {
            zone_tag: "ConveyorInputZone".to_string(),
            per_step_penalty: -0.005,
            step_limit: 120,
            timeout_penalty: -0.5,
        }
    }
}

/// Flat penalty for each physical contact with a tagged hazard surface.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HazardConfig {
    pub tag: String,
    pub contact_penalty: f32,
}

impl Default for HazardConfig {
    fn default() -> Self {
        HazardConfig {
            tag: "ConveyorSurface".to_string(),
            contact_penalty: -0.05,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MovementConfig {
    /// Linear speed in units per second.
    pub move_speed: f32,
    /// Angular speed in degrees per second.
    pub turn_speed: f32,
    /// Duration of one decision step in seconds.
    pub fixed_delta_time: f32,
    pub skin_width: f32,
    /// Bit mask of collider layers that stop movement.
    pub block_mask: u32,
    /// Pin the agent to the height recorded at episode start.
    pub planar_physics: bool,
    /// Divisors applied to the local position before clamping to [-1, 1].
    pub observation_scale: Vec3,
    /// Falling below this height ends the episode.
    pub min_allowed_y: f32,
}

impl Default for MovementConfig {
    fn default() -> Self {
        MovementConfig {
            move_speed: 3.0,
            turn_speed: 540.0,
            fixed_delta_time: 0.02,
            skin_width: 0.02,
            block_mask: u32::MAX,
            planar_physics: true,
            observation_scale: Vec3::new(20.0, 5.0, 20.0),
            min_allowed_y: -30.0,
        }
    }
}

impl MovementConfig {
    fn validate(&self, role: &str) -> Result<(), ConfigError> {
        if !(self.move_speed > 0.0) {
            return Err(invalid(role, "movement.move_speed must be > 0"));
        }
        if !(self.turn_speed > 0.0) {
            return Err(invalid(role, "movement.turn_speed must be > 0"));
        }
        if !(self.fixed_delta_time > 0.0) {
            return Err(invalid(role, "movement.fixed_delta_time must be > 0"));
        }
        if !(self.skin_width >= 0.0) {
            return Err(invalid(role, "movement.skin_width must be >= 0"));
        }
        let s = self.observation_scale;
        if !(s.x.is_finite() && s.y.is_finite() && s.z.is_finite()) {
            return Err(invalid(role, "movement.observation_scale must be finite"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SpawnPose {
    pub position: Vec3,
    /// Heading in degrees, 0 facing +Z.
    pub heading: f32,
}

impl Default for SpawnPose {
    fn default() -> Self {
        SpawnPose {
            position: Vec3::new(0.0, 0.5, 0.0),
            heading: 0.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DownRewards {
    pub load_from_truck: f32,
    pub place_on_conveyor: f32,
    pub enter_truck_zone: f32,
    pub enter_conveyor_zone_with_box: f32,
    pub invalid_action: f32,
    pub no_conveyor_placement: f32,
    pub step: f32,
    pub out_of_map: f32,
}

impl Default for DownRewards {
    fn default() -> Self {
        DownRewards {
            load_from_truck: 0.2,
            place_on_conveyor: 1.0,
            enter_truck_zone: 0.05,
            enter_conveyor_zone_with_box: 0.1,
            invalid_action: -0.02,
            no_conveyor_placement: -1.0,
            step: -0.001,
            out_of_map: -1.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DownZoneTags {
    pub truck_load: String,
    pub conveyor_input: String,
}

impl Default for DownZoneTags {
    fn default() -> Self {
        DownZoneTags {
            truck_load: "TruckLoadZone".to_string(),
            conveyor_input: "ConveyorInputZone".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DownAgentConfig {
    pub movement: MovementConfig,
    pub spawn: SpawnPose,
    /// Carry point relative to the agent body; `None` disables taking.
    pub carry_offset: Option<Vec3>,
    /// World position boxes are released at; `None` disables placing.
    pub conveyor_drop_point: Option<Vec3>,
    /// Kinds the truck can hand out. A random pick outside this set fails.
    pub spawnable_kinds: Vec<ItemKind>,
    pub zones: DownZoneTags,
    pub restricted_zone: Option<RestrictedZoneConfig>,
    pub idle_timeout: Option<IdleTimeoutConfig>,
    pub hazard: Option<HazardConfig>,
    pub rewards: DownRewards,
    pub entry_reward_mode: EntryRewardMode,
    pub max_boxes_per_episode: u32,
    /// Placing also requires standing in the conveyor input zone.
    pub place_requires_conveyor_zone: bool,
    /// Step budget per episode; 0 means unlimited.
    pub max_steps: u32,
}

impl Default for DownAgentConfig {
    fn default() -> Self {
        DownAgentConfig {
            movement: MovementConfig::default(),
            spawn: SpawnPose::default(),
            carry_offset: Some(Vec3::new(0.0, 0.6, 0.0)),
            conveyor_drop_point: None,
            spawnable_kinds: vec![ItemKind::Small, ItemKind::Large],
            zones: DownZoneTags::default(),
            restricted_zone: Some(RestrictedZoneConfig::default()),
            idle_timeout: Some(IdleTimeoutConfig::default()),
            hazard: Some(HazardConfig::default()),
            rewards: DownRewards::default(),
            entry_reward_mode: EntryRewardMode::EveryEntry,
            max_boxes_per_episode: 20,
            place_requires_conveyor_zone: false,
            max_steps: 5000,
        }
    }
}

impl DownAgentConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.movement.validate("down")?;
        if self.max_boxes_per_episode == 0 {
            return Err(invalid("down", "max_boxes_per_episode must be > 0"));
        }
        non_empty("down", "zones.truck_load", &self.zones.truck_load)?;
        non_empty("down", "zones.conveyor_input", &self.zones.conveyor_input)?;
        validate_optional_zones(
            "down",
            self.restricted_zone.as_ref(),
            self.idle_timeout.as_ref(),
            self.hazard.as_ref(),
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UpRewards {
    pub grab_box: f32,
    pub correct_truck: f32,
    pub wrong_truck: f32,
    pub enter_pickup_zone: f32,
    pub enter_truck_zone_with_box: f32,
    pub invalid_action: f32,
    pub no_delivery: f32,
    pub step: f32,
    pub out_of_map: f32,
}

impl Default for UpRewards {
    fn default() -> Self {
        UpRewards {
            grab_box: 0.6,
            correct_truck: 1.0,
            wrong_truck: -1.0,
            enter_pickup_zone: 0.12,
            enter_truck_zone_with_box: 0.1,
            invalid_action: -0.01,
            no_delivery: -1.0,
            step: -0.0005,
            out_of_map: -1.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UpZoneTags {
    pub conveyor_pickup: String,
    pub small_truck: String,
    pub large_truck: String,
}

impl Default for UpZoneTags {
    fn default() -> Self {
        UpZoneTags {
            conveyor_pickup: "ConveyorPickupZone".to_string(),
            small_truck: "SmallTruckZone".to_string(),
            large_truck: "LargeTruckZone".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UpAgentConfig {
    pub movement: MovementConfig,
    pub spawn: SpawnPose,
    /// Carry point relative to the agent body; `None` disables grabbing.
    pub carry_offset: Option<Vec3>,
    /// Items whose position lies inside this volume are destroyed on episode
    /// start and at episode end. `None` leaves the world untouched.
    pub cleanup_scope: Option<Aabb>,
    pub zones: UpZoneTags,
    pub restricted_zone: Option<RestrictedZoneConfig>,
    pub idle_timeout: Option<IdleTimeoutConfig>,
    pub hazard: Option<HazardConfig>,
    pub rewards: UpRewards,
    pub entry_reward_mode: EntryRewardMode,
    /// Deliveries that end the episode successfully.
    pub boxes_per_episode: u32,
    /// Step budget per episode; 0 means unlimited.
    pub max_steps: u32,
}

impl Default for UpAgentConfig {
    fn default() -> Self {
        UpAgentConfig {
            movement: MovementConfig::default(),
            spawn: SpawnPose::default(),
            carry_offset: Some(Vec3::new(0.0, 0.6, 0.0)),
            cleanup_scope: None,
            zones: UpZoneTags::default(),
            restricted_zone: None,
            idle_timeout: None,
            hazard: Some(HazardConfig::default()),
            rewards: UpRewards::default(),
            entry_reward_mode: EntryRewardMode::OncePerCarryCycle,
            boxes_per_episode: 10,
            max_steps: 5000,
        }
    }
}

impl UpAgentConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.movement.validate("up")?;
        if self.boxes_per_episode == 0 {
            return Err(invalid("up", "boxes_per_episode must be > 0"));
        }
        non_empty("up", "zones.conveyor_pickup", &self.zones.conveyor_pickup)?;
        non_empty("up", "zones.small_truck", &self.zones.small_truck)?;
        non_empty("up", "zones.large_truck", &self.zones.large_truck)?;
        validate_optional_zones(
            "up",
            self.restricted_zone.as_ref(),
            self.idle_timeout.as_ref(),
            self.hazard.as_ref(),
        )
    }
}

/// Settings of the reference kinematic world.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorldConfig {
    /// Belt speed in units per second.
    pub conveyor_speed: f32,
    /// Downward acceleration over pits, units per second squared.
    pub gravity: f32,
}

impl Default for WorldConfig {
    fn default() -> Self {
        WorldConfig {
            conveyor_speed: 1.5,
            gravity: 9.81,
        }
    }
}

/// Top-level configuration file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WarehouseConfig {
    /// Base seed; each controller derives its own stream from it.
    pub seed: u64,
    pub world: WorldConfig,
    pub down: DownAgentConfig,
    pub up: UpAgentConfig,
}

impl Default for WarehouseConfig {
    fn default() -> Self {
        WarehouseConfig {
            seed: 7,
            world: WorldConfig::default(),
            down: DownAgentConfig::default(),
            up: UpAgentConfig::default(),
        }
    }
}

impl WarehouseConfig {
    /// Reads and validates a TOML config file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&contents)
    }

    /// Parses and validates TOML text.
    pub fn parse(text: &str) -> Result<Self, ConfigError> {
        let config: WarehouseConfig = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.world.conveyor_speed >= 0.0) {
            return Err(ConfigError::Invalid(
                "world.conveyor_speed must be >= 0".to_string(),
            ));
        }
        self.down.validate()?;
        self.up.validate()?;
        // Both roles share one world tick.
        if self.down.movement.fixed_delta_time != self.up.movement.fixed_delta_time {
            return Err(ConfigError::Invalid(
                "down and up movement.fixed_delta_time must match".to_string(),
            ));
        }
        Ok(())
    }
}

fn invalid(role: &str, message: &str) -> ConfigError {
    ConfigError::Invalid(format!("{role}: {message}"))
}

fn non_empty(role: &str, field: &str, value: &str) -> Result<(), ConfigError> {
    if value.trim().is_empty() {
        return Err(invalid(role, &format!("{field} must not be empty")));
    }
    Ok(())
}

fn validate_optional_zones(
    role: &str,
    restricted: Option<&RestrictedZoneConfig>,
    idle: Option<&IdleTimeoutConfig>,
    hazard: Option<&HazardConfig>,
) -> Result<(), ConfigError> {
    if let Some(restricted) = restricted {
        non_empty(role, "restricted_zone.tag", &restricted.tag)?;
    }
    if let Some(idle) = idle {
        non_empty(role, "idle_timeout.zone_tag", &idle.zone_tag)?;
        if idle.step_limit == 0 {
            return Err(invalid(role, "idle_timeout.step_limit must be > 0"));
        }
    }
    if let Some(hazard) = hazard {
        non_empty(role, "hazard.tag", &hazard.tag)?;
    }
    Ok(())
}
