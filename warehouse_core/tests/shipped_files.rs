use std::path::PathBuf;

use warehouse_core::{
    Role,
    config::{EntryRewardMode, WarehouseConfig},
    environment::Environment,
    map::{FloorPlan, ZoneKind},
    policy::PlanningPolicy,
    world::WarehouseWorld,
};

fn workspace_file(relative: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("..").join(relative)
}

#[test]
fn sample_config_parses() {
    let config = WarehouseConfig::from_file(&workspace_file("config/warehouse.toml")).unwrap();
    assert!(config.down.place_requires_conveyor_zone);
    assert_eq!(config.up.entry_reward_mode, EntryRewardMode::OncePerCarryCycle);
    let scope = config.up.cleanup_scope.unwrap();
    assert_eq!(scope.min.x, 8.0);
}

#[test]
fn sample_map_has_every_zone() {
    let text = std::fs::read_to_string(workspace_file("maps/warehouse.txt")).unwrap();
    let plan = FloorPlan::parse(&text).unwrap();
    assert_eq!((plan.width(), plan.height()), (18, 9));
    assert!(plan.drop_point().is_some());
    for kind in [
        ZoneKind::TruckLoad,
        ZoneKind::ConveyorInput,
        ZoneKind::ConveyorPickup,
        ZoneKind::SmallTruck,
        ZoneKind::LargeTruck,
        ZoneKind::UpArea,
    ] {
        assert!(!plan.cells_of(kind).is_empty(), "{kind:?} missing");
    }
}

#[test]
fn sample_setup_runs_headless() {
    let config = WarehouseConfig::from_file(&workspace_file("config/warehouse.toml")).unwrap();
    let text = std::fs::read_to_string(workspace_file("maps/warehouse.txt")).unwrap();
    let world = WarehouseWorld::from_map_str(&text, config.world.clone()).unwrap();
    let scale = config.down.movement.observation_scale;
    let mut env = Environment::from_config(world, &config, |role: Role, world: &WarehouseWorld| {
        Box::new(PlanningPolicy::new(role, world.plan().clone(), scale))
            as Box<dyn warehouse_core::policy::Policy>
    });

    env.run(500);
    assert_eq!(env.turn(), 500);
    for slot in env.agents() {
        assert!(slot.controller().episode().steps > 0);
    }
}
