use std::path::{Path, PathBuf};

use sylva::{
    engine::{Engine, EngineBuilder, EngineSettings},
    grid::GridPoint,
    landscape::Landscape,
    scenario::{Scenario, ScenarioLoader},
    systems::{LightPatternSystem, LightReadSystem},
};
use tempfile::tempdir;

fn scenario_loader() -> ScenarioLoader {
    ScenarioLoader::new(env!("CARGO_MANIFEST_DIR"))
}

fn load(file: &str) -> Scenario {
    scenario_loader()
        .load(PathBuf::from("scenarios").join(file))
        .expect("scenario parses")
}

fn light_engine(scenario: &Scenario, snapshot_dir: &Path) -> Engine {
    let settings = EngineSettings {
        scenario_name: scenario.name.clone(),
        seed: scenario.seed,
        snapshot_interval_years: 0,
        snapshot_dir: snapshot_dir.to_path_buf(),
    };
    EngineBuilder::new(settings)
        .with_system(LightPatternSystem::new())
        .with_system(LightReadSystem::new())
        .build()
}

fn lri_at(landscape: &Landscape, position: GridPoint) -> f64 {
    landscape
        .units
        .iter()
        .flat_map(|u| u.trees())
        .find(|t| t.position() == position)
        .map(|t| t.light_resource_index())
        .expect("tree exists")
}

/// A spread of trees over one hectare, positions in metres.
fn plantation() -> Vec<(f64, f64, f64, f64)> {
    (0..60)
        .map(|i| {
            let x = 3.0 + (i * 37 % 94) as f64;
            let y = 3.0 + (i * 53 % 94) as f64;
            let dbh = 12.0 + (i * 7 % 30) as f64;
            (x, y, dbh, dbh * 0.85)
        })
        .collect()
}

fn planted(trees: &[(f64, f64, f64, f64)]) -> Landscape {
    let mut scenario = load("two_trees.yaml");
    scenario.stands.clear();
    let mut landscape = scenario.build_landscape().unwrap();
    for &(x, y, dbh, height) in trees {
        landscape.add_tree("piab", x, y, dbh, height, None).unwrap();
    }
    landscape
}

#[test]
fn lri_stays_within_unit_interval() {
    let scenario = load("single_stand.yaml");
    let temp = tempdir().unwrap();
    let mut landscape = scenario.build_landscape().unwrap();
    light_engine(&scenario, temp.path()).run(&mut landscape, 1).unwrap();

    let unit = &landscape.units[0];
    assert_eq!(unit.trees().len(), 400);
    for tree in unit.trees() {
        let lri = tree.light_resource_index();
        assert!((0.0..=1.0).contains(&lri), "lri {lri} of {}", tree.id());
    }
    assert!(unit.leaf_area() > 0.0);
    assert!(unit.weighted_leaf_area() <= unit.leaf_area() + 1e-9);
    assert!(landscape.light.cells().iter().all(|&v| v > 0.0 && v <= 1.0));
}

#[test]
fn taller_tree_shades_its_small_neighbour() {
    let scenario = load("two_trees.yaml");
    let temp = tempdir().unwrap();
    let mut landscape = scenario.build_landscape().unwrap();
    light_engine(&scenario, temp.path()).run(&mut landscape, 1).unwrap();

    // 50 m and 55 m plus the 30 cell buffer, at 2 m per cell
    let tall = lri_at(&landscape, GridPoint::new(55, 55));
    let small = lri_at(&landscape, GridPoint::new(57, 55));
    assert!(tall > 0.9, "tall tree lri {tall}");
    assert!(small < tall, "small {small} tall {tall}");
}

#[test]
fn tree_order_does_not_change_the_light_pattern() {
    let trees = plantation();
    let mut reversed = trees.clone();
    reversed.reverse();

    let scenario = load("two_trees.yaml");
    let temp = tempdir().unwrap();
    let mut forward = planted(&trees);
    let mut backward = planted(&reversed);
    light_engine(&scenario, temp.path()).run(&mut forward, 1).unwrap();
    light_engine(&scenario, temp.path()).run(&mut backward, 1).unwrap();

    for (a, b) in forward.light.cells().iter().zip(backward.light.cells()) {
        assert!((a - b).abs() <= 1e-5, "{a} vs {b}");
    }
    for tree in forward.units[0].trees() {
        let other = lri_at(&backward, tree.position());
        assert!((tree.light_resource_index() - other).abs() < 1e-4);
    }
}

#[test]
fn torus_wraps_shade_into_the_same_unit() {
    let torus = load("torus.yaml");
    let mut open = torus.clone();
    open.landscape.torus = false;
    let temp = tempdir().unwrap();

    let mut wrapped = torus.build_landscape().unwrap();
    let mut absorbing = open.build_landscape().unwrap();
    light_engine(&torus, temp.path()).run(&mut wrapped, 1).unwrap();
    light_engine(&open, temp.path()).run(&mut absorbing, 1).unwrap();

    // the small tree sits 97 m east; its unit wraps the big tree's shadow onto it
    let small = GridPoint::new(30 + 48, 55);
    assert!(lri_at(&wrapped, small) < lri_at(&absorbing, small));
    // the big tree sits on light cell 30; its shadow reaches about 8 cells west
    // into the buffer, which stays lit on a torus
    assert_eq!(wrapped.light[GridPoint::new(25, 55)], 1.0);
    assert!(absorbing.light[GridPoint::new(25, 55)] < 1.0);
}

#[test]
fn thread_count_does_not_change_results() {
    let scenario = load("mixed_landscape.yaml");
    let temp = tempdir().unwrap();
    let run = |threads: usize| {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .build()
            .unwrap();
        let mut landscape = scenario.build_landscape().unwrap();
        pool.install(|| light_engine(&scenario, temp.path()).run(&mut landscape, 1))
            .unwrap();
        landscape
    };
    let single = run(1);
    let many = run(4);
    assert_eq!(single.light.cells(), many.light.cells());
    for (a, b) in single.units.iter().zip(&many.units) {
        let lri = |u: &sylva::resource_unit::ResourceUnit| {
            u.trees().iter().map(|t| t.light_resource_index()).collect::<Vec<_>>()
        };
        assert_eq!(lri(a), lri(b));
    }
}
