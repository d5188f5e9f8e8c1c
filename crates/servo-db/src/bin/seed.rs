//! # Demo Preset Seeder
//!
//! Writes a handful of poses for the humanoid rig into a preset database.
//!
//! ## Usage
//! ```bash
//! cargo run -p servo-db --bin seed
//! cargo run -p servo-db --bin seed -- --db ./data/presets.db --force
//! ```
//!
//! Existing presets are left alone unless `--force` is given.

use std::env;

use servo_core::{
    ActuatorSpec, ActuatorStateStore, BoundsPolicy, CommandDispatcher, GroupTable, PresetStore,
};
use servo_db::{Database, DbConfig};

const JOINTS: &[&str] = &[
    "Daumen",
    "Daumen Gelenk",
    "Zeigefinger",
    "Mittelfinger",
    "Ringfinger",
    "Kleiner Finger",
    "Handgelenk",
    "Unterarm",
    "Ellbogen",
    "Bizeps",
    "Schulter Vertikal",
    "Schulter Horizontal",
    "Hals",
    "Nacken",
];

const FINGERS: &[&str] = &["Zeigefinger", "Mittelfinger", "Ringfinger", "Kleiner Finger"];

/// `(preset, [(joint, angle)])`. Joints not listed stay at 0.
fn demo_poses() -> Vec<(&'static str, Vec<(&'static str, f64)>)> {
    let fingers = |angle: f64| FINGERS.iter().map(move |f| (*f, angle));

    vec![
        ("Rest", vec![]),
        (
            "Wave Up",
            [("Schulter Horizontal", -45.0), ("Ellbogen", 90.0), ("Handgelenk", 30.0)]
                .into_iter()
                .chain(fingers(45.0))
                .collect(),
        ),
        (
            "Fist",
            [("Daumen", 80.0), ("Daumen Gelenk", 60.0)]
                .into_iter()
                .chain(fingers(85.0))
                .collect(),
        ),
        ("Look Left", vec![("Hals", -60.0), ("Nacken", 10.0)]),
    ]
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args: Vec<String> = env::args().collect();

    let mut db_path = String::from("./presets_dev.db");
    let mut force = false;

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--db" | "-d" => {
                if i + 1 < args.len() {
                    db_path = args[i + 1].clone();
                    i += 1;
                }
            }
            "--force" | "-f" => force = true,
            "--help" | "-h" => {
                println!("Servo Panel Preset Seeder");
                println!();
                println!("Usage: seed [OPTIONS]");
                println!();
                println!("Options:");
                println!("  -d, --db <PATH>    Database file path (default: ./presets_dev.db)");
                println!("  -f, --force        Overwrite presets with the same names");
                println!("  -h, --help         Show this help message");
                return Ok(());
            }
            _ => {}
        }
        i += 1;
    }

    println!("Servo Panel Preset Seeder");
    println!("=========================");
    println!("Database: {}", db_path);
    println!();

    let db = Database::new(DbConfig::new(&db_path)).await?;
    let presets = PresetStore::new(db.kv());

    let existing = presets.list().await?;
    if !existing.is_empty() && !force {
        println!("⚠ Database already has {} presets", existing.len());
        println!("  Pass --force to overwrite the demo poses.");
        return Ok(());
    }

    let dispatcher = CommandDispatcher::new(BoundsPolicy::Clamp);

    for (name, angles) in demo_poses() {
        // A fresh rig at zero for every pose
        let mut rig = ActuatorStateStore::with_groups(GroupTable::humanoid());
        rig.apply_config(JOINTS.iter().enumerate().map(|(channel, joint)| {
            (
                joint.to_string(),
                ActuatorSpec::new("demo", channel as u32, -90.0, 90.0, 0.0, true),
            )
        }));

        for (joint, angle) in angles {
            dispatcher.preview(&mut rig, joint, angle)?;
        }

        let saved = presets.save(name, &rig).await?;
        println!(
            "✓ {} ({} joints){}",
            saved.name,
            saved.entries,
            if saved.replaced { " [replaced]" } else { "" }
        );
    }

    println!();
    println!("Presets: {}", presets.list().await?.join(", "));

    db.close().await;
    Ok(())
}
