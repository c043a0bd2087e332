//! Common test utilities for cube engine tests
//!
//! Provides shared helper functions for:
//! - Creating TempDir-backed engines
//! - The Region / Day sales cuboid and its seed facts
//! - Reading whole result sets

#![allow(dead_code)]

use solidb_cube::{
    CodeDimension, CubeEngine, Cuboid, DateDimension, EngineConfig, Fact, Member, ResultSet,
};
use std::sync::Arc;
use tempfile::TempDir;

pub const SALES: &str = "sales_by_region_day";

pub fn create_test_engine() -> (CubeEngine, TempDir) {
    let tmp_dir = TempDir::new().expect("Failed to create temp dir");
    let mut config = EngineConfig::with_data_dir(tmp_dir.path());
    // Small batches so scans cross batch boundaries
    config.scan_batch_size = 2;
    config.scan_threads = 2;
    let engine = CubeEngine::open(config).expect("Failed to open cube engine");
    (engine, tmp_dir)
}

pub fn day(year: i32, month: u32, day: u32) -> Member {
    Member::date(year, month, day).expect("valid date")
}

pub fn region_day_cuboid(name: &str) -> Cuboid {
    Cuboid::new(
        name,
        vec![
            Arc::new(CodeDimension::new("region", 2)),
            Arc::new(DateDimension::new("day")),
        ],
    )
    .expect("valid cuboid")
}

pub fn sale(region: &str, date: Member, amount: f64) -> Fact {
    Fact::new(vec![Member::text(region), date]).measure("sales", amount)
}

/// (US, 2024-01-05)=10, (US, 2024-01-06)=5, (EU, 2024-01-05)=7
pub fn create_seeded_engine() -> (CubeEngine, TempDir) {
    let (engine, tmp) = create_test_engine();
    engine.register_cuboid(region_day_cuboid(SALES)).unwrap();
    engine
        .load(
            SALES,
            vec![
                sale("US", day(2024, 1, 5), 10.0),
                sale("US", day(2024, 1, 6), 5.0),
                sale("EU", day(2024, 1, 5), 7.0),
            ],
        )
        .unwrap();
    (engine, tmp)
}

/// One US sale per day of January 2024, valued at the day of month
pub fn create_january_engine() -> (CubeEngine, TempDir) {
    let (engine, tmp) = create_test_engine();
    engine.register_cuboid(region_day_cuboid(SALES)).unwrap();
    let facts = (1..=31).map(|d| sale("US", day(2024, 1, d), d as f64));
    engine.load(SALES, facts).unwrap();
    (engine, tmp)
}

/// (region code, SUM, COUNT) of every row
pub fn collect_sum_count(results: &mut ResultSet, measure: &str) -> Vec<(String, Option<f64>, Option<f64>)> {
    let mut rows = Vec::new();
    while results.has_next().unwrap() {
        results.next().unwrap();
        let row = results.current().unwrap();
        let region = row.group_member("region").unwrap().to_string();
        rows.push((
            region,
            row.double_aggregate(measure, "SUM").unwrap(),
            row.double_aggregate(measure, "COUNT").unwrap(),
        ));
    }
    results.close().unwrap();
    rows
}
