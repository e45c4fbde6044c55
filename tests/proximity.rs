use std::fs;

use nearby::geo::great_circle_km;
use nearby::select::Strategy;
use nearby::NearbyDb;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tempfile::{tempdir, TempDir};

const STRATEGIES: [Strategy; 2] = [Strategy::FullSort, Strategy::Bounded];

fn open(strategy: Strategy) -> (TempDir, NearbyDb) {
    let dir = tempdir().unwrap();
    let db = NearbyDb::new(&dir.path().join("positions.csv"), strategy, false);
    (dir, db)
}

fn seed_abcd(db: &NearbyDb) {
    db.record("A", 0.0, 0.0).unwrap();
    db.record("B", 0.0, 1.0).unwrap();
    db.record("C", 0.0, 10.0).unwrap();
    db.record("D", 1.0, 0.0).unwrap();
}

#[test]
fn closest_two_exclude_far_record() {
    for strategy in STRATEGIES {
        let (_dir, db) = open(strategy);
        seed_abcd(&db);

        let res = db.nearest("A", 2).unwrap().unwrap();
        let ids: Vec<_> = res.ranked.iter().map(|n| n.identity.as_str()).collect();
        assert_eq!(ids, ["B", "D"], "{strategy}");
        assert_eq!(res.total, 4);
        assert!((res.ranked[0].distance_km - 111.195).abs() < 0.01);
    }
}

#[test]
fn empty_store_has_no_first_seen() {
    let (_dir, db) = open(Strategy::Bounded);
    assert_eq!(db.first_seen("ghost").unwrap(), None);
    assert!(db.all_records().unwrap().is_empty());
}

#[test]
fn first_record_is_the_reference_position() {
    for strategy in STRATEGIES {
        let (_dir, db) = open(strategy);
        db.record("A", 0.0, 0.0).unwrap();
        db.record("near-first", 0.0, 0.5).unwrap();
        db.record("near-second", 50.0, 50.5).unwrap();
        db.record("A", 50.0, 50.0).unwrap();

        let res = db.nearest("A", 1).unwrap().unwrap();
        assert_eq!(res.ranked[0].identity, "near-first");
        assert_eq!(res.total, 4);
    }
}

#[test]
fn zero_k_still_reports_total() {
    for strategy in STRATEGIES {
        let (_dir, db) = open(strategy);
        seed_abcd(&db);
        let res = db.nearest("A", 0).unwrap().unwrap();
        assert!(res.ranked.is_empty());
        assert_eq!(res.total, 4);
    }
}

#[test]
fn ranked_length_and_order_properties() {
    let mut rng = StdRng::seed_from_u64(7);
    let (_dir, db) = open(Strategy::Bounded);
    let n = 120;
    for i in 0..n {
        db.record(&format!("u{i}"), rng.gen_range(-90.0..90.0), rng.gen_range(-180.0..180.0)).unwrap();
    }

    for k in [0, 1, 5, 50, 119, 500] {
        let res = db.nearest("u0", k).unwrap().unwrap();
        assert_eq!(res.ranked.len(), k.min(n - 1));
        assert_eq!(res.total, n);
        assert!(res.ranked.windows(2).all(|w| w[0].distance_km <= w[1].distance_km));
        assert!(res.ranked.iter().all(|r| r.identity != "u0"));
    }
}

#[test]
fn repeated_queries_are_identical() {
    let (_dir, db) = open(Strategy::Bounded);
    seed_abcd(&db);
    db.record("E", 0.0, -1.0).unwrap();

    let first = db.nearest("A", 3).unwrap();
    let second = db.nearest("A", 3).unwrap();
    assert_eq!(first, second);
}

#[test]
fn strategies_agree_on_random_stores() {
    let mut rng = StdRng::seed_from_u64(0xC0FFEE);
    for round in 0..20 {
        let dir = tempdir().unwrap();
        let path = dir.path().join("positions.csv");
        let full = NearbyDb::new(&path, Strategy::FullSort, false);
        let bounded = NearbyDb::new(&path, Strategy::Bounded, false);

        let n = rng.gen_range(1..200);
        for i in 0..n {
            // Snapped to a coarse grid so equal distances show up
            let lat = rng.gen_range(-10..10) as f64;
            let lng = rng.gen_range(-10..10) as f64;
            full.record(&format!("u{i}"), lat, lng).unwrap();
        }

        let k = rng.gen_range(0..30);
        let a = full.nearest("u0", k).unwrap().unwrap();
        let b = bounded.nearest("u0", k).unwrap().unwrap();
        assert_eq!(a, b, "round {round}");
    }
}

#[test]
fn distances_match_the_haversine_function() {
    let (_dir, db) = open(Strategy::FullSort);
    db.record("home", 48.8566, 2.3522).unwrap();
    db.record("london", 51.5074, -0.1278).unwrap();

    let res = db.nearest("home", 1).unwrap().unwrap();
    assert_eq!(res.ranked[0].distance_km, great_circle_km(48.8566, 2.3522, 51.5074, -0.1278));
}

#[test]
fn corrupt_lines_are_skipped_not_fatal() {
    let (dir, db) = open(Strategy::Bounded);
    fs::write(
        dir.path().join("positions.csv"),
        "A,0,0,1\nnot a record\nB,0,1,2\n\nC,0,10,3\nD,1,0,4\nE,5,",
    )
    .unwrap();

    let res = db.nearest("A", 10).unwrap().unwrap();
    assert_eq!(res.total, 4);
    assert_eq!(res.ranked.len(), 3);

    // Appending after the torn tail keeps the new record intact
    db.record("F", 0.0, 0.1).unwrap();
    let res = db.nearest("A", 1).unwrap().unwrap();
    assert_eq!(res.ranked[0].identity, "F");
    assert_eq!(res.total, 5);
}
