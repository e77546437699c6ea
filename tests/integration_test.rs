use anyhow::Result;
use rand::prelude::*;
use tempfile::tempdir;

use stratadb::index::{BTree, DEFAULT_ORDER};
use stratadb::schema::{codec, IntWidth, TypeDescriptor, Value};
use stratadb::storage::buffer::BufferPoolManager;
use stratadb::storage::disk::PageManager;
use stratadb::storage::page::{PageId, RecordId};
use stratadb::storage::{StorageError, PAGE_SIZE};
use stratadb::Database;

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn phone_columns() -> Vec<(String, TypeDescriptor)> {
    vec![
        ("id".into(), TypeDescriptor::uint(IntWidth::W64)),
        ("country_code".into(), TypeDescriptor::uint(IntWidth::W16)),
        (
            "area_code".into(),
            TypeDescriptor::Optional {
                inner: Box::new(TypeDescriptor::uint(IntWidth::W16)),
            },
        ),
        (
            "number".into(),
            TypeDescriptor::FixedArray {
                element: Box::new(TypeDescriptor::uint(IntWidth::W8)),
                len: 8,
            },
        ),
    ]
}

fn phone_row(rng: &mut StdRng, id: u64) -> Vec<Value> {
    let country_code = rng.gen_range(1..=999u64);
    let area_code = if rng.gen_bool(0.5) {
        Value::some(Value::Uint(rng.gen_range(0..1000u64)))
    } else {
        Value::none()
    };
    let digits = (0..8)
        .map(|_| Value::Uint(rng.gen_range(0..10u64)))
        .collect();
    vec![
        Value::Uint(id),
        Value::Uint(country_code),
        area_code,
        Value::Array(digits),
    ]
}

fn country_code_of(row: &[Value]) -> u64 {
    match row[1] {
        Value::Uint(code) => code,
        _ => panic!("country_code is not a uint"),
    }
}

#[test]
fn test_phone_number_range_scan_scenario() -> Result<()> {
    init_logging();
    let dir = tempdir()?;
    let mut db = Database::create(dir.path())?;
    db.create_table("phone_numbers", phone_columns(), vec!["id".into()])?;
    db.create_index(
        "phone_numbers",
        "phones_by_country",
        vec!["country_code".into()],
        false,
        DEFAULT_ORDER,
    )?;

    let mut rng = StdRng::seed_from_u64(7);
    let mut expected_in_range = 0u64;
    for id in 0..1000u64 {
        let row = phone_row(&mut rng, id);
        if (200..=300).contains(&country_code_of(&row)) {
            expected_in_range += 1;
        }
        db.insert("phone_numbers", row)?;
    }

    let low = [Value::Uint(200)];
    let high = [Value::Uint(300)];
    let rows = db.index_scan(
        "phone_numbers",
        "phones_by_country",
        Some((&low, true)),
        Some((&high, true)),
    )?;

    // Exactly the rows whose country code lies in [200, 300], ascending.
    assert_eq!(rows.len() as u64, expected_in_range);
    let codes: Vec<u64> = rows.iter().map(|(_, row)| country_code_of(row)).collect();
    assert!(codes.iter().all(|c| (200..=300).contains(c)));
    let mut sorted = codes.clone();
    sorted.sort_unstable();
    assert_eq!(codes, sorted);

    // Cross-check against a full table scan.
    let all = db.scan_table("phone_numbers")?;
    let brute: u64 = all
        .iter()
        .filter(|(_, row)| (200..=300).contains(&country_code_of(row)))
        .count() as u64;
    assert_eq!(brute, expected_in_range);
    Ok(())
}

#[test]
fn test_sequential_insert_height_bound() -> Result<()> {
    init_logging();
    let dir = tempdir()?;
    let page_manager = PageManager::create(&dir.path().join("index.db"))?;
    let pool = BufferPoolManager::with_lru(page_manager, 64);
    let mut tree = BTree::create(pool, TypeDescriptor::uint(IntWidth::W64), DEFAULT_ORDER, 1)?;

    for i in 1..=1000u64 {
        tree.insert(&Value::Uint(i), RecordId::new(PageId(1), (i % 100) as u16))?;
    }

    assert_eq!(tree.check_invariants()?, 1000);
    // Order 6 guarantees at least 3-way fan-out away from the root, so
    // the height stays near log_3(1000) ≈ 6.3.
    let expected = (1000f64).log(3.0).ceil() as u32;
    assert!(
        (expected - 1..=expected + 1).contains(&tree.height()),
        "height {} vs expected {}",
        tree.height(),
        expected
    );
    Ok(())
}

#[test]
fn test_underflow_borrow_and_merge() -> Result<()> {
    init_logging();
    let dir = tempdir()?;
    let page_manager = PageManager::create(&dir.path().join("index.db"))?;
    let pool = BufferPoolManager::with_lru(page_manager, 64);
    let mut tree = BTree::create(pool, TypeDescriptor::uint(IntWidth::W64), DEFAULT_ORDER, 1)?;

    for i in 0..60u64 {
        tree.insert(&Value::Uint(i), RecordId::new(PageId(1), i as u16))?;
    }
    let before = tree.stats()?;

    // Empty out the low end key by key; every intermediate state must
    // hold the occupancy and child-count invariants (borrows and merges
    // never leave an orphaned pointer behind).
    for i in 0..30u64 {
        assert!(tree.delete(&Value::Uint(i))?);
        tree.check_invariants()?;
    }
    let after = tree.stats()?;
    assert_eq!(after.entries, 30);
    assert!(after.nodes < before.nodes);
    Ok(())
}

#[test]
fn test_checksum_detects_on_disk_corruption() -> Result<()> {
    init_logging();
    let dir = tempdir()?;
    let path = dir.path().join("pages.db");

    let target = {
        let page_manager = PageManager::create(&path)?;
        let pool = BufferPoolManager::with_lru(page_manager, 8);
        let mut tree =
            BTree::create(pool.clone(), TypeDescriptor::uint(IntWidth::W64), DEFAULT_ORDER, 1)?;
        for i in 0..100u64 {
            tree.insert(&Value::Uint(i), RecordId::new(PageId(1), i as u16))?;
        }
        pool.flush_all()?;
        tree.root_page_id()
    };

    // Flip a single bit inside the root page's data region.
    let mut raw = std::fs::read(&path)?;
    let offset = target.0 as usize * PAGE_SIZE + 100;
    raw[offset] ^= 0x40;
    std::fs::write(&path, &raw)?;

    let mut page_manager = PageManager::open(&path)?;
    let mut buf = [0u8; PAGE_SIZE];
    let err = page_manager.read_page(target, &mut buf).unwrap_err();
    assert!(matches!(err, StorageError::ChecksumMismatch { .. }));
    Ok(())
}

#[test]
fn test_round_trip_and_order_of_declared_type() -> Result<()> {
    init_logging();
    // The declared phone-number shape, exercised straight through the
    // codec without a database around it.
    let desc = TypeDescriptor::Struct {
        fields: vec![
            stratadb::schema::Field::new("country_code", TypeDescriptor::uint(IntWidth::W16)),
            stratadb::schema::Field::new(
                "area_code",
                TypeDescriptor::Optional {
                    inner: Box::new(TypeDescriptor::uint(IntWidth::W16)),
                },
            ),
            stratadb::schema::Field::new(
                "number",
                TypeDescriptor::FixedArray {
                    element: Box::new(TypeDescriptor::uint(IntWidth::W8)),
                    len: 8,
                },
            ),
        ],
    };

    let mut rng = StdRng::seed_from_u64(99);
    let mut encoded_samples = Vec::new();
    for _ in 0..200 {
        let value = Value::Struct(vec![
            Value::Uint(rng.gen_range(1..=999u64)),
            if rng.gen_bool(0.3) {
                Value::none()
            } else {
                Value::some(Value::Uint(rng.gen_range(0..1000u64)))
            },
            Value::Array((0..8).map(|_| Value::Uint(rng.gen_range(0..10u64))).collect()),
        ]);
        let bytes = codec::encode(&desc, &value)?;
        assert_eq!(codec::decode(&desc, &bytes)?, value);
        encoded_samples.push(bytes);
    }

    // compare(a, b) == -compare(b, a) over every sampled pair.
    for a in encoded_samples.iter().take(20) {
        for b in encoded_samples.iter().take(20) {
            let forward = stratadb::schema::compare(&desc, a, b)?;
            let backward = stratadb::schema::compare(&desc, b, a)?;
            assert_eq!(forward, backward.reverse());
        }
    }
    Ok(())
}

#[test]
fn test_database_survives_small_buffer_pool() -> Result<()> {
    init_logging();
    let dir = tempdir()?;
    let mut db = Database::create_with_capacity(dir.path(), 8)?;
    db.create_table("phone_numbers", phone_columns(), vec!["id".into()])?;
    db.create_index(
        "phone_numbers",
        "phones_by_country",
        vec!["country_code".into()],
        false,
        DEFAULT_ORDER,
    )?;

    let mut rng = StdRng::seed_from_u64(3);
    for id in 0..500u64 {
        db.insert("phone_numbers", phone_row(&mut rng, id))?;
    }
    db.flush()?;

    let low = [Value::Uint(500)];
    let rows = db.index_scan(
        "phone_numbers",
        "phones_by_country",
        Some((&low, true)),
        None,
    )?;
    assert!(rows.iter().all(|(_, row)| country_code_of(row) >= 500));

    // A point lookup by primary key still works under heavy eviction.
    let hit = db.lookup("phone_numbers", &[Value::Uint(123)])?;
    assert!(hit.is_some());
    Ok(())
}
