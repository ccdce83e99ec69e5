use conch_core::filter::Filter;
use conch_core::fixtures::{BattleFixture, CoopFixture};
use conch_core::record::NewResult;
use conch_storage::{OpenState, ResultStore, StorageError, StoreConfig, SCHEMA_VERSION};
use rusqlite::Connection;
use tempfile::NamedTempFile;

fn legacy_database(path: &std::path::Path) {
    let conn = Connection::open(path).expect("raw db");
    conn.execute_batch(
        "
        CREATE TABLE result (
            id TEXT PRIMARY KEY,
            time INT NOT NULL,
            mode TEXT NOT NULL,
            rule TEXT NOT NULL,
            weapon TEXT NOT NULL,
            players TEXT NOT NULL,
            detail TEXT NOT NULL
        );
        ",
    )
    .expect("legacy schema");

    let battle =
        NewResult::from_battle(&BattleFixture::new("b-1", "2023-03-01T12:00:00Z").to_json())
            .expect("battle");
    let coop = NewResult::from_coop(&CoopFixture::new("c-1", "2023-03-02T00:00:00Z").to_json())
        .expect("coop");
    for (result, weapon) in [(&battle, battle.weapon_column()), (&coop, String::new())] {
        conn.execute(
            "
            INSERT INTO result (id, time, mode, rule, weapon, players, detail)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            ",
            rusqlite::params![
                result.id,
                result.time,
                result.mode,
                result.rule,
                weapon,
                result.players_column(),
                result.detail,
            ],
        )
        .expect("legacy row");
    }
}

#[test]
fn legacy_file_is_migrated_and_persisted() {
    let file = NamedTempFile::new().expect("temp db");
    legacy_database(file.path());

    let store = ResultStore::connect(file.path(), StoreConfig::default()).expect("connect");
    assert_eq!(
        store.open().expect("open"),
        OpenState::NeedsUpgrade { from: 0 }
    );
    assert!(matches!(
        store.exists("b-1"),
        Err(StorageError::NeedsUpgrade { found: 0, target }) if target == SCHEMA_VERSION
    ));
    store.migrate().expect("migrate");
    assert_eq!(store.open().expect("open"), OpenState::Ready);
    store.close().expect("close");

    let store = ResultStore::connect(file.path(), StoreConfig::default()).expect("reconnect");
    assert_eq!(store.open().expect("open"), OpenState::Ready);
    assert_eq!(store.schema_version().expect("version"), SCHEMA_VERSION);
    assert!(!store.table_exists("result").expect("legacy table"));
    assert_eq!(store.count(None, None).expect("count"), 2);

    let coop_weapon = Filter {
        weapons: ["0e12ab".to_string()].into_iter().collect(),
        ..Filter::default()
    };
    let coops = store.query_brief(Some(&coop_weapon)).expect("coops");
    assert_eq!(coops.len(), 1);
    assert_eq!(coops[0].id, "c-1");
    assert_eq!(coops[0].stage, "Q29vcFN0YWdlLTE=");

    let battle = store
        .query_detail_by_id("b-1")
        .expect("lookup")
        .expect("battle present");
    assert_eq!(battle.brief.stage, "VnNTdGFnZS0x");
}

#[test]
fn garbage_file_is_fatal() {
    let file = NamedTempFile::new().expect("temp db");
    std::fs::write(file.path(), vec![0x42u8; 4096]).expect("garbage");

    let store = ResultStore::connect(file.path(), StoreConfig::default()).expect("connect");
    let err = store.open().expect_err("not a database");
    assert!(err.is_fatal(), "unexpected error {err}");
}
