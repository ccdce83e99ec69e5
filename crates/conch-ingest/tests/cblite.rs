use conch_core::fixtures::{BattleFixture, CoopFixture};
use conch_core::fleece::test_encoder::{small_int, Encoder, Slot};
use conch_core::record::ResultKind;
use conch_core::value::Value;
use conch_ingest::cblite::CbliteSource;
use conch_ingest::ingestor::{IngestConfig, Ingestor};
use conch_storage::{ResultStore, StoreConfig};
use rusqlite::{params, Connection};
use std::path::Path;

const SHARED_KEYS: [&str; 4] = ["id", "playedTime", "image", "url"];

/// Encodes `value`, writing map keys found in `keys` as shared-key indexes.
fn encode_with_keys(encoder: &mut Encoder, value: &Value, keys: &[&str]) -> Slot {
    match value {
        Value::Map(entries) => {
            let slots = entries
                .iter()
                .map(|(key, value)| {
                    let key_slot = match keys.iter().position(|shared| shared == key) {
                        Some(index) => Slot::Inline(small_int(index as i64)),
                        None => encoder.write(&Value::String(key.clone())),
                    };
                    (key_slot, encode_with_keys(encoder, value, keys))
                })
                .collect::<Vec<_>>();
            encoder.map(&slots)
        }
        Value::Array(items) => {
            let slots = items
                .iter()
                .map(|item| encode_with_keys(encoder, item, keys))
                .collect::<Vec<_>>();
            encoder.array(&slots, false)
        }
        scalar => encoder.write(scalar),
    }
}

fn body(detail: &serde_json::Value) -> Vec<u8> {
    let mut encoder = Encoder::default();
    let root = encode_with_keys(&mut encoder, &Value::from(detail), &SHARED_KEYS);
    encoder.finish(root)
}

fn shared_keys_body() -> Vec<u8> {
    let keys = Value::Array(
        SHARED_KEYS
            .iter()
            .map(|key| Value::String(key.to_string()))
            .collect(),
    );
    let mut encoder = Encoder::default();
    let root = encoder.write(&keys);
    encoder.finish(root)
}

fn source_database(path: &Path, documents: &[(&str, i64, Vec<u8>)]) {
    let conn = Connection::open(path).expect("source db");
    conn.execute_batch(
        "
        CREATE TABLE kv_info (key TEXT PRIMARY KEY, sequence INTEGER, flags INTEGER DEFAULT 0, body BLOB);
        CREATE TABLE kv_default (key TEXT PRIMARY KEY, sequence INTEGER, flags INTEGER DEFAULT 0, body BLOB);
        ",
    )
    .expect("schema");
    conn.execute(
        "INSERT INTO kv_info (key, sequence, body) VALUES ('SharedKeys', 1, ?1)",
        [shared_keys_body()],
    )
    .expect("shared keys");
    for (sequence, (key, flags, body)) in documents.iter().enumerate() {
        conn.execute(
            "INSERT INTO kv_default (key, sequence, flags, body) VALUES (?1, ?2, ?3, ?4)",
            params![key, sequence as i64 + 1, flags, body],
        )
        .expect("document");
    }
}

#[test]
fn live_documents_are_decoded_and_ingested() {
    let dir = tempfile::tempdir().expect("temp dir");
    let path = dir.path().join("source.sqlite3");
    let first = BattleFixture::new("b-1", "2023-03-01T12:00:00Z").to_json();
    let deleted = BattleFixture::new("b-2", "2023-03-02T12:00:00Z").to_json();
    source_database(
        &path,
        &[
            ("doc-1", 0, body(&first["vsHistoryDetail"])),
            ("doc-2", 1, body(&deleted["vsHistoryDetail"])),
            ("doc-3", 0, vec![0x50, 0x00]),
        ],
    );

    let source = CbliteSource::open(&path).expect("open source");
    assert_eq!(source.shared_keys(), SHARED_KEYS.map(str::to_string).as_slice());
    assert_eq!(source.bodies().expect("bodies").len(), 2);

    let store = ResultStore::connect_in_memory(StoreConfig::default()).expect("open db");
    store.open().expect("open");
    let ingestor = Ingestor::new(&store, IngestConfig::default());
    let report = ingestor
        .import_cblite(&path, ResultKind::Battle)
        .expect("import");

    assert_eq!((report.total, report.skip, report.fail), (2, 0, 1));
    assert!(report
        .error
        .as_deref()
        .is_some_and(|error| error.starts_with("document doc-3")));
    assert!(!store.exists("b-2").expect("deleted doc"));
    let stored = store
        .query_detail_by_id("b-1")
        .expect("lookup")
        .expect("b-1 stored");
    assert_eq!(stored.detail_json().expect("detail"), first);
}

#[test]
fn coop_documents_are_wrapped_as_coops() {
    let dir = tempfile::tempdir().expect("temp dir");
    let path = dir.path().join("coops.sqlite3");
    let coop = CoopFixture::new("c-1", "2023-03-02T00:00:00Z").to_json();
    source_database(&path, &[("doc-1", 0, body(&coop["coopHistoryDetail"]))]);

    let store = ResultStore::connect_in_memory(StoreConfig::default()).expect("open db");
    store.open().expect("open");
    let ingestor = Ingestor::new(&store, IngestConfig::default());

    let report = ingestor
        .import_cblite(&path, ResultKind::Coop)
        .expect("import");
    assert_eq!(report.added(), 1);
    let again = ingestor
        .import_cblite(&path, ResultKind::Coop)
        .expect("import again");
    assert_eq!(again.skip, 1);

    let briefs = store.query_brief(None).expect("briefs");
    assert_eq!(briefs.len(), 1);
    assert_eq!(briefs[0].kind(), ResultKind::Coop);
    assert_eq!(briefs[0].weapon, vec!["0e12ab".to_string(), "7f3c9d".to_string()]);
}
