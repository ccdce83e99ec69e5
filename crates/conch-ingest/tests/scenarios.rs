use conch_core::fixtures::{BattleFixture, CoopFixture};
use conch_ingest::ingestor::{
    ImportProgress, IncomingRecord, IngestConfig, Ingestor, RecordOrigin,
};
use conch_storage::{OpenState, ResultStore, StoreConfig};
use serde_json::{json, Value};
use std::io::Cursor;

fn ready_store() -> ResultStore {
    let store = ResultStore::connect_in_memory(StoreConfig::default()).expect("open db");
    assert_eq!(store.open().expect("open"), OpenState::Ready);
    store
}

fn battle(id: &str, day: u32) -> Value {
    BattleFixture::new(id, &format!("2023-03-{day:02}T12:00:00Z")).to_json()
}

fn coop(id: &str, day: u32) -> Value {
    CoopFixture::new(id, &format!("2023-03-{day:02}T06:00:00Z")).to_json()
}

fn document(battles: Vec<Value>, coops: Vec<Value>) -> Vec<u8> {
    serde_json::to_vec(&json!({"battles": battles, "coops": coops, "images": []}))
        .expect("serialize import")
}

#[test]
fn cold_import_stores_every_record() {
    let store = ready_store();
    let ingestor = Ingestor::new(&store, IngestConfig::default());
    let bytes = document(vec![battle("b-1", 1), battle("b-2", 2)], vec![coop("c-1", 3)]);

    let report = ingestor.import_json(&bytes).expect("import");
    assert_eq!((report.total, report.skip, report.fail), (3, 0, 0));
    assert!(report.error.is_none());
    assert_eq!(store.count(None, None).expect("count"), 3);

    for (id, expected) in [("b-1", battle("b-1", 1)), ("b-2", battle("b-2", 2)), ("c-1", coop("c-1", 3))] {
        let stored = store
            .query_detail_by_id(id)
            .expect("lookup")
            .unwrap_or_else(|| panic!("{id} stored"));
        assert_eq!(stored.detail_json().expect("detail"), expected);
    }
}

#[test]
fn partial_duplicate_import_skips_known_ids() {
    let store = ready_store();
    let ingestor = Ingestor::new(&store, IngestConfig::default());
    let first = document(vec![battle("b-1", 1), battle("b-2", 2)], vec![coop("c-1", 3)]);
    ingestor.import_json(&first).expect("first import");

    let second = document(
        vec![battle("b-1", 1), battle("b-2", 2), battle("b-3", 4)],
        vec![coop("c-1", 3)],
    );
    let report = ingestor.import_json(&second).expect("second import");
    assert_eq!((report.skip, report.fail), (3, 0));
    assert_eq!(report.added(), 1);
    assert_eq!(store.count(None, None).expect("count"), 4);
}

#[test]
fn one_corrupt_record_does_not_void_the_import() {
    let store = ready_store();
    let ingestor = Ingestor::new(&store, IngestConfig::default());
    let mut corrupt = battle("b-3", 3);
    corrupt["vsHistoryDetail"]["playedTime"] = json!("yesterday-ish");
    let bytes = document(
        vec![battle("b-1", 1), battle("b-2", 2), corrupt, battle("b-4", 4), battle("b-5", 5)],
        Vec::new(),
    );

    let report = ingestor.import_json(&bytes).expect("import");
    assert_eq!((report.skip, report.fail), (0, 1));
    assert!(report
        .error
        .as_deref()
        .is_some_and(|error| error.contains("yesterday-ish")));
    assert_eq!(store.count(None, None).expect("count"), 4);
    assert!(!store.exists("b-3").expect("exists"));
}

#[test]
fn api_and_import_of_the_same_result_store_one_row() {
    let store = ready_store();
    let ingestor = Ingestor::new(&store, IngestConfig::default());

    let report = ingestor
        .ingest(vec![IncomingRecord::Battle(battle("b-1", 1))], RecordOrigin::Api)
        .expect("api");
    assert_eq!(report.added(), 1);

    let report = ingestor
        .import_json(&document(vec![battle("b-1", 1)], Vec::new()))
        .expect("import");
    assert_eq!(report.skip, 1);

    let report = ingestor
        .ingest(vec![IncomingRecord::Battle(battle("b-1", 1))], RecordOrigin::Api)
        .expect("api again");
    assert_eq!(report.skip, 1);
    assert_eq!(store.count(None, None).expect("count"), 1);
}

#[test]
fn streamed_import_matches_whole_import() {
    let bytes = document(
        vec![battle("b-1", 1), battle("b-2", 2), battle("b-3", 3)],
        vec![coop("c-1", 4), coop("c-2", 5)],
    );

    let whole = ready_store();
    Ingestor::new(&whole, IngestConfig::default())
        .import_json(&bytes)
        .expect("whole import");

    let streamed = ready_store();
    let ingestor = Ingestor::new(
        &streamed,
        IngestConfig {
            import_read_size: 97,
            progress_every: 1,
            ..IngestConfig::default()
        },
    );
    let mut progress: Vec<ImportProgress> = Vec::new();
    let report = ingestor
        .import_json_stream_with_progress(Cursor::new(bytes), &mut progress)
        .expect("streamed import");

    assert_eq!((report.total, report.skip, report.fail), (5, 0, 0));
    assert_eq!(
        streamed.query_brief(None).expect("streamed"),
        whole.query_brief(None).expect("whole")
    );
    let processed = progress.iter().map(|p| p.processed).collect::<Vec<_>>();
    assert_eq!(processed, vec![1, 2, 3, 4, 5]);
}

#[test]
fn s3s_results_import_unwraps_data() {
    let store = ready_store();
    let ingestor = Ingestor::new(&store, IngestConfig::default());
    let bytes = serde_json::to_vec(&json!([
        {"data": battle("b-1", 1)},
        {"data": coop("c-1", 2)},
        {"data": {"unexpected": true}},
    ]))
    .expect("serialize");

    let report = ingestor.import_s3s(&bytes).expect("import");
    assert_eq!((report.total, report.skip, report.fail), (3, 0, 1));
    assert!(store.exists("b-1").expect("battle"));
    assert!(store.exists("c-1").expect("coop"));
}

#[test]
fn salmdroid_page_keeps_good_results_next_to_bad_ones() {
    let store = ready_store();
    let ingestor = Ingestor::new(&store, IngestConfig::default());
    let detail = coop("c-1", 2)["coopHistoryDetail"].clone();
    let results = json!([
        {"coopHistory": serde_json::to_string(&detail).expect("detail")},
        {"somethingElse": 1},
    ]);
    let page = json!({"results": serde_json::to_string(&results).expect("results")});

    let report = ingestor
        .import_salmdroid(&serde_json::to_vec(&page).expect("page"))
        .expect("import");
    assert_eq!((report.total, report.skip, report.fail), (2, 0, 1));
    assert!(report
        .error
        .as_deref()
        .is_some_and(|error| error.contains("coopHistory")));
    assert!(store.exists("c-1").expect("coop"));
}
