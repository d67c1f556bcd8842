//! Subscriber installation with a rolling file target.

use lexis_algo::config::LexicalConfig;
use lexis_algo::logging::{init_tracing_to, LOG_FILE_PREFIX};
use lexis_algo::{LexicalRelationIndex, RelationCache};

#[test]
fn file_logging_writes_engine_events() {
    let dir = tempfile::tempdir().unwrap();
    let guard = init_tracing_to("info", Some(dir.path()));
    assert!(guard.is_some());

    let cache = RelationCache::new(LexicalRelationIndex::default());
    cache
        .rebuild(&[vec!["a", "b", "a", "b"]], LexicalConfig::default())
        .unwrap();

    // Dropping the guard flushes the non-blocking writer
    drop(guard);

    let mut contents = String::new();
    for entry in std::fs::read_dir(dir.path()).unwrap() {
        let entry = entry.unwrap();
        let name = entry.file_name().to_string_lossy().into_owned();
        if name.starts_with(LOG_FILE_PREFIX) {
            contents.push_str(&std::fs::read_to_string(entry.path()).unwrap());
        }
    }
    assert!(contents.contains("lexical snapshot swapped"), "log: {contents}");
    assert!(contents.contains("version=1"));

    // A subscriber is already installed; later calls leave it in place
    assert!(init_tracing_to("not a valid filter [", None).is_none());
}
