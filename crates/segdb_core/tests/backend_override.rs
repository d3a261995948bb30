//! Writable backend selection through `SEGDB_WRITABLE_SEGMENT`.
//!
//! Kept in its own test binary since it changes the process environment.

use segdb_core::segment::{ROWS_FILE, WAL_FILE};
use segdb_core::{
    ColumnType, Config, DeletionBitmap, Schema, Segment, SegmentFactory, Value,
    WritableBackendKind, WritableSegment, WRITABLE_BACKEND_ENV,
};
use std::sync::Arc;

#[test]
fn environment_selects_backend_per_call() {
    let dir = tempfile::tempdir().unwrap();
    let schema = Schema::builder()
        .column("name", ColumnType::Str)
        .index("by_name", &["name"])
        .build()
        .unwrap();
    let factory = SegmentFactory::new(Arc::new(schema), Config::default());

    std::env::set_var(WRITABLE_BACKEND_ENV, "MOCK");
    let mock_dir = dir.path().join("wr-0000");
    let mock = factory.create_writable_segment(&mock_dir).unwrap();
    assert_eq!(mock.backend(), WritableBackendKind::Mock);
    mock.insert(vec![Value::from("m")]).unwrap();
    mock.flush().unwrap();
    assert!(mock_dir.join(ROWS_FILE).is_file());
    assert!(!mock_dir.join(WAL_FILE).exists());

    std::env::set_var(WRITABLE_BACKEND_ENV, "anything-else");
    let wal_dir = dir.path().join("wr-0001");
    let wal = factory.create_writable_segment(&wal_dir).unwrap();
    assert_eq!(wal.backend(), WritableBackendKind::Wal);
    assert!(wal_dir.join(WAL_FILE).is_file());

    std::env::remove_var(WRITABLE_BACKEND_ENV);
    let reopened = factory.open_writable_segment(&wal_dir).unwrap();
    assert_eq!(reopened.backend(), WritableBackendKind::Wal);

    // the marker says "created", the override says which engine reads it
    std::env::set_var(WRITABLE_BACKEND_ENV, "mock");
    assert!(DeletionBitmap::marker_exists(&mock_dir));
    let reopened = factory.open_writable_segment(&mock_dir).unwrap();
    assert_eq!(reopened.backend(), WritableBackendKind::Mock);
    assert_eq!(reopened.logical_row_count(), 1);
    std::env::remove_var(WRITABLE_BACKEND_ENV);
}
