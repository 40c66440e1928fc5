mod common;

use std::sync::Arc;

use motion_keep::{
    FrameId, FrameSource, FrameStore, IngestionPipeline, MotionOutcomeStore, MotionScorer, PipelineStats,
    RetentionBuffer, RetentionPolicy, ScoringMode, SqliteFrameStore,
};

use common::gray_png;

fn stored_ids(store: &dyn FrameStore) -> Vec<FrameId> {
    store
        .list_all()
        .unwrap()
        .into_iter()
        .map(|frame| frame.id)
        .collect()
}

#[test]
fn motion_preserves_lead_up_and_quiet_collapses_the_rest() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(SqliteFrameStore::open_in_memory(dir.path()).unwrap());
    let buffer = RetentionBuffer::new(
        RetentionPolicy {
            buffer_capacity: 3,
            keep_all_frames: false,
        },
        store.clone(),
        Arc::new(PipelineStats::new()),
    );

    let mut ids = Vec::new();
    for (i, is_motion) in [false, false, false, true].into_iter().enumerate() {
        let frame = store.save(b"frame", i as i64).unwrap();
        buffer.register(frame.id, frame.created_at_ms).unwrap();
        buffer.on_motion_outcome(frame.id, is_motion).unwrap();
        ids.push(frame.id);
    }
    let (f1, f2, f3, f4) = (ids[0], ids[1], ids[2], ids[3]);
    assert_eq!(buffer.preserved().unwrap(), vec![f2, f3, f4]);
    assert_eq!(stored_ids(store.as_ref()), vec![f1, f2, f3, f4]);

    let f5 = store.save(b"frame", 4).unwrap();
    buffer.register(f5.id, 4).unwrap();
    let report = buffer.on_motion_outcome(f5.id, false).unwrap();

    assert_eq!(report.deleted, vec![f1]);
    assert_eq!(stored_ids(store.as_ref()), vec![f2, f3, f4, f5.id]);
}

#[test]
fn pipeline_scenario_with_real_frames() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(SqliteFrameStore::open_in_memory(dir.path()).unwrap());
    let stats = Arc::new(PipelineStats::new());
    let retention = Arc::new(RetentionBuffer::new(
        RetentionPolicy {
            buffer_capacity: 3,
            keep_all_frames: false,
        },
        store.clone(),
        stats.clone(),
    ));
    // 10x10 pixels flipping from 0 to 255 scores 25_500.
    let pipeline = IngestionPipeline::new(
        store.clone(),
        store.clone(),
        MotionScorer::new(10_000.0, ScoringMode::PerSource),
        retention.clone(),
        stats.clone(),
    );

    let mut ids = Vec::new();
    for value in [0u8, 0, 0, 255, 255] {
        let result = pipeline
            .ingest(&gray_png(10, 10, value), &FrameSource::Upload, None)
            .unwrap();
        ids.push(result.frame.id);
    }

    assert_eq!(retention.preserved().unwrap(), vec![ids[1], ids[2], ids[3]]);
    assert_eq!(stored_ids(store.as_ref()), ids[1..].to_vec());

    let snapshot = stats.snapshot();
    assert_eq!(snapshot.frames_ingested, 5);
    assert_eq!(snapshot.outcomes_recorded, 5);
    assert_eq!(snapshot.motion_events, 1);
    assert_eq!(snapshot.frames_deleted, 1);

    let outcomes = store.recent_outcomes(10).unwrap();
    assert_eq!(outcomes.len(), 5);
    assert!(outcomes[1].is_motion);
    assert_eq!(outcomes[1].score, 25_500.0);
}

#[test]
fn age_sweep_reclaims_preserved_frames() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(SqliteFrameStore::open_in_memory(dir.path()).unwrap());
    let buffer = RetentionBuffer::new(
        RetentionPolicy::default(),
        store.clone(),
        Arc::new(PipelineStats::new()),
    );
    let old = store.save(b"old", 1_000).unwrap();
    buffer.register(old.id, 1_000).unwrap();
    buffer.on_motion_outcome(old.id, true).unwrap();
    let recent = store.save(b"recent", 5_000).unwrap();
    buffer.register(recent.id, 5_000).unwrap();

    let report = buffer.sweep_older_than(2_000).unwrap();
    assert_eq!(report.deleted, vec![old.id]);
    assert!(buffer.preserved().unwrap().is_empty());
    assert!(!old.file_path.exists());
    assert_eq!(stored_ids(store.as_ref()), vec![recent.id]);
}
