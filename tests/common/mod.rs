#![allow(dead_code)]
//! Shared fixtures for integration tests: throwaway SQLite shards and helpers
//! that create objects and segments the way begin/commit flows would.

use chrono::{DateTime, Utc};
use metabase::{
    CipherSuite, EncryptionParameters, Metabase, MetabaseConfig, MetabaseError, MetabaseResult,
    Object, ObjectLocation, ObjectStatus, ObjectStream, Piece, PieceId, PrecommitConstraint,
    PrecommitConstraintResult, RedundancyAlgorithm, RedundancyScheme, Retention, Segment,
    SegmentPosition, ShardConfig, SqliteAdapter, logging,
};
use tempfile::TempDir;
use uuid::Uuid;

pub const SEGMENT_PLAIN_SIZE: i32 = 1024;

pub struct TestDb {
    _dir: TempDir,
    pub metabase: Metabase,
}

impl TestDb {
    pub fn adapter_for(&self, project_id: Uuid) -> &SqliteAdapter {
        self.metabase.choose_adapter(project_id)
    }
}

/// A metabase with one shard in a fresh temporary directory.
pub async fn setup() -> TestDb {
    setup_shards(&["main"], Default::default()).await
}

/// A metabase with one shard per name, optionally pinning projects.
pub async fn setup_shards(
    names: &[&str],
    pins: std::collections::HashMap<Uuid, String>,
) -> TestDb {
    logging::init_for_tests();
    let dir = tempfile::tempdir().expect("tempdir");
    let mut config = MetabaseConfig::single("unused");
    config.shards = names
        .iter()
        .map(|name| ShardConfig {
            name: name.to_string(),
            database_url: format!("sqlite://{}", dir.path().join(format!("{name}.db")).display()),
        })
        .collect();
    config.project_pins = pins;

    let metabase = Metabase::open(&config).await.expect("open metabase");
    metabase.ensure_schema().await.expect("schema");
    TestDb {
        _dir: dir,
        metabase,
    }
}

pub fn rand_location() -> ObjectLocation {
    ObjectLocation::new(
        Uuid::new_v4(),
        format!("bucket-{}", &Uuid::new_v4().simple().to_string()[..8]),
        format!("prefix/{}", Uuid::new_v4()),
    )
}

pub fn rand_object_stream() -> ObjectStream {
    ObjectStream {
        location: rand_location(),
        version: 1,
        stream_id: Uuid::new_v4(),
    }
}

pub fn default_encryption() -> EncryptionParameters {
    EncryptionParameters {
        cipher_suite: CipherSuite::AesGcm,
        block_size: 29 * 256,
    }
}

pub fn default_redundancy() -> RedundancyScheme {
    RedundancyScheme {
        algorithm: RedundancyAlgorithm::ReedSolomon,
        share_size: 256,
        required_shares: 2,
        repair_shares: 3,
        optimal_shares: 4,
        total_shares: 5,
    }
}

pub fn pending_object(stream: ObjectStream) -> Object {
    Object {
        stream,
        status: ObjectStatus::Pending,
        created_at: Utc::now(),
        expires_at: None,
        segment_count: 0,
        encrypted_metadata_nonce: None,
        encrypted_metadata: None,
        encrypted_metadata_encrypted_key: None,
        total_plain_size: 0,
        total_encrypted_size: 0,
        fixed_segment_size: 0,
        encryption: default_encryption(),
        retention: Retention::default(),
    }
}

pub fn committed_object(stream: ObjectStream, retention: Retention, segment_count: i32) -> Object {
    Object {
        status: ObjectStatus::Committed,
        segment_count,
        encrypted_metadata_nonce: Some(vec![1; 24]),
        encrypted_metadata: Some(b"encrypted-metadata".to_vec()),
        encrypted_metadata_encrypted_key: Some(vec![2; 32]),
        total_plain_size: i64::from(segment_count) * i64::from(SEGMENT_PLAIN_SIZE),
        total_encrypted_size: i64::from(segment_count) * i64::from(SEGMENT_PLAIN_SIZE + 16),
        fixed_segment_size: SEGMENT_PLAIN_SIZE,
        retention,
        ..pending_object(stream)
    }
}

/// `count` contiguous segments; even indexes are remote, odd ones inline.
pub fn make_segments(stream_id: Uuid, count: u32) -> Vec<Segment> {
    (0..count)
        .map(|i| {
            let remote = i % 2 == 0;
            Segment {
                stream_id,
                position: SegmentPosition::new(0, i),
                root_piece_id: PieceId([i as u8 + 1; 32]),
                encrypted_key_nonce: vec![3; 24],
                encrypted_key: vec![4; 32],
                encrypted_size: SEGMENT_PLAIN_SIZE + 16,
                plain_offset: i64::from(i) * i64::from(SEGMENT_PLAIN_SIZE),
                plain_size: SEGMENT_PLAIN_SIZE,
                redundancy: if remote {
                    default_redundancy()
                } else {
                    RedundancyScheme::default()
                },
                inline_data: if remote {
                    None
                } else {
                    Some(vec![i as u8; SEGMENT_PLAIN_SIZE as usize + 16])
                },
                pieces: if remote {
                    (0..5)
                        .map(|n| Piece {
                            number: n,
                            storage_node: Uuid::new_v4(),
                        })
                        .collect()
                } else {
                    Vec::new()
                },
            }
        })
        .collect()
}

/// Insert `object` and `segments` in one transaction and return them as
/// stored.
pub async fn insert(
    adapter: &SqliteAdapter,
    object: Object,
    segments: Vec<Segment>,
) -> (Object, Vec<Segment>) {
    let stream_id = object.stream.stream_id;
    adapter
        .with_tx(move |tx| {
            Box::pin(async move {
                tx.insert_object(&object).await?;
                for segment in &segments {
                    tx.insert_segment(segment).await?;
                }
                Ok::<_, MetabaseError>(())
            })
        })
        .await
        .expect("insert object");

    (
        stored_object(adapter, stream_id).await,
        stored_segments(adapter, stream_id).await,
    )
}

/// Create a committed object with `segment_count` segments.
pub async fn create_object(
    adapter: &SqliteAdapter,
    stream: ObjectStream,
    retention: Retention,
    segment_count: u32,
) -> (Object, Vec<Segment>) {
    let segments = make_segments(stream.stream_id, segment_count);
    let object = committed_object(stream, retention, segment_count as i32);
    insert(adapter, object, segments).await
}

/// Begin a pending upload at exactly `stream.version`.
pub async fn begin_object(adapter: &SqliteAdapter, stream: ObjectStream) -> Object {
    insert(adapter, pending_object(stream), Vec::new()).await.0
}

pub async fn begin_object_expiring(
    adapter: &SqliteAdapter,
    stream: ObjectStream,
    expires_at: DateTime<Utc>,
) -> Object {
    let mut object = pending_object(stream);
    object.expires_at = Some(expires_at);
    insert(adapter, object, Vec::new()).await.0
}

pub async fn stored_object(adapter: &SqliteAdapter, stream_id: Uuid) -> Object {
    adapter
        .testing_all_objects()
        .await
        .expect("list objects")
        .into_iter()
        .find(|o| o.stream.stream_id == stream_id)
        .expect("object stored")
}

pub async fn stored_segments(adapter: &SqliteAdapter, stream_id: Uuid) -> Vec<Segment> {
    adapter
        .testing_all_segments()
        .await
        .expect("list segments")
        .into_iter()
        .filter(|s| s.stream_id == stream_id)
        .collect()
}

/// Run a precommit in its own transaction, committing on success.
pub async fn precommit(
    adapter: &SqliteAdapter,
    opts: PrecommitConstraint,
) -> MetabaseResult<PrecommitConstraintResult> {
    adapter
        .with_tx(move |tx| Box::pin(async move { tx.precommit_constraint(opts).await }))
        .await
}

/// Assert the shard holds exactly these objects and segments.
pub async fn verify(adapter: &SqliteAdapter, objects: &[Object], segments: &[Segment]) {
    let mut want_objects = objects.to_vec();
    want_objects.sort_by_key(|o| o.stream.stream_id);
    let mut got_objects = adapter.testing_all_objects().await.expect("list objects");
    got_objects.sort_by_key(|o| o.stream.stream_id);
    assert_eq!(got_objects, want_objects);

    let mut want_segments = segments.to_vec();
    want_segments.sort_by_key(|s| (s.stream_id, s.position));
    let mut got_segments = adapter.testing_all_segments().await.expect("list segments");
    got_segments.sort_by_key(|s| (s.stream_id, s.position));
    assert_eq!(got_segments, want_segments);
}
