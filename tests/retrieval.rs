mod common;

use common::*;
use metabase::{MetabaseError, ObjectLocation, Retention, SegmentPosition};
use uuid::Uuid;

#[tokio::test]
async fn exact_version_returns_only_committed_rows() {
    let db = setup().await;
    let stream = rand_object_stream();
    let loc = stream.location.clone();
    let adapter = db.adapter_for(loc.project_id);

    let (obj, _) = create_object(adapter, stream.clone(), Retention::default(), 1).await;
    let mut pending_stream = stream.clone();
    pending_stream.version = 2;
    pending_stream.stream_id = Uuid::new_v4();
    begin_object(adapter, pending_stream).await;

    assert_eq!(db.metabase.get_object_exact_version(&loc, 1).await.unwrap(), obj);

    let err = db.metabase.get_object_exact_version(&loc, 2).await.unwrap_err();
    assert!(matches!(err, MetabaseError::ObjectNotFound(_)), "{err:?}");

    let err = db.metabase.get_object_exact_version(&loc, 3).await.unwrap_err();
    assert!(err.is_not_found());
}

#[tokio::test]
async fn exact_version_rejects_bad_requests() {
    let db = setup().await;
    let loc = rand_location();

    for version in [0, -1] {
        let err = db.metabase.get_object_exact_version(&loc, version).await.unwrap_err();
        assert!(err.is_invalid_request());
    }

    let missing_bucket = ObjectLocation {
        bucket_name: String::new(),
        ..loc.clone()
    };
    let err = db
        .metabase
        .get_object_exact_version(&missing_bucket, 1)
        .await
        .unwrap_err();
    assert!(err.is_invalid_request());

    let missing_project = ObjectLocation {
        project_id: Uuid::nil(),
        ..loc
    };
    let err = db
        .metabase
        .get_object_latest_version(&missing_project)
        .await
        .unwrap_err();
    assert!(err.is_invalid_request());
}

#[tokio::test]
async fn latest_version_ignores_pending_objects() {
    let db = setup().await;
    let stream = rand_object_stream();
    let loc = stream.location.clone();
    let adapter = db.adapter_for(loc.project_id);

    // only pending
    begin_object(adapter, stream.clone()).await;
    let err = db.metabase.get_object_latest_version(&loc).await.unwrap_err();
    assert!(matches!(err, MetabaseError::ObjectNotFound(_)), "{err:?}");

    let mut v2 = stream.clone();
    v2.version = 2;
    v2.stream_id = Uuid::new_v4();
    let (committed_v2, _) = create_object(adapter, v2, Retention::default(), 0).await;

    let mut v3 = stream.clone();
    v3.version = 3;
    v3.stream_id = Uuid::new_v4();
    let (committed_v3, _) = create_object(adapter, v3, Retention::default(), 0).await;

    // a pending object above every committed one
    let mut v9 = stream.clone();
    v9.version = 9;
    v9.stream_id = Uuid::new_v4();
    begin_object(adapter, v9).await;

    let latest = db.metabase.get_object_latest_version(&loc).await.unwrap();
    assert_eq!(latest, committed_v3);
    assert_ne!(latest, committed_v2);
}

#[tokio::test]
async fn segment_by_position() {
    let db = setup().await;
    let stream = rand_object_stream();
    let project = stream.location.project_id;
    let adapter = db.adapter_for(project);
    let (_, segs) = create_object(adapter, stream.clone(), Retention::default(), 3).await;

    for seg in &segs {
        let got = db
            .metabase
            .get_segment_by_position(project, stream.stream_id, seg.position)
            .await
            .unwrap();
        assert_eq!(&got, seg);
    }

    let err = db
        .metabase
        .get_segment_by_position(project, stream.stream_id, SegmentPosition::new(0, 3))
        .await
        .unwrap_err();
    assert!(matches!(err, MetabaseError::SegmentNotFound(_)), "{err:?}");

    let err = db
        .metabase
        .get_segment_by_position(project, Uuid::nil(), SegmentPosition::new(0, 0))
        .await
        .unwrap_err();
    assert!(err.is_invalid_request());
}

#[tokio::test]
async fn latest_object_last_segment() {
    let db = setup().await;
    let stream = rand_object_stream();
    let loc = stream.location.clone();
    let adapter = db.adapter_for(loc.project_id);

    let err = db.metabase.get_latest_object_last_segment(&loc).await.unwrap_err();
    assert!(err.is_not_found());

    create_object(adapter, stream.clone(), Retention::default(), 2).await;
    let mut v2 = stream.clone();
    v2.version = 2;
    v2.stream_id = Uuid::new_v4();
    let (_, v2_segs) = create_object(adapter, v2.clone(), Retention::default(), 4).await;

    let last = db.metabase.get_latest_object_last_segment(&loc).await.unwrap();
    assert_eq!(last.stream_id, v2.stream_id);
    assert_eq!(last, v2_segs[3]);

    // latest committed object without segments
    let mut v3 = stream.clone();
    v3.version = 3;
    v3.stream_id = Uuid::new_v4();
    create_object(adapter, v3, Retention::default(), 0).await;
    let err = db.metabase.get_latest_object_last_segment(&loc).await.unwrap_err();
    assert!(matches!(err, MetabaseError::ObjectNotFound(_)), "{err:?}");
}

#[tokio::test]
async fn last_segment_orders_by_part_up_to_the_highest_part() {
    let db = setup().await;
    let stream = rand_object_stream();
    let loc = stream.location.clone();
    let adapter = db.adapter_for(loc.project_id);

    let mut segs = make_segments(stream.stream_id, 2);
    segs[0].position = SegmentPosition::new(1, 0);
    segs[1].position = SegmentPosition::new(SegmentPosition::MAX_PART, 0);
    let (_, stored) = insert(adapter, committed_object(stream.clone(), Retention::default(), 2), segs).await;

    let last = db.metabase.get_latest_object_last_segment(&loc).await.unwrap();
    assert_eq!(last.position, SegmentPosition::new(SegmentPosition::MAX_PART, 0));
    assert!(stored.contains(&last));

    // a part past the signed range would sort first, so it is never stored
    let mut beyond = make_segments(stream.stream_id, 1).remove(0);
    beyond.position = SegmentPosition::new(SegmentPosition::MAX_PART + 1, 0);
    let err = adapter
        .with_tx(move |tx| Box::pin(async move { tx.insert_segment(&beyond).await }))
        .await
        .unwrap_err();
    assert!(err.is_invalid_request(), "{err:?}");

    let last = db.metabase.get_latest_object_last_segment(&loc).await.unwrap();
    assert_eq!(last.position.part, SegmentPosition::MAX_PART);
}

#[tokio::test]
async fn segment_by_offset_finds_covering_segment() {
    let db = setup().await;
    let stream = rand_object_stream();
    let loc = stream.location.clone();
    let adapter = db.adapter_for(loc.project_id);
    let (_, segs) = create_object(adapter, stream, Retention::default(), 3).await;

    let size = i64::from(SEGMENT_PLAIN_SIZE);
    let cases = [
        (0, 0),
        (1, 0),
        (size - 1, 0),
        (size, 1),
        (2 * size - 1, 1),
        (2 * size, 2),
        (3 * size - 1, 2),
    ];
    for (offset, index) in cases {
        let got = db.metabase.get_segment_by_offset(&loc, offset).await.unwrap();
        assert_eq!(got, segs[index], "offset {offset}");
        assert!(got.contains_offset(offset));
    }

    let err = db.metabase.get_segment_by_offset(&loc, 3 * size).await.unwrap_err();
    assert!(err.is_not_found());

    let err = db.metabase.get_segment_by_offset(&loc, -1).await.unwrap_err();
    assert!(err.is_invalid_request());
}

#[tokio::test]
async fn segment_by_offset_uses_latest_committed_stream() {
    let db = setup().await;
    let stream = rand_object_stream();
    let loc = stream.location.clone();
    let adapter = db.adapter_for(loc.project_id);

    create_object(adapter, stream.clone(), Retention::default(), 1).await;
    let mut v2 = stream.clone();
    v2.version = 2;
    v2.stream_id = Uuid::new_v4();
    let (_, v2_segs) = create_object(adapter, v2, Retention::default(), 2).await;

    let got = db.metabase.get_segment_by_offset(&loc, 0).await.unwrap();
    assert_eq!(got, v2_segs[0]);
}

#[tokio::test]
async fn bucket_empty_counts_every_status() {
    let db = setup().await;
    let stream = rand_object_stream();
    let loc = stream.location.clone();
    let adapter = db.adapter_for(loc.project_id);

    assert!(db.metabase.bucket_empty(loc.project_id, &loc.bucket_name).await.unwrap());

    begin_object(adapter, stream.clone()).await;
    assert!(!db.metabase.bucket_empty(loc.project_id, &loc.bucket_name).await.unwrap());

    // other buckets and projects are unaffected
    assert!(db.metabase.bucket_empty(loc.project_id, "other-bucket").await.unwrap());
    assert!(db.metabase.bucket_empty(Uuid::new_v4(), &loc.bucket_name).await.unwrap());

    adapter.testing_delete_all().await.unwrap();
    let mut committed = stream.clone();
    committed.stream_id = Uuid::new_v4();
    create_object(adapter, committed, Retention::default(), 1).await;
    assert!(!db.metabase.bucket_empty(loc.project_id, &loc.bucket_name).await.unwrap());
}

#[tokio::test]
async fn bucket_empty_rejects_missing_identifiers() {
    let db = setup().await;

    let err = db.metabase.bucket_empty(Uuid::nil(), "bucket").await.unwrap_err();
    assert!(err.is_invalid_request());

    let err = db.metabase.bucket_empty(Uuid::new_v4(), "").await.unwrap_err();
    assert!(err.is_invalid_request());
}
