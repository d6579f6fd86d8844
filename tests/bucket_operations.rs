mod common;

use bytes::Bytes;
use common::Gateway;
use s3gate::action::RollbackState;
use s3gate::kvs::{
    KvsOp, KvsOpState, BUCKET_METADATA_LIST_INDEX, GLOBAL_BUCKET_LIST_INDEX,
    REPLICA_GLOBAL_BUCKET_LIST_INDEX,
};
use s3gate::metadata::BucketMetadata;
use s3gate::ops::{self, Inbound};
use s3gate::transport::recording::RecordingRequest;
use s3gate::ErrorCode;
use std::rc::Rc;

fn create(gw: &mut Gateway, account: &str, bucket: &str) -> u16 {
    let client = gw.client(account);
    let action = ops::create_bucket(&gw.ctx, &client.inbound, bucket, None);
    gw.run(&client, &action).status
}

fn stored_bucket(gw: &Gateway, account: &str, bucket: &str) -> Option<BucketMetadata> {
    gw.kvs
        .get(BUCKET_METADATA_LIST_INDEX, &BucketMetadata::key(account, bucket))
        .map(|raw| serde_json::from_str(&raw).unwrap())
}

#[test]
fn test_head_of_missing_bucket_stops_before_authorization() {
    let mut gw = Gateway::new();
    let client = gw.client("acct-1");
    let action = ops::head_bucket(&gw.ctx, &client.inbound, "nope");
    // authenticate, load, authorize, respond
    assert_eq!(action.number_of_tasks(), 4);

    let response = gw.run(&client, &action);
    assert_eq!(response.error_code, Some(ErrorCode::NoSuchBucket));
    assert_eq!(response.status, 404);
    assert_eq!(client.auth.authorization_calls(), 0);
    assert!(action.is_response_scheduled());
}

#[test]
fn test_create_bucket_writes_global_entry_and_metadata() {
    let mut gw = Gateway::new();
    assert_eq!(create(&mut gw, "acct-1", "photos"), 200);

    assert!(gw.kvs.get(GLOBAL_BUCKET_LIST_INDEX, "photos").is_some());
    assert!(gw.kvs.get(REPLICA_GLOBAL_BUCKET_LIST_INDEX, "photos").is_some());

    let bucket = stored_bucket(&gw, "acct-1", "photos").unwrap();
    assert_eq!(bucket.location_constraint, "us-west-2");
    assert_eq!(bucket.object_list_index.as_deref(), Some("BUCKET/photos"));
    assert!(bucket.object_list_index_oid.is_some());
    assert!(gw.kvs.contains_index("BUCKET/photos"));
}

#[test]
fn test_create_bucket_honors_location_constraint() {
    let mut gw = Gateway::new();
    let client = gw.client("acct-1");
    let action = ops::create_bucket(&gw.ctx, &client.inbound, "eu", Some("eu-central-1"));
    assert_eq!(gw.run(&client, &action).status, 200);
    let bucket = stored_bucket(&gw, "acct-1", "eu").unwrap();
    assert_eq!(bucket.location_constraint, "eu-central-1");
}

#[test]
fn test_bucket_names_are_global() {
    let mut gw = Gateway::new();
    assert_eq!(create(&mut gw, "acct-1", "photos"), 200);

    let client = gw.client("acct-2");
    let action = ops::create_bucket(&gw.ctx, &client.inbound, "photos", None);
    let response = gw.run(&client, &action);
    assert_eq!(response.error_code, Some(ErrorCode::BucketAlreadyExists));
    assert_eq!(response.status, 409);
    assert!(stored_bucket(&gw, "acct-2", "photos").is_none());
}

#[test]
fn test_create_bucket_salts_a_taken_index_name() {
    let mut gw = Gateway::new();
    gw.kvs.create_index_now("BUCKET/photos");
    assert_eq!(create(&mut gw, "acct-1", "photos"), 200);

    let bucket = stored_bucket(&gw, "acct-1", "photos").unwrap();
    assert_eq!(
        bucket.object_list_index.as_deref(),
        Some("BUCKET/photosindex_salt_1")
    );
}

#[test]
fn test_failed_bucket_metadata_rolls_back_global_entry() {
    let mut gw = Gateway::new();
    gw.kvs.inject_fault(KvsOp::CreateIndex, KvsOpState::Failed, 1);

    let client = gw.client("acct-1");
    let action = ops::create_bucket(&gw.ctx, &client.inbound, "photos", None);
    let response = gw.run(&client, &action);

    assert_eq!(response.error_code, Some(ErrorCode::InternalError));
    assert_eq!(action.rollback_state(), RollbackState::Complete);
    assert!(gw.kvs.get(GLOBAL_BUCKET_LIST_INDEX, "photos").is_none());
    assert!(gw.kvs.get(REPLICA_GLOBAL_BUCKET_LIST_INDEX, "photos").is_none());

    // the name is free again
    assert_eq!(create(&mut gw, "acct-1", "photos"), 200);
}

#[test]
fn test_failed_global_entry_needs_no_rollback() {
    let mut gw = Gateway::new();
    gw.kvs.inject_fault(KvsOp::PutKeyval, KvsOpState::FailedToLaunch, 1);

    let client = gw.client("acct-1");
    let action = ops::create_bucket(&gw.ctx, &client.inbound, "photos", None);
    let response = gw.run(&client, &action);

    assert_eq!(response.error_code, Some(ErrorCode::ServiceUnavailable));
    assert_eq!(response.retry_after, Some(1));
    assert_eq!(action.rollback_state(), RollbackState::Start);
    assert_eq!(gw.kvs.call_count(KvsOp::CreateIndex), 0);
}

#[test]
fn test_create_bucket_requires_a_requester() {
    let mut gw = Gateway::new();
    let request = Rc::new(RecordingRequest::new("req-anon"));
    let inbound = Inbound::new(request.clone());
    let action = ops::create_bucket(&gw.ctx, &inbound, "photos", None);
    action.start();
    gw.event_loop.run_until_idle();

    let response = request.last_response().unwrap();
    assert_eq!(response.error_code, Some(ErrorCode::AccessDenied));
    assert!(gw.kvs.get(GLOBAL_BUCKET_LIST_INDEX, "photos").is_none());
}

#[test]
fn test_head_bucket_checks_owner() {
    let mut gw = Gateway::new();
    assert_eq!(create(&mut gw, "acct-1", "photos"), 200);

    let owner = gw.client("acct-1");
    let action = ops::head_bucket(&gw.ctx, &owner.inbound, "photos");
    assert_eq!(gw.run(&owner, &action).status, 200);
    assert_eq!(owner.auth.authorization_calls(), 1);

    let stranger = gw.client("acct-2");
    let action = ops::head_bucket(&gw.ctx, &stranger.inbound, "photos");
    let response = gw.run(&stranger, &action);
    assert_eq!(response.error_code, Some(ErrorCode::AccessDenied));
}

#[test]
fn test_corrupted_bucket_metadata_is_an_internal_error() {
    let mut gw = Gateway::new();
    assert_eq!(create(&mut gw, "acct-1", "photos"), 200);
    gw.kvs.insert(
        BUCKET_METADATA_LIST_INDEX,
        &BucketMetadata::key("acct-1", "photos"),
        "{\"bucket_name\":",
    );

    let client = gw.client("acct-1");
    let action = ops::head_bucket(&gw.ctx, &client.inbound, "photos");
    let response = gw.run(&client, &action);
    assert_eq!(response.error_code, Some(ErrorCode::InternalError));
    assert_eq!(client.auth.authorization_calls(), 0);
}

#[test]
fn test_put_object_then_overwrite() {
    let mut gw = Gateway::new();
    assert_eq!(create(&mut gw, "acct-1", "photos"), 200);

    let client = gw.client("acct-1");
    let action = ops::put_object_metadata(
        &gw.ctx,
        &client.inbound,
        "photos",
        "a.txt",
        Bytes::from_static(b"hello"),
        "text/plain",
    );
    let response = gw.run(&client, &action);
    assert_eq!(response.status, 200);
    assert_eq!(
        response.body.as_deref(),
        Some("\"5d41402abc4b2a76b9719d911017c592\"")
    );
    assert_eq!(gw.kvs.index_len("BUCKET/photos"), 1);

    let client = gw.client("acct-1");
    let action = ops::put_object_metadata(
        &gw.ctx,
        &client.inbound,
        "photos",
        "a.txt",
        Bytes::from_static(b"hello world"),
        "text/plain",
    );
    assert_eq!(gw.run(&client, &action).status, 200);
    assert_eq!(gw.kvs.index_len("BUCKET/photos"), 1);
    let row = gw.kvs.get("BUCKET/photos", "a.txt").unwrap();
    assert!(row.contains("\"size\":11"));
}

#[test]
fn test_put_object_into_missing_bucket() {
    let mut gw = Gateway::new();
    let client = gw.client("acct-1");
    let action = ops::put_object_metadata(
        &gw.ctx,
        &client.inbound,
        "nope",
        "a.txt",
        Bytes::from_static(b"x"),
        "text/plain",
    );
    let response = gw.run(&client, &action);
    assert_eq!(response.error_code, Some(ErrorCode::NoSuchBucket));
}

#[test]
fn test_delete_object_is_idempotent() {
    let mut gw = Gateway::new();
    assert_eq!(create(&mut gw, "acct-1", "photos"), 200);

    let client = gw.client("acct-1");
    let action = ops::delete_object(&gw.ctx, &client.inbound, "photos", "never-written");
    assert_eq!(gw.run(&client, &action).status, 204);
    assert_eq!(gw.kvs.call_count(KvsOp::DeleteKeyval), 0);
}

#[test]
fn test_delete_bucket_requires_it_to_be_empty() {
    let mut gw = Gateway::new();
    assert_eq!(create(&mut gw, "acct-1", "photos"), 200);

    let client = gw.client("acct-1");
    let action = ops::put_object_metadata(
        &gw.ctx,
        &client.inbound,
        "photos",
        "a.txt",
        Bytes::from_static(b"hello"),
        "text/plain",
    );
    gw.run(&client, &action);

    let client = gw.client("acct-1");
    let action = ops::delete_bucket(&gw.ctx, &client.inbound, "photos");
    let response = gw.run(&client, &action);
    assert_eq!(response.error_code, Some(ErrorCode::BucketNotEmpty));
    assert!(gw.kvs.get(GLOBAL_BUCKET_LIST_INDEX, "photos").is_some());

    let client = gw.client("acct-1");
    let action = ops::delete_object(&gw.ctx, &client.inbound, "photos", "a.txt");
    assert_eq!(gw.run(&client, &action).status, 204);
    assert_eq!(gw.kvs.index_len("BUCKET/photos"), 0);

    let client = gw.client("acct-1");
    let action = ops::delete_bucket(&gw.ctx, &client.inbound, "photos");
    assert_eq!(gw.run(&client, &action).status, 204);
    assert!(gw.kvs.get(GLOBAL_BUCKET_LIST_INDEX, "photos").is_none());
    assert!(stored_bucket(&gw, "acct-1", "photos").is_none());
    assert!(!gw.kvs.contains_index("BUCKET/photos"));
}

#[test]
fn test_delete_bucket_by_stranger_is_denied() {
    let mut gw = Gateway::new();
    assert_eq!(create(&mut gw, "acct-1", "photos"), 200);

    let client = gw.client("acct-2");
    let action = ops::delete_bucket(&gw.ctx, &client.inbound, "photos");
    let response = gw.run(&client, &action);
    assert_eq!(response.error_code, Some(ErrorCode::AccessDenied));
    assert!(gw.kvs.contains_index("BUCKET/photos"));
}

#[test]
fn test_shutdown_rejects_new_operations() {
    let mut gw = Gateway::new();
    gw.shutdown.initiate();

    let client = gw.client("acct-1");
    let action = ops::create_bucket(&gw.ctx, &client.inbound, "photos", None);
    let response = gw.run(&client, &action);
    assert_eq!(response.error_code, Some(ErrorCode::ServiceUnavailable));
    assert_eq!(client.auth.authentication_calls(), 0);
    assert!(gw.kvs.calls().is_empty());
}

#[test]
fn test_request_dropped_mid_call_is_freed() {
    let mut gw = Gateway::new();
    let request = Rc::new(RecordingRequest::new("req-dropped"));
    let inbound = Inbound::new(request.clone());
    let action = ops::head_bucket(&gw.ctx, &inbound, "photos");
    action.start();
    // the bucket entry lookup is queued and its record holds the continuations
    assert!(gw.kvs.calls().is_empty());

    let weak = action.downgrade();
    drop(action);
    assert!(weak.upgrade().is_none());

    // the lookup still runs but finds nobody to resume
    gw.event_loop.run_until_idle();
    assert_eq!(gw.kvs.call_count(KvsOp::GetKeyval), 1);
    assert_eq!(request.response_count(), 0);
}
