use super::{
    metadata_failure_code, record_state, resume, resume_action, OperationContext,
    ProtocolCapabilities,
};
use crate::action::Action;
use crate::config::MetadataConfig;
use crate::error_code::ErrorCode;
use crate::kvs::KvsClientFactory;
use crate::metadata::{BucketMetadata, GlobalBucketEntry, Record, RecordState};
use std::cell::RefCell;
use std::rc::Rc;

/// Bucket-scoped S3 calls: metadata is the bucket, authorization is
/// against the bucket owner.
pub struct S3BucketApi {
    kvs: Rc<dyn KvsClientFactory>,
    config: MetadataConfig,
    request_id: String,
    bucket: String,
    global: Record<GlobalBucketEntry>,
    bucket_metadata: RefCell<Option<Record<BucketMetadata>>>,
}

impl S3BucketApi {
    pub fn new(ctx: &OperationContext, request_id: &str, bucket: &str) -> Self {
        let config = ctx.config.metadata.clone();
        Self {
            global: GlobalBucketEntry::record(ctx.client(request_id), bucket, &config, request_id),
            kvs: ctx.kvs.clone(),
            config,
            request_id: request_id.to_string(),
            bucket: bucket.to_string(),
            bucket_metadata: RefCell::new(None),
        }
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    pub fn global(&self) -> &Record<GlobalBucketEntry> {
        &self.global
    }

    pub fn bucket_metadata(&self) -> Option<Record<BucketMetadata>> {
        self.bucket_metadata.borrow().clone()
    }

    /// Loaded bucket metadata body
    pub fn bucket_body(&self) -> Option<BucketMetadata> {
        self.bucket_metadata().and_then(|record| record.body())
    }

    pub fn owner(&self) -> Option<String> {
        self.global.body().map(|entry| entry.account_id)
    }

    pub fn object_list_index(&self) -> Option<String> {
        self.bucket_body().and_then(|body| body.object_list_index)
    }

    fn load_failed(&self, action: &Action, state: RecordState) {
        let code = match state {
            RecordState::Missing => ErrorCode::NoSuchBucket,
            other => metadata_failure_code(other),
        };
        action.respond_error(code);
    }

    fn global_loaded(self: Rc<Self>, action: &Action) {
        let owner = match self.owner() {
            Some(owner) => owner,
            None => return action.respond_error(ErrorCode::InternalError),
        };
        let record = BucketMetadata::record(
            self.kvs.create_client(&self.request_id),
            &owner,
            &self.bucket,
            &self.config,
            &self.request_id,
        );
        *self.bucket_metadata.borrow_mut() = Some(record.clone());

        let on_success = resume_action(action, |action| action.advance());
        let on_failed = {
            let record = record.downgrade();
            resume(&self, action, move |api, action| {
                api.load_failed(action, record_state(&record))
            })
        };
        if let Err(e) = record.load(on_success, on_failed) {
            tracing::error!(request_id = %self.request_id, error = %e, "cannot load bucket metadata");
            action.respond_error(ErrorCode::InternalError);
        }
    }
}

impl ProtocolCapabilities for S3BucketApi {
    fn api_name(&self) -> &'static str {
        "s3_bucket"
    }

    fn load_metadata(self: Rc<Self>, action: &Action) {
        let on_success = resume(&self, action, |api, action| api.global_loaded(action));
        let on_failed = resume(&self, action, |api, action| {
            let state = api.global.state();
            api.load_failed(action, state)
        });
        if let Err(e) = self.global.load(on_success, on_failed) {
            tracing::error!(request_id = %self.request_id, error = %e, "cannot load bucket entry");
            action.respond_error(ErrorCode::InternalError);
        }
    }

    fn authorize(self: Rc<Self>, action: &Action) {
        match self.owner() {
            Some(owner) => action.authorize(&owner),
            None => action.respond_error(ErrorCode::InternalError),
        }
    }
}
