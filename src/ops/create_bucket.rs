use super::{
    metadata_failure_code, record_state, requester, resume, resume_action, respond, Inbound,
    OperationContext,
};
use crate::action::Action;
use crate::config::MetadataConfig;
use crate::error_code::ErrorCode;
use crate::kvs::KvsClientFactory;
use crate::metadata::{BucketMetadata, GlobalBucketEntry, Record, RecordState};
use std::cell::{Cell, RefCell};
use std::rc::Rc;

struct CreateBucket {
    kvs: Rc<dyn KvsClientFactory>,
    config: MetadataConfig,
    request_id: String,
    bucket: String,
    location_constraint: String,
    global: Record<GlobalBucketEntry>,
    bucket_metadata: RefCell<Option<Record<BucketMetadata>>>,
    owner: RefCell<Option<(String, String)>>,
    global_saved: Cell<bool>,
}

impl CreateBucket {
    fn load_global(self: Rc<Self>, action: &Action) {
        match requester(action) {
            Some(owner) => *self.owner.borrow_mut() = Some(owner),
            None => return action.respond_error(ErrorCode::AccessDenied),
        }

        let on_success =
            resume_action(action, |action| action.respond_error(ErrorCode::BucketAlreadyExists));
        let on_failed = resume(&self, action, |op, action| match op.global.state() {
            RecordState::Missing => action.advance(),
            state => action.respond_error(metadata_failure_code(state)),
        });
        if let Err(e) = self.global.load(on_success, on_failed) {
            tracing::error!(request_id = %self.request_id, error = %e, "cannot load bucket entry");
            action.respond_error(ErrorCode::InternalError);
        }
    }

    fn save_global(self: Rc<Self>, action: &Action) {
        let Some((account_id, account_name)) = self.owner.borrow().clone() else {
            return action.respond_error(ErrorCode::InternalError);
        };
        let entry = GlobalBucketEntry::new(&account_id, &account_name, &self.location_constraint);

        let on_success = resume(&self, action, |op, action| {
            op.global_saved.set(true);
            action.advance();
        });
        let on_failed = resume(&self, action, |op, action| {
            action.respond_error(metadata_failure_code(op.global.state()))
        });
        if let Err(e) = self.global.save(entry, on_success, on_failed) {
            tracing::error!(request_id = %self.request_id, error = %e, "cannot save bucket entry");
            action.respond_error(ErrorCode::InternalError);
        }
    }

    fn save_bucket_metadata(self: Rc<Self>, action: &Action) {
        let Some((account_id, account_name)) = self.owner.borrow().clone() else {
            return action.fail_with(ErrorCode::InternalError);
        };
        let record = BucketMetadata::record(
            self.kvs.create_client(&self.request_id),
            &account_id,
            &self.bucket,
            &self.config,
            &self.request_id,
        );
        let body = BucketMetadata::new(
            &self.bucket,
            &account_id,
            &account_name,
            &self.location_constraint,
        );

        *self.bucket_metadata.borrow_mut() = Some(record.clone());

        let on_success = resume_action(action, |action| action.advance());
        let on_failed = {
            let record = record.downgrade();
            // the global entry is already written: roll it back
            resume_action(action, move |action| {
                action.fail_with(metadata_failure_code(record_state(&record)))
            })
        };
        if let Err(e) = record.save(body, on_success, on_failed) {
            tracing::error!(request_id = %self.request_id, error = %e, "cannot save bucket metadata");
            action.fail_with(ErrorCode::InternalError);
        }
    }

    /// Rollback: drop the global entry if this request wrote it.
    fn remove_global(self: Rc<Self>, action: &Action) {
        if !self.global_saved.get() {
            return action.rollback_next();
        }
        let on_success = resume_action(action, |action| action.rollback_next());
        let on_failed = resume(&self, action, |op, action| {
            tracing::warn!(
                request_id = %op.request_id,
                bucket = %op.bucket,
                "could not roll back bucket entry"
            );
            action.rollback_next()
        });
        if let Err(e) = self.global.remove(on_success, on_failed) {
            tracing::warn!(request_id = %self.request_id, error = %e, "cannot roll back bucket entry");
            action.rollback_next();
        }
    }
}

/// PUT bucket: [authenticate, load global entry, save global entry, save
/// bucket metadata with its object list index, respond 200]. Rollback
/// removes the global entry when bucket metadata could not be written.
pub fn create_bucket(
    ctx: &OperationContext,
    inbound: &Inbound,
    bucket: &str,
    location_constraint: Option<&str>,
) -> Action {
    let request_id = inbound.request_id();
    let config = ctx.config.metadata.clone();
    let op = Rc::new(CreateBucket {
        global: GlobalBucketEntry::record(ctx.client(&request_id), bucket, &config, &request_id),
        kvs: ctx.kvs.clone(),
        location_constraint: location_constraint
            .unwrap_or(&config.default_location_constraint)
            .to_string(),
        config,
        request_id,
        bucket: bucket.to_string(),
        bucket_metadata: RefCell::new(None),
        owner: RefCell::new(None),
        global_saved: Cell::new(false),
    });

    let (load, save, metadata, undo) = (op.clone(), op.clone(), op.clone(), op);
    ctx.builder("create_bucket", inbound)
        .step(move |action: &Action| load.clone().load_global(action))
        .step(move |action: &Action| save.clone().save_global(action))
        .step(move |action: &Action| metadata.clone().save_bucket_metadata(action))
        .step(respond)
        .rollback_step(move |action: &Action| undo.clone().remove_global(action))
        .build()
}
