use super::{
    kvs_failure_code, metadata_failure_code, record_state, respond, resume, resume_action,
    with_capabilities, Inbound, OperationContext, S3BucketApi,
};
use crate::action::Action;
use crate::error_code::ErrorCode;
use crate::kvs::{KvsClient, KvsOpState};
use crate::metadata::{MetadataError, Record, RecordBody};
use std::rc::Rc;

struct DeleteBucket {
    api: Rc<S3BucketApi>,
    kvs: Rc<dyn KvsClient>,
}

impl DeleteBucket {
    fn check_empty(self: Rc<Self>, action: &Action) {
        let Some(index) = self.api.object_list_index() else {
            return action.advance();
        };
        let on_success = resume(&self, action, |op, action| {
            if op.kvs.keys().is_empty() {
                action.advance();
            } else {
                action.respond_error(ErrorCode::BucketNotEmpty);
            }
        });
        let on_failed = resume(&self, action, |op, action| match op.kvs.state() {
            KvsOpState::Missing => action.advance(),
            state => action.respond_error(kvs_failure_code(state)),
        });
        self.kvs.list_keys(&index, "", 1, on_success, on_failed);
    }

    fn delete_object_index(self: Rc<Self>, action: &Action) {
        let Some(index) = self.api.object_list_index() else {
            return action.advance();
        };
        let on_success = resume_action(action, |action| action.advance());
        let on_failed = resume(&self, action, |op, action| match op.kvs.state() {
            KvsOpState::Missing => action.advance(),
            state => action.respond_error(kvs_failure_code(state)),
        });
        self.kvs.delete_index(&index, on_success, on_failed);
    }

    fn remove_bucket_metadata(self: Rc<Self>, action: &Action) {
        match self.api.bucket_metadata() {
            Some(record) => remove_record(&record, action),
            None => action.respond_error(ErrorCode::InternalError),
        }
    }

    fn remove_global(self: Rc<Self>, action: &Action) {
        remove_record(self.api.global(), action);
    }
}

fn remove_record<T: RecordBody>(record: &Record<T>, action: &Action) {
    let on_success = resume_action(action, |action| action.advance());
    let on_failed = {
        let record = record.downgrade();
        resume_action(action, move |action| {
            action.respond_error(metadata_failure_code(record_state(&record)))
        })
    };
    if let Err(e) = record.remove(on_success, on_failed) {
        report_invalid(action, e);
    }
}

fn report_invalid(action: &Action, e: MetadataError) {
    tracing::error!(request_id = %action.request_id(), error = %e, "cannot remove metadata");
    action.respond_error(ErrorCode::InternalError);
}

/// DELETE bucket: [authenticate, load bucket, authorize, check the bucket
/// is empty, drop its object list index, remove bucket metadata, remove
/// the global entry, respond 204].
pub fn delete_bucket(ctx: &OperationContext, inbound: &Inbound, bucket: &str) -> Action {
    let request_id = inbound.request_id();
    let api = Rc::new(S3BucketApi::new(ctx, &request_id, bucket));
    let op = Rc::new(DeleteBucket {
        api: api.clone(),
        kvs: ctx.client(&request_id),
    });

    let (check, drop_index, metadata, global) = (op.clone(), op.clone(), op.clone(), op);
    with_capabilities(ctx.builder("delete_bucket", inbound), &api)
        .success_status(204)
        .step(move |action: &Action| check.clone().check_empty(action))
        .step(move |action: &Action| drop_index.clone().delete_object_index(action))
        .step(move |action: &Action| metadata.clone().remove_bucket_metadata(action))
        .step(move |action: &Action| global.clone().remove_global(action))
        .step(respond)
        .build()
}
