use super::{
    metadata_failure_code, record_state, respond, resume, resume_action, with_capabilities,
    Inbound, OperationContext, S3BucketApi,
};
use crate::action::Action;
use crate::error_code::ErrorCode;
use crate::metadata::{ObjectMetadata, Record, RecordState};
use bytes::Bytes;
use std::cell::RefCell;
use std::rc::Rc;

struct PutObject {
    api: Rc<S3BucketApi>,
    ctx: OperationContext,
    request_id: String,
    key: String,
    body: ObjectMetadata,
    object: RefCell<Option<Record<ObjectMetadata>>>,
}

impl PutObject {
    fn load_object(self: Rc<Self>, action: &Action) {
        let Some(index) = self.api.object_list_index() else {
            tracing::error!(
                request_id = %self.request_id,
                bucket = %self.api.bucket(),
                "bucket has no object list index"
            );
            return action.respond_error(ErrorCode::InternalError);
        };
        let record = ObjectMetadata::record(
            self.ctx.client(&self.request_id),
            &index,
            &self.key,
            &self.ctx.config.metadata,
            &self.request_id,
        );
        *self.object.borrow_mut() = Some(record.clone());

        let on_success = resume_action(action, |action| action.advance());
        let on_failed = {
            let record = record.downgrade();
            resume_action(action, move |action| match record_state(&record) {
                RecordState::Missing => action.advance(),
                state => action.respond_error(metadata_failure_code(state)),
            })
        };
        if let Err(e) = record.load(on_success, on_failed) {
            tracing::error!(request_id = %self.request_id, error = %e, "cannot load object metadata");
            action.respond_error(ErrorCode::InternalError);
        }
    }

    /// New key: save. Existing key: overwrite in place.
    fn save_object(self: Rc<Self>, action: &Action) {
        let Some(record) = self.object.borrow().clone() else {
            return action.respond_error(ErrorCode::InternalError);
        };
        let on_success = resume(&self, action, |op, action| {
            action.set_response_body(op.body.etag.clone());
            action.advance();
        });
        let on_failed = {
            let record = record.downgrade();
            resume_action(action, move |action| {
                action.respond_error(metadata_failure_code(record_state(&record)))
            })
        };

        let body = self.body.clone();
        let result = if record.state() == RecordState::Present {
            record.update(move |current| *current = body, on_success, on_failed)
        } else {
            record.save(body, on_success, on_failed)
        };
        if let Err(e) = result {
            tracing::error!(request_id = %self.request_id, error = %e, "cannot save object metadata");
            action.respond_error(ErrorCode::InternalError);
        }
    }
}

/// PUT object, metadata side: [authenticate, load bucket, authorize, load
/// object row, save or overwrite it, respond 200 with the ETag].
pub fn put_object_metadata(
    ctx: &OperationContext,
    inbound: &Inbound,
    bucket: &str,
    key: &str,
    data: Bytes,
    content_type: &str,
) -> Action {
    let request_id = inbound.request_id();
    let api = Rc::new(S3BucketApi::new(ctx, &request_id, bucket));
    let op = Rc::new(PutObject {
        api: api.clone(),
        ctx: ctx.clone(),
        request_id,
        key: key.to_string(),
        body: ObjectMetadata::new(bucket, key, &data, content_type),
        object: RefCell::new(None),
    });

    let (load, save) = (op.clone(), op);
    with_capabilities(ctx.builder("put_object", inbound), &api)
        .step(move |action: &Action| load.clone().load_object(action))
        .step(move |action: &Action| save.clone().save_object(action))
        .step(respond)
        .build()
}
