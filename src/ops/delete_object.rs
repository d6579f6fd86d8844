use super::{
    metadata_failure_code, record_state, respond, resume_action, with_capabilities, Inbound,
    OperationContext, S3BucketApi,
};
use crate::action::Action;
use crate::error_code::ErrorCode;
use crate::metadata::{ObjectMetadata, Record, RecordState};
use std::cell::RefCell;
use std::rc::Rc;

struct DeleteObject {
    api: Rc<S3BucketApi>,
    ctx: OperationContext,
    request_id: String,
    key: String,
    object: RefCell<Option<Record<ObjectMetadata>>>,
}

impl DeleteObject {
    fn load_object(self: Rc<Self>, action: &Action) {
        let Some(index) = self.api.object_list_index() else {
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
                // deleting a key that is not there still succeeds
                RecordState::Missing => action.send_response(),
                state => action.respond_error(metadata_failure_code(state)),
            })
        };
        if let Err(e) = record.load(on_success, on_failed) {
            tracing::error!(request_id = %self.request_id, error = %e, "cannot load object metadata");
            action.respond_error(ErrorCode::InternalError);
        }
    }

    fn remove_object(self: Rc<Self>, action: &Action) {
        let Some(record) = self.object.borrow().clone() else {
            return action.respond_error(ErrorCode::InternalError);
        };
        let on_success = resume_action(action, |action| action.advance());
        let on_failed = {
            let record = record.downgrade();
            resume_action(action, move |action| {
                action.respond_error(metadata_failure_code(record_state(&record)))
            })
        };
        if let Err(e) = record.remove(on_success, on_failed) {
            tracing::error!(request_id = %self.request_id, error = %e, "cannot remove object metadata");
            action.respond_error(ErrorCode::InternalError);
        }
    }
}

/// DELETE object, metadata side: [authenticate, load bucket, authorize,
/// load object row, remove it, respond 204].
pub fn delete_object(ctx: &OperationContext, inbound: &Inbound, bucket: &str, key: &str) -> Action {
    let request_id = inbound.request_id();
    let api = Rc::new(S3BucketApi::new(ctx, &request_id, bucket));
    let op = Rc::new(DeleteObject {
        api: api.clone(),
        ctx: ctx.clone(),
        request_id,
        key: key.to_string(),
        object: RefCell::new(None),
    });

    let (load, remove) = (op.clone(), op);
    with_capabilities(ctx.builder("delete_object", inbound), &api)
        .success_status(204)
        .step(move |action: &Action| load.clone().load_object(action))
        .step(move |action: &Action| remove.clone().remove_object(action))
        .step(respond)
        .build()
}
