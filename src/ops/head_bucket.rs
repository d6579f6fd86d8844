use super::{respond, with_capabilities, Inbound, OperationContext, S3BucketApi};
use crate::action::Action;
use std::rc::Rc;

/// HEAD bucket: [authenticate, load bucket, authorize, respond 200].
pub fn head_bucket(ctx: &OperationContext, inbound: &Inbound, bucket: &str) -> Action {
    let api = Rc::new(S3BucketApi::new(ctx, &inbound.request_id(), bucket));
    with_capabilities(ctx.builder("head_bucket", inbound), &api)
        .step(respond)
        .build()
}
