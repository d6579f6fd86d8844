use super::{
    metadata_failure_code, respond, resume, resume_action, with_capabilities,
    AccountManagementApi, Inbound, OperationContext,
};
use crate::action::Action;
use crate::error_code::ErrorCode;
use crate::metadata::{AccountUserIndex, Record, RecordState};
use std::rc::Rc;

struct RegisterAccount {
    account_id: String,
    request_id: String,
    record: Record<AccountUserIndex>,
}

impl RegisterAccount {
    fn load_account(self: Rc<Self>, action: &Action) {
        let on_success = resume(&self, action, |op, action| {
            if op.record.body().is_some_and(|body| body.has_index()) {
                tracing::info!(
                    request_id = %op.request_id,
                    account_id = %op.account_id,
                    "account already registered"
                );
                // nothing left to write
                action.send_response();
            } else {
                action.advance();
            }
        });
        let on_failed = resume(&self, action, |op, action| match op.record.state() {
            RecordState::Missing => action.advance(),
            state => action.respond_error(metadata_failure_code(state)),
        });
        if let Err(e) = self.record.load(on_success, on_failed) {
            tracing::error!(request_id = %self.request_id, error = %e, "cannot load account");
            action.respond_error(ErrorCode::InternalError);
        }
    }

    /// Creates the bucket list index and writes the account row.
    fn save_account(self: Rc<Self>, action: &Action) {
        let on_success = resume_action(action, |action| action.advance());
        let on_failed = resume(&self, action, |op, action| {
            action.respond_error(metadata_failure_code(op.record.state()))
        });
        let body = AccountUserIndex::new(&self.account_id);
        if let Err(e) = self.record.save(body, on_success, on_failed) {
            tracing::error!(request_id = %self.request_id, error = %e, "cannot save account");
            action.respond_error(ErrorCode::InternalError);
        }
    }
}

/// Account registration through the management API: [authenticate, match
/// URI account, load account row, create bucket list index and save,
/// respond 201]. Registering twice is not an error.
pub fn register_account(ctx: &OperationContext, inbound: &Inbound, account_id: &str) -> Action {
    let request_id = inbound.request_id();
    let api = Rc::new(AccountManagementApi::new(account_id));
    let op = Rc::new(RegisterAccount {
        record: AccountUserIndex::record(
            ctx.client(&request_id),
            account_id,
            &ctx.config.metadata,
            &request_id,
        ),
        account_id: account_id.to_string(),
        request_id,
    });

    let (load, save) = (op.clone(), op);
    with_capabilities(ctx.builder("register_account", inbound), &api)
        .success_status(201)
        .step(move |action: &Action| load.clone().load_account(action))
        .step(move |action: &Action| save.clone().save_account(action))
        .step(respond)
        .build()
}
