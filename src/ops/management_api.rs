use super::{requester, ProtocolCapabilities};
use crate::action::Action;
use crate::error_code::ErrorCode;
use std::rc::Rc;

/// Account management calls. The account named in the URI must be the
/// authenticated one; there is no per-resource authorization.
pub struct AccountManagementApi {
    account_id: String,
}

impl AccountManagementApi {
    pub fn new(account_id: &str) -> Self {
        Self {
            account_id: account_id.to_string(),
        }
    }

    pub fn account_id(&self) -> &str {
        &self.account_id
    }
}

impl ProtocolCapabilities for AccountManagementApi {
    fn api_name(&self) -> &'static str {
        "account_management"
    }

    fn load_metadata(self: Rc<Self>, action: &Action) {
        match requester(action) {
            Some((account_id, _)) if account_id == self.account_id => action.advance(),
            other => {
                tracing::warn!(
                    request_id = %action.request_id(),
                    uri_account = %self.account_id,
                    requester = ?other.map(|(id, _)| id),
                    "account in uri does not match requester"
                );
                action.respond_error(ErrorCode::InvalidAccountForMgmtApi);
            }
        }
    }

    fn authorize(self: Rc<Self>, action: &Action) {
        action.advance();
    }
}
