use crate::auth::{AuthClient, AuthContext, AuthError};
use crate::error_code::ErrorCode;
use crate::reactor::{Callback, LoopHandle};
use std::cell::RefCell;
use std::{collections::HashMap, path::PathBuf, rc::Rc, sync::Arc};
use tokio::sync::RwLock;

#[derive(Debug, Clone, PartialEq, Eq)]
struct Credential {
    secret_key: String,
    account_id: String,
    account_name: String,
}

/// File-backed credential table.
///
/// File format (one per line):
///   access_key:secret_key:account_id[:account_name]
/// Lines starting with '#' are comments. Blank lines are ignored.
///
/// Credentials are loaded on construction; `reload()` re-reads the file.
#[derive(Debug, Clone)]
pub struct FileCredentials {
    path: PathBuf,
    creds: Arc<RwLock<HashMap<String, Credential>>>,
}

impl FileCredentials {
    pub async fn load(path: impl Into<PathBuf>) -> Result<Self, AuthError> {
        let this = Self {
            path: path.into(),
            creds: Arc::new(RwLock::new(HashMap::new())),
        };
        this.reload().await?;
        Ok(this)
    }

    pub async fn reload(&self) -> Result<(), AuthError> {
        let raw = tokio::fs::read_to_string(&self.path)
            .await
            .map_err(|e| AuthError::Internal(format!("read {}: {e}", self.path.display())))?;

        let map = parse_credentials(&raw)?;
        let count = map.len();
        *self.creds.write().await = map;
        tracing::info!(path = %self.path.display(), count, "credentials loaded");
        Ok(())
    }

    pub async fn len(&self) -> usize {
        self.creds.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.creds.read().await.is_empty()
    }

    /// Client for one request signed with `access_key`/`secret_key`.
    pub fn client(
        &self,
        handle: LoopHandle,
        access_key: Option<String>,
        secret_key: Option<String>,
    ) -> FileAuthClient {
        FileAuthClient {
            creds: self.creds.clone(),
            handle,
            access_key,
            secret_key,
            error_code: Rc::new(RefCell::new(None)),
            context: Rc::new(RefCell::new(None)),
        }
    }
}

fn parse_credentials(raw: &str) -> Result<HashMap<String, Credential>, AuthError> {
    let mut map = HashMap::new();
    for (idx, line) in raw.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let fields: Vec<&str> = line.split(':').map(str::trim).collect();
        let (ak, sk, account_id, account_name) = match fields.as_slice() {
            [ak, sk, account] => (*ak, *sk, *account, *account),
            [ak, sk, account, name] => (*ak, *sk, *account, *name),
            _ => {
                return Err(AuthError::Internal(format!(
                    "invalid creds file format at line {} (expected access:secret:account)",
                    idx + 1
                )))
            }
        };
        map.insert(
            ak.to_string(),
            Credential {
                secret_key: sk.to_string(),
                account_id: account_id.to_string(),
                account_name: account_name.to_string(),
            },
        );
    }
    Ok(map)
}

/// Auth client checking one request against [`FileCredentials`].
///
/// Lookups never block the event loop: if the table is being reloaded the
/// call fails with ServiceUnavailable.
pub struct FileAuthClient {
    creds: Arc<RwLock<HashMap<String, Credential>>>,
    handle: LoopHandle,
    access_key: Option<String>,
    secret_key: Option<String>,
    error_code: Rc<RefCell<Option<ErrorCode>>>,
    context: Rc<RefCell<Option<AuthContext>>>,
}

impl FileAuthClient {
    fn authenticate_now(&self) -> Result<AuthContext, ErrorCode> {
        let (ak, sk) = match (&self.access_key, &self.secret_key) {
            (Some(ak), Some(sk)) => (ak, sk),
            _ => return Err(ErrorCode::AccessDenied),
        };
        let guard = self
            .creds
            .try_read()
            .map_err(|_| ErrorCode::ServiceUnavailable)?;
        match guard.get(ak) {
            None => Err(ErrorCode::InvalidAccessKeyId),
            Some(cred) if &cred.secret_key != sk => Err(ErrorCode::SignatureDoesNotMatch),
            Some(cred) => Ok(AuthContext {
                access_key: ak.clone(),
                account_id: cred.account_id.clone(),
                account_name: cred.account_name.clone(),
            }),
        }
    }

    fn deliver(&self, outcome: Result<Option<AuthContext>, ErrorCode>, on_success: Callback, on_failed: Callback) {
        let error_code = self.error_code.clone();
        let context = self.context.clone();
        self.handle.post(move || match outcome {
            Ok(established) => {
                if let Some(established) = established {
                    *context.borrow_mut() = Some(established);
                }
                on_success();
            }
            Err(code) => {
                tracing::debug!(code = %code, "auth check failed");
                *error_code.borrow_mut() = Some(code);
                on_failed();
            }
        });
    }
}

impl AuthClient for FileAuthClient {
    fn check_authentication(&self, on_success: Callback, on_failed: Callback) {
        let outcome = self.authenticate_now().map(Some);
        self.deliver(outcome, on_success, on_failed);
    }

    fn check_authorization(&self, resource_owner: &str, on_success: Callback, on_failed: Callback) {
        let owner_matches = self
            .context
            .borrow()
            .as_ref()
            .map(|ctx| ctx.account_id == resource_owner)
            .unwrap_or(false);
        let outcome = if owner_matches {
            Ok(None)
        } else {
            Err(ErrorCode::AccessDenied)
        };
        self.deliver(outcome, on_success, on_failed);
    }

    fn error_code(&self) -> ErrorCode {
        self.error_code
            .borrow()
            .clone()
            .unwrap_or(ErrorCode::InternalError)
    }

    fn is_chunk_auth_aborted(&self) -> bool {
        false
    }

    fn context(&self) -> Option<AuthContext> {
        self.context.borrow().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactor::EventLoop;
    use std::cell::Cell;
    use std::io::Write;

    fn creds_file(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    fn outcome() -> (Rc<Cell<Option<bool>>>, Callback, Callback) {
        let seen = Rc::new(Cell::new(None));
        let ok = seen.clone();
        let failed = seen.clone();
        (
            seen,
            Box::new(move || ok.set(Some(true))),
            Box::new(move || failed.set(Some(false))),
        )
    }

    #[test]
    fn test_parse_skips_comments_and_blank_lines() {
        let map = parse_credentials("# admin\n\nAK1:SK1:acct-1\nAK2 : SK2 : acct-2 : team\n").unwrap();
        assert_eq!(map.len(), 2);
        assert_eq!(map["AK1"].account_name, "acct-1");
        assert_eq!(map["AK2"].account_name, "team");
    }

    #[test]
    fn test_parse_rejects_malformed_line() {
        let err = parse_credentials("AK1:SK1:acct\nbroken\n").unwrap_err();
        assert!(err.to_string().contains("line 2"));
    }

    #[tokio::test]
    async fn test_authentication_codes() {
        let file = creds_file("AK1:SK1:acct-1\n");
        let creds = FileCredentials::load(file.path()).await.unwrap();
        assert_eq!(creds.len().await, 1);
        let mut event_loop = EventLoop::new();

        let good = creds.client(event_loop.handle(), Some("AK1".into()), Some("SK1".into()));
        let (seen, ok, failed) = outcome();
        good.check_authentication(ok, failed);
        event_loop.run_until_idle();
        assert_eq!(seen.get(), Some(true));
        assert_eq!(good.context().unwrap().account_id, "acct-1");

        let unknown = creds.client(event_loop.handle(), Some("AK9".into()), Some("SK1".into()));
        let (seen, ok, failed) = outcome();
        unknown.check_authentication(ok, failed);
        event_loop.run_until_idle();
        assert_eq!(seen.get(), Some(false));
        assert_eq!(unknown.error_code(), ErrorCode::InvalidAccessKeyId);

        let wrong = creds.client(event_loop.handle(), Some("AK1".into()), Some("nope".into()));
        let (seen, ok, failed) = outcome();
        wrong.check_authentication(ok, failed);
        event_loop.run_until_idle();
        assert_eq!(seen.get(), Some(false));
        assert_eq!(wrong.error_code(), ErrorCode::SignatureDoesNotMatch);
    }

    #[tokio::test]
    async fn test_authorization_checks_owner() {
        let file = creds_file("AK1:SK1:acct-1\n");
        let creds = FileCredentials::load(file.path()).await.unwrap();
        let mut event_loop = EventLoop::new();
        let client = creds.client(event_loop.handle(), Some("AK1".into()), Some("SK1".into()));

        let (_, ok, failed) = outcome();
        client.check_authentication(ok, failed);
        event_loop.run_until_idle();

        let (seen, ok, failed) = outcome();
        client.check_authorization("acct-2", ok, failed);
        event_loop.run_until_idle();
        assert_eq!(seen.get(), Some(false));
        assert_eq!(client.error_code(), ErrorCode::AccessDenied);

        let (seen, ok, failed) = outcome();
        client.check_authorization("acct-1", ok, failed);
        event_loop.run_until_idle();
        assert_eq!(seen.get(), Some(true));
    }

    #[tokio::test]
    async fn test_reload_picks_up_new_keys() {
        let mut file = creds_file("AK1:SK1:acct-1\n");
        let creds = FileCredentials::load(file.path()).await.unwrap();

        writeln!(file, "AK2:SK2:acct-2").unwrap();
        file.flush().unwrap();
        creds.reload().await.unwrap();
        assert_eq!(creds.len().await, 2);
    }

    #[tokio::test]
    async fn test_missing_file_is_an_error() {
        let err = FileCredentials::load("/nonexistent/creds.txt").await.unwrap_err();
        assert!(matches!(err, AuthError::Internal(_)));
    }
}
