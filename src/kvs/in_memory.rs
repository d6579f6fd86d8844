use crate::kvs::{KvsClient, KvsClientFactory, KvsOp, KvsOpState, WELL_KNOWN_INDEXES};
use crate::observability::metrics;
use crate::reactor::{Callback, LoopHandle};
use std::cell::{Cell, RefCell};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::rc::Rc;

/// One backing-store call as seen by the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KvsCall {
    pub op: KvsOp,
    /// Index name, or `index/key` for row calls
    pub target: String,
}

#[derive(Debug, Default)]
struct Store {
    indexes: BTreeMap<String, BTreeMap<String, String>>,
    faults: HashMap<KvsOp, VecDeque<KvsOpState>>,
    calls: Vec<KvsCall>,
}

impl Store {
    fn take_fault(&mut self, op: KvsOp) -> Option<KvsOpState> {
        self.faults.get_mut(&op).and_then(|queue| queue.pop_front())
    }
}

struct Outcome {
    state: KvsOpState,
    value: Option<String>,
    keys: Vec<String>,
}

impl Outcome {
    fn bare(state: KvsOpState) -> Self {
        Self {
            state,
            value: None,
            keys: Vec::new(),
        }
    }
}

/// In-memory backing store.
///
/// Data structures:
/// - `indexes`: a BTreeMap of index name => (key => JSON value)
///
/// BTreeMap gives deterministic iteration order (useful for tests and
/// predictable listing). Every call executes inside a task posted to the
/// event loop, so its outcome is never observed before the call returns.
#[derive(Clone)]
pub struct InMemoryKvs {
    store: Rc<RefCell<Store>>,
    handle: LoopHandle,
}

impl InMemoryKvs {
    pub fn new(handle: LoopHandle) -> Self {
        let mut store = Store::default();
        for name in WELL_KNOWN_INDEXES {
            store.indexes.insert(name.to_string(), BTreeMap::new());
        }
        Self {
            store: Rc::new(RefCell::new(store)),
            handle,
        }
    }

    /// Force the next `times` calls of `op` to report `state` without
    /// touching the data.
    pub fn inject_fault(&self, op: KvsOp, state: KvsOpState, times: usize) {
        let mut store = self.store.borrow_mut();
        let queue = store.faults.entry(op).or_default();
        queue.extend(std::iter::repeat(state).take(times));
    }

    pub fn clear_faults(&self) {
        self.store.borrow_mut().faults.clear();
    }

    pub fn get(&self, index: &str, key: &str) -> Option<String> {
        self.store
            .borrow()
            .indexes
            .get(index)
            .and_then(|rows| rows.get(key).cloned())
    }

    /// Seed a row, creating the index if needed.
    pub fn insert(&self, index: &str, key: &str, value: impl Into<String>) {
        self.store
            .borrow_mut()
            .indexes
            .entry(index.to_string())
            .or_default()
            .insert(key.to_string(), value.into());
    }

    pub fn create_index_now(&self, name: &str) {
        self.store
            .borrow_mut()
            .indexes
            .entry(name.to_string())
            .or_default();
    }

    pub fn contains_index(&self, name: &str) -> bool {
        self.store.borrow().indexes.contains_key(name)
    }

    pub fn index_len(&self, name: &str) -> usize {
        self.store
            .borrow()
            .indexes
            .get(name)
            .map(|rows| rows.len())
            .unwrap_or(0)
    }

    pub fn calls(&self) -> Vec<KvsCall> {
        self.store.borrow().calls.clone()
    }

    pub fn call_count(&self, op: KvsOp) -> usize {
        self.store
            .borrow()
            .calls
            .iter()
            .filter(|call| call.op == op)
            .count()
    }

    pub fn client(&self, request_id: &str) -> Rc<InMemoryKvsClient> {
        Rc::new(InMemoryKvsClient {
            store: self.store.clone(),
            handle: self.handle.clone(),
            request_id: request_id.to_string(),
            state: Rc::new(Cell::new(KvsOpState::Start)),
            value: Rc::new(RefCell::new(None)),
            keys: Rc::new(RefCell::new(Vec::new())),
        })
    }
}

impl KvsClientFactory for InMemoryKvs {
    fn create_client(&self, request_id: &str) -> Rc<dyn KvsClient> {
        self.client(request_id)
    }
}

pub struct InMemoryKvsClient {
    store: Rc<RefCell<Store>>,
    handle: LoopHandle,
    request_id: String,
    state: Rc<Cell<KvsOpState>>,
    value: Rc<RefCell<Option<String>>>,
    keys: Rc<RefCell<Vec<String>>>,
}

impl InMemoryKvsClient {
    fn dispatch<F>(
        &self,
        op: KvsOp,
        target: String,
        exec: F,
        on_success: Callback,
        on_failed: Callback,
    ) where
        F: FnOnce(&mut Store) -> Outcome + 'static,
    {
        let store = self.store.clone();
        let state = self.state.clone();
        let value = self.value.clone();
        let keys = self.keys.clone();
        let request_id = self.request_id.clone();

        self.handle.post(move || {
            // store borrow ends before any continuation runs
            let outcome = {
                let mut store = store.borrow_mut();
                store.calls.push(KvsCall {
                    op,
                    target: target.clone(),
                });
                match store.take_fault(op) {
                    Some(forced) => Outcome::bare(forced),
                    None => exec(&mut store),
                }
            };

            metrics::record_kvs_op(op.as_str(), outcome.state.as_str());
            tracing::debug!(
                request_id = %request_id,
                operation = op.as_str(),
                target = %target,
                outcome = %outcome.state,
                "kvs call completed"
            );

            state.set(outcome.state);
            *value.borrow_mut() = outcome.value;
            *keys.borrow_mut() = outcome.keys;

            if outcome.state.is_success() {
                on_success();
            } else {
                on_failed();
            }
        });
    }
}

impl KvsClient for InMemoryKvsClient {
    fn get_keyval(&self, index: &str, key: &str, on_success: Callback, on_failed: Callback) {
        let (index, key) = (index.to_string(), key.to_string());
        self.dispatch(
            KvsOp::GetKeyval,
            format!("{}/{}", index, key),
            move |store| match store.indexes.get(&index).and_then(|rows| rows.get(&key)) {
                Some(found) => Outcome {
                    state: KvsOpState::Present,
                    value: Some(found.clone()),
                    keys: Vec::new(),
                },
                None => Outcome::bare(KvsOpState::Missing),
            },
            on_success,
            on_failed,
        );
    }

    fn put_keyval(
        &self,
        index: &str,
        key: &str,
        value: String,
        on_success: Callback,
        on_failed: Callback,
    ) {
        let (index, key) = (index.to_string(), key.to_string());
        self.dispatch(
            KvsOp::PutKeyval,
            format!("{}/{}", index, key),
            move |store| match store.indexes.get_mut(&index) {
                Some(rows) => {
                    rows.insert(key, value);
                    Outcome::bare(KvsOpState::Created)
                }
                // writing into an index that does not exist is a store error
                None => Outcome::bare(KvsOpState::Failed),
            },
            on_success,
            on_failed,
        );
    }

    fn delete_keyval(&self, index: &str, key: &str, on_success: Callback, on_failed: Callback) {
        let (index, key) = (index.to_string(), key.to_string());
        self.dispatch(
            KvsOp::DeleteKeyval,
            format!("{}/{}", index, key),
            move |store| match store.indexes.get_mut(&index).and_then(|rows| rows.remove(&key)) {
                Some(_) => Outcome::bare(KvsOpState::Deleted),
                None => Outcome::bare(KvsOpState::Missing),
            },
            on_success,
            on_failed,
        );
    }

    fn create_index(&self, name: &str, on_success: Callback, on_failed: Callback) {
        let name = name.to_string();
        self.dispatch(
            KvsOp::CreateIndex,
            name.clone(),
            move |store| {
                if store.indexes.contains_key(&name) {
                    Outcome::bare(KvsOpState::AlreadyExists)
                } else {
                    store.indexes.insert(name, BTreeMap::new());
                    Outcome::bare(KvsOpState::Created)
                }
            },
            on_success,
            on_failed,
        );
    }

    fn delete_index(&self, name: &str, on_success: Callback, on_failed: Callback) {
        let name = name.to_string();
        self.dispatch(
            KvsOp::DeleteIndex,
            name.clone(),
            move |store| match store.indexes.remove(&name) {
                Some(_) => Outcome::bare(KvsOpState::Deleted),
                None => Outcome::bare(KvsOpState::Missing),
            },
            on_success,
            on_failed,
        );
    }

    /// Keys starting with `prefix`, in order; `limit == 0` means no limit.
    fn list_keys(
        &self,
        index: &str,
        prefix: &str,
        limit: usize,
        on_success: Callback,
        on_failed: Callback,
    ) {
        let (index, prefix) = (index.to_string(), prefix.to_string());
        self.dispatch(
            KvsOp::ListKeys,
            index.clone(),
            move |store| match store.indexes.get(&index) {
                Some(rows) => {
                    let take = if limit == 0 { usize::MAX } else { limit };
                    let keys = rows
                        .keys()
                        .filter(|k| k.starts_with(&prefix))
                        .take(take)
                        .cloned()
                        .collect();
                    Outcome {
                        state: KvsOpState::Present,
                        value: None,
                        keys,
                    }
                }
                None => Outcome::bare(KvsOpState::Missing),
            },
            on_success,
            on_failed,
        );
    }

    fn state(&self) -> KvsOpState {
        self.state.get()
    }

    fn value(&self) -> Option<String> {
        self.value.borrow().clone()
    }

    fn keys(&self) -> Vec<String> {
        self.keys.borrow().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kvs::GLOBAL_BUCKET_LIST_INDEX;
    use crate::reactor::EventLoop;

    fn noop() -> Callback {
        Box::new(|| {})
    }

    fn record(log: &Rc<RefCell<Vec<&'static str>>>, tag: &'static str) -> Callback {
        let log = log.clone();
        Box::new(move || log.borrow_mut().push(tag))
    }

    #[test]
    fn test_well_known_indexes_exist() {
        let event_loop = EventLoop::new();
        let kvs = InMemoryKvs::new(event_loop.handle());
        for name in WELL_KNOWN_INDEXES {
            assert!(kvs.contains_index(name));
        }
    }

    #[test]
    fn test_callbacks_fire_only_from_the_loop() {
        let mut event_loop = EventLoop::new();
        let kvs = InMemoryKvs::new(event_loop.handle());
        let client = kvs.client("req-1");
        let log = Rc::new(RefCell::new(Vec::new()));

        client.put_keyval(
            GLOBAL_BUCKET_LIST_INDEX,
            "photos",
            "{}".to_string(),
            record(&log, "ok"),
            record(&log, "failed"),
        );
        assert!(log.borrow().is_empty());
        assert_eq!(client.state(), KvsOpState::Start);

        event_loop.run_until_idle();
        assert_eq!(*log.borrow(), vec!["ok"]);
        assert_eq!(client.state(), KvsOpState::Created);
        assert_eq!(kvs.get(GLOBAL_BUCKET_LIST_INDEX, "photos").as_deref(), Some("{}"));
    }

    #[test]
    fn test_get_missing_key_and_present_key() {
        let mut event_loop = EventLoop::new();
        let kvs = InMemoryKvs::new(event_loop.handle());
        kvs.insert(GLOBAL_BUCKET_LIST_INDEX, "a", "value-a");
        let client = kvs.client("req-2");
        let log = Rc::new(RefCell::new(Vec::new()));

        client.get_keyval(GLOBAL_BUCKET_LIST_INDEX, "b", record(&log, "ok"), record(&log, "failed"));
        event_loop.run_until_idle();
        assert_eq!(client.state(), KvsOpState::Missing);
        assert!(client.value().is_none());

        client.get_keyval(GLOBAL_BUCKET_LIST_INDEX, "a", record(&log, "ok"), record(&log, "failed"));
        event_loop.run_until_idle();
        assert_eq!(client.state(), KvsOpState::Present);
        assert_eq!(client.value().as_deref(), Some("value-a"));
        assert_eq!(*log.borrow(), vec!["failed", "ok"]);
    }

    #[test]
    fn test_create_index_reports_already_exists() {
        let mut event_loop = EventLoop::new();
        let kvs = InMemoryKvs::new(event_loop.handle());
        let client = kvs.client("req-3");

        client.create_index("BUCKET/x", noop(), noop());
        event_loop.run_until_idle();
        assert_eq!(client.state(), KvsOpState::Created);

        client.create_index("BUCKET/x", noop(), noop());
        event_loop.run_until_idle();
        assert_eq!(client.state(), KvsOpState::AlreadyExists);
        assert_eq!(kvs.call_count(KvsOp::CreateIndex), 2);
    }

    #[test]
    fn test_injected_faults_are_consumed_in_order() {
        let mut event_loop = EventLoop::new();
        let kvs = InMemoryKvs::new(event_loop.handle());
        kvs.inject_fault(KvsOp::PutKeyval, KvsOpState::FailedToLaunch, 1);
        let client = kvs.client("req-4");

        client.put_keyval(GLOBAL_BUCKET_LIST_INDEX, "k", "v".into(), noop(), noop());
        event_loop.run_until_idle();
        assert_eq!(client.state(), KvsOpState::FailedToLaunch);
        assert!(kvs.get(GLOBAL_BUCKET_LIST_INDEX, "k").is_none());

        client.put_keyval(GLOBAL_BUCKET_LIST_INDEX, "k", "v".into(), noop(), noop());
        event_loop.run_until_idle();
        assert_eq!(client.state(), KvsOpState::Created);
    }

    #[test]
    fn test_put_into_unknown_index_fails() {
        let mut event_loop = EventLoop::new();
        let kvs = InMemoryKvs::new(event_loop.handle());
        let client = kvs.client("req-5");

        client.put_keyval("no_such_index", "k", "v".into(), noop(), noop());
        event_loop.run_until_idle();
        assert_eq!(client.state(), KvsOpState::Failed);
    }

    #[test]
    fn test_list_keys_with_prefix_and_limit() {
        let mut event_loop = EventLoop::new();
        let kvs = InMemoryKvs::new(event_loop.handle());
        kvs.create_index_now("objects");
        for key in ["a/1", "a/2", "a/3", "b/1"] {
            kvs.insert("objects", key, "{}");
        }
        let client = kvs.client("req-6");

        client.list_keys("objects", "a/", 2, noop(), noop());
        event_loop.run_until_idle();
        assert_eq!(client.state(), KvsOpState::Present);
        assert_eq!(client.keys(), vec!["a/1".to_string(), "a/2".to_string()]);

        client.list_keys("objects", "", 0, noop(), noop());
        event_loop.run_until_idle();
        assert_eq!(client.keys().len(), 4);

        client.list_keys("gone", "", 0, noop(), noop());
        event_loop.run_until_idle();
        assert_eq!(client.state(), KvsOpState::Missing);
    }
}
