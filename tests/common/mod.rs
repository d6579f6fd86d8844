#![allow(dead_code)]

use s3gate::action::Action;
use s3gate::auth::{AuthClient, StaticAuthClient};
use s3gate::config::Config;
use s3gate::kvs::in_memory::InMemoryKvs;
use s3gate::ops::{Inbound, OperationContext};
use s3gate::shutdown::ShutdownSignal;
use s3gate::transport::recording::{RecordingRequest, Response};
use s3gate::EventLoop;
use std::cell::Cell;
use std::rc::Rc;

/// One event loop, one in-memory store, and a request factory.
pub struct Gateway {
    pub event_loop: EventLoop,
    pub kvs: InMemoryKvs,
    pub shutdown: ShutdownSignal,
    pub ctx: OperationContext,
    next_id: Cell<usize>,
}

/// The inbound half of a request plus handles to inspect it afterwards.
pub struct Client {
    pub request: Rc<RecordingRequest>,
    pub auth: Rc<StaticAuthClient>,
    pub inbound: Inbound,
}

impl Gateway {
    pub fn new() -> Self {
        Self::with_config(Config::default())
    }

    pub fn with_config(config: Config) -> Self {
        let event_loop = EventLoop::new();
        let kvs = InMemoryKvs::new(event_loop.handle());
        let shutdown = ShutdownSignal::default();
        let ctx = OperationContext::new(Rc::new(kvs.clone()), shutdown.clone(), config);
        Self {
            event_loop,
            kvs,
            shutdown,
            ctx,
            next_id: Cell::new(0),
        }
    }

    /// A request signed by `account`.
    pub fn client(&self, account: &str) -> Client {
        let id = self.next_id.get();
        self.next_id.set(id + 1);
        let request = Rc::new(RecordingRequest::new(format!("req-{}", id)).with_account(account));
        let auth = Rc::new(StaticAuthClient::allow(self.event_loop.handle(), account));
        let client: Rc<dyn AuthClient> = auth.clone();
        let inbound = Inbound::new(request.clone()).with_auth(client);
        Client {
            request,
            auth,
            inbound,
        }
    }

    /// Start `action` and drain the loop; returns the single response.
    pub fn run(&mut self, client: &Client, action: &Action) -> Response {
        action.start();
        self.event_loop.run_until_idle();
        assert_eq!(client.request.response_count(), 1, "expected exactly one response");
        client.request.last_response().unwrap()
    }
}
