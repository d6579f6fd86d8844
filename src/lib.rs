pub mod action;
pub mod auth;
pub mod config;
pub mod error_code;
pub mod kvs;
pub mod metadata;
pub mod observability;
pub mod ops;
pub mod reactor;
pub mod shutdown;
pub mod transport;

pub use action::{Action, ActionBuilder};
pub use auth::{AuthClient, AuthContext};
pub use error_code::ErrorCode;
pub use kvs::{KvsClient, KvsClientFactory};
pub use reactor::{EventLoop, LoopHandle};
