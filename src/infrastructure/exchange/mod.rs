pub mod client;
pub mod http;
pub mod request_manager;
pub mod stream;

pub use client::BingxClient;
pub use request_manager::{ExchangeRequest, ExchangeResponse, RequestManager};
pub use stream::{PushEvent, PushStreamManager};
