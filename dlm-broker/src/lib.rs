#[macro_use]
extern crate tracing;

use std::sync::Arc;

use queue_store::QueueDb;

pub mod api;
pub mod config;
pub mod extract;
pub mod http;
pub mod listener;
pub mod log;

/// Shared state handed to every request handler.
#[derive(Clone)]
pub struct BrokerState {
    pub conf: Arc<config::Conf>,
    pub db: Arc<QueueDb>,
}
