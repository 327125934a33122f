pub mod health;
pub mod items;
pub mod queues;

use std::sync::Arc;

use axum::routing::{get, post};
use queue_store::{QueueDb, RepoError};

use crate::BrokerState;
use crate::http::HttpError;

pub fn make_router<S>(state: BrokerState) -> axum::Router<S> {
    axum::Router::new()
        .route("/health", get(health::get_health))
        .route("/queues", post(queues::create_queue).get(queues::list_queues))
        .route(
            "/queues/{queue}/items",
            post(items::enqueue_item).get(items::get_queue_items),
        )
        .route(
            "/queues/{queue}/finished",
            get(items::get_finished_items).delete(items::clear_history),
        )
        .route("/queues/{queue}/claim", post(items::claim_next_item))
        .route("/items/state", post(items::set_item_state))
        .route("/items/cancel", post(items::cancel_item))
        .with_state(state)
}

/// Repository transactions fsync on commit, so they run off the async
/// executor.
pub(crate) async fn run_repo<T, F>(state: &BrokerState, f: F) -> Result<T, HttpError>
where
    F: FnOnce(&QueueDb) -> Result<T, RepoError> + Send + 'static,
    T: Send + 'static,
{
    let db = Arc::clone(&state.db);

    tokio::task::spawn_blocking(move || f(&db))
        .await
        .map_err(HttpError::internal().err())?
        .map_err(HttpError::from_repo)
}
