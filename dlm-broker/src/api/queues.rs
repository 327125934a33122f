use axum::extract::State;
use axum::Json;
use queue_proto::{CreateQueueRequest, ListQueuesResponse, QueueInfo};

use crate::api::run_repo;
use crate::extract::QueueKey;
use crate::http::HttpError;
use crate::BrokerState;

pub(crate) async fn create_queue(
    State(state): State<BrokerState>,
    _key: QueueKey,
    Json(req): Json<CreateQueueRequest>,
) -> Result<Json<QueueInfo>, HttpError> {
    if req.name.is_empty() {
        return Err(HttpError::bad_request().msg("name must be provided and non-zero length"));
    }

    let meta = run_repo(&state, move |db| db.create_queue(&req.name)).await?;

    Ok(Json(QueueInfo {
        id: meta.id,
        name: meta.name,
    }))
}

pub(crate) async fn list_queues(
    State(state): State<BrokerState>,
    _key: QueueKey,
) -> Result<Json<ListQueuesResponse>, HttpError> {
    let queues = run_repo(&state, |db| db.list_queues()).await?;

    Ok(Json(ListQueuesResponse {
        queues: queues
            .into_iter()
            .map(|meta| QueueInfo {
                id: meta.id,
                name: meta.name,
            })
            .collect(),
    }))
}
