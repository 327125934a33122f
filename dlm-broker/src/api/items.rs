use axum::extract::{Path, Query, State};
use axum::Json;
use queue_proto::{
    CancelItemRequest, ClaimNextItemResponse, ClaimedItem, EnqueueItemRequest, EnqueueItemResponse, ItemPage,
    ItemState, ItemWithState, PageParams, SetItemStateRequest,
};
use queue_store::{FinishedItem, FinishedState, Item};
use time::OffsetDateTime;

use crate::api::run_repo;
use crate::extract::QueueKey;
use crate::http::HttpError;
use crate::BrokerState;

pub(crate) async fn enqueue_item(
    State(state): State<BrokerState>,
    _key: QueueKey,
    Path(queue): Path<String>,
    Json(req): Json<EnqueueItemRequest>,
) -> Result<Json<EnqueueItemResponse>, HttpError> {
    if req.source.is_empty() {
        return Err(HttpError::bad_request().msg("item source url must be provided and non-empty"));
    }
    if req.destination.is_empty() {
        return Err(HttpError::bad_request().msg("item destination url must be provided and non-empty"));
    }

    let id = run_repo(&state, move |db| {
        db.enqueue_item(&queue, &req.source, &req.destination, &req.category)
    })
    .await?;

    Ok(Json(EnqueueItemResponse { id }))
}

pub(crate) async fn claim_next_item(
    State(state): State<BrokerState>,
    _key: QueueKey,
    Path(queue): Path<String>,
) -> Result<Json<ClaimNextItemResponse>, HttpError> {
    let item = run_repo(&state, move |db| db.claim_next_item(&queue)).await?;

    Ok(Json(ClaimNextItemResponse {
        item: item.map(|item| ClaimedItem {
            id: item.id,
            source: item.source,
            destination: item.destination,
            category: item.category,
        }),
    }))
}

pub(crate) async fn set_item_state(
    State(state): State<BrokerState>,
    _key: QueueKey,
    Json(req): Json<SetItemStateRequest>,
) -> Result<(), HttpError> {
    if req.id.is_empty() {
        return Err(HttpError::bad_request().msg("item id must be provided and non-empty"));
    }

    match req.state {
        ItemState::Unspecified => Err(HttpError::bad_request().msg("state must be provided and not unspecified")),
        ItemState::Queued => Err(HttpError::bad_request().msg("an item cannot be moved back to queued")),
        ItemState::Downloading => {
            run_repo(&state, move |db| {
                db.set_progress(&req.id, req.downloaded_bytes, req.total_size_bytes)
            })
            .await
        }
        ItemState::Complete => {
            run_repo(&state, move |db| db.complete_item(&req.id, req.total_size_bytes)).await
        }
        ItemState::Failed => {
            run_repo(&state, move |db| {
                db.fail_item(&req.id, req.downloaded_bytes, req.total_size_bytes, &req.message)
            })
            .await
        }
    }
}

pub(crate) async fn cancel_item(
    State(state): State<BrokerState>,
    _key: QueueKey,
    Json(req): Json<CancelItemRequest>,
) -> Result<(), HttpError> {
    if req.id.is_empty() {
        return Err(HttpError::bad_request().msg("item id must be provided and non-empty"));
    }

    run_repo(&state, move |db| db.cancel_item(&req.id)).await
}

pub(crate) async fn get_queue_items(
    State(state): State<BrokerState>,
    _key: QueueKey,
    Path(queue): Path<String>,
    Query(page): Query<PageParams>,
) -> Result<Json<ItemPage>, HttpError> {
    let (items, next) = run_repo(&state, move |db| {
        db.get_queue_items(&queue, page.next.as_deref().unwrap_or(""), page.limit.unwrap_or(0))
    })
    .await?;

    let now = OffsetDateTime::now_utc().unix_timestamp();

    Ok(Json(ItemPage {
        items: items.into_iter().map(|item| active_item_to_wire(item, now)).collect(),
        next,
    }))
}

pub(crate) async fn get_finished_items(
    State(state): State<BrokerState>,
    _key: QueueKey,
    Path(queue): Path<String>,
    Query(page): Query<PageParams>,
) -> Result<Json<ItemPage>, HttpError> {
    let (items, next) = run_repo(&state, move |db| {
        db.get_finished_items(&queue, page.next.as_deref().unwrap_or(""), page.limit.unwrap_or(0))
    })
    .await?;

    Ok(Json(ItemPage {
        items: items.into_iter().map(finished_item_to_wire).collect(),
        next,
    }))
}

pub(crate) async fn clear_history(
    State(state): State<BrokerState>,
    _key: QueueKey,
    Path(queue): Path<String>,
) -> Result<(), HttpError> {
    run_repo(&state, move |db| db.clear_history(&queue)).await
}

fn active_item_to_wire(item: Item, now: i64) -> ItemWithState {
    // A lease in the future means some worker is on it right now.
    let state = if item.claim_expiry > now {
        ItemState::Downloading
    } else {
        ItemState::Queued
    };

    ItemWithState {
        id: item.id,
        source: item.source,
        destination: item.destination,
        category: item.category,
        state,
        downloaded_bytes: item.downloaded_bytes,
        total_size_bytes: item.total_size_bytes,
        message: String::new(),
        updated_at: now,
    }
}

fn finished_item_to_wire(record: FinishedItem) -> ItemWithState {
    // Cancellation is reported as failure; the distinction exists only in
    // storage.
    let state = match record.state {
        FinishedState::Success => ItemState::Complete,
        FinishedState::Failed | FinishedState::Cancelled => ItemState::Failed,
    };

    ItemWithState {
        id: record.item.id,
        source: record.item.source,
        destination: record.item.destination,
        category: record.item.category,
        state,
        downloaded_bytes: record.downloaded_bytes,
        total_size_bytes: record.total_size_bytes,
        message: record.message,
        updated_at: record.finished_at,
    }
}
