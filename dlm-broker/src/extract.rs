use axum::extract::FromRequestParts;
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;

use crate::BrokerState;
use crate::http::HttpError;

/// Proof that the request carried the broker's shared secret.
///
/// The `authorization` header must be present exactly once and match the
/// configured key byte-for-byte; anything else is rejected before the
/// handler runs.
#[derive(Clone, Copy)]
pub struct QueueKey;

impl FromRequestParts<BrokerState> for QueueKey {
    type Rejection = HttpError;

    async fn from_request_parts(parts: &mut Parts, state: &BrokerState) -> Result<Self, Self::Rejection> {
        let mut values = parts.headers.get_all(AUTHORIZATION).iter();

        match (values.next(), values.next()) {
            (Some(value), None) if value.as_bytes() == state.conf.key.as_bytes() => Ok(QueueKey),
            (Some(_), Some(_)) => {
                warn!("authorization failed: more than one authorization value");
                Err(unauthenticated())
            }
            (Some(_), None) => {
                warn!("authorization failed: incorrect key");
                Err(unauthenticated())
            }
            (None, _) => {
                warn!("authorization failed: no authorization value");
                Err(unauthenticated())
            }
        }
    }
}

#[track_caller]
fn unauthenticated() -> HttpError {
    HttpError::unauthorized().msg("Unauthenticated")
}
