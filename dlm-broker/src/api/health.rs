/// Liveness probe; deliberately unauthenticated.
pub(crate) async fn get_health() -> &'static str {
    "ok"
}
