//! Ambient request id, propagated to upstream calls.
//!
//! The gateway scopes every inbound HTTP request with its request id; the
//! HTTP transport picks it up and forwards it as `X-Request-ID` so log
//! lines can be correlated across processes.

use std::future::Future;

tokio::task_local! {
    static REQUEST_ID: String;
}

/// Run `fut` with `id` as the ambient request id.
pub async fn with_request_id<F>(id: String, fut: F) -> F::Output
where
    F: Future,
{
    REQUEST_ID.scope(id, fut).await
}

/// The ambient request id, if the current task carries one.
pub fn current_request_id() -> Option<String> {
    REQUEST_ID.try_with(Clone::clone).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn scoped_id_is_visible_and_dropped() {
        assert_eq!(current_request_id(), None);
        with_request_id("req-1".to_string(), async {
            assert_eq!(current_request_id(), Some("req-1".to_string()));
        })
        .await;
        assert_eq!(current_request_id(), None);
    }
}
