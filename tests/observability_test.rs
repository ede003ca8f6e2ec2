mod common;

#[cfg(test)]
mod tests {
    use super::common::*;
    use axum::{
        body::Body,
        http::{header, Request, StatusCode},
    };
    use serde_json::Value;
    use tower::util::ServiceExt;

    #[tokio::test]
    async fn test_liveness_endpoint() {
        let (_dir, db) = test_db().await;
        let app = relay_app("http://127.0.0.1:1", db);

        let response = app
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers().contains_key("x-exchange-id"));
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let body: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["status"], "ok");
    }

    #[tokio::test]
    async fn test_readiness_reports_upstream_counters() {
        let provider = spawn_provider(StatusCode::BAD_GATEWAY, vec![]).await;
        let (_dir, db) = test_db().await;
        let app = relay_app(&provider.base_url, db);

        let chat = app
            .clone()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/chat")
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from(
                        r#"{"messages":[{"role":"user","content":"hi"}]}"#,
                    ))
                    .unwrap(),
            )
            .await
            .unwrap();
        // Draining the body waits for the exchange task to finish.
        axum::body::to_bytes(chat.into_body(), usize::MAX)
            .await
            .unwrap();

        let response = app
            .oneshot(Request::builder().uri("/readyz").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let body: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["status"], "ready");
        assert_eq!(body["database"], "ok");
        assert_eq!(body["model"], "gemini-2.0-flash");
        assert_eq!(body["upstream"]["failed_exchanges"], 1);
        assert_eq!(body["upstream"]["consecutive_failures"], 1);
    }

    #[tokio::test]
    async fn test_exchange_ids_are_unique() {
        let (_dir, db) = test_db().await;
        let app = relay_app("http://127.0.0.1:1", db);

        let mut ids = Vec::new();
        for _ in 0..2 {
            let response = app
                .clone()
                .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
                .await
                .unwrap();
            ids.push(response.headers()["x-exchange-id"].clone());
        }
        assert_ne!(ids[0], ids[1]);
    }

    #[tokio::test]
    async fn test_cors_preflight_allowed() {
        let (_dir, db) = test_db().await;
        let app = relay_app("http://127.0.0.1:1", db);

        let response = app
            .oneshot(
                Request::builder()
                    .method("OPTIONS")
                    .uri("/api/chat")
                    .header(header::ORIGIN, "http://localhost:5173")
                    .header(header::ACCESS_CONTROL_REQUEST_METHOD, "POST")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert!(response.status().is_success());
        assert!(response
            .headers()
            .contains_key(header::ACCESS_CONTROL_ALLOW_ORIGIN));
    }
}
