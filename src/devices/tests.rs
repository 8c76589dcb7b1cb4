//! Tests for devices module

#[cfg(test)]
mod tests {
    use super::super::*;
    use crate::devices::models::Platform;
    use crate::common::migrations::test_support::{insert_user, setup_test_db};
    use crate::common::state::test_support::*;
    use axum::{
        body::Body,
        http::{Method, Request, StatusCode},
    };
    use http_body_util::BodyExt;
    use serde_json::{json, Value};
    use tower::ServiceExt;

    async fn call(
        app: axum::Router,
        method: Method,
        uri: &str,
        auth: String,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let request = Request::builder()
            .method(method)
            .uri(uri)
            .header("authorization", auth)
            .header("content-type", "application/json");
        let request = match body {
            Some(b) => request.body(Body::from(b.to_string())).unwrap(),
            None => request.body(Body::empty()).unwrap(),
        };
        let response = app.oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        (status, serde_json::from_slice(&bytes).unwrap_or(Value::Null))
    }

    #[tokio::test]
    async fn test_register_same_token_twice_reassigns_owner() {
        let pool = setup_test_db().await;
        insert_user(&pool, "u1").await;
        insert_user(&pool, "u2").await;
        let repo = DeviceTokenRepository::new(pool.clone());

        let first = repo
            .register_or_update("u1", "tokA", Platform::Ios)
            .await
            .unwrap();
        let second = repo
            .register_or_update("u2", "tokA", Platform::Android)
            .await
            .unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(second.user_id, "u2");
        assert_eq!(second.platform, "android");

        let count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM device_tokens WHERE token = 'tokA'")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(count.0, 1);
        assert!(repo
            .list_for_users(&["u1".to_string()])
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_list_for_users_returns_every_endpoint_once() {
        let pool = setup_test_db().await;
        for id in ["u1", "u2", "u3"] {
            insert_user(&pool, id).await;
        }
        let repo = DeviceTokenRepository::new(pool.clone());
        repo.register_or_update("u1", "tokA", Platform::Ios).await.unwrap();
        repo.register_or_update("u1", "tokB", Platform::Android).await.unwrap();
        repo.register_or_update("u2", "tokC", Platform::Ios).await.unwrap();
        repo.register_or_update("u3", "tokD", Platform::Ios).await.unwrap();

        let ids = vec!["u1".to_string(), "u2".to_string(), "u1".to_string()];
        let mut tokens: Vec<String> = repo
            .list_for_users(&ids)
            .await
            .unwrap()
            .into_iter()
            .map(|d| d.token)
            .collect();
        tokens.sort();

        assert_eq!(tokens, vec!["tokA", "tokB", "tokC"]);
        assert!(repo.list_for_users(&[]).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_list_page_walks_whole_registry() {
        let pool = setup_test_db().await;
        insert_user(&pool, "u1").await;
        let repo = DeviceTokenRepository::new(pool.clone());
        for i in 0..7 {
            repo.register_or_update("u1", &format!("tok{}", i), Platform::Android)
                .await
                .unwrap();
        }

        let mut seen = Vec::new();
        let mut cursor: Option<String> = None;
        loop {
            let page = repo.list_page(cursor.as_deref(), 3).await.unwrap();
            let done = page.len() < 3;
            cursor = page.last().map(|d| d.id.clone());
            seen.extend(page.into_iter().map(|d| d.token));
            if done {
                break;
            }
        }

        assert_eq!(seen.len(), 7);
        let all: Vec<String> = repo
            .list_all()
            .await
            .unwrap()
            .into_iter()
            .map(|d| d.token)
            .collect();
        assert_eq!(seen, all);
    }

    #[tokio::test]
    async fn test_delete_by_token_is_idempotent() {
        let pool = setup_test_db().await;
        insert_user(&pool, "u1").await;
        let repo = DeviceTokenRepository::new(pool.clone());
        repo.register_or_update("u1", "tokA", Platform::Ios).await.unwrap();

        assert!(repo.delete_by_token("tokA").await.unwrap());
        assert!(!repo.delete_by_token("tokA").await.unwrap());
        assert!(!repo.delete_by_token("never-existed").await.unwrap());
    }

    #[tokio::test]
    async fn test_register_endpoint_validates_and_stores() {
        let pool = setup_test_db().await;
        insert_user(&pool, "u1").await;
        let app = test_app(pool.clone());

        let (status, body) = call(
            app.router(devices_routes()),
            Method::POST,
            "/api/notifications/device-token",
            bearer_for_user("u1"),
            Some(json!({"token": "tokA", "platform": "ios"})),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["userId"], "u1");
        assert_eq!(body["token"], "tokA");
        assert_eq!(body["platform"], "ios");

        let (status, body) = call(
            app.router(devices_routes()),
            Method::POST,
            "/api/notifications/device-token",
            bearer_for_user("u1"),
            Some(json!({"token": "tokB", "platform": "windows"})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["code"], "VALIDATION_ERROR");

        let repo = DeviceTokenRepository::new(pool);
        assert!(repo.find_by_token("tokB").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_remove_endpoint_only_touches_own_tokens() {
        let pool = setup_test_db().await;
        insert_user(&pool, "u1").await;
        insert_user(&pool, "u2").await;
        let repo = DeviceTokenRepository::new(pool.clone());
        repo.register_or_update("u2", "tokOther", Platform::Ios).await.unwrap();
        repo.register_or_update("u1", "tokMine", Platform::Ios).await.unwrap();
        let app = test_app(pool);

        let (status, body) = call(
            app.router(devices_routes()),
            Method::DELETE,
            "/api/notifications/device-token/tokOther",
            bearer_for_user("u1"),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["removed"], false);
        assert!(repo.find_by_token("tokOther").await.unwrap().is_some());

        let (_, body) = call(
            app.router(devices_routes()),
            Method::DELETE,
            "/api/notifications/device-token/tokMine",
            bearer_for_user("u1"),
            None,
        )
        .await;
        assert_eq!(body["removed"], true);
        assert!(repo.find_by_token("tokMine").await.unwrap().is_none());
    }
}
