//! Route table for the pipeline service.
//!
//! ## Structure
//! - **Health**: `GET /healthz`, `GET /readyz`
//! - **Albums**
//!   - `GET /api/albums`: gallery albums (synced on each call)
//!   - `GET /api/albums/downloaded`: albums stored as chunks
//!   - `GET /api/stats`
//! - **Tasks**
//!   - `POST /api/downloads`, `POST /api/resizes`: start work, `202 {task_id}`
//!   - `GET /api/tasks`, `GET /api/tasks/completed`
//!   - `GET|DELETE /api/tasks/{id}`, `GET /api/tasks/{id}/artifact`
//! - **Profiles**: `GET|POST /api/profiles`, `GET|PUT|DELETE /api/profiles/{id}`

use crate::{
    handlers::{
        album_handlers::{list_albums, list_downloaded_albums, stats},
        health_handlers::{healthz, readyz},
        profile_handlers::{
            create_profile, delete_profile, get_profile, list_profiles, update_profile,
        },
        task_handlers::{
            delete_task, get_artifact, get_task, list_active_tasks, list_completed_resizes,
            start_download, start_resize,
        },
    },
    state::AppState,
};
use axum::{
    Router,
    routing::{get, post},
};

/// Build the router. Handlers share [`AppState`].
pub fn routes() -> Router<AppState> {
    Router::new()
        // health endpoints (mounted at root)
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        // albums
        .route("/api/albums", get(list_albums))
        .route("/api/albums/downloaded", get(list_downloaded_albums))
        .route("/api/stats", get(stats))
        // tasks
        .route("/api/downloads", post(start_download))
        .route("/api/resizes", post(start_resize))
        .route("/api/tasks", get(list_active_tasks))
        .route("/api/tasks/completed", get(list_completed_resizes))
        .route("/api/tasks/{id}", get(get_task).delete(delete_task))
        .route("/api/tasks/{id}/artifact", get(get_artifact))
        // profiles
        .route("/api/profiles", get(list_profiles).post(create_profile))
        .route(
            "/api/profiles/{id}",
            get(get_profile).put(update_profile).delete(delete_profile),
        )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::AppConfig,
        db,
        models::album::AssetRef,
        services::{archive::entry_names, downloader::testing::FakeGallery},
    };
    use axum::{
        body::{Body, Bytes, to_bytes},
        http::{Method, Request, StatusCode, header},
    };
    use image::{ImageFormat, Rgb, RgbImage};
    use serde_json::{Value, json};
    use std::{io::Cursor, sync::Arc, time::Duration};
    use tempfile::TempDir;
    use tower::ServiceExt;

    struct TestApp {
        router: Router,
        _db_dir: TempDir,
        _storage: TempDir,
    }

    async fn app(gallery: FakeGallery) -> TestApp {
        let (pool, db_dir) = db::testing::pool().await;
        let storage = tempfile::tempdir().unwrap();
        let state = AppState::new(pool, &AppConfig::for_tests(storage.path()), Arc::new(gallery));
        TestApp {
            router: routes().with_state(state),
            _db_dir: db_dir,
            _storage: storage,
        }
    }

    impl TestApp {
        async fn send(&self, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Bytes) {
            let builder = Request::builder().method(method).uri(uri);
            let request = match body {
                Some(json) => builder
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from(json.to_string()))
                    .unwrap(),
                None => builder.body(Body::empty()).unwrap(),
            };
            let response = self.router.clone().oneshot(request).await.unwrap();
            let status = response.status();
            (status, to_bytes(response.into_body(), usize::MAX).await.unwrap())
        }

        async fn json(&self, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
            let (status, bytes) = self.send(method, uri, body).await;
            let value = if bytes.is_empty() {
                Value::Null
            } else {
                serde_json::from_slice(&bytes).unwrap()
            };
            (status, value)
        }

        async fn wait_terminal(&self, task_id: &str) -> Value {
            for _ in 0..500 {
                let (status, task) = self
                    .json(Method::GET, &format!("/api/tasks/{task_id}"), None)
                    .await;
                assert_eq!(status, StatusCode::OK);
                if task["status"] == "completed" || task["status"] == "failed" {
                    return task;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
            panic!("task {task_id} did not finish");
        }
    }

    fn png(width: u32, height: u32) -> Vec<u8> {
        let image = RgbImage::from_pixel(width, height, Rgb([90, 90, 200]));
        let mut out = Cursor::new(Vec::new());
        image.write_to(&mut out, ImageFormat::Png).unwrap();
        out.into_inner()
    }

    #[tokio::test]
    async fn health_endpoints() {
        let app = app(FakeGallery::default()).await;
        let (status, body) = app.json(Method::GET, "/healthz", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");

        let (status, body) = app.json(Method::GET, "/readyz", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["checks"]["sqlite"]["ok"], true);
        assert_eq!(body["checks"]["storage"]["ok"], true);
    }

    #[tokio::test]
    async fn errors_carry_kind_and_status() {
        let app = app(FakeGallery::default()).await;

        let (status, body) = app.json(Method::GET, "/api/tasks/nope", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["kind"], "not_found");

        let (status, _) = app.json(Method::DELETE, "/api/tasks/nope", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, body) = app
            .json(
                Method::POST,
                "/api/resizes",
                Some(json!({"downloaded_album_id": 99, "profile_ids": [1]})),
            )
            .await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(body["kind"], "integrity_violation");
    }

    #[tokio::test]
    async fn profile_crud() {
        let app = app(FakeGallery::default()).await;
        let profile = json!({"name": "frame", "width": 800, "height": 480});

        let (status, created) = app.json(Method::POST, "/api/profiles", Some(profile.clone())).await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(created["include_vertical"], true);
        let id = created["id"].as_i64().unwrap();

        let (status, _) = app.json(Method::POST, "/api/profiles", Some(profile)).await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);

        let (status, updated) = app
            .json(
                Method::PUT,
                &format!("/api/profiles/{id}"),
                Some(json!({"name": "frame", "width": 1024, "height": 600, "include_vertical": false})),
            )
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(updated["width"], 1024);
        assert_eq!(updated["include_vertical"], false);

        let (status, list) = app.json(Method::GET, "/api/profiles", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(list.as_array().unwrap().len(), 1);

        let (status, _) = app.json(Method::DELETE, &format!("/api/profiles/{id}"), None).await;
        assert_eq!(status, StatusCode::NO_CONTENT);
        let (status, _) = app.json(Method::GET, &format!("/api/profiles/{id}"), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn download_then_resize_then_fetch_artifact() {
        let gallery = FakeGallery::with_assets(vec![
            (
                AssetRef {
                    id: "a1".into(),
                    filename: "beach.png".into(),
                    orientation: None,
                },
                png(64, 32),
            ),
            (
                AssetRef {
                    id: "a2".into(),
                    filename: "tower.png".into(),
                    orientation: None,
                },
                png(32, 64),
            ),
        ]);
        let app = app(gallery).await;

        let (status, started) = app
            .json(
                Method::POST,
                "/api/downloads",
                Some(json!({"album_id": "g1", "album_name": "Trip"})),
            )
            .await;
        assert_eq!(status, StatusCode::ACCEPTED);
        let download = app.wait_terminal(started["task_id"].as_str().unwrap()).await;
        assert_eq!(download["status"], "completed");
        assert_eq!(download["progress"], 2);

        let (_, albums) = app.json(Method::GET, "/api/albums/downloaded", None).await;
        let album_id = albums[0]["id"].as_i64().unwrap();
        let (_, stats) = app.json(Method::GET, "/api/stats", None).await;
        assert_eq!(stats["download_count"], 1);

        let (_, profile) = app
            .json(
                Method::POST,
                "/api/profiles",
                Some(json!({"name": "wide", "width": 40, "height": 30, "include_vertical": false})),
            )
            .await;
        let (status, started) = app
            .json(
                Method::POST,
                "/api/resizes",
                Some(json!({"downloaded_album_id": album_id, "profile_ids": [profile["id"]]})),
            )
            .await;
        assert_eq!(status, StatusCode::ACCEPTED);
        let resize_id = started["task_id"].as_str().unwrap().to_string();
        let resize = app.wait_terminal(&resize_id).await;
        assert_eq!(resize["status"], "completed");
        assert_eq!(resize["label"], "Trip (wide)");
        assert_eq!(resize["processed_count"], 2);

        let (_, active) = app.json(Method::GET, "/api/tasks", None).await;
        assert_eq!(active.as_array().unwrap().len(), 2);
        assert_eq!(active[0]["task_type"], "resize");

        let uri = format!("/api/tasks/{resize_id}/artifact");
        let response = app
            .router
            .clone()
            .oneshot(Request::get(&uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[header::CONTENT_TYPE], "application/zip");
        assert!(response.headers().contains_key(header::ETAG));
        let artifact = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(entry_names(&artifact).unwrap(), vec!["Trip_wide/beach.png"]);

        let (_, completed) = app.json(Method::GET, "/api/tasks/completed", None).await;
        assert_eq!(completed.as_array().unwrap().len(), 1);

        let (status, _) = app.send(Method::DELETE, &format!("/api/tasks/{resize_id}"), None).await;
        assert_eq!(status, StatusCode::NO_CONTENT);
        let (status, _) = app.send(Method::GET, &uri, None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn album_listing_syncs_catalog() {
        let app = app(FakeGallery::default()).await;
        let (status, albums) = app.json(Method::GET, "/api/albums", None).await;
        assert_eq!(status, StatusCode::OK);
        assert!(albums.as_array().unwrap().is_empty());
    }
}
