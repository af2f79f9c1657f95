//! Router-level tests for the `/files` endpoints.

#[cfg(test)]
mod tests {
    use std::path::Path;
    use std::sync::Arc;

    use axum::body::Body;
    use axum::http::{header, Request, StatusCode};
    use axum::response::Response;
    use axum::Router;
    use fshare_files::{codec, FilesService};
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    use crate::server::{build_router, AppState};

    const PROLOG: &str = "<?xml version='1.0' encoding='UTF-8'?>";

    fn create_test_app(redirect: Option<&str>) -> (Arc<FilesService>, Router) {
        let files = Arc::new(FilesService::in_memory());
        let state = AppState::new(files.clone(), redirect.map(str::to_string));
        (files, build_router(Arc::new(state)))
    }

    async fn get(app: &Router, uri: &str) -> Response {
        app.clone()
            .oneshot(Request::get(uri).body(Body::empty()).unwrap())
            .await
            .unwrap()
    }

    async fn post_form(app: &Router, form: &[(&str, &str)]) -> Response {
        let body = form
            .iter()
            .map(|(k, v)| format!("{k}={}", urlencoding::encode(v)))
            .collect::<Vec<_>>()
            .join("&");
        app.clone()
            .oneshot(
                Request::post("/files")
                    .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
                    .body(Body::from(body))
                    .unwrap(),
            )
            .await
            .unwrap()
    }

    async fn body_string(response: Response) -> String {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    fn listing_uri(dir: &Path) -> String {
        format!(
            "/files?section=files&path={}",
            urlencoding::encode(&codec::encode_path(dir))
        )
    }

    #[tokio::test]
    async fn test_status_section() {
        let (_files, app) = create_test_app(None);
        let response = get(&app, "/files?section=status").await;

        assert_eq!(response.status(), StatusCode::OK);
        let headers = response.headers();
        assert!(headers[header::CONTENT_TYPE]
            .to_str()
            .unwrap()
            .starts_with("text/xml"));
        assert!(headers[header::CACHE_CONTROL]
            .to_str()
            .unwrap()
            .contains("no-cache"));
        assert_eq!(headers[header::PRAGMA], "no-cache");

        assert_eq!(
            body_string(response).await,
            format!("{PROLOG}<Status><Count>0</Count></Status>")
        );
    }

    #[tokio::test]
    async fn test_share_then_list_then_unshare() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("b.txt");
        std::fs::write(&file, vec![1u8; 10_000]).unwrap();
        let (files, app) = create_test_app(None);

        let response =
            post_form(&app, &[("action", "share"), ("file", file.to_str().unwrap())]).await;
        assert_eq!(response.status(), StatusCode::NO_CONTENT);
        assert_eq!(files.status().count, 1);

        let response = get(&app, &listing_uri(dir.path())).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            body_string(response).await,
            format!(
                "{PROLOG}<Files><File><Name>b.txt</Name><Size>10.00 kB</Size></File></Files>"
            )
        );

        let tokens = codec::encode_path_list(&[&file]);
        let response = post_form(
            &app,
            &[("action", "unshareFile"), ("files", tokens.as_str()), ("directories", "")],
        )
        .await;
        assert_eq!(response.status(), StatusCode::NO_CONTENT);
        assert_eq!(files.status().count, 0);

        let response = get(&app, &listing_uri(dir.path())).await;
        assert_eq!(body_string(response).await, format!("{PROLOG}<Files></Files>"));
    }

    #[tokio::test]
    async fn test_roots_listing_shows_directories() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("x.bin");
        std::fs::write(&file, b"x").unwrap();
        let (files, app) = create_test_app(None);
        files.share(file.to_str().unwrap()).unwrap();

        let body = body_string(get(&app, "/files?section=files").await).await;
        assert!(body.starts_with(&format!("{PROLOG}<Files><Directory>")));
        assert!(!body.contains("<File>"));
    }

    #[tokio::test]
    async fn test_unshare_directory_via_form() {
        let dir = tempfile::tempdir().unwrap();
        let sub = dir.path().join("sub");
        std::fs::create_dir(&sub).unwrap();
        let (files, app) = create_test_app(None);
        for name in ["a", "b", "c"] {
            let path = sub.join(name);
            std::fs::write(&path, name).unwrap();
            files.share(path.to_str().unwrap()).unwrap();
        }

        let tokens = codec::encode_path_list(&[&sub]);
        let response =
            post_form(&app, &[("action", "unshareFile"), ("directories", tokens.as_str())]).await;
        assert_eq!(response.status(), StatusCode::NO_CONTENT);
        assert_eq!(files.status().count, 0);
    }

    #[tokio::test]
    async fn test_redirect_after_post() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("r.txt");
        std::fs::write(&file, b"r").unwrap();
        let (_files, app) = create_test_app(Some("/Files.html"));

        let response =
            post_form(&app, &[("action", "share"), ("file", file.to_str().unwrap())]).await;
        assert_eq!(response.status(), StatusCode::SEE_OTHER);
        assert_eq!(response.headers()[header::LOCATION], "/Files.html");
    }

    #[tokio::test]
    async fn test_raw_path_token_in_query() {
        let dir = tempfile::tempdir().unwrap();
        let sub = dir.path().join("a>>");
        std::fs::create_dir(&sub).unwrap();
        let file = sub.join("song.ogg");
        std::fs::write(&file, b"la").unwrap();
        let (files, app) = create_test_app(None);
        files.share(file.to_str().unwrap()).unwrap();

        // sent without percent-encoding
        let transport = codec::encode_path(&sub);
        assert!(transport.ends_with("YT4-"));
        let response = get(&app, &format!("/files?section=files&path={transport}")).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert!(body_string(response)
            .await
            .contains("<File><Name>song.ogg</Name>"));
    }

    #[tokio::test]
    async fn test_bad_path_token_is_rejected() {
        let (files, app) = create_test_app(None);
        let response = get(&app, "/files?section=files&path=%40%40%40").await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let body: serde_json::Value = serde_json::from_str(&body_string(response).await).unwrap();
        assert!(body["error"].as_str().unwrap().contains("invalid path token"));
        assert_eq!(files.status().count, 0);
    }

    #[tokio::test]
    async fn test_bad_section_and_action() {
        let (_files, app) = create_test_app(None);
        assert_eq!(get(&app, "/files").await.status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            get(&app, "/files?section=bogus").await.status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            post_form(&app, &[("action", "explode")]).await.status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            post_form(&app, &[("action", "share")]).await.status(),
            StatusCode::BAD_REQUEST
        );
    }

    #[tokio::test]
    async fn test_share_missing_file_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope.txt");
        let (files, app) = create_test_app(None);

        let response =
            post_form(&app, &[("action", "share"), ("file", missing.to_str().unwrap())]).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(files.status().count, 0);
    }

    #[tokio::test]
    async fn test_malformed_unshare_changes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("keep.txt");
        std::fs::write(&file, b"keep").unwrap();
        let (files, app) = create_test_app(None);
        files.share(file.to_str().unwrap()).unwrap();

        let tokens = format!("{},***", codec::encode_path_list(&[&file]));
        let response =
            post_form(&app, &[("action", "unshareFile"), ("files", tokens.as_str())]).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(files.status().count, 1);
    }

    #[tokio::test]
    async fn test_health_reports_counts() {
        let (_files, app) = create_test_app(None);
        get(&app, "/files?section=status").await;
        let response = get(&app, "/health").await;
        assert_eq!(response.status(), StatusCode::OK);

        let body: serde_json::Value = serde_json::from_str(&body_string(response).await).unwrap();
        assert_eq!(body["status"], "ok");
        assert_eq!(body["shared_files"], 0);
        assert_eq!(body["req_total"], 2);
    }
}
