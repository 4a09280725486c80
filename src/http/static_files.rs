//! Static locations, served from disk.

use axum::{
    body::Body,
    http::{uri::PathAndQuery, Request, Uri},
    response::{IntoResponse, Response},
};
use tower::ServiceExt;
use tower_http::services::{ServeDir, ServeFile};

use crate::routing::StaticLocation;

/// Serve `request` from the location's root. Directory paths get the
/// index file; missing files get the error page when one is configured.
pub async fn serve(location: &StaticLocation, request: Request<Body>) -> Response {
    let request = with_index_file(request, &location.index_file);
    let dir = ServeDir::new(&location.root);

    let result = match &location.error_file {
        Some(page) => dir
            .not_found_service(ServeFile::new(location.root.join(page)))
            .oneshot(request)
            .await
            .map(|response| response.map(Body::new)),
        None => dir.oneshot(request).await.map(|response| response.map(Body::new)),
    };

    match result {
        Ok(response) => response,
        Err(e) => {
            tracing::error!(root = %location.root.display(), error = %e, "Static file service failed");
            axum::http::StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

fn with_index_file(mut request: Request<Body>, index_file: &str) -> Request<Body> {
    let path = request.uri().path();
    if !path.ends_with('/') {
        return request;
    }

    let rewritten = match request.uri().query() {
        Some(query) => format!("{path}{index_file}?{query}"),
        None => format!("{path}{index_file}"),
    };
    if let Ok(path_and_query) = rewritten.parse::<PathAndQuery>() {
        let mut parts = request.uri().clone().into_parts();
        parts.path_and_query = Some(path_and_query);
        if let Ok(uri) = Uri::from_parts(parts) {
            *request.uri_mut() = uri;
        }
    }
    request
}
