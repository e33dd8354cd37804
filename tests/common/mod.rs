//! Test utilities and common setup.
#![allow(dead_code)]

use std::net::{IpAddr, Ipv4Addr};
use std::path::{Path, PathBuf};

use axum::{
    body::Body,
    http::{Method, Request, Response},
    Router,
};
use lanserve::{routes, AppState, ServerConfig};
use tempfile::TempDir;
use tower::ServiceExt;

/// A served root plus a sibling directory holding a file that must never leak.
pub struct Fixture {
    pub root: TempDir,
    pub outside: TempDir,
}

impl Fixture {
    pub fn path(&self) -> PathBuf {
        self.root.path().canonicalize().unwrap()
    }

    /// Name of the outside directory as seen from the root's parent
    pub fn outside_name(&self) -> String {
        self.outside
            .path()
            .file_name()
            .unwrap()
            .to_string_lossy()
            .to_string()
    }
}

/// Create a root with:
///
/// ```text
/// hello.txt          "hi"
/// my file.txt        "spaces"
/// data.bin           [0, 1, 2, 3]
/// docs/readme.md     "# Readme"
/// docs/guide/        (empty)
/// site/index.html    "<h1>Welcome</h1>"
/// site/about.html    "about"
/// ```
pub fn fixture() -> Fixture {
    let root = TempDir::new().expect("create root");
    let outside = TempDir::new().expect("create outside dir");
    let dir = root.path();

    std::fs::write(dir.join("hello.txt"), "hi").unwrap();
    std::fs::write(dir.join("my file.txt"), "spaces").unwrap();
    std::fs::write(dir.join("data.bin"), [0u8, 1, 2, 3]).unwrap();
    std::fs::create_dir_all(dir.join("docs/guide")).unwrap();
    std::fs::write(dir.join("docs/readme.md"), "# Readme").unwrap();
    std::fs::create_dir_all(dir.join("site")).unwrap();
    std::fs::write(dir.join("site/index.html"), "<h1>Welcome</h1>").unwrap();
    std::fs::write(dir.join("site/about.html"), "about").unwrap();

    std::fs::write(outside.path().join("secret.txt"), "TOP SECRET").unwrap();

    Fixture { root, outside }
}

pub fn test_app(root: &Path) -> Router {
    test_app_with(root, ServerConfig::default())
}

pub fn test_app_with(root: &Path, config: ServerConfig) -> Router {
    routes::build_router(AppState::with_config(root.to_path_buf(), config))
}

pub async fn send(app: Router, method: Method, uri: &str) -> Response<Body> {
    app.oneshot(
        Request::builder()
            .uri(uri)
            .method(method)
            .body(Body::empty())
            .unwrap(),
    )
    .await
    .unwrap()
}

pub async fn get(app: Router, uri: &str) -> Response<Body> {
    send(app, Method::GET, uri).await
}

pub async fn body_string(response: Response<Body>) -> String {
    let body = axum::body::to_bytes(response.into_body(), 1024 * 1024)
        .await
        .unwrap();
    String::from_utf8_lossy(&body).to_string()
}

/// Loopback-only config so tests never expose anything on the LAN.
pub fn loopback_config(port: u16) -> ServerConfig {
    ServerConfig {
        port,
        bind: IpAddr::V4(Ipv4Addr::LOCALHOST),
        shutdown_timeout_ms: 500,
        ..ServerConfig::default()
    }
}

pub fn http_client() -> reqwest::Client {
    reqwest::Client::builder().no_proxy().build().unwrap()
}
