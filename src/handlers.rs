use std::path::{Component, Path, PathBuf};

use axum::{
    body::Body,
    extract::State,
    http::{header, HeaderMap, HeaderValue, StatusCode, Uri},
    response::{IntoResponse, Response},
};
use chrono::{DateTime, Utc};
use tokio::fs;
use tokio_util::io::ReaderStream;

use crate::error::FileServerError;
use crate::AppState;

/// One child of a listed directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListingEntry {
    pub name: String,
    pub is_dir: bool,
    pub is_symlink: bool,
}

// ============================================================================
// Helper functions
// ============================================================================

/// Percent-decode a URL path and normalise it into segments below the root.
///
/// Empty and `.` segments are dropped and `..` removes the previous segment.
/// A `..` with nothing left to remove, a segment holding a backslash or NUL,
/// or one that is not a single plain path component, is a traversal attempt.
fn normalize_request_path(raw: &str) -> Result<Vec<String>, FileServerError> {
    let decoded =
        urlencoding::decode(raw).map_err(|_| FileServerError::InvalidPath(raw.to_string()))?;

    let mut segments: Vec<String> = Vec::new();
    for segment in decoded.split('/') {
        match segment {
            "" | "." => continue,
            ".." => {
                if segments.pop().is_none() {
                    return Err(FileServerError::PathTraversal);
                }
            }
            name => {
                if name.contains('\0') || name.contains('\\') {
                    return Err(FileServerError::PathTraversal);
                }
                let mut components = Path::new(name).components();
                match (components.next(), components.next()) {
                    (Some(Component::Normal(_)), None) => segments.push(name.to_string()),
                    _ => return Err(FileServerError::PathTraversal),
                }
            }
        }
    }

    Ok(segments)
}

/// Canonicalize `path` and make sure it did not leave `root` through a symlink.
fn verify_within_root(root: &Path, path: &Path, raw: &str) -> Result<PathBuf, FileServerError> {
    let canonical = path
        .canonicalize()
        .map_err(|_| FileServerError::NotFound(raw.to_string()))?;

    if !canonical.starts_with(root) {
        return Err(FileServerError::PathTraversal);
    }

    Ok(canonical)
}

/// Resolve a raw request path to an existing filesystem path under `root`.
///
/// `root` must already be canonical.
pub fn resolve_request(root: &Path, raw: &str) -> Result<PathBuf, FileServerError> {
    let mut path = root.to_path_buf();
    for segment in normalize_request_path(raw)? {
        path.push(segment);
    }

    // Belt-and-suspenders: the lexical join can't escape, symlinks can
    if !path.starts_with(root) {
        return Err(FileServerError::PathTraversal);
    }

    verify_within_root(root, &path, raw)
}

fn http_date(time: DateTime<Utc>) -> String {
    time.format("%a, %d %b %Y %H:%M:%S GMT").to_string()
}

/// True when the client's cached copy is at least as new as `modified`.
fn not_modified_since(headers: &HeaderMap, modified: DateTime<Utc>) -> bool {
    headers
        .get(header::IF_MODIFIED_SINCE)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| DateTime::parse_from_rfc2822(value).ok())
        .is_some_and(|since| modified.timestamp() <= since.timestamp())
}

fn html_escape(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#x27;"),
            _ => escaped.push(c),
        }
    }
    escaped
}

/// Read the children of a directory, directories first then by name.
fn read_listing(dir: &Path) -> std::io::Result<Vec<ListingEntry>> {
    let mut entries = Vec::new();

    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let is_symlink = entry.file_type().map(|t| t.is_symlink()).unwrap_or(false);

        entries.push(ListingEntry {
            name: entry.file_name().to_string_lossy().to_string(),
            // Follows symlinks so linked directories get a trailing slash
            is_dir: entry.path().is_dir(),
            is_symlink,
        });
    }

    entries.sort_by(|a, b| match (a.is_dir, b.is_dir) {
        (true, false) => std::cmp::Ordering::Less,
        (false, true) => std::cmp::Ordering::Greater,
        _ => a.name.to_lowercase().cmp(&b.name.to_lowercase()),
    });

    Ok(entries)
}

/// Render the auto-generated index page for a directory.
pub fn render_listing(display_path: &str, entries: &[ListingEntry]) -> String {
    let title = html_escape(&format!("Directory listing for {}", display_path));

    let mut html = String::new();
    html.push_str("<!DOCTYPE html>\n<html lang=\"en\">\n<head>\n");
    html.push_str("<meta charset=\"utf-8\">\n");
    html.push_str(&format!("<title>{}</title>\n</head>\n<body>\n", title));
    html.push_str(&format!("<h1>{}</h1>\n<hr>\n<ul>\n", title));

    for entry in entries {
        let mut href = urlencoding::encode(&entry.name).into_owned();
        let mut label = entry.name.clone();
        if entry.is_dir {
            href.push('/');
            label.push('/');
        }
        if entry.is_symlink {
            label = format!("{}@", entry.name);
        }
        html.push_str(&format!(
            "<li><a href=\"{}\">{}</a></li>\n",
            href,
            html_escape(&label)
        ));
    }

    html.push_str("</ul>\n<hr>\n</body>\n</html>\n");
    html
}

fn redirect_to_directory(uri: &Uri) -> Response {
    let location = match uri.query() {
        Some(query) => format!("{}/?{}", uri.path(), query),
        None => format!("{}/", uri.path()),
    };

    (StatusCode::MOVED_PERMANENTLY, [(header::LOCATION, location)]).into_response()
}

// ============================================================================
// Handlers
// ============================================================================

/// GET|HEAD /*path - Serve a file, a directory index or a directory listing
///
/// Directory policy: a directory requested without a trailing slash is
/// redirected to the slash form; then the configured index file is served if
/// present; otherwise a listing is generated, or 403 when listings are off.
pub async fn serve(
    State(state): State<AppState>,
    uri: Uri,
    headers: HeaderMap,
) -> Result<Response, FileServerError> {
    let raw = uri.path();
    let path = resolve_request(&state.root_dir, raw)?;

    let metadata = fs::metadata(&path)
        .await
        .map_err(|_| FileServerError::NotFound(raw.to_string()))?;

    if metadata.is_dir() {
        if !raw.ends_with('/') {
            return Ok(redirect_to_directory(&uri));
        }

        if !state.config.index_file.is_empty() {
            let index = path.join(&state.config.index_file);
            if let Ok(index_meta) = fs::metadata(&index).await {
                if index_meta.is_file() {
                    let index = verify_within_root(&state.root_dir, &index, raw)?;
                    return serve_file(&index, &index_meta, &headers, raw).await;
                }
            }
        }

        if !state.config.directory_listing {
            return Err(FileServerError::ListingDisabled);
        }

        return list_directory(&path, raw).await;
    }

    // "file.txt/" names a directory that does not exist
    if raw.ends_with('/') {
        return Err(FileServerError::NotFound(raw.to_string()));
    }

    serve_file(&path, &metadata, &headers, raw).await
}

/// Stream a regular file without loading it into memory.
async fn serve_file(
    path: &Path,
    metadata: &std::fs::Metadata,
    headers: &HeaderMap,
    raw: &str,
) -> Result<Response, FileServerError> {
    let last_modified = metadata.modified().ok().map(DateTime::<Utc>::from);

    if let Some(modified) = last_modified {
        if not_modified_since(headers, modified) {
            return Ok((
                StatusCode::NOT_MODIFIED,
                [(header::LAST_MODIFIED, http_date(modified))],
            )
                .into_response());
        }
    }

    // Unreadable files are reported the same way as missing ones
    let file = fs::File::open(path)
        .await
        .map_err(|_| FileServerError::NotFound(raw.to_string()))?;

    let body = Body::from_stream(ReaderStream::new(file));

    let mime = mime_guess::from_path(path)
        .first_or_octet_stream()
        .to_string();

    let mut response = (
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, mime),
            (header::CONTENT_LENGTH, metadata.len().to_string()),
        ],
        body,
    )
        .into_response();

    if let Some(modified) = last_modified {
        if let Ok(value) = HeaderValue::from_str(&http_date(modified)) {
            response.headers_mut().insert(header::LAST_MODIFIED, value);
        }
    }

    Ok(response)
}

async fn list_directory(path: &Path, raw: &str) -> Result<Response, FileServerError> {
    let dir = path.to_path_buf();
    let entries = tokio::task::spawn_blocking(move || read_listing(&dir))
        .await
        .map_err(|err| FileServerError::Io(std::io::Error::other(err.to_string())))?
        .map_err(|_| FileServerError::NotFound(raw.to_string()))?;

    let display_path = urlencoding::decode(raw)
        .map(|p| p.into_owned())
        .unwrap_or_else(|_| raw.to_string());

    Ok((
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/html; charset=utf-8".to_string())],
        render_listing(&display_path, &entries),
    )
        .into_response())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn temp_root() -> (TempDir, PathBuf) {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path().canonicalize().unwrap();
        (temp_dir, root)
    }

    // ========================================================================
    // Path Normalisation Tests
    // ========================================================================

    #[test]
    fn test_normalize_plain_path() {
        assert_eq!(
            normalize_request_path("/docs/readme.md").unwrap(),
            vec!["docs", "readme.md"]
        );
    }

    #[test]
    fn test_normalize_root_and_dots() {
        assert!(normalize_request_path("/").unwrap().is_empty());
        assert!(normalize_request_path("/././/").unwrap().is_empty());
        assert_eq!(normalize_request_path("/a/./b/").unwrap(), vec!["a", "b"]);
    }

    #[test]
    fn test_normalize_parent_within_root() {
        assert_eq!(
            normalize_request_path("/a/b/../c.txt").unwrap(),
            vec!["a", "c.txt"]
        );
        assert!(normalize_request_path("/a/..").unwrap().is_empty());
    }

    #[test]
    fn test_normalize_rejects_escape() {
        for raw in [
            "/..",
            "/../etc/passwd",
            "/../../etc/passwd",
            "/a/../../etc/passwd",
            "/%2e%2e/etc/passwd",
            "/a/%2E%2E/%2e%2e/secret",
        ] {
            assert!(
                matches!(
                    normalize_request_path(raw),
                    Err(FileServerError::PathTraversal)
                ),
                "{raw} should be rejected"
            );
        }
    }

    #[test]
    fn test_normalize_decodes_percent_escapes() {
        assert_eq!(
            normalize_request_path("/my%20file.txt").unwrap(),
            vec!["my file.txt"]
        );
        // An encoded slash still separates segments
        assert_eq!(normalize_request_path("/a%2Fb").unwrap(), vec!["a", "b"]);
    }

    #[test]
    fn test_normalize_rejects_null_bytes() {
        assert!(matches!(
            normalize_request_path("/file%00.txt"),
            Err(FileServerError::PathTraversal)
        ));
    }

    /// Backslashes are separators on Windows, so they are refused everywhere.
    #[test]
    fn test_normalize_rejects_backslashes() {
        for raw in ["/a%5Cb", "/docs/..%5C..%5Csecret.txt", "/a\\b"] {
            assert!(
                matches!(normalize_request_path(raw), Err(FileServerError::PathTraversal)),
                "{raw} was accepted"
            );
        }
    }

    #[test]
    fn test_normalize_rejects_invalid_utf8() {
        assert!(matches!(
            normalize_request_path("/%ff%fe"),
            Err(FileServerError::InvalidPath(_))
        ));
    }

    // ========================================================================
    // Resolution Tests (real filesystem)
    // ========================================================================

    #[test]
    fn test_resolve_existing_file() {
        let (_guard, root) = temp_root();
        std::fs::create_dir_all(root.join("sub")).unwrap();
        std::fs::write(root.join("sub/test.txt"), "test").unwrap();

        let resolved = resolve_request(&root, "/sub/test.txt").unwrap();
        assert_eq!(resolved, root.join("sub/test.txt"));
        assert_eq!(resolve_request(&root, "/").unwrap(), root);
    }

    #[test]
    fn test_resolve_missing_file() {
        let (_guard, root) = temp_root();
        assert!(matches!(
            resolve_request(&root, "/missing.txt"),
            Err(FileServerError::NotFound(_))
        ));
    }

    #[test]
    fn test_resolve_never_leaves_root() {
        let (_guard, root) = temp_root();
        std::fs::write(root.join("inside.txt"), "ok").unwrap();

        for raw in ["/../../etc/passwd", "/../inside.txt", "/%2e%2e/%2e%2e/etc/passwd"] {
            match resolve_request(&root, raw) {
                Ok(path) => panic!("{raw} resolved to {}", path.display()),
                Err(FileServerError::PathTraversal) | Err(FileServerError::NotFound(_)) => {}
                Err(other) => panic!("unexpected error for {raw}: {other}"),
            }
        }
    }

    #[test]
    fn test_resolve_detects_symlink_escape() {
        let (_guard, root) = temp_root();
        let outside_dir = TempDir::new().unwrap();
        std::fs::write(outside_dir.path().join("secret.txt"), "secret data").unwrap();

        #[cfg(unix)]
        {
            use std::os::unix::fs::symlink;
            symlink(outside_dir.path(), root.join("escape")).unwrap();

            let result = resolve_request(&root, "/escape/secret.txt");
            assert!(matches!(result, Err(FileServerError::PathTraversal)));
        }
    }

    // ========================================================================
    // Listing Tests
    // ========================================================================

    #[test]
    fn test_read_listing_sorts_directories_first() {
        let (_guard, root) = temp_root();
        std::fs::write(root.join("b.txt"), "").unwrap();
        std::fs::write(root.join("A.txt"), "").unwrap();
        std::fs::create_dir(root.join("zeta")).unwrap();

        let names: Vec<_> = read_listing(&root)
            .unwrap()
            .into_iter()
            .map(|e| e.name)
            .collect();
        assert_eq!(names, vec!["zeta", "A.txt", "b.txt"]);
    }

    #[test]
    fn test_render_listing_escapes_and_encodes() {
        let entries = vec![
            ListingEntry {
                name: "photos".to_string(),
                is_dir: true,
                is_symlink: false,
            },
            ListingEntry {
                name: "a <b>.txt".to_string(),
                is_dir: false,
                is_symlink: false,
            },
            ListingEntry {
                name: "link".to_string(),
                is_dir: false,
                is_symlink: true,
            },
        ];

        let html = render_listing("/share/", &entries);
        assert!(html.contains("<title>Directory listing for /share/</title>"));
        assert!(html.contains("<a href=\"photos/\">photos/</a>"));
        assert!(html.contains("<a href=\"a%20%3Cb%3E.txt\">a &lt;b&gt;.txt</a>"));
        assert!(html.contains("<a href=\"link\">link@</a>"));
    }

    #[test]
    fn test_html_escape() {
        assert_eq!(
            html_escape("<a href='x'>&\"</a>"),
            "&lt;a href=&#x27;x&#x27;&gt;&amp;&quot;&lt;/a&gt;"
        );
    }

    // ========================================================================
    // Conditional Request Tests
    // ========================================================================

    #[test]
    fn test_http_date_format() {
        let time = DateTime::parse_from_rfc3339("1994-11-06T08:49:37Z")
            .unwrap()
            .with_timezone(&Utc);
        assert_eq!(http_date(time), "Sun, 06 Nov 1994 08:49:37 GMT");
    }

    #[test]
    fn test_not_modified_since() {
        let modified = DateTime::parse_from_rfc3339("2024-01-01T00:00:00Z")
            .unwrap()
            .with_timezone(&Utc);

        let mut headers = HeaderMap::new();
        assert!(!not_modified_since(&headers, modified));

        headers.insert(
            header::IF_MODIFIED_SINCE,
            HeaderValue::from_static("Mon, 01 Jan 2024 00:00:00 GMT"),
        );
        assert!(not_modified_since(&headers, modified));

        headers.insert(
            header::IF_MODIFIED_SINCE,
            HeaderValue::from_static("Sun, 31 Dec 2023 23:59:59 GMT"),
        );
        assert!(!not_modified_since(&headers, modified));

        headers.insert(header::IF_MODIFIED_SINCE, HeaderValue::from_static("garbage"));
        assert!(!not_modified_since(&headers, modified));
    }
}
