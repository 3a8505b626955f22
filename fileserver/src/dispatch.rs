use axum::{
    body::Body,
    extract::{Query, State},
    http::{header, HeaderValue, Uri},
    response::{IntoResponse, Response},
};
use bytes::{Bytes, BytesMut};
use futures_util::stream;
use serde::Serialize;
use std::{
    fs::Metadata,
    path::{Path, PathBuf},
    sync::Arc,
};
use tempfile::TempDir;
use tokio::{fs::File, io::AsyncReadExt};
use tracing::{debug, warn};

use crate::error::ServerError;
use crate::listing::parse_listing;
use crate::resolve::{basename, resolve};
use crate::tools::Toolbox;
use crate::types::{mtime_of, ContentsEnvelope, ErrorEnvelope, FileRecord, InspectEnvelope};

const CHUNK_SIZE: usize = 64 * 1024;

/// Per-server settings shared by every request.
#[derive(Debug)]
pub struct ServeContext {
    pub root: PathBuf,
    pub tools: Toolbox,
}

pub type SharedContext = Arc<ServeContext>;

// -------------------------------------------
// Request parameters
// -------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    List,
    Stat,
    Inspect,
    Contents,
    Extract,
    /// Absent or unrecognized: serve the raw bytes.
    Download,
}

impl Action {
    fn parse(value: Option<&str>) -> Self {
        match value {
            Some("list") => Action::List,
            Some("stat") => Action::Stat,
            Some("inspect") => Action::Inspect,
            Some("contents") => Action::Contents,
            Some("extract") => Action::Extract,
            _ => Action::Download,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    Inline,
    Attachment,
}

impl Disposition {
    fn as_str(&self) -> &'static str {
        match self {
            Disposition::Inline => "inline",
            Disposition::Attachment => "attachment",
        }
    }
}

#[derive(Debug, Clone)]
pub struct RequestParams {
    pub action: Action,
    pub extract: Option<String>,
    pub disposition: Disposition,
}

impl RequestParams {
    /// The first occurrence of each key wins.
    pub fn from_pairs(pairs: &[(String, String)]) -> Self {
        let get = |key: &str| {
            pairs
                .iter()
                .find(|(k, _)| k == key)
                .map(|(_, v)| v.as_str())
        };

        RequestParams {
            action: Action::parse(get("action")),
            extract: get("extract").filter(|v| !v.is_empty()).map(str::to_string),
            disposition: match get("download") {
                Some("true") => Disposition::Attachment,
                _ => Disposition::Inline,
            },
        }
    }
}

// -------------------------------------------
// Entry point
// -------------------------------------------

/// Catch-all handler. Failures are reported in-band as an `ErrorEnvelope`.
pub async fn dispatch(
    State(ctx): State<SharedContext>,
    uri: Uri,
    Query(pairs): Query<Vec<(String, String)>>,
) -> Response {
    let params = RequestParams::from_pairs(&pairs);
    debug!("{} action={:?}", uri.path(), params.action);

    match handle_request(&ctx, uri.path(), &params).await {
        Ok(resp) => resp,
        Err(e) => {
            warn!("{} failed: {}", uri.path(), e);
            error_response(&e)
        }
    }
}

async fn handle_request(
    ctx: &ServeContext,
    url_path: &str,
    params: &RequestParams,
) -> Result<Response, ServerError> {
    let full_path = resolve(&ctx.root, url_path)?;
    let meta = tokio::fs::metadata(&full_path)
        .await
        .map_err(|source| ServerError::NotFound {
            path: full_path.clone(),
            source,
        })?;

    if meta.is_dir() {
        return match params.action {
            Action::List | Action::Stat => list_directory(&full_path, &meta).await,
            _ => Err(ServerError::CannotOpenDirectory),
        };
    }

    match params.action {
        Action::Stat => json_response(&FileRecord {
            directory: false,
            filename: basename(&full_path),
            size: meta.len() as i64,
            ..Default::default()
        }),
        Action::Inspect => {
            let file = ctx.tools.classify(&full_path).await?;
            json_response(&InspectEnvelope { file })
        }
        Action::Contents => {
            let listing = ctx.tools.archive_list(&full_path).await?;
            json_response(&ContentsEnvelope::new(parse_listing(&listing)))
        }
        Action::Extract => {
            let member = params
                .extract
                .as_deref()
                .ok_or(ServerError::ExtractRequired)?;
            let extracted = ctx.tools.archive_extract(&full_path, member).await?;
            let file = open(&extracted.path).await?;
            stream_response(
                file,
                params.disposition,
                &basename(Path::new(member)),
                Some(extracted.scratch),
            )
        }
        Action::List | Action::Download => {
            let file = open(&full_path).await?;
            stream_response(file, params.disposition, &basename(&full_path), None)
        }
    }
}

// -------------------------------------------
// Directories
// -------------------------------------------

/// Children carry the directory's own mtime, not their own.
async fn list_directory(path: &Path, meta: &Metadata) -> Result<Response, ServerError> {
    let read_dir_err = |source| ServerError::ReadDir {
        path: path.to_path_buf(),
        source,
    };
    let mtime = mtime_of(meta.modified());

    let mut entries = tokio::fs::read_dir(path).await.map_err(read_dir_err)?;
    let mut files = Vec::new();
    while let Some(entry) = entries.next_entry().await.map_err(read_dir_err)? {
        let child = entry.metadata().await.map_err(read_dir_err)?;
        files.push(FileRecord {
            directory: child.is_dir(),
            filename: entry.file_name().to_string_lossy().into_owned(),
            size: child.len() as i64,
            mtime,
            files: None,
        });
    }
    files.sort_by(|a, b| a.filename.cmp(&b.filename));

    json_response(&FileRecord {
        directory: true,
        filename: basename(path),
        size: meta.len() as i64,
        mtime,
        files: Some(files),
    })
}

// -------------------------------------------
// Response helpers
// -------------------------------------------

/// JSON body plus trailing newline; no Content-Type is set.
fn json_response<T: Serialize>(value: &T) -> Result<Response, ServerError> {
    let mut body = serde_json::to_vec(value)?;
    body.push(b'\n');
    Ok(Body::from(body).into_response())
}

fn error_response(err: &ServerError) -> Response {
    let envelope = ErrorEnvelope {
        error: err.to_string(),
    };
    json_response(&envelope).unwrap_or_else(|_| Body::empty().into_response())
}

async fn open(path: &Path) -> Result<File, ServerError> {
    File::open(path)
        .await
        .map_err(|source| ServerError::OpenFailed {
            path: path.to_path_buf(),
            source,
        })
}

/// Control characters cannot appear in a header value; they become spaces.
pub fn content_disposition(disposition: Disposition, filename: &str) -> String {
    let filename: String = filename
        .chars()
        .map(|c| if c.is_control() { ' ' } else { c })
        .collect();
    format!("{}; filename=\"{}\"", disposition.as_str(), filename)
}

/// Streams `file` as the body. `scratch` is kept alive until the stream ends.
fn stream_response(
    file: File,
    disposition: Disposition,
    filename: &str,
    scratch: Option<TempDir>,
) -> Result<Response, ServerError> {
    let value = HeaderValue::from_str(&content_disposition(disposition, filename))
        .map_err(|_| ServerError::BadFilename(filename.to_string()))?;

    let chunks = stream::try_unfold((file, scratch), |(mut file, scratch)| async move {
        let mut buf = BytesMut::with_capacity(CHUNK_SIZE);
        if file.read_buf(&mut buf).await? == 0 {
            return Ok::<_, std::io::Error>(None);
        }
        Ok(Some((Bytes::from(buf), (file, scratch))))
    });

    let mut resp = Body::from_stream(chunks).into_response();
    resp.headers_mut().insert(header::CONTENT_DISPOSITION, value);
    Ok(resp)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::Tool;
    use crate::FileServer;
    use axum::{http::Request, Router};
    use serde_json::{json, Value};
    use std::fs;
    use tower::ServiceExt;

    const LISTING: &str = "\
Listing archive: pkg.zip

   Date      Time    Attr         Size   Compressed  Name
------------------- ----- ------------ ------------  ------------------------
2024-03-01 12:30:45 ....A           11           11  readme.md
2024-03-01 12:31:00 ....A           42           40  src/main
------------------- ----- ------------ ------------  ------------------------
";

    /// Stands in for `7z`: `l` prints LISTING, `x` writes a fixed member body.
    fn fake_archiver(dir: &Path) -> Tool {
        let script = format!(
            "case \"$1\" in\n\
             l) cat <<'EOF'\n{LISTING}EOF\n;;\n\
             x) out=\"${{3#-o}}\"\n\
                mkdir -p \"$out/$(dirname \"$4\")\"\n\
                printf 'hello world' > \"$out/$4\"\n\
                printf '%s' \"$out\" > \"$(dirname \"$0\")/last_scratch\"\n;;\n\
             esac\n"
        );
        let path = dir.join("archiver.sh");
        fs::write(&path, script).unwrap();
        Tool::new("sh").with_args([path])
    }

    fn fake_classifier(dir: &Path) -> Tool {
        let path = dir.join("classifier.sh");
        fs::write(&path, "echo \"$1: ASCII text\"\n").unwrap();
        Tool::new("sh").with_args([path])
    }

    struct Fixture {
        root: tempfile::TempDir,
        tools: tempfile::TempDir,
        app: Router,
    }

    fn fixture() -> Fixture {
        let root = tempfile::tempdir().unwrap();
        let tools_dir = tempfile::tempdir().unwrap();
        fs::write(root.path().join("hello.txt"), b"abc").unwrap();
        fs::create_dir(root.path().join("d")).unwrap();
        fs::write(root.path().join("d/a"), b"1").unwrap();
        fs::write(root.path().join("d/b"), b"22").unwrap();
        fs::write(root.path().join("pkg.zip"), b"PK").unwrap();

        let server = FileServer::new(root.path()).with_tools(Toolbox {
            classifier: fake_classifier(tools_dir.path()),
            archiver: fake_archiver(tools_dir.path()),
        });
        Fixture {
            app: server.router(),
            root,
            tools: tools_dir,
        }
    }

    async fn get(app: &Router, uri: &str) -> (Option<String>, Vec<u8>) {
        let resp = app
            .clone()
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), 200);
        let disposition = resp
            .headers()
            .get(header::CONTENT_DISPOSITION)
            .map(|v| v.to_str().unwrap().to_string());
        let body = axum::body::to_bytes(resp.into_body(), usize::MAX)
            .await
            .unwrap();
        (disposition, body.to_vec())
    }

    async fn get_json(app: &Router, uri: &str) -> Value {
        let (_, body) = get(app, uri).await;
        assert_eq!(body.last(), Some(&b'\n'));
        serde_json::from_slice(&body).unwrap()
    }

    #[test]
    fn params_take_first_occurrence() {
        let pairs = vec![
            ("action".to_string(), "stat".to_string()),
            ("action".to_string(), "list".to_string()),
            ("download".to_string(), "TRUE".to_string()),
        ];
        let params = RequestParams::from_pairs(&pairs);
        assert_eq!(params.action, Action::Stat);
        assert_eq!(params.disposition, Disposition::Inline);
        assert!(params.extract.is_none());
    }

    #[test]
    fn disposition_header_format() {
        assert_eq!(
            content_disposition(Disposition::Attachment, "a b.txt"),
            "attachment; filename=\"a b.txt\""
        );
    }

    #[test]
    fn disposition_replaces_control_characters() {
        assert_eq!(
            content_disposition(Disposition::Inline, "a\nb\t.txt"),
            "inline; filename=\"a b .txt\""
        );
    }

    #[tokio::test]
    async fn control_character_in_name_still_downloads() {
        let f = fixture();
        fs::write(f.root.path().join("a\nb.txt"), b"xyz").unwrap();

        let (disposition, body) = get(&f.app, "/a%0Ab.txt").await;
        assert_eq!(body, b"xyz");
        assert_eq!(disposition.as_deref(), Some("inline; filename=\"a b.txt\""));
    }

    #[tokio::test]
    async fn default_download_is_inline() {
        let f = fixture();
        let (disposition, body) = get(&f.app, "/hello.txt").await;
        assert_eq!(body, b"abc");
        assert_eq!(
            disposition.as_deref(),
            Some("inline; filename=\"hello.txt\"")
        );
    }

    #[tokio::test]
    async fn download_true_is_attachment() {
        let f = fixture();
        let (disposition, body) = get(&f.app, "/hello.txt?download=true").await;
        assert_eq!(body, b"abc");
        assert_eq!(
            disposition.as_deref(),
            Some("attachment; filename=\"hello.txt\"")
        );
    }

    #[tokio::test]
    async fn unknown_action_downloads() {
        let f = fixture();
        let (disposition, body) = get(&f.app, "/hello.txt?action=bogus&download=yes").await;
        assert_eq!(body, b"abc");
        assert_eq!(
            disposition.as_deref(),
            Some("inline; filename=\"hello.txt\"")
        );
    }

    #[tokio::test]
    async fn large_file_streams_intact() {
        let f = fixture();
        let data: Vec<u8> = (0..(CHUNK_SIZE * 3 + 17)).map(|i| (i % 251) as u8).collect();
        fs::write(f.root.path().join("big.bin"), &data).unwrap();

        let (_, body) = get(&f.app, "/big.bin").await;
        assert_eq!(body, data);
    }

    #[tokio::test]
    async fn stat_file_has_zero_mtime() {
        let f = fixture();
        let v = get_json(&f.app, "/hello.txt?action=stat").await;
        assert_eq!(
            v,
            json!({
                "directory": false,
                "filename": "hello.txt",
                "size": 3,
                "mtime": "0001-01-01T00:00:00Z",
                "files": null
            })
        );
    }

    #[tokio::test]
    async fn list_directory_uses_parent_mtime() {
        let f = fixture();
        let v = get_json(&f.app, "/d?action=list").await;

        assert_eq!(v["directory"], json!(true));
        assert_eq!(v["filename"], json!("d"));
        let files = v["files"].as_array().unwrap();
        assert_eq!(files.len(), 2);
        assert_eq!(files[0]["filename"], json!("a"));
        assert_eq!(files[0]["size"], json!(1));
        assert_eq!(files[1]["filename"], json!("b"));
        assert_eq!(files[1]["size"], json!(2));
        for child in files {
            assert_eq!(child["mtime"], v["mtime"]);
            assert_eq!(child["directory"], json!(false));
        }
    }

    #[tokio::test]
    async fn stat_directory_lists_too() {
        let f = fixture();
        let v = get_json(&f.app, "/d?action=stat").await;
        assert_eq!(v["files"].as_array().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn root_listing_counts_entries() {
        let f = fixture();
        let v = get_json(&f.app, "/?action=list").await;
        let expected = fs::read_dir(f.root.path()).unwrap().count();
        assert_eq!(v["files"].as_array().unwrap().len(), expected);
    }

    #[tokio::test]
    async fn directory_with_other_action_fails() {
        let f = fixture();
        let v = get_json(&f.app, "/d?action=inspect").await;
        assert_eq!(v, json!({ "error": "Cannot open directory" }));

        let v = get_json(&f.app, "/d").await;
        assert_eq!(v, json!({ "error": "Cannot open directory" }));
    }

    #[tokio::test]
    async fn missing_path_reports_error() {
        let f = fixture();
        let v = get_json(&f.app, "/nope.txt?action=stat").await;
        assert!(v["error"].as_str().unwrap().starts_with("stat "));
    }

    #[tokio::test]
    async fn escaping_root_is_rejected() {
        let f = fixture();
        let v = get_json(&f.app, "/d/../../etc/passwd").await;
        assert!(v["error"]
            .as_str()
            .unwrap()
            .contains("escapes the root directory"));
    }

    #[tokio::test]
    async fn inspect_wraps_classifier_output() {
        let f = fixture();
        let v = get_json(&f.app, "/hello.txt?action=inspect").await;
        let expected = format!("{}: ASCII text\n", f.root.path().join("hello.txt").display());
        assert_eq!(v, json!({ "file": expected }));
    }

    #[tokio::test]
    async fn contents_lists_archive_members() {
        let f = fixture();
        let v = get_json(&f.app, "/pkg.zip?action=contents").await;

        assert_eq!(v["lines"], json!([]));
        let files = v["files"].as_array().unwrap();
        assert_eq!(files.len(), 2);
        assert_eq!(files[0]["filename"], json!("readme.md"));
        assert_eq!(files[0]["size"], json!(11));
        assert_eq!(files[0]["mtime"], json!("2024-03-01T12:30:45Z"));
        assert_eq!(files[1]["filename"], json!("src/main"));
        assert_eq!(files[1]["size"], json!(42));
    }

    #[tokio::test]
    async fn extract_streams_member() {
        let f = fixture();
        let (disposition, body) = get(&f.app, "/pkg.zip?action=extract&extract=readme.md").await;
        assert_eq!(body, b"hello world");
        assert_eq!(
            disposition.as_deref(),
            Some("inline; filename=\"readme.md\"")
        );
    }

    #[tokio::test]
    async fn extract_nested_member_uses_basename() {
        let f = fixture();
        let (disposition, body) = get(
            &f.app,
            "/pkg.zip?action=extract&extract=src/main&download=true",
        )
        .await;
        assert_eq!(body, b"hello world");
        assert_eq!(
            disposition.as_deref(),
            Some("attachment; filename=\"main\"")
        );
    }

    #[tokio::test]
    async fn extract_requires_member() {
        let f = fixture();
        let v = get_json(&f.app, "/pkg.zip?action=extract").await;
        assert_eq!(v, json!({ "error": "Extract required" }));

        let v = get_json(&f.app, "/pkg.zip?action=extract&extract=").await;
        assert_eq!(v, json!({ "error": "Extract required" }));
    }

    #[tokio::test]
    async fn missing_tool_reports_error() {
        let root = tempfile::tempdir().unwrap();
        fs::write(root.path().join("hello.txt"), b"abc").unwrap();
        let app = FileServer::new(root.path())
            .with_tools(Toolbox {
                classifier: Tool::new("/nonexistent/classifier"),
                archiver: Tool::new("/nonexistent/archiver"),
            })
            .router();

        let v = get_json(&app, "/hello.txt?action=inspect").await;
        assert!(v["error"].as_str().unwrap().starts_with("exec /nonexistent/classifier"));

        let v = get_json(&app, "/hello.txt?action=extract&extract=x").await;
        assert!(v["error"].as_str().unwrap().starts_with("exec /nonexistent/archiver"));
    }

    #[tokio::test]
    async fn extract_removes_scratch_dir_after_body() {
        let f = fixture();
        let (_, body) = get(&f.app, "/pkg.zip?action=extract&extract=src/main").await;
        assert_eq!(body, b"hello world");

        let scratch = fs::read_to_string(f.tools.path().join("last_scratch")).unwrap();
        assert!(!scratch.is_empty());
        assert!(!Path::new(&scratch).exists());
    }

    #[tokio::test]
    async fn extract_of_unwritten_member_reports_open_error() {
        let root = tempfile::tempdir().unwrap();
        let tools_dir = tempfile::tempdir().unwrap();
        fs::write(root.path().join("pkg.zip"), b"PK").unwrap();
        let script = tools_dir.path().join("failing.sh");
        fs::write(&script, "exit 2\n").unwrap();

        let app = FileServer::new(root.path())
            .with_tools(Toolbox {
                archiver: Tool::new("sh").with_args([script]),
                ..Default::default()
            })
            .router();

        let (disposition, body) = get(&app, "/pkg.zip?action=extract&extract=missing").await;
        assert!(disposition.is_none());
        assert_eq!(body.last(), Some(&b'\n'));
        let v: Value = serde_json::from_slice(&body).unwrap();
        let obj = v.as_object().unwrap();
        assert_eq!(obj.len(), 1);
        let msg = obj["error"].as_str().unwrap();
        assert!(msg.starts_with("open "), "{msg}");
        assert!(msg.contains("missing"), "{msg}");
    }
}
