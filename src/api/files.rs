//! File management API
//!
//! Thin HTTP layer over [`FileGateway`] and [`ArchiveBuilder`]. Every path
//! in a response is the normalized remote path.

use axum::{
    body::Body,
    extract::{DefaultBodyLimit, Extension, Multipart, Query, RawQuery},
    http::header,
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tokio_util::io::ReaderStream;
use tracing::{debug, warn};
use uuid::Uuid;
use webtop_core::{ArchiveBuilder, DeleteKind, DirectoryListing, Error, FileGateway};

use super::response::{ApiResult, MutationResponse};
use crate::middleware::auth::RequireAuth;

/// Local directory where multipart uploads are staged
#[derive(Debug, Clone)]
pub struct UploadDir(pub PathBuf);

#[derive(Debug, Deserialize)]
pub struct PathQuery {
    path: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct PathBody {
    path: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RenameRequest {
    old_path: Option<String>,
    new_path: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct DeleteRequest {
    path: Option<String>,
    #[serde(alias = "type")]
    kind: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ContentRequest {
    path: Option<String>,
    content: Option<String>,
}

/// Non-blank required field
fn required(value: Option<String>, field: &str) -> Result<String, Error> {
    value
        .filter(|v| !v.trim().is_empty())
        .ok_or_else(|| Error::InvalidInput(format!("missing field: {}", field)))
}

/// `attachment` disposition with an ASCII fallback and an RFC 5987 name
fn content_disposition(filename: &str) -> String {
    let fallback: String = filename
        .chars()
        .map(|c| {
            if c.is_ascii_graphic() && c != '"' && c != '\\' || c == ' ' {
                c
            } else {
                '_'
            }
        })
        .collect();
    let encoded: String = filename
        .bytes()
        .map(|b| {
            if b.is_ascii_alphanumeric() || b"!#$&+-.^_`|~".contains(&b) {
                (b as char).to_string()
            } else {
                format!("%{:02X}", b)
            }
        })
        .collect();
    format!(
        "attachment; filename=\"{}\"; filename*=UTF-8''{}",
        fallback, encoded
    )
}

/// List a directory (`/` when `path` is absent)
async fn list_files(
    RequireAuth(_user): RequireAuth,
    Extension(files): Extension<FileGateway>,
    Query(query): Query<PathQuery>,
) -> ApiResult<Json<DirectoryListing>> {
    let dir = query.path.filter(|p| !p.trim().is_empty());
    Ok(Json(files.list(dir.as_deref()).await?))
}

/// File text as `text/plain`
async fn file_content(
    RequireAuth(_user): RequireAuth,
    Extension(files): Extension<FileGateway>,
    Query(query): Query<PathQuery>,
) -> ApiResult<Response> {
    let path = required(query.path, "path")?;
    let (path, text) = files.read_content(&path).await?;
    debug!(path = %path, bytes = text.len(), "Serving file content");
    Ok((
        [
            (header::CONTENT_TYPE, "text/plain; charset=utf-8".to_string()),
            (header::HeaderName::from_static("x-file-path"), path),
        ],
        text,
    )
        .into_response())
}

/// Stream one remote file
async fn download_file(
    RequireAuth(_user): RequireAuth,
    Extension(files): Extension<FileGateway>,
    Query(query): Query<PathQuery>,
) -> ApiResult<Response> {
    let path = required(query.path, "path")?;
    let download = files.download(&path).await?;
    debug!(path = %download.path, size = download.size, "Streaming download");

    let body = Body::from_stream(ReaderStream::new(download.reader));
    Ok((
        [
            (header::CONTENT_TYPE, "application/octet-stream".to_string()),
            (header::CONTENT_LENGTH, download.size.to_string()),
            (
                header::CONTENT_DISPOSITION,
                content_disposition(&download.filename),
            ),
        ],
        body,
    )
        .into_response())
}

/// Repeated `path` parameters from a raw query string
fn query_paths(raw: Option<&str>) -> Result<Vec<String>, Error> {
    let Some(raw) = raw else {
        return Ok(Vec::new());
    };
    let pairs: Vec<(String, String)> = serde_urlencoded::from_str(raw)
        .map_err(|e| Error::InvalidInput(format!("malformed query: {}", e)))?;
    Ok(pairs
        .into_iter()
        .filter(|(key, _)| key == "path" || key == "path[]")
        .map(|(_, value)| value)
        .collect())
}

/// Stream a zip of every requested path
async fn package_download(
    RequireAuth(_user): RequireAuth,
    Extension(archives): Extension<ArchiveBuilder>,
    RawQuery(raw): RawQuery,
) -> ApiResult<Response> {
    let paths = query_paths(raw.as_deref())?;
    let archive = archives.build(&paths).await?;

    let body = Body::from_stream(archive.stream);
    Ok((
        [
            (header::CONTENT_TYPE, "application/zip".to_string()),
            (header::CONTENT_LENGTH, archive.size.to_string()),
            (
                header::CONTENT_DISPOSITION,
                content_disposition(&archive.filename),
            ),
        ],
        body,
    )
        .into_response())
}

#[derive(Default)]
struct UploadForm {
    dest: Option<String>,
    staged: Option<(String, PathBuf)>,
}

fn multipart_error(err: axum::extract::multipart::MultipartError) -> Error {
    Error::InvalidInput(format!("malformed upload: {}", err))
}

async fn stage_field(
    mut field: axum::extract::multipart::Field<'_>,
    local: &Path,
) -> Result<(), Error> {
    let mut file = tokio::fs::File::create(local).await?;
    while let Some(chunk) = field.chunk().await.map_err(multipart_error)? {
        file.write_all(&chunk).await?;
    }
    file.flush().await?;
    Ok(())
}

async fn read_form(
    multipart: &mut Multipart,
    upload_dir: &Path,
    form: &mut UploadForm,
) -> Result<(), Error> {
    while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
        let name = field.name().map(str::to_owned);
        match name.as_deref() {
            Some("path") => form.dest = Some(field.text().await.map_err(multipart_error)?),
            Some("file") if form.staged.is_none() => {
                let filename = field.file_name().unwrap_or_default().to_string();
                let local = upload_dir.join(format!("upload-{}", Uuid::new_v4().simple()));
                // Record before writing so a partial file is still removed
                form.staged = Some((filename, local.clone()));
                stage_field(field, &local).await?;
            }
            _ => {}
        }
    }
    Ok(())
}

/// Store a multipart `file` under the `path` directory
async fn upload_file(
    RequireAuth(_user): RequireAuth,
    Extension(files): Extension<FileGateway>,
    Extension(uploads): Extension<UploadDir>,
    mut multipart: Multipart,
) -> ApiResult<Json<MutationResponse>> {
    let mut form = UploadForm::default();
    let read = read_form(&mut multipart, &uploads.0, &mut form).await;

    let staged = match (read, form.staged) {
        (Ok(()), Some(staged)) => staged,
        (result, staged) => {
            if let Some((_, local)) = staged {
                if let Err(e) = tokio::fs::remove_file(&local).await {
                    warn!(local = %local.display(), error = %e, "Failed to remove upload temp file");
                }
            }
            result?;
            return Err(Error::InvalidInput("no file uploaded".to_string()).into());
        }
    };

    let (filename, local) = staged;
    let dest = match required(form.dest, "path") {
        Ok(dest) => dest,
        Err(e) => {
            let _ = tokio::fs::remove_file(&local).await;
            return Err(e.into());
        }
    };
    let path = files.upload(&dest, &filename, &local).await?;
    Ok(MutationResponse::ok(format!("File uploaded to {}", path), path))
}

async fn rename_entry(
    RequireAuth(_user): RequireAuth,
    Extension(files): Extension<FileGateway>,
    Json(request): Json<RenameRequest>,
) -> ApiResult<Json<MutationResponse>> {
    let old_path = required(request.old_path, "oldPath")?;
    let new_path = required(request.new_path, "newPath")?;
    let path = files.rename(&old_path, &new_path).await?;
    Ok(MutationResponse::ok(format!("Renamed to {}", path), path))
}

async fn delete_entry(
    RequireAuth(_user): RequireAuth,
    Extension(files): Extension<FileGateway>,
    Json(request): Json<DeleteRequest>,
) -> ApiResult<Json<MutationResponse>> {
    let path = required(request.path, "path")?;
    let kind: DeleteKind = required(request.kind, "kind")?.parse()?;
    let path = files.delete(&path, kind).await?;
    Ok(MutationResponse::ok(format!("Deleted {}", path), path))
}

async fn make_directory(
    RequireAuth(_user): RequireAuth,
    Extension(files): Extension<FileGateway>,
    Json(request): Json<PathBody>,
) -> ApiResult<Json<MutationResponse>> {
    let path = required(request.path, "path")?;
    let path = files.mkdir(&path).await?;
    Ok(MutationResponse::ok(format!("Directory {} created", path), path))
}

async fn touch_file(
    RequireAuth(_user): RequireAuth,
    Extension(files): Extension<FileGateway>,
    Json(request): Json<ContentRequest>,
) -> ApiResult<Json<MutationResponse>> {
    let path = required(request.path, "path")?;
    let path = files.touch(&path, request.content.as_deref()).await?;
    Ok(MutationResponse::ok(format!("File {} created", path), path))
}

async fn save_file(
    RequireAuth(_user): RequireAuth,
    Extension(files): Extension<FileGateway>,
    Json(request): Json<ContentRequest>,
) -> ApiResult<Json<MutationResponse>> {
    let path = required(request.path, "path")?;
    let content = request
        .content
        .ok_or_else(|| Error::InvalidInput("missing field: content".to_string()))?;
    let path = files.write(&path, content.as_bytes()).await?;
    Ok(MutationResponse::ok(format!("File saved to {}", path), path))
}

/// Create file routes
pub fn files_routes() -> Router {
    Router::new()
        .route("/api/files", get(list_files))
        .route("/api/file-content", get(file_content))
        .route("/api/download", get(download_file))
        .route("/api/package-download", get(package_download))
        .route(
            "/api/upload",
            post(upload_file).layer(DefaultBodyLimit::disable()),
        )
        .route("/api/rename", post(rename_entry))
        .route("/api/delete", delete(delete_entry))
        .route("/api/mkdir", post(make_directory))
        .route("/api/touch", post(touch_file))
        .route(
            "/api/save-file",
            post(save_file).layer(DefaultBodyLimit::disable()),
        )
}
