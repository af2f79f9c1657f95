//! `/files` endpoints: XML status and listings, share/unshare form posts.

use axum::extract::{Query, State};
use axum::http::{header, HeaderValue};
use axum::response::{IntoResponse, Response};
use axum::Form;
use fshare_files::{ListEntry, Listing, ShareStatus};
use serde::Deserialize;
use tracing::debug;

use crate::server::{ApiError, SharedState};

const XML_PROLOG: &str = "<?xml version='1.0' encoding='UTF-8'?>";

const SIZE_UNITS: [&str; 6] = ["k", "M", "G", "T", "P", "E"];

/// Query string of `GET /files`.
#[derive(Debug, Deserialize)]
pub struct FilesQuery {
    #[serde(default)]
    pub section: Option<String>,

    /// Comma-joined segment tokens of the directory to list.
    #[serde(default)]
    pub path: Option<String>,
}

/// Form body of `POST /files`.
#[derive(Debug, Deserialize)]
pub struct FilesForm {
    #[serde(default)]
    pub action: Option<String>,

    /// Plain filesystem path to share.
    #[serde(default)]
    pub file: Option<String>,

    /// Whole-path tokens of files to unshare.
    #[serde(default)]
    pub files: Option<String>,

    /// Whole-path tokens of directories to unshare.
    #[serde(default)]
    pub directories: Option<String>,
}

/// GET /files?section=status|files[&path=..]
pub async fn handle_get_files(
    State(state): State<SharedState>,
    Query(query): Query<FilesQuery>,
) -> Result<Response, ApiError> {
    state.record_request();
    let body = match query.section.as_deref() {
        Some("status") => render_status(&state.files.status()),
        Some("files") => {
            let listing = state.files.list(query.path.as_deref())?;
            render_listing(&listing)
        }
        Some(other) => {
            return Err(ApiError::bad_request(format!("unknown section: {other}")));
        }
        None => return Err(ApiError::bad_request("missing section parameter")),
    };
    Ok(xml_response(body))
}

/// POST /files (form): `action=share` or `action=unshareFile`
pub async fn handle_post_files(
    State(state): State<SharedState>,
    Form(form): Form<FilesForm>,
) -> Result<Response, ApiError> {
    state.record_request();
    match form.action.as_deref() {
        Some("share") => {
            let file = form.file.as_deref().unwrap_or_default();
            let shared = state.files.share(file)?;
            debug!("share request for {} accepted", shared.path.display());
        }
        Some("unshareFile") => {
            let summary = state.files.unshare(
                non_empty(form.files.as_deref()),
                non_empty(form.directories.as_deref()),
            )?;
            debug!(
                "unshare request removed {} files and {} directory entries",
                summary.files, summary.directory_files
            );
        }
        Some(other) => {
            return Err(ApiError::bad_request(format!("unknown action: {other}")));
        }
        None => return Err(ApiError::bad_request("missing action parameter")),
    }
    Ok(state.after_post())
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.filter(|v| !v.is_empty())
}

pub fn render_status(status: &ShareStatus) -> String {
    let mut out = String::from(XML_PROLOG);
    out.push_str("<Status>");
    out.push_str(&format!("<Count>{}</Count>", status.count));
    if let Some(hashing) = &status.hashing {
        out.push_str("<Hashing>");
        out.push_str(&escape_xml(&hashing.to_string_lossy()));
        out.push_str("</Hashing>");
    }
    out.push_str("</Status>");
    out
}

pub fn render_listing(listing: &Listing) -> String {
    let mut out = String::from(XML_PROLOG);
    out.push_str("<Files>");
    // non-UTF-8 names are rendered lossily
    for entry in listing {
        match entry {
            ListEntry::File { name, size } => {
                out.push_str("<File><Name>");
                out.push_str(&escape_xml(&name.to_string_lossy()));
                out.push_str("</Name><Size>");
                out.push_str(&format_size_2_decimal(*size));
                out.push_str("</Size></File>");
            }
            ListEntry::Directory { name } => {
                out.push_str("<Directory>");
                out.push_str(&escape_xml(&name.to_string_lossy()));
                out.push_str("</Directory>");
            }
        }
    }
    out.push_str("</Files>");
    out
}

/// Byte count in decimal units with two decimals, e.g. `10.00 kB`.
pub fn format_size_2_decimal(bytes: u64) -> String {
    if bytes < 1000 {
        return format!("{bytes} B");
    }
    let mut value = bytes as f64;
    let mut unit = 0;
    value /= 1000.0;
    while value >= 1000.0 && unit + 1 < SIZE_UNITS.len() {
        value /= 1000.0;
        unit += 1;
    }
    format!("{value:.2} {}B", SIZE_UNITS[unit])
}

pub fn escape_xml(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            _ => out.push(c),
        }
    }
    out
}

fn xml_response(body: String) -> Response {
    let mut response = body.into_response();
    let headers = response.headers_mut();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("text/xml; charset=utf-8"),
    );
    headers.insert(
        header::CACHE_CONTROL,
        HeaderValue::from_static("no-store, max-age=0, no-cache, must-revalidate"),
    );
    headers.insert(header::PRAGMA, HeaderValue::from_static("no-cache"));
    headers.insert(header::EXPIRES, HeaderValue::from_static("0"));
    response
}
