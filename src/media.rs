//! Streaming of non-JSON request bodies to temporary files.
//!
//! A request whose `Content-Type` is present and not JSON, with a positive
//! `Content-Length`, is not kept in memory. Its body is written to
//! `<upload_dir>/upload_<random><ext>` in chunks of
//! [`file_chunk`](crate::limits::ReqLimits::file_chunk) bytes and described by
//! an [`Upload`], available through [`Request::upload`](crate::Request::upload).
//!
//! For `multipart/form-data` with a `boundary` parameter only the payload of
//! the first part is written, and its `filename="..."` is kept.

use crate::{errors::ErrorKind, limits::ReqLimits};
use memchr::memmem;
use std::{
    path::{Path, PathBuf},
    time::Duration,
};
use tokio::{
    fs::OpenOptions,
    io::{AsyncRead, AsyncReadExt, AsyncWriteExt},
    time::timeout,
};

/// A request body saved to disk.
///
/// The file is not removed by the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Upload {
    path: PathBuf,
    filename: Option<String>,
    size: u64,
    content_type: String,
}

impl Upload {
    /// Location of the saved body.
    #[inline(always)]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Client-side file name from a multipart part header, if any.
    #[inline(always)]
    pub fn filename(&self) -> Option<&str> {
        self.filename.as_deref()
    }

    /// Bytes written to the file.
    #[inline(always)]
    pub const fn size(&self) -> u64 {
        self.size
    }

    /// `Content-Type` of the request.
    #[inline(always)]
    pub fn content_type(&self) -> &str {
        &self.content_type
    }
}

const EXTENSIONS: &[(&str, &str)] = &[
    ("text/html", ".html"),
    ("text/plain", ".txt"),
    ("application/xml", ".xml"),
    ("text/css", ".css"),
    ("text/csv", ".csv"),
    ("application/json", ".json"),
    ("application/x-www-form-urlencoded", ".txt"),
    ("multipart/form-data", ".bin"),
    ("application/octet-stream", ".bin"),
    ("application/javascript", ".js"),
    ("image/png", ".png"),
    ("image/jpeg", ".jpg"),
    ("image/gif", ".gif"),
    ("image/webp", ".webp"),
    ("image/svg+xml", ".svg"),
    ("image/bmp", ".bmp"),
    ("audio/mpeg", ".mp3"),
    ("audio/wav", ".wav"),
    ("audio/ogg", ".ogg"),
    ("video/mp4", ".mp4"),
    ("video/webm", ".webm"),
    ("video/x-msvideo", ".avi"),
    ("application/zip", ".zip"),
    ("application/vnd.rar", ".rar"),
    ("application/x-7z-compressed", ".7z"),
    ("application/pdf", ".pdf"),
    ("application/msword", ".doc"),
    (
        "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
        ".docx",
    ),
    ("application/vnd.ms-excel", ".xls"),
    (
        "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
        ".xlsx",
    ),
    ("font/woff", ".woff"),
    ("font/woff2", ".woff2"),
    ("font/ttf", ".ttf"),
    ("font/otf", ".otf"),
];

/// File extension for a `Content-Type`: the first table entry contained in
/// it, or `.tmp`.
///
/// # Examples
/// ```
/// use ember_web::media::extension_for;
///
/// assert_eq!(extension_for("image/png"), ".png");
/// assert_eq!(extension_for("text/plain; charset=utf-8"), ".txt");
/// assert_eq!(extension_for("application/x-unknown"), ".tmp");
/// ```
pub fn extension_for(content_type: &str) -> &'static str {
    EXTENSIONS
        .iter()
        .find(|(mime, _)| content_type.contains(mime))
        .map_or(".tmp", |&(_, ext)| ext)
}

/// `Content-Type` for a file served from disk, by extension.
pub fn content_type_for_path(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_default();

    match ext.as_str() {
        "html" | "htm" => "text/html",
        "txt" => "text/plain",
        "css" => "text/css",
        "csv" => "text/csv",
        "xml" => "application/xml",
        "js" | "mjs" => "application/javascript",
        "json" => "application/json",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "svg" => "image/svg+xml",
        "bmp" => "image/bmp",
        "ico" => "image/x-icon",
        "mp3" => "audio/mpeg",
        "wav" => "audio/wav",
        "ogg" => "audio/ogg",
        "mp4" => "video/mp4",
        "webm" => "video/webm",
        "pdf" => "application/pdf",
        "zip" => "application/zip",
        "wasm" => "application/wasm",
        "woff" => "font/woff",
        "woff2" => "font/woff2",
        "ttf" => "font/ttf",
        "otf" => "font/otf",
        _ => "application/octet-stream",
    }
}

/// `boundary` parameter of a `multipart/form-data` content type.
pub(crate) fn multipart_boundary(content_type: &str) -> Option<&str> {
    if !content_type.contains("multipart/form-data") {
        return None;
    }

    let start = content_type.find("boundary=")? + "boundary=".len();
    let value = content_type[start..].split(';').next()?.trim().trim_matches('"');

    (!value.is_empty()).then_some(value)
}

/// Writes the body to a new temporary file: `buffered` first, then the rest
/// of `content_length` read from `stream`.
pub(crate) async fn stream_to_file<S: AsyncRead + Unpin>(
    stream: &mut S,
    buffered: &[u8],
    content_type: &str,
    content_length: usize,
    limits: &ReqLimits,
    read_timeout: Duration,
) -> Result<Upload, ErrorKind> {
    let path = limits.upload_dir.join(format!(
        "upload_{}{}",
        fastrand::u64(..),
        extension_for(content_type)
    ));

    let result = write_body(
        stream,
        &path,
        buffered,
        content_type,
        content_length,
        limits.file_chunk,
        read_timeout,
    )
    .await;

    match result {
        Ok((size, filename)) => {
            tracing::debug!(path = %path.display(), size, "body saved");
            Ok(Upload {
                path,
                filename,
                size,
                content_type: content_type.to_owned(),
            })
        }
        Err(err) => {
            let _ = tokio::fs::remove_file(&path).await;
            Err(err)
        }
    }
}

async fn write_body<S: AsyncRead + Unpin>(
    stream: &mut S,
    path: &Path,
    buffered: &[u8],
    content_type: &str,
    content_length: usize,
    file_chunk: usize,
    read_timeout: Duration,
) -> Result<(u64, Option<String>), ErrorKind> {
    let fs_error = |err: std::io::Error| {
        tracing::error!(path = %path.display(), error = %err, "upload failed");
        ErrorKind::Upload
    };

    let mut file = OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)
        .await
        .map_err(fs_error)?;

    let mut scanner = multipart_boundary(content_type).map(MultipartScanner::new);
    let mut out = Vec::new();
    let mut size = 0u64;

    let head = &buffered[..buffered.len().min(content_length)];
    let mut remaining = content_length - head.len();
    let mut chunk = vec![0; file_chunk.clamp(1, remaining.max(1))];
    let mut next = head;

    loop {
        let data = match scanner.as_mut() {
            Some(scanner) => {
                out.clear();
                scanner.feed(next, &mut out);
                &out[..]
            }
            None => next,
        };
        file.write_all(data).await.map_err(fs_error)?;
        size += data.len() as u64;

        if remaining == 0 {
            break;
        }

        let want = remaining.min(chunk.len());
        let n = timeout(read_timeout, stream.read(&mut chunk[..want]))
            .await
            .map_err(|_| ErrorKind::Timeout)??;
        if n == 0 {
            return Err(ErrorKind::ConnectionClosed);
        }

        remaining -= n;
        next = &chunk[..n];
    }

    let filename = match scanner {
        Some(mut scanner) => {
            out.clear();
            scanner.finish(&mut out);
            file.write_all(&out).await.map_err(fs_error)?;
            size += out.len() as u64;
            scanner.filename
        }
        None => None,
    };

    file.flush().await.map_err(fs_error)?;
    Ok((size, filename))
}

#[derive(Debug, PartialEq)]
enum State {
    Preamble,
    Payload,
    Done,
}

/// Incremental extractor of the first multipart part's payload.
///
/// Holds back up to `marker.len() - 1` bytes between chunks so a boundary
/// split across two reads is still found.
#[derive(Debug)]
pub(crate) struct MultipartScanner {
    marker: Vec<u8>,
    state: State,
    pending: Vec<u8>,
    filename: Option<String>,
}

impl MultipartScanner {
    pub(crate) fn new(boundary: &str) -> Self {
        let mut marker = b"\r\n--".to_vec();
        marker.extend_from_slice(boundary.as_bytes());

        Self {
            marker,
            state: State::Preamble,
            pending: Vec::new(),
            filename: None,
        }
    }

    /// Appends the payload bytes found in `chunk` to `out`.
    pub(crate) fn feed(&mut self, chunk: &[u8], out: &mut Vec<u8>) {
        match self.state {
            State::Preamble => {
                self.pending.extend_from_slice(chunk);

                let Some(end) = memmem::find(&self.pending, b"\r\n\r\n") else {
                    return;
                };

                self.filename = parse_filename(&self.pending[..end]);
                self.state = State::Payload;

                let rest = self.pending.split_off(end + 4);
                self.pending.clear();
                self.feed(&rest, out);
            }
            State::Payload => {
                self.pending.extend_from_slice(chunk);

                if let Some(end) = memmem::find(&self.pending, &self.marker) {
                    out.extend_from_slice(&self.pending[..end]);
                    self.pending.clear();
                    self.state = State::Done;
                    return;
                }

                let keep = self.pending.len().min(self.marker.len() - 1);
                let ready = self.pending.len() - keep;
                out.extend(self.pending.drain(..ready));
            }
            State::Done => {}
        }
    }

    /// Flushes held-back bytes when the closing boundary never arrived.
    pub(crate) fn finish(&mut self, out: &mut Vec<u8>) {
        if self.state == State::Payload {
            out.append(&mut self.pending);
        }
        self.state = State::Done;
    }
}

fn parse_filename(headers: &[u8]) -> Option<String> {
    const KEY: &[u8] = b"filename=\"";

    let start = memmem::find(headers, KEY)? + KEY.len();
    let len = memchr::memchr(b'"', &headers[start..])?;

    Some(String::from_utf8_lossy(&headers[start..start + len]).into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{duplex, AsyncWriteExt};

    const MULTIPART: &[u8] = b"--XyZ\r\n\
        Content-Disposition: form-data; name=\"file\"; filename=\"notes.txt\"\r\n\
        Content-Type: text/plain\r\n\
        \r\n\
        line one\r\nline two\r\n--X not yet\
        \r\n--XyZ--\r\n";

    const PAYLOAD: &[u8] = b"line one\r\nline two\r\n--X not yet";

    #[test]
    fn extensions() {
        #[rustfmt::skip]
        let cases = [
            ("image/png",                                 ".png"),
            ("image/jpeg",                                ".jpg"),
            ("text/plain; charset=utf-8",                 ".txt"),
            ("application/x-www-form-urlencoded",         ".txt"),
            ("multipart/form-data; boundary=abc",         ".bin"),
            ("application/octet-stream",                  ".bin"),
            ("application/vnd.openxmlformats-officedocument.spreadsheetml.sheet", ".xlsx"),
            ("font/woff2",                                ".woff"),
            ("application/x-unknown",                     ".tmp"),
            ("",                                          ".tmp"),
        ];

        for (content_type, ext) in cases {
            assert_eq!(extension_for(content_type), ext, "{content_type:?}");
        }
    }

    #[test]
    fn path_content_types() {
        #[rustfmt::skip]
        let cases = [
            ("index.html",   "text/html"),
            ("INDEX.HTM",    "text/html"),
            ("app.js",       "application/javascript"),
            ("logo.jpeg",    "image/jpeg"),
            ("archive",      "application/octet-stream"),
            ("data.unknown", "application/octet-stream"),
        ];

        for (path, expected) in cases {
            assert_eq!(content_type_for_path(Path::new(path)), expected);
        }
    }

    #[test]
    fn boundaries() {
        #[rustfmt::skip]
        let cases = [
            ("multipart/form-data; boundary=XyZ",           Some("XyZ")),
            ("multipart/form-data; boundary=\"a b\"",       Some("a b")),
            ("multipart/form-data; boundary=XyZ; charset=x", Some("XyZ")),
            ("multipart/form-data",                          None),
            ("multipart/form-data; boundary=",               None),
            ("text/plain; boundary=XyZ",                     None),
        ];

        for (content_type, expected) in cases {
            assert_eq!(multipart_boundary(content_type), expected, "{content_type:?}");
        }
    }

    #[test]
    fn scanner_any_chunking() {
        for chunk_size in [1, 2, 3, 7, 16, MULTIPART.len()] {
            let mut scanner = MultipartScanner::new("XyZ");
            let mut out = Vec::new();

            for chunk in MULTIPART.chunks(chunk_size) {
                scanner.feed(chunk, &mut out);
            }
            scanner.finish(&mut out);

            assert_eq!(out, PAYLOAD, "chunk size {chunk_size}");
            assert_eq!(scanner.filename.as_deref(), Some("notes.txt"));
        }
    }

    #[test]
    fn scanner_without_closing_boundary() {
        let mut scanner = MultipartScanner::new("XyZ");
        let mut out = Vec::new();

        scanner.feed(b"--XyZ\r\nContent-Disposition: form-data; name=\"a\"\r\n\r\nabc", &mut out);
        scanner.finish(&mut out);

        assert_eq!(out, b"abc");
        assert_eq!(scanner.filename, None);
    }

    fn limits() -> ReqLimits {
        ReqLimits {
            file_chunk: 4,
            ..ReqLimits::default()
        }
    }

    #[tokio::test]
    async fn raw_body_to_file() {
        let (mut client, mut server) = duplex(64);
        client.write_all(b", world!").await.unwrap();

        let upload = stream_to_file(
            &mut server,
            b"Hello",
            "application/octet-stream",
            13,
            &limits(),
            Duration::from_secs(1),
        )
        .await
        .unwrap();

        assert_eq!(upload.size(), 13);
        assert_eq!(upload.filename(), None);
        assert_eq!(upload.content_type(), "application/octet-stream");
        assert!(upload.path().to_string_lossy().ends_with(".bin"));
        assert_eq!(tokio::fs::read(upload.path()).await.unwrap(), b"Hello, world!");

        tokio::fs::remove_file(upload.path()).await.unwrap();
    }

    #[tokio::test]
    async fn buffered_beyond_length_is_ignored() {
        let (_client, mut server) = duplex(64);

        let upload = stream_to_file(
            &mut server,
            b"abcdef",
            "text/csv",
            3,
            &limits(),
            Duration::from_secs(1),
        )
        .await
        .unwrap();

        assert_eq!(tokio::fs::read(upload.path()).await.unwrap(), b"abc");
        tokio::fs::remove_file(upload.path()).await.unwrap();
    }

    #[tokio::test]
    async fn multipart_to_file() {
        let (mut client, mut server) = duplex(1024);
        let (first, rest) = MULTIPART.split_at(20);
        client.write_all(rest).await.unwrap();

        let upload = stream_to_file(
            &mut server,
            first,
            "multipart/form-data; boundary=XyZ",
            MULTIPART.len(),
            &limits(),
            Duration::from_secs(1),
        )
        .await
        .unwrap();

        assert_eq!(upload.filename(), Some("notes.txt"));
        assert_eq!(upload.size(), PAYLOAD.len() as u64);
        assert_eq!(tokio::fs::read(upload.path()).await.unwrap(), PAYLOAD);

        tokio::fs::remove_file(upload.path()).await.unwrap();
    }

    #[tokio::test]
    async fn timeout_removes_partial_file() {
        let (_client, mut server) = duplex(64);
        let limits = ReqLimits {
            upload_dir: std::env::temp_dir().join(format!("ember_web_{}", fastrand::u64(..))),
            ..limits()
        };
        tokio::fs::create_dir_all(&limits.upload_dir).await.unwrap();

        let result = stream_to_file(
            &mut server,
            b"ab",
            "image/png",
            10,
            &limits,
            Duration::from_millis(20),
        )
        .await;
        assert_eq!(result, Err(ErrorKind::Timeout));

        let mut entries = tokio::fs::read_dir(&limits.upload_dir).await.unwrap();
        assert!(entries.next_entry().await.unwrap().is_none());

        tokio::fs::remove_dir(&limits.upload_dir).await.unwrap();
    }

    #[tokio::test]
    async fn missing_directory_is_upload_error() {
        let (_client, mut server) = duplex(64);
        let limits = ReqLimits {
            upload_dir: PathBuf::from("/nonexistent/ember_web/uploads"),
            ..limits()
        };

        let result = stream_to_file(&mut server, b"a", "image/png", 1, &limits, Duration::from_secs(1)).await;
        assert_eq!(result, Err(ErrorKind::Upload));
    }
}
