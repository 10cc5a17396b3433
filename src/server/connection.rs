use crate::{
    cors::Cors,
    errors::ErrorKind,
    http::{reader::Reader, request::Request, response::Response, types::mime},
    media,
    server::{access_log::Entry, server_impl::Shared},
    Method,
};
use std::{net::SocketAddr, time::Instant};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tracing::{debug, warn};

/// Serves exactly one request on `stream`, then closes it.
pub(crate) async fn serve<S>(mut stream: S, peer: SocketAddr, shared: &Shared)
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let started = Instant::now();
    let mut reader = Reader::new(shared.req_limits.buffer_size);

    let mut request = match read_request(&mut stream, &mut reader, peer, shared).await {
        Ok(request) => request,
        Err(err) => {
            debug!(client = %peer, error = %err, "rejected request head");
            if let Some(response) = err.into_response() {
                let _ = writer::send(&mut stream, &response, None, false, shared).await;

                if let Some(log) = &shared.access_log {
                    log.record(&Entry {
                        client_ip: &peer.ip().to_string(),
                        method: "-",
                        path: "-",
                        protocol: "-",
                        status: response.status().as_u16(),
                        body_size: response.body().len(),
                        user_agent: "-",
                        elapsed: started.elapsed(),
                    });
                }
            }
            return writer::close(stream).await;
        }
    };

    let Some(response) = respond(&mut stream, &mut reader, &mut request, shared).await else {
        debug!(client = %peer, path = request.path(), "connection lost");
        return writer::close(stream).await;
    };

    let cors = shared.cors.as_ref().and_then(|cors| {
        cors.allowed_origin(request.header("origin"))
            .map(|origin| (cors, origin))
    });
    let head_only = request.method() == Method::Head;

    if let Err(err) = writer::send(&mut stream, &response, cors, head_only, shared).await {
        debug!(client = %peer, error = %err, "failed to write response");
    }

    let elapsed = started.elapsed();
    debug!(
        client = request.client_ip(),
        method = request.method().as_str(),
        path = request.path(),
        status = response.status().as_u16(),
        elapsed_ms = elapsed.as_millis() as u64,
        "request served"
    );

    if let Some(log) = &shared.access_log {
        log.record(&Entry {
            client_ip: request.client_ip(),
            method: request.method().as_str(),
            path: request.path(),
            protocol: request.protocol(),
            status: response.status().as_u16(),
            body_size: response.body().len(),
            user_agent: request.user_agent().unwrap_or("-"),
            elapsed,
        });
    }

    writer::close(stream).await
}

#[inline]
async fn read_request<S: AsyncRead + Unpin>(
    stream: &mut S,
    reader: &mut Reader,
    peer: SocketAddr,
    shared: &Shared,
) -> Result<Request, ErrorKind> {
    let head = reader
        .read_head(
            stream,
            shared.conn_limits.idle_timeout,
            shared.conn_limits.read_timeout,
        )
        .await?;

    Request::decode(
        head,
        peer,
        &shared.req_limits,
        shared.server_limits.trust_forwarded_for,
    )
}

/// Produces the response for a decoded request, or `None` when the client is
/// gone and nothing should be written.
async fn respond<S: AsyncRead + Unpin>(
    stream: &mut S,
    reader: &mut Reader,
    request: &mut Request,
    shared: &Shared,
) -> Option<Response> {
    // Preflight: answered before the body, the middleware and the routes
    if request.method() == Method::Options {
        return Some(Response::no_content());
    }

    if let Err(err) = read_body(stream, reader, request, shared).await {
        debug!(path = request.path(), error = %err, "failed to receive body");
        return err.into_response();
    }

    let response = dispatch(request, shared).await;
    if !request.handler_invoked {
        discard_upload(request).await;
    }
    response
}

/// Routes the request and runs the pipeline.
async fn dispatch(request: &mut Request, shared: &Shared) -> Option<Response> {
    let mut params = Vec::new();
    let Some(handler) = shared.router.find(
        request.method(),
        request.path(),
        shared.req_limits.max_params,
        &mut params,
    ) else {
        return ErrorKind::NotFound.into_response();
    };
    request.params = params;

    Some(shared.pipeline.run(handler.as_ref(), request).await)
}

/// Removes a streamed body no handler got to see: a route miss or an
/// aborting middleware.
async fn discard_upload(request: &mut Request) {
    let Some(upload) = request.take_upload() else {
        return;
    };

    match tokio::fs::remove_file(upload.path()).await {
        Ok(()) => debug!(path = %upload.path().display(), "unclaimed upload removed"),
        Err(err) => warn!(
            path = %upload.path().display(),
            error = %err,
            "failed to remove unclaimed upload"
        ),
    }
}

/// Buffers a JSON or untyped body; streams any other typed body to disk.
async fn read_body<S: AsyncRead + Unpin>(
    stream: &mut S,
    reader: &mut Reader,
    request: &mut Request,
    shared: &Shared,
) -> Result<(), ErrorKind> {
    let length = request.content_length();
    if length == 0 {
        return Ok(());
    }
    let timeout = shared.conn_limits.read_timeout;

    match request.content_type() {
        Some(content_type) if !content_type.contains(mime::JSON) => {
            let content_type = content_type.to_owned();
            let upload = media::stream_to_file(
                stream,
                reader.buffered_body(),
                &content_type,
                length,
                &shared.req_limits,
                timeout,
            )
            .await?;
            request.set_upload(upload);
        }
        _ => {
            let body = reader.read_body(stream, length, timeout).await?.to_vec();
            request.set_body(body);
        }
    }

    Ok(())
}

pub(crate) mod writer {
    use super::*;
    use std::io;
    use tokio::time::timeout;

    /// Writes the head, then the body unless `head_only`, each bounded by
    /// the write timeout.
    pub(crate) async fn send<S: AsyncWrite + Unpin>(
        stream: &mut S,
        response: &Response,
        cors: Option<(&Cors, &str)>,
        head_only: bool,
        shared: &Shared,
    ) -> Result<(), io::Error> {
        let limit = shared.conn_limits.write_timeout;

        timeout(limit, stream.write_all(&response.encode_head(cors))).await??;
        if !head_only && !response.body().is_empty() {
            timeout(limit, stream.write_all(response.body())).await??;
        }
        timeout(limit, stream.flush()).await?
    }

    #[inline]
    pub(crate) async fn close<S: AsyncWrite + Unpin>(mut stream: S) {
        let _ = stream.shutdown().await;
    }
}
