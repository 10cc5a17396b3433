//! ```text
//! curl --data-binary @photo.png -H 'Content-Type: image/png' localhost:8080/upload
//! curl -F 'file=@notes.txt' localhost:8080/upload
//! ```
use ember_web::{
    limits::ReqLimits, AccessLog, Method, Request, Response, Server, StatusCode,
};
use tracing_subscriber::EnvFilter;

fn upload(req: &mut Request) -> Response {
    match req.upload() {
        Some(file) => Response::json_value(
            StatusCode::Created,
            &serde_json::json!({
                "path": file.path(),
                "filename": file.filename(),
                "size": file.size(),
                "content_type": file.content_type(),
            }),
        ),
        None => Response::error(StatusCode::BadRequest, "expected a file body"),
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "debug".into()))
        .init();

    let upload_dir = std::env::temp_dir().join("ember_web_uploads");
    tokio::fs::create_dir_all(&upload_dir).await?;

    Server::builder()
        .bind("127.0.0.1:8080".parse()?)
        .access_log(AccessLog::new("logs"))
        .request_limits(ReqLimits {
            upload_dir,
            ..ReqLimits::default()
        })
        .route(Method::Post, "/upload", upload)
        .route(Method::Get, "/", |_: &mut Request| index())
        .build()?
        .launch()
        .await;

    Ok(())
}

fn index() -> Response {
    Response::html(
        StatusCode::Ok,
        r#"<form method="post" action="/upload" enctype="multipart/form-data">
<input type="file" name="file"><button>Upload</button></form>"#,
    )
}
