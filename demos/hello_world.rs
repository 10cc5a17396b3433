use ember_web::{
    middleware::{RateLimiter, Recovery},
    Cors, Method, Request, Response, Server, StatusCode,
};
use std::time::Duration;
use tracing_subscriber::EnvFilter;

fn greet(req: &mut Request) -> Response {
    let name = req.param("name").unwrap_or("world");
    Response::text(StatusCode::Ok, format!("Hello, {name}!"))
}

#[tokio::main]
async fn main() -> Result<(), ember_web::Error> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "debug".into()))
        .with_target(false)
        .init();

    Server::builder()
        .bind("127.0.0.1:8080".parse().unwrap())
        .middleware(Recovery)
        .middleware(RateLimiter::new(10, Duration::from_secs(1)))
        .cors(Cors::new().allow_origin("http://localhost:3000"))
        .route(Method::Get, "/", |_: &mut Request| {
            Response::html(StatusCode::Ok, "<h1>Hello, world!</h1>")
        })
        .route(Method::Get, "/hello/{name}", greet)
        .group("/api", |api| {
            api.route(Method::Get, "/time", |_: &mut Request| {
                let secs = std::time::SystemTime::now()
                    .duration_since(std::time::UNIX_EPOCH)
                    .map(|since| since.as_secs())
                    .unwrap_or(0);
                Response::json(StatusCode::Ok, format!(r#"{{"unix": {secs}}}"#))
            })
            .route(Method::Get, "/panic", |_: &mut Request| -> Response {
                panic!("recovered by the Recovery middleware")
            })
        })
        .build()?
        .launch_until(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await;

    Ok(())
}
