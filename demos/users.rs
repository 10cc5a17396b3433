//! Run from the crate root:
//! ```text
//! curl -X POST localhost:8080/users -H 'Accept-Language: ru' \
//!      -H 'Content-Type: application/json' -d '{"email": "kate@example.com"}'
//! ```
use ember_web::{
    i18n::Translations,
    validation::{Field, Schema, Validator},
    Method, Request, Response, Server, StatusCode,
};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, PoisonError};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct User {
    #[serde(default)]
    id: u64,
    email: String,
    #[serde(skip_serializing)]
    password: String,
    #[serde(default)]
    phone: Option<String>,
}

struct Users {
    schemas: Vec<(String, Schema)>,
    fallback: Schema,
    store: Mutex<Vec<User>>,
}

impl Users {
    fn new(translations: Arc<Translations>) -> Self {
        let schema = Schema::new()
            .field(Field::string("email").required().max_len(64).validator(Validator::Email))
            .field(Field::string("password").required().min_len(8).max_len(72))
            .field(Field::string("phone").validator(Validator::Phone));

        Self {
            schemas: translations
                .locales()
                .map(|code| (code.to_owned(), schema.clone().locale(translations.clone(), code)))
                .collect(),
            fallback: schema,
            store: Mutex::new(Vec::new()),
        }
    }

    fn schema(&self, req: &Request) -> &Schema {
        let lang = req
            .header("accept-language")
            .and_then(|value| value.split([',', ';', '-']).next())
            .map(str::trim);

        self.schemas
            .iter()
            .find(|(code, _)| Some(code.as_str()) == lang)
            .map_or(&self.fallback, |(_, schema)| schema)
    }

    fn create(&self, req: &mut Request) -> Response {
        let schema = self.schema(req);
        if !req.validate(schema) {
            return Response::error(StatusCode::BadRequest, req.error().unwrap_or_default());
        }
        let Ok(mut user) = req.json::<User>() else {
            return Response::error(StatusCode::BadRequest, "Invalid JSON");
        };

        let mut store = self.store.lock().unwrap_or_else(PoisonError::into_inner);
        user.id = store.len() as u64 + 1;
        tracing::info!(id = user.id, email = %user.email, "user created");
        store.push(user.clone());

        Response::json_value(StatusCode::Created, &user)
    }

    fn show(&self, req: &mut Request) -> Response {
        let id = req.param("id").and_then(|id| id.parse::<u64>().ok());
        let store = self.store.lock().unwrap_or_else(PoisonError::into_inner);

        match store.iter().find(|user| Some(user.id) == id) {
            Some(user) => Response::json_value(StatusCode::Ok, user),
            None => Response::error(StatusCode::NotFound, "user not found"),
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), ember_web::Error> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let translations = Arc::new(Translations::load("demos/locales")?);
    let users = Arc::new(Users::new(translations));
    let (create, show) = (users.clone(), users);

    Server::builder()
        .bind("127.0.0.1:8080".parse().unwrap())
        .route(Method::Post, "/users", move |req: &mut Request| create.create(req))
        .route(Method::Get, "/users/{id}", move |req: &mut Request| show.show(req))
        .build()?
        .launch()
        .await;

    Ok(())
}
