//! JSON body checks against a field schema.
//!
//! ```no_run
//! use ember_web::{
//!     validation::{Field, Schema, Validator},
//!     Request, Response, StatusCode,
//! };
//!
//! fn create_user(req: &mut Request) -> Response {
//!     let schema = Schema::new()
//!         .field(Field::string("email").required().max_len(64).validator(Validator::Email))
//!         .field(Field::string("password").required().min_len(8))
//!         .field(Field::boolean("newsletter"));
//!
//!     if !req.validate(&schema) {
//!         return Response::error(StatusCode::BadRequest, req.error().unwrap_or_default());
//!     }
//!     Response::json(StatusCode::Created, r#"{"status": "created"}"#)
//! }
//! ```

use crate::{i18n::Translations, Request};
use serde_json::{Map, Value};
use std::{fmt, sync::Arc};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Str,
    Int,
    Bool,
}

/// Format checks for string fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Validator {
    Email,
    Phone,
    Url,
}

impl Validator {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Email => "email",
            Self::Phone => "phone",
            Self::Url => "url",
        }
    }

    pub fn accepts(&self, value: &str) -> bool {
        match self {
            Self::Email => is_email(value),
            Self::Phone => is_phone(value),
            Self::Url => is_url(value),
        }
    }
}

impl fmt::Display for Validator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One expected member of the JSON object.
///
/// Lengths count characters and only apply to strings; `0` leaves a bound
/// open.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Field {
    pub name: String,
    pub kind: FieldKind,
    pub required: bool,
    pub min_len: usize,
    pub max_len: usize,
    pub validator: Option<Validator>,
}

impl Field {
    pub fn new<N: Into<String>>(name: N, kind: FieldKind) -> Self {
        Self {
            name: name.into(),
            kind,
            required: false,
            min_len: 0,
            max_len: 0,
            validator: None,
        }
    }

    #[inline]
    pub fn string<N: Into<String>>(name: N) -> Self {
        Self::new(name, FieldKind::Str)
    }

    #[inline]
    pub fn int<N: Into<String>>(name: N) -> Self {
        Self::new(name, FieldKind::Int)
    }

    #[inline]
    pub fn boolean<N: Into<String>>(name: N) -> Self {
        Self::new(name, FieldKind::Bool)
    }

    #[inline(always)]
    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    #[inline(always)]
    pub fn min_len(mut self, min: usize) -> Self {
        self.min_len = min;
        self
    }

    #[inline(always)]
    pub fn max_len(mut self, max: usize) -> Self {
        self.max_len = max;
        self
    }

    #[inline(always)]
    pub fn validator(mut self, validator: Validator) -> Self {
        self.validator = Some(validator);
        self
    }

    fn check(&self, object: &Map<String, Value>) -> Result<(), ValidationError> {
        // A value of the wrong type is treated as missing
        let value = object.get(&self.name).filter(|value| match self.kind {
            FieldKind::Str => value.is_string(),
            FieldKind::Int => value.is_number(),
            FieldKind::Bool => value.is_boolean(),
        });

        let Some(value) = value else {
            return match self.required {
                true => Err(ValidationError::Required {
                    field: self.name.clone(),
                }),
                false => Ok(()),
            };
        };

        let Some(text) = value.as_str() else {
            return Ok(());
        };
        let len = text.chars().count();

        if self.min_len != 0 && len < self.min_len {
            return Err(ValidationError::MinLength {
                field: self.name.clone(),
                min: self.min_len,
            });
        }
        if self.max_len != 0 && len > self.max_len {
            return Err(ValidationError::MaxLength {
                field: self.name.clone(),
                max: self.max_len,
            });
        }

        match self.validator {
            Some(validator) if !validator.accepts(text) => Err(ValidationError::Invalid {
                field: self.name.clone(),
                kind: validator,
            }),
            _ => Ok(()),
        }
    }
}

/// An ordered list of fields; the first failing field is reported.
#[derive(Debug, Clone, Default)]
pub struct Schema {
    fields: Vec<Field>,
    locale: Option<(Arc<Translations>, String)>,
}

impl Schema {
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn field(mut self, field: Field) -> Self {
        self.fields.push(field);
        self
    }

    /// Translates failure messages with the `validation.*` keys of
    /// `translations`; a missing key falls back to the English text.
    ///
    /// Placeholders: `{field}`, `{min}`, `{max}`, `{kind}`.
    pub fn locale<C: Into<String>>(mut self, translations: Arc<Translations>, code: C) -> Self {
        self.locale = Some((translations, code.into()));
        self
    }

    #[inline]
    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    /// Checks a JSON body.
    pub fn check(&self, body: &[u8]) -> Result<(), ValidationError> {
        let Ok(Value::Object(object)) = serde_json::from_slice::<Value>(body) else {
            return Err(ValidationError::InvalidJson);
        };

        self.fields.iter().try_for_each(|field| field.check(&object))
    }

    /// Failure text, translated when a locale is set.
    pub fn message(&self, error: &ValidationError) -> String {
        match &self.locale {
            Some((translations, code)) => error.translate(translations, Some(code)),
            None => error.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("Invalid JSON")]
    InvalidJson,

    #[error("field '{field}' is required")]
    Required { field: String },

    #[error("field '{field}' min length is {min}")]
    MinLength { field: String, min: usize },

    #[error("field '{field}' max length is {max}")]
    MaxLength { field: String, max: usize },

    #[error("field '{field}' is not a valid {kind}")]
    Invalid { field: String, kind: Validator },
}

impl ValidationError {
    /// Translation key of this failure.
    pub const fn key(&self) -> &'static str {
        match self {
            Self::InvalidJson => "validation.invalid_json",
            Self::Required { .. } => "validation.required",
            Self::MinLength { .. } => "validation.min_length",
            Self::MaxLength { .. } => "validation.max_length",
            Self::Invalid { .. } => "validation.invalid",
        }
    }

    pub fn translate(&self, translations: &Translations, locale: Option<&str>) -> String {
        let Some(template) = translations.lookup(self.key(), locale) else {
            return self.to_string();
        };

        let mut message = template.to_owned();
        let mut fill = |placeholder: &str, value: &str| {
            if message.contains(placeholder) {
                message = message.replace(placeholder, value);
            }
        };

        match self {
            Self::InvalidJson => {}
            Self::Required { field } => fill("{field}", field),
            Self::MinLength { field, min } => {
                fill("{field}", field);
                fill("{min}", &min.to_string());
            }
            Self::MaxLength { field, max } => {
                fill("{field}", field);
                fill("{max}", &max.to_string());
            }
            Self::Invalid { field, kind } => {
                fill("{field}", field);
                fill("{kind}", kind.as_str());
            }
        }
        message
    }
}

impl Request {
    /// Checks the JSON body against `schema`.
    ///
    /// On failure the message is stored in the error slot, see
    /// [`Request::error`], and `false` is returned. A request without a
    /// buffered body fails with `Invalid JSON`.
    pub fn validate(&mut self, schema: &Schema) -> bool {
        match schema.check(self.body().unwrap_or_default()) {
            Ok(()) => true,
            Err(err) => {
                let message = schema.message(&err);
                self.set_error(message);
                false
            }
        }
    }
}

fn is_email(value: &str) -> bool {
    let Some((local, domain)) = value.split_once('@') else {
        return false;
    };

    !local.is_empty()
        && !domain.contains('@')
        && !value.chars().any(char::is_whitespace)
        && domain
            .split_once('.')
            .is_some_and(|(host, _)| !host.is_empty())
        && !domain.ends_with('.')
        && !domain.contains("..")
}

fn is_phone(value: &str) -> bool {
    let digits = value.strip_prefix('+').unwrap_or(value);
    let mut count = 0;

    for c in digits.chars() {
        match c {
            '0'..='9' => count += 1,
            ' ' | '-' | '(' | ')' => {}
            _ => return false,
        }
    }
    (7..=15).contains(&count)
}

fn is_url(value: &str) -> bool {
    let Some(rest) = value
        .strip_prefix("http://")
        .or_else(|| value.strip_prefix("https://"))
    else {
        return false;
    };

    let host = rest.split(['/', '?', '#']).next().unwrap_or_default();
    !host.is_empty() && !value.chars().any(char::is_whitespace)
}
