//! Key and locale lookup over JSON translation files.
//!
//! A directory such as
//!
//! ```text
//! locales/
//!   en.json   {"greeting": "Hello", "validation.required": "{field} is required"}
//!   ru.json   {"greeting": "Привет"}
//! ```
//!
//! loads into one table with the locales `en` and `ru`; `en` is the default
//! because it sorts first.

use crate::errors::Error;
use serde_json::Value;
use std::{collections::HashMap, fs, path::Path};

/// Translation tables, one per locale.
///
/// # Examples
/// ```no_run
/// use ember_web::i18n::Translations;
///
/// # fn main() -> Result<(), ember_web::Error> {
/// let translations = Translations::load("locales")?;
///
/// assert_eq!(translations.get("greeting", Some("ru")), "Привет");
/// // Unknown locale: the default one is used
/// assert_eq!(translations.get("greeting", Some("fr")), "Hello");
/// // Unknown key: the key itself is returned
/// assert_eq!(translations.get("farewell", None), "farewell");
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone, Default)]
pub struct Translations {
    locales: Vec<Locale>,
}

#[derive(Debug, Clone)]
struct Locale {
    code: String,
    entries: HashMap<String, String>,
}

impl Translations {
    /// Loads every `*.json` file of `dir`, in file name order.
    ///
    /// Each file must hold a JSON object; its string values become the
    /// entries of the locale named after the file stem, other values are
    /// skipped.
    ///
    /// # Errors
    ///
    /// [`Error::Translations`] if the directory or one of the files cannot be
    /// read or parsed.
    pub fn load<P: AsRef<Path>>(dir: P) -> Result<Self, Error> {
        let dir = dir.as_ref();
        let failed = |path: &Path, reason: String| Error::Translations {
            path: path.to_path_buf(),
            reason,
        };

        let mut files = fs::read_dir(dir)
            .map_err(|err| failed(dir, err.to_string()))?
            .filter_map(|entry| entry.ok().map(|entry| entry.path()))
            .filter(|path| path.is_file() && path.extension().is_some_and(|ext| ext == "json"))
            .collect::<Vec<_>>();
        files.sort();

        let mut translations = Self::default();
        for path in files {
            let Some(code) = path.file_stem().and_then(|stem| stem.to_str()) else {
                continue;
            };

            let text = fs::read_to_string(&path).map_err(|err| failed(&path, err.to_string()))?;
            let Value::Object(map) =
                serde_json::from_str(&text).map_err(|err| failed(&path, err.to_string()))?
            else {
                return Err(failed(&path, "expected a JSON object".into()));
            };

            let entries = map
                .into_iter()
                .filter_map(|(key, value)| match value {
                    Value::String(text) => Some((key, text)),
                    _ => None,
                })
                .collect();

            tracing::debug!(locale = code, path = %path.display(), "translations loaded");
            translations.locales.push(Locale {
                code: code.to_owned(),
                entries,
            });
        }

        Ok(translations)
    }

    /// Adds or replaces one entry, creating the locale when needed.
    pub fn insert<K, V>(&mut self, locale: &str, key: K, value: V)
    where
        K: Into<String>,
        V: Into<String>,
    {
        let index = match self.locales.iter().position(|l| l.code == locale) {
            Some(index) => index,
            None => {
                self.locales.push(Locale {
                    code: locale.to_owned(),
                    entries: HashMap::new(),
                });
                self.locales.len() - 1
            }
        };
        self.locales[index].entries.insert(key.into(), value.into());
    }

    /// Locale codes, default first.
    pub fn locales(&self) -> impl Iterator<Item = &str> {
        self.locales.iter().map(|locale| locale.code.as_str())
    }

    #[inline]
    pub fn default_locale(&self) -> Option<&str> {
        self.locales.first().map(|locale| locale.code.as_str())
    }

    /// Looks `key` up in `locale`, then in the default locale.
    pub fn lookup(&self, key: &str, locale: Option<&str>) -> Option<&str> {
        let requested = locale
            .and_then(|code| self.locales.iter().find(|l| l.code == code))
            .and_then(|l| l.entries.get(key));

        requested
            .or_else(|| self.locales.first()?.entries.get(key))
            .map(String::as_str)
    }

    /// Like [`lookup`](Self::lookup), falling back to the key itself.
    #[inline]
    pub fn get<'a>(&'a self, key: &'a str, locale: Option<&str>) -> &'a str {
        self.lookup(key, locale).unwrap_or(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    struct TempDir(PathBuf);

    impl TempDir {
        fn new(files: &[(&str, &str)]) -> Self {
            let dir = std::env::temp_dir().join(format!("ember_web_i18n_{}", fastrand::u64(..)));
            fs::create_dir_all(&dir).unwrap();
            for (name, content) in files {
                fs::write(dir.join(name), content).unwrap();
            }
            Self(dir)
        }
    }

    impl Drop for TempDir {
        fn drop(&mut self) {
            let _ = fs::remove_dir_all(&self.0);
        }
    }

    #[test]
    fn load_and_fallback() {
        let dir = TempDir::new(&[
            ("ru.json", r#"{"greeting": "Привет"}"#),
            ("en.json", r#"{"greeting": "Hello", "farewell": "Bye", "count": 3}"#),
            ("notes.txt", "not a locale"),
        ]);
        let translations = Translations::load(&dir.0).unwrap();

        assert_eq!(translations.locales().collect::<Vec<_>>(), ["en", "ru"]);
        assert_eq!(translations.default_locale(), Some("en"));

        #[rustfmt::skip]
        let cases = [
            ("greeting", Some("ru"), "Привет"),
            ("greeting", Some("en"), "Hello"),
            ("greeting", None,       "Hello"),
            ("greeting", Some("fr"), "Hello"),
            ("farewell", Some("ru"), "Bye"),
            ("count",    None,       "count"),
            ("missing",  Some("ru"), "missing"),
        ];

        for (key, locale, expected) in cases {
            assert_eq!(translations.get(key, locale), expected, "{key} {locale:?}");
        }
        assert_eq!(translations.lookup("missing", None), None);
    }

    #[test]
    fn load_errors() {
        assert!(matches!(
            Translations::load("/nonexistent/ember_web/locales"),
            Err(Error::Translations { .. })
        ));

        let broken = TempDir::new(&[("en.json", "{")]);
        assert!(matches!(
            Translations::load(&broken.0),
            Err(Error::Translations { path, .. }) if path.ends_with("en.json")
        ));

        let not_object = TempDir::new(&[("en.json", "[1, 2]")]);
        assert!(Translations::load(&not_object.0).is_err());
    }

    #[test]
    fn empty_table() {
        let mut translations = Translations::default();
        assert_eq!(translations.get("greeting", Some("en")), "greeting");

        translations.insert("de", "greeting", "Hallo");
        translations.insert("de", "greeting", "Guten Tag");
        assert_eq!(translations.get("greeting", None), "Guten Tag");
    }
}
