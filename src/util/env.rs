//! Deserialization implementation largely based on the [`envy`] crate.
//!
//! The environment is read once at startup into [`Env`], which is then handed to whatever needs
//! it; nothing in here is cached globally.
//!
//! [`envy`]: https://github.com/softprops/envy

use std::iter::{IntoIterator, empty};

use chrono::FixedOffset;
use serde::Deserialize;
use serde::de::value::{MapDeserializer, SeqDeserializer};
use serde::de::{self, IntoDeserializer};
use thiserror::Error;

use crate::constants::{
    DEFAULT_CUTOFF_HOUR, DEFAULT_CUTOFF_UTC_OFFSET_MINUTES, DEFAULT_FIRESTORE_BASE_URL,
    DEFAULT_FIRESTORE_DATABASE, DEFAULT_LOG_FILTER, DEFAULT_REPLY_QUERY_CONCURRENCY,
    DEFAULT_SERVICE_NAME,
};

#[derive(Clone, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct Env {
    pub firestore_project_id: String,
    #[serde(default = "default_database_id")]
    pub firestore_database_id: String,
    #[serde(default = "default_base_url")]
    pub firestore_base_url: String,
    pub firestore_access_token: Option<String>,

    /// Path prefix that scopes every collection to one deployment, e.g.
    /// `artifacts/class-42/public/data`. Empty means top-level collections.
    #[serde(default)]
    pub collection_root: String,

    /// Minutes east of UTC. Defaults to -480 (PST); use -420 during Pacific daylight time.
    #[serde(default = "default_offset_minutes")]
    pub cutoff_utc_offset_minutes: i32,
    #[serde(default = "default_cutoff_hour")]
    pub cutoff_hour: u32,
    #[serde(default = "default_concurrency")]
    pub reply_query_concurrency: usize,

    #[serde(default = "default_log_filter")]
    pub log_filter: String,
    #[serde(default = "default_service_name")]
    pub service_name: String,
    pub otel_exporter_otlp_endpoint: Option<String>,
}

// the access token must never end up in a log line
impl std::fmt::Debug for Env {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Env")
            .field("firestore_project_id", &self.firestore_project_id)
            .field("firestore_database_id", &self.firestore_database_id)
            .field("firestore_base_url", &self.firestore_base_url)
            .field(
                "firestore_access_token",
                &self.firestore_access_token.as_ref().map(|_| "[REDACTED]"),
            )
            .field("collection_root", &self.collection_root)
            .field("cutoff_utc_offset_minutes", &self.cutoff_utc_offset_minutes)
            .field("cutoff_hour", &self.cutoff_hour)
            .field("reply_query_concurrency", &self.reply_query_concurrency)
            .field("log_filter", &self.log_filter)
            .field("service_name", &self.service_name)
            .field("otel_exporter_otlp_endpoint", &self.otel_exporter_otlp_endpoint)
            .finish()
    }
}

impl Env {
    /// Reads the process environment (and `.env`, if present).
    pub fn new() -> EnvResult<Self> {
        match dotenvy::dotenv() {
            Ok(_) => {}
            Err(e) if e.not_found() => {}
            Err(e) => return Err(e.into()),
        }

        Self::from_vars(dotenvy::vars())
    }

    pub fn from_vars<Iter>(vars: Iter) -> EnvResult<Self>
    where
        Iter: IntoIterator<Item = (String, String)>,
    {
        Self::validated(from_iter::<_, Env>(vars)?)
    }

    fn validated(env: Env) -> EnvResult<Self> {
        if env.cutoff_hour > 23 {
            return Err(EnvErr::Invalid {
                var: "CUTOFF_HOUR",
                reason: format!("{} is not an hour of the day", env.cutoff_hour),
            });
        }

        if env.reply_query_concurrency == 0 {
            return Err(EnvErr::Invalid {
                var: "REPLY_QUERY_CONCURRENCY",
                reason: "must be at least 1".into(),
            });
        }

        env.cutoff_offset()?;
        Ok(env)
    }

    pub fn cutoff_offset(&self) -> EnvResult<FixedOffset> {
        self.cutoff_utc_offset_minutes
            .checked_mul(60)
            .and_then(FixedOffset::east_opt)
            .ok_or_else(|| EnvErr::Invalid {
                var: "CUTOFF_UTC_OFFSET_MINUTES",
                reason: format!(
                    "{} minutes is out of range",
                    self.cutoff_utc_offset_minutes
                ),
            })
    }
}

fn default_database_id() -> String {
    DEFAULT_FIRESTORE_DATABASE.to_string()
}

fn default_base_url() -> String {
    DEFAULT_FIRESTORE_BASE_URL.to_string()
}

#[inline]
const fn default_offset_minutes() -> i32 {
    DEFAULT_CUTOFF_UTC_OFFSET_MINUTES
}

#[inline]
const fn default_cutoff_hour() -> u32 {
    DEFAULT_CUTOFF_HOUR
}

#[inline]
const fn default_concurrency() -> usize {
    DEFAULT_REPLY_QUERY_CONCURRENCY
}

fn default_log_filter() -> String {
    DEFAULT_LOG_FILTER.to_string()
}

fn default_service_name() -> String {
    DEFAULT_SERVICE_NAME.to_string()
}

// ---
//  Deserializer implementation
// ---

struct Val(String, String);
struct Varname(String);

struct Deserializer<'de, Iter: Iterator<Item = (String, String)>> {
    inner: MapDeserializer<'de, Vars<Iter>, EnvDeserializeError>,
}

struct Vars<Iter>
where
    Iter: IntoIterator<Item = (String, String)>,
{
    inner: Iter,
}

impl<'de> IntoDeserializer<'de, EnvDeserializeError> for Val {
    type Deserializer = Self;
    fn into_deserializer(self) -> Self::Deserializer {
        self
    }
}

impl<'de> IntoDeserializer<'de, EnvDeserializeError> for Varname {
    type Deserializer = Self;
    fn into_deserializer(self) -> Self::Deserializer {
        self
    }
}

impl<Iter: Iterator<Item = (String, String)>> Iterator for Vars<Iter> {
    type Item = (Varname, Val);

    fn next(&mut self) -> Option<Self::Item> {
        self.inner
            .next()
            .map(|(k, v)| (Varname(k.clone()), Val(k, v)))
    }
}

macro_rules! forward_parsed_vals {
    ($($ty:ident => $method:ident,)*) => {
        $(
            fn $method<V>(self, visitor: V) -> Result<V::Value, EnvDeserializeError>
            where
                V: de::Visitor<'de>
            {
                match self.1.parse::<$ty>() {
                    Ok(val) => val.into_deserializer().$method(visitor),
                    Err(e) => Err(serde::de::Error::custom(format_args!(
                        "{}: while parsing '{}' (provider: {})",
                        e, self.1, self.0
                    )))
                }
            }
        )*
    };
}

impl<'de> serde::de::Deserializer<'de> for Val {
    type Error = EnvDeserializeError;

    fn deserialize_any<V>(self, visitor: V) -> Result<V::Value, Self::Error>
    where
        V: de::Visitor<'de>,
    {
        self.1.into_deserializer().deserialize_any(visitor)
    }

    fn deserialize_seq<V>(self, visitor: V) -> Result<V::Value, Self::Error>
    where
        V: de::Visitor<'de>,
    {
        if self.1.is_empty() {
            SeqDeserializer::new(empty::<Val>()).deserialize_seq(visitor)
        } else {
            let values = self
                .1
                .split(',')
                .map(|v| Val(self.0.clone(), v.trim().to_owned()));
            SeqDeserializer::new(values).deserialize_seq(visitor)
        }
    }

    fn deserialize_newtype_struct<V>(
        self,
        _: &'static str,
        visitor: V,
    ) -> Result<V::Value, Self::Error>
    where
        V: de::Visitor<'de>,
    {
        visitor.visit_newtype_struct(self)
    }

    fn deserialize_enum<V>(
        self,
        _: &'static str,
        _: &'static [&'static str],
        visitor: V,
    ) -> Result<V::Value, Self::Error>
    where
        V: de::Visitor<'de>,
    {
        visitor.visit_enum(self.1.into_deserializer())
    }

    fn deserialize_option<V>(self, visitor: V) -> Result<V::Value, Self::Error>
    where
        V: de::Visitor<'de>,
    {
        // an exported-but-empty variable is treated the same as an unset one
        if self.1.is_empty() {
            visitor.visit_none()
        } else {
            visitor.visit_some(self)
        }
    }

    forward_parsed_vals! {
        bool => deserialize_bool,
        u8 => deserialize_u8,
        u16 => deserialize_u16,
        u32 => deserialize_u32,
        u64 => deserialize_u64,
        i8 => deserialize_i8,
        i16 => deserialize_i16,
        i32 => deserialize_i32,
        i64 => deserialize_i64,
        f32 => deserialize_f32,
        f64 => deserialize_f64,
    }

    serde::forward_to_deserialize_any! {
        char str string unit bytes byte_buf map
        unit_struct tuple_struct identifier tuple
        ignored_any
        struct
    }
}

impl<'de> serde::de::Deserializer<'de> for Varname {
    type Error = EnvDeserializeError;

    fn deserialize_any<V>(self, visitor: V) -> Result<V::Value, Self::Error>
    where
        V: de::Visitor<'de>,
    {
        self.0.into_deserializer().deserialize_any(visitor)
    }

    #[inline]
    fn deserialize_newtype_struct<V>(
        self,
        _: &'static str,
        visitor: V,
    ) -> Result<V::Value, Self::Error>
    where
        V: de::Visitor<'de>,
    {
        visitor.visit_newtype_struct(self)
    }

    serde::forward_to_deserialize_any! {
        char str string unit seq option bytes byte_buf map
        unit_struct tuple_struct identifier tuple ignored_any
        bool u8 u16 u32 u64 i8 i16 i32 i64 f32 f64 enum struct
    }
}

impl<'de, Iter: Iterator<Item = (String, String)>> Deserializer<'de, Iter> {
    fn new(vars: Iter) -> Self {
        Deserializer {
            inner: MapDeserializer::new(Vars { inner: vars }),
        }
    }
}

impl<'de, Iter: Iterator<Item = (String, String)>> serde::de::Deserializer<'de>
    for Deserializer<'de, Iter>
{
    type Error = EnvDeserializeError;
    fn deserialize_any<V>(self, visitor: V) -> Result<V::Value, Self::Error>
    where
        V: de::Visitor<'de>,
    {
        self.deserialize_map(visitor)
    }

    fn deserialize_map<V>(self, visitor: V) -> Result<V::Value, Self::Error>
    where
        V: de::Visitor<'de>,
    {
        visitor.visit_map(self.inner)
    }

    serde::forward_to_deserialize_any! {
        char str string unit seq option bytes byte_buf
        newtype_struct unit_struct tuple_struct identifier
        tuple ignored_any bool u8 u16 u32 u64 i8 i16 i32 i64
        f32 f64 enum struct
    }
}

pub fn from_iter<Iter, T>(iter: Iter) -> Result<T, EnvDeserializeError>
where
    T: serde::de::DeserializeOwned,
    Iter: IntoIterator<Item = (String, String)>,
{
    T::deserialize(Deserializer::new(iter.into_iter()))
}

impl serde::de::Error for EnvDeserializeError {
    fn custom<T>(msg: T) -> Self
    where
        T: std::fmt::Display,
    {
        EnvDeserializeError::Custom(msg.to_string())
    }

    fn missing_field(field: &'static str) -> Self {
        EnvDeserializeError::MissingValue(field.into())
    }
}

pub type EnvResult<T> = core::result::Result<T, EnvErr>;

#[derive(Debug, Error)]
pub enum EnvErr {
    #[error(transparent)]
    Dotenvy(#[from] dotenvy::Error),

    #[error(transparent)]
    DeserializationError(#[from] EnvDeserializeError),

    #[error("invalid value for {var}: {reason}")]
    Invalid { var: &'static str, reason: String },
}

#[derive(Debug, Error)]
pub enum EnvDeserializeError {
    #[error("env deserialization error: {0}")]
    Custom(String),

    #[error("missing required variable {0}")]
    MissingValue(String),
}

#[cfg(test)]
mod test {
    use super::*;

    fn vars(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_defaults_applied() {
        let env = Env::from_vars(vars(&[
            ("FIRESTORE_PROJECT_ID", "classroom-test"),
            ("PATH", "/usr/bin"),
        ]))
        .unwrap();

        assert_eq!(env.firestore_project_id, "classroom-test");
        assert_eq!(env.firestore_database_id, "(default)");
        assert_eq!(env.firestore_base_url, DEFAULT_FIRESTORE_BASE_URL);
        assert!(env.firestore_access_token.is_none());
        assert_eq!(env.collection_root, "");
        assert_eq!(env.cutoff_utc_offset_minutes, -480);
        assert_eq!(env.cutoff_hour, 8);
        assert_eq!(env.reply_query_concurrency, DEFAULT_REPLY_QUERY_CONCURRENCY);
        assert!(env.otel_exporter_otlp_endpoint.is_none());
        assert_eq!(
            env.cutoff_offset().unwrap(),
            FixedOffset::west_opt(8 * 3600).unwrap()
        );
    }

    #[test]
    fn test_overrides_parsed() {
        let env = Env::from_vars(vars(&[
            ("FIRESTORE_PROJECT_ID", "classroom-test"),
            ("FIRESTORE_ACCESS_TOKEN", "ya29.token"),
            ("COLLECTION_ROOT", "artifacts/period-3/public/data"),
            ("CUTOFF_UTC_OFFSET_MINUTES", "330"),
            ("CUTOFF_HOUR", "9"),
            ("REPLY_QUERY_CONCURRENCY", "2"),
            ("OTEL_EXPORTER_OTLP_ENDPOINT", ""),
        ]))
        .unwrap();

        assert_eq!(env.firestore_access_token.as_deref(), Some("ya29.token"));
        assert_eq!(env.collection_root, "artifacts/period-3/public/data");
        assert_eq!(
            env.cutoff_offset().unwrap(),
            FixedOffset::east_opt(330 * 60).unwrap()
        );
        assert_eq!(env.cutoff_hour, 9);
        assert_eq!(env.reply_query_concurrency, 2);
        assert!(env.otel_exporter_otlp_endpoint.is_none());
    }

    #[test]
    fn test_missing_project_rejected() {
        let err = Env::from_vars(vars(&[("CUTOFF_HOUR", "8")])).unwrap_err();
        assert!(matches!(
            err,
            EnvErr::DeserializationError(EnvDeserializeError::MissingValue(ref v))
                if v == "FIRESTORE_PROJECT_ID"
        ));
    }

    #[test]
    fn test_invalid_values_rejected() {
        let bad_hour = Env::from_vars(vars(&[
            ("FIRESTORE_PROJECT_ID", "p"),
            ("CUTOFF_HOUR", "24"),
        ]));
        assert!(matches!(bad_hour, Err(EnvErr::Invalid { var: "CUTOFF_HOUR", .. })));

        let bad_offset = Env::from_vars(vars(&[
            ("FIRESTORE_PROJECT_ID", "p"),
            ("CUTOFF_UTC_OFFSET_MINUTES", "1440"),
        ]));
        assert!(matches!(
            bad_offset,
            Err(EnvErr::Invalid { var: "CUTOFF_UTC_OFFSET_MINUTES", .. })
        ));

        let not_a_number = Env::from_vars(vars(&[
            ("FIRESTORE_PROJECT_ID", "p"),
            ("CUTOFF_HOUR", "eight"),
        ]));
        assert!(matches!(
            not_a_number,
            Err(EnvErr::DeserializationError(EnvDeserializeError::Custom(_)))
        ));
    }

    #[test]
    fn test_daylight_offset_moves_cutoff_an_hour_earlier() {
        use chrono::{TimeZone, Utc};

        use crate::scoring::cutoff::cutoff_for;

        // mid-April, Pacific daylight time
        let now = Utc.with_ymd_and_hms(2024, 4, 15, 18, 0, 0).unwrap();

        let standard = Env::from_vars(vars(&[("FIRESTORE_PROJECT_ID", "p")])).unwrap();
        let daylight = Env::from_vars(vars(&[
            ("FIRESTORE_PROJECT_ID", "p"),
            ("CUTOFF_UTC_OFFSET_MINUTES", "-420"),
        ]))
        .unwrap();

        let late = cutoff_for(now, standard.cutoff_offset().unwrap(), standard.cutoff_hour);
        let on_time = cutoff_for(now, daylight.cutoff_offset().unwrap(), daylight.cutoff_hour);

        assert_eq!(late.unwrap(), Utc.with_ymd_and_hms(2024, 4, 15, 16, 0, 0).unwrap());
        assert_eq!(on_time.unwrap(), Utc.with_ymd_and_hms(2024, 4, 15, 15, 0, 0).unwrap());
    }

    #[test]
    fn test_debug_redacts_token() {
        let env = Env::from_vars(vars(&[
            ("FIRESTORE_PROJECT_ID", "p"),
            ("FIRESTORE_ACCESS_TOKEN", "super-secret"),
        ]))
        .unwrap();

        let rendered = format!("{env:?}");
        assert!(!rendered.contains("super-secret"));
        assert!(rendered.contains("[REDACTED]"));
    }
}
