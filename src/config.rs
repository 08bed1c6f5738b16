use std::{
    env::{self, VarError},
    num::ParseIntError,
    time::Duration,
};

use rearch::{CData, CapsuleHandle, Container};
use sea_orm::{ConnectOptions, Database, DbConn};
use thiserror::Error;
use tracing::{info, instrument, warn};
use url::Url;

const DB_URL_VAR: &str = "DB_URL";
const ADDR_VAR: &str = "ADDR";
const PUBLIC_BASE_URL_VAR: &str = "PUBLIC_BASE_URL";
const REQUEST_TIMEOUT_VAR: &str = "REQUEST_TIMEOUT_MS";

const DEFAULT_ADDR: &str = "127.0.0.1:0";
const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigValueError {
    #[error("not a valid absolute URL: {0}")]
    InvalidUrl(#[from] url::ParseError),
    #[error("base URL must use http or https, got {0}")]
    UnsupportedScheme(String),
    #[error("not a whole number of milliseconds: {0}")]
    InvalidMillis(#[from] ParseIntError),
    #[error("request timeout must be greater than zero")]
    ZeroTimeout,
}

/// # Errors
/// Will return [`Err`] if the connection to the database fails.
#[instrument]
pub async fn init_container() -> anyhow::Result<Container> {
    let container = Container::new();
    let (options, store_db_conn) =
        container.read((db_connection_options_capsule, db_conn_init_action));

    info!(?options, "Connecting to database");
    store_db_conn(Database::connect(options).await?);

    info!("Container ready");
    Ok(container)
}

/// Reads `name`, treating a value that isn't unicode as fatal misconfiguration.
fn env_var(name: &str) -> Option<String> {
    match env::var(name) {
        Ok(value) => Some(value),
        Err(VarError::NotPresent) => None,
        Err(VarError::NotUnicode(actual)) => {
            panic!("{name} environment variable is not unicode: {}", actual.display())
        }
    }
}

/// Parses a base such as `https://sho.rt` that short URLs are appended to.
///
/// # Errors
/// Will return [`Err`] when `raw` is not an absolute `http`/`https` URL.
pub fn parse_public_base_url(raw: &str) -> Result<Url, ConfigValueError> {
    let base = Url::parse(raw)?;
    match base.scheme() {
        "http" | "https" => Ok(base),
        other => Err(ConfigValueError::UnsupportedScheme(other.to_owned())),
    }
}

/// # Errors
/// Will return [`Err`] when `raw` is not a positive whole number of milliseconds.
pub fn parse_request_timeout(raw: &str) -> Result<Duration, ConfigValueError> {
    match raw.trim().parse()? {
        0 => Err(ConfigValueError::ZeroTimeout),
        millis => Ok(Duration::from_millis(millis)),
    }
}

/// # Panics
/// Panics when `DB_URL` is not set.
#[must_use]
pub fn db_connection_options_capsule(_: CapsuleHandle) -> ConnectOptions {
    let db_url = env_var(DB_URL_VAR)
        .unwrap_or_else(|| panic!("{DB_URL_VAR} environment variable is not set"));
    ConnectOptions::new(db_url)
}

// Holds the connection made in `init_container`; empty until then.
fn db_conn_slot(
    CapsuleHandle { register, .. }: CapsuleHandle,
) -> (Option<DbConn>, impl use<> + CData + Fn(Option<DbConn>)) {
    register.register(rearch_effects::state::<rearch_effects::Cloned<_>>(None))
}

pub fn db_conn_init_action(
    CapsuleHandle { mut get, .. }: CapsuleHandle,
) -> impl use<> + CData + Fn(DbConn) {
    let fill_slot = get.as_ref(db_conn_slot).1.clone();
    move |db| fill_slot(Some(db))
}

/// # Panics
/// Panics when read before [`init_container`] connected the database.
pub fn db_conn_capsule(CapsuleHandle { mut get, .. }: CapsuleHandle) -> DbConn {
    get.as_ref(db_conn_slot)
        .0
        .clone()
        .expect("database connection is set by init_container")
}

pub fn addr_capsule(_: CapsuleHandle) -> String {
    env_var(ADDR_VAR).map_or_else(
        || {
            warn!(addr = DEFAULT_ADDR, "{ADDR_VAR} not set; listening on {DEFAULT_ADDR}");
            DEFAULT_ADDR.to_owned()
        },
        |addr| {
            info!(addr, "Listening address taken from {ADDR_VAR}");
            addr
        },
    )
}

/// Base that short URLs in responses are built on.
///
/// When unset, responses fall back to the request's `Host` header.
///
/// # Panics
/// Panics when `PUBLIC_BASE_URL` is set but rejected by [`parse_public_base_url`].
pub fn public_base_url_capsule(_: CapsuleHandle) -> Option<Url> {
    let Some(raw) = env_var(PUBLIC_BASE_URL_VAR) else {
        info!("{PUBLIC_BASE_URL_VAR} not set; short URLs follow the request Host header");
        return None;
    };

    let base = parse_public_base_url(&raw)
        .unwrap_or_else(|err| panic!("{PUBLIC_BASE_URL_VAR} is invalid: {err}"));
    info!(%base, "Short URLs built on {PUBLIC_BASE_URL_VAR}");
    Some(base)
}

/// How long a single request may spend waiting on the store.
///
/// # Panics
/// Panics when `REQUEST_TIMEOUT_MS` is set but rejected by [`parse_request_timeout`].
pub fn request_timeout_capsule(_: CapsuleHandle) -> Duration {
    let Some(raw) = env_var(REQUEST_TIMEOUT_VAR) else {
        warn!(
            timeout = ?DEFAULT_REQUEST_TIMEOUT,
            "{REQUEST_TIMEOUT_VAR} not set; using the default request timeout"
        );
        return DEFAULT_REQUEST_TIMEOUT;
    };

    parse_request_timeout(&raw)
        .unwrap_or_else(|err| panic!("{REQUEST_TIMEOUT_VAR} is invalid: {err}"))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_public_base_url() {
        assert_eq!(
            parse_public_base_url("https://sho.rt").unwrap().as_str(),
            "https://sho.rt/"
        );
        assert_eq!(
            parse_public_base_url("http://localhost:8080/links/")
                .unwrap()
                .as_str(),
            "http://localhost:8080/links/"
        );
        assert_eq!(
            parse_public_base_url("sho.rt"),
            Err(ConfigValueError::InvalidUrl(
                url::ParseError::RelativeUrlWithoutBase
            ))
        );
        assert_eq!(
            parse_public_base_url("ftp://sho.rt"),
            Err(ConfigValueError::UnsupportedScheme("ftp".to_owned()))
        );
    }

    #[test]
    fn test_parse_request_timeout() {
        assert_eq!(
            parse_request_timeout("250").unwrap(),
            Duration::from_millis(250)
        );
        assert_eq!(
            parse_request_timeout(" 5000\n").unwrap(),
            Duration::from_secs(5)
        );
        assert_eq!(parse_request_timeout("0"), Err(ConfigValueError::ZeroTimeout));
        assert!(matches!(
            parse_request_timeout("5s"),
            Err(ConfigValueError::InvalidMillis(_))
        ));
        assert!(matches!(
            parse_request_timeout("-1"),
            Err(ConfigValueError::InvalidMillis(_))
        ));
    }

    #[test]
    fn test_unset_env_var_is_none() {
        assert_eq!(env_var("SHORT_HITS_TEST_VARIABLE_THAT_IS_NEVER_SET"), None);
    }
}
