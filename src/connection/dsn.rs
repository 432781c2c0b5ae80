//! `edgedb://` DSN parsing.
use std::collections::HashMap;

use crate::common::ByteStr;

use super::config::ConfigError;

/// A parsed DSN. All parts optional, query parameters not claimed by a
/// known field are server settings.
#[derive(Debug, Default)]
pub(crate) struct Dsn {
    pub host: Option<ByteStr>,
    pub port: Option<ByteStr>,
    pub user: Option<ByteStr>,
    pub password: Option<ByteStr>,
    pub database: Option<ByteStr>,
    /// `(field, variant, value)` for each known field given in the
    /// query: variant is one of `""`, `"_env"`, `"_file"`.
    pub params: Vec<(&'static str, &'static str, ByteStr)>,
    pub server_settings: HashMap<String, String>,
}

/// Fields addressable through `?field=`, `?field_env=`, `?field_file=`.
const FIELDS: &[&str] = &[
    "host",
    "port",
    "database",
    "user",
    "password",
    "tls_ca_file",
    "tls_verify_hostname",
];

/// Returns `true` when `value` carries a URL scheme prefix, which
/// disambiguates a DSN from a bare instance name.
pub(crate) fn has_scheme(value: &str) -> bool {
    match value.split_once("://") {
        Some((scheme, _)) => {
            !scheme.is_empty() && scheme.bytes().all(|b| b.is_ascii_alphabetic())
        }
        None => false,
    }
}

pub(crate) fn parse(dsn: &ByteStr) -> Result<Dsn, ConfigError> {
    let mut read = dsn.as_str();

    let Some(rest) = read.strip_prefix("edgedb://") else {
        return Err(ConfigError::new(format!(
            "invalid DSN {:?}: scheme is expected to be \"edgedb\"",
            dsn.as_str(),
        )));
    };
    read = rest;

    let mut out = Dsn::default();

    let query = match read.split_once('?') {
        Some((authority, query)) => {
            read = authority;
            Some(query)
        }
        None => None,
    };

    if let Some((authority, database)) = read.split_once('/') {
        read = authority;
        if !database.is_empty() {
            out.database = Some(dsn.slice_ref(database));
        }
    }

    if let Some((userinfo, hostport)) = read.rsplit_once('@') {
        read = hostport;
        match userinfo.split_once(':') {
            Some((user, password)) => {
                if !user.is_empty() {
                    out.user = Some(dsn.slice_ref(user));
                }
                if !password.is_empty() {
                    out.password = Some(dsn.slice_ref(password));
                }
            }
            None => {
                if !userinfo.is_empty() {
                    out.user = Some(dsn.slice_ref(userinfo));
                }
            }
        }
    }

    if let Some((host, port)) = read.split_once(':') {
        if !port.is_empty() {
            out.port = Some(dsn.slice_ref(port));
        }
        read = host;
    }
    if !read.is_empty() {
        out.host = Some(dsn.slice_ref(read));
    }

    if let Some(query) = query {
        parse_query(dsn, query, &mut out)?;
    }

    Ok(out)
}

fn parse_query(dsn: &ByteStr, query: &str, out: &mut Dsn) -> Result<(), ConfigError> {
    let mut seen = Vec::new();

    for pair in query.split('&') {
        if pair.is_empty() {
            continue;
        }
        let Some((key, value)) = pair.split_once('=') else {
            return Err(ConfigError::new(format!(
                "invalid DSN query parameter {pair:?}: expected key=value",
            )));
        };
        if seen.contains(&key.to_string()) {
            return Err(ConfigError::new(format!(
                "invalid DSN: duplicate query parameter {key:?}",
            )));
        }
        seen.push(key.to_string());

        match known_field(key) {
            Some((field, variant)) => {
                out.params.push((field, variant, dsn.slice_ref(value)));
            }
            None => {
                out.server_settings.insert(key.into(), value.into());
            }
        }
    }

    // position in the authority counts as a variant of the same field
    for &(field, _, _) in &out.params {
        let in_authority = match field {
            "host" => out.host.is_some(),
            "port" => out.port.is_some(),
            "user" => out.user.is_some(),
            "password" => out.password.is_some(),
            "database" => out.database.is_some(),
            _ => false,
        };
        let dupes = out.params.iter().filter(|(f, _, _)| *f == field).count();
        if in_authority || dupes > 1 {
            return Err(ConfigError::new(format!(
                "invalid DSN: more than one of {field}, {field}_env or {field}_file was specified",
            )));
        }
    }

    Ok(())
}

fn known_field(key: &str) -> Option<(&'static str, &'static str)> {
    for &field in FIELDS {
        if key == field {
            return Some((field, ""));
        }
        if key.strip_prefix(field) == Some("_env") {
            return Some((field, "_env"));
        }
        if key.strip_prefix(field) == Some("_file") {
            return Some((field, "_file"));
        }
    }
    None
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn full_dsn() {
        let dsn = ByteStr::from_static("edgedb://u:p@h:1234/db");
        let out = parse(&dsn).unwrap();
        assert_eq!(out.user.unwrap(), "u");
        assert_eq!(out.password.unwrap(), "p");
        assert_eq!(out.host.unwrap(), "h");
        assert_eq!(out.port.unwrap(), "1234");
        assert_eq!(out.database.unwrap(), "db");
    }

    #[test]
    fn sparse_dsn() {
        let dsn = ByteStr::from_static("edgedb://");
        let out = parse(&dsn).unwrap();
        assert!(out.host.is_none());
        assert!(out.port.is_none());
        assert!(out.user.is_none());
        assert!(out.database.is_none());

        let dsn = ByteStr::from_static("edgedb://localhost");
        let out = parse(&dsn).unwrap();
        assert_eq!(out.host.unwrap(), "localhost");
    }

    #[test]
    fn wrong_scheme() {
        let dsn = ByteStr::from_static("postgres://u@h/db");
        assert!(parse(&dsn).is_err());
    }

    #[test]
    fn unknown_params_become_server_settings() {
        let dsn = ByteStr::from_static("edgedb://h?application_name=app&port_env=APP_PORT");
        let out = parse(&dsn).unwrap();
        assert_eq!(out.server_settings.get("application_name").unwrap(), "app");
        assert_eq!(out.params, [("port", "_env", ByteStr::from_static("APP_PORT"))]);
    }

    #[test]
    fn conflicting_variants_fail() {
        let dsn = ByteStr::from_static("edgedb://h?user=a&user_env=B");
        assert!(parse(&dsn).unwrap_err().to_string().contains("more than one of user"));

        // positional + query form of the same field
        let dsn = ByteStr::from_static("edgedb://h:1?port=2");
        assert!(parse(&dsn).is_err());

        // duplicate key
        let dsn = ByteStr::from_static("edgedb://h?x=1&x=2");
        assert!(parse(&dsn).is_err());
    }

    #[test]
    fn scheme_detection() {
        assert!(has_scheme("edgedb://x"));
        assert!(has_scheme("other://"));
        assert!(!has_scheme("my_instance"));
        assert!(!has_scheme("://x"));
        assert!(!has_scheme("a b://x"));
    }
}
