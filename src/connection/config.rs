//! Connection configuration resolution.
//!
//! A resolved config is merged from, in order of precedence: explicit
//! options, `EDGEDB_*` environment variables, and the project-linked
//! instance. Within the merge every field is sticky: the first source
//! to set it wins, later sources cannot overwrite it.
use std::{
    borrow::Cow,
    collections::HashMap,
    fmt, io,
    path::{Path, PathBuf},
    time::Duration,
};

use crate::{common::ByteStr, net::TlsParams};

use super::{credentials, dsn, project};

/// Default server port.
pub const DEFAULT_PORT: u16 = 5656;
/// Default server host.
pub const DEFAULT_HOST: &str = "localhost";
/// Default database and user name.
pub const DEFAULT_DATABASE: &str = "edgedb";

/// Inputs to [`Connection::connect`][crate::Connection::connect].
#[derive(Debug, Clone)]
pub struct ConnectOptions {
    pub(crate) dsn: Option<String>,
    pub(crate) instance: Option<String>,
    pub(crate) credentials_file: Option<PathBuf>,
    pub(crate) host: Option<String>,
    pub(crate) port: Option<u16>,
    pub(crate) database: Option<String>,
    pub(crate) user: Option<String>,
    pub(crate) password: Option<String>,
    pub(crate) tls_ca_file: Option<PathBuf>,
    pub(crate) tls_verify_hostname: Option<bool>,
    pub(crate) server_settings: HashMap<String, String>,
    pub(crate) connect_timeout: Option<Duration>,
    pub(crate) command_timeout: Option<Duration>,
    pub(crate) wait_until_available: Option<Duration>,
    pub(crate) logging: bool,
}

impl Default for ConnectOptions {
    fn default() -> Self {
        Self {
            dsn: None,
            instance: None,
            credentials_file: None,
            host: None,
            port: None,
            database: None,
            user: None,
            password: None,
            tls_ca_file: None,
            tls_verify_hostname: None,
            server_settings: HashMap::new(),
            connect_timeout: None,
            command_timeout: None,
            wait_until_available: None,
            logging: true,
        }
    }
}

impl ConnectOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// A DSN (`edgedb://…`) or, without a URL scheme, an instance name.
    pub fn dsn(mut self, dsn: impl Into<String>) -> Self {
        self.dsn = Some(dsn.into());
        self
    }

    /// Name of a linked instance.
    pub fn instance(mut self, instance: impl Into<String>) -> Self {
        self.instance = Some(instance.into());
        self
    }

    /// Path to a credentials JSON file.
    pub fn credentials_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.credentials_file = Some(path.into());
        self
    }

    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.host = Some(host.into());
        self
    }

    pub fn port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    pub fn database(mut self, database: impl Into<String>) -> Self {
        self.database = Some(database.into());
        self
    }

    pub fn user(mut self, user: impl Into<String>) -> Self {
        self.user = Some(user.into());
        self
    }

    pub fn password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    /// Path to a PEM bundle with a custom certificate authority.
    pub fn tls_ca_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.tls_ca_file = Some(path.into());
        self
    }

    pub fn tls_verify_hostname(mut self, verify: bool) -> Self {
        self.tls_verify_hostname = Some(verify);
        self
    }

    /// An opaque setting forwarded to the server.
    pub fn server_setting(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.server_settings.insert(name.into(), value.into());
        self
    }

    /// Abort `connect` when the transport cannot be opened in time.
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = Some(timeout);
        self
    }

    /// Abort a query when no result arrived in time. The connection is
    /// closed, the pipeline state being unknown.
    pub fn command_timeout(mut self, timeout: Duration) -> Self {
        self.command_timeout = Some(timeout);
        self
    }

    /// Retry refused connections until the deadline, for servers still
    /// starting up.
    pub fn wait_until_available(mut self, wait: Duration) -> Self {
        self.wait_until_available = Some(wait);
        self
    }

    /// Forward server log messages to `tracing`. Default on.
    pub fn logging(mut self, logging: bool) -> Self {
        self.logging = logging;
        self
    }

    /// Resolve against the process environment and working directory.
    pub fn resolve(&self) -> Result<ResolvedConfig, ConfigError> {
        resolve(self, &OsEnviron)
    }
}

/// An invalid or incomplete connection configuration.
///
/// Raised synchronously before any I/O.
pub struct ConfigError {
    reason: Cow<'static, str>,
}

impl ConfigError {
    pub(crate) fn new(reason: impl Into<Cow<'static, str>>) -> Self {
        Self { reason: reason.into() }
    }
}

impl std::error::Error for ConfigError { }

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid connection configuration: {}", self.reason)
    }
}

impl fmt::Debug for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "\"{self}\"")
    }
}

/// Process state consumed by the resolver, injected for testability.
pub(crate) trait Environ {
    fn var(&self, name: &str) -> Option<String>;
    fn cwd(&self) -> io::Result<PathBuf>;
    fn home(&self) -> Option<PathBuf>;
}

pub(crate) struct OsEnviron;

impl Environ for OsEnviron {
    fn var(&self, name: &str) -> Option<String> {
        std::env::var(name).ok().filter(|v| !v.is_empty())
    }

    fn cwd(&self) -> io::Result<PathBuf> {
        std::env::current_dir()
    }

    fn home(&self) -> Option<PathBuf> {
        self.var("HOME").or_else(|| self.var("USERPROFILE")).map(PathBuf::from)
    }
}

/// A config field that remembers the first source which set it.
#[derive(Debug)]
pub(crate) struct Sticky<T> {
    slot: Option<(T, &'static str)>,
}

impl<T> Default for Sticky<T> {
    fn default() -> Self {
        Self { slot: None }
    }
}

impl<T> Sticky<T> {
    fn set(&mut self, value: T, source: &'static str) {
        if self.slot.is_none() {
            self.slot = Some((value, source));
        }
    }

    fn get(&self) -> Option<&T> {
        self.slot.as_ref().map(|(value, _)| value)
    }

    fn source(&self) -> &'static str {
        match &self.slot {
            Some((_, source)) => source,
            None => "default",
        }
    }
}

/// The merged and validated endpoint description.
#[derive(Debug, Default)]
pub struct ResolvedConfig {
    host: Sticky<String>,
    port: Sticky<u16>,
    database: Sticky<String>,
    user: Sticky<String>,
    password: Sticky<String>,
    tls_ca: Sticky<Vec<u8>>,
    tls_verify_hostname: Sticky<bool>,
    server_settings: HashMap<String, String>,
}

macro_rules! source_accessor {
    ($($get:ident($field:ident);)*) => {$(
        /// Source label of the field, for diagnostics.
        pub fn $get(&self) -> &'static str {
            self.$field.source()
        }
    )*};
}

impl ResolvedConfig {
    pub fn host(&self) -> &str {
        self.host.get().map(String::as_str).unwrap_or(DEFAULT_HOST)
    }

    pub fn port(&self) -> u16 {
        self.port.get().copied().unwrap_or(DEFAULT_PORT)
    }

    pub fn database(&self) -> &str {
        self.database.get().map(String::as_str).unwrap_or(DEFAULT_DATABASE)
    }

    pub fn user(&self) -> &str {
        self.user.get().map(String::as_str).unwrap_or(DEFAULT_DATABASE)
    }

    pub fn password(&self) -> Option<&str> {
        self.password.get().map(String::as_str)
    }

    /// `(host, port)` of the endpoint.
    pub fn address(&self) -> (&str, u16) {
        (self.host(), self.port())
    }

    pub fn server_settings(&self) -> &HashMap<String, String> {
        &self.server_settings
    }

    source_accessor! {
        host_source(host);
        port_source(port);
        database_source(database);
        user_source(user);
        password_source(password);
        tls_ca_source(tls_ca);
        tls_verify_hostname_source(tls_verify_hostname);
    }

    /// TLS inputs, `None` when nothing was configured and the
    /// connection stays on plain TCP.
    pub(crate) fn tls_params(&self) -> Option<TlsParams> {
        if self.tls_ca.get().is_none() && self.tls_verify_hostname.get().is_none() {
            return None;
        }
        Some(TlsParams {
            ca_pem: self.tls_ca.get().cloned(),
            verify_hostname: self.tls_verify_hostname.get().copied(),
        })
    }

    fn merge_settings(&mut self, settings: &HashMap<String, String>) {
        for (name, value) in settings {
            self.server_settings
                .entry(name.clone())
                .or_insert_with(|| value.clone());
        }
    }
}

// ===== validators =====

fn validate_host(host: &str) -> Result<String, ConfigError> {
    if host.is_empty() {
        return Err(ConfigError::new("invalid host: empty string"));
    }
    if host.contains(',') {
        return Err(ConfigError::new(format!(
            "invalid host {host:?}: multiple hosts are not allowed",
        )));
    }
    if host.contains('/') {
        return Err(ConfigError::new(format!(
            "invalid host {host:?}: unix domain sockets are not supported",
        )));
    }
    Ok(host.into())
}

fn validate_port(port: &str) -> Result<u16, ConfigError> {
    match port.parse::<u32>() {
        Ok(p @ 1..=65535) => Ok(p as u16),
        _ => Err(ConfigError::new(format!(
            "invalid port {port:?}: expected an integer in 1..=65535",
        ))),
    }
}

fn validate_name(kind: &'static str, name: &str) -> Result<String, ConfigError> {
    if name.is_empty() {
        return Err(ConfigError::new(format!("invalid {kind}: empty string")));
    }
    Ok(name.into())
}

fn parse_verify_hostname(value: &str) -> Result<bool, ConfigError> {
    match value.to_ascii_lowercase().as_str() {
        "true" | "t" | "yes" | "y" | "on" | "1" => Ok(true),
        "false" | "f" | "no" | "n" | "off" | "0" => Ok(false),
        _ => Err(ConfigError::new(format!(
            "invalid tls_verify_hostname {value:?}: expected a boolean",
        ))),
    }
}

fn read_ca_file(path: &Path) -> Result<Vec<u8>, ConfigError> {
    std::fs::read(path).map_err(|e| {
        ConfigError::new(format!("cannot read TLS CA file {}: {e}", path.display()))
    })
}

// ===== resolution =====

mod source {
    pub const OPTIONS: &str = "explicit options";
    pub const DSN: &str = "DSN";
    pub const ENV: &str = "environment";
    pub const CREDENTIALS: &str = "credentials file";
    pub const PROJECT: &str = "project linked credentials";
}

/// One compound option found at a precedence level.
enum Compound {
    Dsn(ByteStr),
    Instance(String),
    CredentialsFile(PathBuf),
    HostPort { host: Option<String>, port: Option<u16> },
}

/// Enforce the at-most-one rule and return the winner, if any.
fn pick_compound(found: Vec<(&'static str, Compound)>) -> Result<Option<Compound>, ConfigError> {
    let mut iter = found.into_iter();
    let Some((_, compound)) = iter.next() else {
        return Ok(None);
    };
    if iter.next().is_some() {
        return Err(ConfigError::new(
            "Cannot have more than one of the following connection options: \
             dsn, instance name, credentials file, or host/port",
        ));
    }
    Ok(Some(compound))
}

pub(crate) fn resolve(
    options: &ConnectOptions,
    env: &dyn Environ,
) -> Result<ResolvedConfig, ConfigError> {
    let mut cfg = ResolvedConfig::default();

    // ----- explicit options -----

    let mut found = Vec::new();
    if let Some(dsn) = &options.dsn {
        match dsn::has_scheme(dsn) {
            true => found.push(("dsn", Compound::Dsn(ByteStr::copy_from_str(dsn)))),
            false => found.push(("instance name", Compound::Instance(dsn.clone()))),
        }
    }
    if let Some(instance) = &options.instance {
        found.push(("instance name", Compound::Instance(instance.clone())));
    }
    if let Some(path) = &options.credentials_file {
        found.push(("credentials file", Compound::CredentialsFile(path.clone())));
    }
    if options.host.is_some() || options.port.is_some() {
        found.push((
            "host/port",
            Compound::HostPort { host: options.host.clone(), port: options.port },
        ));
    }
    let mut compound = pick_compound(found)?;
    let mut compound_level = source::OPTIONS;

    if let Some(database) = &options.database {
        cfg.database.set(validate_name("database", database)?, source::OPTIONS);
    }
    if let Some(user) = &options.user {
        cfg.user.set(validate_name("user", user)?, source::OPTIONS);
    }
    if let Some(password) = &options.password {
        cfg.password.set(password.clone(), source::OPTIONS);
    }
    if let Some(path) = &options.tls_ca_file {
        cfg.tls_ca.set(read_ca_file(path)?, source::OPTIONS);
    }
    if let Some(verify) = options.tls_verify_hostname {
        cfg.tls_verify_hostname.set(verify, source::OPTIONS);
    }
    cfg.merge_settings(&options.server_settings);

    // ----- environment -----

    let mut found = Vec::new();
    if let Some(dsn) = env.var("EDGEDB_DSN") {
        found.push(("dsn", Compound::Dsn(ByteStr::from(dsn))));
    }
    if let Some(instance) = env.var("EDGEDB_INSTANCE") {
        found.push(("instance name", Compound::Instance(instance)));
    }
    if let Some(path) = env.var("EDGEDB_CREDENTIALS_FILE") {
        found.push(("credentials file", Compound::CredentialsFile(path.into())));
    }
    let env_host = env.var("EDGEDB_HOST");
    let env_port = match env.var("EDGEDB_PORT") {
        // Docker composes a linked container's address into *_PORT
        Some(port) if port.starts_with("tcp://") => {
            tracing::warn!(
                "EDGEDB_PORT is {port:?} and looks like a Docker link, ignoring",
            );
            None
        }
        Some(port) => Some(validate_port(&port)?),
        None => None,
    };
    if env_host.is_some() || env_port.is_some() {
        let host = env_host.as_deref().map(validate_host).transpose()?;
        found.push(("host/port", Compound::HostPort { host, port: env_port }));
    }
    let env_compound = pick_compound(found)?;
    if compound.is_none() {
        compound = env_compound;
        compound_level = source::ENV;
    }

    if let Some(database) = env.var("EDGEDB_DATABASE") {
        cfg.database.set(validate_name("database", &database)?, source::ENV);
    }
    if let Some(user) = env.var("EDGEDB_USER") {
        cfg.user.set(validate_name("user", &user)?, source::ENV);
    }
    if let Some(password) = env.var("EDGEDB_PASSWORD") {
        cfg.password.set(password, source::ENV);
    }
    if let Some(path) = env.var("EDGEDB_TLS_CA_FILE") {
        cfg.tls_ca.set(read_ca_file(Path::new(&path))?, source::ENV);
    }
    if let Some(verify) = env.var("EDGEDB_TLS_VERIFY_HOSTNAME") {
        cfg.tls_verify_hostname.set(parse_verify_hostname(&verify)?, source::ENV);
    }

    // ----- apply the winning compound option, or fall back to the
    // project-linked instance -----

    match compound {
        Some(compound) => apply_compound(&mut cfg, compound, compound_level, env)?,
        None => {
            let Some(project_dir) = project::find_project_dir(env)? else {
                return Err(ConfigError::new(
                    "no 'edgedb.toml' found and no connection options specified \
                     either (host/port, instance name, DSN or credentials file)",
                ));
            };
            let Some(instance) = project::linked_instance(&project_dir, env)? else {
                return Err(ConfigError::new(format!(
                    "found 'edgedb.toml' at {} but the project is not initialized",
                    project_dir.display(),
                )));
            };
            apply_instance(&mut cfg, &instance, source::PROJECT, env)?;
        }
    }

    Ok(cfg)
}

fn apply_compound(
    cfg: &mut ResolvedConfig,
    compound: Compound,
    level: &'static str,
    env: &dyn Environ,
) -> Result<(), ConfigError> {
    match compound {
        Compound::Dsn(dsn) => apply_dsn(cfg, &dsn, env),
        Compound::Instance(instance) => {
            apply_instance(cfg, &instance, source::CREDENTIALS, env)
        }
        Compound::CredentialsFile(path) => {
            let creds = credentials::read(&path)?;
            apply_credentials(cfg, creds, source::CREDENTIALS);
            Ok(())
        }
        Compound::HostPort { host, port } => {
            if let Some(host) = host {
                cfg.host.set(validate_host(&host)?, level);
            }
            if let Some(port) = port {
                if port == 0 {
                    return Err(ConfigError::new("invalid port 0"));
                }
                cfg.port.set(port, level);
            }
            Ok(())
        }
    }
}

fn apply_dsn(cfg: &mut ResolvedConfig, raw: &ByteStr, env: &dyn Environ) -> Result<(), ConfigError> {
    let parsed = dsn::parse(raw)?;

    if let Some(host) = &parsed.host {
        cfg.host.set(validate_host(host)?, source::DSN);
    }
    if let Some(port) = &parsed.port {
        cfg.port.set(validate_port(port)?, source::DSN);
    }
    if let Some(user) = &parsed.user {
        cfg.user.set(validate_name("user", user)?, source::DSN);
    }
    if let Some(password) = &parsed.password {
        cfg.password.set(password.to_string(), source::DSN);
    }
    if let Some(database) = &parsed.database {
        cfg.database.set(validate_name("database", database)?, source::DSN);
    }

    for (field, variant, value) in &parsed.params {
        let value = match *variant {
            "" => value.to_string(),
            "_env" => env.var(value).ok_or_else(|| {
                ConfigError::new(format!(
                    "environment variable {} referenced by the DSN is not set",
                    value.as_str(),
                ))
            })?,
            "_file" => std::fs::read_to_string(value.as_str())
                .map_err(|e| {
                    ConfigError::new(format!(
                        "cannot read {} referenced by the DSN: {e}",
                        value.as_str(),
                    ))
                })?
                .trim_end()
                .to_string(),
            _ => unreachable!("unknown DSN variant"),
        };
        match *field {
            "host" => cfg.host.set(validate_host(&value)?, source::DSN),
            "port" => cfg.port.set(validate_port(&value)?, source::DSN),
            "database" => cfg.database.set(validate_name("database", &value)?, source::DSN),
            "user" => cfg.user.set(validate_name("user", &value)?, source::DSN),
            "password" => cfg.password.set(value, source::DSN),
            "tls_ca_file" => cfg.tls_ca.set(read_ca_file(Path::new(&value))?, source::DSN),
            "tls_verify_hostname" => {
                cfg.tls_verify_hostname.set(parse_verify_hostname(&value)?, source::DSN)
            }
            _ => unreachable!("unknown DSN field"),
        }
    }

    cfg.merge_settings(&parsed.server_settings);
    Ok(())
}

fn apply_instance(
    cfg: &mut ResolvedConfig,
    instance: &str,
    label: &'static str,
    env: &dyn Environ,
) -> Result<(), ConfigError> {
    if instance.is_empty()
        || !instance
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-')
    {
        return Err(ConfigError::new(format!("invalid instance name {instance:?}")));
    }
    let path = project::instance_credentials_path(instance, env)?;
    let creds = credentials::read(&path)?;
    apply_credentials(cfg, creds, label);
    Ok(())
}

fn apply_credentials(cfg: &mut ResolvedConfig, creds: credentials::Credentials, label: &'static str) {
    if let Some(host) = creds.host {
        cfg.host.set(host, label);
    }
    if let Some(port) = creds.port {
        cfg.port.set(port, label);
    }
    if let Some(database) = creds.database {
        cfg.database.set(database, label);
    }
    cfg.user.set(creds.user, label);
    if let Some(password) = creds.password {
        cfg.password.set(password, label);
    }
    if let Some(pem) = creds.tls_ca_data {
        cfg.tls_ca.set(pem.into_bytes(), label);
    }
    if let Some(verify) = creds.tls_verify_hostname {
        cfg.tls_verify_hostname.set(verify, label);
    }
}

#[cfg(test)]
pub(crate) mod test_env {
    use std::{collections::HashMap, io, path::{Path, PathBuf}};

    use super::Environ;

    /// In-memory [`Environ`] for resolver tests.
    pub(crate) struct TestEnviron {
        vars: HashMap<String, String>,
        cwd: PathBuf,
        home: Option<PathBuf>,
    }

    impl TestEnviron {
        pub fn new() -> Self {
            Self { vars: HashMap::new(), cwd: PathBuf::from("/"), home: None }
        }

        pub fn with_var(mut self, name: &str, value: &str) -> Self {
            self.vars.insert(name.into(), value.into());
            self
        }

        pub fn with_cwd(mut self, cwd: impl AsRef<Path>) -> Self {
            self.cwd = cwd.as_ref().into();
            self
        }

        pub fn with_home(mut self, home: impl AsRef<Path>) -> Self {
            self.home = Some(home.as_ref().into());
            self
        }
    }

    impl Environ for TestEnviron {
        fn var(&self, name: &str) -> Option<String> {
            self.vars.get(name).cloned()
        }

        fn cwd(&self) -> io::Result<PathBuf> {
            Ok(self.cwd.clone())
        }

        fn home(&self) -> Option<PathBuf> {
            self.home.clone()
        }
    }
}
