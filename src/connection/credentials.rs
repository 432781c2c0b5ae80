//! Stored instance credentials.
use std::path::Path;

use super::config::ConfigError;

/// Contents of a credentials JSON file.
#[derive(Debug, Clone, serde::Deserialize)]
pub(crate) struct Credentials {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub database: Option<String>,
    pub user: String,
    pub password: Option<String>,
    pub tls_ca_data: Option<String>,
    pub tls_verify_hostname: Option<bool>,
}

pub(crate) fn read(path: &Path) -> Result<Credentials, ConfigError> {
    let data = std::fs::read_to_string(path).map_err(|e| {
        ConfigError::new(format!("cannot read credentials file {}: {e}", path.display()))
    })?;
    serde_json::from_str(&data).map_err(|e| {
        ConfigError::new(format!("invalid credentials file {}: {e}", path.display()))
    })
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn parses_credentials_json() {
        let dir = std::env::temp_dir().join(format!("edgero-cred-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("inst.json");
        std::fs::write(
            &path,
            r#"{"host": "db.example.com", "port": 10700, "user": "admin",
                "password": "s3", "database": "main", "tls_verify_hostname": false}"#,
        )
        .unwrap();

        let creds = read(&path).unwrap();
        assert_eq!(creds.host.as_deref(), Some("db.example.com"));
        assert_eq!(creds.port, Some(10700));
        assert_eq!(creds.user, "admin");
        assert_eq!(creds.password.as_deref(), Some("s3"));
        assert_eq!(creds.database.as_deref(), Some("main"));
        assert_eq!(creds.tls_verify_hostname, Some(false));
        assert!(creds.tls_ca_data.is_none());

        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn missing_user_is_invalid() {
        let dir = std::env::temp_dir().join(format!("edgero-cred2-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("bad.json");
        std::fs::write(&path, r#"{"host": "h"}"#).unwrap();
        assert!(read(&path).is_err());
        std::fs::remove_dir_all(&dir).unwrap();
    }
}
