//! Project-linked instance discovery.
//!
//! A project is marked by an `edgedb.toml` file. Linking a project to an
//! instance stores the instance name in a per-project stash directory
//! under the platform config dir, keyed by a hash of the project path.
use sha1::{Digest, Sha1};
use std::path::{Path, PathBuf};

use super::config::{ConfigError, Environ};

pub(crate) const PROJECT_MARKER: &str = "edgedb.toml";

/// Walk up from the working directory looking for the project marker.
///
/// The walk never crosses onto another filesystem device.
pub(crate) fn find_project_dir(env: &dyn Environ) -> Result<Option<PathBuf>, ConfigError> {
    let start = env
        .cwd()
        .map_err(|e| ConfigError::new(format!("cannot determine working directory: {e}")))?;

    let mut dir = start.as_path();
    let dev = device_of(dir);
    loop {
        if dir.join(PROJECT_MARKER).is_file() {
            return Ok(Some(dir.to_path_buf()));
        }
        let Some(parent) = dir.parent() else {
            return Ok(None);
        };
        if device_of(parent) != dev {
            return Ok(None);
        }
        dir = parent;
    }
}

#[cfg(unix)]
fn device_of(path: &Path) -> Option<u64> {
    use std::os::unix::fs::MetadataExt;
    std::fs::metadata(path).ok().map(|m| m.dev())
}

#[cfg(not(unix))]
fn device_of(_: &Path) -> Option<u64> {
    None
}

/// Stash directory of a project: `<config>/projects/<basename>-<hash>`,
/// the hash being the SHA-1 hex of the canonical project path.
pub(crate) fn stash_path(project_dir: &Path, env: &dyn Environ) -> Result<PathBuf, ConfigError> {
    let canonical = std::fs::canonicalize(project_dir).map_err(|e| {
        ConfigError::new(format!("cannot resolve project dir {}: {e}", project_dir.display()))
    })?;
    let base_name = canonical
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();

    let mut hashed = canonical.to_string_lossy().into_owned();
    if cfg!(windows) && !hashed.starts_with("\\\\") {
        hashed.insert_str(0, "\\\\?\\");
    }
    let digest = hex::encode(Sha1::digest(hashed.as_bytes()));

    let config = config_dir(env)?;
    Ok(config.join("projects").join(format!("{base_name}-{digest}")))
}

/// The linked instance name of a project, if the project was initialized.
pub(crate) fn linked_instance(
    project_dir: &Path,
    env: &dyn Environ,
) -> Result<Option<String>, ConfigError> {
    let stash = stash_path(project_dir, env)?;
    let path = stash.join("instance-name");
    match std::fs::read_to_string(&path) {
        Ok(name) => Ok(Some(name.trim().to_string())),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(ConfigError::new(format!(
            "cannot read {}: {e}",
            path.display(),
        ))),
    }
}

/// Platform config dir: `$XDG_CONFIG_HOME/edgedb` or the platform
/// equivalent.
pub(crate) fn config_dir(env: &dyn Environ) -> Result<PathBuf, ConfigError> {
    if cfg!(windows) {
        if let Some(base) = env.var("LOCALAPPDATA") {
            return Ok(PathBuf::from(base).join("EdgeDB").join("config"));
        }
    } else if cfg!(target_os = "macos") {
        if let Some(home) = env.home() {
            return Ok(home.join("Library").join("Application Support").join("edgedb"));
        }
    } else {
        if let Some(base) = env.var("XDG_CONFIG_HOME") {
            return Ok(PathBuf::from(base).join("edgedb"));
        }
        if let Some(home) = env.home() {
            return Ok(home.join(".config").join("edgedb"));
        }
    }
    Err(ConfigError::new("cannot determine the platform config directory"))
}

/// Credentials path of a named instance.
pub(crate) fn instance_credentials_path(
    instance: &str,
    env: &dyn Environ,
) -> Result<PathBuf, ConfigError> {
    Ok(config_dir(env)?.join("credentials").join(format!("{instance}.json")))
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::connection::config::test_env::TestEnviron;

    #[test]
    fn stash_path_is_stable() {
        let dir = std::env::temp_dir().join(format!("edgero-proj-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();

        let env = TestEnviron::new().with_var("XDG_CONFIG_HOME", "/tmp/xdg");
        let a = stash_path(&dir, &env).unwrap();
        let b = stash_path(&dir, &env).unwrap();
        assert_eq!(a, b);

        let name = a.file_name().unwrap().to_string_lossy().into_owned();
        let (base, digest) = name.rsplit_once('-').unwrap();
        assert_eq!(base, dir.file_name().unwrap().to_string_lossy());
        assert_eq!(digest.len(), 40);
        assert!(digest.bytes().all(|b| b.is_ascii_hexdigit()));
        if !cfg!(windows) {
            let canonical = std::fs::canonicalize(&dir).unwrap();
            let expect = hex::encode(Sha1::digest(canonical.to_string_lossy().as_bytes()));
            assert_eq!(digest, expect);
        }

        if cfg!(all(unix, not(target_os = "macos"))) {
            assert!(a.starts_with("/tmp/xdg/edgedb/projects"));
        }
        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn project_walk_finds_marker() {
        let root = std::env::temp_dir().join(format!("edgero-walk-{}", std::process::id()));
        let nested = root.join("a").join("b");
        std::fs::create_dir_all(&nested).unwrap();
        std::fs::write(root.join(PROJECT_MARKER), "[edgedb]\n").unwrap();

        let env = TestEnviron::new().with_cwd(&nested);
        let found = find_project_dir(&env).unwrap().unwrap();
        assert_eq!(found, root);

        std::fs::remove_dir_all(&root).unwrap();
    }
}
