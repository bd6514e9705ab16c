//! `.env` persistence
//!
//! Instance environments are stored as `KEY=VALUE` lines without quoting.
//! Only the first `=` separates key from value, so values may contain `=`.

use std::path::{Path, PathBuf};
use thiserror::Error;
use vertex_core::domain::instance::EnvVariables;

pub const ENV_FILENAME: &str = ".env";

#[derive(Debug, Error)]
pub enum EnvError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Malformed line {line}: expected KEY=VALUE")]
    Malformed { line: usize },

    #[error("Invalid key '{0}'")]
    InvalidKey(String),

    #[error("Value of '{0}' spans several lines")]
    InvalidValue(String),
}

pub type Result<T> = std::result::Result<T, EnvError>;

/// Path of the env file of an instance
pub fn env_path(instance_dir: &Path) -> PathBuf {
    instance_dir.join(ENV_FILENAME)
}

/// Parses `.env` content
///
/// Blank lines and lines starting with `#` are skipped.
pub fn parse(content: &str) -> Result<EnvVariables> {
    let mut env = EnvVariables::new();

    for (index, raw) in content.lines().enumerate() {
        if raw.trim().is_empty() || raw.trim_start().starts_with('#') {
            continue;
        }

        let (key, value) = raw
            .split_once('=')
            .ok_or(EnvError::Malformed { line: index + 1 })?;

        let key = key.trim();
        if key.is_empty() {
            return Err(EnvError::Malformed { line: index + 1 });
        }

        env.insert(key.to_string(), value.to_string());
    }

    Ok(env)
}

/// Renders an env map, one `KEY=VALUE` per line
pub fn render(env: &EnvVariables) -> Result<String> {
    let mut out = String::new();

    for (key, value) in env {
        // Keys are trimmed on read, so padded keys would not survive a round trip
        if key.is_empty()
            || key != key.trim()
            || key.contains(['=', '\n', '\r'])
            || key.starts_with('#')
        {
            return Err(EnvError::InvalidKey(key.clone()));
        }
        if value.contains(['\n', '\r']) {
            return Err(EnvError::InvalidValue(key.clone()));
        }

        out.push_str(key);
        out.push('=');
        out.push_str(value);
        out.push('\n');
    }

    Ok(out)
}

/// Reads `<instance_dir>/.env`, returning an empty map if it does not exist
pub async fn read(instance_dir: &Path) -> Result<EnvVariables> {
    match tokio::fs::read_to_string(env_path(instance_dir)).await {
        Ok(content) => parse(&content),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(EnvVariables::new()),
        Err(e) => Err(e.into()),
    }
}

/// Writes `<instance_dir>/.env`, replacing its content
pub async fn write(instance_dir: &Path, env: &EnvVariables) -> Result<()> {
    let content = render(env)?;
    tokio::fs::write(env_path(instance_dir), content).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_parse_splits_on_first_equal() {
        let env = parse("A=1\n\n# comment\nURL=postgres://u:p@h/db?x=y\nEMPTY=\n").unwrap();
        assert_eq!(env.len(), 3);
        assert_eq!(env["URL"], "postgres://u:p@h/db?x=y");
        assert_eq!(env["EMPTY"], "");
    }

    #[test]
    fn test_parse_rejects_line_without_equal() {
        assert!(matches!(
            parse("A=1\nnope\n"),
            Err(EnvError::Malformed { line: 2 })
        ));
    }

    #[test]
    fn test_render_rejects_multiline_value() {
        let mut env = EnvVariables::new();
        env.insert("A".to_string(), "one\ntwo".to_string());
        assert!(matches!(render(&env), Err(EnvError::InvalidValue(_))));

        let mut env = EnvVariables::new();
        env.insert("A=B".to_string(), "x".to_string());
        assert!(matches!(render(&env), Err(EnvError::InvalidKey(_))));
    }

    #[test]
    fn test_render_rejects_padded_keys() {
        for key in [" PORT", "PORT ", " #HIDDEN", "\tTAB", ""] {
            let mut env = EnvVariables::new();
            env.insert(key.to_string(), "1".to_string());
            assert!(
                matches!(render(&env), Err(EnvError::InvalidKey(_))),
                "key {:?} was accepted",
                key
            );
        }
    }

    #[tokio::test]
    async fn test_padded_key_is_never_written() {
        let dir = TempDir::new().unwrap();

        let mut env = EnvVariables::new();
        env.insert("PORT".to_string(), "2".to_string());
        write(dir.path(), &env).await.unwrap();

        env.insert(" PORT".to_string(), "1".to_string());
        assert!(write(dir.path(), &env).await.is_err());

        // The previous file is untouched
        let read_back = read(dir.path()).await.unwrap();
        assert_eq!(read_back.len(), 1);
        assert_eq!(read_back["PORT"], "2");
    }

    #[tokio::test]
    async fn test_write_then_read_round_trip() {
        let dir = TempDir::new().unwrap();

        let mut env = EnvVariables::new();
        env.insert("PORT".to_string(), "6379".to_string());
        env.insert("TOKEN".to_string(), "a=b==c".to_string());
        env.insert("SPACES".to_string(), "  padded ".to_string());
        env.insert("EMPTY".to_string(), String::new());

        write(dir.path(), &env).await.unwrap();
        let read_back = read(dir.path()).await.unwrap();

        assert_eq!(read_back, env);
    }

    #[tokio::test]
    async fn test_read_missing_file_is_empty() {
        let dir = TempDir::new().unwrap();
        assert!(read(dir.path()).await.unwrap().is_empty());
    }
}
