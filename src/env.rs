use std::collections::HashMap;
use std::ffi::OsString;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

const ENV_FILE_VAR: &str = "PROMDUMP_ENV_FILE";

/// Loads `.env` files before clap runs, so env-backed flags can see them.
pub fn bootstrap_from_args(args: &[OsString]) -> Result<()> {
    let explicit_env_file = extract_env_file_arg(args).or_else(|| {
        std::env::var_os(ENV_FILE_VAR)
            .filter(|value| !value.is_empty())
            .map(PathBuf::from)
    });
    load_env(explicit_env_file.as_ref())
}

pub fn load_env(explicit_env_file: Option<&PathBuf>) -> Result<()> {
    let cwd = std::env::current_dir().context("failed to read current directory")?;
    let env_files = resolve_env_files(&cwd, explicit_env_file);
    let mut loaded = HashMap::new();

    for env_file in env_files {
        if !env_file.exists() && explicit_env_file.is_none() {
            continue;
        }

        let parsed = dotenvy::from_path_iter(&env_file)
            .with_context(|| format!("failed to read env file {}", env_file.display()))?;
        for item in parsed {
            let (key, value) =
                item.with_context(|| format!("failed to parse env file {}", env_file.display()))?;
            if std::env::var_os(&key).is_some() {
                continue;
            }
            // Later files override earlier ones; the process env beats both.
            loaded.insert(key, value);
        }
    }

    let mut envs: Vec<(String, String)> = loaded.into_iter().collect();
    envs.sort_by(|a, b| a.0.cmp(&b.0));
    for (key, value) in envs {
        std::env::set_var(key, value);
    }
    Ok(())
}

fn extract_env_file_arg(args: &[OsString]) -> Option<PathBuf> {
    let mut explicit = None;
    let mut idx = 1usize;
    while idx < args.len() {
        let Some(arg) = args[idx].to_str() else {
            idx += 1;
            continue;
        };

        if arg == "--" {
            break;
        }

        if arg == "--env-file" {
            if let Some(next) = args.get(idx + 1) {
                explicit = Some(PathBuf::from(next));
            }
            idx += 2;
            continue;
        }

        if let Some(value) = arg.strip_prefix("--env-file=") {
            explicit = Some(PathBuf::from(value));
        }

        idx += 1;
    }
    explicit
}

fn resolve_env_files(cwd: &Path, explicit_env_file: Option<&PathBuf>) -> Vec<PathBuf> {
    if let Some(path) = explicit_env_file {
        let full_path = if path.is_absolute() {
            path.clone()
        } else {
            cwd.join(path)
        };
        return vec![full_path];
    }

    vec![cwd.join(".env"), cwd.join(".env.local")]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn argv(items: &[&str]) -> Vec<OsString> {
        items.iter().map(OsString::from).collect()
    }

    #[test]
    fn env_file_flag_in_both_spellings() {
        assert_eq!(
            extract_env_file_arg(&argv(&["promdump", "dump", "--env-file", "prod.env"])),
            Some(PathBuf::from("prod.env"))
        );
        assert_eq!(
            extract_env_file_arg(&argv(&["promdump", "--env-file=a.env", "push"])),
            Some(PathBuf::from("a.env"))
        );
        assert_eq!(
            extract_env_file_arg(&argv(&["promdump", "push", "--", "--env-file", "x"])),
            None
        );
    }

    #[test]
    fn default_files_are_dot_env_then_local() {
        let cwd = Path::new("/work");
        assert_eq!(
            resolve_env_files(cwd, None),
            vec![PathBuf::from("/work/.env"), PathBuf::from("/work/.env.local")]
        );
        assert_eq!(
            resolve_env_files(cwd, Some(&PathBuf::from("conf/promdump.env"))),
            vec![PathBuf::from("/work/conf/promdump.env")]
        );
    }

    #[test]
    fn explicit_file_values_do_not_override_process_env() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test.env");
        std::fs::write(
            &path,
            "PROMDUMP_TEST_FROM_FILE=file\nPROMDUMP_TEST_ALREADY_SET=file\n",
        )
        .unwrap();
        std::env::set_var("PROMDUMP_TEST_ALREADY_SET", "process");

        load_env(Some(&path)).unwrap();
        assert_eq!(std::env::var("PROMDUMP_TEST_FROM_FILE").unwrap(), "file");
        assert_eq!(std::env::var("PROMDUMP_TEST_ALREADY_SET").unwrap(), "process");
    }

    #[test]
    fn missing_explicit_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(load_env(Some(&dir.path().join("nope.env"))).is_err());
    }
}
