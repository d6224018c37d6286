use std::env;
use std::process::Command;

const VERSION_VAR: &str = "PROMDUMP_VERSION_STRING";

fn non_empty_env(name: &str) -> Option<String> {
    env::var(name)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn git(args: &[&str]) -> Option<String> {
    let output = Command::new("git").args(args).output().ok()?;
    if !output.status.success() {
        return None;
    }
    let text = String::from_utf8_lossy(&output.stdout).trim().to_string();
    (!text.is_empty()).then_some(text)
}

fn main() {
    let version = non_empty_env(VERSION_VAR).unwrap_or_else(|| {
        let pkg_version = env::var("CARGO_PKG_VERSION").unwrap_or_else(|_| "0.0.0".to_string());
        let sha = git(&["rev-parse", "--short=12", "HEAD"]).unwrap_or_else(|| "dev".to_string());
        format!("{pkg_version}-canary.{sha}")
    });
    println!("cargo:rustc-env={VERSION_VAR}={version}");

    println!("cargo:rerun-if-env-changed={VERSION_VAR}");
    let head = git(&["rev-parse", "--git-path", "HEAD"]).unwrap_or_else(|| ".git/HEAD".to_string());
    println!("cargo:rerun-if-changed={head}");
}
