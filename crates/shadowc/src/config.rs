//! Compiler configuration.
//!
//! Configuration comes from an XML file: the one named with `--config`, the
//! one named by the `SHADOW_SYSTEM_CONFIG` environment variable, or the
//! built-in per-OS default. A config may name a `parent` config; values
//! already set are kept, so a child only overrides what it mentions, the
//! way the original cascade worked.
//!
//! The configuration is built once during startup and passed by reference
//! everywhere; nothing mutates it afterwards.

use crate::diagnostics::CompilerError;
use anyhow::Context;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::process::Command;

pub const MINIMUM_LLVM_VERSION: &str = "6.0";
pub const MINIMUM_WINDOWS_LLVM_VERSION: &str = "10.0";

const LINUX_SYSTEM: &str = include_str!("../config/linux_system.xml");
const WINDOWS_SYSTEM: &str = include_str!("../config/windows_system.xml");

/// The XML shape of a configuration file.
#[derive(Debug, Default, Deserialize)]
#[serde(rename = "configuration", default)]
struct ConfigFile {
    parent: Option<String>,
    os: Option<String>,
    architecture: Option<u32>,
    llc: Option<String>,
    opt: Option<String>,
    target: Option<String>,
    system: Option<String>,
    #[serde(rename = "import")]
    imports: Vec<String>,
    #[serde(rename = "link")]
    link: Option<String>,
}

/// The resolved, immutable configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub os: String,
    pub architecture: u32,
    pub llc: String,
    pub llvm_opt_level: String,
    pub target: String,
    pub system: PathBuf,
    pub imports: Vec<PathBuf>,
    pub link_command: Vec<String>,
}

impl Config {
    /// Builds the configuration cascade: explicit file, then environment
    /// override, then the built-in default for this OS.
    pub fn build(config_file: Option<&Path>) -> Result<Config, CompilerError> {
        let mut partial = ConfigFile::default();

        if let Some(path) = config_file {
            merge_file(&mut partial, path)?;
        } else if let Ok(env_path) = std::env::var("SHADOW_SYSTEM_CONFIG") {
            merge_file(&mut partial, Path::new(&env_path))?;
        }

        let built_in = if cfg!(windows) {
            WINDOWS_SYSTEM
        } else {
            LINUX_SYSTEM
        };
        let defaults: ConfigFile = quick_xml::de::from_str(built_in)
            .map_err(|e| CompilerError::Configuration(format!("built-in config: {}", e)))?;
        merge(&mut partial, defaults);

        let os = partial.os.unwrap_or_else(|| {
            if cfg!(windows) {
                "Windows".to_string()
            } else {
                "Linux".to_string()
            }
        });
        let config = Config {
            os,
            architecture: partial.architecture.unwrap_or(64),
            llc: partial.llc.unwrap_or_else(|| "llc".to_string()),
            llvm_opt_level: partial.opt.unwrap_or_else(|| "-O3".to_string()),
            target: partial.target.unwrap_or_default(),
            system: PathBuf::from(partial.system.unwrap_or_else(|| ".".to_string())),
            imports: partial.imports.into_iter().map(PathBuf::from).collect(),
            link_command: partial
                .link
                .map(|l| l.split_whitespace().map(str::to_string).collect())
                .unwrap_or_else(|| vec!["clang".to_string()]),
        };
        Ok(config)
    }

    pub fn is_windows(&self) -> bool {
        self.os == "Windows"
    }

    /// Queries `llc --version` and fails when the installation is missing
    /// or too old. Windows needs a higher minimum because of its exception
    /// handling support.
    pub fn check_llvm_version(&self) -> Result<(), CompilerError> {
        let minimum = if self.is_windows() {
            MINIMUM_WINDOWS_LLVM_VERSION
        } else {
            MINIMUM_LLVM_VERSION
        };
        let version = self.llvm_version().unwrap_or_default();
        if compare_versions(&version, minimum) < 0 {
            let found = if version.is_empty() {
                "no LLVM installation found".to_string()
            } else {
                format!("version {} found", version)
            };
            return Err(CompilerError::Configuration(format!(
                "LLVM version {} or higher is required, but {}",
                minimum, found
            )));
        }
        Ok(())
    }

    fn llvm_version(&self) -> anyhow::Result<String> {
        let output = Command::new(&self.llc)
            .arg("--version")
            .output()
            .with_context(|| format!("running {}", self.llc))?;
        let text = String::from_utf8_lossy(&output.stdout).to_string();
        Ok(parse_llvm_version(&text).unwrap_or_default())
    }
}

fn merge_file(into: &mut ConfigFile, path: &Path) -> Result<(), CompilerError> {
    let text = std::fs::read_to_string(path).map_err(|e| {
        CompilerError::Configuration(format!("cannot read {}: {}", path.display(), e))
    })?;
    let parsed: ConfigFile = quick_xml::de::from_str(&text)
        .map_err(|e| CompilerError::Configuration(format!("{}: {}", path.display(), e)))?;
    let parent = parsed.parent.clone();
    merge(into, parsed);
    if let Some(parent) = parent {
        let parent_path = path
            .parent()
            .map(|d| d.join(&parent))
            .unwrap_or_else(|| PathBuf::from(&parent));
        merge_file(into, &parent_path)?;
    }
    Ok(())
}

/// Fills unset fields of `into` from `from`; a child config wins over its
/// parents.
fn merge(into: &mut ConfigFile, from: ConfigFile) {
    if into.os.is_none() {
        into.os = from.os;
    }
    if into.architecture.is_none() {
        into.architecture = from.architecture;
    }
    if into.llc.is_none() {
        into.llc = from.llc;
    }
    if into.opt.is_none() {
        into.opt = from.opt;
    }
    if into.target.is_none() {
        into.target = from.target;
    }
    if into.system.is_none() {
        into.system = from.system;
    }
    if into.imports.is_empty() {
        into.imports = from.imports;
    }
    if into.link.is_none() {
        into.link = from.link;
    }
}

/// Extracts "X.Y.Z" from `llc --version` output.
fn parse_llvm_version(text: &str) -> Option<String> {
    let marker = "LLVM version ";
    let start = text.find(marker)? + marker.len();
    let rest = &text[start..];
    let end = rest
        .find(|c: char| !c.is_ascii_digit() && c != '.')
        .unwrap_or(rest.len());
    Some(rest[..end].to_string())
}

/// Numeric per-component version comparison; alphabetic suffixes are
/// ignored, missing components count as zero.
pub fn compare_versions(a: &str, b: &str) -> i32 {
    let parts_a: Vec<&str> = a.split('.').collect();
    let parts_b: Vec<&str> = b.split('.').collect();
    for i in 0..parts_a.len().max(parts_b.len()) {
        let value_a = parts_a.get(i).map(|p| leading_number(p)).unwrap_or(0);
        let value_b = parts_b.get(i).map(|p| leading_number(p)).unwrap_or(0);
        if value_a != value_b {
            return value_a - value_b;
        }
    }
    0
}

fn leading_number(part: &str) -> i32 {
    let digits: String = part
        .trim()
        .chars()
        .take_while(|c| c.is_ascii_digit())
        .collect();
    digits.parse().unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn versions_compare_numerically_not_lexically() {
        assert!(compare_versions("10.0", "6.0") > 0);
        assert!(compare_versions("6.0", "10.0") < 0);
        assert_eq!(compare_versions("6.0.1", "6.0.1"), 0);
        assert!(compare_versions("6.0.1", "6.0") > 0);
        assert!(compare_versions("9.0svn", "9.0") == 0);
    }

    #[test]
    fn parses_llc_version_banner() {
        let banner = "LLVM (http://llvm.org/):\n  LLVM version 10.0.0\n  Optimized build.";
        assert_eq!(parse_llvm_version(banner).as_deref(), Some("10.0.0"));
        assert_eq!(parse_llvm_version("no version here"), None);
    }

    #[test]
    fn built_in_configs_parse() {
        let linux: ConfigFile = quick_xml::de::from_str(LINUX_SYSTEM).unwrap();
        assert_eq!(linux.os.as_deref(), Some("Linux"));
        let windows: ConfigFile = quick_xml::de::from_str(WINDOWS_SYSTEM).unwrap();
        assert_eq!(windows.os.as_deref(), Some("Windows"));
    }

    #[test]
    fn child_settings_win_over_parent_defaults() {
        let mut into = ConfigFile {
            llc: Some("llc-10".to_string()),
            ..ConfigFile::default()
        };
        let parent: ConfigFile = quick_xml::de::from_str(LINUX_SYSTEM).unwrap();
        merge(&mut into, parent);
        assert_eq!(into.llc.as_deref(), Some("llc-10"));
        assert_eq!(into.os.as_deref(), Some("Linux"));
    }
}
