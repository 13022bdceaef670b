use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Options recognized when spawning the Client editor window.
///
/// Arrives over RPC as a loose JSON object; unknown keys are rejected so a
/// typo in an automation script fails loudly instead of being ignored.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct LaunchOptions {
    #[serde(default)]
    pub disable_extensions: bool,
    /// Allow-listed extension IDs, honored only with `disable_extensions`.
    #[serde(default)]
    pub enable_extensions: Vec<String>,
    #[serde(default)]
    pub skip_release_notes: bool,
    #[serde(default)]
    pub skip_welcome: bool,
    #[serde(default)]
    pub disable_gpu: bool,
    #[serde(default)]
    pub disable_workspace_trust: bool,
    #[serde(default)]
    pub verbose: bool,
    #[serde(default)]
    pub locale: Option<String>,
    /// Raw flags appended verbatim after all mapped flags.
    #[serde(default)]
    pub extra_args: Vec<String>,
}

impl LaunchOptions {
    /// Map the recognized options onto editor binary flags.
    pub fn to_args(&self) -> Vec<String> {
        let mut args = Vec::new();
        if self.disable_extensions {
            args.push("--disable-extensions".to_string());
            for id in &self.enable_extensions {
                args.push(format!("--enable-extension={}", id));
            }
        }
        if self.skip_release_notes {
            args.push("--skip-release-notes".to_string());
        }
        if self.skip_welcome {
            args.push("--skip-welcome".to_string());
        }
        if self.disable_gpu {
            args.push("--disable-gpu".to_string());
        }
        if self.disable_workspace_trust {
            args.push("--disable-workspace-trust".to_string());
        }
        if self.verbose {
            args.push("--verbose".to_string());
        }
        if let Some(locale) = &self.locale {
            args.push("--locale".to_string());
            args.push(locale.clone());
        }
        args.extend(self.extra_args.iter().cloned());
        args
    }
}

/// The two hot-reloadable packages.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum PackageRole {
    Ext,
    Mcp,
}

impl PackageRole {
    /// Stable key used in the hash store and in RPC results.
    pub fn key(&self) -> &'static str {
        match self {
            PackageRole::Ext => "ext",
            PackageRole::Mcp => "mcp",
        }
    }
}

/// One rebuildable package: where it lives and which script rebuilds it.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PackageRef {
    pub role: PackageRole,
    pub dir: PathBuf,
    #[serde(default = "default_build_script")]
    pub build_script: String,
}

impl PackageRef {
    pub fn new(role: PackageRole, dir: impl Into<PathBuf>) -> Self {
        Self {
            role,
            dir: dir.into(),
            build_script: default_build_script(),
        }
    }
}

fn default_build_script() -> String {
    "build".to_string()
}

/// User-editable host configuration (`.devtools/host.config.jsonc`).
///
/// The core reads this but does not interpret the subroot; analysis tools do.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct HostConfig {
    #[serde(default)]
    pub workspace_subroot: Option<String>,
}
