//! # devtools-config
//!
//! Pipe naming, on-disk state layout, and launch configuration for the
//! vscode-devtools orchestration core.
//!
//! ## Quick Start
//!
//! ```rust
//! use devtools_config::{validate_launch_options, LaunchOptions, WorkspacePaths};
//!
//! let options: LaunchOptions = serde_json::from_str(
//!     r#"{"disableExtensions": true, "enableExtensions": ["vendor.tool"]}"#,
//! )
//! .expect("valid options");
//! validate_launch_options(&options).expect("validation passes");
//!
//! let paths = WorkspacePaths::new("/work/project");
//! assert!(paths.session_file().ends_with(".devtools/host-session.json"));
//! ```
//!
//! ## Validation Rules
//!
//! - `enableExtensions` is only meaningful together with `disableExtensions`
//! - Extension IDs must be non-empty and unique
//! - Raw pass-through args must not embed newlines (the wire protocol is
//!   line-delimited)

pub mod error;
pub mod parser;
pub mod paths;
pub mod types;
pub mod validator;

pub use error::{ConfigError, Result};
pub use parser::{parse_host_config, parse_host_config_from_str, strip_jsonc_comments};
pub use paths::*;
pub use types::*;
pub use validator::validate_launch_options;
