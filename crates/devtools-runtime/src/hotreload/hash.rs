//! Content hashing over a TypeScript package's source set.
//!
//! The source set comes from the package's own tsconfig (the `.build`
//! variant wins when present), with the `extends` chain, `include`, and
//! `exclude` honored through real glob matching. The digest is SHA-256 over
//! the sorted list of (relative forward-slash path, raw bytes) pairs, so
//! metadata changes never move it and any content byte does.

use crate::{Error, Result};
use devtools_config::strip_jsonc_comments;
use globset::{Glob, GlobSet, GlobSetBuilder};
use serde::Deserialize;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

const BUILD_CONFIG: &str = "tsconfig.build.json";
const DEFAULT_CONFIG: &str = "tsconfig.json";
/// tsconfig's own implicit excludes.
const DEFAULT_EXCLUDES: [&str; 3] = ["node_modules", "bower_components", "jspm_packages"];
const SOURCE_EXTENSIONS: [&str; 5] = ["ts", "tsx", "mts", "cts", "js"];
/// `extends` chains deeper than this are considered circular.
const MAX_EXTENDS_DEPTH: usize = 16;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct TsConfig {
    extends: Option<String>,
    include: Option<Vec<String>>,
    exclude: Option<Vec<String>>,
    compiler_options: CompilerOptions,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct CompilerOptions {
    out_dir: Option<String>,
}

#[derive(Debug, Clone)]
pub struct PackageHash {
    pub hash: String,
    pub file_count: usize,
}

/// Hash one package directory. Heavy file IO runs off the event loop.
pub async fn hash_package(dir: &Path) -> Result<PackageHash> {
    let dir = dir.to_path_buf();
    tokio::task::spawn_blocking(move || hash_package_sync(&dir))
        .await
        .map_err(|e| Error::Handler(format!("hash task failed: {}", e)))?
}

pub fn hash_package_sync(dir: &Path) -> Result<PackageHash> {
    let files = resolve_sources(dir)?;
    let mut hasher = Sha256::new();
    for relative in &files {
        hasher.update(relative.as_bytes());
        let bytes = std::fs::read(dir.join(relative))?;
        hasher.update(&bytes);
    }
    let digest = hasher.finalize();
    Ok(PackageHash {
        hash: digest.iter().map(|b| format!("{:02x}", b)).collect(),
        file_count: files.len(),
    })
}

/// The sorted relative (forward-slash) source paths the tsconfig selects.
pub fn resolve_sources(dir: &Path) -> Result<Vec<String>> {
    let config = load_config_chain(dir)?;

    let include = config
        .include
        .clone()
        .unwrap_or_else(|| vec!["**/*".to_string()]);
    let mut exclude: Vec<String> = config.exclude.clone().unwrap_or_else(|| {
        DEFAULT_EXCLUDES.iter().map(|e| e.to_string()).collect()
    });
    if let Some(out_dir) = &config.compiler_options.out_dir {
        exclude.push(out_dir.trim_start_matches("./").to_string());
    }

    let include_set = build_globset(&include)?;
    let exclude_set = build_globset(&exclude)?;

    let mut files = Vec::new();
    for entry in WalkDir::new(dir).follow_links(false) {
        let entry = entry.map_err(|e| Error::Handler(format!("source walk failed: {}", e)))?;
        if !entry.file_type().is_file() {
            continue;
        }
        let relative = entry
            .path()
            .strip_prefix(dir)
            .expect("walkdir yields children of its root");
        let relative = forward_slashes(relative);
        if !has_source_extension(&relative) {
            continue;
        }
        if include_set.is_match(&relative) && !exclude_set.is_match(&relative) {
            files.push(relative);
        }
    }
    files.sort();
    Ok(files)
}

/// Load the preferred config and fold its `extends` chain, child fields
/// winning. Missing configs mean "everything", matching tsc's default
/// file set.
fn load_config_chain(dir: &Path) -> Result<TsConfig> {
    let path = if dir.join(BUILD_CONFIG).exists() {
        dir.join(BUILD_CONFIG)
    } else if dir.join(DEFAULT_CONFIG).exists() {
        dir.join(DEFAULT_CONFIG)
    } else {
        return Ok(TsConfig::default());
    };
    load_config_at(&path, 0)
}

fn load_config_at(path: &Path, depth: usize) -> Result<TsConfig> {
    if depth >= MAX_EXTENDS_DEPTH {
        return Err(Error::Handler(format!(
            "tsconfig extends chain too deep at {}",
            path.display()
        )));
    }
    let content = std::fs::read_to_string(path)?;
    let mut config: TsConfig = serde_json::from_str(&strip_jsonc_comments(&content))
        .map_err(|e| Error::Handler(format!("{}: {}", path.display(), e)))?;

    if let Some(extends) = config.extends.clone() {
        let base_dir = path.parent().unwrap_or_else(|| Path::new("."));
        // tsc appends .json to an extensionless extends target; it never
        // rewrites an existing suffix like ".base".
        let mut base_path = base_dir.join(&extends);
        if base_path.extension().and_then(|e| e.to_str()) != Some("json") {
            let mut raw = base_path.into_os_string();
            raw.push(".json");
            base_path = PathBuf::from(raw);
        }
        let base = load_config_at(&base_path, depth + 1)?;
        // Child fields replace the parent's wholesale; tsc does not merge
        // include/exclude lists.
        config.include = config.include.or(base.include);
        config.exclude = config.exclude.or(base.exclude);
        if config.compiler_options.out_dir.is_none() {
            config.compiler_options.out_dir = base.compiler_options.out_dir;
        }
    }
    Ok(config)
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        // A bare directory name selects everything under it, as tsc does.
        let expanded = if pattern.contains('*') || pattern.contains('?') {
            pattern.clone()
        } else {
            format!("{}/**", pattern.trim_end_matches('/'))
        };
        for candidate in [expanded.clone(), pattern.clone()] {
            let glob = Glob::new(&candidate)
                .map_err(|e| Error::Handler(format!("bad glob {:?}: {}", candidate, e)))?;
            builder.add(glob);
        }
    }
    builder
        .build()
        .map_err(|e| Error::Handler(format!("globset build failed: {}", e)))
}

fn forward_slashes(path: &Path) -> String {
    path.components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

fn has_source_extension(relative: &str) -> bool {
    relative
        .rsplit('.')
        .next()
        .map(|ext| SOURCE_EXTENSIONS.contains(&ext))
        .unwrap_or(false)
}
