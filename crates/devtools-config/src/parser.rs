use crate::{ConfigError, HostConfig, Result};
use std::path::Path;

/// Read and parse `host.config.jsonc`. A missing file yields the defaults.
pub fn parse_host_config(path: &Path) -> Result<HostConfig> {
    if !path.exists() {
        return Ok(HostConfig::default());
    }
    let content =
        std::fs::read_to_string(path).map_err(|e| ConfigError::IoError(path.to_path_buf(), e))?;
    parse_host_config_from_str(&content)
}

pub fn parse_host_config_from_str(jsonc: &str) -> Result<HostConfig> {
    let stripped = strip_jsonc_comments(jsonc);
    if stripped.trim().is_empty() {
        return Ok(HostConfig::default());
    }
    serde_json::from_str(&stripped).map_err(|e| ConfigError::ParseError(e.to_string()))
}

/// Remove `//` and `/* */` comments without touching string literals.
pub fn strip_jsonc_comments(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();
    let mut in_string = false;
    let mut escaped = false;

    while let Some(c) = chars.next() {
        if in_string {
            out.push(c);
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            }
            continue;
        }
        match c {
            '"' => {
                in_string = true;
                out.push(c);
            }
            '/' => match chars.peek() {
                Some('/') => {
                    for next in chars.by_ref() {
                        if next == '\n' {
                            out.push('\n');
                            break;
                        }
                    }
                }
                Some('*') => {
                    chars.next();
                    let mut prev = '\0';
                    for next in chars.by_ref() {
                        if prev == '*' && next == '/' {
                            break;
                        }
                        prev = next;
                    }
                }
                _ => out.push(c),
            },
            _ => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_plain_json() {
        let config = parse_host_config_from_str(r#"{"workspaceSubroot": "packages/ext"}"#).unwrap();
        assert_eq!(config.workspace_subroot.as_deref(), Some("packages/ext"));
    }

    #[test]
    fn test_parse_with_line_and_block_comments() {
        let jsonc = r#"
        // selects the analysis root
        {
            /* only field the core reads */
            "workspaceSubroot": "src"
        }
        "#;
        let config = parse_host_config_from_str(jsonc).unwrap();
        assert_eq!(config.workspace_subroot.as_deref(), Some("src"));
    }

    #[test]
    fn test_comment_markers_inside_strings_survive() {
        let jsonc = r#"{"workspaceSubroot": "a//b/*c*/"}"#;
        let config = parse_host_config_from_str(jsonc).unwrap();
        assert_eq!(config.workspace_subroot.as_deref(), Some("a//b/*c*/"));
    }

    #[test]
    fn test_empty_or_comment_only_input_is_default() {
        assert_eq!(
            parse_host_config_from_str("// nothing here\n").unwrap(),
            HostConfig::default()
        );
    }

    #[test]
    fn test_missing_file_is_default() {
        let config = parse_host_config(Path::new("/nonexistent/host.config.jsonc")).unwrap();
        assert_eq!(config, HostConfig::default());
    }

    #[test]
    fn test_invalid_json_is_parse_error() {
        let result = parse_host_config_from_str("{broken");
        assert!(matches!(result.unwrap_err(), ConfigError::ParseError(_)));
    }
}
