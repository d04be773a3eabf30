use std::path::PathBuf;

/// Process-level settings, read once at startup. Workspace-level settings
/// live in the database (see `setup.get`).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Config {
    pub workspace: Option<PathBuf>,
    pub log_filter: Option<String>,
    pub log_json: bool,
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_lookup(|k| std::env::var(k).ok())
    }

    fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Self {
        let non_empty = |k: &str| get(k).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        Self {
            workspace: non_empty("TRANSPORTD_WORKSPACE").map(PathBuf::from),
            log_filter: non_empty("TRANSPORTD_LOG").or_else(|| non_empty("RUST_LOG")),
            log_json: non_empty("TRANSPORTD_LOG_JSON")
                .and_then(|v| parse_bool(&v))
                .unwrap_or(false),
        }
    }
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
