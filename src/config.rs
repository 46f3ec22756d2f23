use std::path::PathBuf;

const DEFAULT_AGENT_TIMEOUT: u64 = 600;
const DEFAULT_MAX_OUTPUT_BYTES: usize = 1024 * 1024;
const DEFAULT_WORKSPACE_BASE: &str = "/tmp/bioeval-workspaces";
const DEFAULT_CACHE_BASE: &str = ".eval_cache";

#[derive(Debug, Clone)]
pub struct Config {
    pub workspace_base: PathBuf,
    pub cache_base: PathBuf,
    pub agent_timeout_secs: u64,
    pub max_output_bytes: usize,
}

impl Config {
    pub fn from_env() -> Self {
        Self {
            workspace_base: PathBuf::from(
                std::env::var("WORKSPACE_BASE").unwrap_or_else(|_| DEFAULT_WORKSPACE_BASE.into()),
            ),
            cache_base: PathBuf::from(
                std::env::var("EVAL_CACHE_BASE").unwrap_or_else(|_| DEFAULT_CACHE_BASE.into()),
            ),
            agent_timeout_secs: env_parse("AGENT_TIMEOUT_SECS", DEFAULT_AGENT_TIMEOUT),
            max_output_bytes: env_parse("MAX_OUTPUT_BYTES", DEFAULT_MAX_OUTPUT_BYTES),
        }
    }

    pub fn log_summary(&self) {
        tracing::info!("Workspace base: {}", self.workspace_base.display());
        tracing::info!("Cache base:     {}", self.cache_base.display());
        tracing::info!("Agent timeout:  {}s", self.agent_timeout_secs);
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::from_env()
    }
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults() {
        let cfg = Config::from_env();
        assert_eq!(cfg.agent_timeout_secs, DEFAULT_AGENT_TIMEOUT);
        assert_eq!(cfg.max_output_bytes, DEFAULT_MAX_OUTPUT_BYTES);
    }

    #[test]
    fn test_env_parse_fallback() {
        assert_eq!(env_parse::<u64>("NONEXISTENT_VAR_XYZ", 42), 42);
    }
}
