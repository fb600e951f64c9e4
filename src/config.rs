use anyhow::{Context, Result, bail};
use std::{
    collections::HashMap,
    env, fs,
    path::{Path, PathBuf},
};

pub const DEFAULT_ENV_PATH: &str = ".env";
pub const DEFAULT_PORT: u16 = 3000;
pub const DEFAULT_HOST: &str = "0.0.0.0";
pub const DEFAULT_WWW_ROOT: &str = "public";
pub const DEFAULT_COOKIES_PATH: &str = "cookies.txt";
pub const DEFAULT_OUTPUT_EXT: &str = "m4a";
pub const DEFAULT_SIZE_THRESHOLD_BYTES: u64 = 14 * 1024 * 1024;
pub const DEFAULT_PROXY_API_URL: &str = "https://ytdlbyjonell-0c2a4d00cfcc.herokuapp.com/yt";
pub const DEFAULT_INFO_API_URL: &str = "https://ytdlbyjonell-0c2a4d00cfcc.herokuapp.com/info";
pub const DEFAULT_TIKTOK_API_URL: &str = "https://www.tikwm.com/api/";
pub const DEFAULT_RELAY_BASE_URL: &str = "https://www.cjoint.com";
pub const LIBRARY_FILE: &str = "library.json";
pub const PLACEHOLDER_TITLE: &str = "GDPH_BOT_MUSIC_TIKTOK_NOT_FOUND";

/// Strategy used for URLs that are not TikTok links.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchStrategy {
    TitleScrape,
    Metadata,
}

impl FetchStrategy {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "title-scrape" | "title_scrape" | "scrape" => Some(Self::TitleScrape),
            "metadata" | "info" => Some(Self::Metadata),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RelaySettings {
    pub port: u16,
    pub host: String,
    pub work_dir: PathBuf,
    pub www_root: PathBuf,
    pub library_path: PathBuf,
    pub cookies_path: PathBuf,
    pub placeholder_path: PathBuf,
    pub fetch_strategy: FetchStrategy,
    pub output_ext: String,
    pub size_threshold_bytes: u64,
    pub proxy_api_url: String,
    pub info_api_url: String,
    pub tiktok_api_url: String,
    pub relay_base_url: String,
    pub alt_host_url: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct SettingsOverrides {
    pub port: Option<u16>,
    pub host: Option<String>,
    pub work_dir: Option<PathBuf>,
    pub www_root: Option<PathBuf>,
    pub env_path: Option<PathBuf>,
}

pub fn resolve_settings(overrides: SettingsOverrides) -> Result<RelaySettings> {
    let env_path = overrides
        .env_path
        .clone()
        .unwrap_or_else(|| PathBuf::from(DEFAULT_ENV_PATH));
    let file_vars = read_env_file(&env_path)?;
    build_settings_with_overrides(&file_vars, env_var_string, overrides)
}

#[cfg(test)]
fn build_settings(
    file_vars: &HashMap<String, String>,
    env_lookup: impl Fn(&str) -> Option<String>,
) -> Result<RelaySettings> {
    build_settings_with_overrides(file_vars, env_lookup, SettingsOverrides::default())
}

fn build_settings_with_overrides(
    file_vars: &HashMap<String, String>,
    env_lookup: impl Fn(&str) -> Option<String>,
    overrides: SettingsOverrides,
) -> Result<RelaySettings> {
    let lookup = |key: &str| lookup_value(key, file_vars, &env_lookup);

    let port = overrides
        .port
        .or_else(|| lookup("PORT").and_then(|value| value.parse::<u16>().ok()))
        .unwrap_or(DEFAULT_PORT);
    let host = overrides
        .host
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .or_else(|| lookup("HOST"))
        .unwrap_or_else(|| DEFAULT_HOST.to_string());
    let work_dir = overrides
        .work_dir
        .or_else(|| lookup("WORK_DIR").map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from("."));
    let www_root = overrides
        .www_root
        .or_else(|| lookup("WWW_ROOT").map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from(DEFAULT_WWW_ROOT));
    let library_path = lookup("LIBRARY_PATH")
        .map(PathBuf::from)
        .unwrap_or_else(|| work_dir.join(LIBRARY_FILE));
    let cookies_path = lookup("COOKIES_PATH")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_COOKIES_PATH));
    let output_ext = lookup("OUTPUT_EXT")
        .map(|value| value.trim_start_matches('.').to_string())
        .filter(|value| !value.is_empty())
        .unwrap_or_else(|| DEFAULT_OUTPUT_EXT.to_string());
    let placeholder_path = lookup("PLACEHOLDER_PATH")
        .map(PathBuf::from)
        .unwrap_or_else(|| work_dir.join(format!("{PLACEHOLDER_TITLE}.{output_ext}")));
    let fetch_strategy = match lookup("FETCH_STRATEGY") {
        Some(raw) => match FetchStrategy::parse(&raw) {
            Some(strategy) => strategy,
            None => bail!("unknown FETCH_STRATEGY `{raw}` (expected title-scrape or metadata)"),
        },
        None => FetchStrategy::TitleScrape,
    };
    let size_threshold_bytes = match lookup("SIZE_THRESHOLD_BYTES") {
        Some(raw) => raw
            .parse::<u64>()
            .with_context(|| format!("SIZE_THRESHOLD_BYTES must be a byte count, got `{raw}`"))?,
        None => DEFAULT_SIZE_THRESHOLD_BYTES,
    };

    Ok(RelaySettings {
        port,
        host,
        library_path,
        cookies_path,
        placeholder_path,
        fetch_strategy,
        output_ext,
        size_threshold_bytes,
        proxy_api_url: lookup("PROXY_API_URL")
            .unwrap_or_else(|| DEFAULT_PROXY_API_URL.to_string()),
        info_api_url: lookup("INFO_API_URL").unwrap_or_else(|| DEFAULT_INFO_API_URL.to_string()),
        tiktok_api_url: lookup("TIKTOK_API_URL")
            .unwrap_or_else(|| DEFAULT_TIKTOK_API_URL.to_string()),
        relay_base_url: lookup("RELAY_BASE_URL")
            .unwrap_or_else(|| DEFAULT_RELAY_BASE_URL.to_string()),
        alt_host_url: lookup("ALT_HOST_URL"),
        work_dir,
        www_root,
    })
}

fn env_var_string(key: &str) -> Option<String> {
    env::var(key).ok().and_then(|value| {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    })
}

fn lookup_value(
    key: &str,
    file_vars: &HashMap<String, String>,
    env_lookup: &impl Fn(&str) -> Option<String>,
) -> Option<String> {
    env_lookup(key)
        .or_else(|| file_vars.get(key).cloned())
        .filter(|value| !value.trim().is_empty())
}

pub fn read_env_file(path: &Path) -> Result<HashMap<String, String>> {
    let mut vars = HashMap::new();
    if !path.exists() {
        return Ok(vars);
    }
    let content =
        fs::read_to_string(path).with_context(|| format!("Reading {}", path.display()))?;
    for line in content.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        let line = trimmed.strip_prefix("export ").unwrap_or(trimmed);
        let Some((key, value_raw)) = line.split_once('=') else {
            continue;
        };
        let key = key.trim();
        if key.is_empty() {
            continue;
        }
        let value = value_raw.trim();
        let value = value
            .strip_prefix('"')
            .and_then(|value| value.strip_suffix('"'))
            .or_else(|| {
                value
                    .strip_prefix('\'')
                    .and_then(|value| value.strip_suffix('\''))
            })
            .unwrap_or(value);
        vars.insert(key.to_string(), value.to_string());
    }
    Ok(vars)
}
