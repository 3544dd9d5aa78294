use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Config {
    pub imap_host: String,
    pub imap_user: String,
    /// May be left empty in the file and supplied via
    /// CIVIREPLY_IMAP_PASSWORD instead.
    #[serde(default)]
    pub imap_password: String,
    #[serde(default = "default_folder")]
    pub folder: String,
    /// The system's own outbound from-address. Replies echoing it
    /// (delivery confirmations and the like) are never stored.
    pub from_address: String,
    pub db_path: Option<String>,
    /// Batch ceiling per run, newest messages first.
    #[serde(default = "default_batch_limit")]
    pub batch_limit: usize,
    /// How many administrator accounts receive the fan-out notification.
    #[serde(default = "default_admin_fanout_limit")]
    pub admin_fanout_limit: usize,
    /// Bind address for `civireply serve`.
    #[serde(default = "default_trigger_addr")]
    pub trigger_addr: String,
    /// Shared secret for the HTTP trigger; requests without it get 403.
    /// CIVIREPLY_TRIGGER_SECRET overrides the file value.
    #[serde(default)]
    pub trigger_secret: String,
}

fn default_folder() -> String {
    "INBOX".to_string()
}

fn default_batch_limit() -> usize {
    50
}

fn default_admin_fanout_limit() -> usize {
    5
}

fn default_trigger_addr() -> String {
    "127.0.0.1:8970".to_string()
}

fn config_dir() -> Result<PathBuf> {
    Ok(dirs::config_dir()
        .ok_or_else(|| anyhow::anyhow!("no config dir available"))?
        .join("civireply"))
}

pub fn config_path() -> Result<PathBuf> {
    let mut p = config_dir()?;
    fs::create_dir_all(&p)?;
    p.push("config.toml");
    Ok(p)
}

pub fn default_db_path() -> Result<PathBuf> {
    let mut p = config_dir()?;
    fs::create_dir_all(&p)?;
    p.push("civireply.db");
    Ok(p)
}

pub fn load_config(path: Option<&Path>) -> Result<Config> {
    let path = match path {
        Some(p) => p.to_path_buf(),
        None => config_path()?,
    };
    if !path.exists() {
        // create a template config for operators to edit
        let sample = Config {
            imap_host: "imap.example.com".to_string(),
            imap_user: "notify@example.com".to_string(),
            imap_password: String::new(),
            folder: default_folder(),
            from_address: "notify@example.com".to_string(),
            db_path: None,
            batch_limit: default_batch_limit(),
            admin_fanout_limit: default_admin_fanout_limit(),
            trigger_addr: default_trigger_addr(),
            trigger_secret: String::new(),
        };
        let tom = toml::to_string_pretty(&sample)?;
        fs::write(&path, tom)?;
        return Err(anyhow::anyhow!(
            "Created template config at {} — edit it and run again",
            path.display()
        ));
    }
    let s = fs::read_to_string(path)?;
    let mut cfg: Config = toml::from_str(&s)?;

    // Secrets from the environment win over the file.
    if let Ok(pw) = std::env::var("CIVIREPLY_IMAP_PASSWORD") {
        cfg.imap_password = pw;
    }
    if let Ok(secret) = std::env::var("CIVIREPLY_TRIGGER_SECRET") {
        cfg.trigger_secret = secret;
    }
    Ok(cfg)
}

pub fn resolve_db_path(cfg: &Config) -> Result<PathBuf> {
    if let Some(p) = &cfg.db_path {
        Ok(PathBuf::from(p))
    } else {
        default_db_path()
    }
}

#[cfg(test)]
impl Config {
    /// Minimal config for driver tests.
    pub fn for_tests() -> Self {
        Self {
            imap_host: "imap.example.com".to_string(),
            imap_user: "notify@example.com".to_string(),
            imap_password: "secret".to_string(),
            folder: default_folder(),
            from_address: "notify@example.com".to_string(),
            db_path: None,
            batch_limit: default_batch_limit(),
            admin_fanout_limit: default_admin_fanout_limit(),
            trigger_addr: default_trigger_addr(),
            trigger_secret: "hunter2".to_string(),
        }
    }
}
