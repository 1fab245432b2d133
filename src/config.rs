use serde::Deserialize;
use anyhow::{Result, bail};
use std::{env, fs, path::PathBuf, time::Duration};

#[derive(Deserialize, Clone)]
pub struct Config {
    pub imap: MailConfig,
    pub smtp: MailConfig,
    pub user: UserConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub digest: DigestConfig,
}

#[derive(Deserialize, Clone)]
pub struct MailConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub starttls: bool,
}

#[derive(Deserialize, Clone)]
pub struct UserConfig {
    pub name: String,
    /// Mailbox owner. Messages whose From header contains this are skipped,
    /// and the digest is sent from and to this address.
    pub email: String,
}

#[derive(Deserialize, Clone)]
#[serde(default)]
pub struct LlmConfig {
    pub base_url: String,
    pub api_key: String,
    pub model: String,
    pub max_tokens: u32,
    pub summary_max_tokens: u32,
    pub temperature: f32,
    pub timeout_secs: Option<u64>,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.perplexity.ai".to_string(),
            api_key: String::new(),
            model: "sonar-pro".to_string(),
            max_tokens: 500,
            summary_max_tokens: 300,
            temperature: 0.3,
            timeout_secs: None,
        }
    }
}

impl LlmConfig {
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_secs.map(Duration::from_secs)
    }
}

#[derive(Deserialize, Clone)]
#[serde(default)]
pub struct DigestConfig {
    pub mailbox: String,
    pub window_hours: u32,
    pub top_n: usize,
    /// How much of each body is sent for analysis, in characters.
    pub body_chars: usize,
    /// Upper bound on in-flight analysis requests.
    pub concurrency: usize,
}

impl Default for DigestConfig {
    fn default() -> Self {
        Self {
            mailbox: "INBOX".to_string(),
            window_hours: 24,
            top_n: 10,
            body_chars: 2000,
            concurrency: 4,
        }
    }
}

pub const CONFIG_PATH_VAR: &str = "INBOX_DIGEST_CONFIG";
pub const USERNAME_VAR: &str = "MAIL_USERNAME";
pub const PASSWORD_VAR: &str = "MAIL_PASSWORD";
pub const API_KEY_VAR: &str = "LLM_API_KEY";

/// Longest accepted search window, ten years.
pub const MAX_WINDOW_HOURS: u32 = 24 * 365 * 10;

impl Config {
    pub fn path() -> Result<PathBuf> {
        if let Ok(p) = env::var(CONFIG_PATH_VAR) {
            if !p.trim().is_empty() {
                return Ok(PathBuf::from(p));
            }
        }
        let dir = dirs::config_dir().ok_or_else(|| anyhow::anyhow!("no config dir"))?;
        Ok(dir.join("inbox-digest").join("config.toml"))
    }

    /// Returns the parsed config, whether the file had to be created, and its path.
    pub fn load_or_create() -> Result<(Self, bool, PathBuf)> {
        let path = Self::path()?;
        if !path.exists() {
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::write(&path, DEFAULT_CONFIG)?;
            let cfg = Self::parse(DEFAULT_CONFIG)?;
            return Ok((cfg, true, path));
        }

        let data = fs::read_to_string(&path)?;
        let mut cfg = Self::parse(&data)?;
        cfg.apply_env(|k| env::var(k).ok());
        Ok((cfg, false, path))
    }

    pub fn parse(data: &str) -> Result<Self> {
        Ok(toml::from_str(data)?)
    }

    /// Credentials from the environment win over the file.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let var = |k: &str| lookup(k).filter(|v| !v.trim().is_empty());

        if let Some(user) = var(USERNAME_VAR) {
            self.imap.username = user.clone();
            self.smtp.username = user.clone();
            self.user.email = user;
        }
        if let Some(pass) = var(PASSWORD_VAR) {
            self.imap.password = pass.clone();
            self.smtp.password = pass;
        }
        if let Some(key) = var(API_KEY_VAR) {
            self.llm.api_key = key;
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.user.email.trim().is_empty() {
            bail!("user.email is empty (or set {USERNAME_VAR})");
        }
        if self.imap.password.is_empty() || self.smtp.password.is_empty() {
            bail!("mail password is empty (or set {PASSWORD_VAR})");
        }
        if self.llm.api_key.trim().is_empty() {
            bail!("llm.api_key is empty (or set {API_KEY_VAR})");
        }
        if self.digest.window_hours == 0 {
            bail!("digest.window_hours must be at least 1");
        }
        if self.digest.window_hours > MAX_WINDOW_HOURS {
            bail!("digest.window_hours must be at most {MAX_WINDOW_HOURS}");
        }
        if self.digest.top_n == 0 {
            bail!("digest.top_n must be at least 1");
        }
        if self.digest.concurrency == 0 {
            bail!("digest.concurrency must be at least 1");
        }
        Ok(())
    }

    pub fn owner(&self) -> &str {
        self.user.email.trim()
    }
}

const DEFAULT_CONFIG: &str = r#"
# Credentials can also come from MAIL_USERNAME, MAIL_PASSWORD and LLM_API_KEY.

[imap]
host = "imap.gmail.com"
port = 993
username = "you@gmail.com"
password = ""
starttls = false

[smtp]
host = "smtp.gmail.com"
port = 587
username = "you@gmail.com"
password = ""
starttls = true

[user]
name = "Your Name"
email = "you@gmail.com"

[llm]
base_url = "https://api.perplexity.ai"
api_key = ""
model = "sonar-pro"
max_tokens = 500
summary_max_tokens = 300
temperature = 0.3

[digest]
mailbox = "INBOX"
window_hours = 24
top_n = 10
body_chars = 2000
concurrency = 4
"#;
