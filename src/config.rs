use crate::model::Snowflake;
use dotenvy::dotenv;
use std::env;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Clone)]
pub struct Config {
    pub discord_token: String,
    pub api_base: String,
    pub gateway_url: String,
    pub channel_id: Option<Snowflake>,
    pub guild_id: Option<Snowflake>,
    /// `None` disables archiving entirely.
    pub archive_dir: Option<PathBuf>,
    pub quiet_window_secs: u64,
    pub http_timeout_secs: u64,
    pub pause_on_self_activity: bool,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenv().ok();
        Self::build()
    }

    fn build() -> anyhow::Result<Self> {
        Ok(Config {
            discord_token: env::var("DISCORD_TOKEN").unwrap_or_default(),
            api_base: env::var("DISCORD_API_BASE")
                .unwrap_or_else(|_| "https://discord.com/api/v9".to_string()),
            gateway_url: env::var("DISCORD_GATEWAY_URL")
                .unwrap_or_else(|_| "wss://gateway.discord.gg/?v=9&encoding=json".to_string()),
            channel_id: Self::parse_id("TARGET_CHANNEL_ID")?,
            guild_id: Self::parse_id("TARGET_GUILD_ID")?,
            archive_dir: match env::var("ARCHIVE_DIR") {
                Ok(dir) if dir.is_empty() => None,
                Ok(dir) => Some(PathBuf::from(dir)),
                Err(_) => Some(PathBuf::from("./archive")),
            },
            quiet_window_secs: env::var("QUIET_WINDOW_SECS")
                .unwrap_or_else(|_| "30".to_string())
                .parse()
                .unwrap_or(30),
            http_timeout_secs: env::var("HTTP_TIMEOUT_SECS")
                .unwrap_or_else(|_| "30".to_string())
                .parse()
                .unwrap_or(30),
            pause_on_self_activity: env::var("PAUSE_ON_SELF_ACTIVITY")
                .unwrap_or_else(|_| "true".to_string())
                .parse()
                .unwrap_or(true),
        })
    }

    fn parse_id(var: &str) -> anyhow::Result<Option<Snowflake>> {
        match env::var(var) {
            Ok(v) if !v.is_empty() => v
                .parse()
                .map(Some)
                .map_err(|_| anyhow::anyhow!("{} must be a valid u64", var)),
            _ => Ok(None),
        }
    }

    /// Checks the settings a purge run cannot start without.
    pub fn validate_for_purge(&self) -> anyhow::Result<()> {
        if self.discord_token.is_empty() {
            anyhow::bail!("DISCORD_TOKEN must be set");
        }
        if self.channel_id.is_none() && self.guild_id.is_none() {
            anyhow::bail!("at least one of a target channel and a target guild must be specified");
        }
        Ok(())
    }

    pub fn quiet_window(&self) -> Duration {
        Duration::from_secs(self.quiet_window_secs)
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("discord_token", &"[REDACTED]")
            .field("api_base", &self.api_base)
            .field("gateway_url", &self.gateway_url)
            .field("channel_id", &self.channel_id)
            .field("guild_id", &self.guild_id)
            .field("archive_dir", &self.archive_dir)
            .field("quiet_window_secs", &self.quiet_window_secs)
            .field("http_timeout_secs", &self.http_timeout_secs)
            .field("pause_on_self_activity", &self.pause_on_self_activity)
            .finish()
    }
}
