//! Configuration for running this bot, read from the environment.

use std::collections::HashSet;
use std::env::var as std_var;

use serenity::all::ChannelId;

use crate::error::ConfigError;

/// Settings that modify bot behavior. Immutable after load.
#[derive(Debug)]
pub struct Config {
    /// Token needed to use a bot account.
    pub token: String,
    /// Channels the bot is allowed to act in. Messages elsewhere are ignored.
    pub allowed_channels: HashSet<ChannelId>,
}

impl Config {
    /// Reads the required environment variables.
    /// Expects `.env` to have been loaded already (see `main`).
    pub fn from_env() -> Result<Self, ConfigError> {
        let token = var("DISCORD_TOKEN")?;
        if token.trim().is_empty() {
            return Err(ConfigError::EmptyEnv("DISCORD_TOKEN"));
        }

        let allowed_channels = parse_channel_ids(&var("ALLOWED_CHANNEL_IDS")?)?;
        if allowed_channels.is_empty() {
            return Err(ConfigError::EmptyEnv("ALLOWED_CHANNEL_IDS"));
        }

        Ok(Config {
            token,
            allowed_channels,
        })
    }
}

fn var(name: &'static str) -> Result<String, ConfigError> {
    std_var(name).map_err(|_e| ConfigError::MissingEnv(name))
}

/// Parses a comma-separated channel id list. Empty segments are skipped so
/// trailing commas don't count as ids.
fn parse_channel_ids(raw: &str) -> Result<HashSet<ChannelId>, ConfigError> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            s.parse::<u64>()
                .map(ChannelId::new)
                .map_err(|_e| ConfigError::MalformedChannelId(s.to_string()))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_comma_separated_ids() {
        let ids = parse_channel_ids("111,222, 333").unwrap();
        let expected: HashSet<ChannelId> =
            [111, 222, 333].into_iter().map(ChannelId::new).collect();
        assert_eq!(ids, expected);
    }

    #[test]
    fn skips_empty_segments() {
        let ids = parse_channel_ids("111,,222,").unwrap();
        assert_eq!(ids.len(), 2);
    }

    #[test]
    fn empty_list_parses_to_empty_set() {
        let ids = parse_channel_ids("").unwrap();
        assert!(ids.is_empty());
    }

    #[test]
    fn rejects_non_numeric_ids() {
        let err = parse_channel_ids("111,general").unwrap_err();
        assert!(matches!(err, ConfigError::MalformedChannelId(s) if s == "general"));
    }
}
