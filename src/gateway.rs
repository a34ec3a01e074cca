//! The slice of the Discord API this bot consumes, behind a trait.
//!
//! [RoleGate](crate::handler::RoleGate) only talks to a [Gateway], so its
//! logic runs against a fake in tests and [DiscordGateway] in production.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serenity::all::{ChannelId, EditRole, GuildId, MessageId, RoleId, UserId};
use serenity::http::Http;
use tracing::debug;

use crate::error::GatewayError;

/// How long a notice stays in the channel before it is removed.
const NOTICE_TTL: Duration = Duration::from_secs(10);

/// Everything the role-grant workflow needs from Discord.
/// Every call is a live query; nothing is cached locally.
#[async_trait]
pub trait Gateway: Send + Sync {
    /// Looks up a role by name in a guild.
    async fn find_role(&self, guild: GuildId, name: &str) -> Result<Option<RoleId>, GatewayError>;

    /// Creates a mentionable role, recording `reason` in the audit log.
    async fn create_role(
        &self,
        guild: GuildId,
        name: &str,
        reason: &str,
    ) -> Result<RoleId, GatewayError>;

    /// Does the member currently hold the role?
    async fn member_has_role(
        &self,
        guild: GuildId,
        user: UserId,
        role: RoleId,
    ) -> Result<bool, GatewayError>;

    /// Adds a role to a member.
    async fn assign_role(
        &self,
        guild: GuildId,
        user: UserId,
        role: RoleId,
    ) -> Result<(), GatewayError>;

    /// Sends a short-lived notice that disappears after [NOTICE_TTL].
    async fn send_notice(&self, channel: ChannelId, text: &str) -> Result<(), GatewayError>;

    /// Deletes a message.
    async fn delete_message(
        &self,
        channel: ChannelId,
        message: MessageId,
    ) -> Result<(), GatewayError>;
}

/// Live [Gateway] over serenity's [Http] client.
pub struct DiscordGateway {
    http: Arc<Http>,
}

impl DiscordGateway {
    pub fn new(http: Arc<Http>) -> Self {
        DiscordGateway { http }
    }
}

#[async_trait]
impl Gateway for DiscordGateway {
    async fn find_role(&self, guild: GuildId, name: &str) -> Result<Option<RoleId>, GatewayError> {
        let roles = self.http.get_guild_roles(guild).await?;
        Ok(roles.into_iter().find(|r| r.name == name).map(|r| r.id))
    }

    async fn create_role(
        &self,
        guild: GuildId,
        name: &str,
        reason: &str,
    ) -> Result<RoleId, GatewayError> {
        let builder = EditRole::new()
            .name(name)
            .mentionable(true)
            .audit_log_reason(reason);
        let role = guild.create_role(&self.http, builder).await?;
        Ok(role.id)
    }

    async fn member_has_role(
        &self,
        guild: GuildId,
        user: UserId,
        role: RoleId,
    ) -> Result<bool, GatewayError> {
        let member = self.http.get_member(guild, user).await?;
        Ok(member.roles.contains(&role))
    }

    async fn assign_role(
        &self,
        guild: GuildId,
        user: UserId,
        role: RoleId,
    ) -> Result<(), GatewayError> {
        self.http.add_member_role(guild, user, role, None).await?;
        Ok(())
    }

    async fn send_notice(&self, channel: ChannelId, text: &str) -> Result<(), GatewayError> {
        let message = channel.say(&self.http, text).await?;

        // Discord has no native delete-after for plain messages, so schedule
        // the removal ourselves. Removal failure only matters for debugging.
        let http = self.http.clone();
        tokio::spawn(async move {
            tokio::time::sleep(NOTICE_TTL).await;
            if let Err(e) = http.delete_message(channel, message.id, None).await {
                debug!("Failed to remove notice: {e}");
            }
        });

        Ok(())
    }

    async fn delete_message(
        &self,
        channel: ChannelId,
        message: MessageId,
    ) -> Result<(), GatewayError> {
        self.http.delete_message(channel, message, None).await?;
        Ok(())
    }
}
