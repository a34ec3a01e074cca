//! Event handling and the role-grant workflow.
//!
//! [RoleGate] holds the transport-independent logic: the channel allow-list,
//! trigger detection, the busy flag, and the grant workflow itself, all
//! expressed against the [Gateway] trait. [Handler] wires it to serenity's
//! event dispatch.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serenity::all::{Channel, ChannelId, ChannelType, GuildId, MessageId, UserId};
use serenity::async_trait;
use serenity::client::{Context, EventHandler};
use serenity::gateway::ShardManager;
use serenity::model::channel::Message;
use serenity::model::gateway::Ready;
use serenity::prelude::TypeMapKey;
use tracing::{debug, error, info, warn};

use crate::commands;
use crate::error::GatewayError;
use crate::gateway::{DiscordGateway, Gateway};
use crate::restart::RestartTimer;

/// The role granted on trigger.
pub const ROLE_NAME: &str = "浮上";

/// The character that activates the role-grant workflow.
const TRIGGER: char = '🔓';

/// Audit-log reason attached to role creation.
const CREATE_REASON: &str = "浮上用ロールの作成";

/// Warm-up before the restart timer is armed after `ready`.
const READY_DELAY: Duration = Duration::from_secs(5);

/// Key to store the [ShardManager] in the client's data map, so `ready`
/// can hand a shutdown handle to the restart timer.
pub struct ShardManagerKey;
impl TypeMapKey for ShardManagerKey {
    type Value = Arc<ShardManager>;
}

/// What the caller should do with the message after trigger handling.
#[derive(Debug, PartialEq, Eq)]
pub enum Dispatch {
    /// Hand the message to command dispatch.
    Forward,
    /// Drop the message entirely.
    Ignore,
}

/// A message reduced to the fields the workflow needs.
#[derive(Debug)]
pub struct Inbound {
    pub guild: GuildId,
    pub channel: ChannelId,
    pub message: MessageId,
    pub author: UserId,
    pub content: String,
}

/// Decides, per inbound message, whether to run the role-grant workflow.
pub struct RoleGate {
    /// Channels the bot acts in.
    allowed_channels: HashSet<ChannelId>,
    /// Serializes role-grant workflows. Coarse by design: one workflow at a
    /// time across all guilds; concurrent triggers are dropped silently.
    busy: AtomicBool,
}

/// Releases the busy flag on every exit path of the workflow.
struct BusyGuard<'a>(&'a AtomicBool);

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl RoleGate {
    pub fn new(allowed_channels: HashSet<ChannelId>) -> Self {
        RoleGate {
            allowed_channels,
            busy: AtomicBool::new(false),
        }
    }

    /// Claims the busy flag, or `None` if a workflow is already in flight.
    fn try_acquire(&self) -> Option<BusyGuard<'_>> {
        self.busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
            .then(|| BusyGuard(&self.busy))
    }

    /// Runs trigger handling for one message.
    ///
    /// The busy flag is claimed before the first await of the workflow and
    /// released before the message deletion, matching the ordering the
    /// grant logic needs (no two workflows may interleave; deletion is
    /// outside the guarded section).
    pub async fn handle(&self, gateway: &dyn Gateway, msg: &Inbound) -> Dispatch {
        if !self.allowed_channels.contains(&msg.channel) {
            return Dispatch::Ignore;
        }

        if !msg.content.contains(TRIGGER) {
            return Dispatch::Forward;
        }

        let Some(guard) = self.try_acquire() else {
            // A grant is already in flight; drop this trigger silently.
            debug!("Dropping trigger from {}: busy.", msg.author);
            return Dispatch::Ignore;
        };

        match self.grant(gateway, msg).await {
            Ok(()) => {}
            Err(GatewayError::Forbidden) => {
                notify(gateway, msg.channel, "❌ 権限が不足しています。").await;
            }
            Err(e) => {
                error!("Role grant failed: {e}");
                notify(gateway, msg.channel, "❌ エラーが発生しました。").await;
            }
        }
        drop(guard);

        // Best effort; the author may have deleted it first.
        if let Err(e) = gateway.delete_message(msg.channel, msg.message).await {
            debug!("Failed to delete trigger message: {e}");
        }

        Dispatch::Forward
    }

    /// The role-grant workflow. Runs while the busy flag is held.
    async fn grant(&self, gateway: &dyn Gateway, msg: &Inbound) -> Result<(), GatewayError> {
        let role = gateway.find_role(msg.guild, ROLE_NAME).await?;

        if let Some(role) = role {
            if gateway.member_has_role(msg.guild, msg.author, role).await? {
                let text =
                    format!("⚠️ <@{}> は既に「{ROLE_NAME}」ロールを持っています。", msg.author);
                gateway.send_notice(msg.channel, &text).await?;
                return Ok(());
            }
        }

        let role = match role {
            Some(role) => role,
            None => {
                let role = gateway.create_role(msg.guild, ROLE_NAME, CREATE_REASON).await?;
                info!("Created role '{ROLE_NAME}' in guild {}.", msg.guild);
                let text = format!("✅ ロール「{ROLE_NAME}」を作成しました。");
                gateway.send_notice(msg.channel, &text).await?;
                role
            }
        };

        gateway.assign_role(msg.guild, msg.author, role).await?;
        info!("Granted '{ROLE_NAME}' to {}.", msg.author);
        let text = format!("✅ <@{}> に「{ROLE_NAME}」ロールを付与しました。", msg.author);
        gateway.send_notice(msg.channel, &text).await?;

        Ok(())
    }
}

/// Sends a notice where failing to send must not take the process down.
async fn notify(gateway: &dyn Gateway, channel: ChannelId, text: &str) {
    if let Err(e) = gateway.send_notice(channel, text).await {
        warn!("Failed to send notice: {e}");
    }
}

/// Serenity-facing event handler.
pub struct Handler {
    gate: RoleGate,
    restart: RestartTimer,
}

impl Handler {
    pub fn new(allowed_channels: HashSet<ChannelId>) -> Self {
        Handler {
            gate: RoleGate::new(allowed_channels),
            restart: RestartTimer::new(),
        }
    }
}

#[async_trait]
impl EventHandler for Handler {
    async fn ready(&self, ctx: Context, rdy: Ready) {
        info!("{} is ready!", rdy.user.name);

        // Let the session settle before scheduling the restart.
        tokio::time::sleep(READY_DELAY).await;

        let shards = { ctx.data.read().await.get::<ShardManagerKey>().cloned() };
        let Some(shards) = shards else {
            error!("Shard manager missing from client data; restart timer not armed.");
            return;
        };
        self.restart.arm(async move {
            info!("Scheduled restart: closing connection.");
            shards.shutdown_all().await;
            std::process::exit(1);
        });
    }

    async fn message(&self, ctx: Context, msg: Message) {
        let bot_id = ctx.cache.current_user().id;
        if msg.author.id == bot_id {
            return;
        }

        let Some(guild) = msg.guild_id else {
            return;
        };
        if channel_kind(&ctx, msg.channel_id).await != Some(ChannelType::Text) {
            return;
        }

        let inbound = Inbound {
            guild,
            channel: msg.channel_id,
            message: msg.id,
            author: msg.author.id,
            content: msg.content.clone(),
        };
        let gateway = DiscordGateway::new(ctx.http.clone());

        match self.gate.handle(&gateway, &inbound).await {
            Dispatch::Forward => commands::dispatch(&msg).await,
            Dispatch::Ignore => {}
        }
    }
}

/// Resolves a channel's type, preferring the cache over a fetch.
async fn channel_kind(ctx: &Context, id: ChannelId) -> Option<ChannelType> {
    if let Some(channel) = ctx.cache.channel(id) {
        return Some(channel.kind);
    }
    match id.to_channel(ctx).await {
        Ok(Channel::Guild(channel)) => Some(channel.kind),
        Ok(_) => None,
        Err(e) => {
            debug!("Failed to resolve channel {id}: {e}");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serenity::all::RoleId;
    use std::collections::HashMap;
    use std::sync::Mutex;

    /// Which failure [FakeGateway] injects into `assign_role`.
    enum FailKind {
        Forbidden,
        Other,
    }

    /// Records every call; state behind plain mutexes since nothing holds a
    /// lock across an await.
    #[derive(Default)]
    struct FakeGateway {
        roles: Mutex<HashMap<String, RoleId>>,
        member_roles: Mutex<HashSet<RoleId>>,
        created: Mutex<Vec<String>>,
        assigned: Mutex<Vec<(UserId, RoleId)>>,
        notices: Mutex<Vec<String>>,
        deleted: Mutex<Vec<MessageId>>,
        fail_assign: Mutex<Option<FailKind>>,
    }

    impl FakeGateway {
        fn with_role(self, id: u64, member_has_it: bool) -> Self {
            let role = RoleId::new(id);
            self.roles.lock().unwrap().insert(ROLE_NAME.to_string(), role);
            if member_has_it {
                self.member_roles.lock().unwrap().insert(role);
            }
            self
        }

        fn failing_assign(self, kind: FailKind) -> Self {
            *self.fail_assign.lock().unwrap() = Some(kind);
            self
        }

        fn notice_count(&self) -> usize {
            self.notices.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl Gateway for FakeGateway {
        async fn find_role(
            &self,
            _guild: GuildId,
            name: &str,
        ) -> Result<Option<RoleId>, GatewayError> {
            Ok(self.roles.lock().unwrap().get(name).copied())
        }

        async fn create_role(
            &self,
            _guild: GuildId,
            name: &str,
            _reason: &str,
        ) -> Result<RoleId, GatewayError> {
            let role = RoleId::new(999);
            self.created.lock().unwrap().push(name.to_string());
            self.roles.lock().unwrap().insert(name.to_string(), role);
            Ok(role)
        }

        async fn member_has_role(
            &self,
            _guild: GuildId,
            _user: UserId,
            role: RoleId,
        ) -> Result<bool, GatewayError> {
            Ok(self.member_roles.lock().unwrap().contains(&role))
        }

        async fn assign_role(
            &self,
            _guild: GuildId,
            user: UserId,
            role: RoleId,
        ) -> Result<(), GatewayError> {
            match self.fail_assign.lock().unwrap().as_ref() {
                Some(FailKind::Forbidden) => return Err(GatewayError::Forbidden),
                Some(FailKind::Other) => {
                    return Err(GatewayError::Platform(serenity::Error::Other("boom")))
                }
                None => {}
            }
            self.assigned.lock().unwrap().push((user, role));
            Ok(())
        }

        async fn send_notice(&self, _channel: ChannelId, text: &str) -> Result<(), GatewayError> {
            self.notices.lock().unwrap().push(text.to_string());
            Ok(())
        }

        async fn delete_message(
            &self,
            _channel: ChannelId,
            message: MessageId,
        ) -> Result<(), GatewayError> {
            self.deleted.lock().unwrap().push(message);
            Ok(())
        }
    }

    fn gate() -> RoleGate {
        RoleGate::new([ChannelId::new(10)].into_iter().collect())
    }

    fn trigger_msg(channel: u64, content: &str) -> Inbound {
        Inbound {
            guild: GuildId::new(1),
            channel: ChannelId::new(channel),
            message: MessageId::new(42),
            author: UserId::new(7),
            content: content.to_string(),
        }
    }

    #[tokio::test]
    async fn ignores_channels_outside_the_allow_list() {
        let fake = FakeGateway::default();
        let out = gate().handle(&fake, &trigger_msg(99, "🔓 let me in")).await;

        assert_eq!(out, Dispatch::Ignore);
        assert_eq!(fake.notice_count(), 0);
        assert!(fake.deleted.lock().unwrap().is_empty());
        assert!(fake.created.lock().unwrap().is_empty());
        assert!(fake.assigned.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn forwards_plain_messages_untouched() {
        let fake = FakeGateway::default();
        let out = gate().handle(&fake, &trigger_msg(10, "hello")).await;

        assert_eq!(out, Dispatch::Forward);
        assert_eq!(fake.notice_count(), 0);
        assert!(fake.deleted.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn drops_triggers_while_busy() {
        let fake = FakeGateway::default();
        let gate = gate();
        gate.busy.store(true, Ordering::SeqCst);

        let out = gate.handle(&fake, &trigger_msg(10, "🔓")).await;

        assert_eq!(out, Dispatch::Ignore);
        assert_eq!(fake.notice_count(), 0);
        assert!(fake.deleted.lock().unwrap().is_empty());
        assert!(fake.assigned.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn creates_and_assigns_when_role_is_missing() {
        let fake = FakeGateway::default();
        let gate = gate();
        let msg = trigger_msg(10, "🔓 let me in");

        let out = gate.handle(&fake, &msg).await;

        assert_eq!(out, Dispatch::Forward);
        assert_eq!(*fake.created.lock().unwrap(), vec![ROLE_NAME.to_string()]);
        assert_eq!(fake.assigned.lock().unwrap().len(), 1);

        let notices = fake.notices.lock().unwrap();
        assert_eq!(notices.len(), 2);
        assert!(notices[0].contains("作成"));
        assert!(notices[1].contains("付与"));
        drop(notices);

        assert_eq!(*fake.deleted.lock().unwrap(), vec![msg.message]);
        assert!(!gate.busy.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn assigns_existing_role_without_creating() {
        let fake = FakeGateway::default().with_role(500, false);
        let out = gate().handle(&fake, &trigger_msg(10, "🔓")).await;

        assert_eq!(out, Dispatch::Forward);
        assert!(fake.created.lock().unwrap().is_empty());
        assert_eq!(
            *fake.assigned.lock().unwrap(),
            vec![(UserId::new(7), RoleId::new(500))]
        );
        assert_eq!(fake.notice_count(), 1);
    }

    #[tokio::test]
    async fn repeat_trigger_from_a_holder_is_idempotent() {
        let fake = FakeGateway::default().with_role(500, true);
        let msg = trigger_msg(10, "🔓");

        let out = gate().handle(&fake, &msg).await;

        assert_eq!(out, Dispatch::Forward);
        assert!(fake.created.lock().unwrap().is_empty());
        assert!(fake.assigned.lock().unwrap().is_empty());

        let notices = fake.notices.lock().unwrap();
        assert_eq!(notices.len(), 1);
        assert!(notices[0].contains("既に"));
        drop(notices);

        // The trigger message is still cleaned up afterwards.
        assert_eq!(*fake.deleted.lock().unwrap(), vec![msg.message]);
    }

    #[tokio::test]
    async fn permission_failure_is_reported_and_recovered() {
        let fake = FakeGateway::default()
            .with_role(500, false)
            .failing_assign(FailKind::Forbidden);
        let gate = gate();

        let out = gate.handle(&fake, &trigger_msg(10, "🔓")).await;

        assert_eq!(out, Dispatch::Forward);
        let notices = fake.notices.lock().unwrap();
        assert_eq!(notices.len(), 1);
        assert!(notices[0].contains("権限"));
        drop(notices);

        assert_eq!(fake.deleted.lock().unwrap().len(), 1);
        assert!(!gate.busy.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn generic_failure_is_reported_and_recovered() {
        let fake = FakeGateway::default()
            .with_role(500, false)
            .failing_assign(FailKind::Other);
        let gate = gate();

        let out = gate.handle(&fake, &trigger_msg(10, "🔓")).await;

        assert_eq!(out, Dispatch::Forward);
        let notices = fake.notices.lock().unwrap();
        assert_eq!(notices.len(), 1);
        assert!(notices[0].contains("エラー"));
        drop(notices);

        assert!(!gate.busy.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn busy_flag_is_released_between_messages() {
        let fake = FakeGateway::default()
            .with_role(500, false)
            .failing_assign(FailKind::Forbidden);
        let gate = gate();

        gate.handle(&fake, &trigger_msg(10, "🔓")).await;
        *fake.fail_assign.lock().unwrap() = None;

        // The failed workflow must not lock the gate out.
        let out = gate.handle(&fake, &trigger_msg(10, "🔓")).await;
        assert_eq!(out, Dispatch::Forward);
        assert_eq!(fake.assigned.lock().unwrap().len(), 1);
    }
}
