//! `!`-prefix command dispatch.
//!
//! Trigger handling forwards every non-trigger message here. No commands are
//! registered yet, so dispatch only recognizes the prefix and logs.

use serenity::all::Message;
use tracing::debug;

/// Prefix that marks a message as a command.
pub const PREFIX: &str = "!";

/// Extracts the command name from a message, if it is one.
fn command_name(content: &str) -> Option<&str> {
    let rest = content.strip_prefix(PREFIX)?;
    let name = rest.split_whitespace().next()?;
    Some(name)
}

/// Routes a message to its command. Non-commands pass through untouched.
pub async fn dispatch(msg: &Message) {
    let Some(name) = command_name(&msg.content) else {
        return;
    };
    debug!("No handler for command '{name}' from {}.", msg.author.name);
}
