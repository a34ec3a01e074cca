//! Error types for this crate.
//! All errors derive [thiserror::Error].

use serenity::http::HttpError;
use thiserror::Error;

/// Errors while reading configuration from the environment.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Missing enviromental value: '{0}'.")]
    MissingEnv(&'static str),
    #[error("Enviromental value '{0}' must not be empty.")]
    EmptyEnv(&'static str),
    #[error("Malformed channel id: '{0}'.")]
    MalformedChannelId(String),
}

/// Errors surfaced by [Gateway](crate::gateway::Gateway) operations.
///
/// Permission denials get their own variant so the role-grant workflow can
/// report them to the channel instead of treating them as bugs.
#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("Missing permissions for the requested operation.")]
    Forbidden,
    #[error(transparent)]
    Platform(serenity::Error),
}

impl From<serenity::Error> for GatewayError {
    fn from(err: serenity::Error) -> Self {
        match &err {
            serenity::Error::Http(HttpError::UnsuccessfulRequest(resp))
                if resp.status_code == 403 =>
            {
                GatewayError::Forbidden
            }
            _ => GatewayError::Platform(err),
        }
    }
}
