use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use crate::config::{
    self, Config, ConfigError, DEFAULT_ROOM_ID, DEFAULT_SIGNALING_URL, DEFAULT_STUN_URL,
};
use crate::telemetry::logging::{LogConfig, LogLevel};

#[derive(Parser, Debug)]
#[command(
    name = "beach-share",
    author,
    version,
    about = "Share a screen with viewers over WebRTC",
    propagate_version = true
)]
pub struct Cli {
    #[command(flatten)]
    pub connection: ConnectionArgs,

    #[command(flatten)]
    pub logging: LoggingArgs,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Join the room as the sharer and offer media to every viewer
    Share(ShareArgs),
    /// Join the room as a viewer and receive the shared screen
    View,
}

#[derive(Args, Debug, Clone, Default)]
pub struct ShareArgs {
    #[arg(
        long,
        value_name = "PATH",
        env = "BEACH_SHARE_IVF",
        help = "IVF (VP8) file looped onto the outgoing track; a blank track is sent when omitted"
    )]
    pub ivf: Option<PathBuf>,
}

#[derive(Args, Debug, Clone)]
pub struct ConnectionArgs {
    #[arg(
        long = "signaling-url",
        global = true,
        value_name = "URL",
        env = config::SIGNALING_URL_ENV,
        default_value = DEFAULT_SIGNALING_URL,
        help = "Base URL of the signaling relay"
    )]
    pub signaling_url: String,

    #[arg(
        long,
        global = true,
        value_name = "ROOM",
        env = config::ROOM_ENV,
        default_value = DEFAULT_ROOM_ID,
        help = "Room to join"
    )]
    pub room: String,

    #[arg(
        long = "stun",
        global = true,
        value_name = "URL",
        env = config::STUN_ENV,
        value_delimiter = ',',
        default_value = DEFAULT_STUN_URL,
        help = "STUN server URL (repeatable or comma separated)"
    )]
    pub stun: Vec<String>,

    #[arg(
        long = "turn",
        global = true,
        value_name = "URL",
        env = config::TURN_ENV,
        value_delimiter = ',',
        help = "TURN server URL (repeatable or comma separated)"
    )]
    pub turn: Vec<String>,

    #[arg(
        long = "turn-username",
        global = true,
        env = config::TURN_USERNAME_ENV,
        requires = "turn_credential"
    )]
    pub turn_username: Option<String>,

    #[arg(
        long = "turn-credential",
        global = true,
        env = config::TURN_CREDENTIAL_ENV,
        hide_env_values = true,
        requires = "turn_username"
    )]
    pub turn_credential: Option<String>,
}

impl ConnectionArgs {
    pub fn to_config(&self) -> Result<Config, ConfigError> {
        Config::from_parts(
            self.signaling_url.clone(),
            self.room.clone(),
            self.stun.clone(),
            self.turn.clone(),
            self.turn_username.clone(),
            self.turn_credential.clone(),
        )
    }
}

#[derive(Args, Debug, Clone)]
pub struct LoggingArgs {
    #[arg(
        long = "log-level",
        global = true,
        value_enum,
        env = "BEACH_SHARE_LOG_LEVEL",
        default_value_t = LogLevel::Warn,
        help = "Minimum log level (error, warn, info, debug, trace)"
    )]
    pub level: LogLevel,

    #[arg(
        long = "log-file",
        global = true,
        value_name = "PATH",
        env = "BEACH_SHARE_LOG_FILE",
        help = "Write logs to the specified file instead of stderr"
    )]
    pub file: Option<PathBuf>,
}

impl LoggingArgs {
    pub fn to_config(&self) -> LogConfig {
        LogConfig {
            level: self.level,
            file: self.file.clone(),
        }
    }
}
