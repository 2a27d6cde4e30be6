use thiserror::Error;
use url::Url;
use webrtc::ice_transport::ice_server::RTCIceServer;

pub const DEFAULT_ROOM_ID: &str = "demo-room";
pub const DEFAULT_SIGNALING_URL: &str = "http://127.0.0.1:3000";
pub const DEFAULT_STUN_URL: &str = "stun:stun.l.google.com:19302";

pub const SIGNALING_URL_ENV: &str = "BEACH_SHARE_SIGNALING_URL";
pub const ROOM_ENV: &str = "BEACH_SHARE_ROOM";
pub const STUN_ENV: &str = "BEACH_SHARE_STUN";
pub const TURN_ENV: &str = "BEACH_SHARE_TURN";
pub const TURN_USERNAME_ENV: &str = "BEACH_SHARE_TURN_USERNAME";
pub const TURN_CREDENTIAL_ENV: &str = "BEACH_SHARE_TURN_CREDENTIAL";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid signaling url {url}: {reason}")]
    SignalingUrl { url: String, reason: String },
    #[error("room id must not be empty")]
    EmptyRoom,
    #[error("ice server url {0} must start with stun:, stuns:, turn: or turns:")]
    IceUrl(String),
    #[error("turn server {0} needs both a username and a credential")]
    TurnCredentials(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TurnServer {
    pub urls: Vec<String>,
    pub username: String,
    pub credential: String,
}

/// Static connection settings for one session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub signaling_url: String,
    pub room_id: String,
    pub stun_urls: Vec<String>,
    pub turn: Option<TurnServer>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            signaling_url: DEFAULT_SIGNALING_URL.to_string(),
            room_id: DEFAULT_ROOM_ID.to_string(),
            stun_urls: vec![DEFAULT_STUN_URL.to_string()],
            turn: None,
        }
    }
}

impl Config {
    /// Assemble and validate a config from already-resolved values.
    pub fn from_parts(
        signaling_url: String,
        room_id: String,
        stun_urls: Vec<String>,
        turn_urls: Vec<String>,
        turn_username: Option<String>,
        turn_credential: Option<String>,
    ) -> Result<Self, ConfigError> {
        let turn = if turn_urls.is_empty() {
            None
        } else {
            match (turn_username, turn_credential) {
                (Some(username), Some(credential)) => Some(TurnServer {
                    urls: turn_urls,
                    username,
                    credential,
                }),
                _ => return Err(ConfigError::TurnCredentials(turn_urls.join(","))),
            }
        };
        let config = Self {
            signaling_url,
            room_id,
            stun_urls,
            turn,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        Url::parse(&self.signaling_url).map_err(|err| ConfigError::SignalingUrl {
            url: self.signaling_url.clone(),
            reason: err.to_string(),
        })?;
        if self.room_id.trim().is_empty() {
            return Err(ConfigError::EmptyRoom);
        }
        let turn_urls = self.turn.iter().flat_map(|turn| turn.urls.iter());
        for url in self.stun_urls.iter().chain(turn_urls) {
            if !["stun:", "stuns:", "turn:", "turns:"]
                .iter()
                .any(|scheme| url.starts_with(scheme))
            {
                return Err(ConfigError::IceUrl(url.clone()));
            }
        }
        Ok(())
    }

    pub fn ice_servers(&self) -> Vec<RTCIceServer> {
        let mut servers = Vec::new();
        if !self.stun_urls.is_empty() {
            servers.push(RTCIceServer {
                urls: self.stun_urls.clone(),
                ..Default::default()
            });
        }
        if let Some(turn) = &self.turn {
            servers.push(RTCIceServer {
                urls: turn.urls.clone(),
                username: turn.username.clone(),
                credential: turn.credential.clone(),
                ..Default::default()
            });
        }
        servers
    }
}
