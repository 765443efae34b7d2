//! User agent configuration and its validators

use sip_core::transport::{RecoveryConfig, ServerDesc};
use sip_types::uri::SipUri;
use std::time::Duration;

/// One configured signaling server
#[derive(Debug, Clone)]
pub struct ServerEntry {
    pub ws_uri: String,
    pub weight: u32,
}

impl ServerEntry {
    pub fn new(ws_uri: impl Into<String>) -> Self {
        Self {
            ws_uri: ws_uri.into(),
            weight: 0,
        }
    }

    pub fn weight(mut self, weight: u32) -> Self {
        self.weight = weight;
        self
    }
}

/// A configuration option failed validation; the UA refuses to start
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("ws_servers must not be empty")]
    NoServers,
    #[error("ws_servers[{0}]: uri must use the ws or wss scheme")]
    InvalidWsUri(usize),
    #[error("uri must carry a user part")]
    MissingUser,
    #[error("password and ha1 are mutually exclusive")]
    ConflictingCredentials,
    #[error("register_expires must be positive")]
    InvalidRegisterExpires,
    #[error("no_answer_timeout must be within 1..=600 seconds")]
    InvalidNoAnswerTimeout,
    #[error("connection_recovery_max_interval must not be below min_interval")]
    InvalidRecoveryInterval,
    #[error("invalid preloaded route: {0}")]
    InvalidRoute(String),
}

/// Configuration of a [`UserAgent`](crate::UserAgent).
///
/// `ws_servers` and `uri` are mandatory, every other option has a
/// validated default.
#[derive(Debug, Clone)]
pub struct UaConfig {
    /// Candidate signaling servers
    pub ws_servers: Vec<ServerEntry>,

    /// Address of record of this UA
    pub uri: SipUri,

    /// Digest username, defaults to the user part of `uri`
    pub authorization_user: Option<String>,

    /// Digest password
    pub password: Option<String>,

    /// Precomputed digest ha1, alternative to `password`
    pub ha1: Option<String>,

    /// Register automatically once the transport connects
    pub register: bool,

    /// Requested binding expiry, seconds
    pub register_expires: u32,

    /// Cancel unanswered incoming calls after this many seconds
    pub no_answer_timeout: u32,

    /// Enable RFC 4028 session timers
    pub session_timers: bool,

    pub connection_recovery_min_interval: Duration,
    pub connection_recovery_max_interval: Duration,

    /// Routes from `preloaded_routes` are stamped onto every
    /// out-of-dialog request
    pub use_preloaded_route: bool,
    pub preloaded_routes: Vec<String>,

    /// Print `TCP` instead of `WS` in Via headers
    pub hack_via_tcp: bool,

    /// Put the peer-visible IP into the Contact instead of an
    /// `.invalid` placeholder
    pub hack_ip_in_contact: bool,

    /// Opaque server lists handed to the media engine
    pub stun_servers: Vec<String>,
    pub turn_servers: Vec<String>,
}

impl UaConfig {
    pub fn new(ws_servers: Vec<ServerEntry>, uri: SipUri) -> Self {
        Self {
            ws_servers,
            uri,
            authorization_user: None,
            password: None,
            ha1: None,
            register: true,
            register_expires: 600,
            no_answer_timeout: 60,
            session_timers: true,
            connection_recovery_min_interval: Duration::from_secs(2),
            connection_recovery_max_interval: Duration::from_secs(30),
            use_preloaded_route: false,
            preloaded_routes: Vec::new(),
            hack_via_tcp: false,
            hack_ip_in_contact: false,
            stun_servers: Vec::new(),
            turn_servers: Vec::new(),
        }
    }

    /// Run every option through its validator
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.ws_servers.is_empty() {
            return Err(ConfigError::NoServers);
        }

        for (idx, server) in self.ws_servers.iter().enumerate() {
            let uri = server.ws_uri.to_ascii_lowercase();

            if !(uri.starts_with("ws://") || uri.starts_with("wss://")) {
                return Err(ConfigError::InvalidWsUri(idx));
            }
        }

        if self.uri.user.is_none() {
            return Err(ConfigError::MissingUser);
        }

        if self.password.is_some() && self.ha1.is_some() {
            return Err(ConfigError::ConflictingCredentials);
        }

        if self.register_expires == 0 {
            return Err(ConfigError::InvalidRegisterExpires);
        }

        if self.no_answer_timeout == 0 || self.no_answer_timeout > 600 {
            return Err(ConfigError::InvalidNoAnswerTimeout);
        }

        if self.connection_recovery_max_interval < self.connection_recovery_min_interval {
            return Err(ConfigError::InvalidRecoveryInterval);
        }

        if self.use_preloaded_route {
            for route in &self.preloaded_routes {
                if route.parse::<SipUri>().is_err() {
                    return Err(ConfigError::InvalidRoute(route.clone()));
                }
            }
        }

        Ok(())
    }

    pub fn server_descs(&self) -> Vec<ServerDesc> {
        self.ws_servers
            .iter()
            .map(|server| ServerDesc {
                ws_uri: server.ws_uri.clone().into(),
                weight: server.weight,
            })
            .collect()
    }

    pub fn recovery(&self) -> RecoveryConfig {
        RecoveryConfig {
            min_interval: self.connection_recovery_min_interval,
            max_interval: self.connection_recovery_max_interval,
        }
    }

    /// Digest username, falling back to the AOR user
    pub fn digest_user(&self) -> Option<String> {
        self.authorization_user
            .clone()
            .or_else(|| self.uri.user.as_ref().map(|u| u.to_string()))
    }

    pub fn has_credentials(&self) -> bool {
        self.password.is_some() || self.ha1.is_some()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn config() -> UaConfig {
        UaConfig::new(
            vec![ServerEntry::new("wss://edge.example.com").weight(2)],
            "sip:alice@example.com".parse().unwrap(),
        )
    }

    #[test]
    fn defaults_validate() {
        config().validate().unwrap();
    }

    #[test]
    fn rejects_non_ws_scheme() {
        let mut config = config();
        config.ws_servers = vec![ServerEntry::new("https://edge.example.com")];

        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidWsUri(0))
        ));
    }

    #[test]
    fn rejects_missing_user() {
        let mut config = config();
        config.uri = "sip:example.com".parse().unwrap();

        assert!(matches!(config.validate(), Err(ConfigError::MissingUser)));
    }

    #[test]
    fn rejects_conflicting_credentials() {
        let mut config = config();
        config.password = Some("secret".into());
        config.ha1 = Some("abcdef".into());

        assert!(matches!(
            config.validate(),
            Err(ConfigError::ConflictingCredentials)
        ));
    }

    #[test]
    fn no_answer_timeout_bounds() {
        let mut config = config();

        config.no_answer_timeout = 601;
        assert!(config.validate().is_err());

        config.no_answer_timeout = 600;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn recovery_interval_order() {
        let mut config = config();
        config.connection_recovery_max_interval = Duration::from_secs(1);

        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidRecoveryInterval)
        ));
    }

    #[test]
    fn digest_user_falls_back_to_aor() {
        let mut config = config();
        assert_eq!(config.digest_user().unwrap(), "alice");

        config.authorization_user = Some("2001".into());
        assert_eq!(config.digest_user().unwrap(), "2001");
    }
}
