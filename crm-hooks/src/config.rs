use std::num::NonZeroUsize;
use std::str::FromStr;
use std::time;

use envconfig::Envconfig;

#[derive(Envconfig, Clone)]
pub struct Config {
    #[envconfig(from = "BIND_HOST", default = "0.0.0.0")]
    pub host: String,

    #[envconfig(from = "BIND_PORT", default = "3310")]
    pub port: u16,

    #[envconfig(default = "https://api.hubapi.com")]
    pub hubspot_api_url: String,

    pub hubspot_api_key: String,

    /// Signatures on inbound contact events are only checked when this is set.
    pub hubspot_client_secret: Option<String>,

    #[envconfig(default = "")]
    pub new_contact_topic_endpoint: String,

    #[envconfig(default = "")]
    pub new_contact_topic_key: String,

    #[envconfig(default = "")]
    pub updated_contact_topic_endpoint: String,

    #[envconfig(default = "")]
    pub updated_contact_topic_key: String,

    #[envconfig(default = "Starling")]
    pub event_subject_prefix: String,

    #[envconfig(default = "5000")]
    pub request_timeout: EnvMsDuration,

    #[envconfig(default = "1")]
    pub max_concurrent_fetches: NonZeroUsize,

    #[envconfig(default = "1000")]
    pub intake_queue_capacity: NonZeroUsize,

    #[envconfig(default = "true")]
    pub export_prometheus: bool,
}

impl Config {
    /// Produce a host:port address for binding a TcpListener.
    pub fn bind(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct EnvMsDuration(pub time::Duration);

#[derive(Debug, PartialEq, Eq)]
pub struct ParseEnvMsDurationError;

impl FromStr for EnvMsDuration {
    type Err = ParseEnvMsDurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let ms = s.parse::<u64>().map_err(|_| ParseEnvMsDurationError)?;

        Ok(EnvMsDuration(time::Duration::from_millis(ms)))
    }
}
