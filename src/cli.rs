//! Command-line interface.

use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use clap::Parser;

use crate::config::{MonitorConfig, DEFAULT_BROADCAST_INTERVAL_SECS, DEFAULT_HOST, DEFAULT_PORT};
use crate::error::MonitorError;

#[derive(Debug, Parser)]
#[command(
    name = "lanwatch",
    version,
    about = "Per-device LAN bandwidth monitor with a live websocket feed"
)]
pub struct Cli {
    /// Interface to capture on (auto-selected when omitted)
    #[arg(short, long, env = "LANWATCH_DEVICE")]
    pub device: Option<String>,

    /// Address the HTTP server binds to
    #[arg(long, default_value = DEFAULT_HOST)]
    pub host: String,

    /// Port the HTTP server listens on
    #[arg(short, long, default_value_t = DEFAULT_PORT)]
    pub port: u16,

    /// Seconds between snapshot broadcasts
    #[arg(short, long, default_value_t = DEFAULT_BROADCAST_INTERVAL_SECS)]
    pub interval: u64,

    /// List capture interfaces and exit
    #[arg(long)]
    pub list: bool,

    /// Forget devices silent for this many seconds
    #[arg(long)]
    pub evict_idle_secs: Option<u64>,
}

impl Cli {
    pub fn to_config(&self) -> Result<MonitorConfig, MonitorError> {
        let host: IpAddr = self
            .host
            .parse()
            .map_err(|_| MonitorError::InvalidInput(format!("invalid host address: {}", self.host)))?;
        if self.interval == 0 {
            return Err(MonitorError::InvalidInput("interval must be at least 1 second".into()));
        }

        let mut config = MonitorConfig::default()
            .bind(SocketAddr::new(host, self.port))
            .broadcast_interval(Duration::from_secs(self.interval));
        if let Some(device) = &self.device {
            config = config.interface(device.clone());
        }
        match self.evict_idle_secs {
            Some(0) => {
                return Err(MonitorError::InvalidInput(
                    "evict-idle-secs must be at least 1".into(),
                ))
            }
            Some(secs) => config = config.evict_idle_after(Duration::from_secs(secs)),
            None => {}
        }
        Ok(config)
    }
}
