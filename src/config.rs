use crate::protocol::DEFAULT_PORT;
use clap::Parser;

/// Network identity and advertisement settings for a satellite instance.
///
/// Usable directly as a CLI parser or flattened into a larger one; the
/// `name` and `description` fields end up in the `info` event the
/// satellite sends in response to `describe`.
#[derive(Parser, Debug, Clone)]
pub struct SatelliteConfig {
    /// Listen address
    #[arg(long, default_value = "0.0.0.0")]
    pub host: String,

    /// TCP port the voice-assistant server connects to
    #[arg(long, default_value_t = DEFAULT_PORT)]
    pub port: u16,

    /// Satellite name advertised in the info event
    #[arg(long, env = "SATELLITE_NAME", default_value = "Rust Voice Satellite")]
    pub name: String,

    /// Satellite description advertised in the info event
    #[arg(long, default_value = "Wake-word gated voice satellite")]
    pub description: String,
}

impl SatelliteConfig {
    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl Default for SatelliteConfig {
    fn default() -> Self {
        SatelliteConfig {
            host: "0.0.0.0".to_string(),
            port: DEFAULT_PORT,
            name: "Rust Voice Satellite".to_string(),
            description: "Wake-word gated voice satellite".to_string(),
        }
    }
}
