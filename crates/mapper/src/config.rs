//! Mapper configuration (spec.md §6).
//!
//! Every recognized option from the specification's configuration table is
//! represented here, even options this crate's core never reads directly
//! (`daemonize`, `console`, `log_dir`, `log_level`) — they are wrapper
//! concerns owned by whatever process supervises the mapper binary, kept
//! as inert pass-through fields so the CLI surface matches the full
//! contract.

use clap::Parser;

/// CLI/config surface for the `mapper` binary.
#[derive(Parser, Debug, Clone)]
#[command(name = "mapper", about = "Control node for a broker-fabric work-dispatch cluster")]
pub struct MapperConfig {
    /// Mapper identity prefix; the final identity is `mapper-<identity>`.
    #[arg(long, default_value = "default")]
    pub identity: String,

    /// Serialization scheme tag, opaque to the core, passed to the codec.
    #[arg(long, default_value = "json")]
    pub format: String,

    /// Seconds an agent may go unseen before the reaper evicts it.
    #[arg(long, default_value_t = mapper_protocol::defaults::DEFAULT_AGENT_TIMEOUT_SECS)]
    pub agent_timeout: u64,

    /// Seconds between offline-queue recovery sweeps.
    #[arg(long, default_value_t = mapper_protocol::defaults::DEFAULT_OFFLINE_REDELIVERY_FREQUENCY_SECS)]
    pub offline_redelivery_frequency: u64,

    /// Default broker-durability flag for outgoing envelopes that don't
    /// set their own.
    #[arg(long, default_value_t = false)]
    pub persistent: bool,

    /// Restrict agents to addressing only their own direct queue. Enforced
    /// at the broker; the core only threads the flag through to the
    /// adaptor at construction time.
    #[arg(long, default_value_t = false)]
    pub secure: bool,

    /// Broker connection parameters.
    #[arg(long, default_value = "/")]
    pub vhost: String,
    #[arg(long, default_value = "guest")]
    pub user: String,
    #[arg(long, default_value = "guest")]
    pub pass: String,
    #[arg(long, default_value = "127.0.0.1")]
    pub host: String,
    #[arg(long, default_value_t = 5672)]
    pub port: u16,

    /// Wrapper concerns, out of the core's scope (spec.md §1, §6).
    #[arg(long, default_value_t = false)]
    pub daemonize: bool,
    #[arg(long, default_value_t = false)]
    pub console: bool,
    #[arg(long)]
    pub log_dir: Option<String>,
    #[arg(long, default_value = "info")]
    pub log_level: String,
}

impl MapperConfig {
    pub fn mapper_identity(&self) -> String {
        format!("mapper-{}", self.identity)
    }

    pub fn agent_timeout_secs(&self) -> f64 {
        self.agent_timeout as f64
    }

    pub fn offline_redelivery_frequency_secs(&self) -> f64 {
        self.offline_redelivery_frequency as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_is_prefixed() {
        let config = MapperConfig::parse_from(["mapper", "--identity", "east-1"]);
        assert_eq!(config.mapper_identity(), "mapper-east-1");
    }

    #[test]
    fn defaults_match_the_documented_values() {
        let config = MapperConfig::parse_from(["mapper"]);
        assert_eq!(config.agent_timeout, 15);
        assert_eq!(config.offline_redelivery_frequency, 10);
        assert!(!config.persistent);
    }
}
