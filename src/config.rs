use ::std::path::PathBuf;
use ::std::time::Duration;

use ::clap::Parser;
use ::proto::Address;

/// Intercepting proxy for the retro login and game servers.
///
/// Point the client's login address at `--login`; the game connection
/// follows on its own.
#[derive(Debug, Parser)]
#[command(name = "sniffd", version)]
pub struct Config {
    /// Real login server address
    #[arg(
        short,
        long,
        env = "SNIFFD_SERVER",
        default_value = "co-retro-0d2e31a98f729b76.elb.eu-west-1.amazonaws.com:443"
    )]
    pub server: String,

    /// Login proxy listener address
    #[arg(short, long, env = "SNIFFD_LOGIN", default_value = "0.0.0.0:5555")]
    pub login: String,

    /// Game proxy listener address
    #[arg(short, long, env = "SNIFFD_GAME", default_value = "0.0.0.0:5556")]
    pub game: String,

    /// Game proxy address as seen by clients
    #[arg(short, long, env = "SNIFFD_PUBLIC", default_value = "127.0.0.1:5556")]
    pub public: Address,

    /// Seconds a ticket stays usable after login
    #[arg(
        long,
        env = "SNIFFD_TICKET_TTL",
        default_value_t = 60,
        value_parser = ::clap::value_parser!(u64).range(1..)
    )]
    pub ticket_ttl: u64,

    /// Seconds between sweeps of expired tickets
    #[arg(
        long,
        env = "SNIFFD_SWEEP_INTERVAL",
        default_value_t = 10,
        value_parser = ::clap::value_parser!(u64).range(1..)
    )]
    pub sweep_interval: u64,

    /// Enable debug logging
    #[arg(short, long, env = "SNIFFD_DEBUG")]
    pub debug: bool,

    /// Write logs to this file instead of stderr
    #[arg(long, env = "SNIFFD_LOG_FILE")]
    pub log_file: Option<PathBuf>,
}
impl Config {
    pub fn ticket_ttl(&self) -> Duration {
        Duration::from_secs(self.ticket_ttl)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval)
    }

    /// Catch setups that would send the proxy traffic to itself.
    pub fn validate(&self) -> ::anyhow::Result<()> {
        if self.server == self.login {
            ::anyhow::bail!(
                "login server address must not equal the login proxy address (would proxy into itself): {}",
                self.server
            );
        }
        Ok(())
    }
}
