//! Runtime configuration (spec.md §12 / SPEC_FULL.md). Mirrors the
//! teacher's `clap::Parser` + `env` pattern in `main.rs`: every field is
//! settable by flag or by environment variable, with `.env` loaded first.

use clap::Parser;
use std::path::PathBuf;

#[derive(Debug, Clone, Parser)]
#[command(name = "captain", about = "Chore scheduler controller for a fleet of Sailors")]
pub struct Config {
    /// Directory holding crew.json, chores.json, users.json, and the
    /// discovery file.
    #[arg(long, env = "DATA_DIR", default_value = "./data")]
    pub data_dir: PathBuf,

    /// HTTP listen port.
    #[arg(long, env = "PORT", default_value_t = 7100)]
    pub port: u16,

    #[arg(long, env = "TICK_INTERVAL_SECS", default_value_t = 2)]
    pub tick_interval_secs: u64,

    #[arg(long, env = "HEARTBEAT_DEADLINE_SECS", default_value_t = 60)]
    pub heartbeat_deadline_secs: i64,

    #[arg(long, env = "SAILOR_RPC_TIMEOUT_SECS", default_value_t = 5)]
    pub sailor_rpc_timeout_secs: u64,
}

impl Config {
    pub fn crew_path(&self) -> PathBuf {
        self.data_dir.join("crew.json")
    }

    pub fn chores_path(&self) -> PathBuf {
        self.data_dir.join("chores.json")
    }

    pub fn users_path(&self) -> PathBuf {
        self.data_dir.join("users.json")
    }

    pub fn discovery_path(&self) -> PathBuf {
        self.data_dir.join("captain.json")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec() {
        let cfg = Config::parse_from(["captain"]);
        assert_eq!(cfg.data_dir, PathBuf::from("./data"));
        assert_eq!(cfg.port, 7100);
        assert_eq!(cfg.tick_interval_secs, 2);
        assert_eq!(cfg.heartbeat_deadline_secs, 60);
        assert_eq!(cfg.sailor_rpc_timeout_secs, 5);
    }

    #[test]
    fn flags_override_defaults() {
        let cfg = Config::parse_from(["captain", "--data-dir", "/srv/captain", "--port", "9000"]);
        assert_eq!(cfg.data_dir, PathBuf::from("/srv/captain"));
        assert_eq!(cfg.port, 9000);
    }

    #[test]
    fn derived_paths_live_under_data_dir() {
        let cfg = Config::parse_from(["captain", "--data-dir", "/srv/captain"]);
        assert_eq!(cfg.crew_path(), PathBuf::from("/srv/captain/crew.json"));
        assert_eq!(cfg.chores_path(), PathBuf::from("/srv/captain/chores.json"));
        assert_eq!(cfg.users_path(), PathBuf::from("/srv/captain/users.json"));
        assert_eq!(cfg.discovery_path(), PathBuf::from("/srv/captain/captain.json"));
    }
}
