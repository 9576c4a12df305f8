use crate::ping_log::DEFAULT_MAX_ENTRIES;
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const SOCKET_FILE_NAME: &str = "http.sock";

#[derive(Parser, Debug, Clone)]
#[command(author, version, about)]
pub struct Args {
    #[arg(
        long,
        env = "STATE_DIRECTORY",
        default_value = ".",
        help = "Directory holding state.json"
    )]
    pub state_dir: PathBuf,
    #[arg(
        long,
        env = "RUNTIME_DIRECTORY",
        default_value = ".",
        help = "Directory for the HTTP socket"
    )]
    pub runtime_dir: PathBuf,
    #[arg(long, help = "Explicit HTTP socket path, overrides --runtime-dir")]
    pub socket_path: Option<PathBuf>,
    #[arg(long, default_value = "100", help = "NFLOG group receiving echo requests")]
    pub nflog_group: u16,
    /// Bound on tracked addresses and on observations kept per address
    #[arg(long, default_value_t = DEFAULT_MAX_ENTRIES, value_parser = validate_max_entries)]
    pub max_entries: usize,
    #[arg(long, default_value = "15", help = "State save interval, in seconds")]
    pub save_interval: u64,
    #[arg(long, default_value = "10", help = "Per-connection time limit, in seconds")]
    pub connection_timeout: u64,
    #[arg(long, default_value = "4096", help = "Captured packets buffered ahead of the log")]
    pub queue_depth: usize,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Install the pingwatch systemd service
    Install {
        /// Overwrite an existing binary and unit file
        #[arg(long)]
        overwrite: bool,
    },

    /// Uninstall pingwatch: stop service, optionally remove all files
    Uninstall {
        /// Remove service, binary and recorded state
        #[arg(long)]
        purge: bool,
    },
}

fn validate_max_entries(s: &str) -> Result<usize, String> {
    match s.parse::<usize>() {
        Ok(0) => Err("max entries must be at least 1".into()),
        Ok(n) => Ok(n),
        Err(e) => Err(format!("invalid max entries '{}': {}", s, e)),
    }
}

/// systemd passes one entry per configured directory, separated by ':'.
fn first_dir(dirs: &Path) -> PathBuf {
    dirs.to_str()
        .and_then(|s| s.split(':').find(|part| !part.is_empty()))
        .map(PathBuf::from)
        .unwrap_or_else(|| dirs.to_path_buf())
}

impl Args {
    pub fn state_dir(&self) -> PathBuf {
        first_dir(&self.state_dir)
    }

    pub fn socket_path(&self) -> PathBuf {
        self.socket_path
            .clone()
            .unwrap_or_else(|| first_dir(&self.runtime_dir).join(SOCKET_FILE_NAME))
    }

    pub fn save_interval(&self) -> Duration {
        Duration::from_secs(self.save_interval.max(1))
    }

    pub fn connection_timeout(&self) -> Duration {
        Duration::from_secs(self.connection_timeout.max(1))
    }

    pub fn queue_depth(&self) -> usize {
        self.queue_depth.max(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Args {
        Args::try_parse_from(std::iter::once("pingwatch").chain(args.iter().copied())).unwrap()
    }

    #[test]
    fn explicit_flags() {
        let args = parse(&[
            "--state-dir",
            "/var/lib/pingwatch",
            "--runtime-dir",
            "/run/pingwatch",
            "--max-entries",
            "50",
            "--nflog-group",
            "7",
        ]);
        assert_eq!(args.state_dir(), PathBuf::from("/var/lib/pingwatch"));
        assert_eq!(args.socket_path(), PathBuf::from("/run/pingwatch/http.sock"));
        assert_eq!(args.max_entries, 50);
        assert_eq!(args.nflog_group, 7);
        assert_eq!(args.save_interval(), Duration::from_secs(15));
        assert!(args.command.is_none());
    }

    #[test]
    fn systemd_directory_lists_use_first_entry() {
        let args = parse(&["--state-dir", "/var/lib/a:/var/lib/b", "--runtime-dir", "/run/a:/run/b"]);
        assert_eq!(args.state_dir(), PathBuf::from("/var/lib/a"));
        assert_eq!(args.socket_path(), PathBuf::from("/run/a/http.sock"));
    }

    #[test]
    fn socket_path_override() {
        let args = parse(&["--runtime-dir", "/run/a", "--socket-path", "/tmp/p.sock"]);
        assert_eq!(args.socket_path(), PathBuf::from("/tmp/p.sock"));
    }

    #[test]
    fn zero_max_entries_rejected() {
        assert!(Args::try_parse_from(["pingwatch", "--max-entries", "0"]).is_err());
        assert!(Args::try_parse_from(["pingwatch", "--max-entries", "many"]).is_err());
    }

    #[test]
    fn install_subcommand() {
        let args = parse(&["install", "--overwrite"]);
        assert!(matches!(args.command, Some(Command::Install { overwrite: true })));
    }
}
