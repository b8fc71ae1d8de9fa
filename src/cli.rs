//! Command-line arguments.
//!
//! Flags override the environment-derived configuration.

use std::path::PathBuf;

use clap::Parser;

use crate::config::{DaemonConfig, ManifestPolicy};

/// audiohub-daemon: track ingestion, waveform and HLS derivation, range streaming
#[derive(Parser, Debug, Default)]
#[command(name = "audiohub-daemon")]
#[command(about = "Audio ingestion and delivery daemon")]
#[command(version)]
pub struct Cli {
    /// Root directory for uploads, covers and HLS packages
    #[arg(long)]
    pub media_root: Option<PathBuf>,

    /// Directory for the track snapshot and play history
    #[arg(long)]
    pub data_dir: Option<PathBuf>,

    /// Address to bind the HTTP server to
    #[arg(short, long)]
    pub bind: Option<String>,

    /// Number of background derivation workers
    #[arg(short, long, value_parser = clap::value_parser!(u32).range(1..=64))]
    pub workers: Option<u32>,

    /// Which renditions the master manifest lists (successful | all)
    #[arg(long, value_parser = parse_policy)]
    pub manifest_policy: Option<ManifestPolicy>,

    /// Probe external tools, print what was found and exit
    #[arg(long)]
    pub probe: bool,
}

fn parse_policy(s: &str) -> std::result::Result<ManifestPolicy, String> {
    ManifestPolicy::parse(s).ok_or_else(|| format!("unknown manifest policy '{}'", s))
}

impl Cli {
    /// Parses command-line arguments.
    pub fn parse_args() -> Self {
        Cli::parse()
    }

    /// Returns true if only the tool probe should run.
    pub fn is_probe_mode(&self) -> bool {
        self.probe
    }

    /// Applies the flags that were given on top of `config`.
    pub fn apply(&self, config: &mut DaemonConfig) {
        if let Some(ref path) = self.media_root {
            config.media_root = Some(path.clone());
        }
        if let Some(ref path) = self.data_dir {
            config.data_dir = Some(path.clone());
        }
        if let Some(ref bind) = self.bind {
            config.bind_addr = bind.clone();
        }
        if let Some(workers) = self.workers {
            config.workers = workers as usize;
        }
        if let Some(policy) = self.manifest_policy {
            config.manifest_policy = policy;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_override_config() {
        let cli = Cli::try_parse_from([
            "audiohub-daemon",
            "--media-root",
            "/srv/media",
            "--bind",
            "0.0.0.0:9000",
            "-w",
            "4",
            "--manifest-policy",
            "all",
        ])
        .unwrap();

        let mut config = DaemonConfig::default();
        cli.apply(&mut config);
        assert_eq!(config.media_root, Some(PathBuf::from("/srv/media")));
        assert_eq!(config.bind_addr, "0.0.0.0:9000");
        assert_eq!(config.workers, 4);
        assert_eq!(config.manifest_policy, ManifestPolicy::All);
        assert!(!cli.is_probe_mode());
    }

    #[test]
    fn absent_flags_keep_config() {
        let cli = Cli::try_parse_from(["audiohub-daemon"]).unwrap();
        let mut config = DaemonConfig::default();
        let before = config.clone();
        cli.apply(&mut config);
        assert_eq!(config.bind_addr, before.bind_addr);
        assert_eq!(config.workers, before.workers);
        assert_eq!(config.media_root, before.media_root);
    }

    #[test]
    fn rejects_bad_values() {
        assert!(Cli::try_parse_from(["audiohub-daemon", "--workers", "0"]).is_err());
        assert!(Cli::try_parse_from(["audiohub-daemon", "--manifest-policy", "some"]).is_err());
    }

    #[test]
    fn probe_mode() {
        let cli = Cli::try_parse_from(["audiohub-daemon", "--probe"]).unwrap();
        assert!(cli.is_probe_mode());
    }
}
