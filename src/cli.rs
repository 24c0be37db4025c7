use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "romfetch")]
#[command(about = "Bulk-download archives from worklists with resume, pacing and proxy rotation")]
#[command(long_about = "
romfetch reads worklists of alternating name and URL lines and downloads every
entry into <output>/<group>/<file>. Interrupted downloads resume from the bytes
already on disk. Requests are paced like a person browsing, and can optionally be
spread over a pool of validated public HTTP proxies.

Examples:
  romfetch download scraped/                 # Every <group>/*.txt under scraped/
  romfetch download nes.txt --group NES      # A single worklist
  romfetch download scraped/ --concurrent 3 --proxies
  romfetch proxies --count 5                 # Find and print working proxies
  romfetch config show
")]
#[command(version)]
pub struct Cli {
    /// Override config file path
    #[arg(short, long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Download every item in one or more worklists
    #[command(visible_alias = "dl")]
    Download {
        /// Worklist files, or directories laid out as <dir>/<group>/*.txt
        #[arg(required = true, value_name = "WORKLIST")]
        worklists: Vec<PathBuf>,

        /// Group for items from worklist files
        #[arg(short, long, value_name = "GROUP")]
        #[arg(help = "Group for items from worklist files (defaults to the parent directory)")]
        group: Option<String>,

        /// Output directory
        #[arg(short, long, value_name = "DIR")]
        output: Option<PathBuf>,

        /// Route downloads through validated public proxies
        #[arg(short, long)]
        proxies: bool,

        /// Run this many downloads at once
        #[arg(long, value_name = "N")]
        concurrent: Option<usize>,

        /// Retries per item after the first attempt
        #[arg(short, long, value_name = "N")]
        retries: Option<u32>,

        /// Use flat delays and keep worklist order
        #[arg(long)]
        no_pacing: bool,

        /// Do not read or write the download journal
        #[arg(long)]
        no_journal: bool,
    },

    /// Discover and validate public proxies
    Proxies {
        /// Stop after this many working proxies
        #[arg(short = 'n', long, value_name = "N")]
        count: Option<usize>,
    },

    /// Configuration management
    #[command(visible_alias = "cfg")]
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
pub enum ConfigAction {
    /// Show current configuration
    Show,

    /// Print the config file location
    Path,

    /// Validate configuration file
    Validate,

    /// Reset configuration to defaults
    Reset {
        /// Skip the confirmation prompt
        #[arg(short, long)]
        yes: bool,
    },

    /// Write a sample configuration file
    Sample {
        /// Output path (defaults to config.sample.toml beside the config)
        #[arg(short, long, value_name = "FILE")]
        output: Option<PathBuf>,

        /// Overwrite an existing file
        #[arg(short, long)]
        force: bool,
    },
}

impl Cli {
    /// Validate CLI arguments and show helpful error messages
    pub fn validate(&self) -> Result<(), String> {
        match &self.command {
            Commands::Download { concurrent, .. } => {
                if let Some(workers) = concurrent {
                    if *workers == 0 || *workers > 16 {
                        return Err("Concurrent downloads must be between 1 and 16".to_string());
                    }
                }
            }
            Commands::Proxies { count: Some(0) } => {
                return Err("Proxy count must be greater than 0".to_string());
            }
            _ => {}
        }
        Ok(())
    }

    /// Commands that must run even when the config file does not validate
    pub fn skips_config_validation(&self) -> bool {
        matches!(
            self.command,
            Commands::Config {
                action: ConfigAction::Reset { .. }
                    | ConfigAction::Path
                    | ConfigAction::Show
                    | ConfigAction::Validate
            }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_download_parsing() {
        let cli = Cli::try_parse_from([
            "romfetch",
            "download",
            "scraped",
            "extra.txt",
            "--concurrent",
            "3",
            "--proxies",
            "-o",
            "/tmp/roms",
        ])
        .unwrap();

        if let Commands::Download {
            worklists,
            concurrent,
            proxies,
            output,
            no_pacing,
            ..
        } = cli.command
        {
            assert_eq!(worklists.len(), 2);
            assert_eq!(concurrent, Some(3));
            assert!(proxies);
            assert_eq!(output, Some(PathBuf::from("/tmp/roms")));
            assert!(!no_pacing);
        } else {
            panic!("Expected Download command");
        }
    }

    #[test]
    fn test_download_requires_worklist() {
        assert!(Cli::try_parse_from(["romfetch", "download"]).is_err());
    }

    #[test]
    fn test_config_subcommands() {
        let cli = Cli::try_parse_from(["romfetch", "config", "reset", "--yes"]).unwrap();
        assert!(matches!(
            cli.command,
            Commands::Config {
                action: ConfigAction::Reset { yes: true }
            }
        ));
        assert!(cli.skips_config_validation());
    }

    #[test]
    fn test_validation() {
        let cli = Cli::try_parse_from(["romfetch", "download", "a.txt", "--concurrent", "0"]).unwrap();
        assert!(cli.validate().is_err());

        let cli = Cli::try_parse_from(["romfetch", "-v", "proxies", "-n", "5"]).unwrap();
        assert!(cli.validate().is_ok());
        assert!(cli.verbose);
        assert!(!cli.skips_config_validation());
    }
}
