//! Command-line interface

use std::net::SocketAddr;
use std::path::PathBuf;

use clap::Parser;

use crate::config::Config;
use crate::moderation::basic::KeywordFilter;

/// GuardianBridge - configurable AI API gateway.
///
/// Moderates, translates between vendor chat dialects, and transparently
/// forwards to the upstream encoded in each request's path.
#[derive(Debug, Parser)]
#[command(name = "guardian-bridge", version)]
pub struct Cli {
    /// Address to bind (overrides config file)
    #[arg(long)]
    pub bind: Option<SocketAddr>,

    /// Base directory of moderation profiles
    #[arg(long, value_name = "DIR")]
    pub profiles_dir: Option<PathBuf>,

    /// Server config file path
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Default log level when RUST_LOG is unset
    #[arg(long, value_name = "LEVEL")]
    pub log_level: Option<String>,

    /// Write daily-rotated log files into this directory
    #[arg(long, value_name = "DIR")]
    pub log_dir: Option<PathBuf>,

    /// Disable the background training scheduler
    #[arg(long)]
    pub no_scheduler: bool,

    /// Load a keyword file, print its compiled patterns, and exit
    #[arg(long, value_name = "FILE")]
    pub check_keywords: Option<PathBuf>,
}

impl Cli {
    /// Apply CLI overrides on top of the loaded config
    pub fn apply(&self, config: &mut Config) {
        if let Some(bind) = self.bind {
            config.bind_addr = bind;
        }
        if let Some(dir) = &self.profiles_dir {
            config.profiles_dir = dir.clone();
        }
        if let Some(level) = &self.log_level {
            config.logging.level = level.clone();
        }
        if let Some(dir) = &self.log_dir {
            config.log_dir = Some(dir.clone());
        }
        if self.no_scheduler {
            config.scheduler.enabled = false;
        }
    }
}

/// Handle utility flags that run and exit. Returns true when handled.
pub fn handle_utility_commands(cli: &Cli) -> bool {
    if let Some(path) = &cli.check_keywords {
        let filter = KeywordFilter::new(path);
        println!(
            "{}: {} pattern(s)",
            path.display(),
            filter.pattern_count()
        );
        for pattern in filter.patterns() {
            println!("  {}", pattern);
        }
        return true;
    }
    false
}
