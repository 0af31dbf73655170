use clap::{Args, Parser, Subcommand};
use nahcloud_config::ConfigOverrides;
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(
    name = "nahcloud",
    about = "Mock cloud API with a Terraform state backend and chaos injection",
    version
)]
pub struct Cli {
    /// Server URL used by client commands.
    #[arg(long, env = "NAH_URL", global = true, default_value = "http://localhost:8080")]
    pub remote: String,

    /// Bearer token. `serve` requires it from clients; client commands send it.
    #[arg(long, env = "NAH_TOKEN", global = true, hide_env_values = true)]
    pub token: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run the API server.
    Serve(ServeArgs),

    /// Show build information of a running server.
    Status,

    /// Inspect or manipulate Terraform state on a running server.
    State {
        #[command(subcommand)]
        command: StateCommand,
    },
}

#[derive(Debug, Subcommand)]
pub enum StateCommand {
    /// Print the stored state document.
    Pull { id: String },

    /// Upload a state document from a file.
    Push {
        id: String,
        file: PathBuf,
        /// ID of the lock currently held, if any.
        #[arg(long)]
        lock_id: Option<String>,
    },

    /// Acquire the state lock. Prints the lock ID on success.
    Lock {
        id: String,
        /// Lock ID to use; a random one is generated when omitted.
        #[arg(long)]
        lock_id: Option<String>,
    },

    /// Release the state lock.
    Unlock {
        id: String,
        #[arg(long)]
        lock_id: String,
    },
}

#[derive(Debug, Args)]
pub struct ServeArgs {
    /// YAML or JSON config file. Flags and NAH_* variables win over it.
    #[arg(short, long, env = "NAH_CONFIG")]
    pub config: Option<PathBuf>,

    /// Listen address, `host:port` or `:port`.
    #[arg(long, env = "NAH_ADDR")]
    pub addr: Option<String>,

    /// SQLite database file.
    #[arg(long, env = "NAH_SQLITE_DSN", alias = "sqlite-dsn")]
    pub sqlite_path: Option<String>,

    /// Keep everything in memory. Nothing survives a restart.
    #[arg(long, env = "NAH_EPHEMERAL")]
    pub ephemeral: bool,

    #[arg(long, env = "NAH_REQUEST_TIMEOUT_SECS")]
    pub request_timeout_secs: Option<u64>,

    /// Turn chaos injection on or off.
    #[arg(long, env = "NAH_CHAOS_ENABLED", num_args = 0..=1, default_missing_value = "true")]
    pub chaos_enabled: Option<bool>,

    /// RNG seed for reproducible chaos. 0 picks a time-based seed.
    #[arg(long, env = "NAH_CHAOS_SEED")]
    pub chaos_seed: Option<u64>,

    /// Latency range for every category, e.g. `50-200` (milliseconds).
    #[arg(long, env = "NAH_CHAOS_LATENCY_GLOBAL_MS")]
    pub chaos_latency_global: Option<String>,

    #[arg(long, env = "NAH_CHAOS_LATENCY_PROJECTS_MS")]
    pub chaos_latency_projects: Option<String>,

    #[arg(long, env = "NAH_CHAOS_LATENCY_INSTANCES_MS")]
    pub chaos_latency_instances: Option<String>,

    #[arg(long, env = "NAH_CHAOS_LATENCY_METADATA_MS")]
    pub chaos_latency_metadata: Option<String>,

    /// Error probability in [0, 1].
    #[arg(long, env = "NAH_CHAOS_ERROR_RATE_PROJECTS")]
    pub chaos_errrate_projects: Option<f64>,

    /// Error probability for project GETs only. Defaults to the projects rate.
    #[arg(long, env = "NAH_CHAOS_ERROR_RATE_PROJECTS_GET")]
    pub chaos_errrate_projects_get: Option<f64>,

    #[arg(long, env = "NAH_CHAOS_ERROR_RATE_INSTANCES")]
    pub chaos_errrate_instances: Option<f64>,

    #[arg(long, env = "NAH_CHAOS_ERROR_RATE_METADATA")]
    pub chaos_errrate_metadata: Option<f64>,

    /// Status codes to inject, comma separated.
    #[arg(long, env = "NAH_CHAOS_ERROR_TYPES", value_delimiter = ',')]
    pub chaos_error_types: Option<Vec<u16>>,

    /// Weight per status code, comma separated.
    #[arg(long, env = "NAH_CHAOS_ERROR_WEIGHTS", value_delimiter = ',')]
    pub chaos_error_weights: Option<Vec<u32>>,
}

impl ServeArgs {
    pub fn overrides(&self, token: Option<String>) -> ConfigOverrides {
        ConfigOverrides {
            addr: self.addr.clone(),
            token,
            sqlite_path: self.sqlite_path.clone(),
            ephemeral: self.ephemeral.then_some(true),
            request_timeout_secs: self.request_timeout_secs,
            chaos_enabled: self.chaos_enabled,
            chaos_seed: self.chaos_seed,
            latency_global: self.chaos_latency_global.clone(),
            latency_projects: self.chaos_latency_projects.clone(),
            latency_instances: self.chaos_latency_instances.clone(),
            latency_metadata: self.chaos_latency_metadata.clone(),
            error_rate_projects: self.chaos_errrate_projects,
            error_rate_projects_get: self.chaos_errrate_projects_get,
            error_rate_instances: self.chaos_errrate_instances,
            error_rate_metadata: self.chaos_errrate_metadata,
            error_types: self.chaos_error_types.clone(),
            error_weights: self.chaos_error_weights.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serve_flags_become_overrides() {
        let cli = Cli::try_parse_from([
            "nahcloud",
            "serve",
            "--addr",
            ":9000",
            "--ephemeral",
            "--chaos-enabled",
            "--chaos-seed",
            "7",
            "--chaos-errrate-projects",
            "0.5",
            "--chaos-error-types",
            "500,503",
            "--chaos-error-weights",
            "1,3",
        ])
        .unwrap();

        let Command::Serve(args) = cli.command else {
            panic!("expected serve");
        };
        let o = args.overrides(Some("t".into()));
        assert_eq!(o.addr.as_deref(), Some(":9000"));
        assert_eq!(o.ephemeral, Some(true));
        assert_eq!(o.chaos_enabled, Some(true));
        assert_eq!(o.chaos_seed, Some(7));
        assert_eq!(o.error_rate_projects, Some(0.5));
        assert_eq!(o.error_types, Some(vec![500, 503]));
        assert_eq!(o.error_weights, Some(vec![1, 3]));
        assert_eq!(o.token.as_deref(), Some("t"));
    }

    #[test]
    fn unset_flags_leave_file_values_alone() {
        let cli = Cli::try_parse_from(["nahcloud", "serve"]).unwrap();
        let Command::Serve(args) = cli.command else {
            panic!("expected serve");
        };
        let o = args.overrides(None);
        assert_eq!(o.ephemeral, None);
        assert_eq!(o.chaos_enabled, None);
        assert_eq!(o.error_types, None);
    }

    #[test]
    fn state_unlock_requires_lock_id() {
        assert!(Cli::try_parse_from(["nahcloud", "state", "unlock", "main"]).is_err());
        assert!(
            Cli::try_parse_from(["nahcloud", "state", "unlock", "main", "--lock-id", "A"]).is_ok()
        );
    }
}
