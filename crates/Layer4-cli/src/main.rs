//! Berth CLI - Main entry point

mod app;
mod commands;

use app::{App, RuntimeChoice};
use berth_core::{DeployConfig, DeploymentUpdate};
use clap::{Args as ClapArgs, Parser, Subcommand};
use commands::ExecOptions;
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Berth - deploy agents behind domain/path routes and dispatch tasks to them
#[derive(Parser, Debug)]
#[command(name = "berth")]
#[command(author, version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Command,

    /// Berth home directory (defaults to $BERTH_HOME, then the data dir)
    #[arg(long, global = true)]
    home: Option<PathBuf>,

    /// Container runtime (overrides settings.runtime)
    #[arg(long, global = true, value_enum)]
    runtime: Option<RuntimeChoice>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Supervise every enabled deployment until Ctrl-C
    Serve,
    /// Create a deployment and start its container
    Deploy {
        domain: String,
        path: String,
        #[command(flatten)]
        source: SourceArgs,
        /// Persist without starting a container
        #[arg(long)]
        disabled: bool,
    },
    /// Change a deployment; restarts or recreates its container
    Update {
        domain: String,
        path: String,
        #[command(flatten)]
        source: SourceArgs,
        #[arg(long, conflicts_with = "disable")]
        enable: bool,
        #[arg(long)]
        disable: bool,
    },
    /// Remove a deployment, its container and its files
    Remove { domain: String, path: String },
    /// Pull the repository again and restart the container
    Sync { domain: String, path: String },
    /// List deployments
    List,
    /// Show the deployment that serves a request
    Resolve { host: String, path: String },
    /// Dispatch a task and wait for its response
    Exec {
        host: String,
        path: String,
        /// Command name (defaults to the last path segment)
        #[arg(long)]
        command: Option<String>,
        /// Positional parameter; JSON literals are parsed
        #[arg(short, long = "param")]
        params: Vec<String>,
        /// Caller id for the security context
        #[arg(long)]
        caller: Option<String>,
        #[arg(long, default_value = "POST")]
        method: String,
        #[arg(long)]
        timeout_ms: Option<u64>,
    },
    /// Ask a deployment to drop a task
    Cancel {
        host: String,
        path: String,
        task_id: String,
    },
    /// Delete stale responses, errors, markers and orphaned locks
    Gc {
        /// Age threshold (defaults to settings.orphanRetentionSecs)
        #[arg(long)]
        max_age_secs: Option<u64>,
    },
}

#[derive(ClapArgs, Debug, Default)]
struct SourceArgs {
    /// Agent name
    #[arg(long)]
    agent: Option<String>,
    /// Git repository to check out into the code directory
    #[arg(long)]
    repository: Option<String>,
    #[arg(long)]
    branch: Option<String>,
    /// Directory inside the repository mounted as /app
    #[arg(long)]
    sub_path: Option<String>,
    #[arg(long)]
    image: Option<String>,
    /// Start command (shell-quoted)
    #[arg(long = "start-command")]
    start_command: Option<String>,
    /// Environment variable, KEY=VALUE
    #[arg(short, long = "env", value_parser = parse_env)]
    env: Vec<(String, String)>,
}

impl SourceArgs {
    fn into_deploy_config(self, disabled: bool) -> anyhow::Result<DeployConfig> {
        let Some(agent) = self.agent else {
            anyhow::bail!("--agent is required");
        };
        let mut config = DeployConfig::new(agent);
        config.repository = self.repository;
        config.branch = self.branch;
        config.sub_path = self.sub_path;
        config.image = self.image;
        config.command = self.start_command;
        config.environment = commands::environment(self.env);
        config.enabled = Some(!disabled);
        Ok(config)
    }

    fn into_update(self, enabled: Option<bool>) -> DeploymentUpdate {
        DeploymentUpdate {
            agent: self.agent,
            repository: self.repository,
            branch: self.branch,
            sub_path: self.sub_path,
            image: self.image,
            command: self.start_command,
            environment: (!self.env.is_empty()).then(|| commands::environment(self.env)),
            enabled,
        }
    }
}

fn parse_env(raw: &str) -> Result<(String, String), String> {
    match raw.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
        _ => Err(format!("expected KEY=VALUE, got '{}'", raw)),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let (paths, settings) = app::load_settings(args.home)?;

    // Initialize logging
    let log_level = if args.debug {
        "debug"
    } else {
        settings.log_level.as_str()
    };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level)),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .init();

    let app = App::open(paths, settings, args.runtime).await?;

    match args.command {
        Command::Serve => commands::serve(&app).await,
        Command::Deploy {
            domain,
            path,
            source,
            disabled,
        } => {
            let config = source.into_deploy_config(disabled)?;
            commands::deploy(&app, &domain, &path, config).await
        }
        Command::Update {
            domain,
            path,
            source,
            enable,
            disable,
        } => {
            let enabled = match (enable, disable) {
                (true, _) => Some(true),
                (_, true) => Some(false),
                _ => None,
            };
            commands::update(&app, &domain, &path, source.into_update(enabled)).await
        }
        Command::Remove { domain, path } => commands::remove(&app, &domain, &path).await,
        Command::Sync { domain, path } => commands::sync(&app, &domain, &path).await,
        Command::List => commands::list(&app).await,
        Command::Resolve { host, path } => commands::resolve(&app, &host, &path).await,
        Command::Exec {
            host,
            path,
            command,
            params,
            caller,
            method,
            timeout_ms,
        } => {
            let options = ExecOptions {
                method,
                command,
                params,
                caller,
                timeout: timeout_ms.map(Duration::from_millis),
            };
            commands::exec(&app, &host, &path, options).await
        }
        Command::Cancel {
            host,
            path,
            task_id,
        } => commands::cancel(&app, &host, &path, &task_id).await,
        Command::Gc { max_age_secs } => {
            commands::gc(&app, max_age_secs.map(Duration::from_secs)).await
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Args::command().debug_assert();
    }

    #[test]
    fn test_parse_deploy() {
        let args = Args::try_parse_from([
            "berth",
            "--runtime",
            "memory",
            "deploy",
            "example.com",
            "/api",
            "--agent",
            "demo",
            "-e",
            "MODE=prod",
            "--start-command",
            "node server.js",
        ])
        .unwrap();
        assert_eq!(args.runtime, Some(RuntimeChoice::Memory));

        let Command::Deploy { source, disabled, .. } = args.command else {
            panic!("expected deploy");
        };
        let config = source.into_deploy_config(disabled).unwrap();
        assert_eq!(config.agent, "demo");
        assert_eq!(config.command.as_deref(), Some("node server.js"));
        assert_eq!(config.environment["MODE"], "prod");
        assert_eq!(config.enabled, Some(true));
    }

    #[test]
    fn test_parse_env() {
        assert_eq!(
            parse_env("A=b=c").unwrap(),
            ("A".to_string(), "b=c".to_string())
        );
        assert!(parse_env("novalue").is_err());
        assert!(parse_env("=x").is_err());
    }

    #[test]
    fn test_update_leaves_unset_fields_alone() {
        let update = SourceArgs {
            image: Some("python:3.12".into()),
            ..Default::default()
        }
        .into_update(Some(false));
        assert_eq!(update.image.as_deref(), Some("python:3.12"));
        assert!(update.environment.is_none());
        assert!(update.agent.is_none());
        assert_eq!(update.enabled, Some(false));
    }
}
