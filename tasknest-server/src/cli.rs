use clap::{Parser, Subcommand};

const HELP_EPILOG: &str = r#"Server options can also be provided via environment variables:
  CONFIG_PATH (default: ./config.yaml)
  DB_PATH     (default: data/app.db)
  PORT        (default: 5151 or config.listen_port)

The `scan` command runs the due-task sweep once and exits; point a cron
entry at it (or POST the jobs/due-scan endpoint) for periodic delivery.
"#;

#[derive(Debug, Parser)]
#[command(
    name = "tasknest-server",
    version,
    about = "TaskNest reminder push server",
    long_about = None,
    after_long_help = HELP_EPILOG,
)]
pub struct Cli {
    /// Optional subcommand. Without one, runs the server.
    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run the due-task scan once and print the run summary as JSON
    Scan,
}
