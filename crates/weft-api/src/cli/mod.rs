//! Command-line interface definitions.

pub mod thread;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use uuid::Uuid;

#[derive(Parser)]
#[command(name = "weft", version, about = "Workflow thread coordinator")]
pub struct Cli {
    /// Emit machine-readable JSON instead of tables.
    #[arg(long, global = true)]
    pub json: bool,

    /// Export tracing spans through OpenTelemetry (stdout exporter).
    #[arg(long, global = true)]
    pub otel: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the REST API and WebSocket server.
    Serve {
        /// Bind address, overriding the configured host.
        #[arg(long)]
        host: Option<String>,

        /// Bind port, overriding the configured port.
        #[arg(long)]
        port: Option<u16>,
    },

    /// Execute a workflow from a JSON file and wait for the result.
    Run {
        /// Path to a workflow file: a single step object or a step array.
        file: PathBuf,

        /// Project whose agent mappings apply to this run.
        #[arg(long)]
        project: Option<String>,

        /// Explicit thread id (generated when omitted).
        #[arg(long)]
        thread_id: Option<String>,

        /// Give up waiting after this many milliseconds. The thread keeps
        /// executing in the background.
        #[arg(long)]
        timeout_ms: Option<u64>,

        /// Print the thread id immediately instead of waiting.
        #[arg(long)]
        detach: bool,
    },

    /// Show the current state of a thread.
    State {
        thread_id: String,
    },

    /// List a thread's checkpoint history.
    History {
        thread_id: String,
    },

    /// Resume a thread from its latest (or a specific) checkpoint.
    Resume {
        thread_id: String,

        /// Path to the workflow file to resume with.
        file: PathBuf,

        /// Roll back to this checkpoint instead of the latest.
        #[arg(long)]
        checkpoint: Option<Uuid>,

        /// Project whose agent mappings apply to the resumed run.
        #[arg(long)]
        project: Option<String>,
    },

    /// Pause a running thread; in-flight steps drain first.
    Pause {
        thread_id: String,

        /// Reason recorded on the thread.
        #[arg(long)]
        reason: Option<String>,
    },

    /// Abort a thread, cancelling its in-flight steps.
    Abort {
        thread_id: String,
    },
}
