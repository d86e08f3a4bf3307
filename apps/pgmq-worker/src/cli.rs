use clap::{Parser, Subcommand, ValueEnum};

#[derive(Debug, Parser)]
#[command(name = "pgmq-worker")]
#[command(about = "Consume from or seed a pgmq queue")]
pub struct Cli {
    /// Queue backend to talk to
    #[arg(short, long, value_enum, default_value_t = DriverKind::Postgres, global = true)]
    pub driver: DriverKind,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Run the consumer until SIGINT/SIGTERM (options come from CONSUMER_* env vars)
    Consume {
        /// Fail every message, to exercise retries and the DLQ
        #[arg(long)]
        fail: bool,
    },

    /// Enqueue test messages
    Produce {
        /// Number of messages to send
        #[arg(short, long, default_value_t = 1000)]
        count: usize,

        /// Target queue
        #[arg(short, long, default_value = "subscriptions")]
        queue: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum DriverKind {
    /// pgmq extension over a direct Postgres connection
    Postgres,
    /// pgmq_public RPC over the Supabase REST API
    Supabase,
}
