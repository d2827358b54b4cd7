mod send;
mod serve;

use clap::{Args, Subcommand};
use resilink_link::Result;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run an always-on echo server for a fixed set of clients.
    Serve(ServeArgs),
    /// Connect as a client and exchange numbered demo messages.
    Send(SendArgs),
}

#[derive(Args, Debug)]
pub struct ServeArgs {
    /// TCP port to listen on.
    #[arg(long, default_value_t = 8123)]
    pub port: u16,

    /// Client identity to wait for before echoing. Repeatable.
    #[arg(long = "expect", value_name = "IDENTITY", required = true)]
    pub expected: Vec<String>,

    /// Keepalive timeout in milliseconds. Must match the clients.
    #[arg(long, default_value_t = 5000)]
    pub timeout_ms: u64,
}

#[derive(Args, Debug)]
pub struct SendArgs {
    /// Identity presented to the server.
    pub identity: String,

    /// Server host.
    #[arg(long, default_value = "127.0.0.1")]
    pub host: String,

    /// Server port.
    #[arg(long, default_value_t = 8123)]
    pub port: u16,

    /// Text included in every demo message.
    #[arg(long, default_value = "hello")]
    pub data: String,

    /// Seconds between demo messages.
    #[arg(long, default_value_t = 5)]
    pub interval: u64,

    /// Keepalive timeout in milliseconds. Must match the server.
    #[arg(long, default_value_t = 5000)]
    pub timeout_ms: u64,

    /// Send best-effort instead of exactly-once.
    #[arg(long)]
    pub best_effort: bool,
}

pub async fn run(command: Command) -> Result<()> {
    match command {
        Command::Serve(args) => serve::run(args).await,
        Command::Send(args) => send::run(args).await,
    }
}
