use std::time::Duration;

use tracing::{info, warn};

use resilink_link::{Connection, LinkConfig, Result, Server, ServerConfig};

use super::ServeArgs;

pub async fn run(args: ServeArgs) -> Result<()> {
    let link = LinkConfig {
        timeout: Duration::from_millis(args.timeout_ms),
        ..LinkConfig::default()
    };
    link.validate()?;

    let cfg = ServerConfig::new(args.port)
        .with_expected(args.expected.iter().cloned())
        .with_link(link);
    let server = Server::bind(cfg).await?;
    info!(addr = %server.local_addr(), clients = args.expected.len(), "waiting for clients");

    let conns = server.wait_for_all(&args.expected).await?;
    info!("all clients up");
    for conn in conns {
        tokio::spawn(echo(conn));
    }

    tokio::signal::ctrl_c().await?;
    info!("shutting down");
    server.close_all();
    Ok(())
}

/// Log each inbound line and send it straight back, exactly once.
async fn echo(conn: Connection) {
    loop {
        let line = match conn.readline().await {
            Ok(line) => line,
            Err(err) => {
                warn!(identity = conn.identity(), %err, "reader stopped");
                return;
            }
        };
        info!(identity = conn.identity(), %line, connects = conn.connects(), "received");
        if let Err(err) = conn.write(&line, true, true).await {
            warn!(identity = conn.identity(), %err, "echo failed");
            return;
        }
    }
}
