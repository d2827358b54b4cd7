use std::time::Duration;

use tracing::{info, warn};

use resilink_link::{Client, ClientConfig, LinkConfig, Result};

use super::SendArgs;

pub async fn run(args: SendArgs) -> Result<()> {
    let link = LinkConfig {
        timeout: Duration::from_millis(args.timeout_ms),
        ..LinkConfig::default()
    };
    let cfg = ClientConfig::new(args.host.clone(), args.port, args.identity.clone())
        .with_link(link);
    let client = Client::connect(cfg).await?;

    // Print server responses as they come.
    let reader = client.connection().clone();
    tokio::spawn(async move {
        loop {
            match reader.readline().await {
                Ok(line) => println!("{line}"),
                Err(err) => {
                    warn!(%err, "reader stopped");
                    return;
                }
            }
        }
    });

    let qos = !args.best_effort;
    let mut seq = 0u64;
    loop {
        // Sequence number and connect count let the server side observe
        // losses and reconnections in the demo output.
        let payload =
            serde_json::json!([seq, client.connects(), args.data.as_str()]).to_string();
        client.write(&payload, qos, true).await?;
        info!(seq, "sent");
        seq += 1;
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("shutting down");
                client.close();
                return Ok(());
            }
            _ = tokio::time::sleep(Duration::from_secs(args.interval)) => {}
        }
    }
}
