//! Runnable happy-echo client (§8 scenario 1): connects, sends one payload, and prints back
//! whatever the server echoes.

use std::path::PathBuf;
use std::time::Duration;

use structopt::StructOpt;
use transport::events::{ChannelObserver, Event};
use transport::{connect, ClientConfig, TrustSource};

#[derive(StructOpt)]
#[structopt(name = "echo-client")]
struct Args {
    /// Server hostname.
    #[structopt(long)]
    host: String,

    /// Server port.
    #[structopt(long)]
    port: u16,

    /// Directory of trusted CA certificates. Defaults to the platform web root store.
    #[structopt(long)]
    trust_dir: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();
    let args = Args::from_args();

    let trust = match args.trust_dir {
        Some(dir) => TrustSource::Directory(dir),
        None => TrustSource::WebPkiRoots,
    };
    let config = ClientConfig::new(vec![(args.host, args.port)]).trust(trust);

    let (observer, mut events) = ChannelObserver::new();
    let session = connect(&config, Some(std::sync::Arc::new(observer))).await?;

    session.send(bytes::Bytes::from_static(&[0x01, 0x02, 0x03]));

    let echoed = tokio::time::timeout(Duration::from_secs(5), async {
        while let Some(event) = events.recv().await {
            if let Event::ReceiveComplete { body, .. } = event {
                return Some(body);
            }
        }
        None
    })
    .await?;

    match echoed {
        Some(body) => println!("echoed back: {:?}", body.as_ref()),
        None => println!("connection closed before an echo arrived"),
    }

    session.disconnect().await;
    Ok(())
}
