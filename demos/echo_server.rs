//! Runnable happy-echo server (§8 scenario 1): accepts TLS connections and echoes every
//! `receive-complete` payload straight back on the session it arrived on.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use structopt::StructOpt;
use transport::events::{ChannelObserver, Event};
use transport::{Acceptor, ServerConfig};

#[derive(StructOpt)]
#[structopt(name = "echo-server")]
struct Args {
    /// Address to listen on, e.g. 127.0.0.1:8443.
    #[structopt(long)]
    listen: SocketAddr,

    /// PEM certificate chain for the server identity.
    #[structopt(long)]
    cert: PathBuf,

    /// PEM private key matching `--cert`.
    #[structopt(long)]
    key: PathBuf,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();
    let args = Args::from_args();

    let (observer, mut events) = ChannelObserver::new();
    let config = ServerConfig::new(args.cert, args.key);
    let acceptor = Arc::new(Acceptor::bind(args.listen, config, Some(Arc::new(observer))).await?);

    tracing::info!(address = %acceptor.local_addr()?, "echo server listening");

    let echo_acceptor = acceptor.clone();
    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            if let Event::ReceiveComplete {
                peer: Some(id),
                body,
            } = event
            {
                if let Some(session) = echo_acceptor.get_session(id).await {
                    let _ = session.send(body);
                }
            }
        }
    });

    acceptor.serve().await?;
    Ok(())
}
