use std::time::Duration;

use clap::Parser;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_util::codec::Framed;
use tracing::{info, warn};

use irc_idler::irc::codec::IrcCodec;
use irc_idler::irc::filters::RateLimit;
use irc_idler::proxy::{BoxedTransport, Config, Proxy, TcpConnector, DEFAULT_PING_INTERVAL};
use irc_idler::storage::memory::MemoryStore;

/// IRC proxy that keeps your session alive while your client is away.
#[derive(Debug, Parser)]
#[command(name = "irc-idler")]
struct Args {
    /// Local address to listen on.
    #[arg(long, default_value = "127.0.0.1:6667")]
    listen: String,

    /// Upstream IRC server to connect to (host:port).
    #[arg(long)]
    server: String,

    /// Keepalive ping interval, in seconds.
    #[arg(long, default_value_t = DEFAULT_PING_INTERVAL.as_secs())]
    ping_interval: u64,

    /// Rate-limit the client-to-server message flow.
    #[arg(long)]
    limit_client_rate: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let args = Args::parse();

    let listener = TcpListener::bind(&args.listen).await?;
    info!("irc-idler listening on {}", args.listen);

    let (conn_tx, conn_rx) = mpsc::channel(1);
    tokio::spawn(accept_loop(listener, conn_tx));

    let proxy = Proxy::new(Config {
        ping_interval: Duration::from_secs(args.ping_interval),
        store: Box::new(MemoryStore::new()),
        connector: Box::new(TcpConnector::new(args.server)),
        client_source: conn_rx,
        client_rate: args.limit_client_rate.then(RateLimit::default),
    });
    proxy.run().await;

    Ok(())
}

/// Accept client connections and feed them to the proxy as transports.
async fn accept_loop(listener: TcpListener, conns: mpsc::Sender<BoxedTransport>) {
    loop {
        match listener.accept().await {
            Ok((socket, addr)) => {
                info!(%addr, "new client connection");
                let transport: BoxedTransport = Box::new(Framed::new(socket, IrcCodec));
                if conns.send(transport).await.is_err() {
                    return;
                }
            }
            Err(e) => {
                warn!("accept error: {e}");
                tokio::time::sleep(Duration::from_secs(1)).await;
            }
        }
    }
}
