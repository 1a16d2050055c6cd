/// Support code for the trace tests.
///
/// The proxy is driven end to end over in-memory transports: the harness
/// plays both the IRC client and the upstream server, scripting traces
/// like "client connects, proxy dials the server, client sends NICK,
/// server must receive NICK". Timeouts run on tokio's paused clock, so
/// the traces are fast and the keepalive tests are deterministic.
use std::io;
use std::time::Duration;

use futures::future::BoxFuture;
use futures::SinkExt;
use pretty_assertions::assert_eq;
use tokio_stream::StreamExt;
use tokio::io::{duplex, DuplexStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_util::codec::Framed;

use irc_idler::irc::codec::IrcCodec;
use irc_idler::irc::filters::RateLimit;
use irc_idler::irc::message::Message;
use irc_idler::proxy::{BoxedTransport, Config, Connector, Proxy, StopHandle};
use irc_idler::storage::memory::MemoryStore;

/// How long a single trace step may wait before the test fails.
pub const STEP_TIMEOUT: Duration = Duration::from_secs(1);

/// Keepalive interval the test proxy runs with.
pub const PING_INTERVAL: Duration = Duration::from_secs(5);

/// Prefix the scripted server stamps on its replies.
pub const SERVER_PREFIX: &str = "irc.example.net";

const YOURHOST_TEXT: &str = "Your host is irc.example.net, running example-1.0";
const CREATED_TEXT: &str = "This server was created yesterday";
const MYINFO_PARAMS: [&str; 4] = ["irc.example.net", "example-1.0", "aiwro", "Oov"];

/// Build a message from borrowed pieces.
pub fn msg(prefix: Option<&str>, command: &str, params: &[&str]) -> Message {
    Message {
        prefix: prefix.map(str::to_owned),
        command: command.to_owned(),
        params: params.iter().map(|p| (*p).to_owned()).collect(),
    }
}

/// The harness end of one proxy transport.
pub struct Peer {
    framed: Framed<DuplexStream, IrcCodec>,
}

impl Peer {
    pub async fn send(&mut self, msg: Message) {
        timeout(STEP_TIMEOUT, self.framed.send(msg))
            .await
            .expect("timed out sending to proxy")
            .expect("send to proxy failed");
    }

    pub async fn expect(&mut self, want: Message) {
        let got = timeout(STEP_TIMEOUT, self.framed.next())
            .await
            .unwrap_or_else(|_| panic!("timed out waiting for {want}"))
            .unwrap_or_else(|| panic!("disconnected while waiting for {want}"))
            .expect("codec error");
        assert_eq!(want, got);
    }

    /// The proxy must close this transport.
    pub async fn expect_eof(&mut self) {
        let got = timeout(STEP_TIMEOUT, self.framed.next())
            .await
            .expect("timed out waiting for disconnect");
        assert!(got.is_none(), "expected disconnect, got {got:?}");
    }

    /// Nothing may arrive on this transport for a while.
    pub async fn expect_silence(&mut self) {
        if let Ok(got) = timeout(STEP_TIMEOUT, self.framed.next()).await {
            panic!("expected silence, got {got:?}");
        }
    }
}

/// Channel-backed connector: surfaces the proxy's connect attempts to the
/// harness, which answers them with in-memory transports.
struct ChanConnector {
    requests: mpsc::UnboundedSender<()>,
    responses: mpsc::Receiver<BoxedTransport>,
}

impl Connector for ChanConnector {
    fn connect(&mut self) -> BoxFuture<'_, io::Result<BoxedTransport>> {
        Box::pin(async move {
            self.requests
                .send(())
                .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "harness gone"))?;
            self.responses.recv().await.ok_or_else(|| {
                io::Error::new(io::ErrorKind::ConnectionRefused, "no server transport")
            })
        })
    }
}

/// A proxy running in the background, plus the channels to script it.
pub struct Harness {
    client_conns: mpsc::Sender<BoxedTransport>,
    connect_requests: mpsc::UnboundedReceiver<()>,
    connect_responses: mpsc::Sender<BoxedTransport>,
    pub stop: StopHandle,
    _task: JoinHandle<()>,
}

impl Harness {
    pub fn start() -> Self {
        Self::with_client_rate(None)
    }

    pub fn with_client_rate(client_rate: Option<RateLimit>) -> Self {
        let (client_tx, client_rx) = mpsc::channel(1);
        let (req_tx, req_rx) = mpsc::unbounded_channel();
        let (resp_tx, resp_rx) = mpsc::channel(1);

        let proxy = Proxy::new(Config {
            ping_interval: PING_INTERVAL,
            store: Box::new(MemoryStore::new()),
            connector: Box::new(ChanConnector {
                requests: req_tx,
                responses: resp_rx,
            }),
            client_source: client_rx,
            client_rate,
        });
        let stop = proxy.stop_handle();
        let task = tokio::spawn(proxy.run());

        Harness {
            client_conns: client_tx,
            connect_requests: req_rx,
            connect_responses: resp_tx,
            stop,
            _task: task,
        }
    }

    /// Connect a new client to the proxy.
    pub async fn connect_client(&mut self) -> Peer {
        let (ours, theirs) = transport_pair();
        timeout(STEP_TIMEOUT, self.client_conns.send(theirs))
            .await
            .expect("timed out offering client connection")
            .expect("proxy gone");
        ours
    }

    /// Wait for the proxy to dial upstream and hand it a transport.
    pub async fn accept_server(&mut self) -> Peer {
        timeout(STEP_TIMEOUT, self.connect_requests.recv())
            .await
            .expect("timed out waiting for the proxy to dial the server")
            .expect("proxy gone");
        let (ours, theirs) = transport_pair();
        timeout(STEP_TIMEOUT, self.connect_responses.send(theirs))
            .await
            .expect("timed out answering server dial")
            .expect("proxy gone");
        ours
    }
}

fn transport_pair() -> (Peer, BoxedTransport) {
    let (ours, theirs) = duplex(4096);
    (
        Peer {
            framed: Framed::new(ours, IrcCodec),
        },
        Box::new(Framed::new(theirs, IrcCodec)),
    )
}

/// The welcome numerics (001-004) for `nick`, as the scripted server
/// sends them on a first login.
pub fn welcome_sequence(nick: &str) -> Vec<Message> {
    let mut myinfo = vec![nick];
    myinfo.extend(MYINFO_PARAMS);
    vec![
        msg(
            Some(SERVER_PREFIX),
            "001",
            &[nick, &format!("Welcome to the Example IRC Network, {nick}")],
        ),
        msg(Some(SERVER_PREFIX), "002", &[nick, YOURHOST_TEXT]),
        msg(Some(SERVER_PREFIX), "003", &[nick, CREATED_TEXT]),
        msg(Some(SERVER_PREFIX), "004", &myinfo),
    ]
}

/// The welcome numerics the proxy forges for `nick` on reconnect.
pub fn forged_welcome(nick: &str) -> Vec<Message> {
    let mut forged = welcome_sequence(nick);
    forged[0] = msg(
        Some(SERVER_PREFIX),
        "001",
        &[nick, &format!("Welcome back to IRC Idler, {nick}")],
    );
    forged
}

/// The MOTD (375/372/376) for `nick`.
pub fn motd_sequence(nick: &str) -> Vec<Message> {
    vec![
        msg(
            Some(SERVER_PREFIX),
            "375",
            &[nick, "- irc.example.net Message of the day -"],
        ),
        msg(Some(SERVER_PREFIX), "372", &[nick, "- Be excellent to each other"]),
        msg(Some(SERVER_PREFIX), "376", &[nick, "End of /MOTD command"]),
    ]
}

/// Run a complete first login as alice: connect both sides, NICK/USER
/// through, welcome and MOTD forwarded verbatim.
pub async fn login(h: &mut Harness) -> (Peer, Peer) {
    let mut client = h.connect_client().await;
    let mut server = h.accept_server().await;

    client.send(msg(None, "NICK", &["alice"])).await;
    server.expect(msg(None, "NICK", &["alice"])).await;
    client
        .send(msg(None, "USER", &["alice", "0", "*", "Alice"]))
        .await;
    server
        .expect(msg(None, "USER", &["alice", "0", "*", "Alice"]))
        .await;

    for m in welcome_sequence("alice") {
        server.send(m.clone()).await;
        client.expect(m).await;
    }
    for m in motd_sequence("alice") {
        server.send(m.clone()).await;
        client.expect(m).await;
    }

    (client, server)
}

/// Reconnect as `nick` after a completed login: NICK/USER in, forged
/// welcome out, MOTD round trip through the live server connection.
pub async fn reconnect(h: &mut Harness, server: &mut Peer, nick: &str) -> Peer {
    let mut client = h.connect_client().await;

    client.send(msg(None, "NICK", &[nick])).await;
    client.send(msg(None, "USER", &[nick, "0", "*", nick])).await;

    for m in forged_welcome(nick) {
        client.expect(m).await;
    }
    server.expect(msg(None, "MOTD", &[])).await;
    for m in motd_sequence(nick) {
        server.send(m.clone()).await;
        client.expect(m).await;
    }

    client
}
