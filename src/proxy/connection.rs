/// Transport contracts and the per-endpoint connection bundle.
use std::io;

use futures::future::BoxFuture;
use futures::stream::{SplitSink, SplitStream};
use futures::{Sink, SinkExt, Stream, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::{Duration, Instant};
use tokio_util::codec::Framed;
use tracing::debug;

use super::session::Session;
use crate::irc::codec::{CodecError, IrcCodec};
use crate::irc::filters::{self, RateLimit};
use crate::irc::message::Message;

/// How many parsed messages a read pump may buffer ahead of the loop.
const INBOUND_BUFFER: usize = 16;

/// A bidirectional, message-oriented byte stream: reads yield one
/// [`Message`] at a time, writes accept one. Dropping every half closes
/// the stream, which makes the peer's pending reads return EOF promptly.
pub trait Transport:
    Stream<Item = Result<Message, CodecError>> + Sink<Message, Error = CodecError> + Send + Unpin
{
}

impl<T> Transport for T where
    T: Stream<Item = Result<Message, CodecError>>
        + Sink<Message, Error = CodecError>
        + Send
        + Unpin
{
}

pub type BoxedTransport = Box<dyn Transport>;

/// Dials the upstream server. Invoked by the event loop when a client has
/// arrived and no server connection exists.
pub trait Connector: Send {
    fn connect(&mut self) -> BoxFuture<'_, io::Result<BoxedTransport>>;
}

/// Connects to a fixed address over plain TCP.
pub struct TcpConnector {
    addr: String,
}

impl TcpConnector {
    pub fn new(addr: impl Into<String>) -> Self {
        TcpConnector { addr: addr.into() }
    }
}

impl Connector for TcpConnector {
    fn connect(&mut self) -> BoxFuture<'_, io::Result<BoxedTransport>> {
        Box::pin(async move {
            let stream = TcpStream::connect(&self.addr).await?;
            Ok(Box::new(Framed::new(stream, IrcCodec)) as BoxedTransport)
        })
    }
}

/// Failure to deliver a message to one endpoint.
#[derive(Debug, thiserror::Error)]
pub enum SendError {
    /// The endpoint has no transport attached.
    #[error("connection closed")]
    Closed,
    /// The transport write itself failed.
    #[error(transparent)]
    Write(#[from] CodecError),
}

/// The live half of a connection: the write side of the transport plus
/// the channel its read pump publishes into.
struct Link {
    writer: SplitSink<BoxedTransport, Message>,
    inbound: mpsc::Receiver<Message>,
}

/// One endpoint of the proxy — client or server side.
///
/// A connection may be empty (no transport attached); its session and
/// keepalive bookkeeping exist either way.
pub(crate) struct Connection {
    link: Option<Link>,
    pub session: Session,
    /// Send a PING if no message arrives first. Meaningful while
    /// `ping_sent` is false.
    pub ping_deadline: Instant,
    /// Disconnect if no message arrives first. Meaningful while
    /// `ping_sent` is true.
    pub drop_deadline: Instant,
    /// True while a keepalive PING is outstanding.
    pub ping_sent: bool,
}

impl Connection {
    /// A fresh connection in the empty state.
    pub fn empty() -> Self {
        Connection {
            link: None,
            session: Session::new(),
            ping_deadline: Instant::now(),
            drop_deadline: Instant::now(),
            ping_sent: false,
        }
    }

    /// True if and only if no transport is attached.
    pub fn is_closed(&self) -> bool {
        self.link.is_none()
    }

    /// Attach a transport: split it, start the read pump (optionally
    /// behind a rate limiter), and reset the session and deadlines.
    pub fn attach(&mut self, transport: BoxedTransport, rate: Option<RateLimit>, interval: Duration) {
        let (writer, reader) = transport.split();
        let (tx, rx) = mpsc::channel(INBOUND_BUFFER);

        let inbound = match rate {
            None => rx,
            Some(limit) => {
                let (limited_tx, limited_rx) = mpsc::channel(INBOUND_BUFFER);
                tokio::spawn(filters::rate_limit(rx, limited_tx, limit));
                limited_rx
            }
        };

        tokio::spawn(read_pump(reader, tx));

        self.link = Some(Link {
            writer,
            inbound,
        });
        self.session = Session::new();
        self.refresh_deadlines(interval);
    }

    /// Tear the connection down. Dropping our halves cancels the read
    /// pump and closes the underlying stream; the session resets to
    /// empty. A no-op on an already-empty connection.
    pub fn shutdown(&mut self) {
        self.link = None;
        self.session = Session::new();
    }

    /// Note that a message just arrived: clear any outstanding PING and
    /// push the ping deadline out.
    pub fn refresh_deadlines(&mut self, interval: Duration) {
        self.ping_deadline = Instant::now() + interval;
        self.ping_sent = false;
    }

    /// The next message from this endpoint. Resolves to `None` on EOF,
    /// and never resolves while the connection is empty.
    pub async fn next_message(&mut self) -> Option<Message> {
        match self.link.as_mut() {
            Some(link) => link.inbound.recv().await,
            None => std::future::pending().await,
        }
    }

    /// Write one message to the endpoint. Does not touch the session;
    /// the proxy layers its own bookkeeping on top.
    pub async fn send(&mut self, msg: Message) -> Result<(), SendError> {
        let Some(link) = self.link.as_mut() else {
            return Err(SendError::Closed);
        };
        link.writer.send(msg).await?;
        Ok(())
    }
}

/// Reads messages off the transport and publishes them for the event
/// loop. Returns on EOF, on a read error, or once the loop has dropped
/// its receiver.
async fn read_pump(mut reader: SplitStream<BoxedTransport>, tx: mpsc::Sender<Message>) {
    loop {
        let frame = tokio::select! {
            _ = tx.closed() => return,
            frame = reader.next() => frame,
        };
        match frame {
            Some(Ok(msg)) => {
                if tx.send(msg).await.is_err() {
                    return;
                }
            }
            Some(Err(e)) => {
                debug!("read error: {e}");
                return;
            }
            None => return,
        }
    }
}
