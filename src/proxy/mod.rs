/// The proxy daemon proper.
///
/// One event loop owns both endpoints and every piece of mutable state.
/// It relays traffic between a single IRC client and a single upstream
/// server, keeps the server session alive while the client is away, logs
/// what the client misses, and forges the server's welcome and join
/// sequences when the client comes back.
use tokio::sync::mpsc;
use tokio::time::{interval_at, Duration, Instant};
use tracing::{debug, error, info, warn};

pub mod connection;
pub mod session;

pub use connection::{BoxedTransport, Connector, SendError, TcpConnector, Transport};

use crate::irc::filters::RateLimit;
use crate::irc::message::Message;
use crate::irc::replies;
use crate::irc::validate::validate;
use crate::storage::Store;
use connection::Connection;

/// Keepalive period used when the configuration does not say otherwise.
pub const DEFAULT_PING_INTERVAL: Duration = Duration::from_secs(30);

/// Token the proxy pings its peers with.
const PING_TOKEN: &str = "irc-idler";

/// Everything a proxy needs to run.
pub struct Config {
    /// Quiet time after which a PING is sent; doubles as the PONG
    /// timeout after which the silent side is dropped.
    pub ping_interval: Duration,
    /// Backend for the per-channel message logs.
    pub store: Box<dyn Store>,
    /// Dialer for the upstream server.
    pub connector: Box<dyn Connector>,
    /// Incoming client connections, one transport per client.
    pub client_source: mpsc::Receiver<BoxedTransport>,
    /// Optional flood protection on the client-to-server flow.
    pub client_rate: Option<RateLimit>,
}

/// Asks a running proxy to shut down.
#[derive(Clone)]
pub struct StopHandle {
    tx: mpsc::Sender<()>,
}

impl StopHandle {
    /// Signal the proxy to drop both connections and return. Does not
    /// wait for the shutdown to complete.
    pub async fn stop(&self) {
        let _ = self.tx.send(()).await;
    }
}

/// Numeric replies recorded from the server's first welcome sequence.
///
/// Once the server believes we are logged in it will never repeat these,
/// so they are captured the first time through and replayed verbatim to
/// reconnecting clients.
#[derive(Debug, Default)]
struct WelcomeCache {
    /// Prefix the server stamps on its own messages.
    server_prefix: String,
    /// RPL_YOURHOST text.
    yourhost: String,
    /// RPL_CREATED text.
    created: String,
    /// RPL_MYINFO parameters after the nick.
    myinfo: Vec<String>,
    /// True once the full sequence has been seen.
    valid: bool,
}

/// What the select loop woke up for.
enum Event {
    Stop,
    NewClient(Option<BoxedTransport>),
    FromClient(Option<Message>),
    FromServer(Option<Message>),
    Tick,
}

/// The proxy daemon. Construct with [`Proxy::new`], then drive with
/// [`Proxy::run`].
pub struct Proxy {
    client_source: mpsc::Receiver<BoxedTransport>,
    connector: Box<dyn Connector>,
    logs: Box<dyn Store>,
    ping_interval: Duration,
    client_rate: Option<RateLimit>,

    client: Connection,
    server: Connection,
    welcome: WelcomeCache,

    stop_tx: mpsc::Sender<()>,
    stop_rx: mpsc::Receiver<()>,
}

impl Proxy {
    pub fn new(config: Config) -> Self {
        let (stop_tx, stop_rx) = mpsc::channel(1);
        Proxy {
            client_source: config.client_source,
            connector: config.connector,
            logs: config.store,
            ping_interval: config.ping_interval,
            client_rate: config.client_rate,
            client: Connection::empty(),
            server: Connection::empty(),
            welcome: WelcomeCache::default(),
            stop_tx,
            stop_rx,
        }
    }

    /// A handle that can stop this proxy from another task.
    pub fn stop_handle(&self) -> StopHandle {
        StopHandle {
            tx: self.stop_tx.clone(),
        }
    }

    /// Run the daemon. Returns when stopped, or when the client source
    /// closes.
    pub async fn run(mut self) {
        info!("proxy starting up");
        let mut ticker = interval_at(Instant::now() + self.ping_interval, self.ping_interval);

        loop {
            let event = {
                let client = &mut self.client;
                let server = &mut self.server;
                tokio::select! {
                    _ = self.stop_rx.recv() => Event::Stop,
                    conn = self.client_source.recv() => Event::NewClient(conn),
                    msg = client.next_message() => Event::FromClient(msg),
                    msg = server.next_message() => Event::FromServer(msg),
                    _ = ticker.tick() => Event::Tick,
                }
            };

            match event {
                Event::Stop => {
                    info!("proxy shutting down");
                    self.reset();
                    return;
                }
                Event::NewClient(None) => {
                    info!("client source closed; shutting down");
                    self.reset();
                    return;
                }
                Event::NewClient(Some(transport)) => self.accept_client(transport).await,
                Event::FromClient(msg) => {
                    self.client.refresh_deadlines(self.ping_interval);
                    self.handle_client_event(msg).await;
                }
                Event::FromServer(msg) => {
                    self.server.refresh_deadlines(self.ping_interval);
                    self.handle_server_event(msg).await;
                }
                Event::Tick => self.check_timeouts().await,
            }
        }
    }

    /// A client connected. Boot the old one, if any, and dial the server
    /// if we are not already connected to it.
    async fn accept_client(&mut self, transport: BoxedTransport) {
        debug!("got client connection");
        self.drop_client();
        self.client
            .attach(transport, self.client_rate, self.ping_interval);

        if self.server.is_closed() {
            debug!("connecting to server");
            match self.connector.connect().await {
                Ok(server_transport) => {
                    debug!("established connection to server");
                    self.server.attach(server_transport, None, self.ping_interval);
                }
                Err(e) => {
                    // Boot the client and let it deal with it.
                    warn!("server connection failed: {e}");
                    self.drop_client();
                }
            }
        }
    }

    /// Send a message to the server. A write failure resets both sides.
    async fn send_server(&mut self, msg: Message) -> Result<(), SendError> {
        debug!(msg = %msg, "sending to server");
        match self.server.send(msg.clone()).await {
            Ok(()) => {
                self.server.session.update_from_client(&msg);
                Ok(())
            }
            Err(SendError::Closed) => Err(SendError::Closed),
            Err(e) => {
                error!("server write failed: {e}");
                self.reset();
                Err(e)
            }
        }
    }

    /// Send a message to the client. A write failure drops the client.
    async fn send_client(&mut self, msg: Message) -> Result<(), SendError> {
        debug!(msg = %msg, "sending to client");
        match self.client.send(msg.clone()).await {
            Ok(()) => {
                self.client.session.update_from_server(&msg);
                Ok(())
            }
            Err(SendError::Closed) => Err(SendError::Closed),
            Err(e) => {
                error!("client write failed: {e}");
                self.drop_client();
                Err(e)
            }
        }
    }

    /// Handle an event from the client; `None` means it disconnected.
    async fn handle_client_event(&mut self, msg: Option<Message>) {
        let Some(msg) = msg else {
            debug!("client disconnected");
            self.drop_client();
            return;
        };
        debug!(msg = %msg, "client message");

        if let Some(reply) = validate(&msg) {
            let _ = self.send_client(reply).await;
            self.drop_client();
            return;
        }

        self.client.session.update_from_client(&msg);

        if !self.client.session.handshake.done() {
            self.handle_handshake_message(msg).await;
            return;
        }

        match msg.command.as_str() {
            "PING" => {
                let mut pong = msg;
                pong.prefix = None;
                pong.command = "PONG".into();
                let _ = self.send_client(pong).await;
            }
            "PONG" => {
                // Keepalive is centralized; stray PONGs already refreshed
                // the deadline on arrival.
            }
            "QUIT" => {
                debug!("client sent QUIT; disconnecting");
                self.drop_client();
            }
            "JOIN" => {
                let channel = msg.params[0].clone();
                if self.client.session.have_channel(&channel) {
                    // Some clients (e.g. Pidgin) repeat JOIN for channels
                    // they are already in; answering again duplicates
                    // their channel windows, so the message is swallowed.
                    info!(%channel, "client already in channel");
                } else if self.server.session.have_channel(&channel) {
                    info!(%channel, "rejoining channel");
                    self.rejoin_channel(&channel).await;
                } else {
                    let _ = self.send_server(msg).await;
                }
            }
            _ => {
                let _ = self.send_server(msg).await;
            }
        }
    }

    /// Handle a client message sent before the client-side handshake has
    /// finished.
    async fn handle_handshake_message(&mut self, msg: Message) {
        match msg.command.as_str() {
            "PASS" | "USER" | "NICK" => {
                if !self.server.session.handshake.done() {
                    // Client and server agree on the handshake state;
                    // pass the message through and let the server's
                    // replies advance both sides.
                    let _ = self.send_server(msg).await;
                    return;
                }

                if self.client.session.handshake.wants_welcome() {
                    // The server already believes we are logged in and
                    // will not repeat its welcome; forge it.
                    self.forge_welcome().await;
                }
            }
            _ => {
                // Nothing else is meaningful before registration.
            }
        }
    }

    /// Replay the cached welcome sequence to a reconnecting client, then
    /// prod the server for a fresh MOTD to finish the handshake.
    async fn forge_welcome(&mut self) {
        if !self.welcome.valid {
            // We never saw a real welcome, so there is nothing to forge
            // from. This should be impossible with a logged-in server.
            error!("no cached welcome on client reconnect; resetting");
            self.reset();
            return;
        }

        let nick = self.server.session.id.nick.clone();
        let prefix = Some(self.welcome.server_prefix.clone());
        let messages = [
            Message {
                prefix: prefix.clone(),
                command: replies::RPL_WELCOME.into(),
                params: vec![
                    nick.clone(),
                    format!("Welcome back to IRC Idler, {}", self.server.session.id),
                ],
            },
            Message {
                prefix: prefix.clone(),
                command: replies::RPL_YOURHOST.into(),
                params: vec![nick.clone(), self.welcome.yourhost.clone()],
            },
            Message {
                prefix: prefix.clone(),
                command: replies::RPL_CREATED.into(),
                params: vec![nick.clone(), self.welcome.created.clone()],
            },
            Message {
                prefix,
                command: replies::RPL_MYINFO.into(),
                params: std::iter::once(nick)
                    .chain(self.welcome.myinfo.iter().cloned())
                    .collect(),
            },
        ];
        for msg in messages {
            if self.send_client(msg).await.is_err() {
                return;
            }
        }

        self.client.session.id = self.server.session.id.clone();

        // Trigger a message-of-the-day response; once that completes the
        // client handshake is done.
        let _ = self.send_server(Message::new("MOTD", vec![])).await;
    }

    /// The client asked to join a channel the server already has us in:
    /// synthesize the join reply sequence from server-view state and
    /// replay the channel's backlog, without touching the server.
    async fn rejoin_channel(&mut self, channel: &str) {
        let join = Message {
            prefix: Some(self.client.session.id.to_string()),
            command: "JOIN".into(),
            params: vec![channel.to_owned()],
        };
        if self.send_client(join).await.is_err() {
            return;
        }

        let (topic, users) = match self.server.session.channel(channel) {
            Some(state) => {
                let mut users: Vec<String> = state.users.iter().cloned().collect();
                users.sort();
                (state.topic.clone(), users)
            }
            None => return,
        };

        let my_nick = self.server.session.id.nick.clone();
        let prefix = Some(self.welcome.server_prefix.clone());

        if !topic.is_empty() {
            let rpl_topic = Message {
                prefix: prefix.clone(),
                command: replies::RPL_TOPIC.into(),
                params: vec![my_nick.clone(), channel.to_owned(), topic],
            };
            if self.send_client(rpl_topic).await.is_err() {
                return;
            }
        }

        for nick in users {
            let namereply = Message {
                prefix: prefix.clone(),
                command: replies::RPL_NAMEREPLY.into(),
                // The "=" claims a public channel; the real privacy flag
                // is not tracked yet.
                params: vec![my_nick.clone(), "=".into(), channel.to_owned(), nick],
            };
            if self.send_client(namereply).await.is_err() {
                return;
            }
        }

        let end = Message {
            prefix,
            command: replies::RPL_ENDOFNAMES.into(),
            params: vec![my_nick, channel.to_owned(), "End of NAMES list".into()],
        };
        if self.send_client(end).await.is_ok() {
            self.replay_log(channel).await;
        }
    }

    /// Handle an event from the server; `None` means it disconnected.
    async fn handle_server_event(&mut self, msg: Option<Message>) {
        let Some(msg) = msg else {
            // Server disconnect. Boot the client and start all over.
            error!("server disconnected");
            self.reset();
            return;
        };

        if let Some(reply) = validate(&msg) {
            error!(msg = %msg, error = %reply, "invalid message from server; resetting");
            self.reset();
            return;
        }
        debug!(msg = %msg, "server message");

        self.server.session.update_from_server(&msg);

        match msg.command.as_str() {
            "PING" => {
                let mut pong = msg;
                pong.prefix = None;
                pong.command = "PONG".into();
                let _ = self.send_server(pong).await;
            }
            "PONG" => {}

            // Plain passthrough. The nick errors are the client's own
            // failures to deal with; forwarding is all that is needed.
            replies::RPL_MOTDSTART
            | replies::RPL_MOTD
            | replies::RPL_NAMEREPLY
            | replies::RPL_TOPIC
            | replies::ERR_NONICKNAMEGIVEN
            | replies::ERR_ERRONEUSNICKNAME
            | replies::ERR_NICKNAMEINUSE
            | replies::ERR_NICKCOLLISION => {
                let _ = self.send_client(msg).await;
            }

            replies::RPL_WELCOME => self.handle_welcome(msg).await,

            // Cached for replay on reconnect; the server will not send
            // them again while it thinks we are logged in.
            replies::RPL_YOURHOST => {
                self.welcome.yourhost = msg.params[1].clone();
                let _ = self.send_client(msg).await;
            }
            replies::RPL_CREATED => {
                self.welcome.created = msg.params[1].clone();
                let _ = self.send_client(msg).await;
            }
            replies::RPL_MYINFO => {
                self.welcome.myinfo = msg.params[1..].to_vec();
                let _ = self.send_client(msg).await;
                self.welcome.valid = true;
            }

            replies::RPL_ENDOFMOTD | replies::ERR_NOMOTD => {
                let _ = self.send_client(msg).await;
                // On a reconnect this is the point to deliver messages
                // that were addressed directly to us; on a first login
                // that log is empty anyway.
                let nick = self.client.session.id.nick.clone();
                self.replay_log(&nick).await;
            }

            replies::RPL_ENDOFNAMES => {
                let channel = msg.params[1].clone();
                let _ = self.send_client(msg).await;
                // Either we just joined the channel for the first time
                // this connection (replay any backlog), or the client
                // sent a NAMES request by hand (the log is empty, so the
                // replay is harmless).
                self.replay_log(&channel).await;
            }

            "PRIVMSG" | "NOTICE" => {
                let target = msg.params[0].clone();
                if self.client.session.have_channel(&target) || self.client.session.is_me(&target)
                {
                    if self.send_client(msg.clone()).await.is_err() {
                        self.log_message(&msg);
                    }
                } else {
                    self.log_message(&msg);
                }
            }

            "JOIN" | "KICK" | "PART" | "QUIT" | "NICK" => {
                if !self.client.session.handshake.done()
                    || self.send_client(msg.clone()).await.is_err()
                {
                    // Can't reach the client, so log it.
                    self.log_message(&msg);
                }
            }

            _ => {
                if self.send_client(msg.clone()).await.is_err() {
                    self.log_message(&msg);
                }
            }
        }
    }

    /// RPL_WELCOME: remember the server's prefix, pull our identity out
    /// of the welcome text, and mirror it into both views.
    async fn handle_welcome(&mut self, msg: Message) {
        self.welcome.server_prefix = msg.prefix.clone().unwrap_or_default();

        // The client id is not its own argument; it is the last
        // space-separated token of the welcome text.
        let text = &msg.params[1];
        let token = text.rsplit(' ').next().unwrap_or(text);
        match crate::irc::clientid::ClientId::parse(token) {
            Ok(id) => {
                self.server.session.id = id.clone();
                if self.send_client(msg).await.is_ok() {
                    self.client.session.id = id;
                }
            }
            Err(e) => {
                error!(token, error = %e, "server welcome carried an invalid client id; resetting");
                self.reset();
            }
        }
    }

    /// Send PINGs or drop connections whose deadlines have passed.
    async fn check_timeouts(&mut self) {
        let now = Instant::now();

        if !self.client.is_closed() {
            if self.client.ping_sent && now >= self.client.drop_deadline {
                info!("client PING timeout; dropping client");
                self.drop_client();
            } else if !self.client.ping_sent && now >= self.client.ping_deadline {
                let ping = Message::new("PING", vec![PING_TOKEN.into()]);
                if self.send_client(ping).await.is_ok() {
                    self.client.ping_sent = true;
                    self.client.drop_deadline = now + self.ping_interval;
                }
            }
        }

        if !self.server.is_closed() {
            if self.server.ping_sent && now >= self.server.drop_deadline {
                info!("server PING timeout; resetting");
                self.reset();
            } else if !self.server.ping_sent && now >= self.server.ping_deadline {
                let ping = Message::new("PING", vec![PING_TOKEN.into()]);
                if self.send_server(ping).await.is_ok() {
                    self.server.ping_sent = true;
                    self.server.drop_deadline = now + self.ping_interval;
                }
            }
        }
    }

    /// Disconnect the client. If the server-side handshake is not done,
    /// the half-built server session cannot be resumed later, so the
    /// server is disconnected too.
    fn drop_client(&mut self) {
        debug!("dropping client connection");
        self.client.shutdown();
        if !self.server.session.handshake.done() {
            debug!("handshake incomplete; dropping server connection");
            self.server.shutdown();
        }
    }

    /// Drop both connections.
    fn reset(&mut self) {
        debug!("dropping both connections");
        self.client.shutdown();
        self.server.shutdown();
    }

    /// Replay the message log for `channel` to the client, clearing it
    /// only once every message has been delivered.
    async fn replay_log(&mut self, channel: &str) {
        debug!(channel, "replaying log");
        let mut cursor = match self.logs.channel(channel).and_then(|log| log.replay()) {
            Ok(cursor) => cursor,
            Err(e) => {
                error!(channel, error = %e, "failed to open log for replay");
                return;
            }
        };

        loop {
            match cursor.get() {
                Ok(Some(msg)) => {
                    if self.send_client(msg).await.is_err() {
                        // Not cleared; the next replay delivers again.
                        return;
                    }
                }
                Ok(None) => {
                    debug!(channel, "done replaying log");
                    if let Ok(log) = self.logs.channel(channel) {
                        if let Err(e) = log.clear() {
                            error!(channel, error = %e, "failed to clear log");
                        }
                    }
                    return;
                }
                Err(e) => {
                    // Keep the log; duplicate delivery beats silent loss.
                    error!(channel, error = %e, "log replay failed; keeping log");
                    return;
                }
            }
            cursor.next();
        }
    }

    /// Log a message for later replay. Only channel-shaped traffic is
    /// logged; everything else is dropped.
    fn log_message(&mut self, msg: &Message) {
        match msg.command.as_str() {
            // QUIT carries no channel to file it under, so it is skipped;
            // a future revision could fan it out to every channel holding
            // the quitter.
            "QUIT" => return,
            "PRIVMSG" | "NOTICE" | "JOIN" | "KICK" | "PART" | "NICK" => {}
            _ => return,
        }

        let Some(channel) = msg.params.first().map(String::as_str) else {
            return;
        };
        match self.logs.channel(channel) {
            Ok(log) => {
                if let Err(e) = log.append(msg) {
                    error!(channel, error = %e, "failed to log message");
                }
            }
            Err(e) => {
                error!(channel, error = %e, "failed to open channel log");
            }
        }
    }
}
