/// Per-endpoint session state — handshake progress, channel membership,
/// and the identity the peer knows us by.
///
/// The proxy keeps one of these for each side of the conversation: the
/// client view (what the client believes) and the server view (what the
/// server believes). The two drift apart whenever the client is away.
use std::collections::{HashMap, HashSet};

use crate::irc::clientid::ClientId;
use crate::irc::message::Message;
use crate::irc::replies;

/// State of the initial handshake:
///
/// 1. The client sends NICK and USER.
/// 2. The server does not reject the NICK (else the client must resend).
/// 3. The server sends the welcome sequence through the end of the MOTD.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Handshake {
    nick_sent: bool,
    user_sent: bool,
    motd_seen: bool,
}

impl Handshake {
    /// True once the full handshake has completed.
    pub fn done(&self) -> bool {
        self.nick_sent && self.user_sent && self.motd_seen
    }

    /// True when the client has done its part but (some of) the server's
    /// welcome sequence is still outstanding.
    pub fn wants_welcome(&self) -> bool {
        self.nick_sent && self.user_sent && !self.motd_seen
    }

    /// Advance the state for `msg` having just been transferred.
    ///
    /// Whether the message was sent or received does not matter: every
    /// message that drives the handshake is unambiguous on its own.
    /// Once the handshake is done, further updates are ignored.
    pub fn update(&mut self, msg: &Message) {
        if self.done() {
            return;
        }
        match msg.command.as_str() {
            "USER" => self.user_sent = true,
            "NICK" => self.nick_sent = true,
            replies::ERR_NONICKNAMEGIVEN
            | replies::ERR_ERRONEUSNICKNAME
            | replies::ERR_NICKNAMEINUSE
            | replies::ERR_NICKCOLLISION => {
                // The server rejected our NICK; another must be sent
                // before the handshake can finish.
                self.nick_sent = false;
            }
            replies::RPL_ENDOFMOTD | replies::ERR_NOMOTD => self.motd_seen = true,
            _ => {}
        }
    }
}

/// State of a single channel, as seen from one side.
#[derive(Debug, Clone, Default)]
pub struct ChannelState {
    /// The channel topic, if any.
    pub topic: String,
    /// Nicks present in the channel.
    pub users: HashSet<String>,
}

impl ChannelState {
    /// Update for a client-sent message. Intentionally a no-op: the
    /// client's membership changes only count once the server confirms
    /// them with its own JOIN/PART echoes.
    pub fn update_from_client(&mut self, _msg: &Message) {}

    /// Update for a server-sent message.
    pub fn update_from_server(&mut self, msg: &Message) {
        match msg.command.as_str() {
            "JOIN" => {
                if let Some(nick) = prefix_nick(msg) {
                    self.users.insert(nick);
                }
            }
            "PART" | "KICK" | "QUIT" => {
                if let Some(nick) = prefix_nick(msg) {
                    self.users.remove(&nick);
                }
            }
            "NICK" => {
                if let (Some(old), Some(new)) = (prefix_nick(msg), msg.params.first()) {
                    if self.users.remove(&old) {
                        self.users.insert(new.clone());
                    }
                }
            }
            replies::RPL_NAMEREPLY => {
                if let Some(names) = msg.params.get(3) {
                    for token in names.split(' ').filter(|t| !t.is_empty()) {
                        // Strip exactly one leading op/voice flag.
                        let nick = if token.starts_with('@') || token.starts_with('+') {
                            &token[1..]
                        } else {
                            token
                        };
                        if !nick.is_empty() {
                            self.users.insert(nick.to_owned());
                        }
                    }
                }
            }
            replies::RPL_TOPIC => {
                if let Some(topic) = msg.params.get(2) {
                    self.topic = topic.clone();
                }
            }
            "TOPIC" => {
                if let Some(topic) = msg.params.get(1) {
                    self.topic = topic.clone();
                }
            }
            _ => {}
        }
    }
}

/// Everything one side of the proxy believes about the connection.
#[derive(Debug, Default)]
pub struct Session {
    /// The identity this side knows us by.
    pub id: ClientId,
    /// Handshake progress on this side.
    pub handshake: Handshake,
    channels: HashMap<String, ChannelState>,
}

impl Session {
    pub fn new() -> Self {
        Self::default()
    }

    /// True if `prefix` identifies the user this session belongs to.
    pub fn is_me(&self, prefix: &str) -> bool {
        match ClientId::parse(prefix) {
            Ok(id) => !self.id.nick.is_empty() && id.nick == self.id.nick,
            Err(_) => false,
        }
    }

    /// True if this side believes we are in `name`.
    pub fn have_channel(&self, name: &str) -> bool {
        self.channels.contains_key(name)
    }

    /// The state for `name`, if this side believes we are in it.
    pub fn channel(&self, name: &str) -> Option<&ChannelState> {
        self.channels.get(name)
    }

    /// Update for a message the client sent.
    pub fn update_from_client(&mut self, msg: &Message) {
        self.handshake.update(msg);
    }

    /// Update for a message the server sent.
    pub fn update_from_server(&mut self, msg: &Message) {
        self.handshake.update(msg);

        match msg.command.as_str() {
            // A JOIN is the only message that brings a channel into
            // existence on this side; everything else only touches
            // channels we already track, so stray replies for unknown
            // channels fall away harmlessly.
            "JOIN" => {
                if let Some(name) = msg.params.first() {
                    self.channels
                        .entry(name.clone())
                        .or_default()
                        .update_from_server(msg);
                }
            }
            "PART" | "KICK" => {
                if let Some(state) = msg.params.first().and_then(|n| self.channels.get_mut(n)) {
                    state.update_from_server(msg);
                }
            }
            "TOPIC" => {
                if let Some(state) = msg.params.first().and_then(|n| self.channels.get_mut(n)) {
                    state.update_from_server(msg);
                }
            }
            replies::RPL_TOPIC => {
                if let Some(state) = msg.params.get(1).and_then(|n| self.channels.get_mut(n)) {
                    state.update_from_server(msg);
                }
            }
            replies::RPL_NAMEREPLY => {
                if let Some(state) = msg.params.get(2).and_then(|n| self.channels.get_mut(n)) {
                    state.update_from_server(msg);
                }
            }
            // QUIT and NICK carry no channel; they touch every channel
            // the quitter or renamer is in.
            "QUIT" | "NICK" => {
                for state in self.channels.values_mut() {
                    state.update_from_server(msg);
                }
            }
            _ => {}
        }

        // Messages about us move whole channels, or our own identity.
        if let Some(prefix) = msg.prefix.as_deref() {
            if self.is_me(prefix) {
                match msg.command.as_str() {
                    "KICK" | "PART" => {
                        // We left a channel.
                        if let Some(name) = msg.params.first() {
                            self.channels.remove(name);
                        }
                    }
                    "NICK" => {
                        // We changed our nick.
                        if let Some(nick) = msg.params.first() {
                            self.id.nick = nick.clone();
                        }
                    }
                    _ => {}
                }
            }
        }
    }
}

/// The nick out of a message's prefix, if the prefix parses.
fn prefix_nick(msg: &Message) -> Option<String> {
    let prefix = msg.prefix.as_deref()?;
    ClientId::parse(prefix).ok().map(|id| id.nick)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn msg(prefix: Option<&str>, command: &str, params: &[&str]) -> Message {
        Message {
            prefix: prefix.map(str::to_owned),
            command: command.to_owned(),
            params: params.iter().map(|p| (*p).to_owned()).collect(),
        }
    }

    // ── Handshake ────────────────────────────────────────────────

    #[test]
    fn handshake_completes_after_nick_user_motd() {
        let mut hs = Handshake::default();
        assert!(!hs.done());

        hs.update(&msg(None, "NICK", &["alice"]));
        hs.update(&msg(None, "USER", &["alice", "0", "*", "Alice"]));
        assert!(!hs.done());
        assert!(hs.wants_welcome());

        hs.update(&msg(None, replies::RPL_ENDOFMOTD, &[]));
        assert!(hs.done());
        assert!(!hs.wants_welcome());
    }

    #[test]
    fn handshake_accepts_missing_motd_reply() {
        let mut hs = Handshake::default();
        hs.update(&msg(None, "NICK", &["alice"]));
        hs.update(&msg(None, "USER", &["alice", "0", "*", "Alice"]));
        hs.update(&msg(None, replies::ERR_NOMOTD, &[]));
        assert!(hs.done());
    }

    #[test]
    fn nick_rejection_clears_nick() {
        let mut hs = Handshake::default();
        hs.update(&msg(None, "NICK", &["alice"]));
        hs.update(&msg(None, "USER", &["alice", "0", "*", "Alice"]));
        hs.update(&msg(None, replies::ERR_NICKNAMEINUSE, &[]));
        assert!(!hs.wants_welcome());

        // Sending another NICK recovers.
        hs.update(&msg(None, "NICK", &["alice2"]));
        assert!(hs.wants_welcome());
    }

    #[test]
    fn done_handshake_ignores_updates() {
        let mut hs = Handshake::default();
        hs.update(&msg(None, "NICK", &["alice"]));
        hs.update(&msg(None, "USER", &["alice", "0", "*", "Alice"]));
        hs.update(&msg(None, replies::RPL_ENDOFMOTD, &[]));

        // A nick error after completion must not regress the state.
        hs.update(&msg(None, replies::ERR_NICKNAMEINUSE, &[]));
        assert!(hs.done());
    }

    // ── ChannelState ─────────────────────────────────────────────

    #[test]
    fn join_and_part_update_users() {
        let mut ch = ChannelState::default();
        ch.update_from_server(&msg(Some("bob!b@example.com"), "JOIN", &["#sandstorm"]));
        assert!(ch.users.contains("bob"));

        ch.update_from_server(&msg(Some("bob!b@example.com"), "PART", &["#sandstorm"]));
        assert!(!ch.users.contains("bob"));
    }

    #[test]
    fn namereply_strips_one_flag() {
        let mut ch = ChannelState::default();
        ch.update_from_server(&msg(
            Some("irc.example.net"),
            replies::RPL_NAMEREPLY,
            &["alice", "=", "#sandstorm", "@oper +voiced plain"],
        ));
        let want: HashSet<String> = ["oper", "voiced", "plain"]
            .into_iter()
            .map(str::to_owned)
            .collect();
        assert_eq!(ch.users, want);
    }

    #[test]
    fn nick_renames_known_user() {
        let mut ch = ChannelState::default();
        ch.update_from_server(&msg(Some("bob"), "JOIN", &["#sandstorm"]));
        ch.update_from_server(&msg(Some("bob"), "NICK", &["robert"]));
        assert!(ch.users.contains("robert"));
        assert!(!ch.users.contains("bob"));
    }

    #[test]
    fn nick_for_unknown_user_is_ignored() {
        let mut ch = ChannelState::default();
        ch.update_from_server(&msg(Some("stranger"), "NICK", &["other"]));
        assert!(ch.users.is_empty());
    }

    #[test]
    fn topic_reply_sets_topic() {
        let mut ch = ChannelState::default();
        ch.update_from_server(&msg(
            Some("irc.example.net"),
            replies::RPL_TOPIC,
            &["alice", "#sandstorm", "dust everywhere"],
        ));
        assert_eq!(ch.topic, "dust everywhere");
    }

    #[test]
    fn client_updates_do_not_change_membership() {
        let mut ch = ChannelState::default();
        ch.update_from_client(&msg(None, "JOIN", &["#sandstorm"]));
        assert!(ch.users.is_empty());
    }

    // ── Session ──────────────────────────────────────────────────

    fn session_as(nick: &str) -> Session {
        Session {
            id: ClientId::from_nick(nick),
            ..Session::default()
        }
    }

    #[test]
    fn join_creates_channel() {
        let mut s = session_as("alice");
        s.update_from_server(&msg(Some("alice"), "JOIN", &["#sandstorm"]));
        assert!(s.have_channel("#sandstorm"));
        assert!(s.channel("#sandstorm").unwrap().users.contains("alice"));
    }

    #[test]
    fn stray_replies_do_not_create_channels() {
        let mut s = session_as("alice");
        s.update_from_server(&msg(
            Some("irc.example.net"),
            replies::RPL_TOPIC,
            &["alice", "#unexpected", "surprise"],
        ));
        s.update_from_server(&msg(
            Some("irc.example.net"),
            replies::RPL_NAMEREPLY,
            &["alice", "=", "#unexpected", "ghost"],
        ));
        assert!(!s.have_channel("#unexpected"));
    }

    #[test]
    fn our_part_removes_the_channel() {
        let mut s = session_as("alice");
        s.update_from_server(&msg(Some("alice"), "JOIN", &["#sandstorm"]));
        s.update_from_server(&msg(Some("alice"), "PART", &["#sandstorm"]));
        assert!(!s.have_channel("#sandstorm"));
    }

    #[test]
    fn someone_elses_part_keeps_the_channel() {
        let mut s = session_as("alice");
        s.update_from_server(&msg(Some("alice"), "JOIN", &["#sandstorm"]));
        s.update_from_server(&msg(Some("bob"), "JOIN", &["#sandstorm"]));
        s.update_from_server(&msg(Some("bob"), "PART", &["#sandstorm"]));
        assert!(s.have_channel("#sandstorm"));
        assert!(!s.channel("#sandstorm").unwrap().users.contains("bob"));
    }

    #[test]
    fn quit_removes_user_from_every_channel() {
        let mut s = session_as("alice");
        s.update_from_server(&msg(Some("alice"), "JOIN", &["#one"]));
        s.update_from_server(&msg(Some("bob"), "JOIN", &["#one"]));
        s.update_from_server(&msg(Some("alice"), "JOIN", &["#two"]));
        s.update_from_server(&msg(Some("bob"), "JOIN", &["#two"]));

        s.update_from_server(&msg(Some("bob"), "QUIT", &["gone fishing"]));
        assert!(!s.channel("#one").unwrap().users.contains("bob"));
        assert!(!s.channel("#two").unwrap().users.contains("bob"));
    }

    #[test]
    fn our_nick_change_renames_the_session() {
        let mut s = session_as("alice");
        s.update_from_server(&msg(Some("alice"), "JOIN", &["#sandstorm"]));
        s.update_from_server(&msg(Some("alice"), "NICK", &["eve"]));

        assert_eq!(s.id.nick, "eve");
        assert!(s.channel("#sandstorm").unwrap().users.contains("eve"));
        assert!(!s.channel("#sandstorm").unwrap().users.contains("alice"));
    }

    #[test]
    fn is_me_matches_on_nick_only() {
        let s = session_as("alice");
        assert!(s.is_me("alice"));
        assert!(s.is_me("alice!ada@example.com"));
        assert!(!s.is_me("bob"));
        assert!(!s.is_me(""));
    }

    #[test]
    fn empty_session_matches_nobody() {
        let s = Session::new();
        assert!(!s.is_me("alice"));
    }
}
