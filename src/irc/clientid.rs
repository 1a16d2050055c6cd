/// Client identifiers — the `nick[!user]@host` form carried in message
/// prefixes (RFC 2812 §2.3.1) and in the tail of RPL_WELCOME.
use std::fmt;

/// A parsed client identifier.
///
/// `user` and `host` are optional; a present `user` implies a present
/// `host`, which the parser guarantees by construction.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClientId {
    pub nick: String,
    pub user: Option<String>,
    pub host: Option<String>,
}

/// Errors that can occur while parsing a client identifier.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ClientIdError {
    #[error("no nick in client id")]
    NoNick,
    #[error("more than one '@' in client id")]
    MultipleAt,
    #[error("more than one '!' in client id")]
    MultipleBang,
}

impl ClientId {
    /// A bare-nick identifier.
    pub fn from_nick(nick: impl Into<String>) -> Self {
        ClientId {
            nick: nick.into(),
            user: None,
            host: None,
        }
    }

    /// Parse `nick`, `nick@host`, or `nick!user@host`.
    ///
    /// A `!` without a following `@host` is not split; the whole text is
    /// taken as the nick, mirroring how servers treat such prefixes.
    pub fn parse(text: &str) -> Result<Self, ClientIdError> {
        let (nick_user, host) = match text.split_once('@') {
            None => (text, None),
            Some((nick_user, host)) => {
                if host.contains('@') {
                    return Err(ClientIdError::MultipleAt);
                }
                (nick_user, Some(host))
            }
        };

        let (nick, user) = match host {
            None => (nick_user, None),
            Some(_) => match nick_user.split_once('!') {
                None => (nick_user, None),
                Some((nick, user)) => {
                    if user.contains('!') {
                        return Err(ClientIdError::MultipleBang);
                    }
                    (nick, Some(user))
                }
            },
        };

        if nick.is_empty() {
            return Err(ClientIdError::NoNick);
        }

        Ok(ClientId {
            nick: nick.to_owned(),
            user: user.map(str::to_owned),
            host: host.map(str::to_owned),
        })
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.nick)?;
        // Without a host there is nowhere to hang a user part.
        if let Some(ref host) = self.host {
            if let Some(ref user) = self.user {
                write!(f, "!{user}")?;
            }
            write!(f, "@{host}")?;
        }
        Ok(())
    }
}
