/// Message validation — the checks every message gets before dispatch.
use super::message::{Message, MAX_PARAMS};
use super::replies;

/// Minimum parameter count for commands where the proxy relies on a
/// parameter being present. Unknown commands have no minimum.
fn min_params(command: &str) -> usize {
    match command {
        "PASS" => 1,
        "NICK" => 1,
        "USER" => 4,
        "PRIVMSG" => 2,
        "NOTICE" => 2,
        "JOIN" => 1,
        replies::RPL_WELCOME => 2,
        replies::RPL_YOURHOST => 2,
        replies::RPL_CREATED => 2,
        replies::RPL_MYINFO => 5,
        replies::RPL_TOPIC => 3,
        replies::RPL_NAMEREPLY => 4,
        replies::RPL_ENDOFNAMES => 2,
        _ => 0,
    }
}

/// Validate `msg`: a command must be present, the parameter count must not
/// exceed the RFC limit of 15, and commands with a known minimum must
/// carry at least that many parameters.
///
/// Returns `None` for a valid message, or a reply error suitable for
/// sending back to the offending peer.
pub fn validate(msg: &Message) -> Option<Message> {
    if msg.command.is_empty() {
        return Some(Message::new(
            replies::ERR_UNKNOWNCOMMAND,
            vec!["Unknown command".into()],
        ));
    }
    if msg.params.len() > MAX_PARAMS {
        // ERR_UNKNOWNCOMMAND is a poor fit, but the RFC offers nothing
        // better for an over-long parameter list.
        return Some(Message::new(
            replies::ERR_UNKNOWNCOMMAND,
            vec!["Too many parameters (max 15)".into()],
        ));
    }
    if msg.params.len() < min_params(&msg.command) {
        return Some(Message::new(
            replies::ERR_NEEDMOREPARAMS,
            vec!["Not enough parameters".into()],
        ));
    }
    None
}
