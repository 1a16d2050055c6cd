/// Numeric reply codes from RFC 2812, restricted to the ones the proxy
/// actually inspects or synthesizes.
pub type Reply = &'static str;

pub const RPL_WELCOME: Reply = "001"; // :Welcome message, ends with the client id
pub const RPL_YOURHOST: Reply = "002"; // :Your host is...
pub const RPL_CREATED: Reply = "003"; // :This server was created...
pub const RPL_MYINFO: Reply = "004"; // <servername> <version> <umodes> <chanmodes>

pub const RPL_TOPIC: Reply = "332"; // <channel> :<topic>
pub const RPL_NAMEREPLY: Reply = "353"; // <=/*/@> <channel> :1*(@/ /+nick)
pub const RPL_ENDOFNAMES: Reply = "366"; // <channel> :End of NAMES list

pub const RPL_MOTD: Reply = "372"; // :- <text>
pub const RPL_MOTDSTART: Reply = "375"; // :- <server> Message of the day -
pub const RPL_ENDOFMOTD: Reply = "376"; // :End of MOTD command

pub const ERR_NOMOTD: Reply = "422"; // :MOTD file is missing
pub const ERR_UNKNOWNCOMMAND: Reply = "421"; // <command> :Unknown command
pub const ERR_NONICKNAMEGIVEN: Reply = "431"; // :No nickname given
pub const ERR_ERRONEUSNICKNAME: Reply = "432"; // <nick> :Erroneous nickname
pub const ERR_NICKNAMEINUSE: Reply = "433"; // <nick> :Nickname is already in use
pub const ERR_NICKCOLLISION: Reply = "436"; // <nick> :Nickname collision
pub const ERR_NEEDMOREPARAMS: Reply = "461"; // <command> :Not enough parameters
