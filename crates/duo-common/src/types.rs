//! Protocol vocabulary shared by server and client.

use std::fmt;
use std::str::FromStr;

/// Host both binaries use when none is given.
pub const DEFAULT_HOST: &str = "localhost";

/// Admission words sent by the server right after the TLS handshake.
pub mod admission {
    /// The connection may start authenticating.
    pub const ACCEPTED: &str = "accepted";
    /// The peer pool is full; the server closes the connection.
    pub const REJECTED: &str = "rejected";
}

/// Integer results sent in reply to `register` and `login`.
pub mod auth_result {
    /// The action succeeded.
    pub const SUCCESS: i64 = 1;
    /// Duplicate username, bad credentials, or a full peer pool.
    pub const FAILURE: i64 = 0;
}

/// Authentication action chosen by the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AuthAction {
    /// Create a new credential record.
    Register,
    /// Authenticate against an existing record.
    Login,
}

impl AuthAction {
    /// Wire spelling of the action.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Register => "register",
            Self::Login => "login",
        }
    }
}

impl fmt::Display for AuthAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Returned when a string is neither `register` nor `login`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownAction;

impl FromStr for AuthAction {
    type Err = UnknownAction;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "register" => Ok(Self::Register),
            "login" => Ok(Self::Login),
            _ => Err(UnknownAction),
        }
    }
}

/// Chat line as delivered to the other peers: `"<username>> <text>"`.
#[must_use]
pub fn chat_line(username: &str, text: &str) -> String {
    format!("{username}> {text}")
}

/// Notice broadcast to the remaining peers when `username` leaves.
#[must_use]
pub fn departure_notice(username: &str) -> String {
    format!("(Now hung up: Client from {username})")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn action_parses_exact_words_only() {
        assert_eq!("register".parse(), Ok(AuthAction::Register));
        assert_eq!("login".parse(), Ok(AuthAction::Login));
        assert_eq!("Login".parse::<AuthAction>(), Err(UnknownAction));
        assert_eq!(" login".parse::<AuthAction>(), Err(UnknownAction));
        assert_eq!("".parse::<AuthAction>(), Err(UnknownAction));
    }

    #[test]
    fn action_display_matches_wire() {
        assert_eq!(AuthAction::Register.to_string(), "register");
        assert_eq!(AuthAction::Login.to_string(), "login");
    }

    #[test]
    fn chat_line_format() {
        assert_eq!(chat_line("alice", "hi"), "alice> hi");
    }

    #[test]
    fn departure_notice_names_user() {
        assert_eq!(
            departure_notice("bob"),
            "(Now hung up: Client from bob)"
        );
    }
}
