//! Per-connection authentication state machine.
//!
//! ```text
//!                 "register"/"login"           username
//! ┌─────────────┐ ─────────────────> ┌───────────────┐ ──────> ┌───────────────┐
//! │ AwaitAction │                    │ AwaitUsername │         │ AwaitPassword │
//! └─────────────┘ <───────────────── └───────────────┘         └───────────────┘
//!    ^   │  other text: ignored                                   │        │
//!    │   └──┐                                                     │        │ login ok
//!    │      v                                                     │        v
//!    └── register (any result), login failed ────────────────────┘  ┌───────────────┐
//!                                                                    │ Authenticated │
//!                                                                    └───────────────┘
//! ```
//!
//! The session is pure bookkeeping: it consumes one frame at a time and
//! returns an [`Outcome`] that the hub turns into replies and peer-set
//! changes. It never performs I/O besides the credential store's own file
//! writes on registration.

use crate::credentials::CredentialStore;
use crate::error::DuosError;
use duo_common::types::auth_result::{FAILURE, SUCCESS};
use duo_common::{AuthAction, Frame};

/// Where a connection is in the authentication exchange.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Phase {
    /// Waiting for `"register"` or `"login"`.
    #[default]
    AwaitAction,
    /// Action received, waiting for the username.
    AwaitUsername(AuthAction),
    /// Waiting for the password.
    AwaitPassword {
        /// Chosen action.
        action: AuthAction,
        /// Username received in the previous frame.
        username: String,
    },
    /// Logged in; chat frames from now on.
    Authenticated(String),
}

/// Why a login attempt was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoginFailure {
    /// Unknown username or wrong password.
    BadCredentials,
    /// Credentials were valid but the peer pool is already full.
    PoolFull,
}

/// Result of feeding one frame to a [`Session`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// More frames are needed before anything is sent back.
    Pending,
    /// The action word was neither `register` nor `login`; nothing is sent.
    IgnoredAction,
    /// A new user was stored.
    Registered(String),
    /// The username is already taken.
    DuplicateUsername,
    /// Storing the new user failed; the client sees a plain failure.
    RegisterFailed,
    /// The connection is now an authenticated peer.
    LoggedIn(String),
    /// The login was refused.
    LoginRejected(LoginFailure),
}

impl Outcome {
    /// Result frame owed to the client, if any.
    #[must_use]
    pub fn reply(&self) -> Option<Frame> {
        match self {
            Self::Pending | Self::IgnoredAction => None,
            Self::Registered(_) | Self::LoggedIn(_) => Some(Frame::int(SUCCESS)),
            Self::DuplicateUsername | Self::RegisterFailed | Self::LoginRejected(_) => {
                Some(Frame::int(FAILURE))
            }
        }
    }

    /// `(action, result)` metrics labels for completed exchanges.
    #[must_use]
    pub const fn labels(&self) -> Option<(&'static str, &'static str)> {
        match self {
            Self::Pending | Self::IgnoredAction => None,
            Self::Registered(_) => Some(("register", "ok")),
            Self::DuplicateUsername => Some(("register", "duplicate")),
            Self::RegisterFailed => Some(("register", "store_error")),
            Self::LoggedIn(_) => Some(("login", "ok")),
            Self::LoginRejected(LoginFailure::BadCredentials) => Some(("login", "bad_credentials")),
            Self::LoginRejected(LoginFailure::PoolFull) => Some(("login", "pool_full")),
        }
    }
}

/// Authentication state of one connection.
#[derive(Debug, Clone, Default)]
pub struct Session {
    phase: Phase,
}

impl Session {
    /// A fresh, unauthenticated session.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Current phase.
    #[must_use]
    pub const fn phase(&self) -> &Phase {
        &self.phase
    }

    /// Returns `true` once login succeeded.
    #[must_use]
    pub const fn is_authenticated(&self) -> bool {
        matches!(self.phase, Phase::Authenticated(_))
    }

    /// Username of an authenticated session.
    #[must_use]
    pub fn username(&self) -> Option<&str> {
        match &self.phase {
            Phase::Authenticated(name) => Some(name),
            _ => None,
        }
    }

    /// Feed one frame received from the client.
    ///
    /// `pool_has_room` tells the session whether a successful login may
    /// join the peer set.
    ///
    /// # Errors
    ///
    /// Returns [`DuosError::Protocol`] if a username or password frame is not
    /// text, or if the session is already authenticated. The caller should
    /// drop the connection.
    pub fn step(
        &mut self,
        frame: Frame,
        store: &mut CredentialStore,
        pool_has_room: bool,
    ) -> Result<Outcome, DuosError> {
        let (next, outcome) = match std::mem::take(&mut self.phase) {
            Phase::AwaitAction => match frame.as_text().map(str::parse::<AuthAction>) {
                Some(Ok(action)) => (Phase::AwaitUsername(action), Outcome::Pending),
                _ => {
                    tracing::debug!(frame = %frame, "ignoring unknown auth action");
                    (Phase::AwaitAction, Outcome::IgnoredAction)
                }
            },
            Phase::AwaitUsername(action) => {
                let username = expect_text(frame, "username")?;
                (Phase::AwaitPassword { action, username }, Outcome::Pending)
            }
            Phase::AwaitPassword { action, username } => {
                let password = expect_text(frame, "password")?;
                match action {
                    AuthAction::Register => (
                        Phase::AwaitAction,
                        register(store, username, &password),
                    ),
                    AuthAction::Login => login(store, username, &password, pool_has_room),
                }
            }
            Phase::Authenticated(name) => {
                self.phase = Phase::Authenticated(name);
                return Err(DuosError::Protocol(
                    "session is already authenticated".to_string(),
                ));
            }
        };
        self.phase = next;
        Ok(outcome)
    }
}

fn expect_text(frame: Frame, what: &str) -> Result<String, DuosError> {
    match frame {
        Frame::Text(s) => Ok(s),
        Frame::Int(_) => Err(DuosError::Protocol(format!("expected {what} text frame"))),
    }
}

fn register(store: &mut CredentialStore, username: String, password: &str) -> Outcome {
    match store.register(&username, password) {
        Ok(true) => Outcome::Registered(username),
        Ok(false) => Outcome::DuplicateUsername,
        Err(e) => {
            tracing::error!(error = %e, "failed to persist credential table");
            Outcome::RegisterFailed
        }
    }
}

fn login(
    store: &CredentialStore,
    username: String,
    password: &str,
    pool_has_room: bool,
) -> (Phase, Outcome) {
    if !store.verify(&username, password) {
        return (
            Phase::AwaitAction,
            Outcome::LoginRejected(LoginFailure::BadCredentials),
        );
    }
    if !pool_has_room {
        return (
            Phase::AwaitAction,
            Outcome::LoginRejected(LoginFailure::PoolFull),
        );
    }
    (Phase::Authenticated(username.clone()), Outcome::LoggedIn(username))
}
