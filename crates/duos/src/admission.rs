use duo_common::types::admission::{ACCEPTED, REJECTED};
use duo_common::Frame;

/// Outcome of the admission check for a freshly connected client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// Room left in the peer pool; the client may start authenticating.
    Accept,
    /// The peer pool is full; the client is told so and disconnected.
    Reject,
}

impl Admission {
    /// Frame announcing the decision to the client.
    #[must_use]
    pub fn frame(self) -> Frame {
        match self {
            Self::Accept => Frame::text(ACCEPTED),
            Self::Reject => Frame::text(REJECTED),
        }
    }

    /// Metrics label.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Accept => "accepted",
            Self::Reject => "rejected",
        }
    }
}

/// Decide whether a new connection may enter the watch set.
///
/// Only authenticated peers count against `capacity`; sockets still in the
/// authentication phase do not.
#[must_use]
pub const fn admit(authenticated: usize, capacity: usize) -> Admission {
    if authenticated < capacity {
        Admission::Accept
    } else {
        Admission::Reject
    }
}
