//! The authenticated customer.

use hearth_core::{Email, UserId};

use crate::config::SessionConfig;

/// Identity of a signed-in customer.
///
/// Holding a `Customer` is what makes the cart server-authoritative; the
/// bearer token itself stays inside the API client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Customer {
    pub id: UserId,
    pub email: Option<Email>,
}

impl Customer {
    #[must_use]
    pub const fn new(id: UserId, email: Option<Email>) -> Self {
        Self { id, email }
    }
}

impl From<&SessionConfig> for Customer {
    fn from(session: &SessionConfig) -> Self {
        Self {
            id: session.user_id,
            email: session.email.clone(),
        }
    }
}
