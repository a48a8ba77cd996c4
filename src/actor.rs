//! Who is acting, and how other users are presented to them.

use serde::{Deserialize, Serialize};

use crate::entity::user::{self, Role};

/// The authenticated caller of an operation: a user id and the role the
/// session was established with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Actor {
    pub id: i32,
    pub role: Role,
}

impl Actor {
    pub fn new(id: i32, role: Role) -> Self {
        Self { id, role }
    }

    pub fn is_admin(&self) -> bool {
        matches!(self.role, Role::Admin)
    }
}

impl From<&user::Model> for Actor {
    fn from(user: &user::Model) -> Self {
        Self::new(user.id, user.role)
    }
}

/// A user as shown on a message, in a mailbox listing or in the audit log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Participant {
    pub user_id: i32,
    pub username: String,
    pub display_name: String,
    pub role: Role,
}

impl From<user::Model> for Participant {
    fn from(user: user::Model) -> Self {
        Self {
            user_id: user.id,
            username: user.username,
            display_name: user.display_name,
            role: user.role,
        }
    }
}
