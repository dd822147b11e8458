use std::fmt::Display;

use serde_repr::{Deserialize_repr, Serialize_repr};

/// A role a session can be held in.
pub trait User {
    /// The rights of this user type.
    const RIGHTS: Rights;
}

/// Privilege level, stored in the token as a number.
#[derive(Debug, PartialEq, Eq, Clone, Copy, Serialize_repr, Deserialize_repr)]
#[repr(u8)]
pub enum Rights {
    Voter = 0,
    Admin = 1,
}

impl Display for Rights {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Voter => "voter",
            Self::Admin => "admin",
        })
    }
}

/// A voter on the current roster.
#[derive(Debug, Clone, Copy)]
pub struct Voter;

/// The election administrator.
#[derive(Debug, Clone, Copy)]
pub struct Admin;

impl User for Voter {
    const RIGHTS: Rights = Rights::Voter;
}

impl User for Admin {
    const RIGHTS: Rights = Rights::Admin;
}
