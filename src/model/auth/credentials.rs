use serde::{Deserialize, Serialize};

/// Raw voter login, as typed into the ballot form.
#[derive(Clone, Deserialize, Serialize)]
pub struct VoterCredentials {
    pub email: String,
    pub secret: String,
}

/// Raw administrator login. Compared against the configured pair, never stored.
#[derive(Clone, Deserialize, Serialize)]
pub struct AdminCredentials {
    pub email: String,
    pub password: String,
}
