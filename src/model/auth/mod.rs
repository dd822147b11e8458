mod credentials;
mod token;
mod user;

pub use credentials::{AdminCredentials, VoterCredentials};
pub use token::{AuthToken, AUTH_TOKEN_COOKIE};
pub use user::{Admin, Rights, User, Voter};
