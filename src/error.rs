use jsonwebtoken::errors::{Error as JwtError, ErrorKind as JwtErrorKind};
use rocket::{
    http::{ContentType, Status},
    response::{self, Responder},
    Request, Response,
};
use std::io::Cursor;
use thiserror::Error;

use crate::logging::RequestId;
use crate::model::{ledger::StorageError, roster::RosterError};

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error(transparent)]
    Roster(#[from] RosterError),
    #[error(transparent)]
    Jwt(#[from] JwtError),
    #[error("Invalid input: {0}")]
    Validation(String),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("{1}")]
    Status(Status, String),
}

impl Error {
    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }

    /// The HTTP status this error is reported with.
    pub fn status(&self) -> Status {
        match self {
            Self::Storage(_) => Status::InternalServerError,
            Self::Roster(e) if e.is_malformed() => Status::BadRequest,
            Self::Roster(_) => Status::InternalServerError,
            Self::Jwt(err) => match err.kind() {
                JwtErrorKind::ExpiredSignature | JwtErrorKind::ImmatureSignature => {
                    Status::Unauthorized
                }
                _ => Status::BadRequest,
            },
            Self::Validation(_) => Status::UnprocessableEntity,
            Self::NotFound(_) => Status::NotFound,
            Self::Status(status, _) => *status,
        }
    }
}

impl<'r, 'o: 'r> Responder<'r, 'o> for Error {
    fn respond_to(self, req: &'r Request<'_>) -> response::Result<'o> {
        let status = self.status();
        let id = RequestId::of(req);
        // Internal details stay in the log.
        let body = if status.code >= 500 {
            error!("{id} {status}: {self}");
            status.reason_lossy().to_string()
        } else {
            warn!("{id} {status}: {self}");
            self.to_string()
        };
        Response::build()
            .status(status)
            .header(ContentType::Plain)
            .sized_body(body.len(), Cursor::new(body))
            .ok()
    }
}
