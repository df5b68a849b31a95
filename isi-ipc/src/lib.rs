//! External interfaces (§6): a line-delimited JSON request/response
//! transport over stdio plus an asynchronous pub-event stream, and the
//! command dispatch that sits between them and the rest of the crates.

mod context;
mod handlers;
mod protocol;
mod transport;

pub use context::AppContext;
pub use handlers::dispatch;
pub use protocol::{PubEvent, Request, Response};
pub use transport::run_transport;

use isi_acquisition::AcquisitionError;
use isi_params::ParamsError;
use isi_session::SessionError;

/// Error kinds a handler can fail with, mapped onto `Response::err` by
/// the dispatcher. The kind itself isn't serialized; only the message
/// is. Kept distinct so callers (and tests) can match on the kind
/// without parsing the error string.
#[derive(Debug, thiserror::Error)]
pub enum IpcError {
    #[error("{0}")]
    Validation(String),
    #[error("{0}")]
    Precondition(String),
    #[error("{0}")]
    Hardware(String),
    #[error("{0}")]
    Timeout(String),
    #[error("unknown command: {0}")]
    UnknownCommand(String),
    #[error(transparent)]
    Params(#[from] ParamsError),
    #[error(transparent)]
    Acquisition(#[from] AcquisitionError),
    #[error(transparent)]
    Session(#[from] SessionError),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, IpcError>;
