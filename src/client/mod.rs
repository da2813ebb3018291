//! API client with transparent session renewal.

mod error;
mod model;
mod session;
mod storage;
mod transport;

pub use error::{ApiFailure, ClientError, RefreshError, TransportError};
pub use model::{Post, Session, User, normalize, normalize_user};
pub use session::{
    DEFAULT_TIMEOUT, Navigator, NoopNavigator, SessionConfig, SessionManager,
    SessionManagerBuilder, token_expiry,
};
pub use storage::{FileStorage, MemoryStorage, StoredTokens, TokenStorage};
pub use transport::{ApiRequest, ApiResponse, Method, ReqwestTransport, Transport};
