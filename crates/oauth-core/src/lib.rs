//! OAuth 2.0 / OpenID Connect authorization server core.
//!
//! Credential lifecycle and authorization state machine: authorization-code
//! grant with PKCE, token minting/rotation/revocation/introspection,
//! client authentication (secret and `private_key_jwt`), and the
//! resource-permission evaluator. The HTTP framing, the relational driver
//! and the login/consent UI live outside; they talk to this crate through
//! the `AppState` handler contracts and the `Store` port.

// 库模块声明
pub mod cache;
pub mod config;
pub mod crypto;
pub mod error;
pub mod http;
pub mod services;
pub mod state;
pub mod store;
pub mod utils;

// 重新导出常用类型
pub use config::Config;
pub use error::{CryptoError, OAuthErrorCode, ServiceError, StoreError};
pub use state::AppState;
pub use store::{MemoryStore, Store};

pub use services::authorize_service::{AuthorizeOutcome, AuthorizeRequest, UserSession};
pub use services::grant_service::{
    IntrospectRequest, RevokeRequest, TokenRequest, TokenResponse,
};
pub use services::token_service::{Introspection, TokenPair};
