pub mod auth_code_service;
pub mod authorize_service;
pub mod client_service;
pub mod grant_service;
pub mod permission_service;
pub mod token_service;
pub mod user_service;
