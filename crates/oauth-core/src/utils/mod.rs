pub mod pkce;
pub mod validation;
