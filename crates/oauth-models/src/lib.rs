//! OAuth Models - Shared data structures for the authorization server
//!
//! This crate defines all core data models used throughout the server.
//! It serves as the single source of truth for data structure definitions.
//! Records are plain serde types; persistence mapping lives behind the
//! `Store` port in the core crate.

pub mod auth_code;
pub mod client;
pub mod permission;
pub mod token;
pub mod user;

// 重新导出常用类型
pub use auth_code::{AuthorizationCode, CodeChallengeMethod};
pub use client::{Client, ClientType};
pub use permission::{Permission, Resource, UserResourcePermission};
pub use token::{AccessToken, RefreshToken};
pub use user::User;
