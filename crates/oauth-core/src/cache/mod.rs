//! Caching layer for permission decisions.
//!
//! The authorization hot path resolves `(user, resource, action)` on every
//! protected request; this module keeps recent decisions in a bounded,
//! TTL'd in-memory cache. Coherency with permission writes uses the store's
//! generation counter rather than a change feed; see
//! `Store::permission_generation`.

pub mod permission_cache;

pub use permission_cache::{CacheStats, PermissionCache, PermissionCacheKey};
