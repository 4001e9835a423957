mod friends;
mod groups;
mod repository;

pub use repository::*;

/// SQL migration for the initial schema
pub const MIGRATION_001_INITIAL: &str = include_str!("migrations/001_initial.sql");

/// SQL migration for friend requests and friendships
pub const MIGRATION_002_FRIENDS: &str = include_str!("migrations/002_friends.sql");
