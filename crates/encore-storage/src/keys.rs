//! Storage key constants.

/// Storage keys for the persisted session record.
pub struct StorageKeys;

impl StorageKeys {
    /// Session key issued by the token exchange.
    pub const SESSION_KEY: &'static str = "session_key";

    /// Display name of the authenticated user.
    pub const DISPLAY_NAME: &'static str = "display_name";

    /// Every key that makes up one session record.
    pub const SESSION_RECORD: [&'static str; 2] = [Self::SESSION_KEY, Self::DISPLAY_NAME];
}
