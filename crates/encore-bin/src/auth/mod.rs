//! Lifecycle commands.
//!
//! Each command returns the payload to print; none of them print credentials.

mod login;
mod session;

pub use login::{login, login_options};
pub use session::{adopt, logout, restore, restore_quietly, status};
