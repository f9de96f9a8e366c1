//! Authentication: password hashing, the OAuth handshake, and signed sessions.

pub mod constant_time;
pub mod cookies;
pub mod oauth;
pub mod password;
pub mod session;

pub use cookies::{CookieSettings, HandshakeCookies, SESSION_COOKIE};
pub use password::CredentialHasher;
pub use session::{AuthSession, IssuedSession, MaybeSession, SessionManager};
