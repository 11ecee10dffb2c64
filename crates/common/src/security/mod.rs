//! Secret handling helpers.

mod fingerprint;
mod secure_string;

pub use fingerprint::fingerprint;
pub use secure_string::{constant_time_eq, SecureString};
