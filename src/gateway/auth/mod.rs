//! Authentication strategies for SSH connections.
//!
//! The gateway only holds a username and a secret per target, so the chain
//! used for every dial is password authentication followed by
//! keyboard-interactive answered with the same secret.
//!
//! # Available Strategies
//!
//! - [`PasswordAuth`]: Password-based authentication
//! - [`KeyboardInteractiveAuth`]: Keyboard-interactive with the secret

mod chain;
mod keyboard;
mod password;
mod traits;

pub use chain::AuthChain;
pub use keyboard::KeyboardInteractiveAuth;
pub use password::PasswordAuth;
pub use traits::AuthStrategy;
