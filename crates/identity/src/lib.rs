//! Identity provider and machine directory clients.
//!
//! Async HTTP clients using `reqwest`: [`AuthSession`] exchanges operator
//! credentials for a bearer token, [`MachineDirectory`] lists the devices
//! that token may observe.

pub mod auth;
pub mod directory;

pub use auth::{AuthError, AuthSession, CredentialPrompt, Credentials, TokenResponse, authenticate};
pub use directory::{DirectoryError, MachineDirectory};
