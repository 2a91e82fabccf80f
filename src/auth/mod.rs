pub mod credentials;
pub(crate) mod extractors;

pub use credentials::{AuthError, CredentialProvider, JwtCredentials};
pub use extractors::AuthUser;
