pub mod api_keys;
pub mod authority;

pub use authority::{Authority, Authorization, ClientContext, IdentityProof, SessionAuthority};
