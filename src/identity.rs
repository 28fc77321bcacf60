mod actor;
mod claims;
mod context;
mod role;

pub use actor::Actor;
pub use claims::TokenClaims;
pub use context::IdentityContext;
pub use role::{DeviceScope, Role, RoleSet};
