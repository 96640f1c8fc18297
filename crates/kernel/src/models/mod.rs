//! Domain models used by the request gate.

pub mod module;
pub mod role;
pub mod user;

pub use module::ModuleKey;
pub use role::Role;
pub use user::{AuthUser, UserRecord};
