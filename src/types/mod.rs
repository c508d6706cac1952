pub mod ipam;
pub mod migration;
pub mod user;

pub use ipam::*;
pub use migration::*;
pub use user::*;
