pub mod attendance;
pub mod classes;
pub mod gyms;
pub mod sessions;
pub mod users;
pub mod waivers;

pub use attendance::*;
pub use classes::*;
pub use gyms::*;
pub use sessions::*;
pub use users::*;
pub use waivers::*;

#[cfg(not(test))]
pub(crate) const BCRYPT_COST: u32 = bcrypt::DEFAULT_COST;
#[cfg(test)]
pub(crate) const BCRYPT_COST: u32 = 4;
