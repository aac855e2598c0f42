mod attendance;
mod gym_api;
pub mod utils;

pub use utils::{test_client, test_db};
