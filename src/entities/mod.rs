pub mod prelude;

pub mod api_keys;
pub mod minecraft_servers;
pub mod users;
