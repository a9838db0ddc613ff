pub use super::api_keys::Entity as ApiKeys;
pub use super::minecraft_servers::Entity as MinecraftServers;
pub use super::users::Entity as Users;
