mod create_user;
mod init;

pub use create_user::cmd_create_user;
pub use init::cmd_init;
