use crate::config::Config;

pub fn cmd_init() -> anyhow::Result<()> {
    if Config::create_default_if_missing()? {
        println!("✓ Config file created.");
        println!("  Set security.jwt_secret in config.toml, then run `blockyard serve`.");
    } else {
        println!("config.toml already exists, leaving it untouched.");
    }
    Ok(())
}
