//! `wardclaw config` — Configuration management commands.

use wardclaw_config::AppConfig;

use super::common;

pub async fn init() -> Result<(), common::CliError> {
    let path = AppConfig::config_dir().join("config.toml");
    if path.exists() {
        println!("  Config already exists at {}", path.display());
        return Ok(());
    }

    std::fs::create_dir_all(AppConfig::config_dir())?;
    std::fs::write(&path, AppConfig::default_toml())?;
    println!("  ✅ Wrote starter config to {}", path.display());
    println!("     Set an API key before the first run: WARDCLAW_API_KEY,");
    println!("     a provider-specific variable, or api_key in the file.");
    Ok(())
}

pub async fn show() -> Result<(), common::CliError> {
    let config = AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;

    // Keys never go to the terminal.
    let mut shown = config.clone();
    shown.api_key = shown.api_key.map(|_| "<redacted>".into());
    for provider in shown.providers.values_mut() {
        provider.api_key = provider.api_key.take().map(|_| "<redacted>".into());
    }

    if let Err(e) = config.validate() {
        println!("  ⚠️  {e}");
        println!();
    }
    print!("{}", toml::to_string_pretty(&shown)?);
    Ok(())
}

pub async fn path() -> Result<(), common::CliError> {
    println!("{}", AppConfig::config_dir().join("config.toml").display());
    Ok(())
}
