use ferry_core::config::{self, FerryConfig};
use miette::{IntoDiagnostic, Result};
use owo_colors::OwoColorize;
use std::path::Path;

use crate::output::Output;

/// Show the effective configuration
pub async fn show(config: &FerryConfig, output: &Output) -> Result<()> {
    output.section("Current Configuration");
    output.print("");

    let toml_str = toml::to_string_pretty(config).into_diagnostic()?;
    for line in toml_str.lines() {
        output.print(line);
    }

    Ok(())
}

/// Write the default configuration to `path`
pub async fn init(path: &Path, force: bool, output: &Output) -> Result<()> {
    if !force && tokio::fs::try_exists(path).await.into_diagnostic()? {
        return Err(miette::miette!(
            help = "Pass --force to overwrite it",
            "{} already exists",
            path.display()
        ));
    }

    config::save_config(&FerryConfig::default(), path).await?;

    output.success(&format!("Wrote {}", path.display()));
    output.status("To use this configuration, run:");
    output.status(&format!(
        "{} --config {} export",
        "ferry".bright_green(),
        path.display()
    ));

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn test_init_writes_defaults_once() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ferry.toml");
        let output = Output::new();

        init(&path, false, &output).await.unwrap();
        let loaded = config::load_config(&path).await.unwrap();
        assert_eq!(loaded.export.batch_size, FerryConfig::default().export.batch_size);
        assert_eq!(loaded.repository.path, dir.path().join("repository.json"));

        assert!(init(&path, false, &output).await.is_err());
        init(&path, true, &output).await.unwrap();
    }
}
