use crate::cli::ConfigAction;
use anyhow::Result;
use console::{Term, style};
use dialoguer::Confirm;
use romfetch::config::ConfigManager;
use std::process;

pub async fn handle_config(config_manager: &mut ConfigManager, action: ConfigAction) -> Result<()> {
    let term = Term::stdout();

    match action {
        ConfigAction::Show => {
            let config_content = std::fs::read_to_string(config_manager.config_file())?;
            term.write_line(&format!(
                "{} Current configuration ({}):",
                style("⚙️").cyan(),
                config_manager.config_file().display()
            ))?;
            term.write_line("")?;
            term.write_line(&config_content)?;
        }

        ConfigAction::Path => {
            term.write_line(&config_manager.config_file().display().to_string())?;
        }

        ConfigAction::Validate => {
            term.write_line(&format!(
                "{} Validating configuration...",
                style("🔍").cyan()
            ))?;

            match config_manager.validate() {
                Ok(()) => {
                    term.write_line(&format!("{} Configuration is valid", style("✅").green()))?;
                }
                Err(e) => {
                    term.write_line(&format!(
                        "{} Configuration validation failed:",
                        style("❌").red()
                    ))?;
                    term.write_line(&format!("   {}", e))?;
                    process::exit(1);
                }
            }
        }

        ConfigAction::Reset { yes } => {
            if !yes {
                let confirmed = Confirm::new()
                    .with_prompt(format!(
                        "Reset {} to defaults?",
                        style(config_manager.config_file().display()).cyan()
                    ))
                    .default(false)
                    .interact()?;

                if !confirmed {
                    term.write_line(&format!("{} Operation cancelled", style("❌").red()))?;
                    return Ok(());
                }
            }

            config_manager.reset()?;
            term.write_line(&format!(
                "{} Configuration reset to defaults",
                style("✅").green()
            ))?;
        }

        ConfigAction::Sample { output, force } => {
            let sample_file = match output {
                Some(path) => {
                    if path.exists() && !force {
                        term.write_line(&format!(
                            "{} File already exists: {:?}",
                            style("❌").red(),
                            path
                        ))?;
                        term.write_line(&format!(
                            "{} Use --force to overwrite",
                            style("💡").yellow()
                        ))?;
                        process::exit(1);
                    }
                    ConfigManager::write_sample(&path)?;
                    path
                }
                None => config_manager.create_sample_config()?,
            };

            term.write_line(&format!(
                "{} Sample configuration created at: {:?}",
                style("✅").green(),
                sample_file
            ))?;
        }
    }
    Ok(())
}
