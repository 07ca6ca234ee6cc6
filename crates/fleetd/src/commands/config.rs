use std::path::Path;

use fleet_core::config::FleetConfig;

pub fn init(output: &Path, force: bool) -> anyhow::Result<()> {
    if output.exists() && !force {
        anyhow::bail!("{} already exists (pass --force to overwrite)", output.display());
    }
    let config = FleetConfig::scaffold("home");
    std::fs::write(output, config.to_toml_string()?)?;
    println!("✓ Generated {}", output.display());
    Ok(())
}

pub fn check(path: &Path) -> anyhow::Result<()> {
    let config = FleetConfig::from_file(path)?;
    let interval = config.tick_interval()?;
    println!(
        "✓ {} is valid: mode {:?}, tick every {:?}, budget {:.0}%, up to {} targets",
        path.display(),
        config.controller.mode,
        interval,
        config.controller.budget_fraction * 100.0,
        config.controller.max_targets,
    );
    Ok(())
}
