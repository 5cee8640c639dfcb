//! Validate command.

use anyhow::Result;
use charmforge_config::manifest::load_bundle_list;
use charmforge_config::run::load_run_config;
use charmforge_config::CharmEnv;
use charmforge_pipeline::{CharmInputs, LayerResolver};
use std::path::Path;
use std::process::ExitCode;

/// Load the configuration and every manifest it names, reporting what a
/// build would select.
pub fn run(config_path: &Path) -> Result<ExitCode> {
    match check(config_path) {
        Ok(lines) => {
            for line in lines {
                println!("{}", line);
            }
            println!("Configuration is valid");
            Ok(ExitCode::SUCCESS)
        }
        Err(e) => {
            println!("Configuration error: {}", e);
            Ok(ExitCode::FAILURE)
        }
    }
}

fn check(config_path: &Path) -> std::result::Result<Vec<String>, String> {
    let config = load_run_config(config_path).map_err(|e| e.to_string())?;
    let mut lines = Vec::new();

    if let Some(charms) = &config.charms {
        let inputs = CharmInputs::load(charms).map_err(|e| e.to_string())?;
        let selected = inputs
            .charms
            .iter()
            .filter(|c| charms.filter.matches(&c.tags))
            .count();
        lines.push(format!(
            "charms: {} listed, {} selected by '{}'",
            inputs.charms.len(),
            selected,
            charms.filter
        ));
        if charms.layers.is_some() {
            let layers = LayerResolver::parse(&inputs.layers).map_err(|e| e.to_string())?;
            lines.push(format!("layers: {}", layers.len()));
        }
    }

    if let Some(bundles) = &config.bundles {
        let listed = load_bundle_list(&bundles.list).map_err(|e| e.to_string())?;
        let selected = listed
            .iter()
            .filter(|b| bundles.filter.matches(&b.tags))
            .count();
        lines.push(format!(
            "bundles: {} listed, {} selected by '{}'",
            listed.len(),
            selected,
            bundles.filter
        ));
    }

    if let Err(e) = CharmEnv::from_env() {
        lines.push(format!("warning: {}", e));
    }
    Ok(lines)
}
