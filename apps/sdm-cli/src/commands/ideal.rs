// ideal.rs — Ideal subcommands: show, set.

use clap::Subcommand;
use sdm_feature::FingerprintRecord;

use crate::machine::Sdm;

#[derive(Subcommand)]
pub enum IdealCommands {
    /// Show the stored ideal for a feature.
    Show {
        /// Feature name (e.g., "license-header").
        feature: String,
    },
    /// Overwrite the ideal for a feature.
    Set {
        /// Feature name.
        feature: String,
        /// Fingerprint data as JSON (e.g., '{"text":"Apache-2.0"}').
        #[arg(long)]
        data: String,
    },
}

pub fn execute(cmd: &IdealCommands, sdm: &Sdm) -> anyhow::Result<()> {
    match cmd {
        IdealCommands::Show { feature } => show_ideal(sdm, feature),
        IdealCommands::Set { feature, data } => {
            let record = set_ideal(sdm, feature, data)?;
            println!("Ideal for {} set to {}", feature, record.sha);
            Ok(())
        }
    }
}

fn show_ideal(sdm: &Sdm, name: &str) -> anyhow::Result<()> {
    let feature = sdm
        .features
        .get(name)
        .ok_or_else(|| anyhow::anyhow!("unknown feature: {}", name))?;
    let Some(ideal) = sdm.features.store().ideal(name)? else {
        println!("No ideal stored for {}.", name);
        return Ok(());
    };

    println!("Feature: {} (v{})", feature.name(), feature.version());
    println!("Summary: {}", feature.summary(&ideal));
    println!("Sha:     {}", ideal.sha);
    println!("Data:    {}", ideal.data);
    for scale in feature.supported_rating_scales() {
        println!("Rating:  {} = {:?}", scale, feature.rate(&ideal, scale)?);
    }
    Ok(())
}

/// Store `data` as the ideal for the named feature, stamped with the
/// feature's current version.
pub fn set_ideal(sdm: &Sdm, name: &str, data: &str) -> anyhow::Result<FingerprintRecord> {
    let feature = sdm
        .features
        .get(name)
        .ok_or_else(|| anyhow::anyhow!("unknown feature: {}", name))?;
    let data: serde_json::Value =
        serde_json::from_str(data).map_err(|e| anyhow::anyhow!("invalid --data JSON: {}", e))?;
    let record = FingerprintRecord::new(feature.name(), feature.version(), data);
    sdm.features.store().set_ideal(&record)?;
    tracing::info!(feature = %name, sha = %record.sha, "ideal set by hand");
    Ok(record)
}
