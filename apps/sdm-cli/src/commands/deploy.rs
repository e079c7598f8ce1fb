// deploy.rs — Deploy subcommands: freeze, unfreeze, enable, disable, status.
//
// Every change is saved to the store, so it holds for later pushes.

use clap::Subcommand;
use sdm_goal::RepoRef;

use crate::machine::Sdm;

#[derive(Subcommand)]
pub enum DeployCommands {
    /// Freeze all deployments.
    Freeze {
        /// Shown to anyone whose push hits the freeze.
        #[arg(long)]
        note: Option<String>,
    },
    /// Lift the deployment freeze.
    Unfreeze,
    /// Enable production deployment for a repository.
    Enable { owner: String, repo: String },
    /// Disable production deployment for a repository.
    Disable { owner: String, repo: String },
    /// Show the freeze and the repositories with deployment enabled.
    Status,
}

pub fn execute(cmd: &DeployCommands, sdm: &Sdm) -> anyhow::Result<()> {
    match cmd {
        DeployCommands::Freeze { note } => {
            let note = note.clone().unwrap_or_else(|| "Deployments are frozen".to_string());
            sdm.deployments.freeze(note.clone())?;
            sdm.save_deployments()?;
            println!("Deployments frozen: {}", note);
        }
        DeployCommands::Unfreeze => {
            sdm.deployments.unfreeze()?;
            sdm.save_deployments()?;
            println!("Deployments unfrozen.");
        }
        DeployCommands::Enable { owner, repo } => {
            let target = repo_ref(sdm, owner, repo)?;
            sdm.deployments.enable_deploy(&target)?;
            sdm.save_deployments()?;
            println!("Deployment enabled for {}.", target);
        }
        DeployCommands::Disable { owner, repo } => {
            let target = repo_ref(sdm, owner, repo)?;
            sdm.deployments.disable_deploy(&target)?;
            sdm.save_deployments()?;
            println!("Deployment disabled for {}.", target);
        }
        DeployCommands::Status => print_status(sdm)?,
    }
    Ok(())
}

fn repo_ref(sdm: &Sdm, owner: &str, repo: &str) -> anyhow::Result<RepoRef> {
    let url = format!(
        "{}/{}/{}",
        sdm.config.url_base.trim_end_matches('/'),
        owner,
        repo
    );
    Ok(RepoRef::new(owner, repo, url)?)
}

fn print_status(sdm: &Sdm) -> anyhow::Result<()> {
    let state = sdm.deployments.snapshot()?;
    if state.status.frozen {
        println!(
            "Frozen:  yes ({})",
            state.status.note.as_deref().unwrap_or("no note")
        );
    } else {
        println!("Frozen:  no");
    }
    if let Some(at) = state.status.changed_at {
        println!("Changed: {}", at.to_rfc3339());
    }
    if state.enabled.is_empty() {
        println!("Enabled: none");
    } else {
        println!("Enabled:");
        for slug in &state.enabled {
            println!("  {}", slug);
        }
    }
    Ok(())
}
