use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde_json::Value;
use std::path::PathBuf;

// `#[zbus::proxy]` generates `AttendanceProxy` for the daemon interface.
#[zbus::proxy(
    interface = "org.checkface.Attendance1",
    default_service = "org.checkface.Attendance1",
    default_path = "/org/checkface/Attendance1"
)]
trait Attendance {
    async fn recognize(&self, image_path: &str) -> zbus::Result<String>;
    async fn enroll(&self, identity: &str, image_paths: Vec<String>) -> zbus::Result<String>;
    async fn retrain(&self, identity: &str, force: bool) -> zbus::Result<String>;
    async fn retrain_all(&self, force: bool) -> zbus::Result<String>;
    async fn remove_identity(&self, identity: &str) -> zbus::Result<bool>;
    async fn rename_identity(&self, old: &str, new: &str, image_paths: Vec<String>) -> zbus::Result<String>;
    async fn list_identities(&self) -> zbus::Result<String>;
    async fn status(&self) -> zbus::Result<String>;
}

#[derive(Parser)]
#[command(name = "checkface", about = "CheckFace attendance recognition CLI")]
struct Cli {
    /// Talk to a daemon on the session bus instead of the system bus
    #[arg(long, global = true)]
    session: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Identify the faces in an image
    Recognize {
        image: PathBuf,
    },
    /// Add enrollment images for an identity and retrain it
    Enroll {
        identity: String,
        #[arg(required = true)]
        images: Vec<PathBuf>,
    },
    /// Rebuild an identity (or all identities) from stored samples
    Retrain {
        /// Identity to retrain; omit with --all
        #[arg(required_unless_present = "all", conflicts_with = "all")]
        identity: Option<String>,
        #[arg(long)]
        all: bool,
        /// Discard existing face crops and regenerate them
        #[arg(long)]
        force: bool,
    },
    /// Remove an identity and its samples
    Remove {
        identity: String,
    },
    /// Rename an identity, optionally adding new images
    Rename {
        old: String,
        new: String,
        images: Vec<PathBuf>,
    },
    /// List enrolled identities
    List,
    /// Show daemon status
    Status,
}

/// The daemon opens images itself, so paths must be absolute.
fn absolute_paths(paths: &[PathBuf]) -> Result<Vec<String>> {
    paths
        .iter()
        .map(|p| {
            std::fs::canonicalize(p)
                .with_context(|| format!("cannot open {}", p.display()))
                .map(|abs| abs.display().to_string())
        })
        .collect()
}

fn print_json(raw: &str) -> Result<()> {
    let value: Value = serde_json::from_str(raw).context("daemon returned invalid JSON")?;
    println!("{}", serde_json::to_string_pretty(&value)?);
    Ok(())
}

/// One line per face: `identity (similarity)` or the failure reason.
fn describe_faces(raw: &str) -> Result<Vec<String>> {
    let faces: Vec<Value> = serde_json::from_str(raw).context("daemon returned invalid JSON")?;
    Ok(faces
        .iter()
        .enumerate()
        .map(|(i, face)| {
            let outcome = &face["outcome"];
            let label = match outcome["status"].as_str() {
                Some("classified") => {
                    let name = match outcome["identity"]["kind"].as_str() {
                        Some("known") => outcome["identity"]["key"].as_str().unwrap_or("?"),
                        _ => "Unknown",
                    };
                    let similarity = outcome["similarity"].as_f64().unwrap_or(0.0);
                    format!("{name} ({similarity:.1})")
                }
                _ => format!(
                    "not processed: {}",
                    outcome["reason"].as_str().unwrap_or("unknown error")
                ),
            };
            format!("face {}: {label}", i + 1)
        })
        .collect())
}

fn describe_identities(raw: &str) -> Result<Vec<String>> {
    let identities: Vec<Value> = serde_json::from_str(raw).context("daemon returned invalid JSON")?;
    Ok(identities
        .iter()
        .map(|id| {
            format!(
                "{}\t{} samples\tcohesion {:.3}",
                id["identity"].as_str().unwrap_or("?"),
                id["sample_count"].as_u64().unwrap_or(0),
                id["intra_cohesion"].as_f64().unwrap_or(0.0),
            )
        })
        .collect())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    let conn = if cli.session {
        zbus::Connection::session().await
    } else {
        zbus::Connection::system().await
    }
    .context("cannot connect to D-Bus")?;
    tracing::debug!(session_bus = cli.session, "connected to D-Bus");
    let proxy = AttendanceProxy::new(&conn)
        .await
        .context("checkfaced is not reachable")?;

    match cli.command {
        Commands::Recognize { image } => {
            let path = absolute_paths(&[image])?.remove(0);
            tracing::debug!(%path, "requesting recognition");
            let faces = describe_faces(&proxy.recognize(&path).await?)?;
            if faces.is_empty() {
                println!("No faces detected");
            }
            for line in faces {
                println!("{line}");
            }
        }
        Commands::Enroll { identity, images } => {
            let paths = absolute_paths(&images)?;
            tracing::debug!(%identity, images = paths.len(), "requesting enrollment");
            print_json(&proxy.enroll(&identity, paths).await?)?;
        }
        Commands::Retrain { identity, all, force } => {
            tracing::debug!(?identity, all, force, "requesting retrain");
            let report = match identity {
                Some(identity) if !all => proxy.retrain(&identity, force).await?,
                _ => proxy.retrain_all(force).await?,
            };
            print_json(&report)?;
        }
        Commands::Remove { identity } => {
            if proxy.remove_identity(&identity).await? {
                println!("Removed {identity}");
            } else {
                println!("Nothing enrolled under {identity}");
            }
        }
        Commands::Rename { old, new, images } => {
            let paths = absolute_paths(&images)?;
            tracing::debug!(%old, %new, images = paths.len(), "requesting rename");
            let report = proxy.rename_identity(&old, &new, paths).await?;
            println!("Renamed {old} to {new}");
            if report != "null" {
                print_json(&report)?;
            }
        }
        Commands::List => {
            let lines = describe_identities(&proxy.list_identities().await?)?;
            if lines.is_empty() {
                println!("No identities enrolled");
            }
            for line in lines {
                println!("{line}");
            }
        }
        Commands::Status => {
            print_json(&proxy.status().await?)?;
        }
    }

    Ok(())
}
