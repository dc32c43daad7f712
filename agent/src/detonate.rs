//! Sample launching.
//!
//! The file extension decides the launch recipe. Everything runs detached;
//! the agent never waits on the sample, only on the run timeout. Samples
//! that produce terminal output get it captured into the run transcript.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use tokio::process::Command;
use tracing::{info, warn};

use shared::Result;

use crate::config::Config;

pub const TRANSCRIPT_FILE: &str = "output.txt";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PackageKind {
    /// Zipped application bundle, extracted and opened
    AppBundle,
    /// Disk image, mounted via open
    DiskImage,
    ShellScript,
    AppleScript,
    MachO,
    /// Anything else; the scratch directory is opened for a human to take over
    Unknown,
}

impl PackageKind {
    pub fn classify(file_name: &str) -> Self {
        if file_name.ends_with(".app.zip") {
            PackageKind::AppBundle
        } else if file_name.ends_with(".dmg") {
            PackageKind::DiskImage
        } else if file_name.ends_with(".sh") {
            PackageKind::ShellScript
        } else if file_name.ends_with(".scpt") {
            PackageKind::AppleScript
        } else if file_name.ends_with(".o") {
            PackageKind::MachO
        } else {
            PackageKind::Unknown
        }
    }
}

/// Launches the sample according to its package kind. Returns once the
/// sample process is started.
pub async fn launch(config: &Config, sample_path: &Path, file_name: &str) -> Result<()> {
    let kind = PackageKind::classify(file_name);
    let transcript = config.scratch_dir.join(TRANSCRIPT_FILE);
    info!(?kind, file = file_name, "launching sample");

    match kind {
        PackageKind::AppBundle => {
            extract_archive(config, sample_path).await?;
            match find_app_bundle(&config.scratch_dir).await {
                Some(app) => open_detached(&app).await?,
                None => {
                    warn!("no .app bundle in archive, opening scratch directory");
                    open_detached(&config.scratch_dir).await?;
                }
            }
        }
        PackageKind::DiskImage => open_detached(sample_path).await?,
        PackageKind::ShellScript | PackageKind::MachO => {
            make_executable(sample_path).await?;
            spawn_with_transcript(sample_path, &[], &transcript)?;
        }
        PackageKind::AppleScript => {
            spawn_with_transcript(
                Path::new("/usr/bin/osascript"),
                &[sample_path.as_os_str().to_string_lossy().as_ref()],
                &transcript,
            )?;
        }
        PackageKind::Unknown => open_detached(&config.scratch_dir).await?,
    }

    Ok(())
}

async fn open_detached(path: &Path) -> Result<()> {
    Command::new("/usr/bin/open")
        .arg(path)
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()?;
    Ok(())
}

async fn make_executable(path: &Path) -> Result<()> {
    let status = Command::new("/bin/chmod")
        .arg("+x")
        .arg(path)
        .status()
        .await?;
    if !status.success() {
        return Err(shared::CoreError::Subprocess(format!(
            "chmod +x failed for {}",
            path.display()
        )));
    }
    Ok(())
}

fn spawn_with_transcript(program: &Path, args: &[&str], transcript: &Path) -> Result<()> {
    let out = std::fs::File::create(transcript)?;
    let err = out.try_clone()?;
    Command::new(program)
        .args(args)
        .stdout(Stdio::from(out))
        .stderr(Stdio::from(err))
        .spawn()?;
    Ok(())
}

async fn extract_archive(config: &Config, archive: &Path) -> Result<()> {
    let status = Command::new(&config.p7zip_path)
        .arg("x")
        .arg(archive)
        .arg(format!("-o{}", config.scratch_dir.display()))
        .arg("-y")
        .stdout(Stdio::null())
        .status()
        .await?;
    if !status.success() {
        return Err(shared::CoreError::Subprocess(format!(
            "archive extraction exited with {}",
            status
        )));
    }
    Ok(())
}

/// Finds the first `.app` directory under the scratch dir, skipping archive
/// resource-fork litter.
async fn find_app_bundle(root: &Path) -> Option<PathBuf> {
    let mut queue = vec![root.to_path_buf()];
    while let Some(dir) = queue.pop() {
        let Ok(mut entries) = tokio::fs::read_dir(&dir).await else {
            continue;
        };
        while let Ok(Some(entry)) = entries.next_entry().await {
            let path = entry.path();
            let name = entry.file_name().to_string_lossy().into_owned();
            if !path.is_dir() || name.contains("__MACOSX") {
                continue;
            }
            if name.ends_with(".app") {
                return Some(path);
            }
            queue.push(path);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_classify_known_packages() {
        assert_eq!(PackageKind::classify("evil.app.zip"), PackageKind::AppBundle);
        assert_eq!(PackageKind::classify("installer.dmg"), PackageKind::DiskImage);
        assert_eq!(PackageKind::classify("run.sh"), PackageKind::ShellScript);
        assert_eq!(PackageKind::classify("do.scpt"), PackageKind::AppleScript);
        assert_eq!(PackageKind::classify("dropper.o"), PackageKind::MachO);
    }

    #[test]
    fn test_plain_zip_is_not_an_app_bundle() {
        assert_eq!(PackageKind::classify("archive.zip"), PackageKind::Unknown);
        assert_eq!(PackageKind::classify("sample.bin"), PackageKind::Unknown);
    }

    #[tokio::test]
    async fn test_find_app_bundle_skips_resource_forks() {
        let scratch = tempfile::tempdir().unwrap();
        let root = scratch.path();
        tokio::fs::create_dir_all(root.join("__MACOSX/Evil.app"))
            .await
            .unwrap();
        tokio::fs::create_dir_all(root.join("payload/Evil.app"))
            .await
            .unwrap();

        let found = find_app_bundle(root).await.unwrap();
        assert_eq!(found, root.join("payload/Evil.app"));
    }

    #[tokio::test]
    async fn test_find_app_bundle_empty_dir() {
        let scratch = tempfile::tempdir().unwrap();
        assert!(find_app_bundle(scratch.path()).await.is_none());
    }
}
