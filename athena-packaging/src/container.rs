// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Container driver abstraction.

The builder talks to a small [ContainerDriver] interface rather than a
concrete runtime. [DockerCommandDriver] implements it over the `docker`
CLI; tests substitute an in-process fake that runs a scripted sequence.

Driver errors are fatal to the run, unlike individual build failures.
*/

use {
    crate::error::{AthenaError, Result},
    async_trait::async_trait,
    std::path::{Path, PathBuf},
    tokio::{io::AsyncWriteExt, process::Command},
};

/// A read-write bind mount into a build container.
#[derive(Clone, Debug)]
pub struct ContainerMount {
    /// Host directory to mount.
    pub host: PathBuf,

    /// Mount point inside the container.
    pub container: String,
}

/// Everything needed to launch one build container.
#[derive(Clone, Debug)]
pub struct ContainerSpec {
    /// Image tag to run.
    pub image: String,

    /// Command argv to execute.
    pub command: Vec<String>,

    /// Bind mounts.
    pub mounts: Vec<ContainerMount>,
}

/// Minimal container runtime interface used by the builder.
#[async_trait]
pub trait ContainerDriver: Send + Sync {
    /// Whether an image with the given tag exists locally.
    async fn image_exists(&self, tag: &str) -> Result<bool>;

    /// Build an image from the Dockerfile in `context_dir`.
    async fn build_image(&self, context_dir: &Path, tag: &str) -> Result<()>;

    /// Launch a detached container, returning its id.
    async fn run(&self, spec: &ContainerSpec) -> Result<String>;

    /// Stream the container's output into a log file.
    ///
    /// Returns once the container's output stream closes.
    async fn stream_logs(&self, container_id: &str, destination: &Path) -> Result<()>;

    /// Wait for the container to exit, returning its exit status.
    async fn wait(&self, container_id: &str) -> Result<i64>;

    /// Stop a running container.
    async fn stop(&self, container_id: &str) -> Result<()>;

    /// Remove a stopped container.
    async fn remove(&self, container_id: &str) -> Result<()>;
}

/// [ContainerDriver] over the `docker` command line client.
pub struct DockerCommandDriver {
    program: String,
}

impl Default for DockerCommandDriver {
    fn default() -> Self {
        Self {
            program: "docker".to_string(),
        }
    }
}

impl DockerCommandDriver {
    /// Use an alternative client binary (e.g. `podman`).
    pub fn with_program(program: impl ToString) -> Self {
        Self {
            program: program.to_string(),
        }
    }

    async fn output(&self, args: &[&str]) -> Result<std::process::Output> {
        Command::new(&self.program)
            .args(args)
            .output()
            .await
            .map_err(|e| {
                AthenaError::Container(format!("error invoking {}: {}", self.program, e))
            })
    }

    async fn checked_output(&self, args: &[&str]) -> Result<std::process::Output> {
        let output = self.output(args).await?;

        if output.status.success() {
            Ok(output)
        } else {
            Err(AthenaError::Container(format!(
                "{} {} failed: {}",
                self.program,
                args.join(" "),
                String::from_utf8_lossy(&output.stderr).trim()
            )))
        }
    }
}

#[async_trait]
impl ContainerDriver for DockerCommandDriver {
    async fn image_exists(&self, tag: &str) -> Result<bool> {
        let output = self.output(&["image", "inspect", tag]).await?;

        Ok(output.status.success())
    }

    async fn build_image(&self, context_dir: &Path, tag: &str) -> Result<()> {
        let context = format!("{}", context_dir.display());

        self.checked_output(&["build", "--tag", tag, &context])
            .await?;

        Ok(())
    }

    async fn run(&self, spec: &ContainerSpec) -> Result<String> {
        let mut args = vec!["run".to_string(), "--detach".to_string()];

        for mount in &spec.mounts {
            args.push("--volume".to_string());
            args.push(format!("{}:{}", mount.host.display(), mount.container));
        }

        args.push(spec.image.clone());
        args.extend(spec.command.iter().cloned());

        let args = args.iter().map(|s| s.as_str()).collect::<Vec<_>>();
        let output = self.checked_output(&args).await?;

        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    async fn stream_logs(&self, container_id: &str, destination: &Path) -> Result<()> {
        let output = self
            .output(&["logs", "--follow", container_id])
            .await?;

        let mut f = tokio::fs::File::create(destination)
            .await
            .map_err(|e| AthenaError::Container(format!("cannot create log file: {}", e)))?;

        f.write_all(&output.stdout)
            .await
            .map_err(|e| AthenaError::Container(format!("cannot write log file: {}", e)))?;
        f.write_all(&output.stderr)
            .await
            .map_err(|e| AthenaError::Container(format!("cannot write log file: {}", e)))?;

        Ok(())
    }

    async fn wait(&self, container_id: &str) -> Result<i64> {
        let output = self.checked_output(&["wait", container_id]).await?;

        String::from_utf8_lossy(&output.stdout)
            .trim()
            .parse::<i64>()
            .map_err(|e| AthenaError::Container(format!("unparseable wait status: {}", e)))
    }

    async fn stop(&self, container_id: &str) -> Result<()> {
        self.checked_output(&["stop", container_id]).await?;

        Ok(())
    }

    async fn remove(&self, container_id: &str) -> Result<()> {
        self.checked_output(&["rm", container_id]).await?;

        Ok(())
    }
}
