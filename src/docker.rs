use log::{debug, info, warn};
use std::process::{Command, Output};

use crate::error::{Error, Result};
use crate::handle::ResourceHandle;
use crate::provisioner::{LaunchRequest, Provisioner};

/// Provisioner driving the local `docker` CLI.
///
/// Image, ports, container name and host come from the [`LaunchRequest`], so
/// whatever the fixture config says is what `docker run` gets.
#[derive(Debug, Clone)]
pub struct DockerCli {
    binary: String,
    detect_platform: bool,
}

impl Default for DockerCli {
    fn default() -> Self {
        Self::new()
    }
}

impl DockerCli {
    pub fn new() -> Self {
        Self {
            binary: "docker".to_string(),
            detect_platform: false,
        }
    }

    /// Path or name of the docker executable.
    pub fn binary(mut self, s: impl ToString) -> Self {
        self.binary = s.to_string();
        self
    }

    /// Pass `DOCKER_DEFAULT_PLATFORM` matching the daemon's OS and architecture.
    pub fn detect_platform(mut self, b: bool) -> Self {
        self.detect_platform = b;
        self
    }

    fn command(&self) -> Command {
        Command::new(&self.binary)
    }

    /// Get the OS and architecture of the docker daemon.
    fn os_arch(&self) -> Option<String> {
        let output = self
            .command()
            .args(["info", "--format", "{{.OSType}}/{{.Architecture}}"])
            .output()
            .ok()?;
        if output.status.success() {
            return Some(String::from_utf8_lossy(&output.stdout).trim().to_string());
        }

        // Below tries an alternative path if the above path fails
        let output = self
            .command()
            .args(["info", "--format", "{{.Version.OsArch}}"])
            .output()
            .ok()?;
        let arch = String::from_utf8_lossy(&output.stdout).trim().to_string();
        (!arch.is_empty()).then_some(arch)
    }

    fn run_args(&self, request: &LaunchRequest) -> Vec<String> {
        let mut args = vec!["run".to_string(), "-d".to_string()];
        if let Some(name) = &request.container_name {
            args.push("--name".to_string());
            args.push(name.clone());
        }
        for port in &request.ports {
            args.push("-p".to_string());
            args.push(port.to_string());
        }
        args.push(request.image.to_string());
        args
    }

    fn stop_args(&self, handle: &ResourceHandle) -> Vec<String> {
        vec![
            "rm".to_string(),
            "-f".to_string(),
            "-v".to_string(),
            handle.id.clone(),
        ]
    }
}

fn stderr_of(output: &Output) -> String {
    String::from_utf8_lossy(&output.stderr).trim().to_string()
}

impl Provisioner for DockerCli {
    fn launch(&self, request: &LaunchRequest) -> Result<ResourceHandle> {
        let image = &request.image;
        let mut cmd = self.command();
        if self.detect_platform {
            if let Some(platform) = self.os_arch() {
                debug!("Using docker platform {}", platform);
                cmd.env("DOCKER_DEFAULT_PLATFORM", platform);
            }
        }
        cmd.args(self.run_args(request));

        info!("Starting container from image {}", image);
        let output = cmd.output().map_err(|e| Error::launch(image, e))?;

        if !output.status.success() {
            return Err(Error::launch(image, stderr_of(&output)));
        }

        let id = String::from_utf8_lossy(&output.stdout).trim().to_string();
        if id.is_empty() {
            return Err(Error::launch(image, "docker run printed no container id"));
        }

        info!("Container {} started from image {}", id, image);
        Ok(ResourceHandle::new(id, &request.host, request.ports.clone()))
    }

    fn stop(&self, handle: &ResourceHandle) -> Result<()> {
        info!("Stopping container {}", handle.id);
        let output = self
            .command()
            .args(self.stop_args(handle))
            .output()
            .map_err(|e| Error::stop(&handle.id, e))?;

        if !output.status.success() {
            let stderr = stderr_of(&output);
            warn!("Docker rm for {} failed: {}", handle.id, stderr);
            return Err(Error::stop(&handle.id, stderr));
        }

        Ok(())
    }
}
