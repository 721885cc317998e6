// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 bbpl contributors

//! Runtime driver
//!
//! Thin façade over the Docker Engine HTTP API. Tracks every container and
//! network it creates so cleanup can always run, and keeps step execution
//! non-throwing: a driver failure during a run becomes a failed result,
//! never a panic or an early return past cleanup.

use bollard::auth::DockerCredentials;
use bollard::container::{
    Config, CreateContainerOptions, LogOutput, LogsOptions, RemoveContainerOptions,
    StartContainerOptions, StopContainerOptions, WaitContainerOptions,
};
use bollard::image::CreateImageOptions;
use bollard::models::{HostConfig, PortBinding};
use bollard::network::{CreateNetworkOptions, ListNetworksOptions};
use bollard::Docker;
use futures_util::StreamExt;
use std::collections::HashMap;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::errors::{BbplError, BbplResult};
use crate::runtime::spec::ContainerSpec;

/// Graceful stop window before a container is force-removed
const STOP_TIMEOUT_SECS: i64 = 10;

/// A created container
#[derive(Debug, Clone)]
pub struct ContainerHandle {
    pub id: String,
    pub name: String,
}

/// Outcome of running one container to completion
#[derive(Debug, Clone)]
pub struct ContainerRun {
    pub exit_code: i64,
    pub output: Vec<String>,
    pub error: Option<String>,
    pub duration: Duration,
}

impl ContainerRun {
    fn failed(error: impl Into<String>, duration: Duration) -> Self {
        Self {
            exit_code: 1,
            output: Vec::new(),
            error: Some(error.into()),
            duration,
        }
    }
}

/// Façade over a Docker-compatible runtime
pub struct RuntimeDriver {
    docker: Docker,
    main_network: String,
    containers: Mutex<Vec<String>>,
    networks: Mutex<Vec<String>>,
}

impl RuntimeDriver {
    /// Connect over the given Unix socket
    pub fn connect(socket: &str, main_network: &str) -> BbplResult<Self> {
        let docker = Docker::connect_with_unix(socket, 120, bollard::API_DEFAULT_VERSION)?;
        Ok(Self {
            docker,
            main_network: main_network.to_string(),
            containers: Mutex::new(Vec::new()),
            networks: Mutex::new(Vec::new()),
        })
    }

    /// Pull an image, consuming progress events until the pull completes
    pub async fn pull_image(
        &self,
        reference: &str,
        credentials: Option<(String, String)>,
    ) -> BbplResult<()> {
        info!("pulling image {reference}");
        let options = CreateImageOptions {
            from_image: reference.to_string(),
            ..Default::default()
        };
        let auth = credentials.map(|(username, password)| DockerCredentials {
            username: Some(username),
            password: Some(password),
            ..Default::default()
        });

        let mut progress = self.docker.create_image(Some(options), None, auth);
        while let Some(event) = progress.next().await {
            let event = event.map_err(|e| BbplError::Docker {
                message: format!("pull of '{reference}' failed: {e}"),
            })?;
            if let Some(status) = event.status {
                debug!("{reference}: {status}");
            }
        }
        Ok(())
    }

    /// Create a container from `spec` with a synthesized unique name
    pub async fn create_container(&self, spec: &ContainerSpec) -> BbplResult<ContainerHandle> {
        let name = synthesize_name();
        let options = CreateContainerOptions {
            name: name.clone(),
            platform: None,
        };

        let response = self
            .docker
            .create_container(Some(options), container_config(spec))
            .await
            .map_err(|e| BbplError::Container {
                message: format!("create failed: {e}"),
            })?;

        self.containers.lock().await.push(response.id.clone());
        debug!("created container {name} ({})", short_id(&response.id));

        Ok(ContainerHandle {
            id: response.id,
            name,
        })
    }

    /// Start the container, follow its logs, and wait for it to exit.
    /// Never errors: driver failures become a failed [`ContainerRun`].
    pub async fn run_container(&self, handle: &ContainerHandle) -> ContainerRun {
        let started = Instant::now();
        match self.drive_to_exit(handle).await {
            Ok((exit_code, output)) => ContainerRun {
                exit_code,
                output,
                error: None,
                duration: started.elapsed(),
            },
            Err(e) => ContainerRun::failed(e.to_string(), started.elapsed()),
        }
    }

    async fn drive_to_exit(&self, handle: &ContainerHandle) -> BbplResult<(i64, Vec<String>)> {
        self.docker
            .start_container(&handle.id, None::<StartContainerOptions<String>>)
            .await
            .map_err(|e| BbplError::Container {
                message: format!("start failed: {e}"),
            })?;

        let mut output = Vec::new();
        let mut logs = self.docker.logs(
            &handle.id,
            Some(LogsOptions::<String> {
                follow: true,
                stdout: true,
                stderr: true,
                ..Default::default()
            }),
        );
        while let Some(chunk) = logs.next().await {
            match chunk {
                Ok(frame) => {
                    let text = frame_text(frame);
                    if !text.is_empty() {
                        for line in text.lines() {
                            info!(target: "bbpl::container", "{line}");
                        }
                        output.push(text);
                    }
                }
                Err(e) => {
                    warn!("log stream interrupted: {e}");
                    break;
                }
            }
        }

        let mut wait = self
            .docker
            .wait_container(&handle.id, None::<WaitContainerOptions<String>>);
        let exit_code = match wait.next().await {
            Some(Ok(status)) => status.status_code,
            // a non-zero exit surfaces as an error item carrying the code
            Some(Err(bollard::errors::Error::DockerContainerWaitError { code, .. })) => code,
            Some(Err(e)) => {
                return Err(BbplError::Container {
                    message: format!("wait failed: {e}"),
                })
            }
            None => {
                return Err(BbplError::Container {
                    message: "wait stream ended without a status".to_string(),
                })
            }
        };

        Ok((exit_code, output))
    }

    /// Graceful stop; a container that already exited is not an error
    pub async fn stop_container(&self, id: &str) -> BbplResult<()> {
        let result = self
            .docker
            .stop_container(id, Some(StopContainerOptions { t: STOP_TIMEOUT_SECS }))
            .await;
        match result {
            Ok(()) => Ok(()),
            Err(e) if e.to_string().contains("is not running") => Ok(()),
            Err(e) => Err(BbplError::Container {
                message: format!("stop failed: {e}"),
            }),
        }
    }

    /// Force-remove a container
    pub async fn remove_container(&self, id: &str) -> BbplResult<()> {
        self.docker
            .remove_container(
                id,
                Some(RemoveContainerOptions {
                    force: true,
                    ..Default::default()
                }),
            )
            .await
            .map_err(|e| BbplError::Container {
                message: format!("remove failed: {e}"),
            })?;
        self.containers.lock().await.retain(|tracked| tracked != id);
        Ok(())
    }

    /// Create (or find) a bridge network by name. Idempotent.
    pub async fn create_network(&self, name: &str) -> BbplResult<String> {
        let mut filters = HashMap::new();
        filters.insert("name".to_string(), vec![name.to_string()]);
        let existing = self
            .docker
            .list_networks(Some(ListNetworksOptions { filters }))
            .await
            .map_err(|e| BbplError::Network {
                message: format!("list failed: {e}"),
            })?;
        if let Some(network) = existing
            .into_iter()
            .find(|n| n.name.as_deref() == Some(name))
        {
            let id = network.id.unwrap_or_else(|| name.to_string());
            debug!("network {name} already exists");
            self.track_network(&id).await;
            return Ok(id);
        }

        let response = self
            .docker
            .create_network(CreateNetworkOptions {
                name: name.to_string(),
                driver: "bridge".to_string(),
                check_duplicate: true,
                ..Default::default()
            })
            .await
            .map_err(|e| BbplError::Network {
                message: format!("create of '{name}' failed: {e}"),
            })?;

        let id = response.id.unwrap_or_else(|| name.to_string());
        info!("created network {name}");
        self.track_network(&id).await;
        Ok(id)
    }

    /// Remove a network; lingering endpoints downgrade to a warning
    pub async fn remove_network(&self, id: &str) -> BbplResult<()> {
        match self.docker.remove_network(id).await {
            Ok(()) => Ok(()),
            Err(e) if e.to_string().contains("has active endpoints") => {
                warn!("network {id} still has endpoints; leaving it behind");
                Ok(())
            }
            Err(e) => Err(BbplError::Network {
                message: format!("remove failed: {e}"),
            }),
        }
    }

    /// Stop and remove every tracked container; remove every tracked
    /// network except the main shared one. Failures are logged, never
    /// propagated.
    pub async fn cleanup(&self) {
        let containers: Vec<String> = self.containers.lock().await.drain(..).collect();
        for id in containers {
            if let Err(e) = self.stop_container(&id).await {
                debug!("cleanup stop {}: {e}", short_id(&id));
            }
            let result = self
                .docker
                .remove_container(
                    &id,
                    Some(RemoveContainerOptions {
                        force: true,
                        ..Default::default()
                    }),
                )
                .await;
            if let Err(e) = result {
                warn!("cleanup remove {}: {e}", short_id(&id));
            }
        }

        let main = self.main_network.clone();
        let networks: Vec<String> = self.networks.lock().await.drain(..).collect();
        for id in networks {
            if id == main {
                continue;
            }
            if let Err(e) = self.remove_network(&id).await {
                warn!("cleanup network {id}: {e}");
            }
        }
    }

    async fn track_network(&self, id: &str) {
        let mut networks = self.networks.lock().await;
        if !networks.iter().any(|tracked| tracked == id) {
            networks.push(id.to_string());
        }
    }
}

/// `bbpl-<epoch-ms>-<random9>`
fn synthesize_name() -> String {
    let epoch_ms = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or_default();
    let random: String = uuid::Uuid::new_v4()
        .simple()
        .to_string()
        .chars()
        .take(9)
        .collect();
    format!("bbpl-{epoch_ms}-{random}")
}

fn short_id(id: &str) -> &str {
    &id[..12.min(id.len())]
}

/// Translate a [`ContainerSpec`] into the API's create payload
fn container_config(spec: &ContainerSpec) -> Config<String> {
    let exposed_ports = if spec.exposed_ports.is_empty() {
        None
    } else {
        Some(
            spec.exposed_ports
                .iter()
                .map(|port| (port.clone(), HashMap::new()))
                .collect(),
        )
    };

    let port_bindings = if spec.port_bindings.is_empty() {
        None
    } else {
        Some(
            spec.port_bindings
                .iter()
                .map(|(container_port, host_port)| {
                    (
                        container_port.clone(),
                        Some(vec![PortBinding {
                            host_ip: None,
                            host_port: Some(host_port.clone()),
                        }]),
                    )
                })
                .collect(),
        )
    };

    Config {
        image: Some(spec.image.clone()),
        cmd: Some(spec.command.clone()),
        env: Some(spec.env.clone()),
        working_dir: spec.working_dir.clone(),
        user: spec.user.clone(),
        exposed_ports,
        host_config: Some(HostConfig {
            binds: Some(spec.binds.clone()),
            memory: spec.memory_bytes,
            nano_cpus: spec.nano_cpus,
            network_mode: spec.network.clone(),
            port_bindings,
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Render one log frame, stripping the 8-byte stream multiplex header
/// from raw frames when present
fn frame_text(frame: LogOutput) -> String {
    match frame {
        LogOutput::StdOut { message } | LogOutput::StdErr { message } => {
            String::from_utf8_lossy(&message).to_string()
        }
        LogOutput::Console { message } => {
            String::from_utf8_lossy(strip_multiplex_header(&message)).to_string()
        }
        LogOutput::StdIn { .. } => String::new(),
    }
}

/// Docker multiplexes streams as `[type, 0, 0, 0, len×4]` + payload.
/// Strip the header when the frame carries one.
fn strip_multiplex_header(bytes: &[u8]) -> &[u8] {
    if bytes.len() >= 8 && (bytes[0] == 0x01 || bytes[0] == 0x02) && bytes[1..4] == [0, 0, 0] {
        &bytes[8..]
    } else {
        bytes
    }
}
