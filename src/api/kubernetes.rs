use k8s_openapi::api::core::v1::{PersistentVolumeClaim, Pod};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Status;
use kube::api::{Api, AttachParams, ListParams};
use kube::config::{Config, KubeConfigOptions};
use kube::Client;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::runtime::Runtime;

use super::{ClusterApi, ClusterError, PodInfo, VolumeIdentity};
use crate::cli::KubernetesConfig;

const SHELL: &str = "/bin/bash";
const EXEC_STATUS_FAILURE: &str = "Failure";
/// Websocket buffer size per output stream.
const EXEC_BUF_SIZE: usize = 64 * 1024;

/// [ClusterApi] backed by the Kubernetes API.
///
/// Owns a current thread runtime all requests are driven on, so callers stay
/// blocking.
pub struct KubernetesClient {
    runtime: Runtime,
    client: Client,
    namespace: String,
}

impl KubernetesClient {
    /// Loads the in-cluster or kubeconfig credentials and checks the API server
    /// is reachable.
    pub fn connect(config: &KubernetesConfig) -> Result<Self, ClusterError> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| connection_error("runtime", e))?;

        let client = runtime.block_on(async {
            let kube_config = if config.in_cluster {
                log::debug!(target: "api::kubernetes", "Load in-cluster configuration");
                Config::incluster().map_err(|e| connection_error("in-cluster config", e))?
            } else {
                log::debug!(target: "api::kubernetes", "Load kubeconfig");
                Config::from_kubeconfig(&KubeConfigOptions::default())
                    .await
                    .map_err(|e| connection_error("kubeconfig", e))?
            };
            let client =
                Client::try_from(kube_config).map_err(|e| connection_error("client", e))?;

            let version = client
                .apiserver_version()
                .await
                .map_err(|e| connection_error("API server", e))?;
            log::debug!(target: "api::kubernetes", "Connected to Kubernetes {}", version.git_version);

            Ok::<_, ClusterError>(client)
        })?;

        log::info!(target: "api::kubernetes", "Kubernetes API connection established");
        Ok(Self {
            runtime,
            client,
            namespace: config.namespace.clone(),
        })
    }

    fn pods(&self) -> Api<Pod> {
        Api::namespaced(self.client.clone(), &self.namespace)
    }
}

fn connection_error(what: &str, err: impl std::fmt::Display) -> ClusterError {
    ClusterError::Connection {
        reason: format!("{what}: {err}"),
    }
}

async fn read_stream<R: AsyncRead + Unpin>(stream: Option<R>) -> std::io::Result<String> {
    let mut output = String::new();
    if let Some(mut stream) = stream {
        stream.read_to_string(&mut output).await?;
    }
    Ok(output)
}

/// Drains stdout and stderr together; a full stream would stall the other.
async fn read_output<O, E>(stdout: Option<O>, stderr: Option<E>) -> std::io::Result<(String, String)>
where
    O: AsyncRead + Unpin,
    E: AsyncRead + Unpin,
{
    let (stdout, stderr) = tokio::join!(read_stream(stdout), read_stream(stderr));
    Ok((stdout?, stderr?))
}

fn failure_reason(status: &Status, stdout: &str, stderr: &str) -> String {
    format!(
        "{} ({})\nstdout:\n{stdout}\nstderr:\n{stderr}",
        status.message.as_deref().unwrap_or_default(),
        status.reason.as_deref().unwrap_or_default()
    )
}

impl ClusterApi for KubernetesClient {
    fn pod_by_label(&self, selector: &str) -> Result<PodInfo, ClusterError> {
        log::debug!(target: "api::kubernetes", "Look up pod with label {selector} in namespace {}", self.namespace);

        let pods = self
            .runtime
            .block_on(self.pods().list(&ListParams::default().labels(selector)))
            .map_err(|e| ClusterError::PodLookup {
                selector: selector.to_owned(),
                reason: e.to_string(),
            })?;

        let mut found: Vec<PodInfo> = pods
            .items
            .into_iter()
            .map(|pod| PodInfo {
                name: pod.metadata.name.unwrap_or_default(),
                phase: pod.status.and_then(|status| status.phase),
            })
            .collect();

        if found.len() != 1 {
            return Err(ClusterError::NoUniquePod {
                selector: selector.to_owned(),
                found: found.len(),
            });
        }
        Ok(found.remove(0))
    }

    fn exec_in_pod(&self, pod: &str, command: &str) -> Result<String, ClusterError> {
        let exec_error = |reason: String| ClusterError::Exec {
            pod: pod.to_owned(),
            command: command.to_owned(),
            reason,
        };

        let params = AttachParams {
            stdin: false,
            stdout: true,
            stderr: true,
            max_stdout_buf_size: Some(EXEC_BUF_SIZE),
            max_stderr_buf_size: Some(EXEC_BUF_SIZE),
            ..AttachParams::default()
        };

        self.runtime.block_on(async {
            let mut process = self
                .pods()
                .exec(pod, [SHELL, "-c", command], &params)
                .await
                .map_err(|e| exec_error(e.to_string()))?;

            let (stdout, stderr) = read_output(process.stdout(), process.stderr())
                .await
                .map_err(|e| exec_error(format!("reading output: {e}")))?;

            if let Some(status) = process.take_status() {
                if let Some(status) = status.await {
                    if status.status.as_deref() == Some(EXEC_STATUS_FAILURE) {
                        return Err(exec_error(failure_reason(&status, &stdout, &stderr)));
                    }
                }
            }

            let output = stdout + &stderr;
            log::trace!(target: "api::kubernetes", "Output of {pod}: {output:?}");
            Ok(output)
        })
    }

    fn volume_for_claim(&self, claim: &str) -> Result<VolumeIdentity, ClusterError> {
        let claims: Api<PersistentVolumeClaim> =
            Api::namespaced(self.client.clone(), &self.namespace);

        let pvc = self
            .runtime
            .block_on(claims.get(claim))
            .map_err(|e| ClusterError::ClaimLookup {
                claim: claim.to_owned(),
                reason: e.to_string(),
            })?;

        let volume = pvc
            .spec
            .and_then(|spec| spec.volume_name)
            .filter(|name| !name.is_empty())
            .ok_or_else(|| ClusterError::ClaimUnbound {
                claim: claim.to_owned(),
            })?;

        log::debug!(target: "api::kubernetes", "Claim {claim} is bound to volume {volume}");
        Ok(VolumeIdentity {
            claim: claim.to_owned(),
            volume,
        })
    }
}
