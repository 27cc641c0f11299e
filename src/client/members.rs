//! Orchestration collaborators for cluster members.
//!
//! The upgrade core never talks to Kubernetes directly. It goes through the
//! traits in this module so that passes can be driven by in-memory members
//! in tests and by [`KubePods`] in production.

use std::future::Future;
use std::time::Duration;

use k8s_openapi::api::core::v1::Pod;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Status;
use kube::api::{Api, AttachParams, ListParams};
use kube::{Client, ResourceExt};
use tokio::io::{AsyncRead, AsyncReadExt};
use tracing::{debug, instrument, warn};

use super::types::{MemberError, MemberState, PodIdentity};

/// Lists the pods that make up a cluster.
pub trait MemberDirectory {
    /// Return the cluster's member pods, ordered by name.
    fn list_members(
        &self,
        namespace: &str,
        cluster_name: &str,
    ) -> impl Future<Output = Result<Vec<PodIdentity>, MemberError>> + Send;
}

/// Reads the runtime state of a single member.
pub trait MemberStateSource {
    /// Query role, running state and server version of `member`.
    fn member_state(
        &self,
        member: &PodIdentity,
    ) -> impl Future<Output = Result<MemberState, MemberError>> + Send;
}

/// Runs a command inside a member pod.
pub trait CommandExecutor {
    /// Execute `command` in `pod` and return its standard output.
    ///
    /// Fails on transport errors and on a non-zero exit status.
    fn exec(
        &self,
        pod: &PodIdentity,
        command: Vec<String>,
    ) -> impl Future<Output = Result<String, MemberError>> + Send;
}

/// Kubernetes-backed member directory and command executor.
#[derive(Clone)]
pub struct KubePods {
    client: Client,
    cluster_label: String,
    container: Option<String>,
    exec_timeout: Duration,
}

impl KubePods {
    /// Create a new pod collaborator.
    ///
    /// `cluster_label` is the label key whose value equals the cluster name on
    /// every member pod.
    pub fn new(
        client: Client,
        cluster_label: impl Into<String>,
        container: Option<String>,
        exec_timeout: Duration,
    ) -> Self {
        Self {
            client,
            cluster_label: cluster_label.into(),
            container,
            exec_timeout,
        }
    }

    fn attach_params(&self) -> AttachParams {
        let params = AttachParams::default()
            .stdin(false)
            .stdout(true)
            .stderr(true);
        match &self.container {
            Some(container) => params.container(container.clone()),
            None => params,
        }
    }
}

impl MemberDirectory for KubePods {
    #[instrument(skip(self))]
    async fn list_members(
        &self,
        namespace: &str,
        cluster_name: &str,
    ) -> Result<Vec<PodIdentity>, MemberError> {
        let pods: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        let selector = format!("{}={}", self.cluster_label, cluster_name);
        let pod_list = pods.list(&ListParams::default().labels(&selector)).await?;

        let mut members: Vec<PodIdentity> = pod_list
            .items
            .iter()
            .map(|pod| {
                let identity = PodIdentity::new(
                    pod.namespace().unwrap_or_else(|| namespace.to_string()),
                    pod.name_any(),
                );
                match pod.status.as_ref().and_then(|s| s.pod_ip.clone()) {
                    Some(ip) => identity.with_address(ip),
                    None => identity,
                }
            })
            .collect();
        members.sort_by(|a, b| a.name.cmp(&b.name));

        debug!(selector = %selector, count = members.len(), "Listed cluster members");
        Ok(members)
    }
}

impl CommandExecutor for KubePods {
    #[instrument(skip(self))]
    async fn exec(&self, pod: &PodIdentity, command: Vec<String>) -> Result<String, MemberError> {
        let pods: Api<Pod> = Api::namespaced(self.client.clone(), &pod.namespace);
        let params = self.attach_params();

        let run = async {
            let mut attached = pods.exec(&pod.name, command, &params).await?;
            let status = attached.take_status();
            let stdout = attached.stdout();
            let stderr = attached.stderr();
            let (stdout, stderr) = tokio::join!(read_stream(stdout), read_stream(stderr));

            let status = match status {
                Some(status) => status.await,
                None => None,
            };
            exec_result(status, stdout, &stderr).inspect_err(|e| {
                warn!(pod = %pod, error = %e, stderr = %stderr.trim(), "Command exited unsuccessfully");
            })
        };

        tokio::time::timeout(self.exec_timeout, run)
            .await
            .map_err(|_| MemberError::Timeout {
                operation: format!("exec in {}", pod),
                duration: self.exec_timeout,
            })?
    }
}

/// Map the exec status to a result. A missing status means the outcome of
/// the command is unknown and counts as a failure.
fn exec_result(status: Option<Status>, stdout: String, stderr: &str) -> Result<String, MemberError> {
    let Some(status) = status else {
        return Err(MemberError::CommandFailed("no exit status".to_string()));
    };
    if status.status.as_deref() == Some("Success") {
        return Ok(stdout);
    }
    let message = status
        .message
        .or(status.reason)
        .filter(|m| !m.is_empty())
        .or_else(|| Some(stderr.trim().to_string()).filter(|m| !m.is_empty()))
        .unwrap_or_else(|| "unknown failure".to_string());
    Err(MemberError::CommandFailed(message))
}

/// Drain an optional exec stream into a string.
async fn read_stream<R: AsyncRead + Unpin>(reader: Option<R>) -> String {
    let Some(mut reader) = reader else {
        return String::new();
    };
    let mut buf = Vec::new();
    if let Err(e) = reader.read_to_end(&mut buf).await {
        debug!(error = %e, "Exec stream closed with error");
    }
    String::from_utf8_lossy(&buf).into_owned()
}
