//! Patroni REST API client.
//!
//! Every member pod runs Patroni, which reports the member's role, state and
//! PostgreSQL server version on `GET /patroni`.

use std::time::Duration;

use serde::Deserialize;
use tracing::{debug, instrument};

use super::members::MemberStateSource;
use super::types::{MemberError, MemberRole, MemberState, PodIdentity, RunningState};

/// Default Patroni REST API port.
pub const DEFAULT_PATRONI_PORT: u16 = 8008;

/// Subset of the `/patroni` response used by the operator.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PatroniMemberData {
    #[serde(default)]
    pub state: String,
    #[serde(default)]
    pub role: String,
    #[serde(default)]
    pub server_version: Option<u32>,
}

impl From<PatroniMemberData> for MemberState {
    fn from(data: PatroniMemberData) -> Self {
        Self {
            role: MemberRole::from_patroni(&data.role),
            running: RunningState::from_patroni(&data.state),
            server_version: data.server_version,
        }
    }
}

/// HTTP client for the Patroni API of cluster members.
#[derive(Clone, Debug)]
pub struct PatroniClient {
    http: reqwest::Client,
    port: u16,
}

impl PatroniClient {
    /// Create a client whose requests time out after `timeout`.
    pub fn new(port: u16, timeout: Duration) -> Result<Self, MemberError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .build()?;
        Ok(Self { http, port })
    }

    /// URL of the member endpoint for a pod address.
    pub fn member_url(&self, address: &str) -> String {
        if address.contains(':') {
            format!("http://[{}]:{}/patroni", address, self.port)
        } else {
            format!("http://{}:{}/patroni", address, self.port)
        }
    }
}

impl MemberStateSource for PatroniClient {
    #[instrument(skip(self))]
    async fn member_state(&self, member: &PodIdentity) -> Result<MemberState, MemberError> {
        let address = member
            .address
            .as_deref()
            .ok_or_else(|| MemberError::NoAddress(member.to_string()))?;

        let data: PatroniMemberData = self
            .http
            .get(self.member_url(address))
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        debug!(
            member = %member,
            role = %data.role,
            state = %data.state,
            server_version = ?data.server_version,
            "Read Patroni member data"
        );
        Ok(data.into())
    }
}
