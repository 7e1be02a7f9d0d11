// ─── Account identity ───
// The sign-in chain itself lives outside this crate; only its results pass
// through here. `AccountIdentity` is durable, `LaunchAccount` is session-only.

use serde::{Deserialize, Serialize};

pub const OFFLINE_UUID: &str = "00000000-0000-0000-0000-000000000000";
const OFFLINE_ACCESS_TOKEN: &str = "offline_access_token";
const DEFAULT_USERNAME: &str = "Player";

/// Persisted identity: a username and the refresh token that can mint a new
/// session. Access tokens never land here.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountIdentity {
    pub username: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccountMode {
    Offline,
    Microsoft,
}

/// Session values substituted into the game's launch arguments.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LaunchAccount {
    pub mode: AccountMode,
    pub username: String,
    pub uuid: String,
    #[serde(skip_serializing)]
    pub access_token: String,
    pub xuid: String,
    pub user_type: String,
}

impl Default for LaunchAccount {
    fn default() -> Self {
        Self::offline(DEFAULT_USERNAME)
    }
}

impl LaunchAccount {
    pub fn offline(username: &str) -> Self {
        Self {
            mode: AccountMode::Offline,
            username: username.trim().to_string(),
            uuid: OFFLINE_UUID.into(),
            access_token: OFFLINE_ACCESS_TOKEN.into(),
            xuid: "0".into(),
            user_type: "legacy".into(),
        }
        .sanitized()
    }

    /// Offline session for the persisted identity, if any.
    pub fn from_identity(identity: Option<&AccountIdentity>) -> Self {
        match identity {
            Some(identity) => Self::offline(&identity.username),
            None => Self::default(),
        }
    }

    /// Fill blank fields so no launch argument ends up empty.
    pub fn sanitized(mut self) -> Self {
        if self.username.trim().is_empty() {
            self.username = DEFAULT_USERNAME.into();
        }
        if self.uuid.trim().is_empty() {
            self.uuid = OFFLINE_UUID.into();
        }
        if self.access_token.trim().is_empty() {
            self.access_token = OFFLINE_ACCESS_TOKEN.into();
        }
        if self.xuid.trim().is_empty() {
            self.xuid = "0".into();
        }
        if self.user_type.trim().is_empty() {
            self.user_type = match self.mode {
                AccountMode::Offline => "legacy".into(),
                AccountMode::Microsoft => "msa".into(),
            };
        }
        self
    }

    /// Durable part of this session.
    pub fn identity(&self, refresh_token: Option<String>) -> AccountIdentity {
        AccountIdentity {
            username: self.username.clone(),
            refresh_token,
        }
    }
}
