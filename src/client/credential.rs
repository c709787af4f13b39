use chrono::Utc;

/// Identity the local client presents when authenticating to a broker.
#[derive(Clone, PartialEq, Eq)]
pub struct GroupCredential {
    group_id: String,
    secret_key: String,
    auth_timestamp: i64,
}

impl GroupCredential {
    pub fn new(group_id: impl Into<String>, secret_key: impl Into<String>) -> Self {
        Self {
            group_id: group_id.into(),
            secret_key: secret_key.into(),
            auth_timestamp: Utc::now().timestamp(),
        }
    }

    pub fn group_id(&self) -> &str {
        &self.group_id
    }

    pub fn secret_key(&self) -> &str {
        &self.secret_key
    }

    /// Unix seconds at which the credential was created.
    pub fn auth_timestamp(&self) -> i64 {
        self.auth_timestamp
    }
}

impl std::fmt::Debug for GroupCredential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GroupCredential")
            .field("group_id", &self.group_id)
            .field("secret_key", &"***")
            .field("auth_timestamp", &self.auth_timestamp)
            .finish()
    }
}
