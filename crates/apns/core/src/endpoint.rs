//! Gateway endpoints.

/// Which gateway environment to talk to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Endpoint {
    #[default]
    Production,
    Sandbox,
}

impl Endpoint {
    pub fn from_sandbox(sandbox: bool) -> Self {
        if sandbox {
            Endpoint::Sandbox
        } else {
            Endpoint::Production
        }
    }

    /// Host and port of the notification gateway.
    pub fn gateway(self) -> (&'static str, u16) {
        match self {
            Endpoint::Production => ("gateway.push.apple.com", 2195),
            Endpoint::Sandbox => ("gateway.sandbox.push.apple.com", 2195),
        }
    }

    /// Host and port of the feedback service.
    pub fn feedback(self) -> (&'static str, u16) {
        match self {
            Endpoint::Production => ("feedback.push.apple.com", 2196),
            Endpoint::Sandbox => ("feedback.sandbox.push.apple.com", 2196),
        }
    }
}

impl std::fmt::Display for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Endpoint::Production => f.write_str("production"),
            Endpoint::Sandbox => f.write_str("sandbox"),
        }
    }
}
