use miette::{IntoDiagnostic, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Settings {
    pub server: Server,
    pub authz: Authz,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Server {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Authz {
    /// Model file (`[request_definition]`, `[matchers]`, ...). Default: authz_model.conf
    pub model_path: PathBuf,
    /// Flat policy file (`p, ...` / `g, ...` lines). Default: authz_policy.csv
    pub policy_path: PathBuf,
    /// Re-read the policy file every N seconds. Disabled when unset.
    #[serde(default)]
    pub reload_interval_secs: Option<u64>,
    /// Take the subject from this header instead of the Basic auth username,
    /// e.g. when an upstream proxy has already authenticated the user.
    #[serde(default)]
    pub subject_header: Option<String>,
}

impl Default for Server {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 9080,
        }
    }
}

impl Default for Authz {
    fn default() -> Self {
        Self {
            model_path: PathBuf::from("authz_model.conf"),
            policy_path: PathBuf::from("authz_policy.csv"),
            reload_interval_secs: None,
            subject_header: None,
        }
    }
}

impl Settings {
    pub fn load(path: &str) -> Result<Self> {
        let mut builder = config::Config::builder()
            .set_default("server.host", Server::default().host)
            .into_diagnostic()?
            .set_default("server.port", Server::default().port)
            .into_diagnostic()?
            .set_default(
                "authz.model_path",
                Authz::default().model_path.to_string_lossy().to_string(),
            )
            .into_diagnostic()?
            .set_default(
                "authz.policy_path",
                Authz::default().policy_path.to_string_lossy().to_string(),
            )
            .into_diagnostic()?;

        // Optional file
        if Path::new(path).exists() {
            builder = builder.add_source(config::File::with_name(path));
        }

        // Environment overrides: WARDEN__SERVER__PORT=9090, etc.
        builder = builder.add_source(config::Environment::with_prefix("WARDEN").separator("__"));

        let cfg = builder.build().into_diagnostic()?;
        let mut s: Settings = cfg.try_deserialize().into_diagnostic()?;

        // Normalize model/policy paths to be relative to current dir
        if s.authz.model_path.is_relative() {
            s.authz.model_path = std::env::current_dir()
                .into_diagnostic()?
                .join(&s.authz.model_path);
        }
        if s.authz.policy_path.is_relative() {
            s.authz.policy_path = std::env::current_dir()
                .into_diagnostic()?
                .join(&s.authz.policy_path);
        }

        Ok(s)
    }

    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}
