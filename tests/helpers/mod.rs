#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::Arc;

use tempfile::TempDir;
use warden::authz::{load_model, Enforcer, PolicySource};

pub const MODEL: &str = include_str!("../../fixtures/authz_model.conf");
pub const POLICY: &str = include_str!("../../fixtures/authz_policy.csv");

/// Enforcer over the bundled fixtures with an inline policy source.
pub fn fixture_enforcer() -> Enforcer {
    inline_enforcer(MODEL, POLICY)
}

pub fn inline_enforcer(model: &str, policy: &str) -> Enforcer {
    let model = load_model(model).expect("fixture model should load");
    Enforcer::new(model, PolicySource::Inline(policy.to_string()))
        .expect("fixture policy should load")
}

/// Model and policy written to a temp dir, so reload can re-read the file.
pub struct PolicyFiles {
    _dir: TempDir,
    pub model_path: PathBuf,
    pub policy_path: PathBuf,
}

impl PolicyFiles {
    pub fn new(model: &str, policy: &str) -> Self {
        let dir = TempDir::new().expect("Failed to create temp dir");
        let model_path = dir.path().join("authz_model.conf");
        let policy_path = dir.path().join("authz_policy.csv");
        std::fs::write(&model_path, model).expect("Failed to write model");
        std::fs::write(&policy_path, policy).expect("Failed to write policy");
        Self {
            _dir: dir,
            model_path,
            policy_path,
        }
    }

    pub fn fixtures() -> Self {
        Self::new(MODEL, POLICY)
    }

    pub fn write_policy(&self, policy: &str) {
        std::fs::write(&self.policy_path, policy).expect("Failed to rewrite policy");
    }

    pub fn enforcer(&self) -> Arc<Enforcer> {
        Arc::new(
            Enforcer::from_files(&self.model_path, &self.policy_path)
                .expect("enforcer should load from files"),
        )
    }
}
