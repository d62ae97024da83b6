//! Desired-state descriptors for applications and modules.

use semver::VersionReq;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// User configuration of a package. Keys are kept sorted so that the
/// serialized form, and therefore its checksum, is stable.
pub type Settings = serde_json::Map<String, Value>;

/// Namespace applications land in when the descriptor leaves it empty.
pub const DEFAULT_NAMESPACE: &str = "default";

/// Fixed namespace every module is released into.
pub const MODULES_NAMESPACE: &str = "d8-system";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Scheme {
    Http,
    #[default]
    Https,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

/// Where a bundle image is pulled from.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Repository {
    pub name: String,
    pub repository: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub docker_config: Option<String>,
    #[serde(default)]
    pub scheme: Scheme,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ca: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credentials: Option<Credentials>,
}

/// Predicates a package places on the cluster before it may run.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Constraints {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deckhouse: Option<VersionReq>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kubernetes: Option<VersionReq>,
    /// Keep the package disabled until the cluster reports it is bootstrapped.
    #[serde(default)]
    pub bootstrapped: bool,
    /// Identifiers of packages that must be running before this one.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dependencies: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApplicationSpec {
    #[serde(default)]
    pub namespace: String,
    pub name: String,
    pub version: String,
    #[serde(default)]
    pub repository: Repository,
    #[serde(default)]
    pub settings: Settings,
    #[serde(default)]
    pub constraints: Constraints,
}

impl ApplicationSpec {
    /// Fill in defaults the desired-state driver may have left out.
    pub fn normalize(&mut self) {
        if self.namespace.is_empty() {
            self.namespace = DEFAULT_NAMESPACE.to_string();
        }
    }

    /// `<namespace>.<name>`
    pub fn id(&self) -> String {
        application_id(&self.namespace, &self.name)
    }
}

pub fn application_id(namespace: &str, name: &str) -> String {
    let namespace = if namespace.is_empty() {
        DEFAULT_NAMESPACE
    } else {
        namespace
    };
    format!("{namespace}.{name}")
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModuleSpec {
    pub name: String,
    pub version: String,
    #[serde(default)]
    pub repository: Repository,
    #[serde(default)]
    pub settings: Settings,
    #[serde(default)]
    pub constraints: Constraints,
}

impl ModuleSpec {
    pub fn id(&self) -> String {
        self.name.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn application_defaults_namespace() {
        let mut spec = ApplicationSpec {
            name: "web".into(),
            version: "1.0.0".into(),
            ..Default::default()
        };
        assert_eq!(spec.id(), "default.web");
        spec.normalize();
        assert_eq!(spec.namespace, "default");
        assert_eq!(spec.id(), "default.web");
    }

    #[test]
    fn parses_constraints_from_yaml() {
        let yaml = r#"
name: web
namespace: ns
version: 1.0.0
settings:
  replicas: 3
constraints:
  deckhouse: ">=1.60"
  bootstrapped: true
  dependencies: [ns.db]
"#;
        let spec: ApplicationSpec = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(spec.id(), "ns.web");
        assert_eq!(spec.settings["replicas"], 3);
        let req = spec.constraints.deckhouse.unwrap();
        assert!(req.matches(&semver::Version::new(1, 70, 0)));
        assert!(spec.constraints.bootstrapped);
        assert_eq!(spec.constraints.dependencies, vec!["ns.db".to_string()]);
        assert_eq!(spec.repository.scheme, Scheme::Https);
    }
}
