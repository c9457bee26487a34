use crate::config::Resolved;
use std::collections::BTreeMap;
use tracing::debug;

pub static TRIGGER_ANNOTATION: &str = "image.update.trigger";
pub static ENV_ANNOTATION: &str = "config.app/env";
pub static BRANCH_ANNOTATION: &str = "config.app/branch";
pub static PROJECT_ID_ANNOTATION: &str = "config.app/project-id";

const DEFAULT_ENV: &str = "default";
const DEFAULT_BRANCH: &str = "default";
const DEFAULT_PROJECT_ID: &str = "123456";

/// Pipeline parameters a workload declares through its annotations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TriggerConfig {
    pub env: Resolved<String>,
    pub branch: Resolved<String>,
    pub project_id: Resolved<String>,
}

/// Only the exact value `"true"` opts a resource in.
pub fn is_opted_in(annotations: &BTreeMap<String, String>) -> bool {
    annotations
        .get(TRIGGER_ANNOTATION)
        .is_some_and(|value| value == "true")
}

pub fn trigger_config(annotations: &BTreeMap<String, String>) -> TriggerConfig {
    TriggerConfig {
        env: annotation_or(annotations, ENV_ANNOTATION, DEFAULT_ENV),
        branch: annotation_or(annotations, BRANCH_ANNOTATION, DEFAULT_BRANCH),
        project_id: annotation_or(annotations, PROJECT_ID_ANNOTATION, DEFAULT_PROJECT_ID),
    }
}

fn annotation_or(
    annotations: &BTreeMap<String, String>,
    key: &str,
    default: &str,
) -> Resolved<String> {
    match annotations.get(key) {
        Some(value) => Resolved::explicit(value.clone()),
        None => {
            debug!("Annotation {} not set, using default {}", key, default);
            Resolved::fallback(default.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn annotations(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_is_opted_in() {
        assert!(is_opted_in(&annotations(&[(TRIGGER_ANNOTATION, "true")])));
        assert!(!is_opted_in(&annotations(&[(TRIGGER_ANNOTATION, "True")])));
        assert!(!is_opted_in(&annotations(&[(TRIGGER_ANNOTATION, "yes")])));
        assert!(!is_opted_in(&annotations(&[(TRIGGER_ANNOTATION, "")])));
        assert!(!is_opted_in(&annotations(&[])));
    }

    #[test]
    fn test_trigger_config_defaults() {
        let config = trigger_config(&annotations(&[(TRIGGER_ANNOTATION, "true")]));
        assert_eq!(config.env, Resolved::fallback("default".to_string()));
        assert_eq!(config.branch, Resolved::fallback("default".to_string()));
        assert_eq!(config.project_id, Resolved::fallback("123456".to_string()));
    }

    #[test]
    fn test_trigger_config_from_annotations() {
        let config = trigger_config(&annotations(&[
            (ENV_ANNOTATION, "staging"),
            (BRANCH_ANNOTATION, "main"),
            (PROJECT_ID_ANNOTATION, "42"),
        ]));
        assert_eq!(config.env, Resolved::explicit("staging".to_string()));
        assert_eq!(config.branch, Resolved::explicit("main".to_string()));
        assert_eq!(config.project_id, Resolved::explicit("42".to_string()));
    }
}
