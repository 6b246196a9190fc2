//! Backend registry: the fixed mapping from use case to backend.

use std::collections::HashMap;

use turnstile_common::UseCase;

use crate::config::{AdapterKind, Config, ConfigError};

/// A configured inference backend.
#[derive(Debug, Clone, PartialEq)]
pub struct Backend {
    /// Logical name, reported as `selected_backend`.
    pub name: String,
    /// Base URL without a trailing slash.
    pub base_url: String,
    pub adapter: AdapterKind,
    pub model: Option<String>,
}

impl Backend {
    /// Join a path onto the base URL.
    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

/// Immutable after startup, so it is shared without locking.
#[derive(Debug, Clone)]
pub struct BackendRegistry {
    backends: HashMap<UseCase, Backend>,
}

impl BackendRegistry {
    /// Build the registry, checking every use case has a usable backend.
    pub fn from_config(config: &Config) -> Result<Self, ConfigError> {
        config.validate()?;
        let backends = UseCase::ALL
            .iter()
            .map(|&use_case| {
                let cfg = config.backend_for(use_case);
                let backend = Backend {
                    name: cfg.name,
                    base_url: cfg.base_url.trim_end_matches('/').to_string(),
                    adapter: cfg.adapter,
                    model: cfg.model,
                };
                (use_case, backend)
            })
            .collect();
        Ok(Self { backends })
    }

    /// Backend serving a use case.
    pub fn get(&self, use_case: UseCase) -> &Backend {
        // from_config fills every use case
        &self.backends[&use_case]
    }

    /// All entries in use-case order.
    pub fn entries(&self) -> impl Iterator<Item = (UseCase, &Backend)> {
        UseCase::ALL.into_iter().map(move |uc| (uc, self.get(uc)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{default_backend, BackendConfig};

    #[test]
    fn test_registry_covers_every_use_case() {
        let registry = BackendRegistry::from_config(&Config::default()).unwrap();
        assert_eq!(registry.entries().count(), UseCase::ALL.len());
        for (use_case, backend) in registry.entries() {
            assert_eq!(backend.adapter, AdapterKind::for_use_case(use_case));
        }
    }

    #[test]
    fn test_registry_trims_trailing_slash() {
        let mut config = Config::default();
        config.backends.insert(
            UseCase::Stt,
            BackendConfig {
                name: "whisper".to_string(),
                base_url: "http://stt:8002/".to_string(),
                adapter: AdapterKind::Transcription,
                model: None,
            },
        );
        let registry = BackendRegistry::from_config(&config).unwrap();
        assert_eq!(registry.get(UseCase::Stt).url("/transcribe"), "http://stt:8002/transcribe");
    }

    #[test]
    fn test_registry_rejects_invalid_config() {
        let mut config = Config::default();
        let mut backend = default_backend(UseCase::Stt);
        backend.adapter = AdapterKind::Synthesis;
        config.backends.insert(UseCase::Stt, backend);
        assert!(BackendRegistry::from_config(&config).is_err());
    }
}
