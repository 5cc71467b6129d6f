// Copyright (c) 2024-2026 The herd project developers
//
// SPDX-License-Identifier: Apache-2.0
//! Provider catalog: static metadata for the supported agent backends.

use serde::{Deserialize, Serialize};

/// Metadata for one model a provider can run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelInfo {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub capabilities: Vec<String>,
}

/// One agent backend as surfaced by `GET /api/providers`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderInfo {
    pub id: String,
    pub name: String,
    /// Whether the provider can actually be launched in this environment.
    #[serde(default)]
    pub available: bool,
    #[serde(default)]
    pub models: Vec<ModelInfo>,
}

#[derive(Debug, Deserialize)]
struct CatalogEntry {
    id: String,
    name: String,
    requires_env: Option<String>,
    #[serde(default)]
    models: Vec<ModelInfo>,
}

#[derive(Debug, Deserialize)]
struct CatalogFile {
    providers: Vec<CatalogEntry>,
}

fn bundled() -> Vec<CatalogEntry> {
    let yaml = include_str!("../providers.yaml");
    let file: CatalogFile = serde_yaml::from_str(yaml).expect("bundled providers.yaml must parse");
    file.providers
}

/// The full catalog with availability resolved against the process
/// environment: a provider with `requires_env` is available iff that
/// variable is set and non-empty.
pub fn providers() -> Vec<ProviderInfo> {
    bundled()
        .into_iter()
        .map(|entry| {
            let available = match &entry.requires_env {
                None => true,
                Some(var) => std::env::var(var).map(|v| !v.is_empty()).unwrap_or(false),
            };
            ProviderInfo {
                id: entry.id,
                name: entry.name,
                available,
                models: entry.models,
            }
        })
        .collect()
}

/// Look up one provider by id.
pub fn lookup(id: &str) -> Option<ProviderInfo> {
    providers().into_iter().find(|p| p.id == id)
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
