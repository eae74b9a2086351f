use std::{collections::HashMap, path::Path};

use anyhow::{anyhow, Context, Result};
use serde_json::Value;

const OPENAPI_HTTP_METHODS: &[&str] = &[
    "get", "put", "post", "delete", "options", "head", "patch", "trace",
];

/// One `operationId` resolved to its HTTP method and path template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpenApiOperation {
    pub operation_id: String,
    pub method: String,
    pub path: String,
}

/// Lookup table from `operationId` to method/path, built from an OpenAPI document.
#[derive(Debug, Clone, Default)]
pub struct OpenApiIndex {
    operations: Vec<OpenApiOperation>,
    index: HashMap<String, usize>,
}

impl OpenApiIndex {
    /// Indexes every operation under `paths` that declares an `operationId`.
    pub fn from_document(document: &Value) -> Result<Self> {
        let paths = document
            .get("paths")
            .and_then(Value::as_object)
            .ok_or_else(|| anyhow!("openapi document is missing a 'paths' object"))?;

        let mut operations = Vec::new();
        let mut index = HashMap::new();
        for (path, item) in paths {
            let Some(item) = item.as_object() else {
                continue;
            };
            for method in OPENAPI_HTTP_METHODS {
                let Some(operation_id) = item
                    .get(*method)
                    .and_then(|operation| operation.get("operationId"))
                    .and_then(Value::as_str)
                    .map(str::trim)
                    .filter(|id| !id.is_empty())
                else {
                    continue;
                };
                if index.contains_key(operation_id) {
                    continue;
                }
                index.insert(operation_id.to_string(), operations.len());
                operations.push(OpenApiOperation {
                    operation_id: operation_id.to_string(),
                    method: method.to_ascii_uppercase(),
                    path: path.clone(),
                });
            }
        }
        Ok(Self { operations, index })
    }

    /// Resolves an operation id, exact match first, then case-insensitively.
    pub fn resolve(&self, operation_id: &str) -> Option<&OpenApiOperation> {
        let operation_id = operation_id.trim();
        if let Some(position) = self.index.get(operation_id) {
            return self.operations.get(*position);
        }
        self.operations
            .iter()
            .find(|operation| operation.operation_id.eq_ignore_ascii_case(operation_id))
    }

    pub fn operations(&self) -> &[OpenApiOperation] {
        &self.operations
    }

    pub fn len(&self) -> usize {
        self.operations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }
}

/// Reads and indexes an OpenAPI JSON document from disk.
pub fn load_openapi_index(path: &Path) -> Result<OpenApiIndex> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read openapi document {}", path.display()))?;
    let document = serde_json::from_str::<Value>(&raw)
        .with_context(|| format!("failed to parse openapi document {}", path.display()))?;
    OpenApiIndex::from_document(&document)
        .with_context(|| format!("failed to index openapi document {}", path.display()))
}
