// Model auto-selection across API version namespaces
use std::collections::HashSet;
use std::sync::Arc;

use tracing::{debug, info, warn};

use super::{GenerationRequest, GenerationResponse, ModelBackend, ModelDescriptor, ModelError, GENERATE_CONTENT};

#[derive(Debug, thiserror::Error)]
pub enum SelectionError {
    #[error("no generation model available in namespaces {namespaces:?}")]
    Exhausted { namespaces: Vec<String> },

    #[error(transparent)]
    Fatal(#[from] ModelError),
}

/// Finds a working (namespace, model) pair and generates with it.
///
/// Namespaces are probed in order. Within a namespace, preferred models that are
/// actually listed go first, then everything else upstream advertises. A
/// "not found / unsupported" answer moves on to the next candidate; any other
/// failure ends the selection.
#[derive(Clone)]
pub struct ModelSelector {
    backend: Arc<dyn ModelBackend>,
    namespaces: Vec<String>,
    preferred: Vec<String>,
}

impl ModelSelector {
    pub fn new(backend: Arc<dyn ModelBackend>, namespaces: Vec<String>, preferred: Vec<String>) -> Self {
        Self {
            backend,
            namespaces,
            preferred,
        }
    }

    pub fn namespaces(&self) -> &[String] {
        &self.namespaces
    }

    pub async fn generate(&self, request: GenerationRequest) -> Result<GenerationResponse, SelectionError> {
        for namespace in &self.namespaces {
            let available = match self.backend.list_models(namespace).await {
                Ok(models) => models,
                Err(e) => {
                    warn!(namespace = %namespace, error = %e, "model listing failed; trying next namespace");
                    continue;
                }
            };

            let candidates = candidate_order(&self.preferred, &available);
            debug!(
                namespace = %namespace,
                candidates = ?candidates.iter().map(|m| m.name.as_str()).collect::<Vec<_>>(),
                "model candidates"
            );

            for candidate in candidates {
                if !candidate.supports(GENERATE_CONTENT) {
                    debug!(namespace = %namespace, model = %candidate.name, "model does not declare generateContent; skipping");
                    continue;
                }

                match self
                    .backend
                    .generate(namespace, &candidate.name, request.clone())
                    .await
                {
                    Ok(response) => {
                        info!(
                            namespace = %namespace,
                            model = %candidate.name,
                            total_tokens = response.usage.total_tokens,
                            "generation succeeded"
                        );
                        return Ok(response);
                    }
                    Err(e) if e.is_skippable() => {
                        info!(namespace = %namespace, model = %candidate.name, error = %e, "model unavailable; trying next");
                    }
                    Err(e) => {
                        warn!(namespace = %namespace, model = %candidate.name, error = %e, "generation failed; aborting selection");
                        return Err(SelectionError::Fatal(e));
                    }
                }
            }
        }

        Err(SelectionError::Exhausted {
            namespaces: self.namespaces.clone(),
        })
    }
}

/// Preferred models present in `available` (preference order), then the rest of
/// `available` (upstream order), without duplicates.
pub fn candidate_order<'a>(preferred: &[String], available: &'a [ModelDescriptor]) -> Vec<&'a ModelDescriptor> {
    let mut seen: HashSet<&str> = HashSet::new();
    let mut ordered = Vec::with_capacity(available.len());

    for name in preferred {
        if let Some(model) = available.iter().find(|m| &m.name == name) {
            if seen.insert(model.name.as_str()) {
                ordered.push(model);
            }
        }
    }

    for model in available {
        if seen.insert(model.name.as_str()) {
            ordered.push(model);
        }
    }

    ordered
}
