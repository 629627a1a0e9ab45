//! Parsing `provider:namespace/model#routing`-style model specs.

use std::sync::LazyLock;

use regex::Regex;

/// A parsed model specification: `provider:namespace/model#routing`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelSpec {
    pub provider: String,
    pub name: String,
    pub routing: Option<String>,
}

/// Error returned when a model spec string has no usable provider/name.
#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
#[error("could not parse model spec '{0}'")]
pub struct ModelSpecError(pub String);

static MODEL_SPEC_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(?:([-\w]+):)?(?:([-\w]+)/)?([-\w]+)(?:#([-\w,]+))?$").unwrap());

static CORE_NAME_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?:[-\w]*:)?(?:[-\w]*/)?([-\w]+)(?:#[-\w,]*)?").unwrap());

/// Parse a model spec of the shape `provider:namespace/model#routing`.
///
/// `namespace` and `routing` are both optional; `provider` defaults to the
/// bare model name's own value when no `provider:` segment is present (there
/// is then nothing left to call it but the model name itself).
pub fn parse_model_spec(spec: &str) -> Result<ModelSpec, ModelSpecError> {
    let caps = MODEL_SPEC_RE
        .captures(spec)
        .ok_or_else(|| ModelSpecError(spec.to_string()))?;
    let name = caps
        .get(3)
        .map(|m| m.as_str().to_string())
        .ok_or_else(|| ModelSpecError(spec.to_string()))?;
    let provider = caps
        .get(1)
        .map(|m| m.as_str().to_string())
        .unwrap_or_else(|| name.clone());
    let routing = caps.get(4).map(|m| m.as_str().to_string());
    Ok(ModelSpec {
        provider,
        name,
        routing,
    })
}

/// Extract the bare model identifier from any spec, dropping provider
/// namespace and routing suffix: `provider:namespace/model#routing -> model`.
///
/// Unlike [`parse_model_spec`] this never fails — it is used for display
/// purposes (prompt substitution, `[model] ` prefixes on proactive replies)
/// where any input is acceptable and a best-effort reduction is fine.
pub fn model_str_core(model: &str) -> String {
    match CORE_NAME_RE.captures(model) {
        Some(caps) => caps
            .get(1)
            .map(|m| m.as_str().to_string())
            .unwrap_or_else(|| model.to_string()),
        None => model.to_string(),
    }
}
