//! Run requests: what to execute, against which connector, under which name.
//!
//! The request layer hands the worker a [`RunTrigger`] (raw strings and
//! JSON). [`RunTrigger::into_request`] parses it into a [`RunRequest`]
//! before any side effect happens, so malformed identifiers never reach
//! the filesystem or the container runtime.

use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::staging::StagingMode;
use crate::types::ConnectorId;

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Prefix accepted in front of a connector UUID (`connectors/<uuid>`).
pub const CONNECTOR_PERMALINK_PREFIX: &str = "connectors/";

/// Tag used when an image reference omits one.
pub const DEFAULT_IMAGE_TAG: &str = "latest";

/// End-of-transmission byte appended to streamed standard input.
pub const END_OF_TRANSMISSION: u8 = 0x04;

/// Maximum length of a container name.
const MAX_CONTAINER_NAME_LEN: usize = 128;

// ---------------------------------------------------------------------------
// Operation kind
// ---------------------------------------------------------------------------

/// The kind of operation a run performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    /// Explicit connection check requested by a user.
    Check,
    /// Write a batch of records through a destination connector.
    Write,
    /// Background connectivity check; reuses staged config when present.
    #[serde(rename = "healthcheck")]
    HealthCheck,
}

impl OperationKind {
    /// Every kind, in a stable order.
    pub const ALL: [OperationKind; 3] = [Self::Check, Self::Write, Self::HealthCheck];

    /// Name used as the container name suffix and in logs.
    pub fn name(self) -> &'static str {
        match self {
            Self::Check => "check",
            Self::Write => "write",
            Self::HealthCheck => "healthcheck",
        }
    }

    /// Verb passed to the connector image as its first argument.
    pub fn verb(self) -> &'static str {
        match self {
            Self::Check | Self::HealthCheck => "check",
            Self::Write => "write",
        }
    }

    /// Whether this kind stages a catalog and streams records over stdin.
    pub fn is_write(self) -> bool {
        matches!(self, Self::Write)
    }

    /// How staged files are written on retried attempts.
    pub fn staging_mode(self) -> StagingMode {
        match self {
            Self::HealthCheck => StagingMode::WriteOnce,
            Self::Check | Self::Write => StagingMode::AlwaysOverwrite,
        }
    }

    /// Parse from [`OperationKind::name`].
    pub fn from_name(name: &str) -> Result<Self, CoreError> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.name() == name)
            .ok_or_else(|| {
                CoreError::Validation(format!(
                    "Unknown operation '{name}'. Must be one of: check, write, healthcheck"
                ))
            })
    }
}

impl std::fmt::Display for OperationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

// ---------------------------------------------------------------------------
// Image reference
// ---------------------------------------------------------------------------

/// Container image reference as supplied by the definition registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageRef {
    pub repository: String,
    pub tag: String,
}

impl ImageRef {
    pub fn new(repository: impl Into<String>, tag: impl Into<String>) -> Self {
        Self {
            repository: repository.into(),
            tag: tag.into(),
        }
    }

    /// Parse `repository[:tag]`.
    ///
    /// A colon that belongs to a registry port (`host:5000/repo`) is not
    /// mistaken for the tag separator. Digest references (`repo@sha256:..`)
    /// are rejected; runs are pulled by tag.
    pub fn parse(reference: &str) -> Result<Self, CoreError> {
        let reference = reference.trim();
        if reference.is_empty() {
            return Err(CoreError::InvalidIdentifier(
                "Image reference must not be empty".to_string(),
            ));
        }
        if reference.chars().any(char::is_whitespace) {
            return Err(CoreError::InvalidIdentifier(format!(
                "Image reference '{reference}' must not contain whitespace"
            )));
        }
        if reference.contains('@') {
            return Err(CoreError::InvalidIdentifier(format!(
                "Image reference '{reference}' must use a tag, not a digest"
            )));
        }

        let last_slash = reference.rfind('/').map_or(0, |i| i + 1);
        match reference[last_slash..].rfind(':') {
            Some(colon) => {
                let split = last_slash + colon;
                let (repository, tag) = (&reference[..split], &reference[split + 1..]);
                if repository.is_empty() || tag.is_empty() {
                    return Err(CoreError::InvalidIdentifier(format!(
                        "Image reference '{reference}' has an empty repository or tag"
                    )));
                }
                Ok(Self::new(repository, tag))
            }
            None => Ok(Self::new(reference, DEFAULT_IMAGE_TAG)),
        }
    }
}

impl std::fmt::Display for ImageRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.repository, self.tag)
    }
}

// ---------------------------------------------------------------------------
// Identifier helpers
// ---------------------------------------------------------------------------

/// Parse a connector identifier, bare (`<uuid>`) or as a permalink
/// (`connectors/<uuid>`).
pub fn parse_connector_id(raw: &str) -> Result<ConnectorId, CoreError> {
    let uid = raw.strip_prefix(CONNECTOR_PERMALINK_PREFIX).unwrap_or(raw);
    uuid::Uuid::parse_str(uid).map_err(|e| {
        CoreError::InvalidIdentifier(format!("Unable to parse connector id '{raw}': {e}"))
    })
}

/// Deterministic container name for a connector and operation kind.
pub fn container_name_for(connector_id: ConnectorId, kind: OperationKind) -> String {
    format!("{connector_id}.{}", kind.name())
}

/// Validate a caller-chosen container name.
///
/// Rules follow the container runtime's own naming constraint:
/// - Must not be empty or exceed `MAX_CONTAINER_NAME_LEN` characters.
/// - Must start with an ASCII alphanumeric character.
/// - Must contain only alphanumeric, underscore, dot, or hyphen characters.
pub fn validate_container_name(name: &str) -> Result<(), CoreError> {
    if name.is_empty() {
        return Err(CoreError::Validation(
            "Container name must not be empty".to_string(),
        ));
    }
    if name.len() > MAX_CONTAINER_NAME_LEN {
        return Err(CoreError::Validation(format!(
            "Container name must not exceed {MAX_CONTAINER_NAME_LEN} characters"
        )));
    }
    if !name.starts_with(|c: char| c.is_ascii_alphanumeric()) {
        return Err(CoreError::Validation(format!(
            "Container name '{name}' must start with an alphanumeric character"
        )));
    }
    if !name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.' || c == '-')
    {
        return Err(CoreError::Validation(format!(
            "Container name '{name}' may only contain alphanumeric, underscore, dot, or hyphen characters"
        )));
    }
    Ok(())
}

/// Encode JSON records as newline-delimited JSON for the container's stdin.
pub fn encode_messages(records: &[serde_json::Value]) -> Result<Vec<u8>, CoreError> {
    let mut out = Vec::new();
    for record in records {
        serde_json::to_writer(&mut out, record)
            .map_err(|e| CoreError::Internal(format!("Unable to encode record: {e}")))?;
        out.push(b'\n');
    }
    Ok(out)
}

// ---------------------------------------------------------------------------
// Run trigger / request
// ---------------------------------------------------------------------------

/// Raw run parameters as supplied by the request layer.
#[derive(Debug, Clone, Deserialize)]
pub struct RunTrigger {
    pub owner_id: String,
    pub connector_id: String,
    pub image: String,
    pub operation: OperationKind,
    /// Overrides the derived `<connector-id>.<operation>` name.
    #[serde(default)]
    pub container_name: Option<String>,
    /// Configured catalog, required for write runs.
    #[serde(default)]
    pub catalog: Option<serde_json::Value>,
    /// Records streamed to the container's stdin on write runs.
    #[serde(default)]
    pub messages: Option<Vec<serde_json::Value>>,
}

impl RunTrigger {
    /// Parse and validate into a [`RunRequest`].
    pub fn into_request(self) -> Result<RunRequest, CoreError> {
        let connector_id = parse_connector_id(&self.connector_id)?;
        let image = ImageRef::parse(&self.image)?;
        let mut request = RunRequest::new(self.owner_id, connector_id, image, self.operation)?;

        if let Some(name) = self.container_name {
            request = request.with_container_name(name)?;
        }
        if let Some(catalog) = self.catalog {
            let bytes = serde_json::to_vec(&catalog)
                .map_err(|e| CoreError::Internal(format!("Unable to encode catalog: {e}")))?;
            request = request.with_catalog(bytes);
        }
        if let Some(messages) = self.messages {
            request = request.with_messages(encode_messages(&messages)?);
        }

        request.validate()?;
        Ok(request)
    }
}

/// One logical operation, parsed and ready to execute.
///
/// Immutable once built; retried attempts of the same operation carry the
/// same `container_name`, which is what the dispatch cache keys on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunRequest {
    pub owner_id: String,
    pub connector_id: ConnectorId,
    pub image: ImageRef,
    pub container_name: String,
    pub kind: OperationKind,
    pub catalog: Option<Vec<u8>>,
    pub messages: Option<Vec<u8>>,
}

impl RunRequest {
    /// Build a request with the derived container name.
    pub fn new(
        owner_id: impl Into<String>,
        connector_id: ConnectorId,
        image: ImageRef,
        kind: OperationKind,
    ) -> Result<Self, CoreError> {
        let owner_id = owner_id.into();
        if owner_id.trim().is_empty() {
            return Err(CoreError::InvalidIdentifier(
                "Owner id must not be empty".to_string(),
            ));
        }
        Ok(Self {
            owner_id,
            connector_id,
            image,
            container_name: container_name_for(connector_id, kind),
            kind,
            catalog: None,
            messages: None,
        })
    }

    pub fn with_container_name(mut self, name: impl Into<String>) -> Result<Self, CoreError> {
        let name = name.into();
        validate_container_name(&name)?;
        self.container_name = name;
        Ok(self)
    }

    pub fn with_catalog(mut self, catalog: Vec<u8>) -> Self {
        self.catalog = Some(catalog);
        self
    }

    pub fn with_messages(mut self, messages: Vec<u8>) -> Self {
        self.messages = Some(messages);
        self
    }

    /// File stem under which this run's config/catalog are staged.
    pub fn staging_name(&self) -> &str {
        &self.container_name
    }

    /// Cross-field checks: write runs need a catalog, other kinds take no
    /// catalog or stdin payload.
    pub fn validate(&self) -> Result<(), CoreError> {
        validate_container_name(&self.container_name)?;
        if self.kind.is_write() {
            if self.catalog.is_none() {
                return Err(CoreError::Validation(
                    "Write runs require a configured catalog".to_string(),
                ));
            }
        } else if self.catalog.is_some() || self.messages.is_some() {
            return Err(CoreError::Validation(format!(
                "'{}' runs do not accept a catalog or messages",
                self.kind
            )));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
