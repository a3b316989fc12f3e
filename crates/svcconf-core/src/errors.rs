use svcconf_core_types::RequestId;
use thiserror::Error;

/// Result type alias using the canonical ExError
pub type Result<T> = std::result::Result<T, ExError>;

/// Result type of every `RepositoryClient` call
pub type RepoResult<T> = std::result::Result<T, RepoError>;

// ========== Error Facility ==========

/// Canonical error kind taxonomy
///
/// Each kind maps to a stable error code and to exactly one
/// [`Disposition`], which decides how far a failure propagates during
/// reconciliation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExErrorKind {
    // Fatal to the whole top-level call
    Unreachable,
    OutOfResources,
    Persistence,
    Serialization,
    Io,
    Internal,

    // Local to the entity being processed
    PermissionDenied,
    ReadOnlyBackend,
    BackendAccessDenied,

    // Transient
    Conflict,
    Deleted,

    // Structural (bundle is malformed for this target)
    InvalidName,
    InvalidType,
    TypeRequired,
    NotFound,
    InvalidInput,

    // Not an error for the resolver
    AlreadyExists,
}

/// How the engine reacts to an error of a given kind
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Abort the remaining work of the top-level call
    Fatal,
    /// Freeze this entity's progress, keep going with siblings
    SkipEntity,
    /// Concurrent mutation; skip and report the entity as busy
    Busy,
    /// Malformed input; skip the group or entity, requires a corrected bundle
    Structural,
    /// Someone else created it first; use theirs
    Adopt,
}

impl ExErrorKind {
    /// Get the stable error code for this kind
    pub fn code(&self) -> &'static str {
        match self {
            ExErrorKind::Unreachable => "ERR_UNREACHABLE",
            ExErrorKind::OutOfResources => "ERR_OUT_OF_RESOURCES",
            ExErrorKind::Persistence => "ERR_PERSISTENCE",
            ExErrorKind::Serialization => "ERR_SERIALIZATION",
            ExErrorKind::Io => "ERR_IO",
            ExErrorKind::Internal => "ERR_INTERNAL",
            ExErrorKind::PermissionDenied => "ERR_PERMISSION_DENIED",
            ExErrorKind::ReadOnlyBackend => "ERR_READ_ONLY_BACKEND",
            ExErrorKind::BackendAccessDenied => "ERR_BACKEND_ACCESS_DENIED",
            ExErrorKind::Conflict => "ERR_CONFLICT",
            ExErrorKind::Deleted => "ERR_DELETED",
            ExErrorKind::InvalidName => "ERR_INVALID_NAME",
            ExErrorKind::InvalidType => "ERR_INVALID_TYPE",
            ExErrorKind::TypeRequired => "ERR_TYPE_REQUIRED",
            ExErrorKind::NotFound => "ERR_NOT_FOUND",
            ExErrorKind::InvalidInput => "ERR_INVALID_INPUT",
            ExErrorKind::AlreadyExists => "ERR_ALREADY_EXISTS",
        }
    }

    pub fn disposition(&self) -> Disposition {
        match self {
            ExErrorKind::Unreachable
            | ExErrorKind::OutOfResources
            | ExErrorKind::Persistence
            | ExErrorKind::Serialization
            | ExErrorKind::Io
            | ExErrorKind::Internal => Disposition::Fatal,
            ExErrorKind::PermissionDenied
            | ExErrorKind::ReadOnlyBackend
            | ExErrorKind::BackendAccessDenied => Disposition::SkipEntity,
            ExErrorKind::Conflict | ExErrorKind::Deleted => Disposition::Busy,
            ExErrorKind::InvalidName
            | ExErrorKind::InvalidType
            | ExErrorKind::TypeRequired
            | ExErrorKind::NotFound
            | ExErrorKind::InvalidInput => Disposition::Structural,
            ExErrorKind::AlreadyExists => Disposition::Adopt,
        }
    }

    pub fn is_fatal(&self) -> bool {
        self.disposition() == Disposition::Fatal
    }
}

/// Canonical structured error type
///
/// Carries the classification used by the engine plus the repository
/// coordinates (entity, property group, property) where it happened.
#[derive(Debug, Clone)]
pub struct ExError {
    kind: ExErrorKind,
    op: Option<String>,
    entity: Option<String>,
    pg: Option<String>,
    property: Option<String>,
    request_id: Option<RequestId>,
    message: String,
}

impl ExError {
    pub fn new(kind: ExErrorKind) -> Self {
        Self {
            kind,
            op: None,
            entity: None,
            pg: None,
            property: None,
            request_id: None,
            message: String::new(),
        }
    }

    /// Add operation context
    pub fn with_op(mut self, op: impl Into<String>) -> Self {
        self.op = Some(op.into());
        self
    }

    /// Add the FMRI of the entity being processed
    pub fn with_entity(mut self, fmri: impl Into<String>) -> Self {
        self.entity = Some(fmri.into());
        self
    }

    /// Add the property group name
    pub fn with_pg(mut self, pg: impl Into<String>) -> Self {
        self.pg = Some(pg.into());
        self
    }

    /// Add the property name
    pub fn with_property(mut self, property: impl Into<String>) -> Self {
        self.property = Some(property.into());
        self
    }

    pub fn with_request_id(mut self, request_id: RequestId) -> Self {
        self.request_id = Some(request_id);
        self
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = message.into();
        self
    }

    pub fn or_op(mut self, op: impl Into<String>) -> Self {
        if self.op.is_none() {
            self.op = Some(op.into());
        }
        self
    }

    /// Fill in the entity only if a deeper layer did not already set it
    pub fn or_entity(mut self, fmri: impl Into<String>) -> Self {
        if self.entity.is_none() {
            self.entity = Some(fmri.into());
        }
        self
    }

    /// Fill in the property group only if a deeper layer did not already set it
    pub fn or_pg(mut self, pg: impl Into<String>) -> Self {
        if self.pg.is_none() {
            self.pg = Some(pg.into());
        }
        self
    }

    pub fn kind(&self) -> ExErrorKind {
        self.kind
    }

    pub fn code(&self) -> &'static str {
        self.kind.code()
    }

    pub fn disposition(&self) -> Disposition {
        self.kind.disposition()
    }

    /// Whether this error aborts the whole top-level call
    pub fn is_fatal(&self) -> bool {
        self.kind.is_fatal()
    }

    pub fn op(&self) -> Option<&str> {
        self.op.as_deref()
    }

    pub fn entity(&self) -> Option<&str> {
        self.entity.as_deref()
    }

    pub fn pg(&self) -> Option<&str> {
        self.pg.as_deref()
    }

    pub fn property(&self) -> Option<&str> {
        self.property.as_deref()
    }

    pub fn request_id(&self) -> Option<&RequestId> {
        self.request_id.as_ref()
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl std::fmt::Display for ExError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}]", self.code())?;
        if let Some(op) = &self.op {
            write!(f, " in operation '{}'", op)?;
        }
        if !self.message.is_empty() {
            write!(f, ": {}", self.message)?;
        }
        if let Some(entity) = &self.entity {
            write!(f, " (entity: {})", entity)?;
        }
        if let Some(pg) = &self.pg {
            write!(f, " (pg: {})", pg)?;
        }
        if let Some(property) = &self.property {
            write!(f, " (property: {})", property)?;
        }
        Ok(())
    }
}

impl std::error::Error for ExError {}

// ========== End Error Facility ==========

/// Tagged failure of a single repository call
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RepoError {
    /// Connection to the repository backend was lost
    #[error("Repository unreachable: {reason}")]
    Unreachable { reason: String },

    /// Backend is out of memory or otherwise overloaded
    #[error("Repository out of resources")]
    NoResources,

    #[error("Permission denied: {what}")]
    PermissionDenied { what: String },

    #[error("Repository backend is read-only")]
    ReadOnly,

    #[error("Repository backend refused access: {reason}")]
    BackendAccess { reason: String },

    #[error("Not found: {what}")]
    NotFound { what: String },

    #[error("Already exists: {what}")]
    AlreadyExists { what: String },

    /// The object was removed since it was last read
    #[error("Deleted concurrently: {what}")]
    Deleted { what: String },

    #[error("Invalid name: {name}")]
    InvalidName { name: String },

    #[error("Invalid type: {reason}")]
    InvalidType { reason: String },

    /// Backend failure with no finer classification
    #[error("Backend error: {message}")]
    Backend { message: String },
}

impl RepoError {
    pub fn not_found(what: impl Into<String>) -> Self {
        RepoError::NotFound { what: what.into() }
    }

    pub fn deleted(what: impl Into<String>) -> Self {
        RepoError::Deleted { what: what.into() }
    }

    pub fn already_exists(what: impl Into<String>) -> Self {
        RepoError::AlreadyExists { what: what.into() }
    }

    pub fn invalid_type(reason: impl Into<String>) -> Self {
        RepoError::InvalidType {
            reason: reason.into(),
        }
    }

    pub fn kind(&self) -> ExErrorKind {
        match self {
            RepoError::Unreachable { .. } => ExErrorKind::Unreachable,
            RepoError::NoResources => ExErrorKind::OutOfResources,
            RepoError::PermissionDenied { .. } => ExErrorKind::PermissionDenied,
            RepoError::ReadOnly => ExErrorKind::ReadOnlyBackend,
            RepoError::BackendAccess { .. } => ExErrorKind::BackendAccessDenied,
            RepoError::NotFound { .. } => ExErrorKind::NotFound,
            RepoError::AlreadyExists { .. } => ExErrorKind::AlreadyExists,
            RepoError::Deleted { .. } => ExErrorKind::Deleted,
            RepoError::InvalidName { .. } => ExErrorKind::InvalidName,
            RepoError::InvalidType { .. } => ExErrorKind::InvalidType,
            RepoError::Backend { .. } => ExErrorKind::Persistence,
        }
    }
}

impl From<RepoError> for ExError {
    fn from(err: RepoError) -> Self {
        let kind = err.kind();
        ExError::new(kind).with_message(err.to_string())
    }
}

impl From<serde_json::Error> for ExError {
    fn from(err: serde_json::Error) -> Self {
        ExError::new(ExErrorKind::Serialization).with_message(err.to_string())
    }
}

/// Attach operation and entity context to a repository failure
pub trait RepoResultExt<T> {
    fn in_op(self, op: &str, entity: &str) -> Result<T>;
}

impl<T> RepoResultExt<T> for RepoResult<T> {
    fn in_op(self, op: &str, entity: &str) -> Result<T> {
        self.map_err(|e| ExError::from(e).with_op(op).with_entity(entity))
    }
}
