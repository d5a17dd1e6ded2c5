//! Resilient operation facade.
//!
//! Each method checks its preconditions, names the circuit, resolves the
//! per-class tuning from config and hands one work unit to the shared
//! registry. Precondition failures return `InvalidInput` before the registry
//! is consulted, so they never count against a circuit.

use reqwest::header::{HeaderName, HeaderValue};
use reqwest::Client;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use crate::config::schema::ResilienceConfig;
use crate::operations::database::{build_sql_command, run_sql_command, DbConnection};
use crate::operations::files::{FileOperation, FileOperationKind};
use crate::operations::http::{call_api, download_to_file, parse_http_url, ApiRequest, ApiResponse};
use crate::operations::inputs::{FsInputValidator, InputKind, InputValidator};
use crate::resilience::circuit_breaker::{CircuitBreakerRegistry, WorkUnit};
use crate::resilience::types::{ResilienceError, ResilienceResult};

/// Breaker-protected download, API, SQL and file operations.
#[derive(Clone)]
pub struct ResilientOps {
    registry: Arc<CircuitBreakerRegistry>,
    client: Client,
    validator: Arc<dyn InputValidator>,
    config: Arc<ResilienceConfig>,
}

impl ResilientOps {
    /// Facade with its own registry, HTTP client and filesystem validator.
    pub fn new(config: ResilienceConfig) -> Self {
        let registry = Arc::new(CircuitBreakerRegistry::new(config.breaker_tuning().into()));
        Self::with_parts(config, registry, Client::new(), Arc::new(FsInputValidator))
    }

    pub fn with_parts(
        config: ResilienceConfig,
        registry: Arc<CircuitBreakerRegistry>,
        client: Client,
        validator: Arc<dyn InputValidator>,
    ) -> Self {
        Self {
            registry,
            client,
            validator,
            config: Arc::new(config),
        }
    }

    pub fn registry(&self) -> &Arc<CircuitBreakerRegistry> {
        &self.registry
    }

    pub fn config(&self) -> &ResilienceConfig {
        &self.config
    }

    /// Download `url` to `destination`, returning the byte count.
    pub async fn download(
        &self,
        url: &str,
        destination: impl AsRef<Path>,
        timeout: Option<Duration>,
    ) -> ResilienceResult<u64> {
        let parsed = parse_http_url(url)?;
        let destination = destination.as_ref();
        if destination.as_os_str().is_empty() {
            return Err(ResilienceError::InvalidInput(format!(
                "download of {} requires a destination",
                url
            )));
        }

        let name = format!("download_{}", url.trim());
        let tuning = self.config.download_tuning().with_timeout(timeout);
        let client = &self.client;

        tracing::info!(operation = %name, destination = %destination.display(), "Starting download");
        self.registry
            .execute(
                &name,
                WorkUnit::new(|deadline| download_to_file(client, &parsed, destination, deadline)).tuning(tuning),
            )
            .await
    }

    /// Perform an API call, returning status and body of a 2xx response.
    pub async fn api_call(&self, request: ApiRequest, timeout: Option<Duration>) -> ResilienceResult<ApiResponse> {
        let parsed = parse_http_url(&request.url)?;
        for (name, value) in &request.headers {
            HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| ResilienceError::InvalidInput(format!("invalid header name '{}': {}", name, e)))?;
            HeaderValue::from_str(value)
                .map_err(|e| ResilienceError::InvalidInput(format!("invalid value for header '{}': {}", name, e)))?;
        }

        let name = format!("api_call_{}", request.url.trim());
        let tuning = self.config.api_tuning().with_timeout(timeout);
        let client = &self.client;
        let request = &request;

        tracing::debug!(operation = %name, method = %request.method, "Calling API");
        self.registry
            .execute(
                &name,
                WorkUnit::new(|deadline| call_api(client, request, &parsed, deadline)).tuning(tuning),
            )
            .await
    }

    /// Run a SQL script with `psql`.
    pub async fn execute_sql(
        &self,
        script: impl AsRef<Path>,
        connection: &DbConnection,
        timeout: Option<Duration>,
    ) -> ResilienceResult<()> {
        let script = script.as_ref();
        if script.as_os_str().is_empty() {
            return Err(ResilienceError::InvalidInput("SQL script path must not be empty".to_string()));
        }
        if !self.validator.validate(script, InputKind::SqlScript) {
            return Err(ResilienceError::InvalidInput(format!(
                "SQL script {} is missing, empty or not a regular file",
                script.display()
            )));
        }

        let name = format!("database_operation_{}", script.display());
        let tuning = self.config.database_tuning().with_timeout(timeout);
        let command = build_sql_command(&self.config.database.psql_path, script, connection);

        tracing::info!(
            operation = %name,
            database = %connection.database,
            explicit_credentials = connection.uses_explicit_credentials(),
            "Executing SQL script"
        );
        self.registry
            .execute(&name, WorkUnit::new(|_| run_sql_command(&command)).tuning(tuning))
            .await
    }

    /// Run one file operation through the breaker. Copy and move sources
    /// must exist; a missing delete target is not an error.
    pub async fn file_operation(&self, op: &FileOperation) -> ResilienceResult<()> {
        if op.kind().requires_destination() && !self.validator.validate(op.source(), InputKind::File) {
            return Err(ResilienceError::InvalidInput(format!(
                "{} source {} does not exist",
                op.kind(),
                op.source().display()
            )));
        }
        let name = op.operation_name();
        let tuning = self.config.file_ops_tuning().into();

        tracing::debug!(operation = %name, "Running file operation");
        self.registry
            .execute(&name, WorkUnit::new(|_| op.run()).tuning(tuning))
            .await
    }

    /// Parse `verb` (`copy`, `move`, `delete`) and run the operation.
    pub async fn file_operation_verb(
        &self,
        verb: &str,
        source: impl Into<PathBuf>,
        destination: Option<PathBuf>,
    ) -> ResilienceResult<()> {
        let kind: FileOperationKind = verb.parse()?;
        let op = FileOperation::new(kind, source, destination)?;
        self.file_operation(&op).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resilience::circuit_breaker::CircuitState;
    use std::io::Write;

    struct RejectAll;

    impl InputValidator for RejectAll {
        fn validate(&self, _path: &Path, _kind: InputKind) -> bool {
            false
        }
    }

    fn ops() -> ResilientOps {
        ResilientOps::new(ResilienceConfig::default())
    }

    #[tokio::test]
    async fn test_bad_urls_never_create_records() {
        let ops = ops();
        for url in ["", "not a url", "ftp://example.com/file"] {
            let err = ops.download(url, "/tmp/out", None).await.unwrap_err();
            assert!(matches!(err, ResilienceError::InvalidInput(_)));
            let err = ops.api_call(ApiRequest::get(url), None).await.unwrap_err();
            assert!(matches!(err, ResilienceError::InvalidInput(_)));
        }
        assert!(ops.registry().is_empty());
    }

    #[tokio::test]
    async fn test_bad_header_is_invalid_input() {
        let ops = ops();
        let request = ApiRequest::get("http://127.0.0.1:9/api").header("bad header", "x");
        let err = ops.api_call(request, None).await.unwrap_err();
        assert!(matches!(err, ResilienceError::InvalidInput(_)));
        assert!(ops.registry().is_empty());
    }

    #[tokio::test]
    async fn test_sql_script_rejected_by_validator() {
        let config = ResilienceConfig::default();
        let registry = Arc::new(CircuitBreakerRegistry::new(config.breaker_tuning().into()));
        let ops = ResilientOps::with_parts(config, registry, Client::new(), Arc::new(RejectAll));

        let err = ops
            .execute_sql("/srv/sql/load.sql", &DbConnection::peer("warehouse"), None)
            .await
            .unwrap_err();
        assert!(matches!(err, ResilienceError::InvalidInput(_)));
        assert!(ops.registry().is_empty());
    }

    #[tokio::test]
    async fn test_empty_sql_script_is_invalid() {
        let mut script = tempfile::NamedTempFile::new().unwrap();
        let ops = ops();
        let err = ops
            .execute_sql(script.path(), &DbConnection::peer("warehouse"), None)
            .await
            .unwrap_err();
        assert!(matches!(err, ResilienceError::InvalidInput(_)));

        writeln!(script, "SELECT 1;").unwrap();
        assert!(FsInputValidator.validate(script.path(), InputKind::SqlScript));
    }

    #[tokio::test]
    async fn test_sql_failure_counts_against_circuit() {
        let mut script = tempfile::NamedTempFile::new().unwrap();
        writeln!(script, "SELECT 1;").unwrap();

        let mut config = ResilienceConfig::default();
        config.database.psql_path = PathBuf::from("/nonexistent/psql-binary");
        let ops = ResilientOps::new(config);

        let err = ops
            .execute_sql(script.path(), &DbConnection::peer("warehouse"), None)
            .await
            .unwrap_err();
        assert!(err.is_transient());

        let name = format!("database_operation_{}", script.path().display());
        let status = ops.registry().status(&name);
        assert_eq!(status.state, CircuitState::Closed);
        assert_eq!(status.failure_count, 1);
    }

    #[tokio::test]
    async fn test_unsupported_verb() {
        let ops = ops();
        let err = ops.file_operation_verb("chmod", "/tmp/x", None).await.unwrap_err();
        assert!(matches!(err, ResilienceError::InvalidInput(_)));
        let err = ops.file_operation_verb("copy", "/tmp/x", None).await.unwrap_err();
        assert!(matches!(err, ResilienceError::InvalidInput(_)));
        assert!(ops.registry().is_empty());
    }

    #[tokio::test]
    async fn test_missing_copy_source_is_invalid_input() {
        let dir = tempfile::tempdir().unwrap();
        let ops = ops();
        let op = FileOperation::copy(dir.path().join("missing.txt"), dir.path().join("b.txt")).unwrap();
        let err = ops.file_operation(&op).await.unwrap_err();
        assert!(matches!(err, ResilienceError::InvalidInput(_)));
        assert!(ops.registry().is_empty());

        // Deleting a missing path still goes through the breaker.
        ops.file_operation_verb("delete", dir.path().join("missing.txt"), None)
            .await
            .unwrap();
        assert_eq!(ops.registry().len(), 1);
    }

    #[tokio::test]
    async fn test_file_copy_records_success() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("a.txt");
        std::fs::write(&source, "hello").unwrap();
        let dest = dir.path().join("b.txt");

        let ops = ops();
        ops.file_operation_verb("copy", &source, Some(dest.clone())).await.unwrap();
        assert_eq!(std::fs::read_to_string(&dest).unwrap(), "hello");

        let name = format!("file_operation_copy_{}", source.display());
        assert_eq!(ops.registry().status(&name).state, CircuitState::Closed);
        assert_eq!(ops.registry().len(), 1);
    }
}
