//! SQL script execution through `psql`.
//!
//! Peer authentication is used unless host, port and user are all supplied,
//! in which case the connection is explicit and the password (if any) is
//! handed over through `PGPASSWORD`, never on the command line.

use std::fmt;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use tokio::process::Command;

use crate::resilience::types::{ActionError, ExitSignal};

/// Connection parameters for one database.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct DbConnection {
    pub database: String,
    pub host: Option<String>,
    pub port: Option<u16>,
    pub user: Option<String>,
    pub password: Option<String>,
}

impl DbConnection {
    /// Local peer-authenticated connection.
    pub fn peer(database: impl Into<String>) -> Self {
        Self {
            database: database.into(),
            ..Default::default()
        }
    }

    /// Explicit host/port/user connection.
    pub fn explicit(
        database: impl Into<String>,
        host: impl Into<String>,
        port: u16,
        user: impl Into<String>,
        password: Option<String>,
    ) -> Self {
        Self {
            database: database.into(),
            host: Some(host.into()),
            port: Some(port),
            user: Some(user.into()),
            password,
        }
    }

    /// True when host, port and user are all present.
    pub fn uses_explicit_credentials(&self) -> bool {
        self.host.as_deref().is_some_and(|h| !h.is_empty())
            && self.port.is_some()
            && self.user.as_deref().is_some_and(|u| !u.is_empty())
    }
}

impl fmt::Debug for DbConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DbConnection")
            .field("database", &self.database)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("password", &self.password.as_ref().map(|_| "***"))
            .finish()
    }
}

/// A fully built `psql` invocation.
#[derive(Clone, PartialEq, Eq)]
pub struct SqlCommand {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub env: Vec<(String, String)>,
}

impl fmt::Debug for SqlCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let env: Vec<_> = self.env.iter().map(|(k, _)| (k.as_str(), "***")).collect();
        f.debug_struct("SqlCommand")
            .field("program", &self.program)
            .field("args", &self.args)
            .field("env", &env)
            .finish()
    }
}

/// Build the `psql` command that runs `script` against `conn`.
pub fn build_sql_command(psql: &Path, script: &Path, conn: &DbConnection) -> SqlCommand {
    let mut args: Vec<String> = vec!["-X".into(), "-q".into()];
    let mut env = Vec::new();

    if conn.uses_explicit_credentials() {
        if let (Some(host), Some(port), Some(user)) = (&conn.host, conn.port, &conn.user) {
            args.extend(["-h".to_string(), host.clone()]);
            args.extend(["-p".to_string(), port.to_string()]);
            args.extend(["-U".to_string(), user.clone()]);
        }
        if let Some(password) = &conn.password {
            env.push(("PGPASSWORD".to_string(), password.clone()));
        }
    }
    if !conn.database.is_empty() {
        args.extend(["-d".to_string(), conn.database.clone()]);
    }
    args.extend([
        "-v".to_string(),
        "ON_ERROR_STOP=1".to_string(),
        "-f".to_string(),
        script.display().to_string(),
    ]);

    SqlCommand {
        program: psql.to_path_buf(),
        args,
        env,
    }
}

/// Exit signal for a finished child process.
pub fn exit_signal_for(status: ExitStatus) -> ExitSignal {
    if let Some(code) = status.code() {
        return ExitSignal(code);
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return ExitSignal(128 + signal);
        }
    }
    ExitSignal::FAILURE
}

/// Run the command once. The child is killed if this future is dropped.
pub async fn run_sql_command(command: &SqlCommand) -> Result<(), ActionError> {
    let output = Command::new(&command.program)
        .args(&command.args)
        .envs(command.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .output()
        .await
        .map_err(|e| {
            let signal = if e.kind() == std::io::ErrorKind::NotFound {
                ExitSignal::UNAVAILABLE
            } else {
                ExitSignal::IO_ERROR
            };
            ActionError::new(signal, format!("failed to start {}: {}", command.program.display(), e))
        })?;

    if output.status.success() {
        return Ok(());
    }

    let stderr = String::from_utf8_lossy(&output.stderr);
    let detail = stderr
        .lines()
        .rev()
        .find(|line| !line.trim().is_empty())
        .unwrap_or("no error output")
        .trim()
        .to_string();
    Err(ActionError::new(exit_signal_for(output.status), detail))
}
