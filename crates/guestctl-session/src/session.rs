//! Session orchestration

use guestctl_actions::{capture_screenshot, ActionExecutor, BatchRunner};
use guestctl_core::{GuestConfig, GuestError, Result};
use guestctl_remote::{ConnectionManager, OpenSshTransport, Transport};
use guestctl_workspace::{Workspace, WorkspaceRegistry};
use tracing::{info, instrument};

use crate::{AuditLog, Operation, OperationOutput};

/// One connection, one registry, one audit log
///
/// Built once at startup and torn down with [`Session::shutdown`].
pub struct Session<T: Transport> {
    config: GuestConfig,
    conn: ConnectionManager<T>,
    registry: WorkspaceRegistry,
    audit: AuditLog,
}

impl Session<OpenSshTransport> {
    /// Open the remote connection described by `config`
    pub async fn connect(config: GuestConfig) -> Result<Self> {
        let conn = ConnectionManager::open(&config.connection).await?;
        Ok(Self::from_parts(config, conn))
    }
}

impl<T: Transport> Session<T> {
    /// Build a session over an already-established transport
    pub fn with_transport(transport: T, config: GuestConfig) -> Self {
        let conn = ConnectionManager::with_transport(transport, config.connection.clone());
        Self::from_parts(config, conn)
    }

    fn from_parts(config: GuestConfig, conn: ConnectionManager<T>) -> Self {
        let registry = WorkspaceRegistry::new(config.workspaces.root.clone());
        let audit = AuditLog::new(config.audit.max_param_chars);
        Self {
            config,
            conn,
            registry,
            audit,
        }
    }

    pub fn config(&self) -> &GuestConfig {
        &self.config
    }

    pub fn connection(&self) -> &ConnectionManager<T> {
        &self.conn
    }

    pub fn registry(&self) -> &WorkspaceRegistry {
        &self.registry
    }

    fn executor(&self) -> ActionExecutor<'_, T> {
        ActionExecutor::new(&self.conn, self.config.input.clone())
    }

    /// Run one operation and audit it
    ///
    /// The active workspace is read once and held until the audit line is
    /// written, so the operation and its record land in the same workspace
    /// even if a switch is requested meanwhile. A switch that succeeds is
    /// audited into the workspace it installed.
    #[instrument(skip(self, op), fields(op = op.name()))]
    pub async fn dispatch(&self, op: Operation) -> Result<OperationOutput> {
        let params = op.params();
        match &op {
            Operation::InitializeWorkspace { name, description } => {
                match self.registry.initialize(name, description).await {
                    Ok(ws) => {
                        let output = OperationOutput::Workspace(ws.summary());
                        self.audit
                            .record(Some(&ws), op.name(), &params, Ok(&output))
                            .await;
                        Ok(output)
                    }
                    Err(e) => self.switch_failed(&op, &params, e).await,
                }
            }

            Operation::LoadWorkspace { path } => match self.registry.load(path).await {
                Ok((ws, notes)) => {
                    let output = OperationOutput::Loaded {
                        workspace: ws.summary(),
                        notes,
                    };
                    self.audit
                        .record(Some(&ws), op.name(), &params, Ok(&output))
                        .await;
                    Ok(output)
                }
                Err(e) => self.switch_failed(&op, &params, e).await,
            },

            _ => {
                let active = self.registry.try_active().await;
                let workspace = active.as_deref();
                let result = self.run(&op, workspace).await;
                self.audit
                    .record(workspace, op.name(), &params, result.as_ref())
                    .await;
                result
            }
        }
    }

    async fn switch_failed(
        &self,
        op: &Operation,
        params: &[(&str, serde_json::Value)],
        err: GuestError,
    ) -> Result<OperationOutput> {
        let active = self.registry.try_active().await;
        self.audit
            .record(active.as_deref(), op.name(), params, Err(&err))
            .await;
        Err(err)
    }

    /// Everything except workspace switches
    ///
    /// Must not touch the registry lock again: the caller already holds it.
    async fn run(&self, op: &Operation, workspace: Option<&Workspace>) -> Result<OperationOutput> {
        let active = || workspace.ok_or(GuestError::NoActiveWorkspace);
        match op {
            Operation::ConnectionStatus => Ok(OperationOutput::Status(self.conn.status())),

            Operation::Execute { command } => {
                Ok(OperationOutput::Exec(self.conn.execute(command).await?))
            }

            Operation::Upload {
                local_path,
                remote_path,
            } => {
                self.conn.upload(local_path, remote_path).await?;
                Ok(OperationOutput::Ack {
                    message: format!("uploaded {} -> {}", local_path.display(), remote_path),
                })
            }

            Operation::Download {
                remote_path,
                local_path,
            } => {
                self.conn.download(remote_path, local_path).await?;
                Ok(OperationOutput::Ack {
                    message: format!("downloaded {} -> {}", remote_path, local_path.display()),
                })
            }

            Operation::InitializeWorkspace { .. } | Operation::LoadWorkspace { .. } => {
                Err(GuestError::Other(format!("{} is dispatched as a switch", op.name())))
            }

            Operation::ListWorkspaces => Ok(OperationOutput::Workspaces {
                workspaces: self.registry.list().await?,
            }),

            Operation::WorkspaceInfo => {
                let ws = active()?;
                Ok(OperationOutput::Info(ws.info().await?))
            }

            Operation::Log { message, level } => {
                let ws = active()?;
                ws.append_event(*level, message).await?;
                Ok(OperationOutput::Ack {
                    message: format!("logged at {}", level),
                })
            }

            Operation::ReadLogs { limit, level } => {
                let ws = active()?;
                Ok(OperationOutput::Logs(ws.read_events(*limit, *level).await?))
            }

            Operation::SaveResult { filename, content } => {
                let ws = active()?;
                Ok(OperationOutput::Saved {
                    path: ws.save_result(filename, content).await?,
                })
            }

            Operation::SaveAdvice { title, content } => {
                let ws = active()?;
                Ok(OperationOutput::Note(ws.save_note(title, content).await?))
            }

            Operation::ReadAdvice => {
                let ws = active()?;
                Ok(OperationOutput::Notes {
                    notes: ws.notes().await?,
                })
            }

            Operation::Move { .. }
            | Operation::Click { .. }
            | Operation::Type { .. }
            | Operation::Keys { .. }
            | Operation::Wait { .. } => {
                let step = op
                    .as_step()
                    .ok_or_else(|| GuestError::Other(format!("{} is not a UI step", op.name())))?;
                self.executor().perform(&step).await?;
                Ok(OperationOutput::Ack {
                    message: step.summary(),
                })
            }

            Operation::RunBatch { steps } => {
                let runner = BatchRunner::new(self.executor());
                Ok(OperationOutput::Batch(runner.run_values(steps).await?))
            }

            Operation::Capture => {
                let ws = active()?;
                Ok(OperationOutput::Artifact(
                    capture_screenshot(&self.conn, ws).await?,
                ))
            }

            Operation::Resolve { id } => {
                let ws = active()?;
                let data = ws.artifacts().resolve(id).await?;
                Ok(OperationOutput::Bytes {
                    id: id.clone(),
                    length: data.len(),
                    data,
                })
            }

            Operation::ListArtifacts => {
                let ws = active()?;
                Ok(OperationOutput::Artifacts {
                    artifacts: ws.artifacts().list().await?,
                })
            }
        }
    }

    /// Close the connection; safe to call more than once
    pub async fn shutdown(&self) -> Result<()> {
        info!("Shutting down session");
        self.conn.close().await
    }
}
