use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use crate::config::AppConfig;
use crate::diagnostics::{BuildOutcome, Diagnostic, DiagnosticKind};
use crate::exec::{BuildCtx, BuildStep, ProgressSink};
use crate::project::ProjectDescriptor;
use crate::source;
use crate::stages;
use crate::toolchain::{self, ToolchainPaths};
use crate::workspace::{BuildLock, BuildWorkspace};

/// Sequences the five build stages for one project. Stages never call each
/// other; the controller owns ordering, the workspace, progress reporting
/// and the mapping of any stage failure into the terminal outcome.
pub struct BuildController {
    project: ProjectDescriptor,
    toolchain: ToolchainPaths,
    keystore: Option<PathBuf>,
    ctx: BuildCtx,
}

impl BuildController {
    pub fn new(
        project: ProjectDescriptor,
        toolchain: ToolchainPaths,
        keystore: Option<PathBuf>,
        sink: Arc<dyn ProgressSink>,
    ) -> Self {
        Self {
            project,
            toolchain,
            keystore,
            ctx: BuildCtx::new(sink),
        }
    }

    /// Cooperative cancellation handle; checked between stages.
    pub fn ctx(&self) -> &BuildCtx {
        &self.ctx
    }

    /// Runs the pipeline to completion. Never panics out: any fault
    /// escaping a stage is converted into a single diagnostic here.
    pub fn build(&self) -> BuildOutcome {
        let start = Instant::now();
        let mut diagnostics = Vec::new();

        let artifact = match panic::catch_unwind(AssertUnwindSafe(|| {
            self.run_pipeline(&mut diagnostics)
        })) {
            Ok(Ok(artifact)) => artifact,
            Ok(Err(e)) => {
                // A cancel racing a running tool surfaces as a plain error
                // from the stage; report it as a cancellation, not a fault.
                if self.ctx.cancelled() {
                    diagnostics.push(Diagnostic::error(
                        DiagnosticKind::Cancelled,
                        "build cancelled",
                    ));
                } else {
                    diagnostics.push(Diagnostic::error(DiagnosticKind::Internal, e.to_string()));
                }
                None
            }
            Err(payload) => {
                let msg = payload
                    .downcast_ref::<&str>()
                    .map(|s| (*s).to_string())
                    .or_else(|| payload.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".into());
                diagnostics.push(Diagnostic::error(
                    DiagnosticKind::Internal,
                    format!("build pipeline panicked: {msg}"),
                ));
                None
            }
        };

        let success = artifact.is_some();
        let elapsed_ms = start.elapsed().as_millis();
        if success {
            self.ctx.enter_step(BuildStep::Done, "build finished");
        }
        tracing::info!(success, elapsed_ms, "build complete");
        BuildOutcome {
            success,
            artifact,
            diagnostics,
            elapsed_ms,
        }
    }

    /// Returns the final artifact path on success, `None` on any fatal
    /// stage failure (whose diagnostics have been recorded).
    fn run_pipeline(
        &self,
        diagnostics: &mut Vec<Diagnostic>,
    ) -> crate::Result<Option<PathBuf>> {
        let Some(_lock) = BuildLock::acquire(self.project.root()) else {
            diagnostics.push(Diagnostic::error(
                DiagnosticKind::ProjectBusy,
                format!(
                    "a build for {} is already in flight",
                    self.project.root().display()
                ),
            ));
            return Ok(None);
        };

        self.ctx
            .enter_step(BuildStep::Preparing, "preparing build workspace");
        if let Err(e) = self.project.validate() {
            diagnostics.push(Diagnostic::error(
                DiagnosticKind::InvalidProject,
                e.to_string(),
            ));
            return Ok(None);
        }
        let workspace = BuildWorkspace::create(self.project.root())?;

        self.ctx
            .enter_step(BuildStep::CompilingResources, "compiling resources");
        let res =
            stages::resources::compile_and_link(&self.project, &self.toolchain, &workspace, &self.ctx)?;
        diagnostics.extend(res.diagnostics);
        if !res.success {
            return Ok(None);
        }
        let resource_archive = res.artifact;

        if self.check_cancelled(diagnostics) {
            return Ok(None);
        }

        self.ctx
            .enter_step(BuildStep::CompilingSources, "compiling sources");
        let units = source::discover(&self.project.src_dir());
        let res = stages::sources::compile(&units, &self.toolchain, &workspace, &self.ctx)?;
        diagnostics.extend(res.diagnostics);
        if !res.success {
            return Ok(None);
        }

        if self.check_cancelled(diagnostics) {
            return Ok(None);
        }

        self.ctx
            .enter_step(BuildStep::ConvertingBytecode, "converting to dex");
        let res =
            stages::dex::convert(&self.toolchain, &workspace, self.project.min_sdk, &self.ctx)?;
        diagnostics.extend(res.diagnostics);
        if !res.success {
            return Ok(None);
        }

        if self.check_cancelled(diagnostics) {
            return Ok(None);
        }

        self.ctx.enter_step(BuildStep::Packaging, "packaging");
        let res = stages::package::pack(
            &self.project,
            &workspace,
            resource_archive.as_deref(),
            &self.ctx,
        )?;
        diagnostics.extend(res.diagnostics);
        let Some(unsigned) = res.artifact.filter(|_| res.success) else {
            return Ok(None);
        };

        if self.check_cancelled(diagnostics) {
            return Ok(None);
        }

        self.ctx.enter_step(BuildStep::Signing, "signing");
        let final_path = self.project.final_artifact_path();
        let res = stages::sign::sign(
            &unsigned,
            &final_path,
            self.keystore.as_deref(),
            &self.ctx,
        )?;
        diagnostics.extend(res.diagnostics);
        if !res.success {
            return Ok(None);
        }
        Ok(res.artifact)
    }

    fn check_cancelled(&self, diagnostics: &mut Vec<Diagnostic>) -> bool {
        if !self.ctx.cancelled() {
            return false;
        }
        diagnostics.push(Diagnostic::error(
            DiagnosticKind::Cancelled,
            "build cancelled",
        ));
        true
    }
}

/// Convenience entry: provision the toolchain, load the project and run
/// one build. Provisioning failure aborts before the workspace is touched.
pub fn run_build(
    project_dir: &Path,
    config: &AppConfig,
    sink: Arc<dyn ProgressSink>,
) -> BuildOutcome {
    let start = Instant::now();
    let toolchain = match toolchain::ensure_ready(&config.toolchain) {
        Ok(t) => t,
        Err(e) => {
            return BuildOutcome::failure(
                vec![Diagnostic::error(DiagnosticKind::Provision, e.to_string())],
                start.elapsed().as_millis(),
            );
        }
    };
    let project = match ProjectDescriptor::load(project_dir) {
        Ok(p) => p,
        Err(e) => {
            return BuildOutcome::failure(
                vec![Diagnostic::error(
                    DiagnosticKind::InvalidProject,
                    e.to_string(),
                )],
                start.elapsed().as_millis(),
            );
        }
    };
    BuildController::new(project, toolchain, config.signing.keystore_path(), sink).build()
}
