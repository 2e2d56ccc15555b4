use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};

use apkforge::config::AppConfig;
use apkforge::diagnostics::Severity;
use apkforge::exec::StdoutSink;
use apkforge::Result;

#[derive(Debug, Parser)]
#[command(author, version, about)]
struct Args {
    /// Path to an apkforge.toml (defaults to ./apkforge.toml when present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    cmd: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run the full build pipeline for a project directory
    Build {
        /// Project root (must contain project.json)
        project: PathBuf,
        /// Keystore file overriding the configured signing identity
        #[arg(long)]
        keystore: Option<PathBuf>,
    },
    /// List the source units a build would compile
    Sources {
        /// Project root (must contain project.json)
        project: PathBuf,
    },
    /// Provision the toolchain and report its resolved paths
    Doctor,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let res = match args.cmd {
        Command::Build { project, keystore } => cmd_build(args.config.as_deref(), &project, keystore),
        Command::Sources { project } => cmd_sources(&project),
        Command::Doctor => cmd_doctor(args.config.as_deref()),
    };
    match res {
        Ok(code) => code,
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}

fn cmd_build(
    config: Option<&std::path::Path>,
    project: &std::path::Path,
    keystore: Option<PathBuf>,
) -> Result<ExitCode> {
    let mut cfg = AppConfig::load_or_default(config)?;
    if let Some(ks) = keystore {
        cfg.signing.keystore = ks.display().to_string();
    }

    let outcome = apkforge::controller::run_build(project, &cfg, Arc::new(StdoutSink));

    for d in &outcome.diagnostics {
        let sev = match d.severity {
            Severity::Warning => "warning",
            Severity::Error => "error",
        };
        match (&d.file, d.line) {
            (Some(file), Some(line)) => {
                eprintln!("{sev}: {}:{line}: {}", file.display(), d.message)
            }
            _ => eprintln!("{sev}: {}", d.message),
        }
    }
    if outcome.success {
        let artifact = outcome
            .artifact
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_default();
        println!("BUILD OK ({} ms): {artifact}", outcome.elapsed_ms);
        Ok(ExitCode::SUCCESS)
    } else {
        println!("BUILD FAILED ({} ms)", outcome.elapsed_ms);
        Ok(ExitCode::FAILURE)
    }
}

fn cmd_sources(project: &std::path::Path) -> Result<ExitCode> {
    let desc = apkforge::project::ProjectDescriptor::load(project)?;
    for unit in apkforge::source::discover(&desc.src_dir()) {
        println!("{:<10} {}", format!("{:?}", unit.lang), unit.path.display());
    }
    Ok(ExitCode::SUCCESS)
}

fn cmd_doctor(config: Option<&std::path::Path>) -> Result<ExitCode> {
    let cfg = AppConfig::load_or_default(config)?;
    match apkforge::toolchain::ensure_ready(&cfg.toolchain) {
        Ok(paths) => {
            println!("sdk dir:       {}", paths.sdk_dir.display());
            println!("aapt2:         {}", paths.aapt2.display());
            println!("d8:            {}", paths.d8.display());
            println!("platform jar:  {}", paths.android_jar.display());
            println!("kotlin stdlib: {}", paths.kotlin_stdlib.display());
            println!("kotlinc:       {}", paths.kotlinc);
            println!("javac:         {}", paths.javac);
            Ok(ExitCode::SUCCESS)
        }
        Err(e) => {
            eprintln!("toolchain not ready: {e}");
            Ok(ExitCode::FAILURE)
        }
    }
}
