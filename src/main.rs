use std::path::PathBuf;

use clap::{Parser, Subcommand};

use permscript::loader::{LoadError, SourceResolver};
use permscript::{diagnostics, pipeline, PreparationOutput, RuntimeConfig};

#[derive(Parser)]
#[command(name = "permscript")]
#[command(about = "Module lifecycle runtime for a permission-oriented scripting language")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Parse, evaluate preinit, and statically check a module without
    /// constructing an execution context for it.
    Check {
        file: PathBuf,
        #[arg(long)]
        json: bool,
    },
    /// Run the full preparation pipeline and hand off a ready
    /// capability-scoped context (evaluation itself is out of scope).
    Run {
        file: PathBuf,
        #[arg(long)]
        json: bool,
        #[arg(trailing_var_arg = true)]
        args: Vec<String>,
    },
}

/// Resolves module source names directly against the filesystem,
/// relative to the process's working directory.
struct FsResolver;

impl SourceResolver for FsResolver {
    fn resolve(&self, source_name: &str) -> Result<String, LoadError> {
        std::fs::read_to_string(source_name).map_err(|e| LoadError::ResolutionFailed(source_name.to_string(), e.to_string()))
    }
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt().with_env_filter(tracing_subscriber::EnvFilter::from_default_env()).init();

    let cli = Cli::parse();

    match cli.command {
        Command::Check { file, json } => {
            let out = prepare(&file, &[]);
            report(&out, json, false);
        }
        Command::Run { file, json, args } => {
            let out = prepare(&file, &args);
            report(&out, json, true);
        }
    }
}

fn prepare(file: &PathBuf, args: &[String]) -> PreparationOutput {
    let resolver = FsResolver;
    let config = RuntimeConfig::default();
    let source_name = file.to_string_lossy().to_string();
    pipeline::prepare(&source_name, &resolver, args, &config, None)
}

fn report(out: &PreparationOutput, json: bool, is_run: bool) {
    if let Some(err) = &out.error {
        if json {
            println!("{}", serde_json::json!({"ok": false, "error": diagnostics::render(err)}));
        } else {
            eprintln!("{}", diagnostics::render(err));
        }
        std::process::exit(1);
    }

    let permission_count = out.context.as_ref().map(|c| c.granted_permissions().iter().count()).unwrap_or(0);
    if json {
        println!(
            "{}",
            serde_json::json!({
                "ok": true,
                "kind": out.manifest.as_ref().map(|m| m.kind.to_string()),
                "grantedPermissions": permission_count,
                "prepared": true,
            })
        );
    } else if is_run {
        println!("prepared module with {permission_count} granted permission(s); evaluation is not performed by this build");
    } else {
        println!("ok");
    }
}
