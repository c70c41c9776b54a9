use crate::config::types::{LauncherConfig, NetworkConfig, SandboxConfig, SecurityLayer};
use crate::core::launcher::Launcher;
use crate::core::types::ChildExit;
use crate::kernel::namespace;
use crate::kernel::seccomp::{self, SeccompProgram};
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::io::{self, Read, Write};
use std::path::PathBuf;
use std::thread;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Spawn one sandboxed child running the built-in echo entry point
    Spawn {
        /// Child name; shown as cloner:<name>
        #[arg(long, default_value = "child")]
        name: String,
        /// Root directory for the chroot layer
        #[arg(long)]
        chroot: Option<PathBuf>,
        /// Give the child a veth interface with the default addresses
        #[arg(long)]
        network: bool,
        /// Run only these layers (testing only)
        #[arg(long = "only", value_name = "LAYER")]
        only: Vec<SecurityLayer>,
        /// Launcher configuration (JSON)
        #[arg(long)]
        config: Option<PathBuf>,
        /// Arguments for the entry point; each is parsed as JSON when possible
        #[arg(last = true)]
        args: Vec<String>,
    },
    /// Report kernel support for the sandbox layers
    Check,
    /// Write the built-in seccomp program as raw BPF records
    ExportSeccomp {
        /// Output path
        path: PathBuf,
    },
}

pub fn run() -> Result<()> {
    env_logger::init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Spawn {
            name,
            chroot,
            network,
            only,
            config,
            args,
        } => {
            let launcher_config = match config {
                Some(path) => LauncherConfig::from_json_file(&path)?,
                None => LauncherConfig::default(),
            };

            let mut sandbox = SandboxConfig::default().only_layers(only);
            if let Some(root) = chroot {
                sandbox = sandbox.with_chroot(root);
            }
            if network {
                sandbox = sandbox.with_network(NetworkConfig::default());
            }

            let code = spawn_echo(launcher_config, &name, parse_args(&args), sandbox)?;
            std::process::exit(code);
        }
        Commands::Check => {
            check_support();
            Ok(())
        }
        Commands::ExportSeccomp { path } => {
            let program = SeccompProgram::builtin()?;
            std::fs::write(&path, program.to_bpf_bytes())
                .with_context(|| format!("writing {}", path.display()))?;
            eprintln!("Wrote {} instructions to {}", program.len(), path.display());
            Ok(())
        }
    }
}

fn parse_args(args: &[String]) -> Vec<serde_json::Value> {
    args.iter()
        .map(|arg| {
            serde_json::from_str(arg).unwrap_or_else(|_| serde_json::Value::String(arg.clone()))
        })
        .collect()
}

/// Entry point for `spawn`: print the arguments as JSON, then copy stdin
/// to stdout.
fn echo_entry(args: &[serde_json::Value]) -> i32 {
    let mut stdout = io::stdout();
    let line = serde_json::to_string(args).unwrap_or_default();
    if writeln!(stdout, "{}", line).is_err() {
        return 1;
    }
    match io::copy(&mut io::stdin(), &mut stdout) {
        Ok(_) => 0,
        Err(_) => 1,
    }
}

fn spawn_echo(
    launcher_config: LauncherConfig,
    name: &str,
    args: Vec<serde_json::Value>,
    sandbox: SandboxConfig,
) -> Result<i32> {
    let mut input = Vec::new();
    io::stdin().read_to_end(&mut input)?;

    let mut client = Launcher::start(launcher_config, echo_entry)?;
    let mut child = client.spawn_child(name, args, sandbox)?;
    eprintln!("Spawned {} as pid {}", name, child.pid);

    let stderr_reader = child.stderr.take().map(|mut stderr| {
        thread::spawn(move || {
            let mut buf = Vec::new();
            let _ = stderr.read_to_end(&mut buf);
            buf
        })
    });

    if let Some(mut stdin) = child.stdin.take() {
        // A child that exits early closes its end; that is not our error.
        let _ = stdin.write_all(&input);
    }

    let mut output = Vec::new();
    if let Some(mut stdout) = child.stdout.take() {
        stdout.read_to_end(&mut output)?;
    }
    let errors = stderr_reader
        .map(|handle| handle.join().unwrap_or_default())
        .unwrap_or_default();

    let exit = child.wait()?;
    client.close()?;

    io::stdout().write_all(&output)?;
    io::stderr().write_all(&errors)?;

    Ok(match exit {
        ChildExit::Exited(code) => code,
        ChildExit::Signaled(sig) => 128 + sig as i32,
    })
}

fn check_support() {
    if seccomp::is_seccomp_supported() {
        eprintln!("seccomp: {}", seccomp::get_seccomp_status());
    } else {
        eprintln!("Warning: seccomp not available - children cannot be sandboxed");
    }

    if !namespace::is_supported() {
        eprintln!("Warning: namespace isolation not supported");
    } else if namespace::user_namespaces_enabled() {
        eprintln!("user namespaces: available");
    } else {
        eprintln!("Warning: user namespaces disabled (user.max_user_namespaces = 0)");
    }

    if !nix::unistd::getuid().is_root() {
        eprintln!("Warning: not running as root; uid maps and veth setup will fail");
    }

    match SeccompProgram::builtin() {
        Ok(program) => eprintln!("built-in seccomp program: {} instructions", program.len()),
        Err(e) => eprintln!("Warning: built-in seccomp program unavailable: {}", e),
    }
}
