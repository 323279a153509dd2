// Copyright 2025 Lablup Inc. and Jeongkyu Shin
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! sshlist binary - SSH endpoint directory server
//!
//! This binary provides a command-line interface for running and managing
//! the directory server.

use anyhow::{Context, Result};
use clap::{ArgAction, Parser, Subcommand};
use owo_colors::OwoColorize;
use sshlist::config::{
    build_directory_config, build_endpoints, generate_config_template, load_config,
    validate_config, DirectoryFileConfig,
};
use sshlist::directory::Registry;
use sshlist::server::DirectoryServer;
use sshlist::utils::logging;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// sshlist - a directory of SSH endpoints behind one SSH server
#[derive(Parser, Debug)]
#[command(name = "sshlist")]
#[command(version)]
#[command(about = "SSH directory server: pick an endpoint from a menu, get a session", long_about = None)]
struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    command: Option<Commands>,

    /// Configuration file path
    #[arg(short, long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Bind address
    #[arg(short = 'b', long, global = true, value_name = "ADDR")]
    bind_address: Option<String>,

    /// Port of the main listener
    #[arg(short, long, global = true, value_name = "PORT")]
    port: Option<u16>,

    /// Host key file(s); generated if missing
    #[arg(short = 'k', long = "host-key", global = true, value_name = "FILE")]
    host_keys: Vec<PathBuf>,

    /// Verbosity level (-v, -vv, -vvv)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    /// PID file path
    #[arg(long, global = true, value_name = "FILE")]
    pid_file: Option<PathBuf>,
}

/// Available subcommands
#[derive(Subcommand, Debug)]
enum Commands {
    /// Start the directory server (default)
    Run,

    /// Generate a configuration file template
    GenConfig {
        /// Output path (stdout if not specified)
        #[arg(short, long, value_name = "FILE")]
        output: Option<PathBuf>,
    },

    /// Check configuration file for errors
    CheckConfig,

    /// Generate an Ed25519 host key
    GenHostKey {
        /// Output file path
        #[arg(short, long, value_name = "FILE")]
        output: PathBuf,
    },

    /// Hash a password for configuration
    HashPassword,

    /// List the configured endpoints
    List,

    /// Show version information
    Version,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    logging::init_logging(cli.verbose);

    match cli.command {
        None | Some(Commands::Run) => run_server(&cli).await,
        Some(Commands::GenConfig { ref output }) => gen_config(output.as_deref()),
        Some(Commands::CheckConfig) => check_config(&cli),
        Some(Commands::GenHostKey { ref output }) => gen_host_key(output),
        Some(Commands::HashPassword) => hash_password(),
        Some(Commands::List) => list_endpoints(&cli),
        Some(Commands::Version) => show_version(),
    }
}

/// Load the configuration file and apply CLI overrides on top.
fn load_effective_config(cli: &Cli) -> Result<DirectoryFileConfig> {
    let mut config = load_config(cli.config.as_deref()).context("Failed to load configuration")?;
    apply_cli_overrides(&mut config, cli);
    validate_config(&config)?;
    Ok(config)
}

fn apply_cli_overrides(config: &mut DirectoryFileConfig, cli: &Cli) {
    if let Some(bind_address) = &cli.bind_address {
        config.server.bind_address = bind_address.clone();
    }
    if let Some(port) = cli.port {
        config.server.port = port;
    }
    if !cli.host_keys.is_empty() {
        config.server.host_keys = cli.host_keys.clone();
    }
}

/// Run the directory server
async fn run_server(cli: &Cli) -> Result<()> {
    let file_config = load_effective_config(cli)?;
    let config = build_directory_config(&file_config)?;

    tracing::info!(
        title = %config.title,
        address = %config.main_address(),
        endpoints = config.endpoints.len(),
        "Directory configuration loaded"
    );

    let server = Arc::new(DirectoryServer::new(config).context("Invalid directory configuration")?);

    // Every listener is bound before any is served.
    let bound = server.bind().await?;
    for (name, address) in bound.local_addrs() {
        println!("{name}: listening on {address}");
    }

    if let Some(pid_file) = &cli.pid_file {
        write_pid_file(pid_file)?;
    }

    #[cfg(unix)]
    spawn_reload_handler(Arc::clone(&server), cli.config.clone())?;

    let result = bound.serve(shutdown_signal()).await;

    if let Some(pid_file) = &cli.pid_file {
        let _ = fs::remove_file(pid_file);
    }

    tracing::info!("Server stopped");
    result
}

/// Reload the endpoint list on SIGHUP. Listener settings need a restart.
#[cfg(unix)]
fn spawn_reload_handler(server: Arc<DirectoryServer>, config_path: Option<PathBuf>) -> Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut hangup = signal(SignalKind::hangup()).context("Failed to install SIGHUP handler")?;
    tokio::spawn(async move {
        while hangup.recv().await.is_some() {
            tracing::info!("Received SIGHUP, reloading endpoints");
            let endpoints = load_config(config_path.as_deref())
                .and_then(|config| Ok(build_endpoints(&config.endpoints)?));
            match endpoints.and_then(|endpoints| Ok(server.reload(endpoints)?)) {
                Ok(version) => tracing::info!(version, "Endpoints reloaded"),
                Err(e) => tracing::error!(error = %format!("{e:#}"), "Reload failed, keeping current endpoints"),
            }
        }
    });
    Ok(())
}

/// Resolves on Ctrl-C or SIGTERM.
async fn shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received SIGINT (Ctrl+C)");
        }
        _ = terminate => {
            tracing::info!("Received SIGTERM");
        }
    }
}

/// Generate a configuration file template
fn gen_config(output: Option<&Path>) -> Result<()> {
    let template = generate_config_template();

    let Some(path) = output else {
        print!("{template}");
        return Ok(());
    };

    #[cfg(unix)]
    {
        use std::fs::OpenOptions;
        use std::os::unix::fs::OpenOptionsExt;

        // Passwords hashes may end up in here
        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(0o600)
            .open(path)
            .context("Failed to create configuration file")?;

        file.write_all(template.as_bytes())
            .context("Failed to write configuration file")?;
    }

    #[cfg(not(unix))]
    {
        fs::write(path, &template).context("Failed to write configuration file")?;
    }

    println!("Configuration template written to {}", path.display());
    Ok(())
}

/// Check configuration file for errors
fn check_config(cli: &Cli) -> Result<()> {
    let file_config = load_effective_config(cli)?;
    let config = build_directory_config(&file_config)?;
    let server = DirectoryServer::new(config)?;

    println!("{} Configuration is valid\n", "✓".green());
    println!("{} {}", "Title:".bold(), file_config.title);
    println!("\n{}", "Listeners:".cyan().bold());
    for listener in server.listeners() {
        let methods = listener.auth.method_names();
        let auth = if methods.is_empty() {
            "none".to_string()
        } else {
            methods.join(", ")
        };
        println!("  {:<12} {:<22} auth: {}", listener.name(), listener.address, auth);
    }

    println!("\n{}", "Host keys:".cyan().bold());
    for key in &file_config.server.host_keys {
        let state = if key.exists() { "present" } else { "will be generated" };
        println!("  - {} ({state})", key.display());
    }

    println!("\n{}", "Limits:".cyan().bold());
    println!("  Max auth attempts: {}", file_config.limits.max_auth_attempts);
    println!("  Challenge timeout: {}s", file_config.limits.challenge_timeout);
    println!("  Idle timeout: {}s", file_config.limits.idle_timeout);

    println!(
        "\n{} {}",
        "Endpoints:".cyan().bold(),
        server.directory().snapshot().len()
    );
    Ok(())
}

/// List the configured endpoints
fn list_endpoints(cli: &Cli) -> Result<()> {
    let file_config = load_effective_config(cli)?;
    let registry = Registry::register(build_endpoints(&file_config.endpoints)?)?;

    if registry.is_empty() {
        println!("No endpoints configured.");
        return Ok(());
    }

    let width = registry.names().map(str::len).max().unwrap_or(0);
    for endpoint in registry.endpoints() {
        let kind = if endpoint.is_local() { "local" } else { "remote" };
        println!(
            "{:<width$}  {:<6}  {}",
            endpoint.name.bold(),
            kind,
            endpoint.summary().dimmed()
        );
    }
    Ok(())
}

/// Generate an Ed25519 host key
fn gen_host_key(output: &Path) -> Result<()> {
    if output.exists() {
        anyhow::bail!(
            "{} already exists; remove it first to generate a new key",
            output.display()
        );
    }

    let key = sshlist::keygen::generate(output, Some("sshlist"))?;

    println!("{} Host key generated: {}", "✓".green(), output.display());
    println!("  Fingerprint: {}", key.fingerprint);
    println!("\nUse it with --host-key or in the configuration file:");
    println!("server:");
    println!("  host_keys:");
    println!("    - {}", output.display());

    Ok(())
}

/// Hash a password for configuration
fn hash_password() -> Result<()> {
    use rpassword::read_password;
    use sshlist::server::auth::hash_password as generate_hash;
    use zeroize::Zeroizing;

    print!("Enter password: ");
    io::stdout().flush()?;
    let password = Zeroizing::new(read_password()?);

    if password.is_empty() {
        anyhow::bail!("Password cannot be empty");
    }

    if password.len() < 8 {
        println!("\n{} Password is shorter than 8 characters.", "Warning:".yellow());
        println!("   Consider using a longer password.\n");
    }

    print!("Confirm password: ");
    io::stdout().flush()?;
    let confirm = Zeroizing::new(read_password()?);

    if *password != *confirm {
        anyhow::bail!("Passwords do not match");
    }

    let hash = generate_hash(&password).context("Failed to hash password")?;

    println!("\nPassword hash (use in configuration):");
    println!("{hash}");
    println!("\nExample configuration:");
    println!("auth:");
    println!("  main:");
    println!("    passwords:");
    println!("      username: \"{hash}\"");

    Ok(())
}

/// Show version information
fn show_version() -> Result<()> {
    println!("sshlist {}", env!("CARGO_PKG_VERSION"));
    println!();
    println!("{}", env!("CARGO_PKG_DESCRIPTION"));
    Ok(())
}

/// Write the current process ID to a PID file
fn write_pid_file(path: &Path) -> Result<()> {
    if let Ok(existing) = fs::read_to_string(path) {
        if let Ok(existing_pid) = existing.trim().parse::<i32>() {
            #[cfg(unix)]
            {
                use nix::sys::signal::kill;
                use nix::unistd::Pid;

                // Signal 0 only checks that the process exists
                if kill(Pid::from_raw(existing_pid), None).is_ok() {
                    anyhow::bail!(
                        "Another instance is already running with PID {}. \
                         If this is incorrect, remove {} and try again.",
                        existing_pid,
                        path.display()
                    );
                }
            }

            #[cfg(not(unix))]
            tracing::warn!(
                pid = existing_pid,
                "PID file exists; overwriting (process check not available on this platform)"
            );
        }
    }

    let pid = std::process::id();
    fs::write(path, pid.to_string()).context("Failed to write PID file")?;
    tracing::debug!(path = %path.display(), pid = pid, "PID file written");
    Ok(())
}
