//! DRLMS client binary
//!
//! Run with: cargo run --bin drlms-client -- ls

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use drlms_client::{ClientConfig, FileEntry, ProgressReporter, ProtocolResponse, Session};
use std::io::Write;
use std::path::{Path, PathBuf};
use tokio::io::{AsyncBufReadExt, BufReader};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file path (command-line flags override it)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Server host [default: 127.0.0.1]
    #[arg(short = 'H', long)]
    host: Option<String>,

    /// Server port [default: 8080]
    #[arg(short, long)]
    port: Option<u16>,

    /// Username [default: alice]
    #[arg(short, long)]
    user: Option<String>,

    /// Password
    #[arg(long, env = "DRLMS_PASSWORD", hide_env_values = true)]
    password: Option<String>,

    /// Connect timeout in seconds [default: 5]
    #[arg(short, long)]
    timeout: Option<u64>,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// List files on the server
    Ls,
    /// Upload a file
    Put {
        /// Local file path
        local: PathBuf,
        /// Remote name (defaults to the local file name)
        #[arg(long = "as")]
        remote: Option<String>,
    },
    /// Download a file
    Get {
        /// Remote file name
        remote: String,
        /// Local file path (defaults to the remote name)
        local: Option<PathBuf>,
    },
    /// Interactive session reading commands from stdin
    Shell,
}

/// Prints `name: sent/total bytes (pct%)` to stderr, one line per whole
/// percent so large transfers do not flood the terminal.
struct StderrProgress<'a> {
    label: &'a str,
    last_percent: Option<u64>,
}

impl<'a> StderrProgress<'a> {
    fn new(label: &'a str) -> Self {
        Self {
            label,
            last_percent: None,
        }
    }
}

impl ProgressReporter for StderrProgress<'_> {
    fn report(&mut self, transferred: u64, total: u64) {
        let percent = if total == 0 {
            100
        } else {
            transferred.saturating_mul(100) / total
        };
        if self.last_percent == Some(percent) {
            return;
        }
        self.last_percent = Some(percent);
        let mut stderr = std::io::stderr().lock();
        let _ = write!(
            stderr,
            "\r{}: {transferred}/{total} bytes ({percent}%)",
            self.label
        );
        if transferred == total {
            let _ = writeln!(stderr);
        }
    }
}

fn load_config(args: &Args) -> anyhow::Result<ClientConfig> {
    let mut config = match args.config {
        Some(ref path) => ClientConfig::from_file(path)?,
        None => ClientConfig::default(),
    };
    if let Some(ref host) = args.host {
        config.host.clone_from(host);
    }
    if let Some(port) = args.port {
        config.port = port;
    }
    if let Some(ref user) = args.user {
        config.user.clone_from(user);
    }
    if let Some(timeout) = args.timeout {
        config.connect_timeout = timeout;
    }
    if args.verbose {
        config.logging.level = "debug".to_string();
    }
    config.validate()?;
    Ok(config)
}

fn print_listing(entries: &[FileEntry]) {
    if entries.is_empty() {
        println!("(no files)");
    }
    for entry in entries {
        println!("{entry}");
    }
}

fn default_local_path(remote: &str) -> PathBuf {
    PathBuf::from(remote)
}

fn remote_name_for(local: &Path) -> anyhow::Result<String> {
    local
        .file_name()
        .and_then(|name| name.to_str())
        .map(str::to_string)
        .with_context(|| format!("{} has no usable file name", local.display()))
}

async fn upload(session: &mut Session, local: &Path, remote: Option<&str>) -> anyhow::Result<()> {
    let remote = match remote {
        Some(name) => name.to_string(),
        None => remote_name_for(local)?,
    };
    let reply = session
        .upload_file_as(local, &remote, StderrProgress::new(&remote))
        .await
        .with_context(|| format!("upload of {} failed", local.display()))?;
    match reply {
        ProtocolResponse::Ok(name) => {
            println!("uploaded {} as {name}", local.display());
            Ok(())
        }
        ProtocolResponse::Err(reason) => bail!("server did not keep {remote}: {reason}"),
    }
}

async fn download(session: &mut Session, remote: &str, local: Option<PathBuf>) -> anyhow::Result<()> {
    let local = local.unwrap_or_else(|| default_local_path(remote));
    session
        .download_file(remote, &local, StderrProgress::new(remote))
        .await
        .with_context(|| format!("download of {remote} failed"))?;
    println!("downloaded {remote} to {}", local.display());
    Ok(())
}

async fn run_once(session: &mut Session, command: Commands) -> anyhow::Result<()> {
    match command {
        Commands::Ls => {
            let entries = session.list_files().await.context("listing failed")?;
            print_listing(&entries);
            Ok(())
        }
        Commands::Put { local, remote } => upload(session, &local, remote.as_deref()).await,
        Commands::Get { remote, local } => download(session, &remote, local).await,
        Commands::Shell => Ok(()),
    }
}

const SHELL_HELP: &str = "commands: ls | put <local> [remote] | get <remote> [local] | reconnect | quit";

/// One long-lived session driven by stdin. The listing is refreshed after
/// every successful upload.
async fn shell(session: &mut Session, config: &ClientConfig, password: &str) -> anyhow::Result<()> {
    println!("connected to {}:{} as {}", session.host(), session.port(), session.user());
    println!("{SHELL_HELP}");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("drlms> ");
        std::io::stdout().flush()?;

        let Some(line) = lines.next_line().await? else {
            break;
        };
        let words: Vec<&str> = line.split_whitespace().collect();
        let result = match words.as_slice() {
            [] => continue,
            ["quit" | "exit"] => break,
            ["help"] => {
                println!("{SHELL_HELP}");
                continue;
            }
            ["reconnect"] => {
                session.reset();
                match Session::login_with(config, password).await {
                    Ok(fresh) => {
                        *session = fresh;
                        println!("reconnected");
                        Ok(())
                    }
                    Err(e) => Err(anyhow::Error::new(e).context("reconnect failed")),
                }
            }
            ["ls"] => match session.list_files().await {
                Ok(entries) => {
                    print_listing(&entries);
                    Ok(())
                }
                Err(e) => Err(anyhow::Error::new(e).context("listing failed")),
            },
            ["put", local] | ["put", local, _] => {
                let remote = words.get(2).copied();
                let uploaded = upload(session, Path::new(local), remote).await;
                if uploaded.is_ok() {
                    if let Ok(entries) = session.list_files().await {
                        print_listing(&entries);
                    }
                }
                uploaded
            }
            ["get", remote] => download(session, remote, None).await,
            ["get", remote, local] => download(session, remote, Some(PathBuf::from(local))).await,
            _ => {
                eprintln!("unrecognized command: {line}");
                eprintln!("{SHELL_HELP}");
                continue;
            }
        };

        if let Err(e) = result {
            eprintln!("error: {e:#}");
            if !session.is_authenticated() {
                eprintln!("session lost; type `reconnect` to log in again");
            }
        }
    }

    session.reset();
    Ok(())
}

async fn run(args: Args) -> anyhow::Result<()> {
    let config = load_config(&args)?;
    let _log_guard = drlms_core::logging::init(&config.logging)?;

    let Some(password) = args.password else {
        bail!("no password given; use --password or set DRLMS_PASSWORD");
    };

    let mut session = Session::login_with(&config, &password)
        .await
        .with_context(|| format!("failed to log in to {}:{}", config.host, config.port))?;

    let result = match args.command {
        Commands::Shell => shell(&mut session, &config, &password).await,
        command => run_once(&mut session, command).await,
    };
    session.reset();
    result
}

#[tokio::main]
async fn main() {
    if let Err(e) = run(Args::parse()).await {
        eprintln!("error: {e:#}");
        std::process::exit(1);
    }
}
