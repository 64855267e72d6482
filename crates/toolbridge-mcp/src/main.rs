//! toolbridge-mcp entry point.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, bail};
use clap::{Args, CommandFactory, Parser, Subcommand};
use clap_complete::Shell;
use serde_json::Value;

use toolbridge_mcp::config::{
    resolve_readonly, ClientConfig, LaunchSpec, ServerCatalog, ServerConfig, StopPolicy, TOKEN_ENV,
};
use toolbridge_mcp::lifecycle;
use toolbridge_mcp::protocol::ProtocolHandler;
use toolbridge_mcp::session::CallOutcome;
use toolbridge_mcp::tools::builtin_registry;
use toolbridge_mcp::transport::{Endpoint, StdioTransport};

#[derive(Parser)]
#[command(
    name = "toolbridge-mcp",
    about = "Tool-invocation protocol engine: serve tools over stdio or HTTP, or call them as a client",
    version
)]
struct Cli {
    /// Refuse mutating tools (also TOOLBRIDGE_READONLY=true).
    #[arg(long, global = true)]
    readonly: bool,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Option<Commands>,
}

/// Which server a client command talks to.
#[derive(Args, Clone)]
struct TargetArgs {
    /// Launch this server command and talk to it over stdio.
    #[arg(long, required_unless_present_any = ["url", "catalog"])]
    server_cmd: Option<String>,

    /// Argument for --server-cmd (repeatable).
    #[arg(long = "arg", allow_hyphen_values = true)]
    args: Vec<String>,

    /// Environment entry for --server-cmd (repeatable).
    #[arg(long = "env", value_name = "KEY=VALUE")]
    env: Vec<String>,

    /// Talk to an HTTP endpoint instead (e.g. http://127.0.0.1:3100/mcp).
    #[arg(long, conflicts_with = "server_cmd")]
    url: Option<String>,

    /// Bearer token for --url. Also reads TOOLBRIDGE_TOKEN.
    #[arg(long)]
    token: Option<String>,

    /// Server catalog; the server is picked by tool name.
    #[arg(long, conflicts_with_all = ["server_cmd", "url"])]
    catalog: Option<PathBuf>,

    /// Per-call deadline in milliseconds.
    #[arg(long, default_value_t = 10_000)]
    timeout_ms: u64,
}

impl TargetArgs {
    fn client_config(&self) -> ClientConfig {
        ClientConfig {
            call_timeout: Duration::from_millis(self.timeout_ms),
            ..ClientConfig::default()
        }
    }

    /// Resolve the endpoint. With `--catalog`, `tool` selects the server
    /// through a discovered route table.
    async fn endpoint(&self, tool: Option<&str>, policy: &StopPolicy) -> anyhow::Result<Endpoint> {
        if let Some(url) = &self.url {
            let token = self.token.clone().or_else(|| std::env::var(TOKEN_ENV).ok());
            return Ok(Endpoint::Http {
                url: url.clone(),
                token,
            });
        }

        if let Some(command) = &self.server_cmd {
            let mut spec = LaunchSpec::new(command).with_env_pairs(&self.env)?;
            spec.args.clone_from(&self.args);
            return Ok(Endpoint::Child(spec));
        }

        let Some(path) = &self.catalog else {
            bail!("one of --server-cmd, --url or --catalog is required");
        };
        let catalog = ServerCatalog::load(path)?;
        let Some(tool) = tool else {
            // Without a tool to route, take the first server.
            let spec = catalog
                .servers
                .values()
                .next()
                .cloned()
                .ok_or_else(|| anyhow!("catalog names no servers"))?;
            return Ok(Endpoint::Child(spec));
        };

        let routes = lifecycle::discover_routes(&catalog, &self.client_config(), policy).await;
        let server = routes
            .get(tool)
            .ok_or_else(|| anyhow!("no server in {} provides '{tool}'", path.display()))?;
        tracing::info!(tool, server = %server, "routed");
        let spec = catalog
            .get(server)
            .cloned()
            .ok_or_else(|| anyhow!("catalog lost server '{server}'"))?;
        Ok(Endpoint::Child(spec))
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Serve the built-in tools over stdio (default).
    Serve,

    /// Serve the built-in tools over HTTP.
    #[cfg(feature = "sse")]
    ServeHttp {
        /// Listen address (host:port).
        #[arg(long, default_value = "127.0.0.1:3100")]
        addr: String,

        /// Bearer token for authentication.
        /// Also reads from TOOLBRIDGE_TOKEN env var.
        #[arg(long)]
        token: Option<String>,
    },

    /// Call one tool: spawn or connect, handshake, call, tear down.
    Call {
        #[command(flatten)]
        target: TargetArgs,

        /// Tool name.
        tool: String,

        /// Arguments as a JSON object.
        #[arg(default_value = "{}")]
        arguments: String,
    },

    /// List a server's tools.
    Tools {
        #[command(flatten)]
        target: TargetArgs,
    },

    /// Probe every server in a catalog and print an up/down table.
    Probe {
        /// Server catalog file.
        #[arg(long)]
        catalog: PathBuf,

        /// Also print the tool → server route table.
        #[arg(long)]
        routes: bool,

        /// Print JSON instead of a table.
        #[arg(long)]
        json: bool,
    },

    /// Print server capabilities as JSON.
    Info,

    /// Generate shell completion scripts.
    ///
    /// Examples:
    ///   toolbridge-mcp completions bash > ~/.local/share/bash-completion/completions/toolbridge-mcp
    ///   toolbridge-mcp completions zsh > ~/.zfunc/_toolbridge-mcp
    Completions {
        /// Shell type (bash, zsh, fish, powershell, elvish).
        shell: Shell,
    },

    /// Launch interactive REPL mode against a server.
    Repl {
        #[command(flatten)]
        target: TargetArgs,
    },
}

fn server_handler(readonly: bool) -> anyhow::Result<ProtocolHandler> {
    let config = ServerConfig::with_readonly(resolve_readonly(readonly));
    if config.is_readonly() {
        tracing::info!("Readonly mode: mutating tools are refused");
    }
    let registry = Arc::new(builtin_registry()?);
    Ok(ProtocolHandler::new(registry, config))
}

fn print_outcome(outcome: &CallOutcome) {
    match outcome {
        CallOutcome::Success(_) => println!("{outcome}"),
        _ => eprintln!("{outcome}"),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&cli.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let policy = StopPolicy::default();

    match cli.command.unwrap_or(Commands::Serve) {
        Commands::Serve => {
            let handler = server_handler(cli.readonly)?;
            let transport = StdioTransport::new(handler);
            transport.run().await?;
        }

        #[cfg(feature = "sse")]
        Commands::ServeHttp { addr, token } => {
            use toolbridge_mcp::transport::SseServer;

            // Resolve token: CLI flag > env var
            let effective_token = token.or_else(|| std::env::var(TOKEN_ENV).ok());
            if effective_token.is_some() {
                tracing::info!("Auth: bearer token required");
            }

            let handler = server_handler(cli.readonly)?;
            tracing::info!("toolbridge-mcp HTTP server, {} tools", handler.registry().len());
            let server = SseServer::with_token(handler, effective_token);
            server.run(&addr).await?;
        }

        Commands::Call {
            target,
            tool,
            arguments,
        } => {
            let arguments: Value = serde_json::from_str(&arguments)
                .map_err(|e| anyhow!("arguments must be JSON: {e}"))?;
            let endpoint = target.endpoint(Some(&tool), &policy).await?;
            let transport = endpoint.open(&policy)?;
            let outcome =
                lifecycle::call_over(transport, &tool, arguments, &target.client_config()).await?;
            print_outcome(&outcome);
            if !outcome.is_success() {
                std::process::exit(1);
            }
        }

        Commands::Tools { target } => {
            let endpoint = target.endpoint(None, &policy).await?;
            let transport = endpoint.open(&policy)?;
            let tools = lifecycle::list_over(transport, &target.client_config()).await?;
            for tool in &tools {
                println!("{:<20} {}", tool.name, tool.description);
            }
        }

        Commands::Probe {
            catalog,
            routes,
            json,
        } => {
            let catalog = ServerCatalog::load(&catalog)?;
            let config = ClientConfig::default();
            let reports = lifecycle::probe_all(&catalog, &config, &policy).await;
            let route_table = if routes {
                Some(lifecycle::discover_routes(&catalog, &config, &policy).await)
            } else {
                None
            };

            if json {
                let servers: serde_json::Map<String, Value> = reports
                    .iter()
                    .map(|(name, report)| Ok((name.clone(), serde_json::to_value(report)?)))
                    .collect::<Result<_, serde_json::Error>>()?;
                let out = serde_json::json!({ "servers": servers, "routes": route_table });
                println!("{}", serde_json::to_string_pretty(&out)?);
            } else {
                for (name, report) in &reports {
                    let detail = match (&report.server, &report.error) {
                        (Some(server), _) => format!("{} v{}", server.name, server.version),
                        (None, Some(error)) => error.clone(),
                        (None, None) => String::new(),
                    };
                    let status = if report.up { "up" } else { "down" };
                    println!("{name:<20} {status:<5} {:>6}ms  {detail}", report.elapsed_ms);
                }
                if let Some(route_table) = route_table {
                    println!();
                    for (tool, server) in &route_table {
                        println!("{tool:<20} -> {server}");
                    }
                }
            }
        }

        Commands::Info => {
            let handler = server_handler(cli.readonly)?;
            let capabilities = handler.config().initialize_result();
            let tools = handler.registry().list();
            let info = serde_json::json!({
                "server": capabilities.server_info,
                "protocol_version": capabilities.protocol_version,
                "capabilities": capabilities.capabilities,
                "readonly": handler.config().is_readonly(),
                "tools": tools.iter().map(|t| &t.name).collect::<Vec<_>>(),
                "tool_count": tools.len(),
            });
            println!("{}", serde_json::to_string_pretty(&info)?);
        }

        Commands::Completions { shell } => {
            let mut cmd = Cli::command();
            clap_complete::generate(shell, &mut cmd, "toolbridge-mcp", &mut std::io::stdout());
        }

        Commands::Repl { target } => {
            let endpoint = target.endpoint(None, &policy).await?;
            let config = target.client_config();
            tokio::task::spawn_blocking(move || {
                toolbridge_mcp::repl::run(endpoint, config, policy)
            })
            .await??;
        }
    }

    Ok(())
}
