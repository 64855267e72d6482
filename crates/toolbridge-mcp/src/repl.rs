//! Interactive client REPL.
//!
//! Launch with `toolbridge-mcp repl --server-cmd <cmd>` (or `--url`) and
//! type `/help` for available commands, Tab for completion.

use rustyline::completion::{Completer, Pair};
use rustyline::config::CompletionType;
use rustyline::error::ReadlineError;
use rustyline::highlight::Highlighter;
use rustyline::hint::Hinter;
use rustyline::validate::Validator;
use rustyline::{
    Cmd, ConditionalEventHandler, Config, Editor, Event, EventContext, EventHandler, Helper,
    KeyEvent, RepeatCount,
};
use serde_json::Value;
use tokio::runtime::Handle;

use crate::config::{ClientConfig, StopPolicy};
use crate::session::{CallOutcome, ClientSession, SessionState};
use crate::transport::{Endpoint, Transport};

/// Available REPL commands.
const COMMANDS: &[(&str, &str)] = &[
    ("/init", "Connect and run the handshake"),
    ("/tools", "List the server's tools"),
    ("/call", "Call a tool: /call <tool> [json]"),
    ("/status", "Show connection state"),
    ("/close", "Close the session"),
    ("/clear", "Clear the screen"),
    ("/help", "Show available commands"),
    ("/exit", "Quit the REPL"),
];

/// REPL helper for tab completion. `tools` is refreshed after discovery.
#[derive(Default)]
struct ClientHelper {
    tools: Vec<String>,
}

/// Completion start offset and candidates for `input` (the text left of
/// the cursor).
fn complete_input(input: &str, tools: &[String]) -> (usize, Vec<String>) {
    if !input.contains(' ') {
        let matches = COMMANDS
            .iter()
            .filter(|(cmd, _)| cmd.starts_with(input))
            .map(|(cmd, _)| cmd.to_string())
            .collect();
        return (0, matches);
    }

    let Some(rest) = input.strip_prefix("/call ") else {
        return (input.len(), Vec::new());
    };
    if rest.contains(' ') {
        return (input.len(), Vec::new());
    }
    let matches = tools
        .iter()
        .filter(|name| name.starts_with(rest))
        .cloned()
        .collect();
    (input.len() - rest.len(), matches)
}

impl Completer for ClientHelper {
    type Candidate = Pair;

    fn complete(
        &self,
        line: &str,
        pos: usize,
        _ctx: &rustyline::Context<'_>,
    ) -> rustyline::Result<(usize, Vec<Pair>)> {
        let (start, matches) = complete_input(&line[..pos], &self.tools);
        let pairs = matches
            .into_iter()
            .map(|candidate| {
                let display = COMMANDS
                    .iter()
                    .find(|(cmd, _)| *cmd == candidate)
                    .map(|(cmd, desc)| format!("{cmd:<16} {desc}"))
                    .unwrap_or_else(|| candidate.clone());
                Pair {
                    display,
                    replacement: format!("{candidate} "),
                }
            })
            .collect();
        Ok((start, pairs))
    }
}

impl Hinter for ClientHelper {
    type Hint = String;

    fn hint(&self, line: &str, pos: usize, _ctx: &rustyline::Context<'_>) -> Option<String> {
        if pos < line.len() || line.is_empty() {
            return None;
        }
        if line.starts_with('/') && !line.contains(' ') {
            for (cmd, _) in COMMANDS {
                if cmd.starts_with(line) && *cmd != line {
                    return Some(cmd[line.len()..].to_string());
                }
            }
        }
        None
    }
}

impl Highlighter for ClientHelper {}
impl Validator for ClientHelper {}
impl Helper for ClientHelper {}

struct TabCompleteOrAcceptHint;

impl ConditionalEventHandler for TabCompleteOrAcceptHint {
    fn handle(
        &self,
        _evt: &Event,
        _n: RepeatCount,
        _positive: bool,
        ctx: &EventContext<'_>,
    ) -> Option<Cmd> {
        if ctx.has_hint() {
            Some(Cmd::CompleteHint)
        } else {
            Some(Cmd::Complete)
        }
    }
}

/// Split `/call` arguments into a tool name and its JSON arguments
/// (`{}` when omitted).
fn parse_call_args(args: &str) -> Result<(String, Value), String> {
    let mut parts = args.splitn(2, char::is_whitespace);
    let tool = match parts.next() {
        Some(tool) if !tool.is_empty() => tool.to_string(),
        _ => return Err("Usage: /call <tool> [json]".to_string()),
    };
    let arguments = match parts.next().map(str::trim) {
        None | Some("") => Value::Object(Default::default()),
        Some(raw) => serde_json::from_str(raw).map_err(|e| format!("Invalid JSON arguments: {e}"))?,
    };
    Ok((tool, arguments))
}

/// Session state.
struct ReplState {
    endpoint: Endpoint,
    config: ClientConfig,
    policy: StopPolicy,
    runtime: Handle,
    session: Option<ClientSession<Box<dyn Transport>>>,
    tools: Vec<String>,
}

/// Run the interactive REPL against `endpoint`.
///
/// Blocks the calling thread; call it from a blocking context inside a Tokio
/// runtime (e.g. `spawn_blocking`).
pub fn run(endpoint: Endpoint, config: ClientConfig, policy: StopPolicy) -> anyhow::Result<()> {
    eprintln!();
    eprintln!(
        "  \x1b[32m\u{25c9}\x1b[0m \x1b[1mtoolbridge-mcp v{}\x1b[0m \x1b[90m{endpoint}\x1b[0m",
        env!("CARGO_PKG_VERSION")
    );
    eprintln!();
    eprintln!(
        "    Press \x1b[36m/\x1b[0m to browse commands, \x1b[90mTab\x1b[0m to complete, \x1b[90m/exit\x1b[0m to quit."
    );
    eprintln!();

    let rl_config = Config::builder()
        .history_ignore_space(true)
        .auto_add_history(true)
        .completion_type(CompletionType::List)
        .completion_prompt_limit(20)
        .build();

    let mut rl: Editor<ClientHelper, rustyline::history::DefaultHistory> =
        Editor::with_config(rl_config)?;
    rl.set_helper(Some(ClientHelper::default()));
    rl.bind_sequence(
        KeyEvent::from('\t'),
        EventHandler::Conditional(Box::new(TabCompleteOrAcceptHint)),
    );

    let home = std::env::var("HOME")
        .or_else(|_| std::env::var("USERPROFILE"))
        .unwrap_or_else(|_| ".".to_string());
    let hist_path = std::path::PathBuf::from(&home).join(".toolbridge_mcp_history");
    if hist_path.exists() {
        let _ = rl.load_history(&hist_path);
    }

    let mut state = ReplState {
        endpoint,
        config,
        policy,
        runtime: Handle::current(),
        session: None,
        tools: Vec::new(),
    };
    let prompt = " \x1b[36mtools>\x1b[0m ";

    loop {
        match rl.readline(prompt) {
            Ok(line) => {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }

                let input = line.strip_prefix('/').unwrap_or(line);
                if input.is_empty() {
                    cmd_help();
                    continue;
                }

                let mut parts = input.splitn(2, ' ');
                let cmd = parts.next().unwrap_or("");
                let args = parts.next().unwrap_or("").trim();

                match cmd {
                    "exit" | "quit" => {
                        eprintln!("  \x1b[90m\u{2728}\x1b[0m Goodbye!");
                        break;
                    }
                    "help" | "h" | "?" => cmd_help(),
                    "clear" | "cls" => eprint!("\x1b[2J\x1b[H"),
                    "init" => cmd_init(&mut state),
                    "tools" => cmd_tools(&mut state),
                    "call" => cmd_call(args, &mut state),
                    "status" => cmd_status(&state),
                    "close" => cmd_close(&mut state),
                    _ => {
                        eprintln!("  Unknown command '/{cmd}'. Type /help for commands.");
                    }
                }

                if let Some(helper) = rl.helper_mut() {
                    helper.tools.clone_from(&state.tools);
                }
            }
            Err(ReadlineError::Interrupted) => {
                eprintln!("  \x1b[90m(Ctrl+C)\x1b[0m Type \x1b[1m/exit\x1b[0m to quit.");
            }
            Err(ReadlineError::Eof) => {
                eprintln!("  \x1b[90m\u{2728}\x1b[0m Goodbye!");
                break;
            }
            Err(err) => {
                eprintln!("  Error: {err}");
                break;
            }
        }
    }

    cmd_close(&mut state);

    let _ = std::fs::create_dir_all(hist_path.parent().unwrap_or(std::path::Path::new(".")));
    let _ = rl.save_history(&hist_path);

    Ok(())
}

fn cmd_help() {
    eprintln!();
    eprintln!("  Commands:");
    eprintln!();
    for (cmd, desc) in COMMANDS {
        eprintln!("    {cmd:<18} {desc}");
    }
    eprintln!();
    eprintln!("  Tip: Tab completes commands, and tool names after /call.");
    eprintln!();
}

fn cmd_init(state: &mut ReplState) {
    if let Some(session) = &state.session {
        if session.state() == SessionState::Ready {
            eprintln!("  Already connected. Use /close first to reconnect.");
            return;
        }
    }
    cmd_close(state);

    let transport = match state.endpoint.open(&state.policy) {
        Ok(transport) => transport,
        Err(e) => {
            eprintln!("  Cannot connect: {e}");
            return;
        }
    };
    let mut session = ClientSession::new(transport, state.config.clone());

    match state.runtime.block_on(session.initialize()) {
        Ok(result) => {
            eprintln!(
                "  Connected to {} v{} (protocol {})",
                result.server_info.name, result.server_info.version, result.protocol_version
            );
            if let Some(instructions) = &result.instructions {
                eprintln!("  \x1b[90m{instructions}\x1b[0m");
            }
        }
        Err(e) => eprintln!("  Handshake failed: {e}"),
    }
    state.session = Some(session);

    // Populate tab completion; failures here are reported by /tools.
    if let Some(session) = state.session.as_mut() {
        if let Ok(tools) = state.runtime.block_on(session.list_tools()) {
            state.tools = tools.into_iter().map(|t| t.name).collect();
        }
    }
}

fn cmd_tools(state: &mut ReplState) {
    let Some(session) = state.session.as_mut() else {
        eprintln!("  No session. Run /init first.");
        return;
    };

    match state.runtime.block_on(session.list_tools()) {
        Ok(tools) => {
            eprintln!();
            eprintln!("  {} tools available:", tools.len());
            eprintln!();
            for tool in &tools {
                eprintln!("    {:<20} {}", tool.name, tool.description);
            }
            eprintln!();
            state.tools = tools.into_iter().map(|t| t.name).collect();
        }
        Err(e) => eprintln!("  Discovery failed: {e}"),
    }
}

fn cmd_call(args: &str, state: &mut ReplState) {
    let (tool, arguments) = match parse_call_args(args) {
        Ok(parsed) => parsed,
        Err(message) => {
            eprintln!("  {message}");
            return;
        }
    };
    let Some(session) = state.session.as_mut() else {
        eprintln!("  No session. Run /init first.");
        return;
    };

    match state.runtime.block_on(session.call_tool(&tool, arguments)) {
        Ok(outcome @ CallOutcome::Success(_)) => {
            eprintln!();
            for line in outcome.to_string().lines() {
                eprintln!("  {line}");
            }
            eprintln!();
        }
        Ok(outcome) => eprintln!("  \x1b[33m{outcome}\x1b[0m"),
        Err(e) => eprintln!("  \x1b[31mCall failed:\x1b[0m {e}"),
    }
}

fn cmd_status(state: &ReplState) {
    eprintln!();
    eprintln!("  Endpoint: {}", state.endpoint);
    match &state.session {
        Some(session) => {
            eprintln!("  State:    {}", session.state());
            eprintln!("  Pending:  {}", session.outstanding());
            if let Some(info) = session.server_info() {
                eprintln!(
                    "  Server:   {} v{}",
                    info.server_info.name, info.server_info.version
                );
            }
        }
        None => eprintln!("  State:    {}", SessionState::Unconnected),
    }
    eprintln!("  Tools:    {}", state.tools.len());
    eprintln!();
}

fn cmd_close(state: &mut ReplState) {
    if let Some(mut session) = state.session.take() {
        if let Err(e) = state.runtime.block_on(session.close()) {
            eprintln!("  Close failed: {e}");
        }
        state.tools.clear();
    }
}
