//! `taskboard`: kanban task board on the command line.
//!
//! Works against a local board file or a remote task service. Configuration
//! via CLI flags, environment variables, or config file
//! (`~/.config/taskboard/config.toml`).
//!
//! ```bash
//! # Local board
//! taskboard add "Acme Corp" --category BDL --processing expedited
//! taskboard list
//!
//! # Remote board
//! taskboard --mode remote --api-url http://localhost:8000 login alice
//! taskboard --mode remote watch
//!
//! # Interactive session with undo/redo and live updates
//! taskboard --mode remote shell
//! ```

use std::path::Path;
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use taskboard::board::controller::{Board, BoardMode};
use taskboard::board::{BoardError, TaskDraft, ValidationError, parse_status, validate_patch};
use taskboard::config::{ClientConfig, GlobalArgs, ModeKind};
use taskboard::guest;
use taskboard::notify::{NoticeBoard, NoticeLevel};
use taskboard::persist::{FileStore, KeyValueStore};
use taskboard::sync::http::HttpRemote;
use taskboard::sync::push::WsConnector;
use taskboard::sync::reconnect::LinkEvent;
use taskboard_proto::event::PushMessage;
use taskboard_proto::task::{Processing, Task, TaskId, TaskPatch, TaskStatus, TaskType};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing_appender::non_blocking::WorkerGuard;

type CliBoard = Board<HttpRemote>;

#[derive(Parser, Debug)]
#[command(version, about = "Kanban task board with live sync")]
struct Cli {
    #[command(flatten)]
    global: GlobalArgs,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    #[command(flatten)]
    Task(TaskOp),
    /// Log in to the task service and remember the session.
    Login {
        username: String,
        /// Read from stdin when omitted.
        #[arg(long, env = "TASKBOARD_PASSWORD", hide_env_values = true)]
        password: Option<String>,
    },
    /// End the remembered session.
    Logout,
    /// Check a task's status by its guest code (no login needed).
    Lookup { code: String },
    /// Show or switch the color theme.
    Theme {
        #[arg(long)]
        toggle: bool,
    },
    /// Stream live board updates until interrupted.
    Watch,
    /// Interactive session with undo, redo and live updates.
    Shell,
}

/// Board operations shared by one-shot commands and the shell.
#[derive(Subcommand, Debug)]
enum TaskOp {
    /// Show the board, or one column.
    List { column: Option<String> },
    /// Add a task.
    Add(AddArgs),
    /// Edit a task's fields.
    Edit(EditArgs),
    /// Move a task to another column.
    Move { id: TaskId, column: String },
    /// Delete a task.
    Delete { id: TaskId },
    /// Delete every task in the done column.
    Clear,
}

#[derive(clap::Args, Debug)]
struct AddArgs {
    client_name: String,
    /// BDL, SDL, nBDL, nPO or Misc.
    #[arg(short = 't', long)]
    category: Option<String>,
    /// Label for a Misc task.
    #[arg(long)]
    misc_label: Option<String>,
    #[arg(short, long)]
    address: Option<String>,
    /// normal or expedited.
    #[arg(short, long)]
    processing: Option<String>,
    #[arg(short, long)]
    description: Option<String>,
}

#[derive(clap::Args, Debug)]
struct EditArgs {
    id: TaskId,
    #[arg(long)]
    name: Option<String>,
    #[arg(short = 't', long)]
    category: Option<String>,
    #[arg(long)]
    misc_label: Option<String>,
    /// An empty value clears the address.
    #[arg(short, long)]
    address: Option<String>,
    #[arg(short, long)]
    processing: Option<String>,
    /// An empty value clears the description.
    #[arg(short, long)]
    description: Option<String>,
}

/// One line typed into the shell.
#[derive(Parser, Debug)]
#[command(no_binary_name = true)]
struct ShellLine {
    #[command(subcommand)]
    op: ShellOp,
}

#[derive(Subcommand, Debug)]
enum ShellOp {
    #[command(flatten)]
    Task(TaskOp),
    /// Undo the last action.
    Undo,
    /// Redo the last undone action.
    Redo,
    /// Drag a task over a column and drop it (no column cancels).
    Drag { id: TaskId, column: Option<String> },
    /// Reload the board.
    Refresh,
    /// Switch the color theme.
    Theme,
    /// Leave the shell.
    #[command(alias = "exit")]
    Quit,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match ClientConfig::load(&cli.global) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("error: {e}");
            return ExitCode::from(2);
        }
    };

    let _log_guard = init_logging(&cli.global.log_level, cli.global.log_file.as_deref());
    tracing::info!(mode = ?config.mode, "taskboard starting");

    match run(cli.command, &config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::debug!(err = %e, "command failed");
            ExitCode::FAILURE
        }
    }
}

/// Logs go to `file_path` when given, otherwise to stderr.
///
/// Returns a [`WorkerGuard`] that must be held until shutdown so buffered
/// file entries are flushed.
fn init_logging(level: &str, file_path: Option<&Path>) -> Option<WorkerGuard> {
    let env_filter = tracing_subscriber::EnvFilter::try_new(level)
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn"));

    let Some(log_path) = file_path else {
        tracing_subscriber::fmt()
            .with_writer(std::io::stderr)
            .with_env_filter(env_filter)
            .init();
        return None;
    };

    let log_dir = log_path.parent().filter(|d| !d.as_os_str().is_empty());
    let log_dir = log_dir.unwrap_or_else(|| Path::new("."));
    let file_name = log_path.file_name()?.to_str()?;

    let file_appender = tracing_appender::rolling::never(log_dir, file_name);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    tracing_subscriber::fmt()
        .with_writer(non_blocking)
        .with_env_filter(env_filter)
        .with_ansi(false)
        .init();

    Some(guard)
}

async fn run(command: Command, config: &ClientConfig) -> Result<(), BoardError> {
    let mut out = NoticeCursor::default();

    if let Command::Lookup { code } = &command {
        let remote = http_remote(config)?;
        let mut notices = NoticeBoard::default();
        let result = guest::lookup_with_notice(&remote, code, &mut notices).await;
        out.flush(&notices);
        let status = result.map_err(|e| BoardError::Rejected(e.to_string()))?;
        println!("{}: {}", status.task_id, status.status.label());
        println!("{}", status.message_or_default());
        return Ok(());
    }

    let prefs: Arc<dyn KeyValueStore> = Arc::new(FileStore::open(&config.data_dir)?);
    let mode = match config.mode {
        ModeKind::Local => BoardMode::Local,
        ModeKind::Remote => BoardMode::Remote(http_remote(config)?),
    };
    let mut board = CliBoard::new(mode, prefs, config.board_options());

    if board.is_remote() && !matches!(command, Command::Login { .. }) {
        let resumed = board.resume().await;
        out.flush(board.notices());
        if resumed?.is_none() && !matches!(command, Command::Theme { .. } | Command::Logout) {
            eprintln!("Not logged in. Run `taskboard login <username>` first.");
            return Err(BoardError::SessionExpired);
        }
    }

    let result = match command {
        Command::Task(op) => run_op(&mut board, op).await,
        Command::Login { username, password } => {
            let password = match password {
                Some(p) => p,
                None => read_password()?,
            };
            board.login(&username, &password).await.map(drop)
        }
        Command::Logout => {
            board.logout().await;
            Ok(())
        }
        Command::Theme { toggle } => {
            let result = if toggle {
                board.toggle_theme().map(drop)
            } else {
                Ok(())
            };
            println!("theme: {}", board.theme().as_str());
            result
        }
        Command::Watch => watch(&mut board, config, &mut out).await,
        Command::Shell => shell(&mut board, config, &mut out).await,
        Command::Lookup { .. } => Ok(()),
    };
    report(&board, &mut out, result)
}

fn http_remote(config: &ClientConfig) -> Result<HttpRemote, BoardError> {
    HttpRemote::new(&config.api_url, config.request_timeout)
        .map_err(|e| BoardError::from_remote(e, None))
}

fn read_password() -> Result<String, BoardError> {
    eprint!("Password: ");
    let mut line = String::new();
    std::io::stdin()
        .read_line(&mut line)
        .map_err(|e| BoardError::Rejected(format!("could not read password: {e}")))?;
    Ok(line.trim_end_matches(['\r', '\n']).to_string())
}

/// Prints new notices; falls back to the error itself when the board did
/// not post one.
fn report(
    board: &CliBoard,
    out: &mut NoticeCursor,
    result: Result<(), BoardError>,
) -> Result<(), BoardError> {
    let printed = out.flush(board.notices());
    if let Err(e) = &result
        && printed == 0
    {
        eprintln!("error: {e}");
    }
    result
}

async fn run_op(board: &mut CliBoard, op: TaskOp) -> Result<(), BoardError> {
    match op {
        TaskOp::List { column } => {
            let columns = match column {
                Some(raw) => vec![parse_status(&raw)?],
                None => TaskStatus::ALL.to_vec(),
            };
            print_board(board, &columns);
            Ok(())
        }
        TaskOp::Add(args) => {
            let draft = TaskDraft {
                client_name: args.client_name,
                category: args.category,
                misc_label: args.misc_label,
                address: args.address,
                processing: args.processing,
                description: args.description,
            };
            let task = board.add_task(&draft).await?;
            print_task(&task);
            Ok(())
        }
        TaskOp::Edit(args) => {
            let id = args.id.clone();
            let patch = edit_patch(args)?;
            let task = board.edit_task(&id, patch).await?;
            print_task(&task);
            Ok(())
        }
        TaskOp::Move { id, column } => {
            let task = board.move_task_to(&id, &column).await?;
            print_task(&task);
            Ok(())
        }
        TaskOp::Delete { id } => board.delete_task(&id).await.map(drop),
        TaskOp::Clear => board.clear_completed().await.map(drop),
    }
}

fn edit_patch(args: EditArgs) -> Result<TaskPatch, BoardError> {
    let task_type = args
        .category
        .as_deref()
        .map(|c| {
            TaskType::from_selection(c, args.misc_label.as_deref())
                .map_err(|_| ValidationError::UnknownTaskType(c.to_string()))
        })
        .transpose()?;
    let processing = args
        .processing
        .as_deref()
        .map(|p| {
            p.parse::<Processing>()
                .map_err(|_| ValidationError::UnknownProcessing(p.to_string()))
        })
        .transpose()?;
    let patch = TaskPatch {
        client_name: args.name,
        task_type,
        address: args.address.map(non_empty),
        processing,
        description: args.description.map(non_empty),
    };
    Ok(validate_patch(patch)?)
}

fn non_empty(s: String) -> Option<String> {
    if s.trim().is_empty() { None } else { Some(s) }
}

// --- live updates ---

fn start_link(
    board: &mut CliBoard,
    config: &ClientConfig,
) -> Result<mpsc::Receiver<LinkEvent>, BoardError> {
    let connector = WsConnector::new(&config.ws_url)
        .map_err(|e| BoardError::Rejected(e.to_string()))?
        .with_keepalive(config.keepalive);
    board.start_push(connector, config.reconnect, config.channel_capacity)
}

async fn watch(
    board: &mut CliBoard,
    config: &ClientConfig,
    out: &mut NoticeCursor,
) -> Result<(), BoardError> {
    if !board.is_remote() {
        return Err(BoardError::Rejected(
            "watch needs --mode remote".to_string(),
        ));
    }
    let mut events = start_link(board, config)?;
    print_board(board, &TaskStatus::ALL);

    loop {
        tokio::select! {
            event = events.recv() => {
                let Some(event) = event else { break };
                on_link_event(board, event).await;
                out.flush(board.notices());
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("interrupted");
                break;
            }
        }
    }
    board.stop_push().await;
    Ok(())
}

async fn on_link_event(board: &mut CliBoard, event: LinkEvent) {
    let summary = match &event {
        LinkEvent::Push(message) => describe_push(message),
        _ => None,
    };
    if let Some(outcome) = board.handle_link_event(event).await
        && outcome.is_changed()
        && let Some(summary) = summary
    {
        println!("* {summary}");
    }
}

fn describe_push(message: &PushMessage) -> Option<String> {
    Some(match message {
        PushMessage::TaskCreated { data } => format!("added: {}", task_line(data)),
        PushMessage::TaskUpdated { data } => format!("updated: {}", task_line(data)),
        PushMessage::TaskMoved { data } => {
            format!("moved to {}: {}", data.status.label(), task_line(data))
        }
        PushMessage::TaskDeleted { data } => format!("deleted: task #{}", data.id),
        PushMessage::TasksCleared { data } => {
            format!("cleared {} completed task(s)", data.deleted_task_ids.len())
        }
        PushMessage::ConnectionEstablished { .. } | PushMessage::Pong => return None,
    })
}

// --- shell ---

async fn shell(
    board: &mut CliBoard,
    config: &ClientConfig,
    out: &mut NoticeCursor,
) -> Result<(), BoardError> {
    let mut events = if board.is_remote() {
        match start_link(board, config) {
            Ok(events) => Some(events),
            Err(e) => {
                eprintln!("live updates off: {e}");
                None
            }
        }
    } else {
        None
    };

    println!("taskboard shell. Type `help` for commands, `quit` to leave.");
    print_board(board, &TaskStatus::ALL);
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Ok(Some(line)) = line else { break };
                let tokens = match split_line(&line) {
                    Ok(tokens) if tokens.is_empty() => continue,
                    Ok(tokens) => tokens,
                    Err(e) => {
                        eprintln!("error: {e}");
                        continue;
                    }
                };
                let op = match ShellLine::try_parse_from(tokens) {
                    Ok(parsed) => parsed.op,
                    Err(e) => {
                        let _ = e.print();
                        continue;
                    }
                };
                if matches!(op, ShellOp::Quit) {
                    break;
                }
                let result = run_shell_op(board, op).await;
                // Errors are reported; the shell keeps going.
                let _ = report(board, out, result);
            }
            event = recv_event(&mut events) => {
                match event {
                    Some(event) => {
                        on_link_event(board, event).await;
                        out.flush(board.notices());
                    }
                    None => events = None,
                }
            }
        }
    }
    board.stop_push().await;
    Ok(())
}

async fn recv_event(events: &mut Option<mpsc::Receiver<LinkEvent>>) -> Option<LinkEvent> {
    match events {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

async fn run_shell_op(board: &mut CliBoard, op: ShellOp) -> Result<(), BoardError> {
    match op {
        ShellOp::Task(op) => run_op(board, op).await,
        ShellOp::Undo => board.undo().await.map(drop),
        ShellOp::Redo => board.redo().await.map(drop),
        ShellOp::Drag { id, column } => {
            board.begin_drag(&id)?;
            let Some(raw) = column else {
                board.cancel_drag();
                return Ok(());
            };
            let column = match parse_status(&raw) {
                Ok(column) => column,
                Err(e) => {
                    board.cancel_drag();
                    return Err(e);
                }
            };
            if let Some(placeholder) = board.hover_drag(Some(column)) {
                println!(
                    "dropping into {} at position {}",
                    placeholder.status.label(),
                    placeholder.index + 1
                );
            }
            if let Some(task) = board.drop_drag(Some(column)).await? {
                print_task(&task);
            }
            Ok(())
        }
        ShellOp::Refresh => {
            let count = board.refresh().await?;
            println!("{count} task(s)");
            Ok(())
        }
        ShellOp::Theme => board
            .toggle_theme()
            .map(|theme| println!("theme: {}", theme.as_str())),
        ShellOp::Quit => Ok(()),
    }
}

/// Splits a shell line into words. Single and double quotes group words;
/// a backslash escapes the next character outside single quotes.
fn split_line(line: &str) -> Result<Vec<String>, String> {
    let mut words = Vec::new();
    let mut current = String::new();
    let mut in_word = false;
    let mut quote: Option<char> = None;
    let mut chars = line.chars();

    while let Some(c) = chars.next() {
        match (quote, c) {
            (Some(q), c) if c == q => quote = None,
            (Some('\''), c) => current.push(c),
            (_, '\\') => {
                let escaped = chars.next().ok_or("trailing backslash")?;
                current.push(escaped);
                in_word = true;
            }
            (Some(_), c) => current.push(c),
            (None, '"' | '\'') => {
                quote = Some(c);
                in_word = true;
            }
            (None, c) if c.is_whitespace() => {
                if in_word {
                    words.push(std::mem::take(&mut current));
                    in_word = false;
                }
            }
            (None, c) => {
                current.push(c);
                in_word = true;
            }
        }
    }
    if quote.is_some() {
        return Err("unterminated quote".to_string());
    }
    if in_word {
        words.push(current);
    }
    Ok(words)
}

// --- output ---

fn print_board(board: &CliBoard, columns: &[TaskStatus]) {
    for status in columns {
        let tasks = board.column(*status);
        println!("{} ({})", status.label(), tasks.len());
        for task in tasks {
            println!("  {}", task_line(task));
        }
    }
}

fn print_task(task: &Task) {
    println!("{} [{}]", task_line(task), task.status.label());
}

fn task_line(task: &Task) -> String {
    let mut line = format!("#{} {} | {}", task.id, task.client_name, task.task_type);
    if task.processing == Processing::Expedited {
        line.push_str(" | EXPEDITED");
    }
    if let Some(address) = &task.address {
        line.push_str(" | ");
        line.push_str(address);
    }
    if let Some(code) = task.guest_code() {
        line.push_str(" | ");
        line.push_str(&code);
    }
    line
}

/// Prints each notice once.
#[derive(Debug, Default)]
struct NoticeCursor {
    last_id: Option<u64>,
}

impl NoticeCursor {
    fn flush(&mut self, notices: &NoticeBoard) -> usize {
        let mut printed = 0;
        for notice in notices.active() {
            if self.last_id.is_some_and(|last| notice.id <= last) {
                continue;
            }
            match notice.level {
                NoticeLevel::Error => eprintln!("error: {}", notice.text),
                NoticeLevel::Warning => eprintln!("warning: {}", notice.text),
                NoticeLevel::Info | NoticeLevel::Success => println!("{}", notice.text),
            }
            self.last_id = Some(notice.id);
            printed += 1;
        }
        printed
    }
}
