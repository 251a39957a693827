//! docchat CLI - document-aware AI chat

use std::io::BufRead;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use console::style;
use docchat_core::models::{CreateKnowledgeBaseRequest, LoginRequest, UploadFile};
use docchat_core::poller::{PollOutcome, StatusPoller};
use docchat_core::{Backend, ChatSession, Config, HttpBackend, StoreEvent, tree};
use tokio::io::AsyncBufReadExt;
use tokio::sync::broadcast::error::RecvError;

mod pretty;

#[derive(Debug, Parser)]
#[command(
    name = "docchat",
    author,
    version,
    about = "Chat with an assistant about your documents",
    propagate_version = true
)]
struct Cli {
    /// Config file path
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Increase verbosity
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Log in and store the session token
    Login {
        /// Account email
        email: String,

        /// Company code
        #[arg(long)]
        company: String,

        /// Password (read from stdin when omitted)
        #[arg(long, env = "DOCCHAT_PASSWORD", hide_env_values = true)]
        password: Option<String>,
    },

    /// Forget the stored session token
    Logout,

    /// List conversations
    Chats {
        /// Output JSON
        #[arg(long)]
        json: bool,
    },

    /// Create a conversation
    New {
        /// Conversation name
        name: String,
    },

    /// Show a conversation
    Show {
        /// Conversation ID
        id: String,

        /// Output JSON
        #[arg(long)]
        json: bool,
    },

    /// Send a message and wait for the reply
    Send {
        /// Conversation ID
        id: String,

        /// Message text
        text: String,
    },

    /// Chat interactively (type /upload <file> to attach a PDF, /quit to leave)
    Chat {
        /// Conversation ID
        id: String,
    },

    /// Upload a PDF and attach it to a conversation once indexed
    Upload {
        /// Conversation ID
        id: String,

        /// PDF file
        file: PathBuf,
    },

    /// Follow a processing job until it finishes
    Job {
        /// Processing job ID
        job_id: String,
    },

    /// Show the document directory tree
    Tree {
        /// Directory ID (root when omitted)
        dir: Option<String>,
    },

    /// Manage knowledge bases
    Kb {
        #[command(subcommand)]
        command: KbCommand,
    },
}

#[derive(Debug, Subcommand)]
enum KbCommand {
    /// List knowledge bases
    List,

    /// Show a knowledge base
    Show {
        /// Knowledge base ID
        id: String,
    },

    /// Create a knowledge base
    Create {
        /// Name
        name: String,

        /// Directory holding its documents
        #[arg(long)]
        directory: String,

        /// Description
        #[arg(long, default_value = "")]
        description: String,

        /// Scope id
        #[arg(long, default_value = "1")]
        scope: i64,
    },

    /// Delete a knowledge base
    Delete {
        /// Knowledge base ID
        id: String,
    },

    /// Add a document to a knowledge base
    AddDoc {
        /// Knowledge base ID
        id: String,

        /// Document ID
        document: String,
    },

    /// Scope a conversation to a knowledge base
    Link {
        /// Conversation ID
        conversation: String,

        /// Knowledge base ID
        id: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let level = match cli.verbose {
        0 => tracing::Level::INFO,
        1 => tracing::Level::DEBUG,
        _ => tracing::Level::TRACE,
    };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    // Load config
    let config_path = cli.config.unwrap_or_else(Config::default_config_path);
    let config = Config::ensure_at(&config_path)?;

    match cli.command {
        Command::Login {
            email,
            company,
            password,
        } => cmd_login(&config, email, company, password).await,
        Command::Logout => cmd_logout(&config),
        command => {
            let http = connect(&config)?;
            run_authenticated(&config, &config_path, http, command).await
        }
    }
}

fn connect(config: &Config) -> Result<HttpBackend> {
    let http = HttpBackend::from_config(config)?;
    if !http.is_authenticated() {
        bail!("Not logged in. Use 'docchat login <email> --company <code>' first.");
    }
    Ok(http)
}

async fn run_authenticated(
    config: &Config,
    config_path: &Path,
    http: HttpBackend,
    command: Command,
) -> Result<()> {
    tracing::debug!(config = %config_path.display(), base_url = http.base_url(), "Connected");
    match command {
        Command::Chats { json } => cmd_chats(&http, json).await,
        Command::New { name } => cmd_new(&http, &name).await,
        Command::Show { id, json } => cmd_show(&http, &id, json).await,
        Command::Send { id, text } => cmd_send(config, http, &id, &text).await,
        Command::Chat { id } => cmd_chat(config, http, &id).await,
        Command::Upload { id, file } => cmd_upload(config, http, &id, &file).await,
        Command::Job { job_id } => cmd_job(config, http, &job_id).await,
        Command::Tree { dir } => cmd_tree(&http, dir.as_deref()).await,
        Command::Kb { command } => cmd_kb(&http, command).await,
        Command::Login { .. } | Command::Logout => Ok(()),
    }
}

async fn cmd_login(
    config: &Config,
    email: String,
    company: String,
    password: Option<String>,
) -> Result<()> {
    let password = match password {
        Some(password) => password,
        None => {
            eprint!("Password: ");
            let mut line = String::new();
            std::io::stdin().lock().read_line(&mut line)?;
            line.trim_end_matches(['\r', '\n']).to_string()
        }
    };
    let http = HttpBackend::new(config.api.base_url.clone(), None)?;
    let credentials = LoginRequest {
        company_id: company,
        email,
        password,
    };
    let token = http.login(&credentials).await?;
    config.store_token(&token.token)?;
    match token.expires_at {
        Some(expires) => println!("Logged in (session expires {}).", expires.format("%Y-%m-%d %H:%M")),
        None => println!("Logged in."),
    }
    Ok(())
}

fn cmd_logout(config: &Config) -> Result<()> {
    config.clear_token()?;
    println!("Logged out.");
    Ok(())
}

async fn cmd_chats(http: &HttpBackend, json: bool) -> Result<()> {
    let conversations = http.list_conversations().await?;
    if json {
        println!("{}", serde_json::to_string_pretty(&conversations)?);
    } else {
        pretty::print_conversations(&conversations);
    }
    Ok(())
}

async fn cmd_new(http: &HttpBackend, name: &str) -> Result<()> {
    let conversation = http.create_conversation(name).await?;
    println!("Created conversation {} ({})", conversation.id, conversation.name);
    Ok(())
}

async fn cmd_show(http: &HttpBackend, id: &str, json: bool) -> Result<()> {
    let conversation = http.conversation(id).await?;
    if json {
        println!("{}", serde_json::to_string_pretty(&conversation)?);
        return Ok(());
    }
    println!("{}", style(&conversation.name).bold());
    println!("Assistant: {}", conversation.assistant_name);
    if let Some(kb) = conversation.knowledge_base() {
        let name = conversation.knowledge_base_name.as_deref().unwrap_or_default();
        println!("Knowledge base: {name} ({kb})");
    }
    println!();
    pretty::print_transcript(&conversation.messages);
    Ok(())
}

fn open_session(config: &Config, http: HttpBackend, id: &str) -> ChatSession {
    let backend: Arc<dyn Backend> = Arc::new(http);
    ChatSession::new(backend, id, config)
}

/// Print the session's notice, if any, to stderr.
fn report_notice(session: &ChatSession) {
    if let Some(notice) = session.store().status().notice {
        eprintln!("{}", style(notice).yellow());
    }
}

/// Stream the pending reply to stdout until it is fully revealed.
async fn follow_reply(session: &ChatSession) -> Result<()> {
    let store = session.store();
    let mut events = session.subscribe();
    let mut printer = pretty::RevealPrinter::default();

    let wait = session.wait_for_reply();
    tokio::pin!(wait);
    let result = loop {
        tokio::select! {
            result = &mut wait => break result,
            event = events.recv() => match event {
                Ok(event) => printer.on_event(store, &event),
                Err(RecvError::Lagged(_)) => {}
                Err(RecvError::Closed) => break wait.await,
            },
            _ = tokio::signal::ctrl_c() => {
                session.dispose();
                break wait.await;
            }
        }
    };
    while let Ok(event) = events.try_recv() {
        printer.on_event(store, &event);
    }
    printer.flush(store);
    report_notice(session);
    result.map_err(Into::into)
}

async fn cmd_send(config: &Config, http: HttpBackend, id: &str, text: &str) -> Result<()> {
    let session = open_session(config, http, id);
    session.load().await?;
    let job_id = session.send_message(text).await?;
    tracing::info!(job_id, "Message sent");
    follow_reply(&session).await
}

async fn cmd_chat(config: &Config, http: HttpBackend, id: &str) -> Result<()> {
    let session = open_session(config, http, id);
    session.load().await?;
    pretty::print_transcript(&session.store().messages());

    let mut lines = tokio::io::BufReader::new(tokio::io::stdin()).lines();
    loop {
        eprint!("{} ", style(">").cyan().bold());
        let line = tokio::select! {
            line = lines.next_line() => line?,
            _ = tokio::signal::ctrl_c() => None,
        };
        let Some(line) = line else {
            break;
        };
        let line = line.trim();
        if line == "/quit" {
            break;
        }
        if let Some(path) = line.strip_prefix("/upload ") {
            if let Err(err) = upload_with_progress(&session, Path::new(path.trim())).await {
                eprintln!("{}", style(format!("Upload failed: {err}")).red());
            }
            continue;
        }
        if line.is_empty() {
            continue;
        }
        match session.send_message(line).await {
            Ok(_) => {
                if let Err(err) = follow_reply(&session).await {
                    eprintln!("{}", style(format!("Reply failed: {err}")).red());
                }
            }
            Err(err) => {
                report_notice(&session);
                tracing::debug!(error = %err, "Send rejected");
            }
        }
        if session.is_disposed() {
            break;
        }
    }
    session.dispose();
    Ok(())
}

async fn upload_with_progress(session: &ChatSession, path: &Path) -> Result<()> {
    let file = UploadFile::from_path(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;

    let store = session.store().clone();
    let mut events = session.subscribe();
    let progress = tokio::spawn(async move {
        let mut progress = pretty::UploadProgress::default();
        loop {
            match events.recv().await {
                Ok(StoreEvent::StatusChanged) => progress.update(&store.status().upload),
                Ok(_) | Err(RecvError::Lagged(_)) => {}
                Err(RecvError::Closed) => break,
            }
            if !store.status().upload.is_active() {
                break;
            }
        }
    });

    let result = session.upload_document(file).await;
    progress.abort();
    match result {
        Ok(message) => {
            pretty::print_message(&message);
            Ok(())
        }
        Err(err) => {
            report_notice(session);
            Err(err.into())
        }
    }
}

async fn cmd_upload(config: &Config, http: HttpBackend, id: &str, file: &Path) -> Result<()> {
    let session = open_session(config, http, id);
    session.load().await?;
    tokio::select! {
        result = upload_with_progress(&session, file) => result,
        _ = tokio::signal::ctrl_c() => {
            session.dispose();
            bail!("Upload interrupted");
        }
    }
}

async fn cmd_job(config: &Config, http: HttpBackend, job_id: &str) -> Result<()> {
    let backend: Arc<dyn Backend> = Arc::new(http);
    let poller = StatusPoller::new(backend, &config.polling);
    let handle = poller.spawn(job_id, |job| {
        let updated = job
            .updated_at
            .map(|dt| dt.format("%H:%M:%S").to_string())
            .unwrap_or_default();
        println!("{} {} {}", job.id, job.status, style(updated).dim());
    });

    match handle.join_until(wait_for_interrupt()).await? {
        PollOutcome::Processed(job) => println!("Job {} processed.", job.id),
        PollOutcome::TimedOut { attempts } => {
            println!("Gave up after {attempts} status checks; the job may still finish.");
        }
        PollOutcome::Cancelled => println!("Stopped."),
    }
    Ok(())
}

async fn wait_for_interrupt() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %err, "Failed to listen for Ctrl-C");
        std::future::pending::<()>().await;
    }
}

async fn cmd_tree(http: &HttpBackend, dir: Option<&str>) -> Result<()> {
    let root = http.directory_tree().await?;
    let shown = match dir {
        Some(id) => tree::find_directory(&root, id)
            .with_context(|| format!("Directory not found: {id}"))?,
        None => &root,
    };
    pretty::print_tree(shown);
    println!(
        "{}",
        style(format!("{} document(s)", tree::document_count(shown))).dim()
    );
    Ok(())
}

async fn cmd_kb(http: &HttpBackend, command: KbCommand) -> Result<()> {
    match command {
        KbCommand::List => {
            let bases = http.list_knowledge_bases().await?;
            pretty::print_knowledge_bases(&bases);
        }
        KbCommand::Show { id } => {
            let kb = http.knowledge_base(&id).await?;
            pretty::print_knowledge_base(&kb);
        }
        KbCommand::Create {
            name,
            directory,
            description,
            scope,
        } => {
            let request = CreateKnowledgeBaseRequest {
                name,
                description,
                scope_id: scope,
                directory_id: directory,
            };
            let kb = http.create_knowledge_base(&request).await?;
            println!("Created knowledge base {} ({})", kb.id, kb.name);
        }
        KbCommand::Delete { id } => {
            http.delete_knowledge_base(&id).await?;
            println!("Deleted knowledge base {id}");
        }
        KbCommand::AddDoc { id, document } => {
            http.add_document_to_knowledge_base(&id, &document).await?;
            println!("Added document {document} to knowledge base {id}");
        }
        KbCommand::Link { conversation, id } => {
            http.set_conversation_knowledge_base(&conversation, &id)
                .await?;
            println!("Conversation {conversation} now uses knowledge base {id}");
        }
    }
    Ok(())
}
