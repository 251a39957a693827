//! Terminal output formatting for the docchat CLI.

use std::io::Write;

use chrono::{DateTime, Utc};
use console::{Style, Term, style};
use docchat_core::models::{ConversationSummary, DirectorySnapshot, KnowledgeBase, Message, MessageOrigin};
use docchat_core::store::UploadPhase;
use docchat_core::{ConversationStore, StoreEvent, tree};

/// Terminal width for formatting, with fallback.
fn term_width() -> usize {
    usize::from(Term::stdout().size().1).max(40)
}

/// Format a relative time string (e.g., "2 days ago", "just now").
fn relative_time(dt: DateTime<Utc>) -> String {
    let duration = Utc::now().signed_duration_since(dt);

    if duration.num_seconds() < 60 {
        return "just now".to_string();
    }
    if duration.num_minutes() < 60 {
        let mins = duration.num_minutes();
        return format!("{mins} min{s} ago", s = if mins == 1 { "" } else { "s" });
    }
    if duration.num_hours() < 24 {
        let hours = duration.num_hours();
        return format!("{hours} hour{s} ago", s = if hours == 1 { "" } else { "s" });
    }
    if duration.num_days() < 7 {
        let days = duration.num_days();
        return format!("{days} day{s} ago", s = if days == 1 { "" } else { "s" });
    }

    dt.format("%Y-%m-%d").to_string()
}

fn origin_style(origin: &MessageOrigin) -> Style {
    match origin {
        MessageOrigin::User(_) => Style::new().cyan().bold(),
        MessageOrigin::Assistant(_) => Style::new().green().bold(),
        MessageOrigin::Other(_) => Style::new().yellow().bold(),
    }
}

fn origin_label(origin: &MessageOrigin) -> String {
    match origin {
        MessageOrigin::User(_) => "you".to_string(),
        MessageOrigin::Assistant(_) => "assistant".to_string(),
        MessageOrigin::Other(value) => value.to_lowercase(),
    }
}

pub fn print_conversations(conversations: &[ConversationSummary]) {
    if conversations.is_empty() {
        println!("{}", style("No conversations found.").dim());
        return;
    }
    for conv in conversations {
        let when = conv.created_at.map(relative_time).unwrap_or_default();
        let name = if conv.name.is_empty() { "(untitled)" } else { &conv.name };
        println!(
            "{} | {} | {} {}",
            style(&conv.id).dim(),
            style(name).bold(),
            conv.assistant_name,
            style(when).dim().italic()
        );
    }
}

/// Header line printed before a message body.
pub fn print_message_header(message: &Message) {
    let label = origin_style(&message.origin).apply_to(origin_label(&message.origin));
    let when = message.timestamp.map(relative_time).unwrap_or_default();
    println!("{label} {}", style(when).dim());
}

pub fn print_message(message: &Message) {
    print_message_header(message);
    if let Some(doc) = message.document() {
        let marker = if message.is_newly_attached { " (new)" } else { "" };
        println!("  {}", style(format!("[document] {doc}{marker}")).magenta());
    }
    let width = term_width().saturating_sub(4);
    for line in message.body.lines() {
        for wrapped in textwrap::wrap(line, width) {
            println!("  {wrapped}");
        }
    }
    println!();
}

pub fn print_transcript(messages: &[Message]) {
    if messages.is_empty() {
        println!("{}", style("No messages yet.").dim());
        return;
    }
    for message in messages {
        print_message(message);
    }
}

pub fn print_tree(root: &DirectorySnapshot) {
    for (depth, dir) in tree::walk(root) {
        let indent = "  ".repeat(depth);
        let kb = dir
            .knowledge_base
            .as_deref()
            .map(|kb| format!(" [kb {kb}]"))
            .unwrap_or_default();
        println!(
            "{indent}{} {}{}",
            style(format!("{}/", dir.name)).blue().bold(),
            style(&dir.id).dim(),
            style(kb).dim()
        );
        for doc in &dir.documents {
            println!(
                "{indent}  {} {} {}",
                doc.name,
                style(&doc.id).dim(),
                status_style(&doc.status).apply_to(&doc.status)
            );
        }
    }
}

fn status_style(status: &str) -> Style {
    if status.trim().eq_ignore_ascii_case(docchat_core::config::DEFAULT_FINISHED_STATUS) {
        Style::new().green()
    } else {
        Style::new().yellow()
    }
}

pub fn print_knowledge_bases(bases: &[KnowledgeBase]) {
    if bases.is_empty() {
        println!("{}", style("No knowledge bases found.").dim());
        return;
    }
    for kb in bases {
        println!(
            "{} | {} | {} | {} doc(s)",
            style(&kb.id).dim(),
            style(&kb.name).bold(),
            kb.scope,
            kb.size
        );
    }
}

pub fn print_knowledge_base(kb: &KnowledgeBase) {
    println!("{}", style(&kb.name).bold());
    println!("Id:          {}", kb.id);
    if !kb.description.is_empty() {
        println!("Description: {}", kb.description);
    }
    println!("Scope:       {}", kb.scope);
    println!("Directory:   {}", kb.directory_id);
    for doc in kb.documents.iter().flatten() {
        println!("  {} {} {}", doc.name, style(&doc.id).dim(), status_style(&doc.status).apply_to(&doc.status));
    }
}

/// Part of `body` not printed yet, given `printed` bytes already shown.
fn unseen_suffix(body: &str, printed: usize) -> Option<&str> {
    body.get(printed..).filter(|rest| !rest.is_empty())
}

/// Streams a revealing message to stdout as the store grows it.
#[derive(Debug, Default)]
pub struct RevealPrinter {
    index: Option<usize>,
    printed: usize,
    finished: bool,
}

impl RevealPrinter {
    pub fn on_event(&mut self, store: &ConversationStore, event: &StoreEvent) {
        match *event {
            StoreEvent::MessageUpdated { index } => self.write(store, index, false),
            StoreEvent::RevealFinished { index } => self.write(store, index, true),
            _ => {}
        }
    }

    /// Print whatever the last reveal still owes, e.g. after a fast-forward.
    pub fn flush(&mut self, store: &ConversationStore) {
        if let Some(index) = self.index
            && !self.finished
        {
            self.write(store, index, true);
        }
    }

    fn write(&mut self, store: &ConversationStore, index: usize, finished: bool) {
        let Some(message) = store.message(index) else {
            return;
        };
        if self.index != Some(index) {
            self.index = Some(index);
            self.printed = 0;
            self.finished = false;
            print_message_header(&message);
            print!("  ");
        }
        if self.finished {
            return;
        }
        if message.body.len() < self.printed {
            // Slot was rewritten underneath us; start over on a new line.
            println!();
            print!("  ");
            self.printed = 0;
        }
        if let Some(rest) = unseen_suffix(&message.body, self.printed) {
            print!("{rest}");
            self.printed = message.body.len();
        }
        if finished {
            println!("\n");
            self.finished = true;
        }
        let _ = std::io::stdout().flush();
    }
}

/// Prints upload progress lines as the phase changes.
#[derive(Debug, Default)]
pub struct UploadProgress {
    last: Option<String>,
}

impl UploadProgress {
    pub fn update(&mut self, phase: &UploadPhase) {
        let text = phase.progress_text();
        if text.is_some() && text != self.last {
            if let Some(text) = &text {
                eprintln!("{}", style(text).dim());
            }
        }
        self.last = text;
    }
}
