//! quill-cli: command-line client for the Quill chat and article HTTP API
//!
//! # Subcommands
//! - `chats [--json]`                                  list chats with their latest message
//! - `new-chat [--external-id <id>] [--category <c>]`  open a chat
//! - `send <chat_id> <message> [--auth-token <t>]`     send a message, print the reply
//! - `history <chat_id> [--json]`                      print a chat's messages in order
//! - `delete-chat <chat_id>`
//! - `articles [--json]`                               article index
//! - `article <article_id> [--json]`
//! - `new-article <name> [--content <text>]`
//! - `update-article <article_id> <name> --content <text>`
//! - `delete-article <article_id>`
//! - `status`                                          show server health

use anyhow::{anyhow, Context};
use clap::{Parser, Subcommand};
use reqwest::blocking::Client;
use reqwest::Method;
use serde_json::{json, Value};

const DEFAULT_SERVER: &str = "http://127.0.0.1:8780";
const PREVIEW_CHARS: usize = 80;

// ============================================================================
// CLI Definition
// ============================================================================

#[derive(Debug, Parser)]
#[command(name = "quill-cli", version, about = "Quill chat and article client")]
struct Cli {
    /// Quill HTTP server URL (overrides QUILL_HTTP_URL env var)
    #[arg(long, env = "QUILL_HTTP_URL", default_value = DEFAULT_SERVER)]
    server: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// List chats with a preview of their latest message
    Chats {
        #[arg(long)]
        json: bool,
    },

    /// Create a new chat and print its id
    NewChat {
        /// Caller-supplied key for the chat
        #[arg(long)]
        external_id: Option<String>,

        #[arg(long)]
        category: Option<String>,
    },

    /// Send a message to a chat and print the assistant reply
    Send {
        chat_id: String,
        message: String,

        /// Provider key to use instead of the server's configured one
        #[arg(long, env = "QUILL_AUTH_TOKEN")]
        auth_token: Option<String>,

        #[arg(long)]
        json: bool,
    },

    /// Print the messages of a chat, oldest first
    History {
        chat_id: String,

        #[arg(long)]
        json: bool,
    },

    /// Delete a chat and all of its messages
    DeleteChat { chat_id: String },

    /// List articles
    Articles {
        #[arg(long)]
        json: bool,
    },

    /// Show one article
    Article {
        article_id: String,

        #[arg(long)]
        json: bool,
    },

    /// Create an article and print its id
    NewArticle {
        name: String,

        #[arg(long, default_value = "")]
        content: String,
    },

    /// Replace an article's name and content
    UpdateArticle {
        article_id: String,
        name: String,

        /// New body; replaces the stored content (pass "" to clear it)
        #[arg(long)]
        content: String,
    },

    /// Delete an article
    DeleteArticle { article_id: String },

    /// Show Quill server status
    Status,
}

// ============================================================================
// HTTP Client
// ============================================================================

struct ApiClient {
    client: Client,
    server: String,
}

impl ApiClient {
    fn new(server: &str) -> anyhow::Result<Self> {
        // Sends wait on the chat provider, so allow for slow replies.
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(180))
            .build()?;
        Ok(Self {
            client,
            server: server.trim_end_matches('/').to_string(),
        })
    }

    /// Issue a request and return the JSON body of a successful response.
    fn call(&self, method: Method, path: &str, body: Option<Value>) -> anyhow::Result<Value> {
        let url = format!("{}{}", self.server, path);
        let mut req = self.client.request(method, &url);
        if let Some(body) = body {
            req = req.json(&body);
        }

        let resp = req
            .send()
            .with_context(|| format!("connection failed to {}", url))?;
        let status = resp.status();
        let text = resp.text().unwrap_or_default();

        if !status.is_success() {
            return Err(anyhow!("server returned {}: {}", status, error_message(&text)));
        }
        if text.is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_str(&text).with_context(|| format!("failed to parse response from {}", url))
    }

    fn get(&self, path: &str) -> anyhow::Result<Value> {
        self.call(Method::GET, path, None)
    }
}

// ============================================================================
// Formatting helpers
// ============================================================================

/// Pull the `error` field out of an error body, or fall back to the raw text.
pub fn error_message(body: &str) -> String {
    serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| v["error"].as_str().map(str::to_string))
        .unwrap_or_else(|| body.to_string())
}

/// Readable text for message content: strings as-is, block lists by their
/// first text block, anything else as compact JSON.
pub fn content_text(content: &Value) -> String {
    match content {
        Value::String(s) => s.clone(),
        Value::Array(blocks) => blocks
            .iter()
            .find(|b| b["type"] == "text")
            .and_then(|b| b["text"].as_str())
            .map(str::to_string)
            .unwrap_or_else(|| content.to_string()),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// First line of `text`, capped at `max` characters.
pub fn preview(text: &str, max: usize) -> String {
    let line = text.lines().find(|l| !l.trim().is_empty()).unwrap_or("");
    let mut out: String = line.chars().take(max).collect();
    if line.chars().count() > max {
        out.push('…');
    }
    out
}

pub fn format_chat_line(chat: &Value) -> String {
    format!(
        "{}  {}",
        chat["id"].as_str().unwrap_or("?"),
        preview(&content_text(&chat["last_message"]), PREVIEW_CHARS)
    )
}

pub fn format_history_entry(message: &Value) -> String {
    let role = message["role"].as_str().unwrap_or("?");
    let text = content_text(&message["content"]);
    match message["tool_name"].as_str() {
        Some(tool) => format!("[{} · {}] {}", role, tool, text),
        None => format!("[{}] {}", role, text),
    }
}

pub fn format_article_line(article: &Value) -> String {
    format!(
        "{}  {}",
        article["id"].as_str().unwrap_or("?"),
        article["article_name"].as_str().unwrap_or("")
    )
}

fn print_json(value: &Value) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn as_list(value: &Value) -> &[Value] {
    value.as_array().map(Vec::as_slice).unwrap_or(&[])
}

// ============================================================================
// Commands
// ============================================================================

fn do_chats(api: &ApiClient, json_output: bool) -> anyhow::Result<()> {
    let chats = api.get("/chat/get_chats")?;
    if json_output {
        return print_json(&chats);
    }
    let chats = as_list(&chats);
    if chats.is_empty() {
        eprintln!("No chats yet");
    }
    for chat in chats {
        println!("{}", format_chat_line(chat));
    }
    Ok(())
}

fn do_new_chat(
    api: &ApiClient,
    external_id: Option<String>,
    category: Option<String>,
) -> anyhow::Result<()> {
    let body = json!({ "external_id": external_id, "category": category });
    let created = api.call(Method::POST, "/chat/create_chat", Some(body))?;
    println!("{}", created["chat_id"].as_str().unwrap_or("?"));
    Ok(())
}

fn do_send(
    api: &ApiClient,
    chat_id: &str,
    message: &str,
    auth_token: Option<String>,
    json_output: bool,
) -> anyhow::Result<()> {
    let body = json!({ "chat_id": chat_id, "message": message, "auth_token": auth_token });
    let reply = api.call(Method::POST, "/chat/send_message", Some(body))?;
    if json_output {
        return print_json(&reply);
    }
    println!("{}", reply["content"].as_str().unwrap_or_default());
    Ok(())
}

fn do_history(api: &ApiClient, chat_id: &str, json_output: bool) -> anyhow::Result<()> {
    let history = api.get(&format!("/chat/get_chat_history?chat_id={}", chat_id))?;
    if json_output {
        return print_json(&history);
    }
    for message in as_list(&history) {
        println!("{}", format_history_entry(message));
    }
    Ok(())
}

fn do_delete_chat(api: &ApiClient, chat_id: &str) -> anyhow::Result<()> {
    let resp = api.call(Method::DELETE, "/chat/delete_chat", Some(json!({ "chat_id": chat_id })))?;
    println!("{}", resp["message"].as_str().unwrap_or("Chat deleted"));
    Ok(())
}

fn do_articles(api: &ApiClient, json_output: bool) -> anyhow::Result<()> {
    let articles = api.get("/article/")?;
    if json_output {
        return print_json(&articles);
    }
    for article in as_list(&articles) {
        println!("{}", format_article_line(article));
    }
    Ok(())
}

fn do_article(api: &ApiClient, article_id: &str, json_output: bool) -> anyhow::Result<()> {
    let article = api.get(&format!("/article/get_article?article_id={}", article_id))?;
    if json_output {
        return print_json(&article);
    }
    println!("# {}", article["article_name"].as_str().unwrap_or(""));
    println!("Updated: {}\n", article["updated_at"].as_str().unwrap_or("?"));
    println!("{}", article["article_content"].as_str().unwrap_or(""));
    Ok(())
}

fn do_new_article(api: &ApiClient, name: &str, content: &str) -> anyhow::Result<()> {
    let body = json!({ "article_name": name, "article_content": content });
    let created = api.call(Method::POST, "/article/create_article", Some(body))?;
    println!("{}", created["id"].as_str().unwrap_or("?"));
    Ok(())
}

fn do_update_article(api: &ApiClient, article_id: &str, name: &str, content: &str) -> anyhow::Result<()> {
    let body = json!({ "article_id": article_id, "article_name": name, "article_content": content });
    let updated = api.call(Method::PUT, "/article/update_article", Some(body))?;
    println!("{}", format_article_line(&updated));
    Ok(())
}

fn do_delete_article(api: &ApiClient, article_id: &str) -> anyhow::Result<()> {
    let body = json!({ "article_id": article_id });
    let resp = api.call(Method::DELETE, "/article/delete_article", Some(body))?;
    println!("{}", resp["message"].as_str().unwrap_or("Article deleted"));
    Ok(())
}

/// Show the server status by calling GET /health.
fn do_status(api: &ApiClient) -> anyhow::Result<()> {
    let body = api.get("/health")?;
    println!("Quill server: {}", body["status"].as_str().unwrap_or("unknown"));
    println!("Version:      {}", body["version"].as_str().unwrap_or("?"));
    println!("PostgreSQL:   {}", body["postgresql"].as_str().unwrap_or("?"));
    println!("Model:        {}", body["model"].as_str().unwrap_or("?"));
    Ok(())
}

// ============================================================================
// Main
// ============================================================================

fn run(cli: Cli) -> anyhow::Result<()> {
    let api = ApiClient::new(&cli.server)?;

    match cli.command {
        Commands::Chats { json } => do_chats(&api, json),
        Commands::NewChat {
            external_id,
            category,
        } => do_new_chat(&api, external_id, category),
        Commands::Send {
            chat_id,
            message,
            auth_token,
            json,
        } => do_send(&api, &chat_id, &message, auth_token, json),
        Commands::History { chat_id, json } => do_history(&api, &chat_id, json),
        Commands::DeleteChat { chat_id } => do_delete_chat(&api, &chat_id),
        Commands::Articles { json } => do_articles(&api, json),
        Commands::Article { article_id, json } => do_article(&api, &article_id, json),
        Commands::NewArticle { name, content } => do_new_article(&api, &name, &content),
        Commands::UpdateArticle {
            article_id,
            name,
            content,
        } => do_update_article(&api, &article_id, &name, &content),
        Commands::DeleteArticle { article_id } => do_delete_article(&api, &article_id),
        Commands::Status => do_status(&api),
    }
}

fn main() {
    let cli = Cli::parse();

    if let Err(e) = run(cli) {
        eprintln!("quill-cli: {:#}", e);
        std::process::exit(1);
    }
}

// ============================================================================
// Tests
// ============================================================================
