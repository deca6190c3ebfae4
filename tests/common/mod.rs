//! Scripted in-process NNTP server for integration tests
//!
//! Speaks just enough NNTP for the upload path (greeting, AUTHINFO, GROUP,
//! STAT, POST, IHAVE, DATE, QUIT) and can be told to misbehave in the ways
//! real servers do.

#![allow(dead_code)]

use nntp_upload::ServerConfig;
use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};

/// Ways the server deviates from a healthy one
#[derive(Debug, Clone)]
pub struct Behaviour {
    /// Greeting line sent to every connection
    pub greeting: String,
    /// Greet the first N connections with 400 and hang up
    pub busy_greetings: usize,
    /// Credentials required before POST/STAT
    pub credentials: Option<(String, String)>,
    /// Answer the first N posted articles with 441
    pub reject_posts: usize,
    /// Hang up after reading the first N article bodies, without answering
    pub drop_after_body: usize,
    /// Never answer the first N article bodies (the client times out)
    pub stall_after_body: usize,
    /// Acknowledge but do not store the first N articles
    pub lose_articles: usize,
    /// Report every stored article as missing for its first N STATs
    pub hidden_stats: usize,
    /// Acknowledge posts under this message-id instead of the sent one
    pub echo_id: Option<String>,
    /// Header whose presence makes the server stall instead of answering
    pub stall_on_header: Option<String>,
    /// Raw reply lines sent to the first STAT commands, in order
    pub stat_replies: Vec<String>,
    /// Never answer the first N POST/IHAVE commands (the client times out)
    pub stall_post_commands: usize,
    /// Delay before every response
    pub latency: Duration,
}

impl Default for Behaviour {
    fn default() -> Self {
        Self {
            greeting: "200 mock server ready, posting allowed".to_string(),
            busy_greetings: 0,
            credentials: None,
            reject_posts: 0,
            drop_after_body: 0,
            stall_after_body: 0,
            lose_articles: 0,
            hidden_stats: 0,
            echo_id: None,
            stall_on_header: None,
            stat_replies: Vec::new(),
            stall_post_commands: 0,
            latency: Duration::ZERO,
        }
    }
}

#[derive(Debug, Default)]
struct State {
    connections: usize,
    posts_received: usize,
    stored: HashSet<String>,
    stored_order: Vec<String>,
    stat_counts: HashMap<String, usize>,
    stats_seen: usize,
    post_commands: usize,
    articles: Vec<String>,
    commands: Vec<String>,
}

/// Handle to a running mock server
#[derive(Clone)]
pub struct MockServer {
    addr: SocketAddr,
    behaviour: Arc<Behaviour>,
    state: Arc<Mutex<State>>,
}

impl MockServer {
    /// Bind to an ephemeral port and start accepting
    pub async fn start(behaviour: Behaviour) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let server = Self {
            addr: listener.local_addr().unwrap(),
            behaviour: Arc::new(behaviour),
            state: Arc::new(Mutex::new(State::default())),
        };

        let accept = server.clone();
        tokio::spawn(async move {
            loop {
                let Ok((stream, _)) = listener.accept().await else {
                    break;
                };
                let session = accept.clone();
                tokio::spawn(async move {
                    let _ = session.handle_client(stream).await;
                });
            }
        });
        server
    }

    /// Client configuration pointing at this server with short timeouts
    pub fn config(&self) -> ServerConfig {
        let (user, pass) = self.behaviour.credentials.clone().unwrap_or_default();
        ServerConfig::plain("127.0.0.1", user, pass)
            .with_port(self.addr.port())
            .with_connections(1)
            .with_timeouts(
                Duration::from_secs(2),
                Duration::from_secs(2),
                Duration::from_millis(500),
            )
            .with_retries(1, 2, 1)
            .with_reconnect_delay(Duration::from_millis(10))
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap()
    }

    /// Connections accepted so far
    pub fn connections(&self) -> usize {
        self.state().connections
    }

    /// Article texts read so far (including rejected and lost ones)
    pub fn posts_received(&self) -> usize {
        self.state().posts_received
    }

    /// Message-ids of stored articles, in arrival order
    pub fn stored(&self) -> Vec<String> {
        self.state().stored_order.clone()
    }

    /// Raw article texts received, in arrival order
    pub fn articles(&self) -> Vec<String> {
        self.state().articles.clone()
    }

    /// Command lines received, in arrival order
    pub fn commands(&self) -> Vec<String> {
        self.state().commands.clone()
    }

    /// Store an article as if it had been posted earlier
    pub fn preload(&self, message_id: &str) {
        let mut state = self.state();
        state.stored.insert(message_id.to_string());
        state.stored_order.push(message_id.to_string());
    }

    async fn handle_client(&self, stream: TcpStream) -> std::io::Result<()> {
        let (reader, mut writer) = stream.into_split();
        let mut reader = BufReader::new(reader);

        let busy = {
            let mut state = self.state();
            state.connections += 1;
            state.connections <= self.behaviour.busy_greetings
        };
        if busy {
            writer.write_all(b"400 too many connections\r\n").await?;
            return Ok(());
        }
        writer
            .write_all(format!("{}\r\n", self.behaviour.greeting).as_bytes())
            .await?;
        let read_only = self.behaviour.greeting.starts_with("201");

        let mut authenticated = self.behaviour.credentials.is_none();
        let mut user_ok = false;

        loop {
            let mut line = String::new();
            if reader.read_line(&mut line).await? == 0 {
                return Ok(());
            }
            let command_line = line.trim_end().to_string();
            self.state().commands.push(command_line.clone());

            let mut parts = command_line.split_whitespace();
            let command = parts.next().unwrap_or("").to_uppercase();
            let argument = parts.next().unwrap_or("").to_string();

            if !self.behaviour.latency.is_zero() {
                tokio::time::sleep(self.behaviour.latency).await;
            }

            let needs_auth = matches!(command.as_str(), "POST" | "IHAVE" | "STAT" | "GROUP");
            if needs_auth && !authenticated {
                writer.write_all(b"480 authentication required\r\n").await?;
                continue;
            }

            match command.as_str() {
                "QUIT" => {
                    writer.write_all(b"205 bye\r\n").await?;
                    return Ok(());
                }
                "AUTHINFO" => {
                    let verb = argument.to_uppercase();
                    let value = parts.next().unwrap_or("").to_string();
                    let (user, pass) = self.behaviour.credentials.clone().unwrap_or_default();
                    match verb.as_str() {
                        "USER" => {
                            user_ok = value == user;
                            writer.write_all(b"381 password required\r\n").await?;
                        }
                        "PASS" if user_ok && value == pass => {
                            authenticated = true;
                            writer.write_all(b"281 authentication accepted\r\n").await?;
                        }
                        _ => writer.write_all(b"481 authentication failed\r\n").await?,
                    }
                }
                "GROUP" => {
                    if argument.starts_with("no.such") {
                        writer.write_all(b"411 no such group\r\n").await?;
                    } else {
                        let reply = format!("211 10 1 10 {}\r\n", argument);
                        writer.write_all(reply.as_bytes()).await?;
                    }
                }
                "DATE" => writer.write_all(b"111 20240131235959\r\n").await?,
                "STAT" => {
                    let reply = self.stat(&argument);
                    writer.write_all(reply.as_bytes()).await?;
                }
                "POST" | "IHAVE" => {
                    if read_only {
                        writer.write_all(b"440 posting not permitted\r\n").await?;
                        continue;
                    }
                    let stalled = {
                        let mut state = self.state();
                        state.post_commands += 1;
                        state.post_commands <= self.behaviour.stall_post_commands
                    };
                    if stalled {
                        drain(&mut reader).await?;
                        return Ok(());
                    }
                    let (go_ahead, done) = if command == "POST" {
                        ("340 send article\r\n", "240")
                    } else {
                        ("335 send it\r\n", "235")
                    };
                    writer.write_all(go_ahead.as_bytes()).await?;

                    let Some(article) = read_article(&mut reader).await? else {
                        return Ok(());
                    };
                    match self.accept_article(&article) {
                        Verdict::Drop => return Ok(()),
                        Verdict::Stall => {
                            drain(&mut reader).await?;
                            return Ok(());
                        }
                        Verdict::Reject => {
                            let code = if command == "POST" { "441" } else { "437" };
                            let reply = format!("{} posting failed\r\n", code);
                            writer.write_all(reply.as_bytes()).await?;
                        }
                        Verdict::Accept(id) => {
                            let reply = format!("{} {} article received\r\n", done, id);
                            writer.write_all(reply.as_bytes()).await?;
                        }
                    }
                }
                _ => writer.write_all(b"500 command not recognized\r\n").await?,
            }
        }
    }

    fn stat(&self, id: &str) -> String {
        if !id.starts_with('<') {
            return "423 no such article number\r\n".to_string();
        }
        let mut state = self.state();
        state.stats_seen += 1;
        if let Some(reply) = self.behaviour.stat_replies.get(state.stats_seen - 1) {
            return format!("{}\r\n", reply);
        }
        if !state.stored.contains(id) {
            return "430 no such article\r\n".to_string();
        }
        let seen = state.stat_counts.entry(id.to_string()).or_insert(0);
        *seen += 1;
        if *seen <= self.behaviour.hidden_stats {
            "430 no such article\r\n".to_string()
        } else {
            format!("223 0 {}\r\n", id)
        }
    }

    fn accept_article(&self, article: &str) -> Verdict {
        let mut state = self.state();
        state.posts_received += 1;
        state.articles.push(article.to_string());
        let n = state.posts_received;

        if let Some(header) = &self.behaviour.stall_on_header {
            let prefix = format!("{}:", header.to_lowercase());
            if article
                .lines()
                .any(|line| line.to_lowercase().starts_with(&prefix))
            {
                return Verdict::Stall;
            }
        }
        if n <= self.behaviour.drop_after_body {
            return Verdict::Drop;
        }
        if n <= self.behaviour.drop_after_body + self.behaviour.stall_after_body {
            return Verdict::Stall;
        }
        if n <= self.behaviour.reject_posts {
            return Verdict::Reject;
        }

        let id = self
            .behaviour
            .echo_id
            .clone()
            .or_else(|| header_value(article, "Message-ID"))
            .unwrap_or_else(|| format!("<mock{}@localhost>", n));
        if n > self.behaviour.lose_articles && !state.stored.contains(&id) {
            state.stored.insert(id.clone());
            state.stored_order.push(id.clone());
        }
        Verdict::Accept(id)
    }
}

enum Verdict {
    Accept(String),
    Reject,
    Drop,
    Stall,
}

/// Keep the socket open without answering until the client gives up
async fn drain(reader: &mut BufReader<tokio::net::tcp::OwnedReadHalf>) -> std::io::Result<()> {
    let mut rest = String::new();
    while reader.read_line(&mut rest).await? > 0 {
        rest.clear();
    }
    Ok(())
}

/// Read a dot-terminated article; `None` if the client hung up
async fn read_article(
    reader: &mut BufReader<tokio::net::tcp::OwnedReadHalf>,
) -> std::io::Result<Option<String>> {
    let mut article = String::new();
    loop {
        let mut line = String::new();
        if reader.read_line(&mut line).await? == 0 {
            return Ok(None);
        }
        if line == ".\r\n" {
            return Ok(Some(article));
        }
        article.push_str(&line);
    }
}

/// Value of a header in an article text
pub fn header_value(article: &str, name: &str) -> Option<String> {
    let prefix = format!("{}:", name.to_lowercase());
    article
        .lines()
        .take_while(|line| !line.is_empty())
        .find(|line| line.to_lowercase().starts_with(&prefix))
        .map(|line| line[prefix.len()..].trim().to_string())
}

/// Install a tracing subscriber honouring RUST_LOG, once per test binary
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
