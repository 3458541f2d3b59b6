//! Operator command parsing and dispatch.
//!
//! A command line is one verb followed by whitespace-delimited arguments, no
//! quoting. Verbs are matched case-insensitively against a closed enum, so a
//! typo can never silently fall through to the wrong handler. Every handler
//! validates its own argument count and answers with a usage line instead of
//! proceeding. Parse problems are operator-visible replies, never errors.

use std::str::FromStr;
use std::sync::Arc;

use log::debug;
use tokio::sync::broadcast;

use crate::config::ServerConfig;
use crate::server::ServerManager;
use crate::server::instance::ServerInstance;

/// The closed set of operator verbs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verb {
    Echo,
    Start,
    Stop,
    Install,
    Update,
    Server,
    AllServer,
    Import,
    Run,
    Send,
    Logs,
    Exit,
}

impl Verb {
    pub const ALL: [Verb; 12] = [
        Verb::Echo,
        Verb::Start,
        Verb::Stop,
        Verb::Install,
        Verb::Update,
        Verb::Server,
        Verb::AllServer,
        Verb::Import,
        Verb::Run,
        Verb::Send,
        Verb::Logs,
        Verb::Exit,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Verb::Echo => "echo",
            Verb::Start => "start",
            Verb::Stop => "stop",
            Verb::Install => "install",
            Verb::Update => "update",
            Verb::Server => "server",
            Verb::AllServer => "allserver",
            Verb::Import => "import",
            Verb::Run => "run",
            Verb::Send => "send",
            Verb::Logs => "logs",
            Verb::Exit => "exit",
        }
    }

    fn usage(&self) -> &'static str {
        match self {
            Verb::Echo => "usage: echo [text...]",
            Verb::Start => "usage: start <server>",
            Verb::Stop => "usage: stop <server>",
            Verb::Install => "usage: install <server>",
            Verb::Update => "usage: update <server>",
            Verb::Server => "usage: server <server>",
            Verb::AllServer => "usage: allserver",
            Verb::Import => "usage: import <config-file>",
            Verb::Run => "usage: run <server> <script-name>",
            Verb::Send => "usage: send <server> <exec-id> <text...>",
            Verb::Logs => "usage: logs <server>",
            Verb::Exit => "usage: exit",
        }
    }
}

impl FromStr for Verb {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.to_ascii_lowercase();
        Verb::ALL
            .iter()
            .copied()
            .find(|verb| verb.name() == lower)
            .ok_or(())
    }
}

/// Parsed shape of one command line.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum Parsed<'a> {
    Empty,
    Unknown(&'a str),
    Command(Verb, Vec<&'a str>),
}

pub(crate) fn parse_line(line: &str) -> Parsed<'_> {
    let mut parts = line.split_whitespace();
    let Some(first) = parts.next() else {
        return Parsed::Empty;
    };
    match first.parse::<Verb>() {
        Ok(verb) => Parsed::Command(verb, parts.collect()),
        Err(()) => Parsed::Unknown(first),
    }
}

/// Dispatches parsed operator commands against the server fleet.
///
/// Replies are returned as text for the caller to print; command failures
/// are reported in the reply and never propagate past the router.
pub struct CommandRouter {
    manager: Arc<ServerManager>,
    shutdown: broadcast::Sender<()>,
}

impl CommandRouter {
    pub fn new(manager: Arc<ServerManager>, shutdown: broadcast::Sender<()>) -> Self {
        Self { manager, shutdown }
    }

    /// Handle one raw command line and return the operator-facing reply.
    pub async fn dispatch(&self, line: &str) -> String {
        match parse_line(line) {
            Parsed::Empty => "command was empty".to_string(),
            Parsed::Unknown(verb) => {
                debug!("unknown command verb '{}'", verb);
                "command not found".to_string()
            }
            Parsed::Command(verb, args) => self.run_verb(verb, &args).await,
        }
    }

    async fn run_verb(&self, verb: Verb, args: &[&str]) -> String {
        match verb {
            Verb::Echo => args.join(" "),
            Verb::Start => self.lifecycle(verb, args).await,
            Verb::Stop => self.stop(args).await,
            Verb::Install => self.lifecycle(verb, args).await,
            Verb::Update => self.lifecycle(verb, args).await,
            Verb::Server => self.server_status(args).await,
            Verb::AllServer => self.all_servers(args).await,
            Verb::Import => self.import(args).await,
            Verb::Run => self.run_script(args).await,
            Verb::Send => self.send(args).await,
            Verb::Logs => self.logs(args).await,
            Verb::Exit => self.exit(args),
        }
    }

    async fn resolve(&self, key: &str) -> Result<Arc<ServerInstance>, String> {
        self.manager
            .get(key)
            .await
            .ok_or_else(|| format!("unknown server '{}'", key))
    }

    /// start / install / update share one shape: container start plus one
    /// reserved script session.
    async fn lifecycle(&self, verb: Verb, args: &[&str]) -> String {
        if args.len() != 1 {
            return verb.usage().to_string();
        }
        let instance = match self.resolve(args[0]).await {
            Ok(instance) => instance,
            Err(reply) => return reply,
        };
        let result = match verb {
            Verb::Start => instance.start().await,
            Verb::Install => instance.install().await,
            Verb::Update => instance.update().await,
            _ => unreachable!("not a lifecycle verb: {:?}", verb),
        };
        match result {
            Ok(exec_id) => format!("{} {}: session {}", verb.name(), instance.id(), exec_id),
            Err(e) => format!("{} {} failed: {}", verb.name(), instance.id(), e),
        }
    }

    async fn stop(&self, args: &[&str]) -> String {
        if args.len() != 1 {
            return Verb::Stop.usage().to_string();
        }
        let instance = match self.resolve(args[0]).await {
            Ok(instance) => instance,
            Err(reply) => return reply,
        };
        match instance.stop().await {
            Ok(()) => format!("stopped {}", instance.id()),
            Err(e) => format!("stop {} failed: {}", instance.id(), e),
        }
    }

    async fn server_status(&self, args: &[&str]) -> String {
        if args.len() != 1 {
            return Verb::Server.usage().to_string();
        }
        let instance = match self.resolve(args[0]).await {
            Ok(instance) => instance,
            Err(reply) => return reply,
        };
        match instance.status().await {
            Ok(status) => format!(
                "{}: {}\n   ->State: {}\n   ->Status: {}",
                instance.names().join("|"),
                instance.id(),
                status.state,
                status.status
            ),
            Err(e) => format!("status {} failed: {}", instance.id(), e),
        }
    }

    async fn all_servers(&self, args: &[&str]) -> String {
        if !args.is_empty() {
            return Verb::AllServer.usage().to_string();
        }
        let servers = self.manager.list().await;
        if servers.is_empty() {
            return "no servers".to_string();
        }

        let mut reply = String::from("Names: ID");
        for instance in servers {
            reply.push_str(&format!(
                "\n{}: {}",
                instance.names().join("|"),
                instance.id()
            ));
            match instance.status().await {
                Ok(status) => {
                    reply.push_str(&format!("\n   ->State: {}", status.state));
                    reply.push_str(&format!("\n   ->Status: {}", status.status));
                }
                Err(e) => reply.push_str(&format!("\n   ->status unavailable: {}", e)),
            }
        }
        reply
    }

    async fn import(&self, args: &[&str]) -> String {
        if args.len() != 1 {
            return Verb::Import.usage().to_string();
        }
        let config = match ServerConfig::from_file(args[0]) {
            Ok(config) => config,
            Err(e) => return format!("import failed: {:#}", e),
        };
        match self.manager.import(&config).await {
            Ok(instance) => format!("imported {} as {}", config.image, instance.id()),
            Err(e) => format!("import failed: {}", e),
        }
    }

    async fn run_script(&self, args: &[&str]) -> String {
        if args.len() != 2 {
            return Verb::Run.usage().to_string();
        }
        let instance = match self.resolve(args[0]).await {
            Ok(instance) => instance,
            Err(reply) => return reply,
        };
        match instance.exec_script(Some(args[1]), None).await {
            Ok(exec_id) => format!("running '{}': session {}", args[1], exec_id),
            Err(e) => format!("run '{}' failed: {}", args[1], e),
        }
    }

    async fn send(&self, args: &[&str]) -> String {
        if args.len() < 3 {
            return Verb::Send.usage().to_string();
        }
        let instance = match self.resolve(args[0]).await {
            Ok(instance) => instance,
            Err(reply) => return reply,
        };
        let mut text = args[2..].join(" ");
        text.push('\n');
        match instance.interact(args[1], &text).await {
            Ok(()) => String::new(),
            Err(e) => format!("send to {} failed: {}", args[1], e),
        }
    }

    async fn logs(&self, args: &[&str]) -> String {
        if args.len() != 1 {
            return Verb::Logs.usage().to_string();
        }
        let instance = match self.resolve(args[0]).await {
            Ok(instance) => instance,
            Err(reply) => return reply,
        };
        let snapshot = instance.logs().await;
        serde_json::to_string_pretty(&snapshot)
            .unwrap_or_else(|e| format!("logs unavailable: {}", e))
    }

    fn exit(&self, args: &[&str]) -> String {
        if !args.is_empty() {
            return Verb::Exit.usage().to_string();
        }
        let _ = self.shutdown.send(());
        "shutting down".to_string()
    }
}
