//! Junos shell sub-session over a pty channel

use super::{ShellOutput, ShellSession};
use crate::{NwError, Result};
use async_trait::async_trait;
use nwkit_ssh::{run_blocking, SshConfig, TransportError};
use regex::Regex;
use ssh2::{Channel, Session};
use std::io::{Read, Write};
use std::sync::{Arc, Mutex};
use tracing::{debug, info};

/// Prompt of a Unix shell on the device (`%`, `#` or `$` at end of output)
pub const DEFAULT_PROMPT: &str = r"(?:%|#|\$)\s?$";

/// Prompt of the Junos CLI
const CLI_PROMPT: &str = r">\s?$";

const READ_CHUNK: usize = 4096;

/// Shell sub-session; drops out of the Junos CLI with `start shell`
pub struct JunosShell {
    host: String,
    config: SshConfig,
    state: Arc<Mutex<ShellState>>,
    closed: bool,
}

struct ShellState {
    channel: Channel,
    prompt: Regex,
}

impl ShellState {
    fn send(&mut self, line: &str) -> Result<()> {
        self.channel.write_all(line.as_bytes())?;
        self.channel.write_all(b"\n")?;
        self.channel.flush()?;
        Ok(())
    }

    /// Read until the accumulated output ends with `pattern`
    fn wait_for(&mut self, pattern: &Regex) -> Result<String> {
        let mut collected = String::new();
        let mut buf = [0u8; READ_CHUNK];
        loop {
            let n = self.channel.read(&mut buf)?;
            if n == 0 {
                return Err(NwError::Connection("shell channel closed".to_string()));
            }
            collected.push_str(&String::from_utf8_lossy(&buf[..n]));
            if pattern.is_match(&collected) {
                return Ok(collected);
            }
        }
    }

    fn run(&mut self, command: &str) -> Result<ShellOutput> {
        let prompt = self.prompt.clone();

        self.send(command)?;
        let raw = self.wait_for(&prompt)?;

        self.send("echo $?")?;
        let status = self.wait_for(&prompt)?;

        Ok(ShellOutput {
            exit_status: parse_exit_status(&status),
            output: strip_echo_and_prompt(&raw, &prompt),
        })
    }
}

impl JunosShell {
    pub(crate) async fn open(session: Session, host: String, config: SshConfig) -> Result<Self> {
        let prompt = Regex::new(DEFAULT_PROMPT)
            .map_err(|e| NwError::InvalidArgument(format!("bad prompt pattern: {}", e)))?;
        let cli = Regex::new(&format!("{}|{}", CLI_PROMPT, DEFAULT_PROMPT))
            .map_err(|e| NwError::InvalidArgument(format!("bad prompt pattern: {}", e)))?;

        let blocking_host = host.clone();
        let state = run_blocking(config.connect_timeout(), "shell open", move || {
            Ok(start_shell(&session, &blocking_host, prompt, &cli))
        })
        .await??;

        info!("Shell open on {}", host);
        Ok(Self {
            host,
            config,
            state: Arc::new(Mutex::new(state)),
            closed: false,
        })
    }
}

fn start_shell(session: &Session, host: &str, prompt: Regex, cli_or_shell: &Regex) -> Result<ShellState> {
    let mut channel = session
        .channel_session()
        .map_err(|e| TransportError::from_ssh("open shell channel", e))?;
    channel
        .request_pty("vt100", None, Some((200, 24, 0, 0)))
        .map_err(|e| TransportError::from_ssh("request pty", e))?;
    channel
        .shell()
        .map_err(|e| TransportError::from_ssh("start shell", e))?;

    let mut state = ShellState { channel, prompt };
    let banner = state.wait_for(cli_or_shell)?;

    // Root logins land in the shell already
    if !state.prompt.is_match(&banner) {
        debug!("{} is at the CLI, starting a shell", host);
        state.send("start shell")?;
        let prompt = state.prompt.clone();
        state.wait_for(&prompt)?;
    }
    Ok(state)
}

#[async_trait]
impl ShellSession for JunosShell {
    async fn run(&mut self, command: &str) -> Result<ShellOutput> {
        if self.closed {
            return Err(NwError::Connection(format!("shell on {} is closed", self.host)));
        }
        debug!("shell {}: {}", self.host, command);

        let state = Arc::clone(&self.state);
        let command = command.to_string();
        run_blocking(self.config.command_timeout(), "shell command", move || {
            Ok(state
                .lock()
                .map_err(|_| NwError::Device("shell state poisoned".to_string()))
                .and_then(|mut shell| shell.run(&command)))
        })
        .await?
    }

    async fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;

        let state = Arc::clone(&self.state);
        run_blocking(self.config.connect_timeout(), "shell close", move || {
            if let Ok(mut shell) = state.lock() {
                // Leave the shell, then the CLI
                let _ = shell.send("exit");
                let _ = shell.send("exit");
                let _ = shell.channel.send_eof();
                shell
                    .channel
                    .wait_close()
                    .map_err(|e| TransportError::from_ssh("close shell", e))?;
            }
            Ok(())
        })
        .await?;

        info!("Shell on {} closed", self.host);
        Ok(())
    }
}

impl std::fmt::Debug for JunosShell {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JunosShell")
            .field("host", &self.host)
            .field("closed", &self.closed)
            .finish()
    }
}

/// Exit status from the output of `echo $?`
fn parse_exit_status(output: &str) -> Option<i32> {
    output
        .lines()
        .skip(1)
        .find_map(|line| line.trim().parse::<i32>().ok())
}

/// Drop the echoed command line and the trailing prompt
fn strip_echo_and_prompt(raw: &str, prompt: &Regex) -> String {
    let normalized = raw.replace("\r\n", "\n").replace('\r', "");
    let mut lines: Vec<&str> = normalized.lines().skip(1).collect();
    if lines.last().is_some_and(|last| prompt.is_match(last)) {
        lines.pop();
    }
    lines.join("\n")
}
