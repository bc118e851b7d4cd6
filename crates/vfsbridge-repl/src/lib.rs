//! vfsbridge REPL: drive a proxy by hand.
//!
//! Every line is one blocking VFS call, issued from the REPL thread and
//! answered by the Executor thread behind it. Handy for poking at a store
//! and for watching the bridge's logs (`RUST_LOG=vfsbridge=debug`).
//!
//! - `open`, `close`, `read`, `write`, `size`, `sync`, `truncate`
//! - `rm`, `access`, `mkdir`, `sleep`
//! - Meta-commands: `/help`, `/quit`, `/files`, `/tree`, `/metrics`

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use directories::BaseDirs;
use rustyline::error::ReadlineError;
use rustyline::history::DefaultHistory;
use rustyline::Editor;

use vfsbridge_proxy::{ProxyConfig, ProxyVfs};
use vfsbridge_store::{tree, DirectoryHandle, LocalDir, MemoryDir};
use vfsbridge_types::{FileId, OpenFlags, ReadStatus, Vfs, VfsError};

/// REPL state: the proxy plus a handle on its store for listings.
pub struct Repl {
    vfs: ProxyVfs,
    root: Arc<dyn DirectoryHandle>,
    runtime: tokio::runtime::Runtime,
    done: bool,
}

impl Repl {
    /// A REPL over a fresh in-memory store.
    pub fn new() -> Result<Self> {
        Self::with_config(&ProxyConfig::default())
    }

    /// A REPL over `config.root` if set, otherwise an in-memory store.
    pub fn with_config(config: &ProxyConfig) -> Result<Self> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .context("Failed to build runtime")?;

        let root: Arc<dyn DirectoryHandle> = match &config.root {
            Some(path) => runtime
                .block_on(LocalDir::open(path.clone()))
                .with_context(|| format!("Failed to open store at {}", path.display()))?,
            None => MemoryDir::root(),
        };

        let vfs = ProxyVfs::start(root.clone(), config).context("Failed to start proxy")?;
        Ok(Self {
            vfs,
            root,
            runtime,
            done: false,
        })
    }

    /// True once `/quit` has been entered.
    pub fn is_done(&self) -> bool {
        self.done
    }

    /// Process a single line of input.
    pub fn process_line(&mut self, line: &str) -> Result<Option<String>> {
        let trimmed = line.trim();

        if trimmed.starts_with('/') {
            return self.handle_meta_command(trimmed);
        }
        if trimmed.is_empty() {
            return Ok(None);
        }

        let parts: Vec<&str> = trimmed.split_whitespace().collect();
        let (command, args) = match parts.split_first() {
            Some((command, args)) => (*command, args),
            None => return Ok(None),
        };

        let output = match command {
            "open" => self.open(args),
            "close" => self.with_file(args, "close <fd>", |vfs, f| {
                vfs.close(f).map(|()| format!("✓ closed {f}"))
            }),
            "write" => self.write(trimmed, args),
            "read" => self.read(args),
            "size" => self.with_file(args, "size <fd>", |vfs, f| {
                vfs.file_size(f).map(|n| format!("✓ {n} bytes"))
            }),
            "sync" => self.with_file(args, "sync <fd>", |vfs, f| {
                vfs.sync(f).map(|()| "✓ synced".to_string())
            }),
            "truncate" => self.truncate(args),
            "rm" => self.remove(args),
            "access" => match args {
                [path] => status(
                    self.vfs
                        .access(path)
                        .map(|found| if found { "✓ exists" } else { "✗ missing" }.to_string()),
                ),
                _ => usage("access <path>"),
            },
            "mkdir" => match args {
                [path] => status(self.vfs.mkdir(path).map(|()| format!("✓ created {path}"))),
                _ => usage("mkdir <path>"),
            },
            "sleep" => match args {
                [ms] => match ms.parse::<u64>() {
                    Ok(ms) => status(
                        self.vfs
                            .sleep(Duration::from_millis(ms))
                            .map(|()| format!("✓ slept {ms}ms")),
                    ),
                    Err(_) => usage("sleep <ms>"),
                },
                _ => usage("sleep <ms>"),
            },
            other => format!("Unknown command: {other}\nType /help for available commands."),
        };
        Ok(Some(output))
    }

    fn open(&self, args: &[&str]) -> String {
        let Some((path, options)) = args.split_first() else {
            return usage("open <path> [create] [ro] [temp]");
        };
        let mut flags = OpenFlags::default();
        for option in options {
            match *option {
                "create" => flags.create = true,
                "ro" => flags.read_only = true,
                "temp" => flags.delete_on_close = true,
                other => return format!("Unknown open option: {other}"),
            }
        }
        status(self.vfs.open(path, flags).map(|opened| {
            let mode = if opened.read_only { "read-only" } else { "read-write" };
            format!("✓ opened {} ({mode})", opened.file)
        }))
    }

    fn write(&self, line: &str, args: &[&str]) -> String {
        const USAGE: &str = "write <fd> <offset> <text>";
        let (Some(file), Some(offset)) = (
            args.first().and_then(|s| parse_fd(s)),
            args.get(1).and_then(|s| s.parse::<u64>().ok()),
        ) else {
            return usage(USAGE);
        };
        // Text is everything after the offset, spacing preserved
        let Some(text) = rest_after(line, 3) else {
            return usage(USAGE);
        };
        status(
            self.vfs
                .write(file, text.as_bytes(), offset)
                .map(|()| format!("✓ wrote {} bytes", text.len())),
        )
    }

    fn read(&self, args: &[&str]) -> String {
        let [fd, offset, len] = args else {
            return usage("read <fd> <offset> <len>");
        };
        let (Some(file), Ok(offset), Ok(len)) = (parse_fd(fd), offset.parse::<u64>(), len.parse::<usize>())
        else {
            return usage("read <fd> <offset> <len>");
        };
        if len > self.vfs.buffer_capacity() {
            return format!("✗ at most {} bytes per read", self.vfs.buffer_capacity());
        }

        let mut buf = vec![0u8; len];
        status(self.vfs.read(file, &mut buf, offset).map(|outcome| {
            let text = String::from_utf8_lossy(&buf).escape_debug().to_string();
            match outcome {
                ReadStatus::Complete => format!("✓ {text}"),
                ReadStatus::Short => format!("✓ (short) {text}"),
            }
        }))
    }

    fn truncate(&self, args: &[&str]) -> String {
        let [fd, size] = args else {
            return usage("truncate <fd> <size>");
        };
        let (Some(file), Ok(size)) = (parse_fd(fd), size.parse::<u64>()) else {
            return usage("truncate <fd> <size>");
        };
        status(
            self.vfs
                .truncate(file, size)
                .map(|()| format!("✓ truncated to {size} bytes")),
        )
    }

    fn remove(&self, args: &[&str]) -> String {
        let (path, clean) = match args {
            [path] => (*path, false),
            ["-p", path] | [path, "-p"] => (*path, true),
            _ => return usage("rm [-p] <path>"),
        };
        status(self.vfs.delete(path, clean).map(|()| format!("✓ removed {path}")))
    }

    fn with_file(
        &self,
        args: &[&str],
        usage_text: &str,
        op: impl FnOnce(&ProxyVfs, FileId) -> Result<String, VfsError>,
    ) -> String {
        match args {
            [fd] => match parse_fd(fd) {
                Some(file) => status(op(&self.vfs, file)),
                None => usage(usage_text),
            },
            _ => usage(usage_text),
        }
    }

    /// Handle meta-commands (starting with /).
    fn handle_meta_command(&mut self, cmd: &str) -> Result<Option<String>> {
        let parts: Vec<&str> = cmd.split_whitespace().collect();
        let command = parts.first().copied().unwrap_or("");

        match command {
            "/quit" | "/q" | "/exit" => {
                self.done = true;
                Ok(None)
            }
            "/help" | "/h" | "/?" => Ok(Some(HELP_TEXT.to_string())),
            "/files" => {
                let files = self.vfs.open_files();
                if files.is_empty() {
                    return Ok(Some("(no open files)".to_string()));
                }
                let mut output = String::from("Open files:\n");
                for f in files {
                    let mode = if f.read_only { "ro" } else { "rw" };
                    output.push_str(&format!("  {} {mode} {}\n", f.file, f.path));
                }
                Ok(Some(output.trim_end().to_string()))
            }
            "/tree" => {
                let entries = self
                    .runtime
                    .block_on(tree(self.root.clone()))
                    .context("Failed to list store")?;
                if entries.is_empty() {
                    Ok(Some("(empty)".to_string()))
                } else {
                    Ok(Some(entries.join("\n")))
                }
            }
            "/metrics" => {
                let snapshot = self.vfs.metrics();
                Ok(Some(serde_json::to_string_pretty(&snapshot)?))
            }
            _ => Ok(Some(format!(
                "Unknown command: {command}\nType /help for available commands."
            ))),
        }
    }
}

/// Accept `3` or `#3`.
fn parse_fd(s: &str) -> Option<FileId> {
    s.trim_start_matches('#').parse().ok().map(FileId)
}

/// The remainder of `line` after skipping `n` whitespace-separated words.
fn rest_after(line: &str, n: usize) -> Option<&str> {
    let mut rest = line.trim_start();
    for _ in 0..n {
        let end = rest.find(char::is_whitespace)?;
        rest = rest[end..].trim_start();
    }
    (!rest.is_empty()).then_some(rest)
}

fn status(result: Result<String, VfsError>) -> String {
    match result {
        Ok(message) => message,
        Err(e) => format!("✗ {e}"),
    }
}

fn usage(text: &str) -> String {
    format!("usage: {text}")
}

const HELP_TEXT: &str = r#"vfsbridge REPL

Commands:
  /help, /h, /?     Show this help
  /quit, /q, /exit  Shut the proxy down and exit
  /files            List open files
  /tree             List everything in the store
  /metrics          Per-op call counts and blocked time (JSON)

VFS calls:
  open <path> [create] [ro] [temp]   Open a file; prints its fd
  close <fd>
  write <fd> <offset> <text>
  read <fd> <offset> <len>
  size <fd>
  sync <fd>
  truncate <fd> <size>
  rm [-p] <path>                     -p also removes empty parents
  access <path>
  mkdir <path>
  sleep <ms>

Examples:
  open /db/main.db create
  write 1 0 hello
  read 1 0 5
  rm -p /db/main.db
"#;

/// Run the REPL.
pub fn run() -> Result<()> {
    let config = ProxyConfig::load().context("Failed to load configuration")?;

    println!("vfsbridge v{}", env!("CARGO_PKG_VERSION"));
    match &config.root {
        Some(root) => println!("Serving {}", root.display()),
        None => println!("Serving an in-memory store"),
    }
    println!("Type /help for commands, /quit to exit.\n");

    let mut rl: Editor<(), DefaultHistory> = Editor::new().context("Failed to create editor")?;

    let history_path = BaseDirs::new().map(|d| d.data_dir().join("vfsbridge").join("history.txt"));
    if let Some(ref path) = history_path {
        let _ = rl.load_history(path);
    }

    let mut repl = Repl::with_config(&config)?;

    while !repl.is_done() {
        match rl.readline("vfs> ") {
            Ok(line) => {
                let _ = rl.add_history_entry(line.as_str());

                match repl.process_line(&line) {
                    Ok(Some(output)) => println!("{output}"),
                    Ok(None) => {}
                    Err(e) => eprintln!("Error: {e}"),
                }
            }
            Err(ReadlineError::Interrupted) => {
                println!("^C");
                continue;
            }
            Err(ReadlineError::Eof) => {
                println!("^D");
                break;
            }
            Err(err) => {
                eprintln!("Error: {err}");
                break;
            }
        }
    }

    if let Some(ref path) = history_path {
        if let Some(parent) = path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        let _ = rl.save_history(path);
    }

    Ok(())
}
