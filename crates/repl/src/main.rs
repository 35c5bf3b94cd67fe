use std::{
    io::{IsTerminal, Write},
    path::PathBuf,
    sync::Mutex,
};

use clap::Parser;
use debugger::{
    BreakpointId, ExecutionMode, ExpandOutcome, SessionConfig, SessionError, SessionReconciler,
    SessionSnapshot, ThreadId, TransportGateway,
};
use eyre::WrapErr;
use tokio::{
    io::{AsyncBufReadExt, BufReader},
    net::tcp::OwnedWriteHalf,
    sync::watch,
};
use tracing_subscriber::EnvFilter;

type Session = SessionReconciler<TransportGateway<OwnedWriteHalf>>;

#[derive(Debug, Parser)]
struct Args {
    /// Address of the debugger bridge.
    #[clap(default_value = "127.0.0.1:4000")]
    address: String,

    /// Session config file, instead of the one in the user config directory.
    #[clap(short, long)]
    config: Option<PathBuf>,

    /// `all-stop` or `non-stop`.
    #[clap(short, long)]
    mode: Option<ExecutionMode>,

    #[clap(long)]
    reset_frame_on_deselect: Option<bool>,

    /// Write logs here instead of stderr.
    #[clap(long)]
    log_file: Option<PathBuf>,
}

impl Args {
    fn session_config(&self) -> eyre::Result<SessionConfig> {
        let mut config = match &self.config {
            Some(path) => SessionConfig::load(path)?,
            None => SessionConfig::load_default()?,
        };
        if let Some(mode) = self.mode {
            config.mode = mode;
        }
        if let Some(reset) = self.reset_frame_on_deselect {
            config.reset_frame_on_deselect = reset;
        }
        Ok(config)
    }
}

fn init_tracing(log_file: Option<&PathBuf>) -> eyre::Result<()> {
    let builder = tracing_subscriber::fmt().with_env_filter(EnvFilter::from_default_env());
    match log_file {
        Some(path) => {
            let file = std::fs::File::create(path)
                .wrap_err_with(|| format!("creating log file {}", path.display()))?;
            builder.with_writer(Mutex::new(file)).json().init();
        }
        None if std::io::stderr().is_terminal() => builder.with_writer(std::io::stderr).init(),
        None => builder.with_writer(std::io::stderr).json().init(),
    }
    Ok(())
}

enum ShouldQuit {
    True,
    False,
}

struct App {
    session: Session,
    revisions: watch::Receiver<u64>,
    last_status: Option<String>,
}

impl App {
    fn new(session: Session) -> Self {
        let revisions = session.subscribe();
        Self {
            session,
            revisions,
            last_status: None,
        }
    }

    /// One-line summary of where the selected thread is, if anywhere.
    fn status(snapshot: &SessionSnapshot) -> Option<String> {
        let (id, level) = snapshot.selected.as_ref()?;
        let thread = snapshot.thread(id)?;
        let mut status = format!("[{}] {}", thread.id, thread.state);
        if let Some(frame) = thread.stack.get(*level) {
            status.push_str(&format!(" {frame}"));
        }
        Some(status)
    }

    fn on_change(&mut self) -> ShouldQuit {
        let snapshot = self.session.snapshot();
        if snapshot.closed {
            println!("debugger session closed");
            return ShouldQuit::True;
        }
        let status = Self::status(&snapshot);
        if status != self.last_status {
            if let Some(status) = &status {
                println!("{status}");
            }
            self.last_status = status;
        }
        ShouldQuit::False
    }

    async fn handle_input(&mut self, input: &str) -> eyre::Result<ShouldQuit> {
        let (command, rest) = match input.split_once(char::is_whitespace) {
            Some((command, rest)) => (command, rest.trim()),
            None => (input, ""),
        };

        match command {
            "" => {}
            "q" | "quit" => {
                self.session.exit().await.wrap_err("exiting debugger")?;
                return Ok(ShouldQuit::True);
            }
            "n" | "next" => self.session.next().await?,
            "s" | "step" => self.session.step().await?,
            "c" | "continue" => self.session.continue_().await?,
            "i" | "interrupt" => self.session.interrupt().await?,
            "r" | "run" => self.session.run().await?,
            "args" => {
                let args = rest.split_whitespace().map(str::to_string).collect();
                self.session.set_args(args).await?;
            }
            "b" | "break" => {
                let breakpoint = self.session.insert_breakpoint(rest).await?;
                println!("breakpoint {breakpoint}");
            }
            "enable" => self.session.enable_breakpoint(&BreakpointId::new(rest)).await?,
            "disable" => self.session.disable_breakpoint(&BreakpointId::new(rest)).await?,
            "bl" => {
                for breakpoint in self.session.breakpoints() {
                    println!("{breakpoint}");
                }
            }
            "threads" => {
                let selected = self.session.selected_thread();
                for thread in self.session.threads() {
                    let marker = if Some(&thread.id) == selected.as_ref() { "*" } else { " " };
                    println!("{marker} {} {} {}", thread.id, thread.state, thread.name);
                }
            }
            "t" | "thread" => self.session.select_thread(&ThreadId::new(rest)).await?,
            "f" | "frame" => {
                let level = rest.parse::<usize>().wrap_err("frame level")?;
                let thread = self
                    .session
                    .selected_thread()
                    .ok_or_else(|| eyre::eyre!("no thread selected"))?;
                self.session.select_frame(&thread, level)?;
            }
            "bt" => {
                let selected = self.session.selected_thread();
                if let Some(thread) = selected.and_then(|id| self.session.thread(&id)) {
                    let current = self.session.selected_frame(&thread.id);
                    for frame in &thread.stack {
                        let marker = if frame.level == current { ">" } else { " " };
                        println!("{marker} {frame}");
                    }
                }
            }
            "v" | "vars" => {
                for node in self.session.variables() {
                    let indent = if node.is_root { "" } else { "  " };
                    let expandable = if node.is_expandable() { "+" } else { " " };
                    println!("{expandable}{indent}{} = {}", node.expression, node.value);
                }
            }
            "x" | "expand" => match self.session.expand(rest).await? {
                ExpandOutcome::Expanded(n) => println!("{n} children"),
                ExpandOutcome::AlreadyExpanded => {}
                ExpandOutcome::Stale => println!("frame changed, not expanded"),
            },
            "w" | "watch" => match self.session.create_watch(rest).await? {
                Some(node) => println!("{} = {}", node.expression, node.value),
                None => println!("frame changed, watch dropped"),
            },
            "src" => print!("{}", self.session.source(rest).await?),
            "log" => {
                for line in self.session.console() {
                    print!("{}", line.text);
                }
            }
            other => println!("Unhandled command: '{other}'"),
        }
        Ok(ShouldQuit::False)
    }
}

#[tokio::main]
async fn main() -> eyre::Result<()> {
    color_eyre::install().wrap_err("installing color_eyre")?;
    let args = Args::parse();
    init_tracing(args.log_file.as_ref())?;
    tracing::debug!(?args, "parsed command line arguments");

    let config = args.session_config().wrap_err("loading session config")?;
    let session = SessionReconciler::connect(&args.address, &config)
        .await
        .wrap_err_with(|| format!("connecting to {}", args.address))?;
    tracing::debug!(address = %args.address, "session started");

    let mut app = App::new(session);
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("> ");
        std::io::stdout().flush()?;

        let should_quit = tokio::select! {
            line = lines.next_line() => match line.wrap_err("reading stdin")? {
                Some(line) => match app.handle_input(line.trim()).await {
                    Ok(should_quit) => should_quit,
                    Err(e) => match e.downcast_ref::<SessionError>() {
                        Some(SessionError::SessionClosed) => ShouldQuit::True,
                        _ => {
                            println!("error: {e}");
                            ShouldQuit::False
                        }
                    },
                },
                None => ShouldQuit::True,
            },
            changed = app.revisions.changed() => match changed {
                Ok(()) => app.on_change(),
                Err(_) => ShouldQuit::True,
            },
        };
        if let ShouldQuit::True = should_quit {
            break;
        }
    }

    Ok(())
}
