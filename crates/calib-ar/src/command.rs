//! User commands, polled once per frame without blocking.

use log::{debug, info};
use std::io::BufRead;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, TryRecvError};
use std::sync::Arc;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum UserCommand {
    #[default]
    None,
    Calibrate,
    Quit,
}

impl UserCommand {
    /// Parse one line of keyboard input: `c` calibrates, `q` or `esc` quits.
    pub fn parse(line: &str) -> Option<Self> {
        match line.trim().to_ascii_lowercase().as_str() {
            "c" | "calibrate" => Some(Self::Calibrate),
            "q" | "quit" | "esc" | "\u{1b}" => Some(Self::Quit),
            _ => None,
        }
    }

    // Quit outranks Calibrate outranks None.
    fn priority(self) -> u8 {
        match self {
            Self::None => 0,
            Self::Calibrate => 1,
            Self::Quit => 2,
        }
    }
}

pub trait CommandSource {
    /// Pending command, [`UserCommand::None`] if there is nothing to act on.
    fn poll(&mut self) -> UserCommand;
}

/// Lines typed on stdin, read by a detached thread.
///
/// The thread only forwards parsed commands through a channel; it exits on
/// end of input.
pub struct StdinCommands {
    rx: Receiver<UserCommand>,
}

impl StdinCommands {
    pub fn spawn() -> Self {
        Self::from_reader(std::io::BufReader::new(std::io::stdin()))
    }

    /// Forward commands parsed from any line reader.
    pub fn from_reader<R: BufRead + Send + 'static>(reader: R) -> Self {
        let (tx, rx) = mpsc::channel();
        std::thread::spawn(move || {
            for line in reader.lines() {
                let Ok(line) = line else { break };
                match UserCommand::parse(&line) {
                    Some(cmd) => {
                        if tx.send(cmd).is_err() {
                            break;
                        }
                    }
                    None => debug!("ignoring input {line:?}"),
                }
            }
        });
        Self { rx }
    }
}

impl CommandSource for StdinCommands {
    fn poll(&mut self) -> UserCommand {
        match self.rx.try_recv() {
            Ok(cmd) => cmd,
            Err(TryRecvError::Empty | TryRecvError::Disconnected) => UserCommand::None,
        }
    }
}

/// Commands fired at fixed poll counts (1-based, one poll per frame).
#[derive(Clone, Debug, Default)]
pub struct ScriptedCommands {
    schedule: Vec<(u64, UserCommand)>,
    polls: u64,
}

impl ScriptedCommands {
    pub fn new(mut schedule: Vec<(u64, UserCommand)>) -> Self {
        schedule.sort_by_key(|&(at, _)| at);
        Self { schedule, polls: 0 }
    }

    /// Calibrate at frame `calibrate_after`, quit at frame `quit_after`.
    pub fn from_frame_counts(calibrate_after: Option<u64>, quit_after: Option<u64>) -> Self {
        let mut schedule = Vec::new();
        if let Some(n) = calibrate_after {
            schedule.push((n, UserCommand::Calibrate));
        }
        if let Some(n) = quit_after {
            schedule.push((n, UserCommand::Quit));
        }
        Self::new(schedule)
    }
}

impl CommandSource for ScriptedCommands {
    fn poll(&mut self) -> UserCommand {
        self.polls += 1;
        self.schedule
            .iter()
            .filter(|&&(at, _)| at == self.polls)
            .map(|&(_, cmd)| cmd)
            .max_by_key(|c| c.priority())
            .unwrap_or_default()
    }
}

/// Quit request raised by an interrupt (Ctrl-C).
#[derive(Clone, Debug, Default)]
pub struct InterruptCommands {
    flag: Arc<AtomicBool>,
}

impl InterruptCommands {
    /// Install the process-wide Ctrl-C handler. Only one may be installed.
    pub fn install() -> Result<Self, ctrlc::Error> {
        let flag = Arc::new(AtomicBool::new(false));
        let handler_flag = Arc::clone(&flag);
        ctrlc::set_handler(move || handler_flag.store(true, Ordering::SeqCst))?;
        Ok(Self { flag })
    }

    /// Watch an externally owned flag.
    pub fn from_flag(flag: Arc<AtomicBool>) -> Self {
        Self { flag }
    }
}

impl CommandSource for InterruptCommands {
    fn poll(&mut self) -> UserCommand {
        if self.flag.load(Ordering::SeqCst) {
            info!("interrupted, closing...");
            UserCommand::Quit
        } else {
            UserCommand::None
        }
    }
}

/// Polls every source each frame and keeps the most urgent command.
#[derive(Default)]
pub struct CombinedCommands {
    sources: Vec<Box<dyn CommandSource>>,
}

impl CombinedCommands {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, source: impl CommandSource + 'static) -> Self {
        self.sources.push(Box::new(source));
        self
    }
}

impl CommandSource for CombinedCommands {
    fn poll(&mut self) -> UserCommand {
        self.sources
            .iter_mut()
            .map(|s| s.poll())
            .fold(UserCommand::None, |best, c| {
                if c.priority() > best.priority() {
                    c
                } else {
                    best
                }
            })
    }
}
