//! Line-oriented stdin commands for a running session.

use std::io::{self, BufRead};
use std::thread;

use crossbeam_channel::{Receiver, Sender};
use shadersrc::ShaderStage;

pub const HELP: &str = "\
commands:
  list                          slot states as JSON
  reload                        re-import every watched file
  rescan                        check watched files for changes now
  watch <path> <tag> [stage]    start watching a file
  unwatch <path> <tag>          stop watching a file
  dump <tag> <stage>            introspection report as JSON
  stats                         compiler cache counters
  snapshot <path>               save the current frame as PNG
  quit                          stop the session";

#[derive(Debug, Clone, PartialEq)]
pub enum ConsoleCommand {
    List,
    Reload,
    Rescan,
    Watch {
        path: String,
        tag: String,
        stage: Option<ShaderStage>,
    },
    Unwatch {
        path: String,
        tag: String,
    },
    Dump {
        tag: String,
        stage: ShaderStage,
    },
    Stats,
    Snapshot(String),
    Help,
    Quit,
}

impl ConsoleCommand {
    pub fn parse(line: &str) -> Result<Option<Self>, String> {
        let mut words = line.split_whitespace();
        let Some(verb) = words.next() else {
            return Ok(None);
        };
        let args: Vec<&str> = words.collect();
        let command = match (verb.to_ascii_lowercase().as_str(), args.as_slice()) {
            ("list" | "ls", []) => Self::List,
            ("reload", []) => Self::Reload,
            ("rescan", []) => Self::Rescan,
            ("watch", [path, tag]) => Self::Watch {
                path: path.to_string(),
                tag: tag.to_string(),
                stage: None,
            },
            ("watch", [path, tag, stage]) => Self::Watch {
                path: path.to_string(),
                tag: tag.to_string(),
                stage: Some(stage.parse()?),
            },
            ("unwatch", [path, tag]) => Self::Unwatch {
                path: path.to_string(),
                tag: tag.to_string(),
            },
            ("dump", [tag, stage]) => Self::Dump {
                tag: tag.to_string(),
                stage: stage.parse()?,
            },
            ("stats", []) => Self::Stats,
            ("snapshot", [path]) => Self::Snapshot(path.to_string()),
            ("help" | "?", []) => Self::Help,
            ("quit" | "exit" | "q", []) => Self::Quit,
            (verb, _) => return Err(format!("bad command '{verb}'; type `help`")),
        };
        Ok(Some(command))
    }
}

/// Spawns the stdin reader. The thread ends at end of input or once the
/// receiving side is dropped.
pub fn spawn() -> io::Result<Receiver<ConsoleCommand>> {
    let (tx, rx) = crossbeam_channel::unbounded();
    thread::Builder::new()
        .name("shadebox-console".into())
        .spawn(move || read_commands(tx))?;
    Ok(rx)
}

fn read_commands(tx: Sender<ConsoleCommand>) {
    let stdin = io::stdin();
    for line in stdin.lock().lines() {
        let line = match line {
            Ok(line) => line,
            Err(err) => {
                tracing::warn!(error = %err, "console input failed");
                break;
            }
        };
        match ConsoleCommand::parse(&line) {
            Ok(Some(command)) => {
                if tx.send(command).is_err() {
                    break;
                }
            }
            Ok(None) => {}
            Err(err) => tracing::warn!("{err}"),
        }
    }
    tracing::debug!("console input closed");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_commands() {
        assert_eq!(ConsoleCommand::parse("list").unwrap(), Some(ConsoleCommand::List));
        assert_eq!(ConsoleCommand::parse("  QUIT ").unwrap(), Some(ConsoleCommand::Quit));
        assert_eq!(ConsoleCommand::parse("rescan").unwrap(), Some(ConsoleCommand::Rescan));
        assert_eq!(
            ConsoleCommand::parse("watch shaders/a.frag scene fragment").unwrap(),
            Some(ConsoleCommand::Watch {
                path: "shaders/a.frag".into(),
                tag: "scene".into(),
                stage: Some(ShaderStage::Fragment),
            })
        );
        assert_eq!(
            ConsoleCommand::parse("dump background frag").unwrap(),
            Some(ConsoleCommand::Dump {
                tag: "background".into(),
                stage: ShaderStage::Fragment,
            })
        );
    }

    #[test]
    fn blank_lines_are_ignored() {
        assert_eq!(ConsoleCommand::parse("   ").unwrap(), None);
    }

    #[test]
    fn rejects_bad_arity_and_stages() {
        assert!(ConsoleCommand::parse("watch only-a-path").is_err());
        assert!(ConsoleCommand::parse("dump scene pixel").is_err());
        assert!(ConsoleCommand::parse("frobnicate").is_err());
    }
}
