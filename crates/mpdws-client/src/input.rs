//! Line-oriented command input for the `mpdws` binary.
//!
//! Each stdin line is one command.  Positions are playlist indices, ranges are
//! end-exclusive.

use mpdws_proto::protocol::ClientCommand;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::debug;

/// What the user asked the core to do.
#[derive(Debug, Clone, PartialEq)]
pub enum Input {
    /// Forwarded to the server as-is.
    Command(ClientCommand),
    /// Start a new search from the first page.
    Search(String),
    /// Fetch the next page of the current search.
    MoreResults,
    ClearSearch,
    /// Print the current snapshot.
    Show,
    Quit,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum InputError {
    #[error("unknown command {0:?} (try `help`)")]
    Unknown(String),
    #[error("usage: {0}")]
    Usage(&'static str),
}

pub const HELP: &str = "\
commands:
  search <query>          new search
  more                    next page of results
  clearsearch             drop search results
  fetch <start> <end>     request playlist positions
  add <path> [pos]        add a database path
  move <start> <end> <pos>
  delete <start> <end>
  remove <id>             remove by song id
  clear                   clear the playlist
  play [id]  stop  pause  next  prev
  seek <secs>
  current                 request the current song
  show                    print state
  quit";

/// Parse one line.  Blank lines yield `Ok(None)`.
pub fn parse(line: &str) -> Result<Option<Input>, InputError> {
    let line = line.trim();
    let Some((word, rest)) = split_word(line) else {
        return Ok(None);
    };

    let input = match word {
        "search" => {
            if rest.is_empty() {
                return Err(InputError::Usage("search <query>"));
            }
            Input::Search(rest.to_string())
        }
        "more" => Input::MoreResults,
        "clearsearch" => Input::ClearSearch,
        "show" => Input::Show,
        "quit" | "exit" => Input::Quit,
        "fetch" => {
            let [start, end] = numbers::<2>(rest, "fetch <start> <end>")?;
            Input::Command(ClientCommand::PlaylistQuery { start, end })
        }
        "add" => {
            let usage = "add <path> [pos]";
            let (path, pos) = match rest.rsplit_once(' ') {
                Some((path, pos)) if pos.parse::<usize>().is_ok() => {
                    (path.trim(), pos.parse::<usize>().ok())
                }
                _ => (rest, None),
            };
            if path.is_empty() {
                return Err(InputError::Usage(usage));
            }
            Input::Command(ClientCommand::AddPath {
                path: path.to_string(),
                pos,
            })
        }
        "move" => {
            let [start, end, pos] = numbers::<3>(rest, "move <start> <end> <pos>")?;
            Input::Command(ClientCommand::PlaylistMove { start, end, pos })
        }
        "delete" => {
            let [start, end] = numbers::<2>(rest, "delete <start> <end>")?;
            Input::Command(ClientCommand::PlaylistDelete { start, end })
        }
        "remove" => {
            let [id] = numbers::<1>(rest, "remove <id>")?;
            Input::Command(ClientCommand::RemoveId(id as u64))
        }
        "clear" => Input::Command(ClientCommand::Clear),
        "play" => {
            let id = if rest.is_empty() {
                None
            } else {
                let [id] = numbers::<1>(rest, "play [id]")?;
                Some(id as u64)
            };
            Input::Command(ClientCommand::PlayId(id))
        }
        "stop" => Input::Command(ClientCommand::Stop),
        "pause" => Input::Command(ClientCommand::Pause),
        "next" => Input::Command(ClientCommand::PlayNext),
        "prev" => Input::Command(ClientCommand::PlayPrev),
        "seek" => {
            let secs = rest
                .parse::<f64>()
                .ok()
                .filter(|s| s.is_finite() && *s >= 0.0)
                .ok_or(InputError::Usage("seek <secs>"))?;
            Input::Command(ClientCommand::Seek(secs))
        }
        "current" => Input::Command(ClientCommand::CurrentSong),
        other => return Err(InputError::Unknown(other.to_string())),
    };
    Ok(Some(input))
}

fn split_word(line: &str) -> Option<(&str, &str)> {
    if line.is_empty() {
        return None;
    }
    Some(match line.split_once(char::is_whitespace) {
        Some((word, rest)) => (word, rest.trim()),
        None => (line, ""),
    })
}

/// Exactly `N` whitespace-separated non-negative integers.
fn numbers<const N: usize>(rest: &str, usage: &'static str) -> Result<[usize; N], InputError> {
    let mut out = [0usize; N];
    let mut parts = rest.split_whitespace();
    for slot in out.iter_mut() {
        *slot = parts
            .next()
            .and_then(|p| p.parse().ok())
            .ok_or(InputError::Usage(usage))?;
    }
    if parts.next().is_some() {
        return Err(InputError::Usage(usage));
    }
    Ok(out)
}

/// Read stdin line by line and forward parsed input.  `help` and parse errors
/// are answered on stderr directly.  Stops at EOF or when the core goes away.
pub fn spawn_stdin_reader(input_tx: mpsc::Sender<Input>) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        loop {
            let line = match lines.next_line().await {
                Ok(Some(line)) => line,
                Ok(None) => {
                    debug!("input: stdin closed");
                    break;
                }
                Err(e) => {
                    debug!("input: read error: {}", e);
                    break;
                }
            };
            if line.trim() == "help" {
                eprintln!("{}", HELP);
                continue;
            }
            match parse(&line) {
                Ok(Some(input)) => {
                    if input_tx.send(input).await.is_err() {
                        break;
                    }
                }
                Ok(None) => {}
                Err(e) => eprintln!("{}", e),
            }
        }
    })
}
