//! Line-oriented input for the guest's descriptor 0.

use std::collections::VecDeque;
use std::io::BufRead;
use std::sync::mpsc;

/// A source of stdin lines for `fd_read`.
///
/// `read_line` is the one place a run may block: it waits until a line is
/// available and returns it without its terminator, or returns `None` when the
/// input was cancelled (which the guest observes as a zero-length read).
pub trait InputSource: Send {
    /// Block until one line of input is available.
    fn read_line(&mut self) -> Option<String>;
}

/// Input that is always cancelled.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoInput;

impl InputSource for NoInput {
    fn read_line(&mut self) -> Option<String> {
        None
    }
}

/// A fixed list of lines, cancelled once exhausted.
#[derive(Debug, Clone, Default)]
pub struct ScriptedInput {
    lines: VecDeque<String>,
}

impl ScriptedInput {
    /// Create input that yields `lines` in order.
    pub fn new<I, S>(lines: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            lines: lines.into_iter().map(Into::into).collect(),
        }
    }

    /// Lines not yet consumed.
    pub fn remaining(&self) -> usize {
        self.lines.len()
    }
}

impl InputSource for ScriptedInput {
    fn read_line(&mut self) -> Option<String> {
        self.lines.pop_front()
    }
}

/// Lines read from the host process's stdin. End of file cancels.
#[derive(Debug, Default)]
pub struct StdinInput;

impl InputSource for StdinInput {
    fn read_line(&mut self) -> Option<String> {
        let mut line = String::new();
        match std::io::stdin().lock().read_line(&mut line) {
            Ok(0) => None,
            Ok(_) => {
                let trimmed = line.trim_end_matches(['\n', '\r']).len();
                line.truncate(trimmed);
                Some(line)
            }
            Err(e) => {
                tracing::warn!("stdin read failed: {}", e);
                None
            }
        }
    }
}

/// Lines delivered over a channel. A closed channel cancels.
#[derive(Debug)]
pub struct ChannelInput {
    rx: mpsc::Receiver<String>,
}

impl ChannelInput {
    /// Create a connected sender/input pair.
    pub fn pair() -> (mpsc::Sender<String>, Self) {
        let (tx, rx) = mpsc::channel();
        (tx, Self { rx })
    }
}

impl InputSource for ChannelInput {
    fn read_line(&mut self) -> Option<String> {
        self.rx.recv().ok()
    }
}

impl<F> InputSource for F
where
    F: FnMut() -> Option<String> + Send,
{
    fn read_line(&mut self) -> Option<String> {
        self()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scripted_input_in_order() {
        let mut input = ScriptedInput::new(["first", "second"]);
        assert_eq!(input.read_line().as_deref(), Some("first"));
        assert_eq!(input.remaining(), 1);
        assert_eq!(input.read_line().as_deref(), Some("second"));
        assert_eq!(input.read_line(), None);
    }

    #[test]
    fn test_channel_input_blocks_until_sent() {
        let (tx, mut input) = ChannelInput::pair();
        let handle = std::thread::spawn(move || input.read_line());
        tx.send("late".to_string()).unwrap();
        assert_eq!(handle.join().unwrap().as_deref(), Some("late"));
    }

    #[test]
    fn test_closed_channel_cancels() {
        let (tx, mut input) = ChannelInput::pair();
        drop(tx);
        assert_eq!(input.read_line(), None);
    }

    #[test]
    fn test_closure_input() {
        let mut calls = 0;
        let mut input = move || {
            calls += 1;
            (calls == 1).then(|| "once".to_string())
        };
        assert_eq!(InputSource::read_line(&mut input).as_deref(), Some("once"));
        assert_eq!(InputSource::read_line(&mut input), None);
    }
}
