use std::io::BufRead;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::thread;
use std::time::Duration;

use anyhow::Result;

use ql::learn::worker::{AgentHandle, Trainer};

pub const STOP: &str = "stop";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StopReason {
    /// `stop` was typed
    Requested,
    /// End of input
    InputClosed,
    /// The agent thread ended by itself, usually with an error
    AgentEnded,
}

/// Lines read from stdin; the channel disconnects at the end of input
pub fn stdin_lines() -> Result<Receiver<String>> {
    let (sender, receiver) = mpsc::channel();
    thread::Builder::new().name("stdin".to_string()).spawn(move || {
        for line in std::io::stdin().lock().lines() {
            let Ok(line) = line else { break };
            if sender.send(line).is_err() {
                break;
            }
        }
    })?;
    Ok(receiver)
}

/// Blocks until `stop` arrives on `lines`, the input ends or the agent thread is gone.
/// Any other line prints `info`.
pub fn wait_for_stop<A: Trainer>(
    handle: &AgentHandle<A>,
    lines: &Receiver<String>,
    poll_interval: Duration,
    info: &str,
) -> StopReason {
    loop {
        if handle.is_finished() {
            log::warn!("the agent stopped on its own");
            return StopReason::AgentEnded;
        }
        match lines.recv_timeout(poll_interval) {
            Ok(line) if line.trim() == STOP => return StopReason::Requested,
            Ok(_) => println!("{}", info),
            Err(RecvTimeoutError::Timeout) => (),
            Err(RecvTimeoutError::Disconnected) => return StopReason::InputClosed,
        }
    }
}

#[cfg(test)]
mod tests {
    use ql::learn::mailbox::ProcessingFlag;
    use ql::prelude::QlError;

    use super::*;

    const POLL: Duration = Duration::from_millis(5);

    struct FailingTrainer {
        processing: ProcessingFlag,
        fail: bool,
    }

    impl Trainer for FailingTrainer {
        fn name(&self) -> String { "failing".to_string() }

        fn processing(&self) -> ProcessingFlag { self.processing.clone() }

        fn train(&mut self) -> Result<()> {
            if self.fail {
                return Err(QlError::from("store is gone").into());
            }
            while self.processing.should_continue() {
                thread::sleep(Duration::from_millis(1));
            }
            Ok(())
        }
    }

    fn spawn(fail: bool) -> Result<AgentHandle<FailingTrainer>> {
        let handle = AgentHandle::spawn(FailingTrainer {
            processing: ProcessingFlag::default(),
            fail,
        })?;
        handle.train();
        Ok(handle)
    }

    #[test]
    fn test_returns_when_agent_fails_without_input() -> Result<()> {
        let handle = spawn(true)?;
        let (_sender, lines) = mpsc::channel::<String>();
        assert_eq!(wait_for_stop(&handle, &lines, POLL, "info"), StopReason::AgentEnded);
        assert!(handle.join().is_err());
        Ok(())
    }

    #[test]
    fn test_stop_request() -> Result<()> {
        let handle = spawn(false)?;
        let (sender, lines) = mpsc::channel();
        sender.send("status".to_string())?;
        sender.send(" stop ".to_string())?;
        assert_eq!(wait_for_stop(&handle, &lines, POLL, "info"), StopReason::Requested);
        handle.stop();
        handle.join()?;
        Ok(())
    }

    #[test]
    fn test_closed_input() -> Result<()> {
        let handle = spawn(false)?;
        let (sender, lines) = mpsc::channel::<String>();
        drop(sender);
        assert_eq!(wait_for_stop(&handle, &lines, POLL, "info"), StopReason::InputClosed);
        handle.stop();
        handle.join()?;
        Ok(())
    }
}
