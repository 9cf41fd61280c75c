use std::sync::Arc;
use std::thread::JoinHandle;

use anyhow::Result;

use crate::learn::mailbox::{Command, Mailbox, ProcessingFlag};
use crate::prelude::QlError;

/// Something that trains until its [ProcessingFlag] gets lowered
pub trait Trainer: Send + 'static {
    fn name(&self) -> String;

    fn processing(&self) -> ProcessingFlag;

    fn train(&mut self) -> Result<()>;
}

/// Controls an agent running on its own thread.
///
/// The thread waits for commands: `Train` runs [Trainer::train], `Quit` ends the thread.
pub struct AgentHandle<A> {
    mailbox: Arc<Mailbox>,
    processing: ProcessingFlag,
    thread: JoinHandle<Result<A>>,
}

impl<A: Trainer> AgentHandle<A> {
    pub fn spawn(mut agent: A) -> Result<Self> {
        let mailbox = Arc::new(Mailbox::new());
        let processing = agent.processing();
        let thread_mailbox = Arc::clone(&mailbox);
        let thread = std::thread::Builder::new().name(agent.name()).spawn(move || {
            loop {
                match thread_mailbox.wait_read() {
                    Command::Quit => break,
                    Command::Train => {
                        if let Err(e) = agent.train() {
                            log::error!("agent '{}' stopped: {:#}", agent.name(), e);
                            return Err(e);
                        }
                    }
                }
            }
            Ok(agent)
        })?;

        Ok(Self {
            mailbox,
            processing,
            thread,
        })
    }

    /// Starts (or resumes) training
    pub fn train(&self) {
        self.processing.start();
        self.mailbox.write(Command::Train);
    }

    /// Asks the agent to finish its current step and to quit afterwards
    pub fn stop(&self) {
        self.processing.stop();
        self.mailbox.write(Command::Quit);
    }

    pub fn is_finished(&self) -> bool { self.thread.is_finished() }

    /// Waits for the agent thread to end and hands back the agent
    pub fn join(self) -> Result<A> {
        self.thread
            .join()
            .map_err(|_| QlError::from("agent thread panicked"))?
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use super::*;

    struct CountingTrainer {
        processing: ProcessingFlag,
        steps: Arc<AtomicUsize>,
        fail_at: Option<usize>,
    }

    impl Trainer for CountingTrainer {
        fn name(&self) -> String { "counting".to_string() }

        fn processing(&self) -> ProcessingFlag { self.processing.clone() }

        fn train(&mut self) -> Result<()> {
            while self.processing.should_continue() {
                let step = self.steps.fetch_add(1, Ordering::SeqCst);
                if Some(step) == self.fail_at {
                    return Err(QlError::from("boom").into());
                }
                std::thread::sleep(Duration::from_millis(1));
            }
            Ok(())
        }
    }

    fn trainer(fail_at: Option<usize>) -> (CountingTrainer, Arc<AtomicUsize>) {
        let steps = Arc::new(AtomicUsize::new(0));
        let t = CountingTrainer {
            processing: ProcessingFlag::default(),
            steps: Arc::clone(&steps),
            fail_at,
        };
        (t, steps)
    }

    #[test]
    fn test_train_then_stop() -> Result<()> {
        let (t, steps) = trainer(None);
        let handle = AgentHandle::spawn(t)?;
        handle.train();
        while steps.load(Ordering::SeqCst) < 5 {
            std::thread::sleep(Duration::from_millis(1));
        }
        handle.stop();
        let agent = handle.join()?;
        assert!(!agent.processing.should_continue());
        assert!(steps.load(Ordering::SeqCst) >= 5);
        Ok(())
    }

    #[test]
    fn test_quit_without_training() -> Result<()> {
        let (t, steps) = trainer(None);
        let handle = AgentHandle::spawn(t)?;
        handle.stop();
        handle.join()?;
        assert_eq!(steps.load(Ordering::SeqCst), 0);
        Ok(())
    }

    #[test]
    fn test_training_error_ends_thread() -> Result<()> {
        let (t, _) = trainer(Some(3));
        let handle = AgentHandle::spawn(t)?;
        handle.train();
        let result = handle.join();
        assert!(result.is_err());
        Ok(())
    }
}
