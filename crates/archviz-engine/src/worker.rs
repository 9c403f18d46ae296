use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::mpsc::{self, Receiver, TryRecvError};
use std::thread::{self, JoinHandle};

use anyhow::{bail, Context, Result};
use archviz_contracts::job::RenderJob;

use crate::client::ImageClient;
use crate::render::{RenderOutput, RenderProgress, Renderer};

const THREAD_NAME: &str = "archviz-render";
const LOST_WORKER: &str = "render worker exited without reporting a result";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RenderMessage {
    Progress(RenderProgress),
    Finished(RenderOutput),
    Failed(String),
}

impl RenderMessage {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Progress(_))
    }
}

/// One render job on a background thread. Exactly one `Finished` or `Failed`
/// is delivered; nothing is delivered after it.
pub struct RenderWorker {
    response_rx: Receiver<RenderMessage>,
    thread_handle: Option<JoinHandle<()>>,
    done: bool,
}

impl RenderWorker {
    pub fn spawn<C>(renderer: Renderer<C>, job: RenderJob) -> Result<Self>
    where
        C: ImageClient + 'static,
    {
        let (resp_tx, resp_rx) = mpsc::channel::<RenderMessage>();
        let thread_handle = thread::Builder::new()
            .name(THREAD_NAME.to_string())
            .spawn(move || {
                let progress_tx = resp_tx.clone();
                let result = panic::catch_unwind(AssertUnwindSafe(|| {
                    renderer.render_all_with(&job, &mut |event: RenderProgress| {
                        let _ = progress_tx.send(RenderMessage::Progress(event));
                    })
                }));
                let terminal = match result {
                    Ok(Ok(output)) => RenderMessage::Finished(output),
                    Ok(Err(err)) => RenderMessage::Failed(format!("{err:#}")),
                    Err(payload) => {
                        let reason =
                            format!("render worker panicked: {}", panic_message(&*payload));
                        log::error!("{reason}");
                        renderer.record_failure(&reason);
                        RenderMessage::Failed(reason)
                    }
                };
                let _ = resp_tx.send(terminal);
            })
            .context("render thread spawn failed")?;

        Ok(Self {
            response_rx: resp_rx,
            thread_handle: Some(thread_handle),
            done: false,
        })
    }

    pub fn is_finished(&self) -> bool {
        self.done
    }

    /// Next message if one is ready.
    pub fn try_recv(&mut self) -> Option<RenderMessage> {
        if self.done {
            return None;
        }
        match self.response_rx.try_recv() {
            Ok(message) => Some(self.observe(message)),
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Disconnected) => {
                Some(self.observe(RenderMessage::Failed(LOST_WORKER.to_string())))
            }
        }
    }

    /// Blocks for the next message. `None` once the terminal message has been
    /// handed out.
    pub fn recv(&mut self) -> Option<RenderMessage> {
        if self.done {
            return None;
        }
        let message = self
            .response_rx
            .recv()
            .unwrap_or_else(|_| RenderMessage::Failed(LOST_WORKER.to_string()));
        Some(self.observe(message))
    }

    /// Drains the worker, forwarding progress to `on_progress`.
    pub fn wait(mut self, mut on_progress: impl FnMut(&RenderProgress)) -> Result<RenderOutput> {
        while let Some(message) = self.recv() {
            match message {
                RenderMessage::Progress(event) => on_progress(&event),
                RenderMessage::Finished(output) => return Ok(output),
                RenderMessage::Failed(error) => bail!(error),
            }
        }
        bail!(LOST_WORKER)
    }

    fn observe(&mut self, message: RenderMessage) -> RenderMessage {
        if message.is_terminal() {
            self.done = true;
            if let Some(handle) = self.thread_handle.take() {
                if handle.join().is_err() {
                    log::error!("{THREAD_NAME} thread panicked");
                }
            }
        }
        message
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message
    } else {
        "unknown panic"
    }
}

/// Holds at most one in-flight [`RenderWorker`].
#[derive(Default)]
pub struct RenderController {
    active: Option<RenderWorker>,
}

impl RenderController {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_busy(&self) -> bool {
        self.active.is_some()
    }

    pub fn start<C>(&mut self, renderer: Renderer<C>, job: RenderJob) -> Result<()>
    where
        C: ImageClient + 'static,
    {
        if self.is_busy() {
            bail!("a render is already in progress");
        }
        self.active = Some(RenderWorker::spawn(renderer, job)?);
        Ok(())
    }

    /// Every message that is ready now. The controller becomes idle once the
    /// terminal message is returned.
    pub fn poll(&mut self) -> Vec<RenderMessage> {
        let mut messages = Vec::new();
        while let Some(message) = self.active.as_mut().and_then(RenderWorker::try_recv) {
            let terminal = message.is_terminal();
            messages.push(message);
            if terminal {
                self.active = None;
            }
        }
        messages
    }

    /// Blocking variant of [`RenderController::poll`], one message at a time.
    pub fn recv(&mut self) -> Option<RenderMessage> {
        let message = self.active.as_mut().and_then(RenderWorker::recv)?;
        if message.is_terminal() {
            self.active = None;
        }
        Some(message)
    }
}
