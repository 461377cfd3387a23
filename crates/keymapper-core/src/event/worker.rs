// Keymapper Event Worker
// Single ordered consumer feeding input events to the key map controller

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;

use crate::detection::KeyMapController;
use crate::{KeyEvent, KeyMap, MotionEvent};

/// Errors returned when talking to the worker
#[derive(Debug, thiserror::Error)]
pub enum WorkerError {
    #[error("Event worker has stopped")]
    Closed,

    #[error("Event worker task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// Everything the event source can hand to the worker
#[derive(Debug, Clone, PartialEq)]
pub enum InputEvent {
    Key(KeyEvent),
    Motion(MotionEvent),
    /// Device with the given descriptor went away
    DeviceDisconnected(String),
    Reset,
}

enum Command {
    Input(InputEvent, Option<oneshot::Sender<bool>>),
    Shutdown,
}

/// Compiled key maps as published by the worker
pub type CompiledKeyMaps = Arc<[Arc<KeyMap>]>;

/// Owns the controller and processes events strictly in arrival order.
///
/// Key map snapshots arrive through a `watch` channel. A new snapshot is
/// picked up before the next queued event, reloads the controller, and
/// is republished as the list of key maps that compiled.
pub struct EventWorker {
    commands: mpsc::UnboundedSender<Command>,
    compiled: watch::Receiver<CompiledKeyMaps>,
    task: JoinHandle<()>,
}

impl EventWorker {
    /// Start the worker on the current Tokio runtime
    pub fn spawn(controller: KeyMapController, mut key_maps: watch::Receiver<Vec<KeyMap>>) -> Self {
        let (commands, mut queue) = mpsc::unbounded_channel();

        let initial = key_maps.borrow_and_update().clone();
        let (published, compiled) =
            watch::channel(CompiledKeyMaps::from(controller.load_key_maps(&initial)));

        let task = tokio::spawn(async move {
            let mut config_open = true;
            loop {
                tokio::select! {
                    biased;

                    changed = key_maps.changed(), if config_open => {
                        if changed.is_err() {
                            log::debug!("Key map source closed, keeping the last snapshot");
                            config_open = false;
                            continue;
                        }
                        let snapshot = key_maps.borrow_and_update().clone();
                        log::info!("Key maps changed, reloading {} entries", snapshot.len());
                        let reloaded = controller.load_key_maps(&snapshot);
                        published.send_replace(CompiledKeyMaps::from(reloaded));
                    }

                    command = queue.recv() => match command {
                        Some(Command::Input(event, reply)) => {
                            let consumed = dispatch(&controller, &event);
                            if let Some(reply) = reply {
                                let _ = reply.send(consumed);
                            }
                        }
                        Some(Command::Shutdown) | None => break,
                    },
                }
            }

            controller.reset();
            log::debug!("Event worker stopped");
        });

        Self {
            commands,
            compiled,
            task,
        }
    }

    /// Queue an event without waiting for it to be processed
    pub fn send(&self, event: InputEvent) -> Result<(), WorkerError> {
        self.commands
            .send(Command::Input(event, None))
            .map_err(|_| WorkerError::Closed)
    }

    /// Queue an event and wait for the controller's verdict. Returns true
    /// if the event was consumed.
    pub async fn process(&self, event: InputEvent) -> Result<bool, WorkerError> {
        let (reply, verdict) = oneshot::channel();
        self.commands
            .send(Command::Input(event, Some(reply)))
            .map_err(|_| WorkerError::Closed)?;
        verdict.await.map_err(|_| WorkerError::Closed)
    }

    pub async fn key_event(&self, event: KeyEvent) -> Result<bool, WorkerError> {
        self.process(InputEvent::Key(event)).await
    }

    /// Receiver for the key maps currently being matched
    pub fn compiled_key_maps(&self) -> watch::Receiver<CompiledKeyMaps> {
        self.compiled.clone()
    }

    /// Stop after the events already queued and reset the controller
    pub async fn shutdown(self) -> Result<(), WorkerError> {
        // Already stopped is fine, the join below reports how it ended
        let _ = self.commands.send(Command::Shutdown);
        self.task.await?;
        Ok(())
    }
}

fn dispatch(controller: &KeyMapController, event: &InputEvent) -> bool {
    match event {
        InputEvent::Key(key_event) => controller.on_key_event(key_event),
        InputEvent::Motion(motion) => controller.on_motion_event(motion),
        InputEvent::DeviceDisconnected(descriptor) => {
            controller.on_device_disconnected(descriptor);
            false
        }
        InputEvent::Reset => {
            controller.reset();
            false
        }
    }
}
