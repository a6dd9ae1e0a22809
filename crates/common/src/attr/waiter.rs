//! Lets a worker hold a task back until the file changes it depends on have
//! been applied locally.
//!
//! Several tasks can finish while a worker is busy. The first response that
//! carries the combined [`FileSet`] processes it once and releases every
//! other task named in it. Those tasks arrive with no file set of their own
//! and simply wait for that release.

use std::collections::HashMap;

use flume::{Receiver, Sender};
use parking_lot::Mutex;

use super::FileSet;
use crate::error::WaitError;

pub type ProcessError = Box<dyn std::error::Error + Send + Sync>;
pub type Process = Box<dyn Fn(&FileSet) -> Result<(), ProcessError> + Send + Sync>;

struct Completion {
    tx: Sender<()>,
    rx: Receiver<()>,
}

pub struct FileSetWaiter {
    process: Process,
    channels: Mutex<HashMap<u64, Completion>>,
}

impl FileSetWaiter {
    pub fn new(process: Process) -> Self {
        Self {
            process,
            channels: Mutex::new(HashMap::new()),
        }
    }

    /// Register task `id` before its request goes out.
    pub fn new_channel(&self, id: u64) {
        let (tx, rx) = flume::bounded(1);
        self.channels.lock().insert(id, Completion { tx, rx });
    }

    /// Finish task `wait_id`.
    ///
    /// With a file set, process it and release (or, if processing failed,
    /// fail) every other task in `task_ids`. Without one, block until
    /// another task's response has released this one.
    pub fn wait(
        &self,
        files: Option<&FileSet>,
        task_ids: &[u64],
        wait_id: u64,
    ) -> Result<(), WaitError> {
        let result = match files {
            Some(files) => {
                tracing::debug!(tasks = ?task_ids, entries = files.len(), "got file set for tasks");
                let result = (self.process)(files).map_err(|e| WaitError::Process(e.to_string()));
                for &id in task_ids.iter().filter(|&&id| id != wait_id) {
                    if result.is_ok() {
                        self.signal(id);
                    } else {
                        self.flush(id);
                    }
                }
                result
            }
            None => {
                // Gone already if the releasing response came in first.
                let completion = self.channels.lock().get(&wait_id).map(|c| c.rx.clone());
                match completion {
                    Some(rx) => rx.recv().map_err(|_| WaitError::NeverSent(wait_id)),
                    None => Ok(()),
                }
            }
        };
        self.channels.lock().remove(&wait_id);
        result
    }

    fn signal(&self, id: u64) {
        if let Some(c) = self.channels.lock().remove(&id) {
            let _ = c.tx.try_send(());
        }
    }

    /// Dropping the only sender wakes the waiter with a disconnect.
    fn flush(&self, id: u64) {
        self.channels.lock().remove(&id);
    }

    /// Tasks registered and not yet finished.
    pub fn pending(&self) -> usize {
        self.channels.lock().len()
    }
}
