use dive_core::{Engine, Repository, Task, TaskQueue};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("task worker has stopped")]
    Closed,
    #[error("task worker panicked: {0}")]
    Join(#[from] tokio::task::JoinError),
}

#[derive(Debug)]
enum Command {
    Run(Task),
    Flush(oneshot::Sender<()>),
    Shutdown(oneshot::Sender<()>),
}

/// Queue handle given to the [`Engine`]. Tasks sent after the worker stops
/// are dropped with a warning.
#[derive(Debug, Clone)]
pub struct TaskSender {
    tx: mpsc::UnboundedSender<Command>,
}

impl TaskQueue for TaskSender {
    fn enqueue(&self, task: Task) {
        if self.tx.send(Command::Run(task)).is_err() {
            log::warn!("task worker stopped, dropping {task:?}");
        }
    }
}

#[derive(Debug)]
pub struct TaskReceiver {
    rx: mpsc::UnboundedReceiver<Command>,
}

pub fn task_channel() -> (TaskSender, TaskReceiver) {
    let (tx, rx) = mpsc::unbounded_channel();
    (TaskSender { tx }, TaskReceiver { rx })
}

/// Runs queued tasks one at a time on the blocking pool, in enqueue order.
#[derive(Debug)]
pub struct TaskWorker {
    tx: mpsc::UnboundedSender<Command>,
    handle: JoinHandle<()>,
    completed: Arc<AtomicU64>,
    failed: Arc<AtomicU64>,
}

impl TaskWorker {
    /// Must be called from within a tokio runtime.
    pub fn spawn<R>(engine: Arc<Engine<R, TaskSender>>, receiver: TaskReceiver) -> Self
    where
        R: Repository + 'static,
    {
        let tx = engine.queue().tx.clone();
        let completed = Arc::new(AtomicU64::new(0));
        let failed = Arc::new(AtomicU64::new(0));
        let handle = tokio::spawn(run(
            engine,
            receiver.rx,
            completed.clone(),
            failed.clone(),
        ));
        Self {
            tx,
            handle,
            completed,
            failed,
        }
    }

    /// Wait until every task enqueued before this call has run.
    pub async fn flush(&self) -> Result<(), WorkerError> {
        let (ack, done) = oneshot::channel();
        self.tx.send(Command::Flush(ack)).map_err(|_| WorkerError::Closed)?;
        done.await.map_err(|_| WorkerError::Closed)
    }

    /// Drain queued tasks, then stop the worker.
    pub async fn shutdown(self) -> Result<(), WorkerError> {
        let (ack, done) = oneshot::channel();
        self.tx.send(Command::Shutdown(ack)).map_err(|_| WorkerError::Closed)?;
        done.await.map_err(|_| WorkerError::Closed)?;
        self.handle.await?;
        Ok(())
    }

    pub fn completed_count(&self) -> u64 {
        self.completed.load(Ordering::SeqCst)
    }

    pub fn failed_count(&self) -> u64 {
        self.failed.load(Ordering::SeqCst)
    }
}

async fn run<R>(
    engine: Arc<Engine<R, TaskSender>>,
    mut rx: mpsc::UnboundedReceiver<Command>,
    completed: Arc<AtomicU64>,
    failed: Arc<AtomicU64>,
) where
    R: Repository + 'static,
{
    while let Some(command) = rx.recv().await {
        match command {
            Command::Run(task) => {
                let engine = engine.clone();
                match tokio::task::spawn_blocking(move || engine.run_task(task)).await {
                    Ok(Ok(())) => {
                        completed.fetch_add(1, Ordering::SeqCst);
                    }
                    Ok(Err(err)) => {
                        log::warn!("task {task:?} failed: {err}");
                        failed.fetch_add(1, Ordering::SeqCst);
                    }
                    Err(err) => {
                        log::error!("task {task:?} panicked: {err}");
                        failed.fetch_add(1, Ordering::SeqCst);
                    }
                }
            }
            Command::Flush(ack) => {
                let _ = ack.send(());
            }
            Command::Shutdown(ack) => {
                let _ = ack.send(());
                break;
            }
        }
    }
}
