//! Periodic background tasks on dedicated OS threads.

use std::io;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread;
use std::time::{Duration, Instant};

use tracing::info;

/// Handle to a running periodic task.
#[derive(Debug)]
pub struct TaskHandle {
    name: String,
    shutdown: mpsc::Sender<()>,
    join: Option<thread::JoinHandle<()>>,
}

impl TaskHandle {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Stop the task and wait for the in-flight tick to finish.
    pub fn shutdown(mut self) {
        let _ = self.shutdown.send(());
        if let Some(j) = self.join.take() {
            let _ = j.join();
        }
    }
}

/// Spawn `tick` on its own thread: once immediately, then every `interval`.
///
/// The cadence is kept stable even when a tick overruns; missed ticks are
/// collapsed into one. Shutdown interrupts the wait between ticks.
pub fn spawn_periodic<F>(name: &str, interval: Duration, mut tick: F) -> io::Result<TaskHandle>
where
    F: FnMut() + Send + 'static,
{
    let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>();
    let task_name = name.to_string();

    let join = thread::Builder::new().name(name.to_string()).spawn(move || {
        info!(task = %task_name, interval_ms = interval.as_millis() as u64, "task started");
        let mut next_tick = Instant::now();

        loop {
            let now = Instant::now();
            if now >= next_tick {
                tick();
                while next_tick <= Instant::now() {
                    next_tick += interval;
                }
            }

            match shutdown_rx.recv_timeout(next_tick.saturating_duration_since(Instant::now())) {
                Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                Err(RecvTimeoutError::Timeout) => continue,
            }
        }

        info!(task = %task_name, "task stopped");
    })?;

    Ok(TaskHandle {
        name: name.to_string(),
        shutdown: shutdown_tx,
        join: Some(join),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn ticks_immediately_and_repeatedly_until_shutdown() {
        let count = Arc::new(AtomicUsize::new(0));
        let c = count.clone();
        let handle = spawn_periodic("test-task", Duration::from_millis(5), move || {
            c.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();
        assert_eq!(handle.name(), "test-task");

        let deadline = Instant::now() + Duration::from_secs(5);
        while count.load(Ordering::SeqCst) < 3 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(1));
        }
        handle.shutdown();

        let after_shutdown = count.load(Ordering::SeqCst);
        assert!(after_shutdown >= 3);
        thread::sleep(Duration::from_millis(20));
        assert_eq!(count.load(Ordering::SeqCst), after_shutdown);
    }

    #[test]
    fn shutdown_interrupts_a_long_wait() {
        let handle = spawn_periodic("slow-task", Duration::from_secs(3600), || {}).unwrap();
        let started = Instant::now();
        handle.shutdown();
        assert!(started.elapsed() < Duration::from_secs(5));
    }
}
