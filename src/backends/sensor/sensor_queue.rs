// SPDX-License-Identifier: GPL-3.0-only
//! Dedicated delivery thread for sensor callbacks
//!
//! All hardware deliveries (stream arrivals and still-capture completions)
//! are handled on one thread owned by a [`SensorQueue`]. Nothing else runs
//! there, so slow consumers elsewhere never back up the sensor.

use super::types::SensorEvent;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{Receiver, RecvTimeoutError};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Action returned by the loop callback to control loop behavior
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopAction {
    /// Continue running the loop
    Continue,
    /// Stop the loop gracefully
    Stop,
}

/// Controller for the sensor delivery thread
pub struct SensorQueue {
    thread_handle: Option<JoinHandle<()>>,
    stop_signal: Arc<AtomicBool>,
    name: String,
}

impl SensorQueue {
    /// Start a loop in a separate thread
    ///
    /// `loop_fn` runs repeatedly until it returns `LoopAction::Stop` or
    /// [`stop`](Self::stop) is called.
    pub fn start<F>(name: &str, mut loop_fn: F) -> Self
    where
        F: FnMut() -> LoopAction + Send + 'static,
    {
        Self::start_with_init(name, || Ok(()), move |_: &mut ()| loop_fn())
    }

    /// Start a loop whose state is built on the queue thread itself
    ///
    /// If `init_fn` fails the thread exits without running `loop_fn`.
    pub fn start_with_init<S, I, F>(name: &str, init_fn: I, mut loop_fn: F) -> Self
    where
        S: 'static,
        I: FnOnce() -> Result<S, String> + Send + 'static,
        F: FnMut(&mut S) -> LoopAction + Send + 'static,
    {
        let stop_signal = Arc::new(AtomicBool::new(false));
        let stop_signal_clone = Arc::clone(&stop_signal);
        let name_clone = name.to_string();

        info!(name = %name, "Starting sensor queue");

        let thread_handle = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                raise_thread_priority(&name_clone);

                let mut state = match init_fn() {
                    Ok(s) => s,
                    Err(e) => {
                        warn!(name = %name_clone, error = %e, "Sensor queue initialization failed");
                        return;
                    }
                };

                loop {
                    if stop_signal_clone.load(Ordering::SeqCst) {
                        debug!(name = %name_clone, "Stop signal received");
                        break;
                    }

                    if loop_fn(&mut state) == LoopAction::Stop {
                        debug!(name = %name_clone, "Loop requested stop");
                        break;
                    }
                }

                info!(name = %name_clone, "Sensor queue exiting");
            });

        let thread_handle = match thread_handle {
            Ok(handle) => Some(handle),
            Err(e) => {
                warn!(name = %name, error = %e, "Failed to spawn sensor queue thread");
                None
            }
        };

        Self {
            thread_handle,
            stop_signal,
            name: name.to_string(),
        }
    }

    /// Drain `events` on the queue thread, handing each to `handler`
    ///
    /// The loop wakes at least every `poll_interval` to observe stop
    /// requests, and ends on its own once every sender is gone.
    pub fn spawn_event_loop<S, I, H>(
        name: &str,
        events: Receiver<SensorEvent>,
        poll_interval: Duration,
        init_fn: I,
        mut handler: H,
    ) -> Self
    where
        S: 'static,
        I: FnOnce() -> Result<S, String> + Send + 'static,
        H: FnMut(&mut S, SensorEvent) + Send + 'static,
    {
        Self::start_with_init(name, init_fn, move |state| {
            match events.recv_timeout(poll_interval) {
                Ok(event) => {
                    handler(state, event);
                    LoopAction::Continue
                }
                Err(RecvTimeoutError::Timeout) => LoopAction::Continue,
                Err(RecvTimeoutError::Disconnected) => LoopAction::Stop,
            }
        })
    }

    /// Check if the loop is still running
    pub fn is_running(&self) -> bool {
        self.thread_handle
            .as_ref()
            .map(|h| !h.is_finished())
            .unwrap_or(false)
    }

    /// Signal the loop to stop without waiting
    pub fn request_stop(&self) {
        debug!(name = %self.name, "Requesting sensor queue stop");
        self.stop_signal.store(true, Ordering::SeqCst);
    }

    /// Stop the loop and wait for the thread to finish
    pub fn stop(&mut self) {
        self.request_stop();
        self.join();
    }

    /// Wait for the thread to finish without sending the stop signal
    pub fn join(&mut self) {
        if let Some(handle) = self.thread_handle.take() {
            if handle.thread().id() == thread::current().id() {
                // Dropped from its own thread; it exits after this iteration.
                return;
            }
            if let Err(e) = handle.join() {
                warn!(name = %self.name, "Sensor queue thread panicked: {:?}", e);
            }
        }
    }
}

impl Drop for SensorQueue {
    fn drop(&mut self) {
        if self.thread_handle.is_some() {
            self.stop();
        }
    }
}

/// Best-effort bump of the calling thread's scheduling priority
#[cfg(target_os = "linux")]
fn raise_thread_priority(name: &str) {
    // On Linux PRIO_PROCESS with who = 0 targets the calling thread.
    let result = unsafe { libc::setpriority(libc::PRIO_PROCESS, 0, -10) };
    if result != 0 {
        debug!(
            name = %name,
            error = %std::io::Error::last_os_error(),
            "Could not raise sensor queue priority"
        );
    }
}

#[cfg(not(target_os = "linux"))]
fn raise_thread_priority(_name: &str) {}
