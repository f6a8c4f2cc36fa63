// Copyright (c) 2024 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

//! One-shot command completion channel.
//!
//! Every command submitted to the client settles exactly once: the reactor
//! writes the result through a [`CompletionSink`], the producer observes it
//! through the matching [`CompletionHandle`].

use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

use crate::error::{Error, ErrorKind};

#[derive(Debug)]
enum State<T> {
    Pending,
    Done(Result<T, Error>),
    Taken,
}

#[derive(Debug)]
struct Shared<T> {
    state: Mutex<State<T>>,
    cond: Condvar,
}

/// Write side of the completion channel, owned by the reactor while the
/// command is outstanding.
///
/// Dropping the sink without completing settles the handle with
/// [`ErrorKind::Cancelled`].
#[derive(Debug)]
pub struct CompletionSink<T> {
    shared: Arc<Shared<T>>,
    filled: bool,
}

/// Read side of the completion channel, returned to the producer.
#[derive(Debug)]
pub struct CompletionHandle<T> {
    shared: Arc<Shared<T>>,
}

/// Create a connected sink/handle pair.
#[must_use]
pub fn completion_pair<T>() -> (CompletionSink<T>, CompletionHandle<T>) {
    let shared = Arc::new(Shared {
        state: Mutex::new(State::Pending),
        cond: Condvar::new(),
    });
    (
        CompletionSink {
            shared: Arc::clone(&shared),
            filled: false,
        },
        CompletionHandle { shared },
    )
}

impl<T> CompletionSink<T> {
    /// Settle the command with `result`. Has no effect if already settled.
    pub fn complete(mut self, result: Result<T, Error>) {
        self.fill(result);
    }

    /// Settle the command with a success value.
    pub fn complete_ok(self, value: T) {
        self.complete(Ok(value));
    }

    /// Settle the command with an error.
    pub fn complete_err(self, error: Error) {
        self.complete(Err(error));
    }

    fn fill(&mut self, result: Result<T, Error>) {
        if self.filled {
            return;
        }
        self.filled = true;
        let mut state = self.shared.state.lock().unwrap();
        if matches!(*state, State::Pending) {
            *state = State::Done(result);
            self.shared.cond.notify_all();
        }
    }
}

impl<T> Drop for CompletionSink<T> {
    fn drop(&mut self) {
        self.fill(Err(Error::new(
            ErrorKind::Cancelled,
            "Command dropped before completion",
        )));
    }
}

impl<T> CompletionHandle<T> {
    /// Returns true once a result has been written.
    #[must_use]
    pub fn is_done(&self) -> bool {
        let state = self.shared.state.lock().unwrap();
        !matches!(*state, State::Pending)
    }

    /// Take the result if one has been written. Returns `None` while
    /// pending, and after the result was taken once.
    #[must_use]
    pub fn try_take(&self) -> Option<Result<T, Error>> {
        let mut state = self.shared.state.lock().unwrap();
        match std::mem::replace(&mut *state, State::Taken) {
            State::Done(result) => Some(result),
            State::Pending => {
                *state = State::Pending;
                None
            }
            State::Taken => None,
        }
    }

    /// Block the calling thread until the command settles.
    #[must_use]
    pub fn wait(self) -> Result<T, Error> {
        let mut state = self.shared.state.lock().unwrap();
        loop {
            match std::mem::replace(&mut *state, State::Taken) {
                State::Done(result) => return result,
                State::Taken => {
                    return Err(Error::new(ErrorKind::Cancelled, "Result already taken"))
                }
                State::Pending => {
                    *state = State::Pending;
                    state = self.shared.cond.wait(state).unwrap();
                }
            }
        }
    }

    /// Block up to `timeout` for the command to settle.
    #[must_use]
    pub fn wait_timeout(&self, timeout: Duration) -> Option<Result<T, Error>> {
        let deadline = std::time::Instant::now() + timeout;
        let mut state = self.shared.state.lock().unwrap();
        loop {
            match std::mem::replace(&mut *state, State::Taken) {
                State::Done(result) => return Some(result),
                State::Taken => return None,
                State::Pending => {
                    *state = State::Pending;
                    let now = std::time::Instant::now();
                    if now >= deadline {
                        return None;
                    }
                    let (guard, timed_out) = self
                        .shared
                        .cond
                        .wait_timeout(state, deadline - now)
                        .unwrap();
                    state = guard;
                    if timed_out.timed_out() && matches!(*state, State::Pending) {
                        return None;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_complete_before_wait() {
        let (sink, handle) = completion_pair::<u32>();
        sink.complete_ok(42);
        assert_eq!(handle.wait().unwrap(), 42);
    }

    #[test]
    fn test_wait_across_threads() {
        let (sink, handle) = completion_pair::<String>();
        let worker = thread::spawn(move || {
            sink.complete_ok("done".to_string());
        });
        assert_eq!(handle.wait().unwrap(), "done");
        worker.join().unwrap();
    }

    #[test]
    fn test_drop_sink_cancels() {
        let (sink, handle) = completion_pair::<()>();
        drop(sink);
        let err = handle.wait().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Cancelled);
    }

    #[test]
    fn test_wait_timeout_pending() {
        let (_sink, handle) = completion_pair::<()>();
        assert!(handle.wait_timeout(Duration::from_millis(10)).is_none());
    }

    #[test]
    fn test_second_complete_ignored() {
        let (sink, handle) = completion_pair::<u32>();
        let shared = CompletionSink {
            shared: Arc::clone(&sink.shared),
            filled: false,
        };
        sink.complete_ok(1);
        shared.complete_ok(2);
        assert_eq!(handle.wait().unwrap(), 1);
    }
}
