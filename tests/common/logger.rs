//! Phase-tagged progress output for integration tests.
//!
//! Output goes to stderr and is only shown for failing tests (or with
//! `--nocapture`). Set `TEST_LOG_JSON=1` for one JSON object per line.
#![allow(dead_code)]

use std::time::Instant;

use serde::Serialize;

#[derive(Serialize)]
struct Line<'a> {
    test: &'a str,
    elapsed_ms: u64,
    phase: &'a str,
    message: &'a str,
}

/// Per-test logger tracking the current phase and elapsed time.
pub struct TestLogger {
    name: String,
    start: Instant,
    phase: std::cell::RefCell<String>,
    json: bool,
}

impl TestLogger {
    pub fn new(test_name: &str) -> Self {
        let json = std::env::var("TEST_LOG_JSON").is_ok_and(|v| v == "1" || v == "true");
        let logger = Self {
            name: test_name.to_string(),
            start: Instant::now(),
            phase: std::cell::RefCell::new("start".to_string()),
            json,
        };
        logger.emit("test started");
        logger
    }

    pub fn phase(&self, phase: &str) {
        *self.phase.borrow_mut() = phase.to_string();
        self.emit("phase");
    }

    pub fn info(&self, message: &str) {
        self.emit(message);
    }

    pub fn http_request(&self, method: &str, url: &str) {
        self.emit(&format!("{method} {url}"));
    }

    pub fn finish_ok(&self) {
        self.emit("test passed");
    }

    pub fn elapsed_ms(&self) -> u64 {
        u64::try_from(self.start.elapsed().as_millis()).unwrap_or(u64::MAX)
    }

    fn emit(&self, message: &str) {
        let phase = self.phase.borrow();
        if self.json {
            let line = Line {
                test: &self.name,
                elapsed_ms: self.elapsed_ms(),
                phase: &phase,
                message,
            };
            eprintln!("{}", serde_json::to_string(&line).unwrap_or_default());
        } else {
            eprintln!(
                "[{:>6}ms] {} [{}] {}",
                self.elapsed_ms(),
                self.name,
                phase,
                message
            );
        }
    }
}
