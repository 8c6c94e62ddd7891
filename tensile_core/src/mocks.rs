//! Test and helper mocks for tensile_core

use std::collections::VecDeque;

/// A load cell that replays a scripted sequence of raw counts and then
/// keeps returning the final value; useful for driving the trial loop
/// deterministically from tests.
pub struct ScriptedCell {
    values: VecDeque<i32>,
    last: i32,
}

impl ScriptedCell {
    pub fn new(values: impl IntoIterator<Item = i32>) -> Self {
        Self {
            values: values.into_iter().collect(),
            last: 0,
        }
    }
}

impl tensile_traits::LoadCell for ScriptedCell {
    fn read(
        &mut self,
        _timeout: std::time::Duration,
    ) -> Result<i32, Box<dyn std::error::Error + Send + Sync>> {
        if let Some(v) = self.values.pop_front() {
            self.last = v;
        }
        Ok(self.last)
    }
}

/// A load cell that always times out; exercises the stall watchdog.
pub struct DeadCell;

impl tensile_traits::LoadCell for DeadCell {
    fn read(
        &mut self,
        timeout: std::time::Duration,
    ) -> Result<i32, Box<dyn std::error::Error + Send + Sync>> {
        std::thread::sleep(timeout);
        Err(Box::new(std::io::Error::other("load cell timeout")))
    }
}
