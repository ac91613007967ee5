// Copyright 2024 Saptak Santra
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Command buffer: thread-safe queue of deferred world mutations
//!
//! Systems may not mutate world structure while a view is live; they
//! enqueue closures here instead. The scheduler flushes the queue against
//! the world after each system group completes.

use parking_lot::Mutex;

use crate::error::Result;
use crate::world::World;

type CommandFn<W> = Box<dyn FnOnce(&mut W) -> Result<()> + Send>;

/// Deferred-mutation queue, generic over the world flavor it targets.
///
/// `add` may be called from any worker thread concurrently; commands are
/// applied in the order their `add` calls acquired the queue lock.
/// `flush` is single-writer (the scheduler, between group executions).
pub struct CommandBuffer<W = World> {
    queue: Mutex<Vec<CommandFn<W>>>,
}

impl<W> CommandBuffer<W> {
    /// Create an empty buffer
    pub fn new() -> Self {
        Self {
            queue: Mutex::new(Vec::new()),
        }
    }

    /// Enqueue a deferred mutation.
    ///
    /// Callers typically capture entity IDs and new component values.
    pub fn add<F>(&self, command: F)
    where
        F: FnOnce(&mut W) -> Result<()> + Send + 'static,
    {
        self.queue.lock().push(Box::new(command));
    }

    /// Number of queued commands
    pub fn len(&self) -> usize {
        self.queue.lock().len()
    }

    /// True when nothing is queued
    pub fn is_empty(&self) -> bool {
        self.queue.lock().is_empty()
    }

    /// Atomically drain the queue, then apply each command FIFO with no
    /// lock held.
    ///
    /// The first failing command aborts the flush; commands enqueued by a
    /// command being applied land in the queue for the next flush.
    pub fn flush(&self, world: &mut W) -> Result<()> {
        let drained = std::mem::take(&mut *self.queue.lock());
        for command in drained {
            command(world)?;
        }
        Ok(())
    }
}

impl<W> Default for CommandBuffer<W> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_commands_apply_in_fifo_order() {
        let buffer: CommandBuffer<Vec<u32>> = CommandBuffer::new();
        for value in 0..4 {
            buffer.add(move |log: &mut Vec<u32>| {
                log.push(value);
                Ok(())
            });
        }
        assert_eq!(buffer.len(), 4);

        let mut log = Vec::new();
        buffer.flush(&mut log).unwrap();
        assert_eq!(log, vec![0, 1, 2, 3]);
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_flush_drains_before_applying() {
        // A command enqueuing another command must not see it applied in
        // the same flush.
        let buffer: std::sync::Arc<CommandBuffer<Vec<&'static str>>> =
            std::sync::Arc::new(CommandBuffer::new());
        let inner = std::sync::Arc::clone(&buffer);
        buffer.add(move |log: &mut Vec<&'static str>| {
            log.push("first");
            inner.add(|log: &mut Vec<&'static str>| {
                log.push("second");
                Ok(())
            });
            Ok(())
        });

        let mut log = Vec::new();
        buffer.flush(&mut log).unwrap();
        assert_eq!(log, vec!["first"]);
        assert_eq!(buffer.len(), 1);

        buffer.flush(&mut log).unwrap();
        assert_eq!(log, vec!["first", "second"]);
    }

    #[test]
    fn test_concurrent_adds_are_serialized() {
        let buffer: std::sync::Arc<CommandBuffer<Vec<u32>>> =
            std::sync::Arc::new(CommandBuffer::new());

        let handles: Vec<_> = (0..8)
            .map(|value| {
                let buffer = std::sync::Arc::clone(&buffer);
                std::thread::spawn(move || {
                    buffer.add(move |log: &mut Vec<u32>| {
                        log.push(value);
                        Ok(())
                    });
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let mut log = Vec::new();
        buffer.flush(&mut log).unwrap();
        log.sort_unstable();
        assert_eq!(log, (0..8).collect::<Vec<_>>());
    }
}
