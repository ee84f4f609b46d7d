//! Read-ahead BGZF reader backed by a decoder thread.
//!
//! The worker inflates blocks into a bounded queue while the consumer parses
//! records from earlier ones. Decompression happens outside the lock; the
//! mutex only guards queue bookkeeping.

use super::{BgzfBackend, BgzfReader, ReaderOptions};
use crate::error::{BamError, Result};
use log::{debug, warn};
use std::collections::VecDeque;
use std::fs::File;
use std::io::{Read, Seek};
use std::mem;
use std::path::Path;
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};

enum Slot {
    Block { start: u64, end: u64, data: Vec<u8> },
    Eof { end: u64 },
    Failed(BamError),
}

struct Queue {
    slots: VecDeque<Slot>,
    /// Buffers handed back by the consumer for reuse
    spare: Vec<Vec<u8>>,
    capacity: usize,
    cancelled: bool,
}

struct Shared {
    queue: Mutex<Queue>,
    have_data: Condvar,
    need_data: Condvar,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Queue> {
        // Queue state stays consistent across a panic in either thread
        self.queue.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Terminal outcome, replayed on every later call.
enum Terminal {
    Eof,
    Failed(BamError),
}

/// Forward-only BGZF backend that decompresses ahead on its own thread.
///
/// Repositioning is not supported; [`BgzfBackend::set_position`] returns
/// [`BamError::Unsupported`]. Dropping the reader stops and joins the worker.
///
/// # Example
///
/// ```no_run
/// use bamread::io::bgzf::{BgzfBackend, ThreadedBgzfReader};
///
/// # fn main() -> bamread::Result<()> {
/// let mut reader = ThreadedBgzfReader::open("alignments.bam")?;
/// let mut block = Vec::new();
/// let mut total = 0;
/// while reader.read_block(&mut block)?.is_some() {
///     total += block.len();
/// }
/// println!("{} uncompressed bytes", total);
/// # Ok(())
/// # }
/// ```
pub struct ThreadedBgzfReader {
    shared: Arc<Shared>,
    worker: Option<JoinHandle<()>>,
    position: u64,
    file_size: u64,
    terminal: Option<Terminal>,
}

impl ThreadedBgzfReader {
    /// Open a BGZF file with default options.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::new(File::open(path)?)
    }

    /// Wrap a seekable source with default options.
    pub fn new<R>(inner: R) -> Result<Self>
    where
        R: Read + Seek + Send + 'static,
    {
        Self::with_options(inner, ReaderOptions::default())
    }

    /// Wrap a seekable source.
    pub fn with_options<R>(inner: R, options: ReaderOptions) -> Result<Self>
    where
        R: Read + Seek + Send + 'static,
    {
        let reader = BgzfReader::with_options(inner, options)?;
        Self::spawn(reader, options.queue_depth())
    }

    /// Move an existing reader onto a decoder thread.
    ///
    /// Decoding resumes from the reader's current position.
    pub fn spawn<R>(reader: BgzfReader<R>, queue_depth: usize) -> Result<Self>
    where
        R: Read + Seek + Send + 'static,
    {
        let capacity = queue_depth.max(1);
        let shared = Arc::new(Shared {
            queue: Mutex::new(Queue {
                slots: VecDeque::with_capacity(capacity + 1),
                spare: Vec::with_capacity(capacity),
                capacity,
                cancelled: false,
            }),
            have_data: Condvar::new(),
            need_data: Condvar::new(),
        });

        let position = reader.position();
        let file_size = reader.file_size();
        let worker_shared = Arc::clone(&shared);
        let worker = thread::Builder::new()
            .name("bgzf-decoder".to_string())
            .spawn(move || decode_loop(reader, worker_shared))?;

        debug!("Started BGZF decoder thread (queue depth {})", capacity);

        Ok(Self {
            shared,
            worker: Some(worker),
            position,
            file_size,
            terminal: None,
        })
    }

    fn next_slot(&self) -> Slot {
        let mut queue = self.shared.lock();
        let slot = loop {
            if let Some(slot) = queue.slots.pop_front() {
                break slot;
            }
            queue = self
                .shared
                .have_data
                .wait(queue)
                .unwrap_or_else(|poisoned| poisoned.into_inner());
        };
        drop(queue);
        self.shared.need_data.notify_one();
        slot
    }

    fn recycle(&self, buffer: Vec<u8>) {
        let mut queue = self.shared.lock();
        if queue.spare.len() < queue.capacity {
            queue.spare.push(buffer);
        }
    }
}

/// Pushes a failure if the worker exits without reporting an outcome, so the
/// consumer never waits on a dead thread.
struct ExitGuard {
    shared: Arc<Shared>,
    reported: bool,
}

impl Drop for ExitGuard {
    fn drop(&mut self) {
        if self.reported {
            return;
        }
        let mut queue = self.shared.lock();
        queue.slots.push_back(Slot::Failed(BamError::Format(
            "BGZF decoder thread exited unexpectedly".to_string(),
        )));
        drop(queue);
        self.shared.have_data.notify_all();
    }
}

fn decode_loop<R: Read + Seek>(mut reader: BgzfReader<R>, shared: Arc<Shared>) {
    let mut guard = ExitGuard {
        shared: Arc::clone(&shared),
        reported: false,
    };

    loop {
        let mut buffer = {
            let mut queue = shared.lock();
            while queue.slots.len() >= queue.capacity && !queue.cancelled {
                queue = shared
                    .need_data
                    .wait(queue)
                    .unwrap_or_else(|poisoned| poisoned.into_inner());
            }
            if queue.cancelled {
                guard.reported = true;
                return;
            }
            queue.spare.pop().unwrap_or_default()
        };

        let slot = match reader.read_block(&mut buffer) {
            Ok(Some(start)) => Slot::Block {
                start,
                end: reader.position(),
                data: buffer,
            },
            Ok(None) => Slot::Eof {
                end: reader.position(),
            },
            Err(e) => {
                warn!("BGZF decoder thread stopping: {}", e);
                Slot::Failed(e)
            }
        };
        let finished = !matches!(slot, Slot::Block { .. });

        shared.lock().slots.push_back(slot);
        shared.have_data.notify_one();

        if finished {
            guard.reported = true;
            return;
        }
    }
}

impl super::sealed::Sealed for ThreadedBgzfReader {}

impl BgzfBackend for ThreadedBgzfReader {
    fn read_block(&mut self, dst: &mut Vec<u8>) -> Result<Option<u64>> {
        match &self.terminal {
            Some(Terminal::Eof) => {
                dst.clear();
                return Ok(None);
            }
            Some(Terminal::Failed(e)) => return Err(e.clone()),
            None => {}
        }

        match self.next_slot() {
            Slot::Block { start, end, data } => {
                let old = mem::replace(dst, data);
                self.recycle(old);
                self.position = end;
                Ok(Some(start))
            }
            Slot::Eof { end } => {
                self.position = end;
                self.terminal = Some(Terminal::Eof);
                dst.clear();
                Ok(None)
            }
            Slot::Failed(e) => {
                self.terminal = Some(Terminal::Failed(e.clone()));
                Err(e)
            }
        }
    }

    fn position(&self) -> u64 {
        self.position
    }

    fn file_size(&self) -> u64 {
        self.file_size
    }

    fn set_position(&mut self, _pos: u64) -> Result<()> {
        Err(BamError::Unsupported(
            "repositioning a threaded BGZF reader",
        ))
    }
}

impl Drop for ThreadedBgzfReader {
    fn drop(&mut self) {
        self.shared.lock().cancelled = true;
        self.shared.need_data.notify_all();
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                warn!("BGZF decoder thread panicked");
            }
        }
    }
}
