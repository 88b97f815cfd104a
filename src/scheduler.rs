// Multi-engine block scheduler.
//
// A fixed pool of N engines processes independent blocks:
//   - RoundRobin: engine i takes blocks i, i + N, i + 2N, ...
//   - LeastLoaded: idle engines pull the next index from a shared queue
//
// Each engine owns its working state (match tables, Huffman buffers),
// created once per run on the thread that uses it.  Results travel back
// over an unbounded channel and are reassembled by block index, so the
// output never depends on completion order or on N.
//
// The first failing block raises a shared cancel flag; engines stop at
// their next block boundary and the run reports `Error::Block`.  A
// caller-supplied `CancelToken` is checked at the same boundaries.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use log::{debug, trace};

use crate::config::DispatchPolicy;
use crate::error::{Error, Result};

// ---------------------------------------------------------------------------
// Cancellation
// ---------------------------------------------------------------------------

/// Shared flag that aborts a session at the next block boundary.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    /// `Err(Cancelled)` once the token has fired.
    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(Error::Cancelled)
        } else {
            Ok(())
        }
    }
}

// ---------------------------------------------------------------------------
// Scheduling units
// ---------------------------------------------------------------------------

/// A completed block: which engine ran it and what it produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduledUnit<R> {
    pub engine_id: usize,
    pub index: usize,
    pub result: R,
}

// ---------------------------------------------------------------------------
// Scheduler
// ---------------------------------------------------------------------------

/// Fixed-size engine pool.
pub struct Scheduler {
    engines: usize,
    policy: DispatchPolicy,
    cancel: Option<CancelToken>,
    #[cfg(feature = "parallel")]
    pool: Option<Arc<rayon::ThreadPool>>,
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("engines", &self.engines)
            .field("policy", &self.policy)
            .field("cancellable", &self.cancel.is_some())
            .finish()
    }
}

impl Scheduler {
    /// Pool of `engines` engines.  One engine runs on the calling thread.
    pub fn new(engines: usize, policy: DispatchPolicy) -> Result<Self> {
        if engines == 0 {
            return Err(Error::InvalidConfig("engine count must be at least 1".into()));
        }
        #[cfg(feature = "parallel")]
        let pool = if engines > 1 {
            let pool = rayon::ThreadPoolBuilder::new()
                .num_threads(engines)
                .thread_name(|i| format!("oxipress-engine-{i}"))
                .build()
                .map_err(|e| Error::Io(std::io::Error::other(e.to_string())))?;
            Some(Arc::new(pool))
        } else {
            None
        };
        debug!("scheduler: {engines} engine(s), {policy:?} dispatch");
        Ok(Self {
            engines,
            policy,
            cancel: None,
            #[cfg(feature = "parallel")]
            pool,
        })
    }

    /// Single engine on the calling thread.
    pub fn sequential() -> Self {
        Self {
            engines: 1,
            policy: DispatchPolicy::RoundRobin,
            cancel: None,
            #[cfg(feature = "parallel")]
            pool: None,
        }
    }

    /// Attach a cancellation token checked before every block.
    pub fn with_cancel(mut self, token: CancelToken) -> Self {
        self.cancel = Some(token);
        self
    }

    pub fn engines(&self) -> usize {
        self.engines
    }

    pub fn policy(&self) -> DispatchPolicy {
        self.policy
    }

    pub fn cancel_token(&self) -> Option<&CancelToken> {
        self.cancel.as_ref()
    }

    fn check_cancel(&self) -> Result<()> {
        match &self.cancel {
            Some(token) => token.check(),
            None => Ok(()),
        }
    }

    /// Run `work` over every item and return the units in index order.
    ///
    /// `make_engine(engine_id)` builds one engine's state; it is called at
    /// most once per engine per run.  The first failure (lowest block
    /// index among the blocks that ran) is returned as `Error::Block`.
    pub fn run<T, E, R, M, F>(&self, items: &[T], make_engine: M, work: F) -> Result<Vec<ScheduledUnit<R>>>
    where
        T: Sync,
        R: Send,
        M: Fn(usize) -> E + Sync,
        F: Fn(&mut E, usize, &T) -> Result<R> + Sync,
    {
        self.check_cancel()?;
        if items.is_empty() {
            return Ok(Vec::new());
        }

        #[cfg(feature = "parallel")]
        if let Some(pool) = &self.pool {
            if items.len() > 1 {
                return self.run_parallel(pool, items, &make_engine, &work);
            }
        }
        self.run_sequential(items, &make_engine, &work)
    }

    fn run_sequential<T, E, R, M, F>(&self, items: &[T], make_engine: &M, work: &F) -> Result<Vec<ScheduledUnit<R>>>
    where
        M: Fn(usize) -> E,
        F: Fn(&mut E, usize, &T) -> Result<R>,
    {
        let mut engine = make_engine(0);
        let mut units = Vec::with_capacity(items.len());
        for (index, item) in items.iter().enumerate() {
            self.check_cancel()?;
            let result = work(&mut engine, index, item).map_err(|e| block_error(index, e))?;
            trace!("block {index}: done on engine 0");
            units.push(ScheduledUnit {
                engine_id: 0,
                index,
                result,
            });
        }
        Ok(units)
    }

    #[cfg(feature = "parallel")]
    fn run_parallel<T, E, R, M, F>(
        &self,
        pool: &rayon::ThreadPool,
        items: &[T],
        make_engine: &M,
        work: &F,
    ) -> Result<Vec<ScheduledUnit<R>>>
    where
        T: Sync,
        R: Send,
        M: Fn(usize) -> E + Sync,
        F: Fn(&mut E, usize, &T) -> Result<R> + Sync,
    {
        use crossbeam::channel;

        let engines = self.engines.min(items.len());
        let failed = AtomicBool::new(false);
        let (done_tx, done_rx) = channel::unbounded::<(usize, usize, Result<R>)>();

        // Shared work queue for least-loaded dispatch.
        let (job_tx, job_rx) = channel::unbounded::<usize>();
        if self.policy == DispatchPolicy::LeastLoaded {
            for index in 0..items.len() {
                let _ = job_tx.send(index);
            }
        }
        drop(job_tx);

        let stop = || failed.load(Ordering::Acquire) || self.cancel.as_ref().is_some_and(CancelToken::is_cancelled);

        pool.scope(|scope| {
            for engine_id in 0..engines {
                let done_tx = done_tx.clone();
                let job_rx = job_rx.clone();
                let failed = &failed;
                let stop = &stop;
                let policy = self.policy;
                scope.spawn(move |_| {
                    let mut engine = make_engine(engine_id);
                    let mut round_robin = (engine_id..items.len()).step_by(engines);
                    loop {
                        if stop() {
                            break;
                        }
                        let next = match policy {
                            DispatchPolicy::RoundRobin => round_robin.next(),
                            DispatchPolicy::LeastLoaded => job_rx.try_recv().ok(),
                        };
                        let Some(index) = next else { break };
                        let result = work(&mut engine, index, &items[index]);
                        if result.is_err() {
                            failed.store(true, Ordering::Release);
                        }
                        trace!("block {index}: done on engine {engine_id}");
                        if done_tx.send((engine_id, index, result)).is_err() {
                            break;
                        }
                    }
                });
            }
        });
        drop(done_tx);

        // Reassemble by index; engines never block on this receiver.
        let mut slots: Vec<Option<ScheduledUnit<R>>> = (0..items.len()).map(|_| None).collect();
        let mut first_error: Option<(usize, Error)> = None;
        for (engine_id, index, result) in done_rx.try_iter() {
            match result {
                Ok(result) => {
                    slots[index] = Some(ScheduledUnit {
                        engine_id,
                        index,
                        result,
                    });
                }
                Err(e) => {
                    if first_error.as_ref().is_none_or(|(i, _)| index < *i) {
                        first_error = Some((index, e));
                    }
                }
            }
        }
        if let Some((index, e)) = first_error {
            debug!("scheduler: block {index} failed, remaining blocks cancelled");
            return Err(block_error(index, e));
        }
        self.check_cancel()?;

        slots
            .into_iter()
            .enumerate()
            .map(|(index, slot)| slot.ok_or_else(|| Error::corrupt(format!("block {index} produced no result"))))
            .collect()
    }
}

/// Wrap a per-block failure, leaving cancellation unwrapped.
fn block_error(index: usize, e: Error) -> Error {
    match e {
        Error::Cancelled | Error::Block { .. } => e,
        other => Error::Block {
            index,
            source: Box::new(other),
        },
    }
}

/// Split `data` into `block_size` slices; empty input is one empty block.
pub fn split_blocks(data: &[u8], block_size: usize) -> Vec<&[u8]> {
    if data.is_empty() {
        return vec![data];
    }
    data.chunks(block_size.max(1)).collect()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
