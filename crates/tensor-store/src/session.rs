//! Store session traits and the shared command pipeline
//!
//! A session queues commands locally, sends them on `flush`, and hands the
//! replies back one at a time in exactly the order the commands were issued.
//! Callers correlate replies by position only.

use std::collections::VecDeque;

use async_trait::async_trait;
use bytes::Bytes;
use runtime_core::{Error, Result};
use tracing::{debug, instrument};

use crate::TensorKey;

/// Raw tensor record as held by the store
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TensorBlob {
    /// Datatype tag, uninterpreted at this layer
    pub dtype: String,

    /// Dimension sizes, outermost first
    pub shape: Vec<i64>,

    /// Little-endian element data
    pub data: Bytes,
}

/// One reply read back from the pipeline
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    /// Result of a queued get
    Tensor(TensorBlob),

    /// Acknowledgement of a set issued outside a transaction
    Stored,
}

/// Factory for store sessions
///
/// Sessions are not shared between callers; every Build, Update or Save
/// opens its own and drops it when done.
#[async_trait]
pub trait TensorStore: Send + Sync {
    /// Open a new session
    async fn session(&self) -> Result<Box<dyn StoreSession>>;
}

/// A pipelined connection to the store
#[async_trait]
pub trait StoreSession: Send {
    /// Queue a get without waiting for its reply
    fn queue_get(&mut self, key: &TensorKey) -> Result<()>;

    /// Queue a set; inside a transaction the write is staged until commit
    fn queue_set(&mut self, key: &TensorKey, blob: TensorBlob) -> Result<()>;

    /// Send every queued command and buffer the replies in issue order
    ///
    /// Consecutive gets are read as one snapshot, so a commit never lands
    /// halfway through them.
    async fn flush(&mut self) -> Result<()>;

    /// Take the oldest buffered reply
    async fn receive(&mut self) -> Result<Reply>;

    /// Start staging sets for an atomic commit
    fn begin(&mut self) -> Result<()>;

    /// Apply every staged set at once, or none of them
    async fn commit(&mut self) -> Result<()>;

    /// Number of commands queued but not yet flushed
    fn pending(&self) -> usize;

    /// Take the oldest buffered reply, which must be a tensor
    async fn receive_tensor(&mut self) -> Result<TensorBlob> {
        match self.receive().await? {
            Reply::Tensor(blob) => Ok(blob),
            Reply::Stored => Err(Error::Transport {
                message: "expected a tensor reply, got a store acknowledgement".to_string(),
            }),
        }
    }
}

/// Backend operations a [`Pipeline`] executes on flush and commit
#[async_trait]
pub(crate) trait Executor: Send + Sync {
    /// Read one record
    async fn fetch(&self, key: &str) -> Result<TensorBlob>;

    /// Read a run of records so that no `apply` lands between the first
    /// read and the last
    async fn fetch_all(&self, keys: &[String]) -> Vec<Result<TensorBlob>>;

    /// Write a batch of records so that readers see all of them or none
    async fn apply(&self, writes: Vec<(String, TensorBlob)>) -> Result<()>;

    /// Backend name used in logs
    fn name(&self) -> &'static str;
}

enum Command {
    Get(String),
    Set(String, TensorBlob),
}

/// Session implementation shared by every backend
pub(crate) struct Pipeline<E> {
    executor: E,
    outgoing: VecDeque<Command>,
    replies: VecDeque<Result<Reply>>,
    staged: Option<Vec<(String, TensorBlob)>>,
}

impl<E: Executor> Pipeline<E> {
    pub(crate) fn new(executor: E) -> Self {
        Self {
            executor,
            outgoing: VecDeque::new(),
            replies: VecDeque::new(),
            staged: None,
        }
    }
}

#[async_trait]
impl<E: Executor> StoreSession for Pipeline<E> {
    fn queue_get(&mut self, key: &TensorKey) -> Result<()> {
        if self.staged.is_some() {
            return Err(Error::TransactionFailed {
                message: format!("cannot read {} inside a transaction", key),
            });
        }
        self.outgoing.push_back(Command::Get(key.to_string()));
        Ok(())
    }

    fn queue_set(&mut self, key: &TensorKey, blob: TensorBlob) -> Result<()> {
        match self.staged.as_mut() {
            Some(staged) => staged.push((key.to_string(), blob)),
            None => self.outgoing.push_back(Command::Set(key.to_string(), blob)),
        }
        Ok(())
    }

    #[instrument(skip_all)]
    async fn flush(&mut self) -> Result<()> {
        let commands = self.outgoing.len();
        let mut outgoing = std::mem::take(&mut self.outgoing).into_iter().peekable();

        while let Some(command) = outgoing.next() {
            // A failed command becomes its own reply; later replies keep their slots.
            match command {
                Command::Get(key) => {
                    let mut keys = vec![key];
                    while let Some(Command::Get(key)) =
                        outgoing.next_if(|next| matches!(next, Command::Get(_)))
                    {
                        keys.push(key);
                    }
                    let fetched = self.executor.fetch_all(&keys).await;
                    self.replies
                        .extend(fetched.into_iter().map(|reply| reply.map(Reply::Tensor)));
                }
                Command::Set(key, blob) => {
                    let reply = self
                        .executor
                        .apply(vec![(key, blob)])
                        .await
                        .map(|_| Reply::Stored);
                    self.replies.push_back(reply);
                }
            }
        }
        debug!(
            backend = self.executor.name(),
            commands,
            buffered = self.replies.len(),
            "Pipeline flushed"
        );
        Ok(())
    }

    async fn receive(&mut self) -> Result<Reply> {
        let queued = self.outgoing.len();
        self.replies
            .pop_front()
            .unwrap_or_else(|| Err(Error::PipelineEmpty { queued }))
    }

    fn begin(&mut self) -> Result<()> {
        if self.staged.is_some() {
            return Err(Error::TransactionFailed {
                message: "transaction already in progress".to_string(),
            });
        }
        self.staged = Some(Vec::new());
        Ok(())
    }

    #[instrument(skip_all)]
    async fn commit(&mut self) -> Result<()> {
        let staged = self.staged.take().ok_or_else(|| Error::TransactionFailed {
            message: "commit without begin".to_string(),
        })?;
        self.flush().await?;

        let count = staged.len();
        self.executor.apply(staged).await.map_err(|e| match e {
            Error::TransactionFailed { .. } => e,
            other => Error::TransactionFailed {
                message: other.to_string(),
            },
        })?;
        debug!(backend = self.executor.name(), count, "Transaction committed");
        Ok(())
    }

    fn pending(&self) -> usize {
        self.outgoing.len()
    }
}
