//! Conflict-retry combinator around `begin → build → commit`

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::client::{CommitOutcome, PgRef, RepositoryClient, Transaction};
use crate::errors::{ExError, ExErrorKind, Result};
use crate::model::Decoration;
use crate::repo::txn::would_change;

/// How many times a conflicting transaction is rebuilt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// `None` retries until the commit goes through
    pub max_attempts: Option<u32>,
}

impl RetryPolicy {
    pub fn unbounded() -> Self {
        Self { max_attempts: None }
    }

    pub fn bounded(max_attempts: u32) -> Self {
        Self {
            max_attempts: Some(max_attempts.max(1)),
        }
    }

    /// Config form: `0` means unbounded
    pub fn from_max_attempts(max_attempts: u32) -> Self {
        match max_attempts {
            0 => Self::unbounded(),
            n => Self::bounded(n),
        }
    }

    fn exhausted(&self, attempt: u32) -> bool {
        self.max_attempts.is_some_and(|max| attempt >= max)
    }
}

/// What a retried write ended up doing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    /// The built transaction would not change the group; nothing was committed
    Unchanged,
    Committed { version: u64, attempts: u32 },
}

impl WriteOutcome {
    pub fn changed(&self) -> bool {
        matches!(self, WriteOutcome::Committed { .. })
    }
}

/// Run `build` against a fresh transaction until its commit is accepted
///
/// Each attempt re-reads the group through `begin_transaction`, so `build`
/// always plans from current contents. Transactions that would not change
/// the group are dropped without committing.
///
/// # Errors
///
/// Whatever `build` or the repository returns, or `Conflict` once a
/// bounded `policy` is exhausted.
pub fn with_retry<C, B>(
    client: &C,
    policy: &RetryPolicy,
    pg: &PgRef,
    owner: &Decoration,
    mut build: B,
) -> Result<WriteOutcome>
where
    C: RepositoryClient + ?Sized,
    B: FnMut(&mut Transaction) -> Result<()>,
{
    let mut attempt = 0u32;
    loop {
        attempt += 1;
        let mut tx = client.begin_transaction(pg, owner)?;
        build(&mut tx)?;
        if !would_change(&tx) {
            return Ok(WriteOutcome::Unchanged);
        }
        match client.commit(tx)? {
            CommitOutcome::Committed(version) => {
                return Ok(WriteOutcome::Committed {
                    version,
                    attempts: attempt,
                })
            }
            CommitOutcome::Conflict => {
                if policy.exhausted(attempt) {
                    return Err(ExError::new(ExErrorKind::Conflict)
                        .with_entity(pg.entity.fmri.to_string())
                        .with_pg(&pg.name)
                        .with_message(format!("gave up after {} conflicting commits", attempt)));
                }
                debug!(
                    fmri = %pg.entity.fmri,
                    pg = %pg.name,
                    attempt,
                    "transaction conflicted, retrying from a fresh read"
                );
            }
        }
    }
}
