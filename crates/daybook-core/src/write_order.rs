use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::Mutex as AsyncMutex;
use tracing::debug;

use crate::model::Dataset;

/// Orders background remote writes per key (a month key, or a meta name).
///
/// Every local change takes a ticket carrying the next revision of its key.
/// Writes of one key never overlap, and a ticket whose revision is older
/// than one that already landed is dropped instead of written, so the
/// remote copy only ever moves forward no matter how spawned writes are
/// scheduled.
#[derive(Debug, Clone, Default)]
pub struct WriteOrder {
    slots: Arc<Mutex<HashMap<String, Slot>>>,
}

#[derive(Debug, Default)]
struct Slot {
    issued: u64,
    landed: Arc<AsyncMutex<u64>>,
}

#[derive(Debug)]
pub struct Ticket {
    key: String,
    revision: u64,
    landed: Arc<AsyncMutex<u64>>,
}

impl WriteOrder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn issue(&self, key: &str) -> Ticket {
        let mut slots = self.slots.lock();
        let slot = slots.entry(key.to_string()).or_default();
        slot.issued += 1;
        Ticket {
            key: key.to_string(),
            revision: slot.issued,
            landed: Arc::clone(&slot.landed),
        }
    }

    /// One ticket per month of `months`, sorted by key.
    pub fn issue_all(&self, months: &Dataset) -> Vec<Ticket> {
        months.keys().map(|key| self.issue(key)).collect()
    }
}

impl Ticket {
    pub fn revision(&self) -> u64 {
        self.revision
    }

    /// Await `write` unless a newer revision of this key already landed.
    /// Returns whether the write ran. A failed write leaves the landed
    /// revision where it was.
    pub async fn run<Fut, E>(self, write: Fut) -> Result<bool, E>
    where
        Fut: Future<Output = Result<(), E>>,
    {
        let mut landed = self.landed.lock().await;
        if *landed > self.revision {
            debug!(key = %self.key, revision = self.revision, "skipping superseded remote write");
            return Ok(false);
        }
        write.await?;
        *landed = self.revision;
        Ok(true)
    }
}

/// Write a batch of months under their tickets. Months superseded by a
/// newer landed revision are left out; nothing is written when all are.
/// `tickets` must come from [`WriteOrder::issue_all`] over `months`.
pub async fn run_batch<F, Fut, E>(
    tickets: Vec<Ticket>,
    mut months: Dataset,
    write: F,
) -> Result<Vec<String>, E>
where
    F: FnOnce(Dataset) -> Fut,
    Fut: Future<Output = Result<(), E>>,
{
    // Sorted acquisition keeps concurrent batches from deadlocking.
    let mut held = Vec::with_capacity(tickets.len());
    for ticket in tickets {
        let guard = Arc::clone(&ticket.landed).lock_owned().await;
        if *guard > ticket.revision {
            debug!(key = %ticket.key, "dropping superseded month from batch");
            months.remove(&ticket.key);
            continue;
        }
        held.push((ticket, guard));
    }
    if months.is_empty() {
        return Ok(Vec::new());
    }
    write(months).await?;
    let mut written = Vec::with_capacity(held.len());
    for (ticket, mut guard) in held {
        *guard = ticket.revision;
        written.push(ticket.key);
    }
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::MonthCollection;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn an_older_revision_never_lands_after_a_newer_one() {
        let order = WriteOrder::new();
        let older = order.issue("todo-calendar-2026-05");
        let newer = order.issue("todo-calendar-2026-05");
        assert_eq!((older.revision(), newer.revision()), (1, 2));

        let mut log = Vec::new();
        let ran = newer
            .run(async {
                log.push("newer");
                Ok::<(), ()>(())
            })
            .await;
        assert_eq!(ran, Ok(true));
        let ran = older
            .run(async {
                log.push("older");
                Ok::<(), ()>(())
            })
            .await;
        assert_eq!(ran, Ok(false));
        assert_eq!(log, vec!["newer"]);
    }

    #[tokio::test]
    async fn keys_are_ordered_independently() {
        let order = WriteOrder::new();
        let may = order.issue("todo-calendar-2026-05");
        let june = order.issue("todo-calendar-2026-06");
        assert_eq!(june.revision(), 1);
        assert_eq!(june.run(async { Ok::<(), ()>(()) }).await, Ok(true));
        assert_eq!(may.run(async { Ok::<(), ()>(()) }).await, Ok(true));
    }

    #[tokio::test]
    async fn a_failed_write_does_not_supersede_older_ones() {
        let order = WriteOrder::new();
        let older = order.issue("streak");
        let newer = order.issue("streak");
        assert_eq!(newer.run(async { Err::<(), _>("offline") }).await, Err("offline"));
        assert_eq!(older.run(async { Ok::<(), &str>(()) }).await, Ok(true));
    }

    #[tokio::test]
    async fn batches_leave_out_superseded_months() {
        let order = WriteOrder::new();
        let mut months = Dataset::new();
        months.insert("todo-calendar-2026-04".to_string(), MonthCollection::new());
        months.insert("todo-calendar-2026-05".to_string(), MonthCollection::new());
        let tickets = order.issue_all(&months);

        let newer = order.issue("todo-calendar-2026-05");
        assert_eq!(newer.run(async { Ok::<(), ()>(()) }).await, Ok(true));

        let mut sent = Vec::new();
        let written = run_batch(tickets, months, |batch| {
            sent = batch.keys().cloned().collect::<Vec<_>>();
            async { Ok::<(), ()>(()) }
        })
        .await;
        assert_eq!(written, Ok(vec!["todo-calendar-2026-04".to_string()]));
        assert_eq!(sent, vec!["todo-calendar-2026-04".to_string()]);
    }
}
