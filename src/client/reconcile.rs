//! Merging a server `sync` snapshot into the client's message list.

use std::collections::{HashMap, HashSet};

use crate::protocol::ChatMessage;

use super::store::{Delivery, Envelope};

/// Output of [`merge_snapshot`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Merged {
    pub messages: Vec<Envelope>,
    /// Sync mark to remember for the next merge.
    pub mark: i64,
}

/// Merges `snapshot` into `local`, keyed by message id.
///
/// - Snapshot entries win on every server field. A local entry's delivery
///   status is kept, except that a pending one is promoted to `delivered`
///   because the snapshot proves it was committed.
/// - Local entries missing from the snapshot survive if they are still
///   pending, or if they are newer than both `mark` and the newest commit in
///   the snapshot. Anything older was removed on the server.
/// - The result is ordered by commit timestamp.
///
/// Merging the same snapshot again into the result yields the same result.
pub fn merge_snapshot(
    local: &[Envelope],
    snapshot: &[ChatMessage],
    mark: i64,
    local_user: Option<&str>,
) -> Merged {
    let newest = snapshot.iter().map(|m| m.at).max().unwrap_or(i64::MIN);
    let mark = mark.max(newest);

    let by_id: HashMap<&str, &Envelope> =
        local.iter().map(|e| (e.message.id.as_str(), e)).collect();
    let mut seen: HashSet<&str> = HashSet::with_capacity(snapshot.len());
    let mut messages = Vec::with_capacity(snapshot.len() + local.len());

    for message in snapshot {
        if !seen.insert(message.id.as_str()) {
            continue;
        }
        let status = match by_id.get(message.id.as_str()).map(|e| e.status) {
            Some(status) if status.is_confirmed() => status,
            Some(_) => Delivery::Delivered,
            None => Delivery::for_commit(message, local_user),
        };
        messages.push(Envelope {
            message: message.clone(),
            status,
        });
    }

    messages.extend(
        local
            .iter()
            .filter(|e| !seen.contains(e.message.id.as_str()))
            .filter(|e| e.status.is_pending() || e.status == Delivery::Failed || e.message.at > mark)
            .cloned(),
    );

    // stable: equal timestamps keep snapshot order, then local order
    messages.sort_by_key(|e| e.message.at);

    Merged { messages, mark }
}
