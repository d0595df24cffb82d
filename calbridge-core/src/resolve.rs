//! Choosing the canonical version of one event across replicas.

use std::cmp::Ordering;

use crate::event::Event;

/// Compute the version of one event every replica should converge on.
///
/// `instances` are the copies held by the replicas that know the event.
/// Returns `None` when no copy is active, since there is nothing to converge.
///
/// - A cancelled copy anywhere wins: the canonical event is picked among the
///   cancelled copies only.
/// - Otherwise a local edit not yet pushed wins, then the most recently
///   updated copy, then the higher revision.
/// - The canonical revision is raised above every observed revision, so no
///   replica can reject the write as stale.
pub fn resolve<'a>(instances: impl IntoIterator<Item = &'a Event>) -> Option<Event> {
    let instances: Vec<&Event> = instances.into_iter().collect();

    if !instances.iter().any(|e| e.is_active()) {
        return None;
    }

    let cancelled = instances.iter().any(|e| !e.is_active());

    let winner = instances
        .iter()
        .copied()
        .filter(|e| !cancelled || !e.is_active())
        .max_by(|a, b| rank(a, b))?;

    let mut canonical = winner.clone();
    canonical.mark_clean();

    let max_revision = instances
        .iter()
        .map(|e| e.sequence)
        .max()
        .unwrap_or(canonical.sequence);
    if max_revision > canonical.sequence {
        canonical.sequence = max_revision + 1;
    }

    Some(canonical)
}

fn rank(a: &Event, b: &Event) -> Ordering {
    a.is_dirty()
        .cmp(&b.is_dirty())
        .then_with(|| a.compare(Some(b)))
        .then_with(|| a.sequence.cmp(&b.sequence))
}
