//! Track sequencing
//!
//! Pure next/previous selection over the addressable track list. Holds no
//! state: the orchestrator passes the current index, the modes, and the
//! up-next queue, and applies the result itself.

use rand::Rng;

use crate::types::RepeatMode;

/// Inputs shared by next and previous selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SequenceContext {
    pub current: Option<usize>,
    pub total: usize,
    pub shuffle: bool,
    pub repeat: RepeatMode,
}

/// Result of [`next_index`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NextDecision {
    pub index: Option<usize>,
    /// Entries to pop from the front of the up-next queue when this decision
    /// is applied (picked entry plus discarded unresolvable ones).
    pub consumed: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PreviousAction {
    /// Seek the current track back to zero.
    Restart,
    Index(usize),
    None,
}

/// Choose the next track.
///
/// Queue entries take precedence over shuffle and repeat. Entries that no
/// longer resolve to an index are discarded, up to `max_skips` of them.
/// With nothing usable queued, shuffle draws uniformly among the other
/// tracks; sequential order wraps only when repeat is on.
pub fn next_index<R, F>(
    ctx: &SequenceContext,
    queue: &[String],
    resolve: F,
    rng: &mut R,
    max_skips: usize,
) -> NextDecision
where
    R: Rng + ?Sized,
    F: Fn(&str) -> Option<usize>,
{
    let mut consumed = 0;
    for track_id in queue.iter().take(max_skips) {
        consumed += 1;
        if let Some(index) = resolve(track_id) {
            return NextDecision {
                index: Some(index),
                consumed,
            };
        }
    }

    NextDecision {
        index: mode_next(ctx, rng),
        consumed,
    }
}

fn mode_next<R: Rng + ?Sized>(ctx: &SequenceContext, rng: &mut R) -> Option<usize> {
    if ctx.total == 0 {
        return None;
    }

    if ctx.shuffle && ctx.total > 1 {
        return Some(draw_excluding(ctx.current, ctx.total, rng));
    }

    match ctx.current {
        None => Some(0),
        Some(current) if current + 1 < ctx.total => Some(current + 1),
        Some(_) => match ctx.repeat {
            RepeatMode::Off => None,
            // Explicit "next" under repeat-one moves on like repeat-all.
            RepeatMode::All | RepeatMode::One => Some(0),
        },
    }
}

/// Choose what "previous" does.
///
/// Past `restart_threshold_secs` of elapsed time the current track restarts.
/// In shuffle, the most recent history entry wins, falling back to a draw.
pub fn previous_action<R: Rng + ?Sized>(
    ctx: &SequenceContext,
    elapsed_secs: f64,
    restart_threshold_secs: f64,
    history: Option<usize>,
    rng: &mut R,
) -> PreviousAction {
    let Some(current) = ctx.current else {
        return if ctx.total > 0 {
            PreviousAction::Index(0)
        } else {
            PreviousAction::None
        };
    };

    if elapsed_secs > restart_threshold_secs {
        return PreviousAction::Restart;
    }

    if ctx.shuffle && ctx.total > 1 {
        let index = history
            .filter(|&index| index < ctx.total && index != current)
            .unwrap_or_else(|| draw_excluding(Some(current), ctx.total, rng));
        return PreviousAction::Index(index);
    }

    if current > 0 {
        return PreviousAction::Index((current - 1).min(ctx.total.saturating_sub(1)));
    }

    match ctx.repeat {
        RepeatMode::Off => PreviousAction::Restart,
        RepeatMode::All | RepeatMode::One if ctx.total > 1 => {
            PreviousAction::Index(ctx.total - 1)
        }
        _ => PreviousAction::Restart,
    }
}

/// Uniform draw over `0..total` that never returns `exclude`.
fn draw_excluding<R: Rng + ?Sized>(exclude: Option<usize>, total: usize, rng: &mut R) -> usize {
    match exclude {
        Some(current) if current < total => {
            let pick = rng.gen_range(0..total - 1);
            if pick >= current {
                pick + 1
            } else {
                pick
            }
        }
        _ => rng.gen_range(0..total),
    }
}
