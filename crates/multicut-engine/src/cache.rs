// crates/multicut-engine/src/cache.rs
//
// Positional cache eviction. A task's fate is decided purely by where its
// frame index sits relative to the read cursor (or, for scrub tasks, the
// latest seek target) — never by arrival or completion order.

use std::collections::VecDeque;
use std::sync::Arc;

use crate::mix_task::MixFrameTask;

/// Discard and drop every task behind `cursor` in the current direction,
/// except `keep` (normally the frame index just delivered to the caller).
pub fn evict_behind_cursor(
    tasks: &mut VecDeque<Arc<MixFrameTask>>,
    cursor: i64,
    forward: bool,
    keep: Option<i64>,
) {
    tasks.retain(|t| {
        let idx = t.frame_index();
        let behind = if forward { idx < cursor } else { idx > cursor };
        if behind && Some(idx) != keep {
            t.discard_all_sub_tasks();
            false
        } else {
            true
        }
    });
}

/// Seeking-tasks variant: anchored at the latest scrub `target`. An
/// output-ready task is kept until a strictly closer-to-target output-ready
/// task supersedes it, so the caller always has something to show.
pub fn evict_seeking(tasks: &mut VecDeque<Arc<MixFrameTask>>, target: i64) {
    let ready_distances: Vec<i64> = tasks.iter()
        .filter(|t| t.is_output_ready())
        .map(|t| (t.frame_index() - target).abs())
        .collect();

    tasks.retain(|t| {
        if !t.is_output_ready() {
            return true;
        }
        let dist = (t.frame_index() - target).abs();
        let superseded = ready_distances.iter().any(|&d| d < dist);
        if superseded {
            t.discard_all_sub_tasks();
            false
        } else {
            true
        }
    });
}

/// Drop the task farthest ahead of the cursor once the active list exceeds
/// `window` entries, bounding memory use of the pre-read queue.
pub fn cap_window(tasks: &mut VecDeque<Arc<MixFrameTask>>, forward: bool, window: usize) {
    while tasks.len() > window {
        let farthest = if forward {
            tasks.iter().enumerate().max_by_key(|(_, t)| t.frame_index()).map(|(i, _)| i)
        } else {
            tasks.iter().enumerate().min_by_key(|(_, t)| t.frame_index()).map(|(i, _)| i)
        };
        match farthest {
            Some(i) => {
                if let Some(t) = tasks.remove(i) {
                    t.discard_all_sub_tasks();
                }
            }
            None => break,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn task(idx: i64) -> Arc<MixFrameTask> { MixFrameTask::new(idx) }

    #[test]
    fn evict_behind_cursor_keeps_just_delivered() {
        let mut tasks = VecDeque::from(vec![task(0), task(1), task(2)]);
        evict_behind_cursor(&mut tasks, 2, true, Some(1));
        let remaining: Vec<i64> = tasks.iter().map(|t| t.frame_index()).collect();
        assert_eq!(remaining, vec![1, 2]);
    }

    #[test]
    fn evict_behind_cursor_reverses_direction() {
        let mut tasks = VecDeque::from(vec![task(5), task(3), task(1)]);
        evict_behind_cursor(&mut tasks, 3, false, None);
        let remaining: Vec<i64> = tasks.iter().map(|t| t.frame_index()).collect();
        assert_eq!(remaining, vec![3, 1]);
    }

    #[test]
    fn cap_window_drops_farthest_ahead() {
        let mut tasks = VecDeque::from(vec![task(0), task(1), task(2), task(3)]);
        cap_window(&mut tasks, true, 2);
        assert_eq!(tasks.len(), 2);
        assert!(tasks.iter().all(|t| t.frame_index() <= 1));
    }
}
