//! The state summary projector.
//!
//! Builds the read-only snapshot consumed by clients: one row per task
//! proxy, a family-tree view grouping proxies by first-parent ancestry,
//! and a global block. The projector never touches a proxy's own
//! fields directly from another thread -- it is handed the already
//! up-to-date summaries by the scheduler loop and only aggregates.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, RwLock};

use serde::{Deserialize, Serialize};

use crate::cycle_point::CyclePoint;
use crate::identity::TaskId;
use crate::task_state::TaskStatus;

use crate::proxy::TaskSummary;

/// One row of the per-task snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskSummaryRow {
    pub id: TaskId,
    pub name: String,
    pub point: CyclePoint,
    pub status: TaskStatus,
    pub summary: TaskSummary,
    /// First-parent ancestor for family-tree grouping, if any.
    pub parent: Option<TaskId>,
}

/// Aggregated counts of tasks in each status, used in the global block
/// and the family-tree view.
pub type StateTotals = BTreeMap<TaskStatus, usize>;

fn count_by_status<'a>(rows: impl Iterator<Item = &'a TaskSummaryRow>) -> StateTotals {
    let mut totals = StateTotals::new();
    for row in rows {
        *totals.entry(row.status).or_insert(0) += 1;
    }
    totals
}

/// One family-tree group: a root task and its first-parent descendants,
/// plus the group's own aggregated status.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FamilyGroup {
    pub root: TaskId,
    pub members: Vec<TaskId>,
    pub totals: StateTotals,
    /// The precedence-ordered status string for the whole group
    /// (rolled up by precedence order below).
    pub status_string: String,
}

/// Precedence order for the rolled-up status string:
/// `held > stopping > running-to-hold > running-to-stop(...) > running`.
/// Any group containing at least one held task reports `held`, and so on
/// down the list; an empty/terminal-only group reports `running` as the
/// fallback.
fn status_string_for(
    totals: &StateTotals,
    stopping: bool,
    running_to_hold_point: Option<&CyclePoint>,
    running_to_stop_point: Option<&CyclePoint>,
) -> String {
    if totals.get(&TaskStatus::Held).copied().unwrap_or(0) > 0 {
        "held".to_string()
    } else if stopping {
        "stopping".to_string()
    } else if let Some(point) = running_to_hold_point {
        format!("running to hold at {point}")
    } else if let Some(point) = running_to_stop_point {
        format!("running to stop at {point}")
    } else {
        "running".to_string()
    }
}

/// Global summary block: identity of the run plus aggregate state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GlobalSummary {
    pub suite_name: String,
    pub owner: String,
    pub host: String,
    pub min_point: Option<CyclePoint>,
    pub max_point: Option<CyclePoint>,
    pub max_point_runahead: Option<CyclePoint>,
    pub time_zone: String,
    pub run_mode: String,
    pub status_string: String,
    pub state_totals: StateTotals,
    pub tree_depth: usize,
    pub reloading: bool,
}

/// Overflow sentinel returned by [`StateSummary::get_tasks_by_state`]
/// when a state has more than six members.
pub const OVERFLOW_SENTINEL: &str = "...";

const TASKS_BY_STATE_LIMIT: usize = 6;

/// The full, atomically-swappable snapshot. The projector holds this
/// behind an `RwLock<Arc<...>>` so readers never observe a half-built
/// snapshot: `publish` builds a new `Arc` and swaps it in one step.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct StateSummary {
    pub tasks: Vec<TaskSummaryRow>,
    pub families: Vec<FamilyGroup>,
    pub global: Option<GlobalSummary>,
}

impl StateSummary {
    pub fn tasks_by_name(&self) -> HashMap<&str, Vec<&TaskSummaryRow>> {
        let mut map: HashMap<&str, Vec<&TaskSummaryRow>> = HashMap::new();
        for row in &self.tasks {
            map.entry(row.name.as_str()).or_default().push(row);
        }
        map
    }

    /// Up to six tasks per state, with an overflow sentinel appended when
    /// a state has more members than that.
    pub fn get_tasks_by_state(&self) -> BTreeMap<TaskStatus, Vec<String>> {
        let mut grouped: BTreeMap<TaskStatus, Vec<&TaskSummaryRow>> = BTreeMap::new();
        for row in &self.tasks {
            grouped.entry(row.status).or_default().push(row);
        }
        grouped
            .into_iter()
            .map(|(status, mut rows)| {
                rows.sort_by(|a, b| a.id.to_string().cmp(&b.id.to_string()));
                let mut ids: Vec<String> = rows.iter().take(TASKS_BY_STATE_LIMIT).map(|r| r.id.to_string()).collect();
                if rows.len() > TASKS_BY_STATE_LIMIT {
                    ids.push(OVERFLOW_SENTINEL.to_string());
                }
                (status, ids)
            })
            .collect()
    }
}

/// Builds family-tree groups by following first-parent ancestry: each
/// task belongs to the group rooted at its earliest ancestor with no
/// parent of its own.
pub fn build_family_groups(rows: &[TaskSummaryRow]) -> Vec<FamilyGroup> {
    let by_id: HashMap<&TaskId, &TaskSummaryRow> = rows.iter().map(|r| (&r.id, r)).collect();

    fn root_of<'a>(id: &'a TaskId, by_id: &'a HashMap<&'a TaskId, &'a TaskSummaryRow>) -> &'a TaskId {
        let mut current = id;
        loop {
            match by_id.get(current).and_then(|r| r.parent.as_ref()) {
                Some(parent) if by_id.contains_key(parent) => current = parent,
                _ => return current,
            }
        }
    }

    let mut members: HashMap<TaskId, Vec<TaskId>> = HashMap::new();
    for row in rows {
        let root = root_of(&row.id, &by_id).clone();
        members.entry(root).or_default().push(row.id.clone());
    }

    members
        .into_iter()
        .map(|(root, member_ids)| {
            let member_rows: Vec<&TaskSummaryRow> = member_ids.iter().filter_map(|id| by_id.get(id).copied()).collect();
            let totals = count_by_status(member_rows.into_iter());
            let status_string = status_string_for(&totals, false, None, None);
            FamilyGroup {
                root,
                members: member_ids,
                totals,
                status_string,
            }
        })
        .collect()
}

/// Maximum depth of any family-tree group: the length of the longest
/// first-parent chain among `rows`.
pub fn tree_depth(rows: &[TaskSummaryRow]) -> usize {
    let by_id: HashMap<&TaskId, &TaskSummaryRow> = rows.iter().map(|r| (&r.id, r)).collect();
    rows.iter()
        .map(|row| {
            let mut depth = 1;
            let mut current = row;
            while let Some(parent_id) = &current.parent {
                let Some(parent) = by_id.get(parent_id) else { break };
                depth += 1;
                current = parent;
            }
            depth
        })
        .max()
        .unwrap_or(0)
}

/// Owns the atomically-swapped snapshot. The scheduler loop calls
/// [`Self::publish`] whenever `EventFlags::take_summary_invalid`
/// returns true; readers call [`Self::current`] lock-free relative to
/// publication (a single `RwLock` read).
#[derive(Debug, Default)]
pub struct SummaryProjector {
    current: RwLock<Arc<StateSummary>>,
}

impl SummaryProjector {
    pub fn new() -> Self {
        Self {
            current: RwLock::new(Arc::new(StateSummary::default())),
        }
    }

    pub fn current(&self) -> Arc<StateSummary> {
        self.current.read().unwrap().clone()
    }

    /// Build and swap in a fresh snapshot from the given task rows and
    /// global fields. The whole `StateSummary` is built off to the side
    /// and installed in one atomic step; no reader ever sees a partially
    /// built snapshot.
    #[allow(clippy::too_many_arguments)]
    pub fn publish(
        &self,
        tasks: Vec<TaskSummaryRow>,
        suite_name: String,
        owner: String,
        host: String,
        min_point: Option<CyclePoint>,
        max_point: Option<CyclePoint>,
        max_point_runahead: Option<CyclePoint>,
        time_zone: String,
        run_mode: String,
        reloading: bool,
        stopping: bool,
        running_to_hold_point: Option<CyclePoint>,
        running_to_stop_point: Option<CyclePoint>,
    ) {
        let families = build_family_groups(&tasks);
        let depth = tree_depth(&tasks);
        let state_totals = count_by_status(tasks.iter());
        let status_string = status_string_for(
            &state_totals,
            stopping,
            running_to_hold_point.as_ref(),
            running_to_stop_point.as_ref(),
        );

        let global = GlobalSummary {
            suite_name,
            owner,
            host,
            min_point,
            max_point,
            max_point_runahead,
            time_zone,
            run_mode,
            status_string,
            state_totals,
            tree_depth: depth,
            reloading,
        };

        let snapshot = StateSummary {
            tasks,
            families,
            global: Some(global),
        };
        *self.current.write().unwrap() = Arc::new(snapshot);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(name: &str, point: i64, status: TaskStatus, parent: Option<(&str, i64)>) -> TaskSummaryRow {
        TaskSummaryRow {
            id: TaskId::new(name, CyclePoint::Integer(point)),
            name: name.to_string(),
            point: CyclePoint::Integer(point),
            status,
            summary: TaskSummary::default(),
            parent: parent.map(|(n, p)| TaskId::new(n, CyclePoint::Integer(p))),
        }
    }

    #[test]
    fn family_groups_follow_first_parent_chain() {
        let rows = vec![
            row("root", 1, TaskStatus::Running, None),
            row("child", 1, TaskStatus::Waiting, Some(("root", 1))),
            row("grandchild", 1, TaskStatus::Waiting, Some(("child", 1))),
        ];
        let groups = build_family_groups(&rows);
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].root, TaskId::new("root", CyclePoint::Integer(1)));
        assert_eq!(groups[0].members.len(), 3);
    }

    #[test]
    fn tree_depth_counts_longest_chain() {
        let rows = vec![
            row("root", 1, TaskStatus::Running, None),
            row("child", 1, TaskStatus::Waiting, Some(("root", 1))),
            row("grandchild", 1, TaskStatus::Waiting, Some(("child", 1))),
        ];
        assert_eq!(tree_depth(&rows), 3);
    }

    #[test]
    fn get_tasks_by_state_truncates_with_sentinel() {
        let mut rows = Vec::new();
        for i in 0..8 {
            rows.push(row(&format!("t{i}"), 1, TaskStatus::Running, None));
        }
        let summary = StateSummary {
            tasks: rows,
            families: vec![],
            global: None,
        };
        let by_state = summary.get_tasks_by_state();
        let running = &by_state[&TaskStatus::Running];
        assert_eq!(running.len(), 7);
        assert_eq!(running.last().unwrap(), OVERFLOW_SENTINEL);
    }

    #[test]
    fn status_string_precedence_held_wins() {
        let mut totals = StateTotals::new();
        totals.insert(TaskStatus::Held, 1);
        totals.insert(TaskStatus::Running, 5);
        let hold_point = CyclePoint::Integer(3);
        assert_eq!(status_string_for(&totals, true, Some(&hold_point), None), "held");
    }

    #[test]
    fn status_string_falls_back_to_running() {
        let totals = StateTotals::new();
        assert_eq!(status_string_for(&totals, false, None, None), "running");
    }

    #[test]
    fn status_string_precedence_stopping_beats_running_to_hold() {
        let totals = StateTotals::new();
        let hold_point = CyclePoint::Integer(3);
        assert_eq!(status_string_for(&totals, true, Some(&hold_point), None), "stopping");
    }

    #[test]
    fn status_string_running_to_hold_includes_point() {
        let totals = StateTotals::new();
        let hold_point = CyclePoint::Integer(3);
        assert_eq!(
            status_string_for(&totals, false, Some(&hold_point), None),
            "running to hold at 3"
        );
    }

    #[test]
    fn status_string_running_to_stop_includes_point() {
        let totals = StateTotals::new();
        let stop_point = CyclePoint::Integer(7);
        assert_eq!(
            status_string_for(&totals, false, None, Some(&stop_point)),
            "running to stop at 7"
        );
    }

    #[test]
    fn publish_swaps_snapshot_atomically() {
        let projector = SummaryProjector::new();
        assert!(projector.current().tasks.is_empty());
        projector.publish(
            vec![row("foo", 1, TaskStatus::Running, None)],
            "demo".into(),
            "owner".into(),
            "host".into(),
            Some(CyclePoint::Integer(1)),
            Some(CyclePoint::Integer(1)),
            None,
            "UTC".into(),
            "live".into(),
            false,
            false,
            None,
            None,
        );
        let snapshot = projector.current();
        assert_eq!(snapshot.tasks.len(), 1);
        assert_eq!(snapshot.global.as_ref().unwrap().suite_name, "demo");
    }

    #[test]
    fn publish_threads_running_to_stop_into_status_string() {
        let projector = SummaryProjector::new();
        projector.publish(
            vec![row("foo", 1, TaskStatus::Running, None)],
            "demo".into(),
            "owner".into(),
            "host".into(),
            Some(CyclePoint::Integer(1)),
            Some(CyclePoint::Integer(1)),
            None,
            "UTC".into(),
            "live".into(),
            false,
            false,
            None,
            Some(CyclePoint::Integer(5)),
        );
        let snapshot = projector.current();
        assert_eq!(
            snapshot.global.as_ref().unwrap().status_string,
            "running to stop at 5"
        );
    }
}
