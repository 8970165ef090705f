//! Grouped task panel: headers for every group, children for expanded ones.

use crate::types::TaskGroup;

use super::App;
use super::pipeline::title_matches;
use super::state::SearchTarget;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TaskSortMode {
    /// Order the provider printed.
    #[default]
    Provider,
    Status,
    Title,
}

impl TaskSortMode {
    pub fn next(self) -> Self {
        match self {
            TaskSortMode::Provider => TaskSortMode::Status,
            TaskSortMode::Status => TaskSortMode::Title,
            TaskSortMode::Title => TaskSortMode::Provider,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            TaskSortMode::Provider => "provider",
            TaskSortMode::Status => "status",
            TaskSortMode::Title => "title",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskRow {
    Group { group: usize },
    Task { group: usize, task: usize },
}

/// Stable sort of groups and of the tasks inside each group.
pub fn sort_groups(groups: &mut [TaskGroup], mode: TaskSortMode) {
    let compare_titles = |a: &str, b: &str| a.to_lowercase().cmp(&b.to_lowercase());
    match mode {
        TaskSortMode::Provider => {}
        TaskSortMode::Status => {
            groups.sort_by_key(|group| group.status.sort_rank());
            for group in groups.iter_mut() {
                group.tasks.sort_by_key(|task| task.status.sort_rank());
            }
        }
        TaskSortMode::Title => {
            groups.sort_by(|a, b| compare_titles(&a.title, &b.title));
            for group in groups.iter_mut() {
                group
                    .tasks
                    .sort_by(|a, b| compare_titles(&a.title, &b.title));
            }
        }
    }
}

pub fn build_rows(groups: &[TaskGroup], is_expanded: impl Fn(&TaskGroup) -> bool) -> Vec<TaskRow> {
    let mut rows = Vec::new();
    for (group_index, group) in groups.iter().enumerate() {
        rows.push(TaskRow::Group { group: group_index });
        if is_expanded(group) {
            rows.extend(
                (0..group.tasks.len()).map(|task| TaskRow::Task {
                    group: group_index,
                    task,
                }),
            );
        }
    }
    rows
}

impl App {
    pub fn row_title(&self, row: TaskRow) -> &str {
        match row {
            TaskRow::Group { group } => self
                .task_groups
                .get(group)
                .map(|group| group.title.as_str())
                .unwrap_or_default(),
            TaskRow::Task { group, task } => self
                .task_groups
                .get(group)
                .and_then(|group| group.tasks.get(task))
                .map(|task| task.title.as_str())
                .unwrap_or_default(),
        }
    }

    pub fn selected_task_row(&self) -> Option<TaskRow> {
        self.task_rows.get(self.task_list.cursor).copied()
    }

    /// Rebuilds the task panel for the focused project, keeping the cursor on
    /// the same group or task when it survives.
    pub(crate) fn rebuild_task_rows(&mut self) {
        let anchor = self.selected_task_row().map(|row| self.row_identity(row));

        let mut groups = self
            .focused_project()
            .and_then(|project| self.task_cache.value(&project).cloned())
            .map(|outcome| outcome.groups().to_vec())
            .unwrap_or_default();
        sort_groups(&mut groups, self.task_sort);
        self.task_groups = groups;
        self.task_rows = build_rows(&self.task_groups, |group| {
            self.expanded_groups.contains(&group.id)
        });

        if let Some(anchor) = anchor
            && let Some(position) = self
                .task_rows
                .iter()
                .position(|row| self.row_identity(*row) == anchor)
        {
            self.task_list.cursor = position;
        }
        let height = self.heights().tasks;
        self.task_list.sync_viewport(self.task_rows.len(), height);
        self.refresh_task_matches();
    }

    pub(crate) fn refresh_task_matches(&mut self) {
        self.task_matches = if self.search.applies_to(SearchTarget::Tasks) {
            let titles: Vec<&str> = self
                .task_rows
                .iter()
                .map(|row| self.row_title(*row))
                .collect();
            title_matches(&titles, &self.search.query)
        } else {
            Vec::new()
        };
    }

    fn row_identity(&self, row: TaskRow) -> (String, Option<String>) {
        match row {
            TaskRow::Group { group } => (
                self.task_groups
                    .get(group)
                    .map(|group| group.id.clone())
                    .unwrap_or_default(),
                None,
            ),
            TaskRow::Task { group, task } => {
                let group = self.task_groups.get(group);
                (
                    group.map(|group| group.id.clone()).unwrap_or_default(),
                    group
                        .and_then(|group| group.tasks.get(task))
                        .map(|task| task.id.clone()),
                )
            }
        }
    }

    pub(crate) fn toggle_group(&mut self, group: usize) {
        let Some(id) = self.task_groups.get(group).map(|group| group.id.clone()) else {
            return;
        };
        if !self.expanded_groups.remove(&id) {
            self.expanded_groups.insert(id);
        }
        self.rebuild_task_rows();
    }
}
