use std::collections::HashSet;

/// Per-task view flags. Lives beside the task data and is never persisted
/// or merged.
#[derive(Debug, Clone, Default)]
pub struct UiState {
    editing: HashSet<String>,
    expanded: HashSet<String>,
}

impl UiState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the new value.
    pub fn toggle_editing(&mut self, task_id: &str) -> bool {
        toggle(&mut self.editing, task_id)
    }

    pub fn toggle_expanded(&mut self, task_id: &str) -> bool {
        toggle(&mut self.expanded, task_id)
    }

    pub fn is_editing(&self, task_id: &str) -> bool {
        self.editing.contains(task_id)
    }

    pub fn is_expanded(&self, task_id: &str) -> bool {
        self.expanded.contains(task_id)
    }

    pub fn forget(&mut self, task_id: &str) {
        self.editing.remove(task_id);
        self.expanded.remove(task_id);
    }

    pub fn clear(&mut self) {
        self.editing.clear();
        self.expanded.clear();
    }
}

fn toggle(set: &mut HashSet<String>, task_id: &str) -> bool {
    if set.remove(task_id) {
        false
    } else {
        set.insert(task_id.to_string());
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_toggle_and_forget() {
        let mut ui = UiState::new();
        assert!(ui.toggle_editing("t1"));
        assert!(ui.toggle_expanded("t1"));
        assert!(ui.is_editing("t1") && ui.is_expanded("t1"));
        assert!(!ui.toggle_editing("t1"));
        ui.forget("t1");
        assert!(!ui.is_expanded("t1"));
    }
}
