use crate::config::ProgramTable;

/// Outcome of comparing one program across two config generations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReloadAction {
    Added(String),
    Removed(String),
    Changed(String),
    Unchanged(String),
}

/// Diffs two program tables. Removals come first (matching the order the
/// engine applies them), then every program of the new table in order.
/// Equality is the spec's field-by-field comparison: defaults were already
/// applied at parse time and the name is the key, so `==` on the spec is
/// exactly the documented comparison.
pub fn diff(old: &ProgramTable, new: &ProgramTable) -> Vec<ReloadAction> {
    let mut actions = Vec::new();

    for name in old.keys() {
        if !new.contains_key(name) {
            actions.push(ReloadAction::Removed(name.clone()));
        }
    }

    for (name, spec) in new {
        match old.get(name) {
            None => actions.push(ReloadAction::Added(name.clone())),
            Some(previous) if previous == spec => {
                actions.push(ReloadAction::Unchanged(name.clone()))
            }
            Some(_) => actions.push(ReloadAction::Changed(name.clone())),
        }
    }

    actions
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::load_programs;
    use std::io::Write;

    fn table(yaml: &str) -> ProgramTable {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "{yaml}").unwrap();
        load_programs(file.path()).unwrap()
    }

    #[test]
    fn identical_tables_produce_only_unchanged() {
        let old = table("a:\n  cmd: /bin/sleep 60\nb:\n  cmd: /bin/true\n");
        let new = table("a:\n  cmd: /bin/sleep 60\nb:\n  cmd: /bin/true\n");
        assert_eq!(
            diff(&old, &new),
            vec![
                ReloadAction::Unchanged("a".to_string()),
                ReloadAction::Unchanged("b".to_string()),
            ]
        );
    }

    #[test]
    fn detects_additions_removals_and_changes() {
        let old = table("a:\n  cmd: /bin/sleep 60\ngone:\n  cmd: /bin/true\n");
        let new = table("a:\n  cmd: /bin/sleep 60\n  numprocs: 2\nb:\n  cmd: /bin/true\n");
        assert_eq!(
            diff(&old, &new),
            vec![
                ReloadAction::Removed("gone".to_string()),
                ReloadAction::Changed("a".to_string()),
                ReloadAction::Added("b".to_string()),
            ]
        );
    }

    #[test]
    fn explicit_defaults_do_not_count_as_changes() {
        let old = table("a:\n  cmd: /bin/true\n");
        let new = table("a:\n  cmd: /bin/true\n  startretries: 3\n  stoptime: 10\n");
        assert_eq!(diff(&old, &new), vec![ReloadAction::Unchanged("a".to_string())]);
    }
}
