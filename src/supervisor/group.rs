use crate::config::ProgramSpec;

/// All instances of one program. The group owns the spec; instance records
/// themselves live in the engine registry, keyed by indexed name.
pub struct ProgramGroup {
    pub name: String,
    pub spec: ProgramSpec,
}

impl ProgramGroup {
    pub fn new(name: String, spec: ProgramSpec) -> Self {
        Self { name, spec }
    }

    /// Instance names in spawn order: the bare program name for a single
    /// process, `name_NN` (two digits, zero-based) otherwise.
    pub fn indexed_names(&self) -> Vec<String> {
        (0..self.spec.numprocs)
            .map(|i| indexed_name(&self.name, i, self.spec.numprocs))
            .collect()
    }
}

pub fn indexed_name(program: &str, index: u32, numprocs: u32) -> String {
    if numprocs == 1 {
        program.to_string()
    } else {
        format!("{program}_{index:02}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::load_programs;
    use std::io::Write;

    fn spec(numprocs: u32) -> ProgramSpec {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "p:\n  cmd: /bin/true\n  numprocs: {numprocs}\n").unwrap();
        load_programs(file.path()).unwrap().remove("p").unwrap()
    }

    #[test]
    fn single_process_keeps_bare_name() {
        let group = ProgramGroup::new("web".to_string(), spec(1));
        assert_eq!(group.indexed_names(), vec!["web"]);
    }

    #[test]
    fn fanout_uses_two_digit_indices() {
        let group = ProgramGroup::new("web".to_string(), spec(3));
        assert_eq!(group.indexed_names(), vec!["web_00", "web_01", "web_02"]);
    }
}
