//! Filesystem [`ModuleSource`] (spec §6.5): the CLI's concrete loader,
//! searching the directories named by `--module` (plus the input file's own
//! directory) for `<dotted.name>.nzsl`.

use std::fs;
use std::path::PathBuf;

use nzsl::module::ModuleSource;

pub struct FilesystemModuleSource {
    roots: Vec<PathBuf>,
}

impl FilesystemModuleSource {
    pub fn new(roots: Vec<PathBuf>) -> Self {
        Self { roots }
    }
}

impl ModuleSource for FilesystemModuleSource {
    fn read(&self, dotted_name: &str) -> Result<(Vec<String>, String), String> {
        let components: Vec<String> = dotted_name.split('.').map(str::to_string).collect();
        let relative: PathBuf = components.iter().collect::<PathBuf>().with_extension("nzsl");

        for root in &self.roots {
            let candidate = root.join(&relative);
            if candidate.is_file() {
                return fs::read_to_string(&candidate)
                    .map(|text| (components.clone(), text))
                    .map_err(|error| format!("{}: {error}", candidate.display()));
            }
        }
        Err(format!("module `{dotted_name}` not found under any of {} search root(s)", self.roots.len()))
    }
}
