use regex::Regex;
use std::fs;
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// Create `<base>/runs/<uuid>` and return it.
pub fn create_run_dir(base: &Path) -> anyhow::Result<PathBuf> {
    let run_id = Uuid::new_v4().to_string();
    let dir = base.join("runs").join(run_id);
    fs::create_dir_all(&dir)?;
    Ok(dir)
}

pub fn write_artifact(dir: &Path, name: &str, content: &str) -> std::io::Result<PathBuf> {
    let path = dir.join(name);
    fs::write(&path, content)?;
    Ok(path)
}

/// Turn a free-form name into a `.txt` filename: runs of non-word
/// characters become `-`.
pub fn normalize_filename(name: &str) -> String {
    let re = Regex::new(r"\W+").expect("valid pattern");
    format!("{}.txt", re.replace_all(name, "-"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_filenames() {
        assert_eq!(normalize_filename("show running-config"), "show-running-config.txt");
        assert_eq!(normalize_filename("node/status: R0"), "node-status-R0.txt");
    }

    #[test]
    fn run_dir_and_artifacts() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = create_run_dir(tmp.path()).unwrap();
        assert!(dir.starts_with(tmp.path().join("runs")));
        let path = write_artifact(&dir, "job.json", "{}").unwrap();
        assert_eq!(fs::read_to_string(path).unwrap(), "{}");
    }
}
