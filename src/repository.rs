//! Repository Writer (component C9, §4.9): records a copy of each
//! successfully built easyconfig plus its build statistics, so later runs
//! (and human operators) can see what has already been built and how.
//!
//! `FileRepository` is grounded in the teacher's atomic-write helper
//! (`src/cargo/util/paths.rs::write` — write-to-a-fresh-file, never append
//! in place) applied to a plain directory tree. `GitRepository` is grounded
//! in `src/cargo/sources/git/utils.rs`'s use of `git2` for repository
//! manipulation, reusing the dependency the teacher already carries for
//! an entirely different purpose (fetching git-sourced crates) to commit
//! into a *tracked* tree here instead.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Wall-clock and outcome summary for one Build Unit's pipeline run,
/// recorded alongside its easyconfig copy (§4.9 `add_easyconfig`'s
/// `build_stats` parameter).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildStats {
    pub module_name: String,
    pub module_version: String,
    pub host: String,
    pub build_time_secs: f64,
    pub install_size_bytes: u64,
    pub succeeded: bool,
}

/// Records easyconfigs and their build outcomes; implementations must be
/// atomic — `commit` either fully applies everything staged since the last
/// commit, or leaves the repository exactly as it was.
pub trait RepositoryWriter {
    /// Stage a copy of the easyconfig at `path` for `name`/`version`, along
    /// with this run's stats and (if any) the stats of the previous build
    /// of the same module id.
    fn add_easyconfig(
        &mut self,
        path: &Path,
        name: &str,
        version: &str,
        build_stats: &BuildStats,
        prev_stats: Option<&BuildStats>,
    ) -> Result<()>;

    fn commit(&mut self, msg: &str) -> Result<()>;
}

/// Plain directory tree: `<root>/<name>/<name>-<version>.eb` plus a
/// sibling `.stats.json`. No staging area — `add_easyconfig` writes
/// directly via a write-to-temp-then-rename so a crash mid-write never
/// leaves a half-written file behind; `commit` is a no-op since there is
/// nothing left to flush.
pub struct FileRepository {
    root: PathBuf,
}

impl FileRepository {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        FileRepository { root: root.into() }
    }

    fn dest_paths(&self, name: &str, version: &str) -> (PathBuf, PathBuf) {
        let dir = self.root.join(name);
        let ec = dir.join(format!("{name}-{version}.eb"));
        let stats = dir.join(format!("{name}-{version}.stats.json"));
        (ec, stats)
    }
}

fn atomic_write(dest: &Path, contents: &[u8]) -> Result<()> {
    let parent = dest.parent().context("destination has no parent directory")?;
    fs::create_dir_all(parent)?;
    let tmp = parent.join(format!(".{}.tmp", dest.file_name().unwrap().to_string_lossy()));
    fs::write(&tmp, contents)
        .with_context(|| format!("failed to write `{}`", tmp.display()))?;
    fs::rename(&tmp, dest)
        .with_context(|| format!("failed to move `{}` into place at `{}`", tmp.display(), dest.display()))?;
    Ok(())
}

impl RepositoryWriter for FileRepository {
    fn add_easyconfig(
        &mut self,
        path: &Path,
        name: &str,
        version: &str,
        build_stats: &BuildStats,
        prev_stats: Option<&BuildStats>,
    ) -> Result<()> {
        let (ec_dest, stats_dest) = self.dest_paths(name, version);
        let ec_contents = fs::read(path)
            .with_context(|| format!("failed to read easyconfig at `{}`", path.display()))?;
        atomic_write(&ec_dest, &ec_contents)?;

        let record = serde_json::json!({
            "current": build_stats,
            "previous": prev_stats,
        });
        atomic_write(&stats_dest, serde_json::to_string_pretty(&record)?.as_bytes())?;
        Ok(())
    }

    fn commit(&mut self, _msg: &str) -> Result<()> {
        Ok(())
    }
}

/// Commits into a tracked git tree: `add_easyconfig` stages the easyconfig
/// and stats JSON into the repository's index; `commit` writes the tree and
/// a commit object on top of the current `HEAD` (or creates the initial
/// commit if the repository has none yet). A staged-but-uncommitted file
/// is simply dropped if the process exits before `commit` runs — the index
/// is never itself persisted as the record of truth, only the commit is.
pub struct GitRepository {
    repo: git2::Repository,
    root: PathBuf,
}

impl GitRepository {
    pub fn open_or_init(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        let repo = match git2::Repository::open(&root) {
            Ok(repo) => repo,
            Err(_) => git2::Repository::init(&root)?,
        };
        Ok(GitRepository { repo, root })
    }

    fn relative_dest(&self, name: &str, version: &str, suffix: &str) -> PathBuf {
        PathBuf::from(name).join(format!("{name}-{version}{suffix}"))
    }
}

impl RepositoryWriter for GitRepository {
    fn add_easyconfig(
        &mut self,
        path: &Path,
        name: &str,
        version: &str,
        build_stats: &BuildStats,
        prev_stats: Option<&BuildStats>,
    ) -> Result<()> {
        let ec_rel = self.relative_dest(name, version, ".eb");
        let stats_rel = self.relative_dest(name, version, ".stats.json");

        let ec_contents = fs::read(path)
            .with_context(|| format!("failed to read easyconfig at `{}`", path.display()))?;
        atomic_write(&self.root.join(&ec_rel), &ec_contents)?;

        let record = serde_json::json!({ "current": build_stats, "previous": prev_stats });
        atomic_write(&self.root.join(&stats_rel), serde_json::to_string_pretty(&record)?.as_bytes())?;

        let mut index = self.repo.index()?;
        index.add_path(&ec_rel)?;
        index.add_path(&stats_rel)?;
        index.write()?;
        Ok(())
    }

    fn commit(&mut self, msg: &str) -> Result<()> {
        let mut index = self.repo.index()?;
        let tree_id = index.write_tree()?;
        let tree = self.repo.find_tree(tree_id)?;
        let signature = self
            .repo
            .signature()
            .or_else(|_| git2::Signature::now("easybuild", "easybuild@localhost"))?;

        let parent = self.repo.head().ok().and_then(|h| h.peel_to_commit().ok());
        let parents: Vec<&git2::Commit> = parent.iter().collect();

        self.repo.commit(Some("HEAD"), &signature, &signature, msg, &tree, &parents)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stats(succeeded: bool) -> BuildStats {
        BuildStats {
            module_name: "toy".to_string(),
            module_version: "0.0".to_string(),
            host: "buildhost".to_string(),
            build_time_secs: 12.5,
            install_size_bytes: 4096,
            succeeded,
        }
    }

    #[test]
    fn file_repository_writes_an_eb_copy_and_stats_alongside_it() {
        let dir = tempfile::tempdir().unwrap();
        let ec_src = dir.path().join("toy-0.0.eb");
        fs::write(&ec_src, b"easyblock = 'ConfigureMake'\n").unwrap();

        let mut repo = FileRepository::new(dir.path().join("repo"));
        repo.add_easyconfig(&ec_src, "toy", "0.0", &stats(true), None).unwrap();
        repo.commit("add toy-0.0").unwrap();

        let dest = dir.path().join("repo/toy/toy-0.0.eb");
        assert_eq!(fs::read(dest).unwrap(), fs::read(&ec_src).unwrap());
        assert!(dir.path().join("repo/toy/toy-0.0.stats.json").is_file());
    }

    #[test]
    fn file_repository_records_previous_stats_when_given() {
        let dir = tempfile::tempdir().unwrap();
        let ec_src = dir.path().join("toy-0.0.eb");
        fs::write(&ec_src, b"easyblock = 'ConfigureMake'\n").unwrap();

        let mut repo = FileRepository::new(dir.path().join("repo"));
        let prev = stats(false);
        repo.add_easyconfig(&ec_src, "toy", "0.0", &stats(true), Some(&prev)).unwrap();

        let stats_path = dir.path().join("repo/toy/toy-0.0.stats.json");
        let text = fs::read_to_string(stats_path).unwrap();
        assert!(text.contains("\"succeeded\": false"));
        assert!(text.contains("\"succeeded\": true"));
    }

    #[test]
    fn git_repository_creates_an_initial_commit() {
        let dir = tempfile::tempdir().unwrap();
        let ec_src = dir.path().join("toy-0.0.eb");
        fs::write(&ec_src, b"easyblock = 'ConfigureMake'\n").unwrap();

        let mut repo = GitRepository::open_or_init(dir.path().join("repo")).unwrap();
        repo.add_easyconfig(&ec_src, "toy", "0.0", &stats(true), None).unwrap();
        repo.commit("add toy-0.0").unwrap();

        let reopened = git2::Repository::open(dir.path().join("repo")).unwrap();
        let head = reopened.head().unwrap().peel_to_commit().unwrap();
        assert_eq!(head.message().unwrap(), "add toy-0.0");
    }
}
