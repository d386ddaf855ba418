//! Per-install lock (§4.6 "Locks"): a directory created at
//! `<installpath>/software/.locks/<sanitized-module-id>.lock` before the
//! first write step of a build, released on every exit path.
//!
//! The teacher snapshot predates Cargo's own package-cache advisory lock
//! (`util/flock.rs` does not exist in this tree), so there is no literal
//! file to port. What carries over is the shape: an RAII guard whose `Drop`
//! releases what acquisition took, the same pattern [`crate::env::Env`]
//! uses for its push/pop context frames. Directory creation is atomic on
//! every filesystem EasyBuild runs on, so `fs::create_dir` doubles as the
//! mutex: a second acquirer sees `AlreadyExists` and fails instead of racing.

use std::fs;
use std::io;
use std::path::PathBuf;

use crate::error::EbError;
use crate::model::ModuleId;

pub struct InstallLock {
    path: PathBuf,
    released: bool,
}

impl InstallLock {
    /// Acquire the lock for `module_id` under `installpath`. Fails with
    /// [`EbError::LockHeld`] if the directory already exists — either a
    /// concurrent build of the same module, or a stale lock left behind by
    /// a killed process.
    pub fn acquire(installpath: &std::path::Path, module_id: &ModuleId) -> Result<InstallLock, EbError> {
        let locks_dir = installpath.join("software").join(".locks");
        fs::create_dir_all(&locks_dir)
            .map_err(|e| EbError::IOFailed { path: locks_dir.clone(), reason: e.to_string() })?;
        let path = locks_dir.join(format!("{}.lock", module_id.sanitized()));
        match fs::create_dir(&path) {
            Ok(()) => Ok(InstallLock { path, released: false }),
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                Err(EbError::LockHeld { module_id: module_id.clone() })
            }
            Err(e) => Err(EbError::IOFailed { path, reason: e.to_string() }),
        }
    }

    fn do_release(&mut self) {
        if !self.released {
            let _ = fs::remove_dir(&self.path);
            self.released = true;
        }
    }

    pub fn release(mut self) {
        self.do_release();
    }
}

impl Drop for InstallLock {
    fn drop(&mut self) {
        self.do_release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn acquire_then_drop_releases_the_lock_directory() {
        let dir = tempfile::tempdir().unwrap();
        let module_id = ModuleId::new("toy", "0.0");
        {
            let _lock = InstallLock::acquire(dir.path(), &module_id).unwrap();
            assert!(dir.path().join("software/.locks/toy-0.0.lock").is_dir());
        }
        assert!(!dir.path().join("software/.locks/toy-0.0.lock").exists());
    }

    #[test]
    fn second_acquire_while_held_fails() {
        let dir = tempfile::tempdir().unwrap();
        let module_id = ModuleId::new("toy", "0.0");
        let _lock = InstallLock::acquire(dir.path(), &module_id).unwrap();
        let err = InstallLock::acquire(dir.path(), &module_id).unwrap_err();
        assert!(matches!(err, EbError::LockHeld { .. }));
    }

    #[test]
    fn explicit_release_frees_the_lock_before_drop() {
        let dir = tempfile::tempdir().unwrap();
        let module_id = ModuleId::new("toy", "0.0");
        let lock = InstallLock::acquire(dir.path(), &module_id).unwrap();
        lock.release();
        assert!(InstallLock::acquire(dir.path(), &module_id).is_ok());
    }

    #[test]
    fn sanitizes_module_ids_containing_slashes() {
        let dir = tempfile::tempdir().unwrap();
        let module_id = ModuleId::new("toy", "0.0-foss-2020a");
        let lock = InstallLock::acquire(dir.path(), &module_id).unwrap();
        assert!(dir.path().join("software/.locks/toy-0.0-foss-2020a.lock").is_dir());
        lock.release();
    }
}
