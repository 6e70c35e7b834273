//! Bulk archive packing for oversized transfers.
//!
//! Splits a file or directory tree into a numbered sequence of tar
//! archives, each capped at a fixed byte budget, and reassembles (then
//! deletes) them on the receiving side. Archives are named
//! `<basename>_<index>.tar`, indexed from 0 with no gaps, so the
//! receiver needs no manifest. The tar tool itself is invoked through
//! `CommandRunner`.

use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{JobError, Result};
use crate::infrastructure::runner::{shell_escape, CommandRunner};

// ---------------------------------------------------------------------------
// Archiver
// ---------------------------------------------------------------------------

pub struct Archiver<'a> {
    runner: &'a dyn CommandRunner,
}

impl<'a> Archiver<'a> {
    pub fn new(runner: &'a dyn CommandRunner) -> Self {
        Archiver { runner }
    }

    /// Pack `source` (file or directory) into `destination` as
    /// `<basename>_<i>.tar` archives of at most `max_bytes` of member
    /// content each. A single file always becomes `<basename>_0.tar`; a
    /// member larger than the budget gets an archive of its own.
    ///
    /// Returns the archive paths in index order.
    pub fn pack_by_fixed_size(
        &self,
        source: &Path,
        destination: &Path,
        basename: &str,
        max_bytes: u64,
    ) -> Result<Vec<PathBuf>> {
        fs::create_dir_all(destination)?;

        if source.is_file() {
            let target = destination.join(format!("{}_0.tar", basename));
            let parent = source.parent().unwrap_or_else(|| Path::new("."));
            let name = source
                .file_name()
                .ok_or_else(|| JobError::Validation("source has no file name".into()))?;
            self.tar_create(&target, parent, &[name.to_string_lossy().into_owned()])?;
            return Ok(vec![target]);
        }

        // Chunk the tree's files by cumulative size.
        let files = walk_files(source)?;
        let mut chunks: Vec<Vec<String>> = Vec::new();
        let mut current: Vec<String> = Vec::new();
        let mut current_size = 0u64;
        for (rel, size) in files {
            if !current.is_empty() && current_size + size > max_bytes {
                chunks.push(std::mem::take(&mut current));
                current_size = 0;
            }
            current.push(rel);
            current_size += size;
        }
        if !current.is_empty() {
            chunks.push(current);
        }

        let mut targets = Vec::new();
        for (index, members) in chunks.iter().enumerate() {
            let target = destination.join(format!("{}_{}.tar", basename, index));
            self.tar_create(&target, source, members)?;
            targets.push(target);
        }
        Ok(targets)
    }

    /// Extract `<basename>_0.tar`, `<basename>_1.tar`, ... from
    /// `source_dir` into `destination`, deleting each archive after it is
    /// extracted. Stops at the first missing index.
    pub fn unpack_and_delete(
        &self,
        source_dir: &Path,
        destination: &Path,
        basename: &str,
    ) -> Result<()> {
        fs::create_dir_all(destination)?;
        let mut index = 0;
        loop {
            let archive = source_dir.join(format!("{}_{}.tar", basename, index));
            if !archive.exists() {
                break;
            }
            let cmd = format!(
                "tar -xf {} -C {}",
                shell_escape(&archive.to_string_lossy()),
                shell_escape(&destination.to_string_lossy())
            );
            self.runner
                .run(&cmd)
                .map_err(|e| JobError::Io(std::io::Error::other(e)))?;
            fs::remove_file(&archive)?;
            index += 1;
        }
        Ok(())
    }

    fn tar_create(&self, target: &Path, root: &Path, members: &[String]) -> Result<()> {
        let mut cmd = format!(
            "tar -cf {} -C {}",
            shell_escape(&target.to_string_lossy()),
            shell_escape(&root.to_string_lossy())
        );
        for member in members {
            cmd.push(' ');
            cmd.push_str(&shell_escape(member));
        }
        self.runner
            .run(&cmd)
            .map_err(|e| JobError::Io(std::io::Error::other(e)))?;
        Ok(())
    }
}

/// All regular files under `root` as (relative path, size), sorted by
/// path for deterministic chunking.
fn walk_files(root: &Path) -> Result<Vec<(String, u64)>> {
    let mut files = Vec::new();
    collect(root, root, &mut files)?;
    files.sort();
    Ok(files)
}

fn collect(root: &Path, dir: &Path, out: &mut Vec<(String, u64)>) -> Result<()> {
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if path.is_dir() {
            collect(root, &path, out)?;
        } else {
            let rel = path
                .strip_prefix(root)
                .map_err(|e| JobError::Validation(e.to_string()))?
                .to_string_lossy()
                .into_owned();
            out.push((rel, entry.metadata()?.len()));
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::runner::{MockRunner, ShellRunner};
    use tempfile::TempDir;

    fn write(path: &Path, content: &[u8]) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    // -- Command construction --

    #[test]
    fn single_file_packs_to_index_zero() {
        let dir = TempDir::new().unwrap();
        let src = dir.path().join("data.bin");
        write(&src, b"abc");

        let runner = MockRunner::new();
        let targets = Archiver::new(&runner)
            .pack_by_fixed_size(&src, &dir.path().join("out"), "payload", 1024)
            .unwrap();

        assert_eq!(targets.len(), 1);
        assert!(targets[0].ends_with("payload_0.tar"));
        let cmds = runner.executed_commands();
        assert_eq!(cmds.len(), 1);
        assert!(cmds[0].starts_with("tar -cf "), "got: {}", cmds[0]);
        assert!(cmds[0].ends_with(" data.bin"), "got: {}", cmds[0]);
    }

    #[test]
    fn directory_splits_at_size_budget() {
        let dir = TempDir::new().unwrap();
        let src = dir.path().join("tree");
        write(&src.join("a.txt"), b"aaaa");
        write(&src.join("b.txt"), b"bbbb");
        write(&src.join("sub/c.txt"), b"cc");

        let runner = MockRunner::new();
        // Budget of 5: a(4) fills chunk 0, b(4)+c(2) exceed -> b chunk 1,
        // then c fits with b (4+2 > 5 -> own chunk).
        let targets = Archiver::new(&runner)
            .pack_by_fixed_size(&src, &dir.path().join("out"), "tree", 5)
            .unwrap();

        assert_eq!(targets.len(), 3);
        assert!(targets[0].ends_with("tree_0.tar"));
        assert!(targets[2].ends_with("tree_2.tar"));
        assert_eq!(runner.executed_commands().len(), 3);
    }

    #[test]
    fn oversized_member_gets_own_archive() {
        let dir = TempDir::new().unwrap();
        let src = dir.path().join("tree");
        write(&src.join("big.bin"), &[0u8; 64]);
        write(&src.join("small.txt"), b"x");

        let runner = MockRunner::new();
        let targets = Archiver::new(&runner)
            .pack_by_fixed_size(&src, &dir.path().join("out"), "t", 10)
            .unwrap();
        assert_eq!(targets.len(), 2);
    }

    // -- Real tar round trip --

    #[test]
    fn pack_then_unpack_restores_tree_and_deletes_archives() {
        let dir = TempDir::new().unwrap();
        let src = dir.path().join("src");
        write(&src.join("a.txt"), b"alpha");
        write(&src.join("nested/b.txt"), b"beta");
        let staging = dir.path().join("staging");
        let dest = dir.path().join("dest");

        let runner = ShellRunner;
        let archiver = Archiver::new(&runner);
        let targets = archiver
            .pack_by_fixed_size(&src, &staging, "xfer", 5)
            .unwrap();
        assert!(targets.len() >= 2, "expected a split, got {:?}", targets);

        archiver.unpack_and_delete(&staging, &dest, "xfer").unwrap();
        assert_eq!(fs::read_to_string(dest.join("a.txt")).unwrap(), "alpha");
        assert_eq!(
            fs::read_to_string(dest.join("nested/b.txt")).unwrap(),
            "beta"
        );
        for target in targets {
            assert!(!target.exists(), "{} should be deleted", target.display());
        }
    }

    #[test]
    fn unpack_with_no_archives_is_a_no_op() {
        let dir = TempDir::new().unwrap();
        let runner = MockRunner::new();
        Archiver::new(&runner)
            .unpack_and_delete(dir.path(), &dir.path().join("dest"), "none")
            .unwrap();
        assert!(runner.executed_commands().is_empty());
    }
}
