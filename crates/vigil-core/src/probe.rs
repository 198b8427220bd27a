//! Per-file metadata acquisition.
//!
//! Reads size, mtime, ownership and permission bits for a single path. The
//! stat variant depends on the symlink policy: when symlinks are followed
//! the link-resolving call is used, otherwise the link metadata itself is
//! read so symlinks can be rejected at the type check.

use crate::models::FileMetadata;
use std::fs;
use std::io;
use std::path::Path;

/// Collect filesystem attributes for `path`. The content hash is not filled
/// in here; the scanner composes this with [`crate::hasher`].
pub fn probe(path: &Path, follow_symlinks: bool) -> io::Result<FileMetadata> {
    let meta = if follow_symlinks {
        fs::metadata(path)?
    } else {
        fs::symlink_metadata(path)?
    };

    let mut out = FileMetadata {
        path: path.to_string_lossy().into_owned(),
        size: meta.len(),
        ..Default::default()
    };

    #[cfg(unix)]
    {
        use std::os::unix::fs::MetadataExt;
        out.mtime = meta.mtime();
        out.uid = meta.uid();
        out.gid = meta.gid();
        out.mode = meta.mode();
        out.device = meta.dev();
        out.inode = meta.ino();
        out.hardlink_count = meta.nlink();
        out.permissions = meta.mode() & 0o777;
        out.owner = user_name(meta.uid());
        out.group = group_name(meta.gid());
    }

    #[cfg(not(unix))]
    {
        out.mtime = meta
            .modified()
            .map(|t| {
                t.duration_since(std::time::UNIX_EPOCH)
                    .unwrap_or_default()
                    .as_secs() as i64
            })
            .unwrap_or(0);
        out.permissions = if meta.permissions().readonly() { 0o444 } else { 0o644 };
    }

    Ok(out)
}

/// Resolve a uid to a user name. Empty when the name service has no entry;
/// consumers fall back to the numeric id.
#[cfg(unix)]
fn user_name(uid: u32) -> String {
    nix::unistd::User::from_uid(nix::unistd::Uid::from_raw(uid))
        .ok()
        .flatten()
        .map(|u| u.name)
        .unwrap_or_default()
}

#[cfg(unix)]
fn group_name(gid: u32) -> String {
    nix::unistd::Group::from_gid(nix::unistd::Gid::from_raw(gid))
        .ok()
        .flatten()
        .map(|g| g.name)
        .unwrap_or_default()
}
