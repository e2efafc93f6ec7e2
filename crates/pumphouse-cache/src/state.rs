//! State-path derivation and the single-writer actor.
//!
//! Each logical object or export job owns exactly one `.state` file. The
//! actor serializes every state mutation through one consumer task, so
//! concurrent producers never interleave writes to the same path and a
//! write cannot race a delete.

use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::{mpsc, oneshot};

use crate::namespace::Namespace;

/// File name of the per-directory progress state file.
pub const STATE_FILE_NAME: &str = ".state";

/// Derive the state path for a cache key.
///
/// A key whose final segment has no extension names a logical object, so
/// its state lives inside it: `Account` → `Account/.state`. A key with an
/// extension names a file, so state lives beside it:
/// `Account/metadata.json` → `Account/.state`. Either way a directory holds
/// at most one state file.
pub fn state_path(key: &str) -> String {
    let trimmed = key.trim_end_matches('/');
    if trimmed.is_empty() {
        return STATE_FILE_NAME.to_string();
    }

    let (dir, file) = match trimmed.rfind('/') {
        Some(i) => (&trimmed[..i], &trimmed[i + 1..]),
        None => ("", trimmed),
    };

    let has_extension = std::path::Path::new(file).extension().is_some();
    if has_extension {
        if dir.is_empty() {
            STATE_FILE_NAME.to_string()
        } else {
            format!("{dir}/{STATE_FILE_NAME}")
        }
    } else {
        format!("{trimmed}/{STATE_FILE_NAME}")
    }
}

/// A mutation queued onto the single-writer actor.
#[derive(Debug)]
pub(crate) enum StateCommand {
    Update {
        key: String,
        data: Bytes,
        /// Write verbatim at `key` instead of the derived state path.
        with_name: bool,
    },
    Clear {
        key: String,
    },
    /// Ack once every previously queued command has been applied.
    Sync(oneshot::Sender<()>),
}

/// Consumer side of the actor: applies commands in FIFO order until the
/// channel closes. Write failures are logged and fail that update only;
/// the actor keeps serving later commands.
pub(crate) async fn run_state_actor(ns: Arc<Namespace>, mut rx: mpsc::Receiver<StateCommand>) {
    while let Some(command) = rx.recv().await {
        match command {
            StateCommand::Update {
                key,
                data,
                with_name,
            } => {
                if data.is_empty() {
                    tracing::warn!(key, "updating state as empty");
                }
                let path = if with_name { key.clone() } else { state_path(&key) };
                match ns.write(&path, &data).await {
                    Ok(()) => tracing::debug!(path, "cache state updated"),
                    Err(e) => tracing::error!(path, error = %e, "unable to write cache state"),
                }
            }
            StateCommand::Clear { key } => {
                let path = state_path(&key);
                match ns.remove_file(&path).await {
                    Ok(()) => tracing::debug!(path, "cache state cleared"),
                    Err(e) => tracing::error!(path, error = %e, "unable to clear cache state"),
                }
            }
            StateCommand::Sync(ack) => {
                let _ = ack.send(());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extensionless_key_nests_state_inside() {
        assert_eq!(state_path("Account"), "Account/.state");
        assert_eq!(state_path("nested/Account"), "nested/Account/.state");
    }

    #[test]
    fn key_with_extension_places_state_beside() {
        assert_eq!(state_path("Account/metadata.json"), "Account/.state");
        assert_eq!(state_path("a/b/c.csv"), "a/b/.state");
    }

    #[test]
    fn top_level_file_maps_to_root_state() {
        assert_eq!(state_path("report.csv"), ".state");
    }

    #[test]
    fn trailing_slash_is_ignored() {
        assert_eq!(state_path("Account/"), "Account/.state");
    }

    #[test]
    fn empty_key_maps_to_root_state() {
        assert_eq!(state_path(""), ".state");
    }
}
