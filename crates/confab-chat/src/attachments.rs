//! Pending attachments for the next outgoing turn.

use std::sync::{Mutex, MutexGuard};

use confab_core::types::Attachment;

use crate::error::ChatError;

/// Content type of rendered artifact snapshots.
pub const ARTIFACT_SNAPSHOT_TYPE: &str = "image/png";

/// The working set drained into one outgoing turn.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PendingAttachments {
    /// User uploads and captured selection images, in insertion order.
    pub images: Vec<Attachment>,
    /// References to rendered artifacts, without duplicates.
    pub artifact_refs: Vec<String>,
}

impl PendingAttachments {
    pub fn is_empty(&self) -> bool {
        self.images.is_empty() && self.artifact_refs.is_empty()
    }

    /// Normalize both provenances into the attachment list carried by a turn.
    pub fn into_turn_attachments(self) -> Vec<Attachment> {
        let mut all = self.images;
        all.extend(
            self.artifact_refs
                .into_iter()
                .map(|url| Attachment::new(url, ARTIFACT_SNAPSHOT_TYPE)),
        );
        all
    }
}

/// Thread-safe attachment working set.
#[derive(Debug, Default)]
pub struct AttachmentManager {
    pending: Mutex<PendingAttachments>,
}

impl AttachmentManager {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, PendingAttachments>, ChatError> {
        self.pending
            .lock()
            .map_err(|e| ChatError::Internal(format!("attachment lock poisoned: {}", e)))
    }

    /// Append items, keeping their order. Duplicates are kept.
    pub fn add(&self, items: impl IntoIterator<Item = Attachment>) -> Result<(), ChatError> {
        self.lock()?.images.extend(items);
        Ok(())
    }

    /// Remove every pending item whose URL matches. Absent URLs are a no-op.
    pub fn remove(&self, url: &str) -> Result<(), ChatError> {
        let mut pending = self.lock()?;
        pending.images.retain(|a| a.url != url);
        pending.artifact_refs.retain(|r| r != url);
        Ok(())
    }

    /// Add the selection image, and the artifact reference if not already selected.
    pub fn capture_from_artifact(
        &self,
        selection_image: Attachment,
        artifact_ref: impl Into<String>,
    ) -> Result<(), ChatError> {
        let artifact_ref = artifact_ref.into();
        let mut pending = self.lock()?;
        pending.images.push(selection_image);
        if !pending.artifact_refs.contains(&artifact_ref) {
            pending.artifact_refs.push(artifact_ref);
        }
        Ok(())
    }

    /// Take both sets, leaving them empty. Anything added afterwards lands in
    /// the next drain.
    pub fn drain_for_send(&self) -> Result<PendingAttachments, ChatError> {
        Ok(std::mem::take(&mut *self.lock()?))
    }

    /// Copy of the current working set.
    pub fn snapshot(&self) -> Result<PendingAttachments, ChatError> {
        Ok(self.lock()?.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn image(url: &str) -> Attachment {
        Attachment::new(url, "image/png")
    }

    #[test]
    fn test_add_preserves_order_and_duplicates() {
        let manager = AttachmentManager::new();
        manager.add([image("a"), image("b")]).unwrap();
        manager.add([image("a")]).unwrap();

        let urls: Vec<_> = manager
            .snapshot()
            .unwrap()
            .images
            .into_iter()
            .map(|a| a.url)
            .collect();
        assert_eq!(urls, vec!["a", "b", "a"]);
    }

    #[test]
    fn test_remove_by_url() {
        let manager = AttachmentManager::new();
        manager.add([image("a"), image("b")]).unwrap();
        manager.remove("a").unwrap();
        manager.remove("missing").unwrap();

        let pending = manager.snapshot().unwrap();
        assert_eq!(pending.images, vec![image("b")]);
    }

    #[test]
    fn test_capture_from_artifact_is_idempotent_for_refs() {
        let manager = AttachmentManager::new();
        manager.capture_from_artifact(image("sel-1"), "artifact.png").unwrap();
        manager.capture_from_artifact(image("sel-2"), "artifact.png").unwrap();

        let pending = manager.snapshot().unwrap();
        assert_eq!(pending.images.len(), 2);
        assert_eq!(pending.artifact_refs, vec!["artifact.png".to_string()]);
    }

    #[test]
    fn test_drain_clears_both_sets() {
        let manager = AttachmentManager::new();
        manager.capture_from_artifact(image("sel"), "ref").unwrap();

        let drained = manager.drain_for_send().unwrap();
        assert_eq!(drained.images.len(), 1);
        assert_eq!(drained.artifact_refs.len(), 1);
        assert!(manager.snapshot().unwrap().is_empty());
    }

    #[test]
    fn test_add_after_drain_lands_in_next_drain() {
        let manager = AttachmentManager::new();
        manager.add([image("first")]).unwrap();
        let first = manager.drain_for_send().unwrap();
        manager.add([image("second")]).unwrap();
        let second = manager.drain_for_send().unwrap();

        assert_eq!(first.images, vec![image("first")]);
        assert_eq!(second.images, vec![image("second")]);
    }

    #[test]
    fn test_concurrent_adds_never_lost_or_duplicated() {
        let manager = Arc::new(AttachmentManager::new());
        let writers: Vec<_> = (0..4)
            .map(|t| {
                let manager = manager.clone();
                std::thread::spawn(move || {
                    for i in 0..250 {
                        manager.add([image(&format!("{}-{}", t, i))]).unwrap();
                    }
                })
            })
            .collect();

        let mut drained = 0;
        for _ in 0..50 {
            drained += manager.drain_for_send().unwrap().images.len();
        }
        for writer in writers {
            writer.join().unwrap();
        }
        drained += manager.drain_for_send().unwrap().images.len();

        assert_eq!(drained, 1000);
    }

    #[test]
    fn test_turn_attachments_normalize_refs() {
        let pending = PendingAttachments {
            images: vec![Attachment::new("upload.jpg", "image/jpeg")],
            artifact_refs: vec!["snapshot".to_string()],
        };
        let attachments = pending.into_turn_attachments();
        assert_eq!(attachments.len(), 2);
        assert_eq!(attachments[1], Attachment::new("snapshot", ARTIFACT_SNAPSHOT_TYPE));
    }
}
