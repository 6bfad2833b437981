//! Shadow-copy sync session
//!
//! A [`SyncSession`] keeps the last document state both peers agreed on
//! (the *shadow*) next to the caller's working copy:
//!
//! 1. [`commit`](SyncSession::commit) diffs the working copy against the
//!    shadow, ignoring replica-local nodes, and returns a [`ChangeBatch`].
//!    The shadow moves forward by the same changes.
//! 2. [`receive`](SyncSession::receive) replays a peer's batch onto the
//!    shadow and onto the working copy, so local edits that were not
//!    committed yet survive.
//! 3. [`checksum`](SyncSession::checksum) and [`verify`](SyncSession::verify)
//!    compare shadows without exchanging them. A mismatch asks for a full
//!    resync through [`full_state`](SyncSession::full_state) and
//!    [`restore_from_full_state`](SyncSession::restore_from_full_state).
//!
//! # Example
//!
//! ```rust
//! use richsync_core::richtext::{patch, Change, Document, NodeKey};
//! use richsync_core::session::{Convergence, SyncSession};
//! use richsync_core::EngineConfig;
//!
//! let mut alice = SyncSession::new(Document::new(), EngineConfig::default()).unwrap();
//! let mut bob = SyncSession::new(Document::new(), EngineConfig::default()).unwrap();
//!
//! let edit = Change::InsertText { node: NodeKey::new("root/p/text"), offset: 0, text: "hi".into() };
//! let alice_doc = patch(alice.shadow(), &[edit], false).unwrap();
//!
//! let batch = alice.commit(&alice_doc).unwrap().unwrap();
//! let bob_doc = bob.receive(&batch, &Document::new()).unwrap();
//!
//! assert_eq!(bob_doc.plaintext(), "hi");
//! assert_eq!(bob.verify(&alice.checksum().unwrap()).unwrap(), Convergence::Converged);
//! ```

use crate::config::EngineConfig;
use crate::error::Result;
use crate::orderstamp::StampGenerator;
use crate::richtext::{diff, normalize, patch, ChangeBatch, Document};
use crate::value::{ChecksumOptions, Digest, EncodeOptions};
use tracing::{debug, warn};

/// Outcome of comparing checksums with a peer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Convergence {
    Converged,
    /// The replicas disagree; a full-state resync is needed
    Diverged,
}

/// One side of a two-peer sync
#[derive(Debug, Clone)]
pub struct SyncSession {
    shadow: Document,
    revision: u64,
    remote_revision: u64,
    config: EngineConfig,
}

impl SyncSession {
    /// Start a session whose shadow is the non-local part of `doc`
    ///
    /// # Errors
    ///
    /// Returns a config error when `config` does not validate.
    pub fn new(doc: Document, config: EngineConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            shadow: Document {
                root: doc.root.without_local(),
                pointers: doc.pointers,
            },
            revision: 0,
            remote_revision: 0,
            config,
        })
    }

    pub fn shadow(&self) -> &Document {
        &self.shadow
    }

    /// Number of batches committed by this side
    pub fn revision(&self) -> u64 {
        self.revision
    }

    /// Revision of the last batch received from the peer
    pub fn remote_revision(&self) -> u64 {
        self.remote_revision
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Order-stamp generator sized by the session config
    pub fn stamp_generator(&self) -> StampGenerator {
        StampGenerator::new(self.config.stamp_suffix_len)
    }

    /// Turn the working copy's shared edits into a batch
    ///
    /// Returns `Ok(None)` when there is nothing to send.
    pub fn commit(&mut self, working: &Document) -> Result<Option<ChangeBatch>> {
        let changes = diff(&self.shadow, working, false);
        if changes.is_empty() {
            return Ok(None);
        }
        self.shadow = patch(&self.shadow, &changes, true)?;
        self.revision += 1;
        debug!(revision = self.revision, changes = changes.len(), "committed local changes");
        Ok(Some(ChangeBatch::new(self.revision, changes)))
    }

    /// Apply a peer's batch, returning the updated working copy
    ///
    /// A batch at or below the last received revision is a redelivery and
    /// leaves everything unchanged. If the working copy has drifted so far
    /// that the batch no longer applies to it, the working copy is replaced
    /// by the updated shadow and the uncommitted edits are lost.
    ///
    /// # Errors
    ///
    /// Fails when the batch does not apply to the shadow, which means the
    /// peers are out of sync; resync with [`SyncSession::full_state`].
    pub fn receive(&mut self, batch: &ChangeBatch, working: &Document) -> Result<Document> {
        if batch.revision <= self.remote_revision {
            debug!(
                revision = batch.revision,
                last = self.remote_revision,
                "ignoring redelivered batch"
            );
            return Ok(working.clone());
        }

        self.shadow = patch(&self.shadow, &batch.changes, true)?;
        self.remote_revision = batch.revision;

        match patch(working, &batch.changes, true) {
            Ok(doc) => Ok(doc),
            Err(err) => {
                warn!(revision = batch.revision, error = %err, "batch conflicts with working copy; resetting to shadow");
                Ok(self.shadow.clone())
            }
        }
    }

    /// Canonical digest of the normalized shadow
    pub fn checksum(&self) -> Result<Digest> {
        let options = ChecksumOptions {
            type_safe: self.config.checksum_type_safe,
            local: false,
        };
        Ok(normalize(&self.shadow).checksum(&options)?)
    }

    /// Compare the shadow with a peer's checksum
    pub fn verify(&self, remote: &Digest) -> Result<Convergence> {
        let local = self.checksum()?;
        if &local == remote {
            return Ok(Convergence::Converged);
        }
        warn!(local = %local, remote = %remote, revision = self.revision, "replicas diverged");
        Ok(Convergence::Diverged)
    }

    /// The shadow's shared projection, encoded for a full resync
    pub fn full_state(&self) -> Result<serde_json::Value> {
        Ok(self.shadow.encode(&EncodeOptions::only_non_local())?)
    }

    /// Replace the shadow with a peer's full state
    ///
    /// Returns the new working copy. `remote_revision` is the revision of
    /// the last batch the peer had sent when it produced `state`.
    pub fn restore_from_full_state(&mut self, state: &serde_json::Value, remote_revision: u64) -> Result<Document> {
        self.shadow = Document::decode(state)?;
        self.remote_revision = remote_revision;
        debug!(remote_revision, "restored from full state");
        Ok(self.shadow.clone())
    }

    /// Purge expired ref markers from the working copy
    ///
    /// The removal reaches the peer with the next commit.
    pub fn gc(&self, working: &Document) -> Option<Document> {
        working.gc(&self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orderstamp::OrderStamp;
    use crate::richtext::{Change, ElementNode, NodeKey, TextNode};
    use crate::SyncError;

    fn two_paragraphs() -> Document {
        let mut doc = Document::new();
        doc.root.children.clear();
        for (i, word) in ["hello", "world"].iter().enumerate() {
            let key = NodeKey::new(format!("p{}", i));
            let order = OrderStamp::from(if i == 0 { "a" } else { "b" });
            let text = TextNode::new(key.derive("text"), OrderStamp::from("a"), *word);
            doc.root
                .insert_child(ElementNode::tagged(key, order, "p").with_children([text.into()]).into());
        }
        doc
    }

    fn session(doc: &Document) -> SyncSession {
        SyncSession::new(doc.clone(), EngineConfig::default()).unwrap()
    }

    #[test]
    fn test_commit_nothing() {
        let doc = two_paragraphs();
        let mut s = session(&doc);
        assert!(s.commit(&doc).unwrap().is_none());
        assert_eq!(s.revision(), 0);
    }

    #[test]
    fn test_commit_ignores_local_nodes() {
        let doc = two_paragraphs();
        let mut s = session(&doc);
        let mut working = doc.clone();
        working.root.children[0]
            .as_element_mut()
            .unwrap()
            .insert_child(TextNode::new(NodeKey::new("caret"), OrderStamp::from("z"), "|").local().into());
        assert!(s.commit(&working).unwrap().is_none());
    }

    #[test]
    fn test_concurrent_edits_converge() {
        let base = two_paragraphs();
        let mut x = session(&base);
        let mut y = session(&base);

        let x_doc = patch(
            &base,
            &[Change::InsertText {
                node: NodeKey::new("p0/text"),
                offset: 5,
                text: " there".into(),
            }],
            false,
        )
        .unwrap();
        let y_doc = patch(&base, &[Change::RemoveNode { node: NodeKey::new("p1") }], false).unwrap();

        let from_x = x.commit(&x_doc).unwrap().unwrap();
        let from_y = y.commit(&y_doc).unwrap().unwrap();

        let x_doc = x.receive(&from_y, &x_doc).unwrap();
        let y_doc = y.receive(&from_x, &y_doc).unwrap();

        assert_eq!(normalize(&x_doc).plaintext(), "hello there");
        assert_eq!(normalize(&x_doc), normalize(&y_doc));
        assert_eq!(x.verify(&y.checksum().unwrap()).unwrap(), Convergence::Converged);
    }

    #[test]
    fn test_redelivery_ignored() {
        let base = two_paragraphs();
        let mut x = session(&base);
        let mut y = session(&base);
        let edited = patch(
            &base,
            &[Change::InsertText {
                node: NodeKey::new("p0/text"),
                offset: 0,
                text: ">".into(),
            }],
            false,
        )
        .unwrap();
        let batch = x.commit(&edited).unwrap().unwrap();
        let once = y.receive(&batch, &base).unwrap();
        let twice = y.receive(&batch, &once).unwrap();
        assert_eq!(twice.plaintext(), ">hello\nworld");
        assert_eq!(y.remote_revision(), 1);
    }

    #[test]
    fn test_malformed_batch_is_error() {
        let base = two_paragraphs();
        let mut s = session(&base);
        let batch = ChangeBatch::new(
            1,
            vec![Change::DeleteText {
                node: NodeKey::new("p0/text"),
                offset: 0,
                len: 99,
            }],
        );
        assert!(matches!(s.receive(&batch, &base), Err(SyncError::Patch(_))));
        assert_eq!(s.remote_revision(), 0);
    }

    #[test]
    fn test_divergence_and_resync() {
        let base = two_paragraphs();
        let x = session(&base);
        let mut y = session(&Document::new());
        assert_eq!(y.verify(&x.checksum().unwrap()).unwrap(), Convergence::Diverged);

        let restored = y.restore_from_full_state(&x.full_state().unwrap(), 0).unwrap();
        assert_eq!(restored, base);
        assert_eq!(y.verify(&x.checksum().unwrap()).unwrap(), Convergence::Converged);
    }

    #[test]
    fn test_invalid_config_rejected() {
        let config = EngineConfig {
            stamp_suffix_len: 0,
            ..EngineConfig::default()
        };
        assert!(matches!(
            SyncSession::new(Document::new(), config),
            Err(SyncError::Config(_))
        ));
    }
}
