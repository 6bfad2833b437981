//! JavaScript bindings for RichSync core types
//!
//! Documents, changes and batches cross the boundary as JSON strings in
//! their serde form.

use crate::config::EngineConfig;
use crate::orderstamp::{self, OrderStamp};
use crate::richtext::{self, Change, ChangeBatch, Document};
use crate::session::{Convergence, SyncSession};
use crate::value::{ChecksumOptions, Digest};
use wasm_bindgen::prelude::*;

fn js_error(context: &str, err: impl std::fmt::Display) -> JsValue {
    JsValue::from_str(&format!("{}: {}", context, err))
}

fn parse<T: serde::de::DeserializeOwned>(json: &str) -> Result<T, JsValue> {
    serde_json::from_str(json).map_err(|e| js_error("JSON parse failed", e))
}

fn stringify<T: serde::Serialize>(value: &T) -> Result<String, JsValue> {
    serde_json::to_string(value).map_err(|e| js_error("JSON serialization failed", e))
}

/// JavaScript-friendly wrapper for Document
#[wasm_bindgen]
pub struct WasmDocument {
    inner: Document,
}

impl Default for WasmDocument {
    fn default() -> Self {
        Self::new()
    }
}

#[wasm_bindgen]
impl WasmDocument {
    /// Create a document holding one empty paragraph
    #[wasm_bindgen(constructor)]
    pub fn new() -> Self {
        Self { inner: Document::new() }
    }

    /// Import from JSON string
    #[wasm_bindgen(js_name = fromJSON)]
    pub fn from_json(json: &str) -> Result<WasmDocument, JsValue> {
        Ok(Self { inner: parse(json)? })
    }

    /// Export as JSON string
    #[wasm_bindgen(js_name = toJSON)]
    pub fn to_json(&self) -> Result<String, JsValue> {
        stringify(&self.inner)
    }

    /// Text content, one line per block
    #[wasm_bindgen(js_name = plaintext)]
    pub fn plaintext(&self) -> String {
        self.inner.plaintext()
    }

    /// Normalized copy
    #[wasm_bindgen(js_name = normalize)]
    pub fn normalize(&self) -> WasmDocument {
        Self {
            inner: richtext::normalize(&self.inner),
        }
    }

    /// Changes turning this document into `other` (JSON array)
    #[wasm_bindgen(js_name = diff)]
    pub fn diff(&self, other: &WasmDocument, include_local: bool) -> Result<String, JsValue> {
        stringify(&richtext::diff(&self.inner, &other.inner, include_local))
    }

    /// Apply a JSON array of changes, returning the patched copy
    #[wasm_bindgen(js_name = patch)]
    pub fn patch(&self, changes_json: &str, grow_refs: bool) -> Result<WasmDocument, JsValue> {
        let changes: Vec<Change> = parse(changes_json)?;
        richtext::patch(&self.inner, &changes, grow_refs)
            .map(|inner| Self { inner })
            .map_err(|e| js_error("Patch failed", e))
    }

    /// Hex digest of the shared (non-local) content
    #[wasm_bindgen(js_name = checksum)]
    pub fn checksum(&self, type_safe: bool) -> Result<String, JsValue> {
        let options = ChecksumOptions {
            type_safe,
            local: false,
        };
        self.inner
            .checksum(&options)
            .map(|digest| digest.to_string())
            .map_err(|e| js_error("Checksum failed", e))
    }
}

/// JavaScript-friendly wrapper for SyncSession
#[wasm_bindgen]
pub struct WasmSession {
    inner: SyncSession,
}

#[wasm_bindgen]
impl WasmSession {
    /// Start a session from a document and an optional JSON config
    #[wasm_bindgen(constructor)]
    pub fn new(doc: &WasmDocument, config_json: Option<String>) -> Result<WasmSession, JsValue> {
        super::utils::init_panic_hook();
        let config = match config_json {
            Some(json) => EngineConfig::from_json(&json).map_err(|e| js_error("Invalid config", e))?,
            None => EngineConfig::default(),
        };
        SyncSession::new(doc.inner.clone(), config)
            .map(|inner| Self { inner })
            .map_err(|e| js_error("Session failed", e))
    }

    /// Commit the working copy; returns the batch as JSON, if any
    #[wasm_bindgen(js_name = commit)]
    pub fn commit(&mut self, working: &WasmDocument) -> Result<Option<String>, JsValue> {
        match self.inner.commit(&working.inner) {
            Ok(Some(batch)) => batch.to_json().map(Some).map_err(|e| js_error("Commit failed", e)),
            Ok(None) => Ok(None),
            Err(e) => Err(js_error("Commit failed", e)),
        }
    }

    /// Apply a peer's JSON batch, returning the updated working copy
    #[wasm_bindgen(js_name = receive)]
    pub fn receive(&mut self, batch_json: &str, working: &WasmDocument) -> Result<WasmDocument, JsValue> {
        let batch = ChangeBatch::from_json(batch_json).map_err(|e| js_error("Invalid batch", e))?;
        self.inner
            .receive(&batch, &working.inner)
            .map(|inner| WasmDocument { inner })
            .map_err(|e| js_error("Receive failed", e))
    }

    /// Hex digest of the shadow
    #[wasm_bindgen(js_name = checksum)]
    pub fn checksum(&self) -> Result<String, JsValue> {
        self.inner
            .checksum()
            .map(|digest| digest.to_string())
            .map_err(|e| js_error("Checksum failed", e))
    }

    /// True when the peer's digest matches the shadow
    #[wasm_bindgen(js_name = verify)]
    pub fn verify(&self, remote_digest: String) -> Result<bool, JsValue> {
        self.inner
            .verify(&Digest::from_hex(remote_digest))
            .map(|c| c == Convergence::Converged)
            .map_err(|e| js_error("Verify failed", e))
    }

    /// Encoded shadow for a full resync
    #[wasm_bindgen(js_name = fullState)]
    pub fn full_state(&self) -> Result<String, JsValue> {
        let state = self.inner.full_state().map_err(|e| js_error("Encode failed", e))?;
        Ok(state.to_string())
    }

    /// Replace the shadow with a peer's full state
    #[wasm_bindgen(js_name = restoreFromFullState)]
    pub fn restore_from_full_state(&mut self, state_json: &str, remote_revision: u64) -> Result<WasmDocument, JsValue> {
        let state: serde_json::Value = parse(state_json)?;
        self.inner
            .restore_from_full_state(&state, remote_revision)
            .map(|inner| WasmDocument { inner })
            .map_err(|e| js_error("Restore failed", e))
    }

    /// Number of batches committed by this side
    #[wasm_bindgen(js_name = revision)]
    pub fn revision(&self) -> u64 {
        self.inner.revision()
    }
}

/// Order stamp strictly between two stamps
#[wasm_bindgen(js_name = between)]
pub fn between(a: &str, b: &str) -> Result<String, JsValue> {
    orderstamp::try_between(&OrderStamp::from(a), &OrderStamp::from(b))
        .map(OrderStamp::into_string)
        .map_err(|e| js_error("between failed", e))
}

/// Order stamp for the current time
#[wasm_bindgen(js_name = present)]
pub fn present() -> String {
    orderstamp::present().into_string()
}
