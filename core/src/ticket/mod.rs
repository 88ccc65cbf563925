//! Single-use action tickets
//!
//! Every mutating entry point requires a ticket issued here. A ticket is a
//! high-entropy random token plus a keyed BLAKE3 MAC over it; the MAC key is
//! a server-held secret, so clients cannot mint signatures. The stored record
//! is addressed by a hash of (member id, signature) and flips `consumed`
//! false→true exactly once — a second verify with the same credentials fails
//! with `TICKET_CONSUMED`.

use chrono::{DateTime, Duration, Utc};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::clock::Clock;
use crate::error::RaidError;
use crate::store::{DocId, DocumentStore, Patch, TxnAbort, TxnAction};
use crate::sync::KeyedLock;

/// Default ticket lifetime.
pub const TICKET_TTL_SECS: i64 = 30 * 60;

const TOKEN_BYTES: usize = 32;
const TOKEN_HEX_LEN: usize = TOKEN_BYTES * 2;
const SIGNATURE_HEX_LEN: usize = blake3::OUT_LEN * 2;

/// Server-held MAC key. Never serialized; not derivable by a client.
#[derive(Clone)]
pub struct ServerSecret([u8; 32]);

impl ServerSecret {
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Fresh random secret (demo/test deployments; production injects one).
    pub fn generate() -> Self {
        let mut bytes = [0u8; 32];
        rand::rng().fill_bytes(&mut bytes);
        Self(bytes)
    }

    fn mac(&self, token: &str) -> blake3::Hash {
        blake3::keyed_hash(&self.0, token.as_bytes())
    }
}

impl std::fmt::Debug for ServerSecret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("ServerSecret(..)")
    }
}

/// Issued ticket handed back to the caller.
#[derive(Debug, Clone, Serialize)]
pub struct IssuedTicket {
    pub token: String,
    pub signature: String,
    pub expires_at: DateTime<Utc>,
}

/// Persisted ticket record.
#[derive(Debug, Serialize, Deserialize)]
struct TicketRecord {
    member_id: String,
    token: String,
    issued_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
    consumed: bool,
}

/// Issues and verifies single-use action tickets.
pub struct TicketAuthority<S> {
    store: Arc<S>,
    secret: ServerSecret,
    ttl: Duration,
    clock: Arc<dyn Clock>,
    locks: KeyedLock,
}

impl<S: DocumentStore> TicketAuthority<S> {
    pub fn new(store: Arc<S>, secret: ServerSecret, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            secret,
            ttl: Duration::seconds(TICKET_TTL_SECS),
            clock,
            locks: KeyedLock::new(),
        }
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    /// Issue a fresh ticket for a member.
    pub async fn issue(&self, member_id: &str) -> Result<IssuedTicket, RaidError> {
        let mut token_bytes = [0u8; TOKEN_BYTES];
        rand::rng().fill_bytes(&mut token_bytes);
        let token = hex::encode(token_bytes);
        let signature = self.secret.mac(&token).to_hex().to_string();

        let now = self.clock.now();
        let expires_at = now + self.ttl;
        let record = TicketRecord {
            member_id: member_id.to_string(),
            token: token.clone(),
            issued_at: now,
            expires_at,
            consumed: false,
        };

        let doc = serde_json::to_value(&record).map_err(|e| RaidError::Internal {
            message: format!("failed to serialize ticket record: {e}"),
        })?;
        self.store
            .create(&record_id(member_id, &signature), doc)
            .await
            .map_err(RaidError::from_store)?;

        tracing::debug!(member_id, %expires_at, "issued action ticket");
        Ok(IssuedTicket {
            token,
            signature,
            expires_at,
        })
    }

    /// Verify and consume a ticket.
    ///
    /// Checks run in a fixed order so each failure mode has its own code:
    /// malformed token, signature mismatch, missing record, expiry, already
    /// consumed. On success the record's `consumed` flag flips atomically;
    /// a racing duplicate request loses and sees `TICKET_CONSUMED`.
    pub async fn verify(
        &self,
        member_id: &str,
        token: &str,
        signature: &str,
    ) -> Result<(), RaidError> {
        if token.len() != TOKEN_HEX_LEN || !is_lower_hex(token) {
            return Err(RaidError::InvalidTicket);
        }
        if signature.len() != SIGNATURE_HEX_LEN || !is_lower_hex(signature) {
            return Err(RaidError::InvalidTicket);
        }

        let expected = self.secret.mac(token);
        let provided = parse_hash(signature).ok_or(RaidError::InvalidTicket)?;
        // blake3::Hash equality is constant-time
        if expected != provided {
            return Err(RaidError::InvalidTicketSignature);
        }

        let id = record_id(member_id, signature);
        let now = self.clock.now();

        if self.store.supports_transactions() {
            self.consume_via_transaction(&id, now).await
        } else {
            self.consume_via_lock(&id, now).await
        }
    }

    async fn consume_via_transaction(
        &self,
        id: &DocId,
        now: DateTime<Utc>,
    ) -> Result<(), RaidError> {
        let result = self
            .store
            .transact(
                id,
                Box::new(move |doc| {
                    let doc = doc.ok_or_else(|| TxnAbort::new("TICKET_NOT_FOUND", ""))?;
                    check_record(doc, now)?;
                    Ok(TxnAction::Patch(Patch::new().set("consumed", true)))
                }),
            )
            .await;

        match result {
            Ok(_) => Ok(()),
            Err(e) => Err(RaidError::from_store(e)),
        }
    }

    async fn consume_via_lock(&self, id: &DocId, now: DateTime<Utc>) -> Result<(), RaidError> {
        let _guard = self.locks.acquire(&id.path()).await;

        let doc = self
            .store
            .get(id)
            .await
            .map_err(RaidError::from_store)?
            .ok_or(RaidError::TicketNotFound)?;
        check_record(&doc, now).map_err(|abort| RaidError::from_abort(abort.code, &abort.message))?;

        self.store
            .update(id, Patch::new().set("consumed", true))
            .await
            .map_err(RaidError::from_store)
    }

    /// Delete expired ticket records. Best-effort maintenance.
    pub async fn sweep_expired(&self) -> Result<usize, RaidError> {
        let now = self.clock.now();
        let all = self
            .store
            .query(crate::store::Query::collection("tickets"))
            .await
            .map_err(RaidError::from_store)?;

        let mut removed = 0;
        for (id, doc) in all {
            let expired = doc
                .get("expires_at")
                .and_then(|v| v.as_str())
                .and_then(|s| s.parse::<DateTime<Utc>>().ok())
                .is_some_and(|at| at < now);
            if expired {
                self.store.delete(&id).await.map_err(RaidError::from_store)?;
                removed += 1;
            }
        }
        Ok(removed)
    }
}

/// Shared verification checks against a freshly read record.
fn check_record(doc: &serde_json::Value, now: DateTime<Utc>) -> Result<(), TxnAbort> {
    let record: TicketRecord = serde_json::from_value(doc.clone())
        .map_err(|e| TxnAbort::new("TICKET_NOT_FOUND", format!("corrupt record: {e}")))?;
    if record.expires_at <= now {
        return Err(TxnAbort::new("TICKET_EXPIRED", ""));
    }
    if record.consumed {
        return Err(TxnAbort::new("TICKET_CONSUMED", ""));
    }
    Ok(())
}

fn record_id(member_id: &str, signature: &str) -> DocId {
    let mut hasher = blake3::Hasher::new();
    hasher.update(member_id.as_bytes());
    hasher.update(b"|");
    hasher.update(signature.as_bytes());
    DocId::new("tickets", hasher.finalize().to_hex().to_string())
}

fn is_lower_hex(s: &str) -> bool {
    s.bytes()
        .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
}

fn parse_hash(hex_str: &str) -> Option<blake3::Hash> {
    let bytes = hex::decode(hex_str).ok()?;
    let arr: [u8; blake3::OUT_LEN] = bytes.try_into().ok()?;
    Some(blake3::Hash::from(arr))
}
