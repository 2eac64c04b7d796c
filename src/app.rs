//! The process-wide application handle.
//!
//! Grounded in spec.md §5's "process-wide application object (app state,
//! url rules, txn rules, segment terms, connect reply) is reference-counted
//! and protected by an exclusive lock acquired only at transaction begin,
//! name-freeze, and finalize handoff. Transactions hold no references into
//! the app after begin copies what it needs." Modeled on the teacher's
//! `opentelemetry_sdk::trace::TracerProvider`: an `Arc<Mutex<_>>` around the
//! mutable configuration (here, the three naming rule sets), cloned into a
//! per-transaction snapshot at `begin` rather than held by reference, per
//! spec.md §9's "Process-wide globals for app and INI state. Encapsulated as
//! an `App` handle passed into `txn_begin`; no hidden globals inside the
//! core."
use crate::ids::{IdGenerator, RandomIdGenerator};
use crate::namer::Namer;
use std::sync::{Arc, Mutex};

/// Everything a transaction needs copied out of the app at `begin` time: the
/// current naming rules, the trusted-account-key and this app's own
/// account/app ids (used to decide `tk` on outbound DT payloads), and an id
/// generator shared (not copied) across transactions.
#[derive(Clone)]
pub struct AppSnapshot {
    pub namer: Namer,
    pub trusted_account_key: String,
    pub account_id: String,
    pub app_id: String,
    pub id_generator: Arc<dyn IdGenerator>,
}

struct AppInner {
    namer: Namer,
    trusted_account_key: String,
    account_id: String,
    app_id: String,
    id_generator: Arc<dyn IdGenerator>,
}

/// A process-wide, reference-counted application handle. Locked only for
/// the duration of reading a snapshot (at transaction begin) or updating the
/// naming rules (e.g. after a reconnect delivers new server-side rules);
/// never held for the lifetime of a transaction.
#[derive(Clone)]
pub struct App {
    inner: Arc<Mutex<AppInner>>,
}

impl App {
    pub fn new(trusted_account_key: impl Into<String>, account_id: impl Into<String>, app_id: impl Into<String>) -> Self {
        App {
            inner: Arc::new(Mutex::new(AppInner {
                namer: Namer::new(),
                trusted_account_key: trusted_account_key.into(),
                account_id: account_id.into(),
                app_id: app_id.into(),
                id_generator: Arc::new(RandomIdGenerator::default()),
            })),
        }
    }

    /// Replaces the current naming configuration (e.g. after the connect
    /// handshake delivers fresh URL/transaction rules and segment terms).
    pub fn set_namer(&self, namer: Namer) {
        self.inner.lock().expect("app lock poisoned").namer = namer;
    }

    /// Copies out everything a new transaction needs, releasing the lock
    /// immediately afterward (spec.md §5).
    pub fn snapshot(&self) -> AppSnapshot {
        let guard = self.inner.lock().expect("app lock poisoned");
        AppSnapshot {
            namer: guard.namer.clone(),
            trusted_account_key: guard.trusted_account_key.clone(),
            account_id: guard.account_id.clone(),
            app_id: guard.app_id.clone(),
            id_generator: guard.id_generator.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_copies_current_config() {
        let app = App::new("trust", "acct1", "app1");
        let snap = app.snapshot();
        assert_eq!(snap.trusted_account_key, "trust");
        assert_eq!(snap.account_id, "acct1");
    }

    #[test]
    fn set_namer_is_visible_to_later_snapshots() {
        let app = App::new("trust", "acct1", "app1");
        let mut namer = Namer::new();
        namer.segment_terms.add("/api/", ["orders".to_string()]);
        app.set_namer(namer);
        let snap = app.snapshot();
        assert_eq!(snap.namer.segment_terms.apply("/api/orders/9"), "/api/orders/*");
    }
}
