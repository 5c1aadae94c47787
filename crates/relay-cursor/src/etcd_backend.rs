//! The production [`CursorBackend`], backed by etcd's compare-and-swap
//! transactions and lease primitives.
//!
//! Key layout under `{prefix}{app_id}/`:
//! - `leader` — holds the decimal-encoded epoch (the etcd lease id) of the
//!   current leader, with that lease attached so the key auto-expires on
//!   crash.
//! - `cursor` — holds the JSON-encoded cursor string. `version` (§3) is
//!   realized as the key's etcd `mod_revision`, which is strictly monotonic
//!   per key by construction — no separate counter needed.
//!
//! Grounded on the etcd CAS leader-election pattern used for Kafka consumer
//! coordination in this corpus (`assignment-coordination::leader_election`,
//! `PersonhogStore`): a `Txn` with `Compare::version`/`Compare::value` guards
//! the write, and the `or_else` branch is read back to tell a lost race apart
//! from a stale leader.

use std::time::Duration;

use async_trait::async_trait;
use etcd_client::{Client, Compare, CompareOp, PutOptions, Txn, TxnOp};
use relay_core::error::{codes, ErrorCategory};
use relay_core::CoreError;

use crate::backend::CursorBackend;
use crate::model::{AcquireOutcome, CasOutcome, RenewOutcome};

pub struct EtcdCursorBackend {
    client: Client,
    prefix: String,
}

impl EtcdCursorBackend {
    pub async fn connect(endpoints: &[String], prefix: impl Into<String>) -> Result<Self, CoreError> {
        let client = Client::connect(endpoints, None)
            .await
            .map_err(|err| CoreError::transport(codes::CURSOR_TRANSPORT, err))?;
        Ok(Self {
            client,
            prefix: prefix.into(),
        })
    }

    fn leader_key(&self, app_id: &str) -> String {
        format!("{}{app_id}/leader", self.prefix)
    }

    fn cursor_key(&self, app_id: &str) -> String {
        format!("{}{app_id}/cursor", self.prefix)
    }

    fn transport_err(err: etcd_client::Error) -> CoreError {
        CoreError::transport(codes::CURSOR_TRANSPORT, err)
    }
}

#[async_trait]
impl CursorBackend for EtcdCursorBackend {
    async fn acquire_lease(
        &self,
        app_id: &str,
        _holder_id: &str,
        ttl: Duration,
    ) -> Result<AcquireOutcome, CoreError> {
        let mut client = self.client.clone();
        let lease = client
            .lease_grant(ttl.as_secs().max(1) as i64, None)
            .await
            .map_err(Self::transport_err)?;
        let epoch = lease.id();

        let leader_key = self.leader_key(app_id);
        let txn = Txn::new()
            .when(vec![Compare::version(
                leader_key.as_str(),
                CompareOp::Equal,
                0,
            )])
            .and_then(vec![TxnOp::put(
                leader_key.as_str(),
                epoch.to_string(),
                Some(PutOptions::new().with_lease(epoch)),
            )]);

        let resp = client.txn(txn).await.map_err(Self::transport_err)?;
        if !resp.succeeded() {
            // Another candidate holds the lease; release ours immediately.
            let _ = client.lease_revoke(epoch).await;
            return Ok(AcquireOutcome::Lost);
        }

        let cursor_key = self.cursor_key(app_id);
        if client
            .get(cursor_key.as_str(), None)
            .await
            .map_err(Self::transport_err)?
            .kvs()
            .is_empty()
        {
            // First leader for this app_id ever: seed an empty cursor.
            client
                .put(cursor_key.as_str(), "", None)
                .await
                .map_err(Self::transport_err)?;
        }

        Ok(AcquireOutcome::Ok(crate::model::LeaderLease { epoch, ttl }))
    }

    async fn renew_lease(&self, _app_id: &str, epoch: i64) -> Result<RenewOutcome, CoreError> {
        let mut client = self.client.clone();
        let (mut keeper, mut stream) = client
            .lease_keep_alive(epoch)
            .await
            .map_err(Self::transport_err)?;
        keeper.keep_alive().await.map_err(Self::transport_err)?;
        match stream.message().await.map_err(Self::transport_err)? {
            Some(resp) if resp.ttl() > 0 => Ok(RenewOutcome::Ok),
            _ => Ok(RenewOutcome::Lost),
        }
    }

    async fn load_cursor(&self, app_id: &str) -> Result<(String, i64), CoreError> {
        let mut client = self.client.clone();
        let key = self.cursor_key(app_id);
        let resp = client.get(key.as_str(), None).await.map_err(Self::transport_err)?;
        match resp.kvs().first() {
            Some(kv) => {
                let cursor = String::from_utf8_lossy(kv.value()).into_owned();
                Ok((cursor, kv.mod_revision()))
            }
            None => Ok((String::new(), 0)),
        }
    }

    async fn update_cursor_cas(
        &self,
        app_id: &str,
        epoch: i64,
        expected_version: i64,
        new_cursor: &str,
    ) -> Result<CasOutcome, CoreError> {
        let mut client = self.client.clone();
        let leader_key = self.leader_key(app_id);
        let cursor_key = self.cursor_key(app_id);

        let txn = Txn::new()
            .when(vec![
                Compare::value(leader_key.as_str(), CompareOp::Equal, epoch.to_string()),
                Compare::mod_revision(cursor_key.as_str(), CompareOp::Equal, expected_version),
            ])
            .and_then(vec![TxnOp::put(cursor_key.as_str(), new_cursor, None)])
            .or_else(vec![
                TxnOp::get(leader_key.as_str(), None),
                TxnOp::get(cursor_key.as_str(), None),
            ]);

        let resp = client.txn(txn).await.map_err(Self::transport_err)?;

        if resp.succeeded() {
            // The committed put's new mod_revision is the new version; a
            // fresh read is the simplest way to obtain it without parsing
            // heterogeneous txn op responses.
            let (_, version) = self.load_cursor(app_id).await?;
            return Ok(CasOutcome::Committed(version));
        }

        let mut leader_matches = false;
        let mut actual_version = expected_version;
        for op_resp in resp.op_responses() {
            if let etcd_client::TxnOpResponse::Get(get_resp) = op_resp {
                if let Some(kv) = get_resp.kvs().first() {
                    if kv.key_str().unwrap_or_default() == leader_key {
                        leader_matches =
                            String::from_utf8_lossy(kv.value()) == epoch.to_string();
                    } else if kv.key_str().unwrap_or_default() == cursor_key {
                        actual_version = kv.mod_revision();
                    }
                }
            }
        }

        if !leader_matches {
            return Ok(CasOutcome::NotLeader);
        }
        Ok(CasOutcome::Conflict(actual_version))
    }
}
